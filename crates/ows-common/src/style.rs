//! Colour palettes for rendered tiles.
//!
//! A palette is an ordered list of RGBA anchors plus an interpolation
//! flag. Rendering maps scaled bytes 0..=254 through a pre-computed
//! 256-entry lookup table; entry 255 is the no-data colour.

use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{OwsError, OwsResult};

/// An RGBA colour value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn transparent() -> Self {
        Self {
            r: 0,
            g: 0,
            b: 0,
            a: 0,
        }
    }
}

/// Linear interpolation between two colours, `t` in 0..=1.
fn interpolate_colour(c1: Rgba, c2: Rgba, t: f32) -> Rgba {
    let t = t.clamp(0.0, 1.0);
    let t_inv = 1.0 - t;

    Rgba::new(
        ((c1.r as f32 * t_inv) + (c2.r as f32 * t)) as u8,
        ((c1.g as f32 * t_inv) + (c2.g as f32 * t)) as u8,
        ((c1.b as f32 * t_inv) + (c2.b as f32 * t)) as u8,
        ((c1.a as f32 * t_inv) + (c2.a as f32 * t)) as u8,
    )
}

/// A named colour palette.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Palette {
    pub name: String,
    #[serde(default)]
    pub interpolate: bool,
    pub colours: Vec<Rgba>,
    /// Colour for the reserved no-data byte; transparent when unset.
    #[serde(default)]
    pub no_data_colour: Option<Rgba>,
}

impl Palette {
    /// Compute the 256-entry lookup table for this palette.
    ///
    /// Bytes 0..=254 map across the anchor list (piecewise-linear when
    /// interpolating, nearest-lower anchor otherwise); byte 255 maps to
    /// the no-data colour.
    pub fn lookup_table(&self) -> OwsResult<[Rgba; 256]> {
        if self.colours.len() < 2 {
            return Err(OwsError::ConfigError(format!(
                "palette '{}' needs at least 2 colours, got {}",
                self.name,
                self.colours.len()
            )));
        }

        let mut lut = [Rgba::transparent(); 256];
        let n = self.colours.len();

        if self.interpolate {
            let segments = (n - 1) as f32;
            for (v, entry) in lut.iter_mut().take(255).enumerate() {
                let pos = v as f32 / 254.0 * segments;
                let seg = (pos.floor() as usize).min(n - 2);
                *entry = interpolate_colour(self.colours[seg], self.colours[seg + 1], pos - seg as f32);
            }
        } else {
            for (v, entry) in lut.iter_mut().take(255).enumerate() {
                let idx = (v * n / 255).min(n - 1);
                *entry = self.colours[idx];
            }
        }

        lut[255] = self.no_data_colour.unwrap_or_else(Rgba::transparent);
        Ok(lut)
    }
}

/// Process-wide registry of named palettes, populated from layer
/// configuration at startup and read on the render path.
static PALETTES: Lazy<RwLock<HashMap<String, Palette>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Register (or replace) a named palette.
pub fn register_palette(palette: Palette) {
    let mut reg = PALETTES.write().unwrap();
    reg.insert(palette.name.clone(), palette);
}

/// Look up a palette by name.
pub fn get_palette(name: &str) -> Option<Palette> {
    let reg = PALETTES.read().unwrap();
    reg.get(name).cloned()
}
