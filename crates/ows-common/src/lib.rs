//! Common types and utilities shared across the tile services.

pub mod bbox;
pub mod config;
pub mod error;
pub mod mask;
pub mod mercator;
pub mod scale;
pub mod style;
pub mod time;

pub use bbox::BoundingBox;
pub use config::{Layer, LayerAxis, Overview, ServiceConfig};
pub use error::{OwsError, OwsResult};
pub use mask::Mask;
pub use scale::{ColourScale, ScaleParams};
pub use style::{Palette, Rgba};
