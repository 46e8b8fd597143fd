//! Value scaling parameters.

use serde::{Deserialize, Serialize};

/// Colour scale mode. Serialized as the wire integers 0/1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum ColourScale {
    #[default]
    Linear,
    Log,
}

impl TryFrom<i32> for ColourScale {
    type Error = String;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(ColourScale::Linear),
            1 => Ok(ColourScale::Log),
            other => Err(format!("invalid colour scale: {other}")),
        }
    }
}

impl From<ColourScale> for i32 {
    fn from(v: ColourScale) -> i32 {
        match v {
            ColourScale::Linear => 0,
            ColourScale::Log => 1,
        }
    }
}

/// Parameters for mapping numeric rasters to display bytes.
///
/// `offset` and `clip` bound the value domain; when both are zero the
/// scaler derives them from the data. `scale` is a multiplier applied by
/// unscaling fusion pipelines and is carried through untouched here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScaleParams {
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub scale: f64,
    #[serde(default)]
    pub clip: f64,
    #[serde(default)]
    pub colour_scale: ColourScale,
}
