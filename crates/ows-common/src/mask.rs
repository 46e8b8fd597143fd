//! Mask layer configuration.

use serde::{Deserialize, Serialize};

/// Configuration of a mask layer applied to a rendered tile.
///
/// The mask is resolved through a side index query against `data_source`
/// (falling back to the main collection when empty). `bit_tests` and
/// `id_expressions` are evaluated by the warp workers and carried here
/// only for configuration plumbing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mask {
    pub id: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub data_source: String,
    #[serde(default)]
    pub inclusive: bool,
    #[serde(default)]
    pub bit_tests: Vec<String>,
    #[serde(default)]
    pub id_expressions: Vec<String>,
}
