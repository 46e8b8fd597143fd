//! Service and layer configuration types.
//!
//! Configuration is loaded once at startup (or re-loaded between
//! requests); the render path only ever sees immutable snapshots of
//! these types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;
use crate::mask::Mask;

pub const DEFAULT_RECV_MSG_SIZE: usize = 10 * 1024 * 1024;

pub const DEFAULT_WMS_POLYGON_SEGMENTS: i32 = 2;
pub const DEFAULT_WCS_POLYGON_SEGMENTS: i32 = 10;

pub const DEFAULT_WMS_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_WCS_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_WPS_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_GRPC_CONC_PER_NODE: usize = 16;
pub const DEFAULT_POLYGON_SHARD_CONC_LIMIT: usize = 2;

pub const DEFAULT_WMS_MAX_BAND_VARIABLES: usize = 6;
pub const DEFAULT_WMS_MAX_BAND_TOKENS: usize = 75;
pub const DEFAULT_WMS_MAX_BAND_EXPRESSIONS: usize = 3;

pub const DEFAULT_WCS_MAX_BAND_VARIABLES: usize = 10;
pub const DEFAULT_WCS_MAX_BAND_TOKENS: usize = 300;
pub const DEFAULT_WCS_MAX_BAND_EXPRESSIONS: usize = 10;

/// Axis-mapping policy for dataset axes absent from the request:
/// select only the first index, or fan out across all of them.
pub const AXIS_MAPPING_FIRST: i32 = 0;
pub const AXIS_MAPPING_ALL: i32 = 1;

/// Top-level service endpoints and cluster wiring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub ows_hostname: String,
    pub mas_address: String,
    #[serde(default)]
    pub worker_nodes: Vec<String>,
    #[serde(default)]
    pub temp_dir: String,
    #[serde(default)]
    pub max_grpc_recv_msg_size: Option<usize>,
}

impl ServiceConfig {
    pub fn max_recv_msg_size(&self) -> usize {
        self.max_grpc_recv_msg_size.unwrap_or(DEFAULT_RECV_MSG_SIZE)
    }
}

/// A published axis of a layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerAxis {
    pub name: String,
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub aggregate: i32,
}

/// A coarser pre-computed rendition of a layer, keyed by the request
/// resolution at which it becomes preferable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Overview {
    pub data_source: String,
    #[serde(default)]
    pub zoom_limit: f64,
}

/// Everything a layer needs to be indexed and rendered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub data_source: String,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub axes: Vec<LayerAxis>,
    #[serde(default)]
    pub mask: Option<Mask>,
    #[serde(default)]
    pub overviews: Vec<Overview>,

    #[serde(default)]
    pub zoom_limit: f64,
    #[serde(default)]
    pub polygon_segments: Option<i32>,
    #[serde(default)]
    pub grpc_conc_limit: Option<usize>,
    #[serde(default)]
    pub polygon_shard_conc_limit: Option<usize>,
    #[serde(default)]
    pub query_limit: i32,
    #[serde(default)]
    pub no_reprojection: bool,
    #[serde(default)]
    pub axis_mapping: i32,
    #[serde(default)]
    pub grpc_tile_x_size: f64,
    #[serde(default)]
    pub grpc_tile_y_size: f64,
    #[serde(default)]
    pub index_tile_x_size: f64,
    #[serde(default)]
    pub index_tile_y_size: f64,
    #[serde(default)]
    pub spatial_extent: Option<BoundingBox>,
    #[serde(default)]
    pub index_res_limit: f64,
    #[serde(default)]
    pub mas_query_hint: String,
    #[serde(default)]
    pub srs_cf: i32,
    #[serde(default)]
    pub fusion_unscale: i32,

    #[serde(default)]
    pub max_band_variables: Option<usize>,
    #[serde(default)]
    pub max_band_tokens: Option<usize>,
    #[serde(default)]
    pub max_band_expressions: Option<usize>,
    /// Per-token-kind ACL: kind name mapped to `None` (kind forbidden)
    /// or a deny-list of values.
    #[serde(default)]
    pub band_token_acl: HashMap<String, Option<Vec<String>>>,
}

impl Layer {
    /// Pick the coarsest overview applicable to a request resolution, or
    /// `None` when the layer itself should be used.
    ///
    /// Overviews are ordered finest to coarsest by `zoom_limit`. When
    /// `allow_extrapolation` is false and even the finest overview is
    /// coarser than the request, no overview is selected.
    pub fn best_overview_for(&self, req_res: f64, allow_extrapolation: bool) -> Option<&Overview> {
        if self.overviews.is_empty() || req_res <= self.zoom_limit {
            return None;
        }

        if !allow_extrapolation && self.overviews[0].zoom_limit > req_res {
            return None;
        }

        let mut best = 0;
        for (i, ovr) in self.overviews.iter().enumerate() {
            if ovr.zoom_limit > self.zoom_limit {
                break;
            }
            best = i;
        }
        Some(&self.overviews[best])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer_with_overviews() -> Layer {
        Layer {
            name: "lst".to_string(),
            data_source: "/g/data/lst".to_string(),
            zoom_limit: 100.0,
            overviews: vec![
                Overview {
                    data_source: "/g/data/lst_ovr_10".to_string(),
                    zoom_limit: 10.0,
                },
                Overview {
                    data_source: "/g/data/lst_ovr_50".to_string(),
                    zoom_limit: 50.0,
                },
                Overview {
                    data_source: "/g/data/lst_ovr_500".to_string(),
                    zoom_limit: 500.0,
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_no_overview_below_zoom_limit() {
        let layer = layer_with_overviews();
        assert!(layer.best_overview_for(50.0, true).is_none());
    }

    #[test]
    fn test_coarsest_admissible_overview() {
        let layer = layer_with_overviews();
        let ovr = layer.best_overview_for(200.0, true).unwrap();
        assert_eq!(ovr.data_source, "/g/data/lst_ovr_50");
    }

    #[test]
    fn test_extrapolation_gate() {
        let mut layer = layer_with_overviews();
        layer.overviews[0].zoom_limit = 300.0;
        assert!(layer.best_overview_for(200.0, false).is_none());
        assert!(layer.best_overview_for(200.0, true).is_some());
    }

    #[test]
    fn test_layer_config_deserializes() {
        let json = r#"{
            "name": "ndvi",
            "data_source": "/g/data/modis",
            "namespaces": ["B4", "B8"],
            "axis_mapping": 1,
            "spatial_extent": {"min_x":0.0,"min_y":0.0,"max_x":10.0,"max_y":10.0},
            "band_token_acl": {"FUNCTION": null, "VARIABLE": ["secret"]}
        }"#;
        let layer: Layer = serde_json::from_str(json).unwrap();
        assert_eq!(layer.namespaces, vec!["B4", "B8"]);
        assert_eq!(layer.axis_mapping, AXIS_MAPPING_ALL);
        assert!(layer.band_token_acl["FUNCTION"].is_none());
        assert_eq!(
            layer.band_token_acl["VARIABLE"].as_deref(),
            Some(&["secret".to_string()][..])
        );
    }
}
