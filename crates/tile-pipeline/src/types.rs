//! Request and granule types flowing through the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use band_math::{BandExpressions, ComplexityCriteria};
use chrono::{DateTime, Utc};
use ows_common::config::{
    Layer, DEFAULT_GRPC_CONC_PER_NODE, DEFAULT_POLYGON_SHARD_CONC_LIMIT,
    DEFAULT_WMS_POLYGON_SEGMENTS,
};
use ows_common::{BoundingBox, Mask, Palette, ScaleParams};

use crate::mas::GeoLocInfo;

/// Namespace of the empty-tile sentinel.
pub const EMPTY_TILE_NS: &str = "empty";

/// Path of granules that carry no source data.
pub const NULL_PATH: &str = "NULL";

/// Immutable per-request configuration snapshot.
///
/// Cloned by value into every granule so the data path never touches
/// mutable global configuration; the heavyweight members are shared
/// references.
#[derive(Debug, Clone, Default)]
pub struct ConfigPayload {
    pub name_spaces: Vec<String>,
    pub band_expr: Option<Arc<BandExpressions>>,
    pub band_criteria: Option<Arc<ComplexityCriteria>>,
    pub scale_params: ScaleParams,
    pub palette: Option<Arc<Palette>>,
    pub mask: Option<Arc<Mask>>,
    pub zoom_limit: f64,
    pub polygon_segments: i32,
    pub grpc_conc_limit: usize,
    pub polygon_shard_conc_limit: usize,
    pub query_limit: i32,
    pub no_reprojection: bool,
    pub axis_mapping: i32,
    pub grpc_tile_x_size: f64,
    pub grpc_tile_y_size: f64,
    pub index_tile_x_size: f64,
    pub index_tile_y_size: f64,
    pub spatial_extent: Option<BoundingBox>,
    pub index_res_limit: f64,
    pub mas_query_hint: String,
    pub req_res: f64,
    pub srs_cf: i32,
    pub fusion_unscale: i32,
}

impl ConfigPayload {
    /// Snapshot the policy knobs of a layer.
    pub fn from_layer(layer: &Layer) -> Self {
        Self {
            name_spaces: layer.namespaces.clone(),
            mask: layer.mask.clone().map(Arc::new),
            zoom_limit: layer.zoom_limit,
            polygon_segments: layer
                .polygon_segments
                .unwrap_or(DEFAULT_WMS_POLYGON_SEGMENTS),
            grpc_conc_limit: layer.grpc_conc_limit.unwrap_or(DEFAULT_GRPC_CONC_PER_NODE),
            polygon_shard_conc_limit: layer
                .polygon_shard_conc_limit
                .unwrap_or(DEFAULT_POLYGON_SHARD_CONC_LIMIT),
            query_limit: layer.query_limit,
            no_reprojection: layer.no_reprojection,
            axis_mapping: layer.axis_mapping,
            grpc_tile_x_size: layer.grpc_tile_x_size,
            grpc_tile_y_size: layer.grpc_tile_y_size,
            index_tile_x_size: layer.index_tile_x_size,
            index_tile_y_size: layer.index_tile_y_size,
            spatial_extent: layer.spatial_extent,
            index_res_limit: layer.index_res_limit,
            mas_query_hint: layer.mas_query_hint.clone(),
            srs_cf: layer.srs_cf,
            fusion_unscale: layer.fusion_unscale,
            ..Default::default()
        }
    }
}

/// One index range into an axis's native parameter array.
#[derive(Debug, Clone, Default)]
pub struct IdxSelector {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub step: Option<i64>,
    pub is_range: bool,
    pub is_all: bool,
}

/// How a request selects along one named axis.
#[derive(Debug, Clone, Default)]
pub struct AxisSelector {
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub in_values: Vec<f64>,
    /// 0 = ascending, 1 = descending.
    pub order: i32,
    /// 1 = collapse into one output band, 0 = one band per value.
    pub aggregate: i32,
    pub idx_selectors: Vec<IdxSelector>,
}

/// A tile request as produced by the OWS front-end.
#[derive(Debug, Clone, Default)]
pub struct TileRequest {
    pub config: ConfigPayload,
    pub collection: String,
    pub crs: String,
    pub bbox: BoundingBox,
    pub orig_bbox: Option<BoundingBox>,
    pub width: usize,
    pub height: usize,
    pub off_x: usize,
    pub off_y: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub axes: HashMap<String, AxisSelector>,
    /// GeoJSON feature used to clip the rendered tile.
    pub clip_feature: Option<Arc<serde_json::Value>>,
}

impl TileRequest {
    pub fn new(
        collection: impl Into<String>,
        crs: impl Into<String>,
        bbox: BoundingBox,
        width: usize,
        height: usize,
    ) -> Self {
        Self {
            collection: collection.into(),
            crs: crs.into(),
            bbox,
            width,
            height,
            ..Default::default()
        }
    }
}

/// A granule resolved by the indexer, ready for dispatch to a worker.
#[derive(Debug, Clone)]
pub struct TileGranule {
    pub config: ConfigPayload,
    pub raw_path: String,
    pub path: String,
    pub crs: String,
    pub src_srs: String,
    pub src_geo_transform: Vec<f64>,
    pub bbox: BoundingBox,
    pub width: usize,
    pub height: usize,
    pub off_x: usize,
    pub off_y: usize,
    /// Output namespace, possibly suffixed with axis coordinates.
    pub name_space: String,
    /// The dataset namespace the output namespace derives from.
    pub var_name_space: String,
    pub time_stamp: f64,
    pub band_idx: i64,
    pub polygon: String,
    pub raster_type: String,
    pub geo_location: Option<GeoLocInfo>,
    pub clip_feature: Option<Arc<serde_json::Value>>,
}

impl TileGranule {
    /// The empty-tile sentinel: a data-less placeholder that keeps
    /// downstream stages completing deterministically.
    pub fn empty_tile(req: &TileRequest) -> Self {
        let config = ConfigPayload {
            name_spaces: vec![EMPTY_TILE_NS.to_string()],
            scale_params: req.config.scale_params,
            palette: req.config.palette.clone(),
            ..Default::default()
        };
        Self {
            config,
            raw_path: String::new(),
            path: NULL_PATH.to_string(),
            crs: req.crs.clone(),
            src_srs: String::new(),
            src_geo_transform: Vec::new(),
            bbox: req.bbox,
            width: req.width,
            height: req.height,
            off_x: req.off_x,
            off_y: req.off_y,
            name_space: EMPTY_TILE_NS.to_string(),
            var_name_space: EMPTY_TILE_NS.to_string(),
            time_stamp: 0.0,
            band_idx: 1,
            polygon: String::new(),
            raster_type: "Byte".to_string(),
            geo_location: None,
            clip_feature: None,
        }
    }

    /// True for placeholder granules that carry no source data.
    pub fn is_sentinel(&self) -> bool {
        self.path == NULL_PATH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tile_sentinel() {
        let req = TileRequest::new("", "EPSG:3857", BoundingBox::new(0.0, 0.0, 1.0, 1.0), 256, 256);
        let gran = TileGranule::empty_tile(&req);
        assert_eq!(gran.path, "NULL");
        assert_eq!(gran.name_space, EMPTY_TILE_NS);
        assert_eq!(gran.raster_type, "Byte");
        assert_eq!((gran.width, gran.height), (256, 256));
        assert!(gran.is_sentinel());
        assert_eq!(gran.config.name_spaces, vec![EMPTY_TILE_NS]);
    }

    #[test]
    fn test_config_from_layer_defaults() {
        let layer = Layer {
            name: "l".to_string(),
            data_source: "/g/data".to_string(),
            namespaces: vec!["B4".to_string()],
            ..Default::default()
        };
        let config = ConfigPayload::from_layer(&layer);
        assert_eq!(config.polygon_segments, DEFAULT_WMS_POLYGON_SEGMENTS);
        assert_eq!(config.grpc_conc_limit, DEFAULT_GRPC_CONC_PER_NODE);
        assert_eq!(config.name_spaces, vec!["B4"]);
    }
}
