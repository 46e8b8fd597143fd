//! Warp worker client: RPC mapping and the worker transport.
//!
//! Granules are translated into the worker RPC contract and results are
//! decoded back into [`FlexRaster`]s. The gRPC transport keeps one
//! long-lived channel per worker node, hands requests out round-robin
//! and bounds per-node in-flight calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tonic::transport::Channel;

use warp_rpc::{Granule, WarpResult, WarperClient};

use crate::error::{PipelineError, PipelineResult};
use crate::limiter::ConcLimiter;
use crate::mas::GeoLocInfo;
use crate::raster::{FlexRaster, RasterType};
use crate::types::{TileGranule, EMPTY_TILE_NS};

/// Abstraction over the worker RPC so the dispatcher can run against
/// stub workers in tests.
#[async_trait]
pub trait WarpTransport: Send + Sync {
    async fn warp(&self, request: Granule) -> PipelineResult<WarpResult>;
}

/// GDAL geolocation-array options for curvilinear sources.
fn geo_loc_options(info: &GeoLocInfo) -> Vec<String> {
    vec![
        format!("X_DATASET={}", info.x_ds_name),
        format!("X_BAND={}", info.x_band),
        format!("Y_DATASET={}", info.y_ds_name),
        format!("Y_BAND={}", info.y_band),
        format!("LINE_OFFSET={}", info.line_offset),
        format!("PIXEL_OFFSET={}", info.pixel_offset),
        format!("LINE_STEP={}", info.line_step),
        format!("PIXEL_STEP={}", info.pixel_step),
    ]
}

/// Build the warp request for a granule.
pub fn warp_request(gran: &TileGranule) -> Granule {
    Granule {
        path: gran.path.clone(),
        src_srs: gran.src_srs.clone(),
        src_geot: gran.src_geo_transform.clone(),
        geo_loc_opts: gran
            .geo_location
            .as_ref()
            .map(geo_loc_options)
            .unwrap_or_default(),
        dst_srs: gran.crs.clone(),
        dst_geot: gran.bbox.to_geotransform(gran.width, gran.height).to_vec(),
        width: gran.width as i32,
        height: gran.height as i32,
        bands: vec![gran.band_idx as i32],
        srs_cf: gran.config.srs_cf,
        geometry: String::new(),
    }
}

/// Build the geometry-mask request for a granule's clip feature.
pub fn mask_request(gran: &TileGranule, feature: &serde_json::Value) -> Granule {
    Granule {
        geometry: feature.to_string(),
        ..warp_request(gran)
    }
}

/// An all-no-data placeholder for a granule whose warp failed (or for
/// the empty-tile sentinel).
///
/// The placeholder carries the sentinel namespace so the merger never
/// folds it into a real band group; the granule's namespace list still
/// rides along for band ordering.
pub fn empty_flex(gran: &TileGranule) -> FlexRaster {
    FlexRaster {
        config: gran.config.clone(),
        data: bytes::Bytes::new(),
        data_width: 0,
        data_height: 0,
        width: gran.width,
        height: gran.height,
        off_x: 0,
        off_y: 0,
        raster_type: RasterType::Byte,
        no_data: 255.0,
        name_space: EMPTY_TILE_NS.to_string(),
        var_name_space: gran.var_name_space.clone(),
        time_stamp: gran.time_stamp,
        geom_mask: None,
    }
}

/// Decode a successful worker reply into a [`FlexRaster`].
pub fn decode_result(
    gran: &TileGranule,
    result: WarpResult,
    geom_mask: Option<Arc<Vec<i32>>>,
) -> PipelineResult<FlexRaster> {
    let raster = result
        .raster
        .ok_or_else(|| PipelineError::Worker("worker reply carries no raster".to_string()))?;

    let raster_type = RasterType::from_tag(&raster.raster_type).ok_or_else(|| {
        PipelineError::Worker(format!(
            "unsupported raster type '{}' for {}",
            raster.raster_type, gran.path
        ))
    })?;

    if raster.bbox.len() != 4 || raster.bbox.iter().any(|&v| v < 0) {
        return Err(PipelineError::Worker(format!(
            "invalid destination bbox {:?} for {}",
            raster.bbox, gran.path
        )));
    }

    Ok(FlexRaster {
        config: gran.config.clone(),
        data: raster.data,
        data_width: raster.bbox[2] as usize,
        data_height: raster.bbox[3] as usize,
        width: gran.width,
        height: gran.height,
        off_x: raster.bbox[0] as usize,
        off_y: raster.bbox[1] as usize,
        raster_type,
        no_data: raster.no_data,
        name_space: gran.name_space.clone(),
        var_name_space: gran.var_name_space.clone(),
        time_stamp: gran.time_stamp,
        geom_mask,
    })
}

struct WorkerNode {
    client: WarperClient<Channel>,
    limiter: ConcLimiter,
}

/// Round-robin pool of gRPC worker connections.
pub struct GrpcWarpPool {
    nodes: Vec<WorkerNode>,
    next: AtomicUsize,
}

impl GrpcWarpPool {
    /// Set up lazily-connected channels to the given worker addresses.
    pub fn connect_lazy(
        addresses: &[String],
        conc_per_node: usize,
        max_recv_msg_size: usize,
    ) -> PipelineResult<Self> {
        if addresses.is_empty() {
            return Err(PipelineError::Internal(
                "no worker nodes configured".to_string(),
            ));
        }

        let mut nodes = Vec::with_capacity(addresses.len());
        for addr in addresses {
            let endpoint = Channel::from_shared(format!("http://{addr}"))
                .map_err(|e| PipelineError::Internal(format!("bad worker address {addr}: {e}")))?;
            let client = WarperClient::new(endpoint.connect_lazy())
                .max_decoding_message_size(max_recv_msg_size);
            nodes.push(WorkerNode {
                client,
                limiter: ConcLimiter::new(conc_per_node),
            });
        }

        Ok(Self {
            nodes,
            next: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl WarpTransport for GrpcWarpPool {
    async fn warp(&self, request: Granule) -> PipelineResult<WarpResult> {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.nodes.len();
        let node = &self.nodes[i];

        let _permit = node.limiter.acquire().await;
        let mut client = node.client.clone();
        let response = client
            .warp(request)
            .await
            .map_err(|status| PipelineError::Worker(status.message().to_string()))?;
        Ok(response.into_inner())
    }
}
