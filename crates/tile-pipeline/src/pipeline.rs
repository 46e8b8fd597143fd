//! Pipeline coordinator: wires the stages together for one request.
//!
//! Stages run as tasks connected by bounded channels; back-pressure from
//! a slow consumer blocks producers, keeping memory bounded. A single
//! context per request carries the cancellation signal, the error sink
//! and metrics.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

use band_math::check_complexity;
use ows_common::config::DEFAULT_WMS_TIMEOUT_SECS;

use crate::context::RequestContext;
use crate::dispatcher::GranuleDispatcher;
use crate::error::{PipelineError, PipelineResult};
use crate::indexer::TileIndexer;
use crate::mas::{MasClient, SharedMasClient};
use crate::merger::TileMerger;
use crate::normalizer::{normalize, Normalized};
use crate::palette::{apply_palette, RgbaRaster};
use crate::raster::TypedRaster;
use crate::types::{TileGranule, TileRequest};
use crate::warp_client::{GrpcWarpPool, WarpTransport};
use crate::{bandmath, scaler};

/// Capacity of the normalizer-to-indexer queue.
pub const QUERY_QUEUE_CAPACITY: usize = 100;
/// Capacity of the indexer-to-merger queues.
pub const GRANULE_QUEUE_CAPACITY: usize = 8192;

/// The request-to-tile engine.
pub struct TilePipeline {
    mas_address: String,
    mas: SharedMasClient,
    transport: Arc<dyn WarpTransport>,
}

impl TilePipeline {
    pub fn new(
        mas_address: impl Into<String>,
        mas: SharedMasClient,
        transport: Arc<dyn WarpTransport>,
    ) -> Self {
        Self {
            mas_address: mas_address.into(),
            mas,
            transport,
        }
    }

    /// Wire up a pipeline against live gRPC workers.
    pub fn connect(
        mas_address: impl Into<String>,
        worker_nodes: &[String],
        grpc_conc_per_node: usize,
        max_recv_msg_size: usize,
    ) -> PipelineResult<Self> {
        let pool = GrpcWarpPool::connect_lazy(worker_nodes, grpc_conc_per_node, max_recv_msg_size)?;
        Ok(Self::new(
            mas_address,
            Arc::new(MasClient::new()?),
            Arc::new(pool),
        ))
    }

    /// Default per-request deadline.
    pub fn default_deadline() -> Duration {
        Duration::from_secs(DEFAULT_WMS_TIMEOUT_SECS)
    }

    /// Render a request into an RGBA tile.
    ///
    /// On partial (granule-level) failure the tile still renders with
    /// the missing granules as the no-data colour and the first error
    /// logged; validation and fatal errors fail the request.
    pub async fn render(
        &self,
        req: TileRequest,
        deadline: Duration,
    ) -> PipelineResult<RgbaRaster> {
        let palette = req
            .config
            .palette
            .clone()
            .ok_or_else(|| PipelineError::Validation("no palette configured".to_string()))?;
        let scale_params = req.config.scale_params;

        let bands = self.bands(req, deadline).await?;
        let scaled = scaler::scale(&bands, &scale_params)?;
        apply_palette(&scaled, &palette)
    }

    /// Produce the raw (non-rendered) typed rasters of a request, for
    /// coverage extracts.
    pub async fn extract(
        &self,
        req: TileRequest,
        deadline: Duration,
    ) -> PipelineResult<Vec<TypedRaster>> {
        self.bands(req, deadline).await
    }

    async fn bands(
        &self,
        mut req: TileRequest,
        deadline: Duration,
    ) -> PipelineResult<Vec<TypedRaster>> {
        // Complexity limits are enforced before any work is scheduled.
        if let (Some(expr), Some(criteria)) = (&req.config.band_expr, &req.config.band_criteria)
        {
            check_complexity(expr, criteria)?;
        }

        let ctx = RequestContext::new();
        let normalized = normalize(&mut req, &self.mas_address)?;

        let width = req.width;
        let height = req.height;
        let band_expr = req.config.band_expr.clone();

        let (gran_tx, gran_rx) = mpsc::channel(GRANULE_QUEUE_CAPACITY);
        let (flex_tx, flex_rx) = mpsc::channel(GRANULE_QUEUE_CAPACITY);

        let dispatcher =
            GranuleDispatcher::new(self.transport.clone(), ctx.clone(), deadline);
        tokio::spawn(dispatcher.run(gran_rx, flex_tx));

        let merger = TileMerger::new(ctx.clone());
        let merger_task = tokio::spawn(merger.run(flex_rx, width, height));

        match normalized {
            Normalized::EmptyTile => {
                let sentinel = TileGranule::empty_tile(&req);
                let _ = gran_tx.send(sentinel).await;
                drop(gran_tx);
            }
            Normalized::Queries(queries) => {
                let (query_tx, query_rx) = mpsc::channel(QUERY_QUEUE_CAPACITY);
                let indexer = TileIndexer::new(self.mas.clone(), ctx.clone());
                tokio::spawn(indexer.run(Arc::new(req), query_rx, gran_tx));

                // Feed queries from a task of their own; an indexer that
                // aborts early drops its receiver and unblocks the feeder.
                tokio::spawn(async move {
                    for query in queries {
                        if query_tx.send(query).await.is_err() {
                            break;
                        }
                    }
                });
            }
        }

        let bands = match tokio::time::timeout(deadline, merger_task).await {
            Ok(joined) => {
                joined.map_err(|e| PipelineError::Internal(format!("merger task failed: {e}")))?
            }
            Err(_) => {
                ctx.cancel();
                return Err(PipelineError::Timeout);
            }
        };

        if let Some(err) = ctx.take_error() {
            if err.is_fatal() {
                return Err(err);
            }
            warn!(error = %err, "partial tile: granule-level failure");
        }

        match band_expr {
            Some(expr) => bandmath::apply_band_math(bands, &expr),
            None => Ok(bands),
        }
    }
}
