//! Granule dispatcher: fans resolved granules out to warp workers.
//!
//! Worker failures never poison the pipeline: each failed granule
//! degrades into an all-no-data placeholder so the merger still
//! completes with a deterministic band set.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinSet;
use tracing::debug;

use crate::context::RequestContext;
use crate::error::PipelineError;
use crate::limiter::ConcLimiter;
use crate::raster::FlexRaster;
use crate::types::TileGranule;
use crate::warp_client::{self, WarpTransport};

type SharedGeomMask = Arc<OnceCell<Option<Arc<Vec<i32>>>>>;

pub struct GranuleDispatcher {
    transport: Arc<dyn WarpTransport>,
    ctx: RequestContext,
    /// Deadline for one worker round trip.
    granule_timeout: Duration,
}

impl GranuleDispatcher {
    pub fn new(
        transport: Arc<dyn WarpTransport>,
        ctx: RequestContext,
        granule_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            ctx,
            granule_timeout,
        }
    }

    pub async fn run(self, mut input: mpsc::Receiver<TileGranule>, out: mpsc::Sender<FlexRaster>) {
        // The clip geometry rasterizes identically for every granule of
        // the request, so the mask is fetched once and shared.
        let geom_mask: SharedGeomMask = Arc::new(OnceCell::new());
        let mut shard_limiter: Option<ConcLimiter> = None;
        let mut tasks = JoinSet::new();

        loop {
            let gran = tokio::select! {
                gran = input.recv() => match gran {
                    Some(gran) => gran,
                    None => break,
                },
                _ = self.ctx.cancelled() => break,
            };

            if self.ctx.check_cancellation() {
                break;
            }

            if gran.is_sentinel() {
                if out.send(warp_client::empty_flex(&gran)).await.is_err() {
                    break;
                }
                continue;
            }

            // Granules carrying a clip feature fan out across polygon
            // shards on the worker; cap how many are in flight at once.
            let shard_permit = if gran.clip_feature.is_some() {
                let limiter = shard_limiter.get_or_insert_with(|| {
                    ConcLimiter::new(gran.config.polygon_shard_conc_limit)
                });
                Some(limiter.acquire().await)
            } else {
                None
            };

            let transport = self.transport.clone();
            let ctx = self.ctx.clone();
            let out = out.clone();
            let geom_mask = geom_mask.clone();
            let timeout = self.granule_timeout;
            tasks.spawn(async move {
                let _shard_permit = shard_permit;
                process_granule(transport, ctx, gran, out, geom_mask, timeout).await;
            });
        }

        while tasks.join_next().await.is_some() {}
        debug!("granule dispatcher done");
    }
}

async fn fetch_geom_mask(
    transport: &Arc<dyn WarpTransport>,
    ctx: &RequestContext,
    gran: &TileGranule,
    feature: &serde_json::Value,
    timeout: Duration,
) -> Option<Arc<Vec<i32>>> {
    let request = warp_client::mask_request(gran, feature);
    match tokio::time::timeout(timeout, transport.warp(request)).await {
        Ok(Ok(result)) if result.is_ok() => result
            .raster
            .filter(|raster| !raster.mask.is_empty())
            .map(|raster| Arc::new(raster.mask)),
        Ok(Ok(result)) => {
            ctx.send_error(PipelineError::Worker(result.error));
            None
        }
        Ok(Err(err)) => {
            ctx.send_error(err);
            None
        }
        Err(_) => {
            ctx.send_error(PipelineError::Timeout);
            None
        }
    }
}

async fn process_granule(
    transport: Arc<dyn WarpTransport>,
    ctx: RequestContext,
    gran: TileGranule,
    out: mpsc::Sender<FlexRaster>,
    geom_mask: SharedGeomMask,
    timeout: Duration,
) {
    let mask = match &gran.clip_feature {
        Some(feature) => geom_mask
            .get_or_init(|| fetch_geom_mask(&transport, &ctx, &gran, feature, timeout))
            .await
            .clone(),
        None => None,
    };

    let request = warp_client::warp_request(&gran);
    let flex = match tokio::time::timeout(timeout, transport.warp(request)).await {
        Ok(Ok(result)) => {
            if let Some(metrics) = &result.metrics {
                ctx.metrics().add_worker(metrics);
            }
            if result.is_ok() {
                match warp_client::decode_result(&gran, result, mask) {
                    Ok(flex) => flex,
                    Err(err) => {
                        ctx.send_error(err);
                        warp_client::empty_flex(&gran)
                    }
                }
            } else {
                ctx.send_error(PipelineError::Worker(result.error));
                warp_client::empty_flex(&gran)
            }
        }
        Ok(Err(err)) => {
            ctx.send_error(err);
            warp_client::empty_flex(&gran)
        }
        Err(_) => {
            ctx.send_error(PipelineError::Timeout);
            warp_client::empty_flex(&gran)
        }
    };

    let _ = out.send(flex).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::RasterType;
    use crate::types::TileRequest;
    use async_trait::async_trait;
    use ows_common::BoundingBox;
    use warp_rpc::{Granule, RasterPayload, WarpResult};

    struct ConstWorker {
        value: f32,
    }

    #[async_trait]
    impl WarpTransport for ConstWorker {
        async fn warp(&self, request: Granule) -> crate::error::PipelineResult<WarpResult> {
            let pixels = (request.width * request.height) as usize;
            let mut data = Vec::with_capacity(pixels * 4);
            for _ in 0..pixels {
                data.extend_from_slice(&self.value.to_le_bytes());
            }
            Ok(WarpResult {
                raster: Some(RasterPayload {
                    data: data.into(),
                    no_data: -9999.0,
                    raster_type: "Float32".to_string(),
                    bbox: vec![0, 0, request.width, request.height],
                    mask: Vec::new(),
                }),
                error: "OK".to_string(),
                metrics: None,
            })
        }
    }

    struct FailingWorker;

    #[async_trait]
    impl WarpTransport for FailingWorker {
        async fn warp(&self, _request: Granule) -> crate::error::PipelineResult<WarpResult> {
            Ok(WarpResult {
                raster: None,
                error: "warp_operation() fail: 3".to_string(),
                metrics: None,
            })
        }
    }

    fn granule() -> TileGranule {
        let req = TileRequest::new(
            "/g/data/modis",
            "EPSG:3857",
            BoundingBox::new(0.0, 0.0, 8.0, 8.0),
            8,
            8,
        );
        let mut gran = TileGranule::empty_tile(&req);
        gran.path = "/g/data/modis/a.nc".to_string();
        gran.name_space = "B4".to_string();
        gran.raster_type = "Float32".to_string();
        gran
    }

    #[tokio::test]
    async fn test_dispatch_produces_warped_raster() {
        let ctx = RequestContext::new();
        let dispatcher = GranuleDispatcher::new(
            Arc::new(ConstWorker { value: 2.5 }),
            ctx.clone(),
            Duration::from_secs(5),
        );

        let (gran_tx, gran_rx) = mpsc::channel(8);
        let (flex_tx, mut flex_rx) = mpsc::channel(8);
        let task = tokio::spawn(dispatcher.run(gran_rx, flex_tx));

        gran_tx.send(granule()).await.unwrap();
        drop(gran_tx);

        let flex = flex_rx.recv().await.unwrap();
        assert_eq!(flex.raster_type, RasterType::Float32);
        assert_eq!(flex.data_width, 8);
        assert!(flex_rx.recv().await.is_none());
        task.await.unwrap();
        assert!(!ctx.has_error());
    }

    #[tokio::test]
    async fn test_worker_failure_degrades_to_placeholder() {
        let ctx = RequestContext::new();
        let dispatcher = GranuleDispatcher::new(
            Arc::new(FailingWorker),
            ctx.clone(),
            Duration::from_secs(5),
        );

        let (gran_tx, gran_rx) = mpsc::channel(8);
        let (flex_tx, mut flex_rx) = mpsc::channel(8);
        let task = tokio::spawn(dispatcher.run(gran_rx, flex_tx));

        gran_tx.send(granule()).await.unwrap();
        drop(gran_tx);

        let flex = flex_rx.recv().await.unwrap();
        assert_eq!(flex.raster_type, RasterType::Byte);
        assert_eq!(flex.data_width, 0);
        task.await.unwrap();

        let err = ctx.take_error().unwrap();
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_sentinel_bypasses_worker() {
        let ctx = RequestContext::new();
        let dispatcher = GranuleDispatcher::new(
            Arc::new(FailingWorker),
            ctx.clone(),
            Duration::from_secs(5),
        );

        let (gran_tx, gran_rx) = mpsc::channel(8);
        let (flex_tx, mut flex_rx) = mpsc::channel(8);
        let task = tokio::spawn(dispatcher.run(gran_rx, flex_tx));

        let req = TileRequest::new("", "EPSG:3857", BoundingBox::new(0.0, 0.0, 1.0, 1.0), 4, 4);
        gran_tx.send(TileGranule::empty_tile(&req)).await.unwrap();
        drop(gran_tx);

        let flex = flex_rx.recv().await.unwrap();
        assert_eq!(flex.name_space, crate::types::EMPTY_TILE_NS);
        task.await.unwrap();
        // the failing transport was never consulted
        assert!(ctx.take_error().is_none());
    }

    #[tokio::test]
    async fn test_worker_timeout_is_surfaced() {
        struct SlowWorker;

        #[async_trait]
        impl WarpTransport for SlowWorker {
            async fn warp(&self, _request: Granule) -> crate::error::PipelineResult<WarpResult> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!()
            }
        }

        let ctx = RequestContext::new();
        let dispatcher = GranuleDispatcher::new(
            Arc::new(SlowWorker),
            ctx.clone(),
            Duration::from_millis(20),
        );

        let (gran_tx, gran_rx) = mpsc::channel(8);
        let (flex_tx, mut flex_rx) = mpsc::channel(8);
        let task = tokio::spawn(dispatcher.run(gran_rx, flex_tx));

        gran_tx.send(granule()).await.unwrap();
        drop(gran_tx);

        let flex = flex_rx.recv().await.unwrap();
        assert_eq!(flex.data_width, 0);
        task.await.unwrap();

        assert!(matches!(ctx.take_error(), Some(PipelineError::Timeout)));
    }
}
