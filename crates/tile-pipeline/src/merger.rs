//! Merger: folds warped rasters into ordered output bands.
//!
//! Rasters are grouped by output namespace; every group folds into one
//! canvas as the per-pixel mean of its valid samples (granules usually
//! cover disjoint parts of the tile, so the mean also composites spatial
//! mosaics). The output band order follows the namespace list the
//! indexer sorted by timestamp, making the band sequence deterministic
//! regardless of worker completion order.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::error::PipelineError;
use crate::raster::{FlexRaster, RasterType, TypedRaster};
use crate::types::EMPTY_TILE_NS;

struct BandGroup {
    raster_type: RasterType,
    width: usize,
    height: usize,
    no_data: f64,
    sum: Vec<f32>,
    count: Vec<u32>,
}

impl BandGroup {
    fn new(flex: &FlexRaster) -> Self {
        Self {
            raster_type: flex.raster_type,
            width: flex.width,
            height: flex.height,
            no_data: flex.no_data,
            sum: vec![0.0; flex.width * flex.height],
            count: vec![0; flex.width * flex.height],
        }
    }

    fn matches(&self, flex: &FlexRaster) -> bool {
        self.raster_type == flex.raster_type
            && self.width == flex.width
            && self.height == flex.height
    }

    fn fold(&mut self, samples: &[f32]) {
        for (i, &v) in samples.iter().enumerate() {
            if !v.is_nan() {
                self.sum[i] += v;
                self.count[i] += 1;
            }
        }
    }

    /// Mean of the accumulated samples; pixels with no valid sample (or
    /// masked out by the clip mask) are no-data.
    fn finish(self, name_space: &str, clip_mask: Option<&[i32]>) -> TypedRaster {
        let mut samples: Vec<f32> = self
            .sum
            .iter()
            .zip(&self.count)
            .map(|(&sum, &count)| {
                if count > 0 {
                    sum / count as f32
                } else {
                    f32::NAN
                }
            })
            .collect();

        if let Some(mask) = clip_mask {
            if mask.len() == samples.len() {
                for (v, &m) in samples.iter_mut().zip(mask) {
                    if m == 0 {
                        *v = f32::NAN;
                    }
                }
            } else {
                warn!(
                    mask_len = mask.len(),
                    plane_len = samples.len(),
                    "clip mask dimensions mismatch, skipping"
                );
            }
        }

        TypedRaster::from_f32(
            self.raster_type,
            name_space,
            &samples,
            self.width,
            self.height,
            self.no_data,
        )
    }
}

/// The merger stage: buffers per-group until the upstream closes.
pub struct TileMerger {
    ctx: RequestContext,
}

impl TileMerger {
    pub fn new(ctx: RequestContext) -> Self {
        Self { ctx }
    }

    /// Consume warped rasters until EOF (or cancellation, which reads as
    /// EOF) and emit the ordered band list. `width`/`height` size the
    /// placeholder bands of namespaces that produced no raster.
    pub async fn run(
        self,
        mut input: mpsc::Receiver<FlexRaster>,
        width: usize,
        height: usize,
    ) -> Vec<TypedRaster> {
        let mut ordered_names: Vec<String> = Vec::new();
        let mut groups: HashMap<String, BandGroup> = HashMap::new();
        let mut clip_mask: Option<Arc<Vec<i32>>> = None;

        loop {
            let flex = tokio::select! {
                flex = input.recv() => match flex {
                    Some(flex) => flex,
                    None => break,
                },
                _ = self.ctx.cancelled() => break,
            };

            for ns in &flex.config.name_spaces {
                if ns != EMPTY_TILE_NS && !ordered_names.contains(ns) {
                    ordered_names.push(ns.clone());
                }
            }

            if flex.geom_mask.is_some() {
                clip_mask = flex.geom_mask.clone();
            }

            if flex.name_space == EMPTY_TILE_NS {
                continue;
            }

            let canvas = match flex.to_canvas() {
                Ok(canvas) => canvas,
                Err(err) => {
                    self.ctx.send_error(err);
                    continue;
                }
            };

            let group = groups
                .entry(flex.name_space.clone())
                .or_insert_with(|| BandGroup::new(&flex));
            if !group.matches(&flex) {
                self.ctx.send_error(PipelineError::Worker(format!(
                    "inconsistent rasters for band {}: {}x{} {:?} vs {}x{} {:?}",
                    flex.name_space,
                    group.width,
                    group.height,
                    group.raster_type,
                    flex.width,
                    flex.height,
                    flex.raster_type,
                )));
                continue;
            }
            group.fold(&canvas.samples_f32());
        }

        let mask = clip_mask.as_ref().map(|m| m.as_slice());
        let mut outputs: Vec<TypedRaster> = Vec::with_capacity(ordered_names.len());
        for ns in &ordered_names {
            match groups.remove(ns) {
                Some(group) => outputs.push(group.finish(ns, mask)),
                // a namespace the indexer promised but no worker delivered
                None => outputs.push(TypedRaster::empty_byte(ns.clone(), width, height)),
            }
        }

        if outputs.is_empty() {
            outputs.push(TypedRaster::empty_byte(EMPTY_TILE_NS, width, height));
        }

        debug!(bands = outputs.len(), "merge complete");
        outputs
    }
}
