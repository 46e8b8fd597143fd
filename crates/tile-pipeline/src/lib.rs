//! Request-to-tile engine.
//!
//! Given a tile request over a temporal and multi-dimensional window,
//! this crate discovers the relevant raster granules through the
//! metadata index, fans them out to remote warp workers, merges the
//! per-band results with deterministic ordering, and runs band-math,
//! scaling and palette rendering over the merged planes.
//!
//! The stages form a directed pipeline connected by bounded queues:
//!
//! ```text
//! normalizer -> indexer -> dispatcher -> merger -> band math -> scaler -> palette
//! ```
//!
//! Each stage is a task that closes its output when its input closes;
//! a per-request [`context::RequestContext`] carries cancellation and
//! the first-error-wins sink.

pub mod bandmath;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod indexer;
pub mod limiter;
pub mod mas;
pub mod merger;
pub mod normalizer;
pub mod palette;
pub mod pipeline;
pub mod raster;
pub mod scaler;
pub mod selection;
pub mod types;
pub mod warp_client;

pub use context::RequestContext;
pub use error::{PipelineError, PipelineResult};
pub use palette::RgbaRaster;
pub use pipeline::TilePipeline;
pub use raster::{FlexRaster, RasterType, TypedPlane, TypedRaster};
pub use types::{AxisSelector, ConfigPayload, IdxSelector, TileGranule, TileRequest, EMPTY_TILE_NS};
pub use warp_client::{GrpcWarpPool, WarpTransport};
