//! Generated gRPC bindings for the warp worker contract.
//!
//! The coordinator only ever acts as a client; the native GDAL-backed
//! worker implements the server side of this contract out of tree.

pub mod warprpc {
    tonic::include_proto!("warprpc");
}

pub use warprpc::warper_client::WarperClient;
pub use warprpc::warper_server::{Warper, WarperServer};
pub use warprpc::{Granule, RasterPayload, WarpResult, WorkerMetrics};

/// Error string a worker reports on success.
pub const WORKER_OK: &str = "OK";

impl WarpResult {
    /// True when the worker reported success for this granule.
    pub fn is_ok(&self) -> bool {
        self.error == WORKER_OK
    }
}
