//! Pipeline error type and failure classification.

use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors raised along the request-to-tile pipeline.
///
/// Failures fall into the classes of the error handling design:
/// transient errors degrade into empty-tile placeholders, everything
/// else fails the request.
#[derive(Debug, Error)]
pub enum PipelineError {
    // === Transient: the tile still renders, minus some granules ===
    #[error("metadata index error: {0}")]
    Metadata(String),

    #[error("warp worker error: {0}")]
    Worker(String),

    // === Validation: user-visible request failures ===
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("selection error: {0}")]
    Selection(String),

    #[error(transparent)]
    BandMath(#[from] band_math::BandMathError),

    #[error(transparent)]
    Ows(#[from] ows_common::OwsError),

    // === Cancellation ===
    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    Timeout,

    // === Fatal ===
    #[error("internal pipeline error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// True when this error must fail the whole request; transient
    /// granule-level failures render as no-data instead.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::Metadata(_) | PipelineError::Worker(_))
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Metadata(err.to_string())
    }
}
