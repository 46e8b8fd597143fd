//! Error types for the tile services.

use thiserror::Error;

/// Result type alias using OwsError.
pub type OwsResult<T> = Result<T, OwsError>;

/// Primary error type for OWS-facing operations.
#[derive(Debug, Error)]
pub enum OwsError {
    // === Request validation ===
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    #[error("Invalid CRS: {0}")]
    InvalidCrs(String),

    #[error("Invalid BBOX: {0}")]
    InvalidBbox(String),

    #[error("Invalid time specification: {0}")]
    InvalidTime(String),

    // === Data access ===
    #[error("Data not available: {0}")]
    DataNotAvailable(String),

    #[error("Metadata index error: {0}")]
    IndexError(String),

    #[error("Projection error: {0}")]
    ProjectionError(String),

    // === Infrastructure ===
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,
}

impl OwsError {
    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            OwsError::MissingParameter(_)
            | OwsError::InvalidParameter { .. }
            | OwsError::InvalidCrs(_)
            | OwsError::InvalidBbox(_)
            | OwsError::InvalidTime(_) => 400,

            OwsError::LayerNotFound(_) | OwsError::DataNotAvailable(_) => 404,

            OwsError::ServiceUnavailable(_) => 503,
            OwsError::Timeout => 504,
            OwsError::Cancelled => 499,

            _ => 500,
        }
    }
}

impl From<std::io::Error> for OwsError {
    fn from(err: std::io::Error) -> Self {
        OwsError::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for OwsError {
    fn from(err: serde_json::Error) -> Self {
        OwsError::InternalError(format!("JSON error: {err}"))
    }
}
