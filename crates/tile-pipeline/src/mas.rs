//! Client for the metadata index service (MAS).
//!
//! The indexer's sole external dependency: an HTTP+JSON service that
//! resolves a collection, time window and geometry into GDAL dataset
//! descriptors.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::limiter::ConcLimiter;

/// Default cap on concurrent index queries.
pub const DEFAULT_MAS_CONC_QUERY: usize = 32;
const DEFAULT_MAS_MAX_CONNS_PER_HOST: usize = 256;

/// One multi-dimensional axis of a dataset, as described by the index.
///
/// The `intersection_*` fields are filled by the indexer while resolving
/// the request's selectors against this axis.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetAxis {
    pub name: String,
    #[serde(default)]
    pub params: Vec<f64>,
    #[serde(default)]
    pub strides: Vec<i64>,
    #[serde(default)]
    pub shape: Vec<i64>,
    #[serde(default)]
    pub grid: String,

    #[serde(skip)]
    pub intersection_idx: Vec<i64>,
    #[serde(skip)]
    pub intersection_values: Vec<f64>,
    #[serde(skip)]
    pub order: i32,
    #[serde(skip)]
    pub aggregate: i32,
}

impl DatasetAxis {
    /// The default time axis injected when a dataset reports no axes.
    pub fn default_time() -> Self {
        Self {
            name: "time".to_string(),
            strides: vec![1],
            grid: "default".to_string(),
            ..Default::default()
        }
    }

    /// First stride of the axis; axes without strides are contiguous.
    pub fn stride(&self) -> i64 {
        self.strides.first().copied().unwrap_or(1)
    }
}

/// Binding of geolocation arrays for curvilinear datasets.
#[derive(Debug, Clone, Deserialize)]
pub struct GeoLocInfo {
    #[serde(rename = "x_ds_name")]
    pub x_ds_name: String,
    #[serde(rename = "x_band", default)]
    pub x_band: i32,
    #[serde(rename = "y_ds_name")]
    pub y_ds_name: String,
    #[serde(rename = "y_band", default)]
    pub y_band: i32,
    #[serde(default)]
    pub line_offset: i32,
    #[serde(default)]
    pub pixel_offset: i32,
    #[serde(default)]
    pub line_step: i32,
    #[serde(default)]
    pub pixel_step: i32,
}

/// One dataset descriptor returned by an `intersects` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GdalDataset {
    #[serde(rename = "file_path")]
    pub raw_path: String,
    #[serde(rename = "ds_name")]
    pub ds_name: String,
    #[serde(rename = "namespace")]
    pub name_space: String,
    #[serde(rename = "array_type")]
    pub array_type: String,
    #[serde(default)]
    pub srs: String,
    #[serde(rename = "geo_transform", default)]
    pub geo_transform: Vec<f64>,
    #[serde(rename = "timestamps", default)]
    pub time_stamps: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub polygon: String,
    #[serde(default)]
    pub means: Vec<f64>,
    #[serde(default)]
    pub sample_counts: Vec<i64>,
    #[serde(default)]
    pub nodata: Option<f64>,
    #[serde(default)]
    pub axes: Vec<DatasetAxis>,
    #[serde(rename = "geo_loc", default)]
    pub geo_location: Option<GeoLocInfo>,

    #[serde(skip)]
    pub is_out_range: bool,
}

impl GdalDataset {
    pub fn no_data(&self) -> f64 {
        self.nodata.unwrap_or(0.0)
    }
}

/// Response body of an `intersects&metadata=gdal` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataResponse {
    #[serde(default)]
    pub error: String,
    #[serde(rename = "gdal", default)]
    pub gdal_datasets: Vec<GdalDataset>,
}

/// Response body of a `timestamps` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimestampsResponse {
    #[serde(default)]
    pub timestamps: Vec<String>,
    #[serde(default)]
    pub token: String,
}

/// Pooled HTTP client for the metadata index.
pub struct MasClient {
    http: reqwest::Client,
    permits: ConcLimiter,
}

impl MasClient {
    pub fn new() -> PipelineResult<Self> {
        Self::with_concurrency(DEFAULT_MAS_CONC_QUERY)
    }

    pub fn with_concurrency(conc: usize) -> PipelineResult<Self> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(DEFAULT_MAS_MAX_CONNS_PER_HOST)
            .timeout(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| PipelineError::Internal(format!("HTTP client setup failed: {e}")))?;

        Ok(Self {
            http,
            permits: ConcLimiter::new(conc),
        })
    }

    /// Issue one index query and decode the dataset descriptors.
    pub async fn fetch_metadata(&self, url: &str) -> PipelineResult<MetadataResponse> {
        let _permit = self.permits.acquire().await;
        debug!(url, "index query");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::Metadata(format!("GET request to {url} failed: {e}")))?;

        let body = response.bytes().await.map_err(|e| {
            PipelineError::Metadata(format!("error reading response body from {url}: {e}"))
        })?;

        serde_json::from_slice(&body).map_err(|e| {
            PipelineError::Metadata(format!("problem parsing JSON response from {url}: {e}"))
        })
    }

    /// Query the distinct timestamps of a collection.
    ///
    /// `token` is an opaque cache validator: when the service echoes the
    /// same token back, the caller's cached timestamps are still valid
    /// and the returned list is empty.
    pub async fn fetch_timestamps(
        &self,
        mas_address: &str,
        collection: &str,
        start: Option<&DateTime<Utc>>,
        end: Option<&DateTime<Utc>>,
        namespaces: &[String],
        token: &str,
    ) -> PipelineResult<TimestampsResponse> {
        let mut url = format!("http://{mas_address}{collection}?timestamps");
        if let Some(start) = start {
            url.push_str(&format!("&time={}", ows_common::time::format_iso(start)));
        }
        if let Some(end) = end {
            url.push_str(&format!("&until={}", ows_common::time::format_iso(end)));
        }
        if !namespaces.is_empty() {
            url.push_str(&format!("&namespace={}", namespaces.join(",")));
        }
        if !token.is_empty() {
            url.push_str(&format!("&token={token}"));
        }
        let url = url.replace(' ', "%20");

        let _permit = self.permits.acquire().await;
        debug!(url, "timestamps query");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::Metadata(format!("GET request to {url} failed: {e}")))?;

        response
            .json()
            .await
            .map_err(|e| PipelineError::Metadata(format!("invalid timestamps response: {e}")))
    }
}

/// Arc alias used by stages holding the shared client.
pub type SharedMasClient = Arc<MasClient>;

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "gdal": [
            {
                "file_path": "/g/data/v10/tile_x5_y-12.nc",
                "ds_name": "NETCDF:/g/data/v10/tile_x5_y-12.nc:band1",
                "namespace": "band1",
                "array_type": "Int16",
                "srs": "EPSG:4326",
                "geo_transform": [147.0, 0.00025, 0.0, -35.0, 0.0, -0.00025],
                "timestamps": ["2020-01-01T00:00:00.000Z", "2020-02-01T00:00:00.000Z"],
                "polygon": "POLYGON ((147 -36, 148 -36, 148 -35, 147 -35, 147 -36))",
                "nodata": -999,
                "axes": [
                    {"name": "time", "params": [], "strides": [1], "shape": [2], "grid": "default"},
                    {"name": "depth", "params": [0.5, 1.5, 2.5], "strides": [2], "shape": [3], "grid": "enum"}
                ]
            }
        ]
    }"#;

    #[test]
    fn test_decode_metadata_response() {
        let response: MetadataResponse = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(response.gdal_datasets.len(), 1);

        let ds = &response.gdal_datasets[0];
        assert_eq!(ds.name_space, "band1");
        assert_eq!(ds.array_type, "Int16");
        assert_eq!(ds.no_data(), -999.0);
        assert_eq!(ds.time_stamps.len(), 2);
        assert_eq!(ds.axes.len(), 2);
        assert_eq!(ds.axes[1].params, vec![0.5, 1.5, 2.5]);
        assert_eq!(ds.axes[1].stride(), 2);
    }

    #[test]
    fn test_null_nodata_defaults_to_zero() {
        let response: MetadataResponse = serde_json::from_str(
            r#"{"gdal":[{"file_path":"a","ds_name":"b","namespace":"ns","array_type":"Byte","nodata":null}]}"#,
        )
        .unwrap();
        assert_eq!(response.gdal_datasets[0].no_data(), 0.0);
    }

    #[test]
    fn test_error_only_response() {
        let response: MetadataResponse =
            serde_json::from_str(r#"{"error": "no such collection"}"#).unwrap();
        assert!(response.gdal_datasets.is_empty());
        assert_eq!(response.error, "no such collection");
    }

    #[test]
    fn test_decode_timestamps_response() {
        let response: TimestampsResponse = serde_json::from_str(
            r#"{"timestamps": ["2020-01-01T00:00:00.000Z"], "token": "abc123"}"#,
        )
        .unwrap();
        assert_eq!(response.timestamps.len(), 1);
        assert_eq!(response.token, "abc123");
    }
}
