//! Web Mercator (EPSG:3857) conversions.
//!
//! The coordinator never reprojects raster data; these conversions exist
//! only so spatial-extent clamping and index-query tiling can operate in a
//! single canonical CRS regardless of the request CRS.

use std::f64::consts::PI;

use crate::bbox::BoundingBox;
use crate::error::{OwsError, OwsResult};

const R_MAJOR: f64 = 6378137.0;
/// Latitude bound beyond which the Mercator projection diverges.
const MAX_LAT: f64 = 85.051_128_779_806_59;

/// Longitude, latitude (degrees) to Web Mercator meters.
pub fn lon_lat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let clamped_lat = lat.clamp(-MAX_LAT, MAX_LAT);

    let x = lon * R_MAJOR * PI / 180.0;
    let lat_rad = clamped_lat * PI / 180.0;
    let y = R_MAJOR * ((PI / 4.0 + lat_rad / 2.0).tan().ln());
    (x, y)
}

/// Web Mercator meters to longitude, latitude (degrees).
pub fn mercator_to_lon_lat(x: f64, y: f64) -> (f64, f64) {
    let lon = x / (R_MAJOR * PI / 180.0);
    let lat_rad = 2.0 * ((y / R_MAJOR).exp().atan()) - PI / 2.0;
    let lat = lat_rad * 180.0 / PI;
    (lon, lat)
}

/// Express `bbox` (given in `crs`) in canonical EPSG:3857 coordinates.
///
/// Only the geographic and canonical CRS are handled here; any other CRS
/// is an error and callers fall back to an untiled index query.
pub fn canonical_bbox(crs: &str, bbox: &BoundingBox) -> OwsResult<BoundingBox> {
    let crs = crs.trim().to_ascii_uppercase();
    match crs.as_str() {
        "EPSG:3857" => Ok(*bbox),
        "EPSG:4326" | "CRS:84" => {
            let (min_x, min_y) = lon_lat_to_mercator(bbox.min_x, bbox.min_y);
            let (max_x, max_y) = lon_lat_to_mercator(bbox.max_x, bbox.max_y);
            Ok(BoundingBox::new(min_x, min_y, max_x, max_y))
        }
        other => Err(OwsError::ProjectionError(format!(
            "no canonical transform for {other}"
        ))),
    }
}

/// Request resolution: the coarser of the per-axis pixel sizes.
pub fn pixel_resolution(bbox: &BoundingBox, width: usize, height: usize) -> f64 {
    let x_res = bbox.width() / width as f64;
    let y_res = bbox.height() / height as f64;
    x_res.max(y_res)
}
