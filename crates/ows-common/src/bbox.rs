//! Bounding box types and operations.

use serde::{Deserialize, Serialize};

use crate::error::OwsError;

/// A geographic or projected bounding box.
///
/// For geographic CRS (EPSG:4326), coordinates are in degrees.
/// For projected CRS (EPSG:3857, etc.), coordinates are in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Parse an OWS BBOX parameter string: "minx,miny,maxx,maxy"
    pub fn from_ows_string(s: &str) -> Result<Self, OwsError> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 4 {
            return Err(OwsError::InvalidBbox(s.to_string()));
        }

        let mut vals = [0.0f64; 4];
        for (i, p) in parts.iter().enumerate() {
            vals[i] = p
                .trim()
                .parse()
                .map_err(|_| OwsError::InvalidBbox(s.to_string()))?;
        }

        Ok(Self::new(vals[0], vals[1], vals[2], vals[3]))
    }

    /// Width of the bounding box in coordinate units.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the bounding box in coordinate units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// True when the box has no area (degenerate or inverted corners).
    pub fn is_empty(&self) -> bool {
        self.max_x < self.min_x || self.max_y < self.min_y
    }

    /// Check if this bbox intersects another.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Compute the intersection of two bounding boxes.
    ///
    /// Returns an inverted (empty) box when the inputs are disjoint;
    /// callers check [`is_empty`](Self::is_empty).
    pub fn clamped_to(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        }
    }

    /// Format as a closed WKT polygon ring, counter-clockwise from the
    /// lower-left corner. This is the geometry sent to the metadata index
    /// for `intersects` queries.
    pub fn to_wkt(&self) -> String {
        format!(
            "POLYGON (({:.6} {:.6}, {:.6} {:.6}, {:.6} {:.6}, {:.6} {:.6}, {:.6} {:.6}))",
            self.min_x,
            self.min_y,
            self.max_x,
            self.min_y,
            self.max_x,
            self.max_y,
            self.min_x,
            self.max_y,
            self.min_x,
            self.min_y,
        )
    }

    /// Derive the six-element geotransform of a north-up pixel grid of
    /// `width` x `height` covering this box.
    pub fn to_geotransform(&self, width: usize, height: usize) -> [f64; 6] {
        [
            self.min_x,
            (self.max_x - self.min_x) / width as f64,
            0.0,
            self.max_y,
            0.0,
            (self.min_y - self.max_y) / height as f64,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ows_bbox() {
        let bbox = BoundingBox::from_ows_string("-125.0,24.0,-66.0,50.0").unwrap();
        assert_eq!(bbox.min_x, -125.0);
        assert_eq!(bbox.min_y, 24.0);
        assert_eq!(bbox.max_x, -66.0);
        assert_eq!(bbox.max_y, 50.0);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(BoundingBox::from_ows_string("1,2,3").is_err());
        assert!(BoundingBox::from_ows_string("a,b,c,d").is_err());
    }

    #[test]
    fn test_clamp_disjoint_is_empty() {
        let extent = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let req = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert!(req.clamped_to(&extent).is_empty());
    }

    #[test]
    fn test_clamp_overlapping() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 15.0, 15.0);
        let c = a.clamped_to(&b);
        assert_eq!(c, BoundingBox::new(5.0, 5.0, 10.0, 10.0));
        assert!(!c.is_empty());
    }

    #[test]
    fn test_wkt_ring_is_closed() {
        let wkt = BoundingBox::new(0.0, 0.0, 1.0, 1.0).to_wkt();
        assert!(wkt.starts_with("POLYGON (("));
        assert!(wkt.contains("0.000000 0.000000, 1.000000 0.000000"));
        // first and last vertex coincide
        let inner = wkt
            .trim_start_matches("POLYGON ((")
            .trim_end_matches("))");
        let verts: Vec<&str> = inner.split(", ").collect();
        assert_eq!(verts.first(), verts.last());
    }

    #[test]
    fn test_geotransform() {
        let geot = BoundingBox::new(0.0, -10.0, 20.0, 0.0).to_geotransform(100, 50);
        assert_eq!(geot[0], 0.0);
        assert_eq!(geot[1], 0.2);
        assert_eq!(geot[3], 0.0);
        assert_eq!(geot[5], -0.2);
    }
}
