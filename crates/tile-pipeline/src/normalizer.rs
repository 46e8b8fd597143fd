//! Request normalizer: projects a tile request into indexer queries.
//!
//! High-resolution requests over a constrained spatial extent are tiled
//! into sub-queries so no single index response grows unbounded; the
//! resulting URLs are shuffled to spread load across index shards.

use rand::seq::SliceRandom;
use tracing::debug;

use ows_common::mercator::{canonical_bbox, pixel_resolution};
use ows_common::time::{format_iso, from_epoch};
use ows_common::BoundingBox;

use crate::error::PipelineResult;
use crate::types::{TileRequest, EMPTY_TILE_NS};

/// Pixel edge of the canonical canvas the query tiling subdivides.
const CANONICAL_CANVAS: usize = 256;

/// One metadata query to issue.
#[derive(Debug, Clone)]
pub struct IndexerQuery {
    pub url: String,
    pub crs: String,
    pub is_mask: bool,
    pub is_empty_tile: bool,
}

/// Result of normalizing a request.
#[derive(Debug)]
pub enum Normalized {
    /// Nothing to index; emit the empty-tile sentinel and finish.
    EmptyTile,
    Queries(Vec<IndexerQuery>),
}

/// Compose the index query URL for one geometry.
fn indexer_url(
    req: &TileRequest,
    mas_address: &str,
    namespaces: &str,
    bbox_wkt: &str,
    crs: &str,
) -> String {
    let start = req
        .start_time
        .map(|t| format_iso(&t))
        .unwrap_or_else(|| format_iso(&from_epoch(0.0)));

    let mut url = format!(
        "http://{}{}?intersects&metadata=gdal&time={}",
        mas_address, req.collection, start
    );
    if let Some(end) = &req.end_time {
        url.push_str(&format!("&until={}", format_iso(end)));
    }
    url.push_str(&format!(
        "&srs={}&wkt={}&namespace={}&nseg={}&limit={}",
        crs, bbox_wkt, namespaces, req.config.polygon_segments, req.config.query_limit
    ));
    url.replace(' ', "%20")
}

/// Normalize a request into indexer queries.
///
/// Resolves the time window from the `time` axis selector, applies the
/// configured spatial-extent clamp in canonical EPSG:3857 coordinates,
/// tiles the query when the request resolution exceeds the index
/// resolution limit, and adds the mask-layer side query.
pub fn normalize(req: &mut TileRequest, mas_address: &str) -> PipelineResult<Normalized> {
    if req.collection.trim().is_empty() {
        return Ok(Normalized::EmptyTile);
    }

    if let Some(axis) = req.axes.get("time") {
        if !axis.in_values.is_empty() {
            let mut min_val = axis.in_values[0];
            let mut max_val = axis.in_values[0];
            for &val in &axis.in_values[1..] {
                if val < min_val {
                    min_val = val;
                } else if val > max_val {
                    max_val = val;
                }
            }

            req.start_time = Some(from_epoch(min_val));
            req.end_time = (max_val > min_val).then(|| from_epoch(max_val));
        } else {
            if let Some(start) = axis.start {
                req.start_time = Some(from_epoch(start));
            }
            if let Some(end) = axis.end {
                req.end_time = Some(from_epoch(end));
            }
        }
    }

    if req.config.name_spaces.is_empty() {
        req.config.name_spaces.push(String::new());
    }

    let is_empty_tile = req.config.name_spaces[0] == EMPTY_TILE_NS;
    let namespaces = if is_empty_tile {
        String::new()
    } else {
        req.config.name_spaces.join(",")
    };

    let bbox_wkt = if req.config.mas_query_hint != "non_spatial" {
        req.bbox.to_wkt()
    } else {
        String::new()
    };

    let url = indexer_url(req, mas_address, &namespaces, &bbox_wkt, &req.crs);

    let mut clipped: Option<BoundingBox> = None;
    if let Some(extent) = req.config.spatial_extent {
        match canonical_bbox(&req.crs, &req.bbox) {
            Ok(canonical) => {
                let clamped = canonical.clamped_to(&extent);
                if clamped.is_empty() {
                    debug!(bbox = ?clamped, "request outside configured spatial extent");
                    return Ok(Normalized::EmptyTile);
                }
                clipped = Some(clamped);
            }
            Err(err) => debug!(%err, "index sub-division unavailable"),
        }
    }

    let mut queries = Vec::new();
    let mut has_subdivision = false;

    if let Some(clipped) = clipped {
        let mut max_x_tile =
            (CANONICAL_CANVAS as f64 * req.config.index_tile_x_size) as usize;
        if max_x_tile == 0 {
            max_x_tile = CANONICAL_CANVAS;
        }
        let mut max_y_tile =
            (CANONICAL_CANVAS as f64 * req.config.index_tile_y_size) as usize;
        if max_y_tile == 0 {
            max_y_tile = CANONICAL_CANVAS;
        }

        let x_res = clipped.width() / CANONICAL_CANVAS as f64;
        let y_res = clipped.height() / CANONICAL_CANVAS as f64;
        let req_res = pixel_resolution(&clipped, CANONICAL_CANVAS, CANONICAL_CANVAS);

        if req.config.query_limit <= 0 && req_res > req.config.index_res_limit {
            has_subdivision = true;

            for y in (0..CANONICAL_CANVAS).step_by(max_y_tile) {
                for x in (0..CANONICAL_CANVAS).step_by(max_x_tile) {
                    let sub = BoundingBox::new(
                        clipped.min_x + x as f64 * x_res,
                        clipped.min_y + y as f64 * y_res,
                        (clipped.min_x + (x + max_x_tile) as f64 * x_res).min(clipped.max_x),
                        (clipped.min_y + (y + max_y_tile) as f64 * y_res).min(clipped.max_y),
                    );
                    queries.push(IndexerQuery {
                        url: indexer_url(req, mas_address, &namespaces, &sub.to_wkt(), "EPSG:3857"),
                        crs: "EPSG:3857".to_string(),
                        is_mask: false,
                        is_empty_tile,
                    });
                }
            }

            queries.shuffle(&mut rand::rng());
        }
    }

    if !has_subdivision {
        queries.push(IndexerQuery {
            url,
            crs: req.crs.clone(),
            is_mask: false,
            is_empty_tile,
        });
    }

    if let Some(mask) = req.config.mask.clone() {
        let mask_collection = if mask.data_source.is_empty() {
            req.collection.clone()
        } else {
            mask.data_source.clone()
        };

        if mask_collection != req.collection || mask.id != namespaces {
            let mask_req = TileRequest {
                collection: mask_collection,
                ..req.clone()
            };
            queries.push(IndexerQuery {
                url: indexer_url(&mask_req, mas_address, &mask.id, &bbox_wkt, &req.crs),
                crs: req.crs.clone(),
                is_mask: true,
                is_empty_tile,
            });
        }
    }

    Ok(Normalized::Queries(queries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AxisSelector;
    use ows_common::Mask;
    use std::sync::Arc;

    fn request() -> TileRequest {
        let mut req = TileRequest::new(
            "/g/data/modis",
            "EPSG:3857",
            BoundingBox::new(0.0, 0.0, 1000.0, 1000.0),
            256,
            256,
        );
        req.config.name_spaces = vec!["B4".to_string()];
        req
    }

    #[test]
    fn test_empty_collection_short_circuits() {
        let mut req = request();
        req.collection = "  ".to_string();
        assert!(matches!(
            normalize(&mut req, "mas:8080").unwrap(),
            Normalized::EmptyTile
        ));
    }

    #[test]
    fn test_time_axis_enumerated_values() {
        let mut req = request();
        req.axes.insert(
            "time".to_string(),
            AxisSelector {
                in_values: vec![2000.0, 1000.0, 1500.0],
                ..Default::default()
            },
        );
        normalize(&mut req, "mas:8080").unwrap();
        assert_eq!(req.start_time.unwrap().timestamp(), 1000);
        assert_eq!(req.end_time.unwrap().timestamp(), 2000);
    }

    #[test]
    fn test_time_axis_single_value_has_no_end() {
        let mut req = request();
        req.axes.insert(
            "time".to_string(),
            AxisSelector {
                in_values: vec![1000.0],
                ..Default::default()
            },
        );
        normalize(&mut req, "mas:8080").unwrap();
        assert_eq!(req.start_time.unwrap().timestamp(), 1000);
        assert!(req.end_time.is_none());
    }

    #[test]
    fn test_url_composition() {
        let mut req = request();
        req.axes.insert(
            "time".to_string(),
            AxisSelector {
                start: Some(0.0),
                end: Some(86400.0),
                ..Default::default()
            },
        );
        let Normalized::Queries(queries) = normalize(&mut req, "mas:8080").unwrap() else {
            panic!("expected queries")
        };
        assert_eq!(queries.len(), 1);
        let url = &queries[0].url;
        assert!(url.starts_with("http://mas:8080/g/data/modis?intersects&metadata=gdal"));
        assert!(url.contains("&time=1970-01-01T00:00:00.000Z"));
        assert!(url.contains("&until=1970-01-02T00:00:00.000Z"));
        assert!(url.contains("&namespace=B4"));
        assert!(url.contains("&srs=EPSG:3857"));
        assert!(!url.contains(' '));
        assert!(url.contains("POLYGON%20((0.000000%200.000000"));
    }

    #[test]
    fn test_non_spatial_hint_omits_geometry() {
        let mut req = request();
        req.config.mas_query_hint = "non_spatial".to_string();
        let Normalized::Queries(queries) = normalize(&mut req, "mas:8080").unwrap() else {
            panic!("expected queries")
        };
        assert!(queries[0].url.contains("&wkt=&"));
    }

    #[test]
    fn test_disjoint_spatial_extent_is_empty_tile() {
        let mut req = request();
        req.bbox = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        req.config.spatial_extent = Some(BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        assert!(matches!(
            normalize(&mut req, "mas:8080").unwrap(),
            Normalized::EmptyTile
        ));
    }

    #[test]
    fn test_query_tiling_and_shuffle() {
        let mut req = request();
        req.bbox = BoundingBox::new(0.0, 0.0, 1024.0, 1024.0);
        req.config.spatial_extent = Some(BoundingBox::new(0.0, 0.0, 1024.0, 1024.0));
        req.config.index_tile_x_size = 0.25;
        req.config.index_tile_y_size = 0.25;
        req.config.index_res_limit = 1.0;

        let Normalized::Queries(queries) = normalize(&mut req, "mas:8080").unwrap() else {
            panic!("expected queries")
        };
        // 4x4 sub-tiles
        assert_eq!(queries.len(), 16);
        assert!(queries.iter().all(|q| q.crs == "EPSG:3857"));
        assert!(queries.iter().all(|q| !q.is_mask));
    }

    #[test]
    fn test_query_limit_disables_tiling() {
        let mut req = request();
        req.bbox = BoundingBox::new(0.0, 0.0, 1024.0, 1024.0);
        req.config.spatial_extent = Some(BoundingBox::new(0.0, 0.0, 1024.0, 1024.0));
        req.config.index_tile_x_size = 0.25;
        req.config.index_tile_y_size = 0.25;
        req.config.index_res_limit = 1.0;
        req.config.query_limit = 100;

        let Normalized::Queries(queries) = normalize(&mut req, "mas:8080").unwrap() else {
            panic!("expected queries")
        };
        assert_eq!(queries.len(), 1);
    }

    #[test]
    fn test_mask_side_query() {
        let mut req = request();
        req.config.mask = Some(Arc::new(Mask {
            id: "fmask".to_string(),
            data_source: "/g/data/fmask".to_string(),
            ..Default::default()
        }));

        let Normalized::Queries(queries) = normalize(&mut req, "mas:8080").unwrap() else {
            panic!("expected queries")
        };
        assert_eq!(queries.len(), 2);
        let mask_query = queries.iter().find(|q| q.is_mask).unwrap();
        assert!(mask_query.url.contains("/g/data/fmask?"));
        assert!(mask_query.url.contains("&namespace=fmask"));
    }

    #[test]
    fn test_mask_same_layer_is_skipped() {
        let mut req = request();
        req.config.mask = Some(Arc::new(Mask {
            id: "B4".to_string(),
            ..Default::default()
        }));
        let Normalized::Queries(queries) = normalize(&mut req, "mas:8080").unwrap() else {
            panic!("expected queries")
        };
        assert_eq!(queries.len(), 1);
    }
}
