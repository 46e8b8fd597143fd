//! Tile indexer: turns index queries into resolved granules.
//!
//! Each metadata response is resolved axis-by-axis against the request's
//! selectors, then the Cartesian product of selected indices is expanded
//! into one granule per band combination. Band namespaces are ordered by
//! their first-seen timestamp so the final band sequence is
//! deterministic regardless of response arrival order.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use ows_common::config::AXIS_MAPPING_FIRST;
use ows_common::time::{format_iso, from_epoch};

use crate::context::RequestContext;
use crate::error::{PipelineError, PipelineResult};
use crate::mas::{DatasetAxis, MetadataResponse, SharedMasClient};
use crate::normalizer::IndexerQuery;
use crate::selection::{select_by_indices, select_by_range};
use crate::types::{TileGranule, TileRequest, EMPTY_TILE_NS, NULL_PATH};

/// Resolve the axes of every dataset in a response against the request.
///
/// Fatal selection errors abort the whole request; datasets whose
/// selection falls outside the axis range are dropped.
fn resolve_axes(
    req: &TileRequest,
    metadata: &mut MetadataResponse,
) -> PipelineResult<()> {
    // Index-based selection requires identical axis parameters across
    // every dataset of the response.
    let mut axis_params_lookup: HashMap<String, HashSet<u64>> = HashMap::new();

    for ds in &mut metadata.gdal_datasets {
        if ds.axes.is_empty() {
            ds.axes.push(DatasetAxis::default_time());
        }

        let time_stamps = ds.time_stamps.clone();
        let mut is_out_range = false;

        for axis in &mut ds.axes {
            if let Some(tile_axis) = req.axes.get(&axis.name) {
                if axis.name == "time"
                    && ((tile_axis.start.is_some() && tile_axis.end.is_none())
                        || !tile_axis.in_values.is_empty()
                        || !tile_axis.idx_selectors.is_empty())
                {
                    axis.grid = "enum".to_string();
                    axis.params = time_stamps.iter().map(|t| t.timestamp() as f64).collect();
                }

                axis.order = tile_axis.order;
                axis.aggregate = tile_axis.aggregate;

                let out_range = if !tile_axis.idx_selectors.is_empty() {
                    match axis_params_lookup.entry(axis.name.clone()) {
                        Entry::Vacant(entry) => {
                            entry.insert(axis.params.iter().map(|v| v.to_bits()).collect());
                        }
                        Entry::Occupied(entry) => {
                            if axis
                                .params
                                .iter()
                                .any(|v| !entry.get().contains(&v.to_bits()))
                            {
                                return Err(PipelineError::Selection(
                                    "index-based selection only supports homogeneous axis across files"
                                        .to_string(),
                                ));
                            }
                        }
                    }
                    select_by_indices(axis, tile_axis)?
                } else {
                    select_by_range(
                        axis,
                        tile_axis,
                        req.start_time.as_ref(),
                        req.end_time.as_ref(),
                        &time_stamps,
                    )?
                };
                is_out_range = is_out_range || out_range;
            } else if req.config.axis_mapping == AXIS_MAPPING_FIRST {
                axis.order = 1;
                axis.aggregate = 1;
                match axis.grid.as_str() {
                    "enum" => {
                        if axis.params.is_empty() {
                            return Err(PipelineError::Selection(format!(
                                "empty params for 'enum' grid: {}",
                                axis.name
                            )));
                        }
                        axis.intersection_idx.push(0);
                        axis.intersection_values.push(axis.params[0]);
                    }
                    "default" => {
                        let first = time_stamps.first().ok_or_else(|| {
                            PipelineError::Selection(format!(
                                "no timestamps for 'default' grid: {}",
                                axis.name
                            ))
                        })?;
                        axis.intersection_idx.push(0);
                        axis.intersection_values.push(first.timestamp() as f64);
                    }
                    other => {
                        return Err(PipelineError::Selection(format!(
                            "unknown axis grid type: {other}"
                        )))
                    }
                }
            } else {
                match axis.grid.as_str() {
                    "enum" => {
                        if axis.params.is_empty() {
                            return Err(PipelineError::Selection(format!(
                                "empty params for 'enum' grid: {}",
                                axis.name
                            )));
                        }
                        for (iv, &val) in axis.params.iter().enumerate() {
                            axis.intersection_idx.push(iv as i64);
                            axis.intersection_values.push(val);
                        }
                    }
                    "default" => {
                        for (it, t) in time_stamps.iter().enumerate() {
                            axis.intersection_idx.push(it as i64);
                            axis.intersection_values.push(t.timestamp() as f64);
                        }
                    }
                    other => {
                        return Err(PipelineError::Selection(format!(
                            "unknown axis grid type: {other}"
                        )))
                    }
                }
            }

            let stride = axis.stride();
            for idx in &mut axis.intersection_idx {
                *idx *= stride;
            }
        }

        if is_out_range {
            ds.is_out_range = true;
        }
    }

    Ok(())
}

/// Human-readable axis value for disaggregated namespace suffixes.
fn readable_value(axis_name: &str, value: f64) -> String {
    if axis_name == "time" {
        format_iso(&from_epoch(value))
    } else {
        format!("{value}")
    }
}

/// Expand resolved datasets into granules, rightmost axis varying
/// fastest, and rewrite each granule's namespace list into the
/// deterministic per-request band order.
pub fn granules_from_metadata(
    req: &TileRequest,
    mut metadata: MetadataResponse,
    is_empty_tile: bool,
) -> PipelineResult<Vec<TileGranule>> {
    resolve_axes(req, &mut metadata)?;

    // dataset namespace -> [(band namespace, first seen timestamp)]
    let mut band_name_spaces: HashMap<String, Vec<(String, f64)>> = HashMap::new();
    let mut gran_list: Vec<TileGranule> = Vec::new();

    for ds in &metadata.gdal_datasets {
        if ds.is_out_range {
            continue;
        }
        if ds.axes.iter().any(|a| a.intersection_idx.is_empty()) {
            continue;
        }

        let ds_name_space = if is_empty_tile {
            EMPTY_TILE_NS.to_string()
        } else {
            ds.name_space.clone()
        };

        let mut cnt = vec![0usize; ds.axes.len()];

        while cnt[0] < ds.axes[0].intersection_idx.len() {
            let mut band_idx: i64 = 1;
            let mut agg_time_stamp = 0.0;
            let mut band_time_stamp = 0.0;
            let mut namespace = ds_name_space.clone();
            let mut is_first = true;
            let mut has_non_agg = false;

            for (i, axis) in ds.axes.iter().enumerate() {
                band_idx += axis.intersection_idx[cnt[i]];
                band_time_stamp += axis.intersection_values[cnt[i]];

                let i_ts = if axis.order != 0 {
                    axis.intersection_idx.len() - cnt[i] - 1
                } else {
                    cnt[i]
                };
                agg_time_stamp += axis.intersection_values[i_ts];

                if axis.aggregate == 0 {
                    namespace.push(if is_first { '#' } else { ',' });
                    is_first = false;
                    namespace.push_str(&format!(
                        "{}={}",
                        axis.name,
                        readable_value(&axis.name, axis.intersection_values[cnt[i]])
                    ));
                    has_non_agg = true;
                }
            }

            let mut band_found = false;
            if has_non_agg {
                let bands = band_name_spaces.entry(ds_name_space.clone()).or_default();
                if bands.iter().any(|(ns, _)| ns == &namespace) {
                    band_found = true;
                } else {
                    bands.push((namespace.clone(), band_time_stamp));
                }
            }

            if !is_empty_tile || !band_found {
                let mut gran = TileGranule {
                    config: req.config.clone(),
                    raw_path: ds.raw_path.clone(),
                    path: ds.ds_name.clone(),
                    crs: req.crs.clone(),
                    src_srs: ds.srs.clone(),
                    src_geo_transform: ds.geo_transform.clone(),
                    bbox: req.bbox,
                    width: req.width,
                    height: req.height,
                    off_x: req.off_x,
                    off_y: req.off_y,
                    name_space: namespace.clone(),
                    var_name_space: ds.name_space.clone(),
                    time_stamp: agg_time_stamp,
                    band_idx,
                    polygon: ds.polygon.clone(),
                    raster_type: ds.array_type.clone(),
                    geo_location: ds.geo_location.clone(),
                    clip_feature: req.clip_feature.clone(),
                };
                if is_empty_tile {
                    gran.path = NULL_PATH.to_string();
                    gran.raster_type = "Byte".to_string();
                    gran.width = 1;
                    gran.height = 1;
                }
                gran_list.push(gran);
            }

            // odometer over the per-axis selections
            let mut ia = ds.axes.len() - 1;
            cnt[ia] += 1;
            while ia > 0 && cnt[ia] >= ds.axes[ia].intersection_idx.len() {
                cnt[ia] = 0;
                cnt[ia - 1] += 1;
                ia -= 1;
            }
        }
    }

    // Replace each dataset namespace with its expanded band namespaces,
    // ordered by ascending first-seen timestamp.
    let mut sorted_name_spaces: Vec<String> = Vec::new();
    let mut has_new_ns = false;
    for ns in &req.config.name_spaces {
        match band_name_spaces.get(ns) {
            Some(bands) => {
                let mut bands = bands.clone();
                bands.sort_by(|a, b| {
                    a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)
                });
                sorted_name_spaces.extend(bands.into_iter().map(|(name, _)| name));
                has_new_ns = true;
            }
            None => sorted_name_spaces.push(ns.clone()),
        }
    }

    if has_new_ns {
        for gran in &mut gran_list {
            gran.config.name_spaces = sorted_name_spaces.clone();
        }
    }

    Ok(gran_list)
}

/// The indexer stage: fans index queries out to the metadata service and
/// streams resolved granules downstream.
pub struct TileIndexer {
    mas: SharedMasClient,
    ctx: RequestContext,
}

impl TileIndexer {
    pub fn new(mas: SharedMasClient, ctx: RequestContext) -> Self {
        Self { mas, ctx }
    }

    pub async fn run(
        self,
        req: Arc<TileRequest>,
        mut queries: mpsc::Receiver<IndexerQuery>,
        out: mpsc::Sender<TileGranule>,
    ) {
        let mut tasks = JoinSet::new();

        while let Some(query) = queries.recv().await {
            if self.ctx.check_cancellation() {
                break;
            }

            let mas = self.mas.clone();
            let ctx = self.ctx.clone();
            let req = req.clone();
            let out = out.clone();
            tasks.spawn(async move {
                process_query(mas, ctx, req, query, out).await;
            });
        }

        while tasks.join_next().await.is_some() {}
        debug!("tile indexer done");
    }
}

async fn process_query(
    mas: SharedMasClient,
    ctx: RequestContext,
    req: Arc<TileRequest>,
    query: IndexerQuery,
    out: mpsc::Sender<TileGranule>,
) {
    let metadata = match mas.fetch_metadata(&query.url).await {
        Ok(metadata) => metadata,
        Err(err) => {
            ctx.send_error(err);
            let _ = out.send(TileGranule::empty_tile(&req)).await;
            return;
        }
    };

    debug!(files = metadata.gdal_datasets.len(), "index response");
    ctx.metrics()
        .index_files
        .fetch_add(metadata.gdal_datasets.len() as i64, std::sync::atomic::Ordering::Relaxed);

    if metadata.gdal_datasets.is_empty() {
        if !metadata.error.is_empty() {
            warn!(error = %metadata.error, "index returned error");
        }
        let _ = out.send(TileGranule::empty_tile(&req)).await;
        return;
    }

    let granules = match granules_from_metadata(&req, metadata, query.is_empty_tile) {
        Ok(granules) => granules,
        Err(err) => {
            ctx.send_error(err);
            return;
        }
    };

    debug!(granules = granules.len(), "index expansion");
    ctx.metrics()
        .granules
        .fetch_add(granules.len() as i64, std::sync::atomic::Ordering::Relaxed);

    for gran in granules {
        if ctx.check_cancellation() {
            return;
        }
        if out.send(gran).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mas::GdalDataset;
    use crate::types::{AxisSelector, IdxSelector};
    use ows_common::time::parse_iso;
    use ows_common::BoundingBox;

    fn dataset(namespace: &str, stamps: &[&str]) -> GdalDataset {
        GdalDataset {
            raw_path: format!("/g/data/{namespace}.nc"),
            ds_name: format!("NETCDF:/g/data/{namespace}.nc:{namespace}"),
            name_space: namespace.to_string(),
            array_type: "Float32".to_string(),
            srs: "EPSG:4326".to_string(),
            geo_transform: vec![147.0, 0.00025, 0.0, -35.0, 0.0, -0.00025],
            time_stamps: stamps.iter().map(|s| parse_iso(s).unwrap()).collect(),
            ..Default::default()
        }
    }

    fn request() -> TileRequest {
        let mut req = TileRequest::new(
            "/g/data/modis",
            "EPSG:3857",
            BoundingBox::new(0.0, 0.0, 1000.0, 1000.0),
            256,
            256,
        );
        req.config.name_spaces = vec!["B4".to_string()];
        req.start_time = Some(parse_iso("2020-01-01T00:00:00.000Z").unwrap());
        req.end_time = Some(parse_iso("2020-12-31T00:00:00.000Z").unwrap());
        req.axes.insert("time".to_string(), AxisSelector { aggregate: 1, ..Default::default() });
        req
    }

    #[test]
    fn test_missing_axes_get_default_time_axis() {
        let req = request();
        let metadata = MetadataResponse {
            error: String::new(),
            gdal_datasets: vec![dataset("B4", &["2020-03-01T00:00:00.000Z"])],
        };

        let granules = granules_from_metadata(&req, metadata, false).unwrap();
        assert_eq!(granules.len(), 1);
        assert_eq!(granules[0].band_idx, 1);
        assert_eq!(granules[0].name_space, "B4");
        assert_eq!(
            granules[0].time_stamp,
            parse_iso("2020-03-01T00:00:00.000Z").unwrap().timestamp() as f64
        );
    }

    #[test]
    fn test_band_index_uses_strides() {
        let mut req = request();
        req.axes.insert(
            "depth".to_string(),
            AxisSelector {
                idx_selectors: vec![IdxSelector {
                    start: Some(2),
                    ..Default::default()
                }],
                aggregate: 1,
                ..Default::default()
            },
        );

        let mut ds = dataset("B4", &["2020-03-01T00:00:00.000Z"]);
        ds.axes = vec![
            DatasetAxis {
                name: "time".to_string(),
                strides: vec![3],
                grid: "default".to_string(),
                ..Default::default()
            },
            DatasetAxis {
                name: "depth".to_string(),
                params: vec![0.5, 1.5, 2.5],
                strides: vec![1],
                grid: "enum".to_string(),
                ..Default::default()
            },
        ];

        let metadata = MetadataResponse {
            error: String::new(),
            gdal_datasets: vec![ds],
        };
        let granules = granules_from_metadata(&req, metadata, false).unwrap();
        assert_eq!(granules.len(), 1);
        // band 1 + time index 0*3 + depth index 2*1
        assert_eq!(granules[0].band_idx, 3);
    }

    #[test]
    fn test_disaggregated_namespaces_and_ordering() {
        let mut req = request();
        req.axes.insert(
            "time".to_string(),
            AxisSelector {
                aggregate: 0,
                ..Default::default()
            },
        );

        let metadata = MetadataResponse {
            error: String::new(),
            gdal_datasets: vec![dataset(
                "B4",
                &["2020-03-01T00:00:00.000Z", "2020-01-01T00:00:00.000Z"],
            )],
        };

        let granules = granules_from_metadata(&req, metadata, false).unwrap();
        assert_eq!(granules.len(), 2);
        assert_eq!(granules[0].name_space, "B4#time=2020-03-01T00:00:00.000Z");
        assert_eq!(granules[1].name_space, "B4#time=2020-01-01T00:00:00.000Z");

        // namespace list is re-sorted by ascending timestamp
        assert_eq!(
            granules[0].config.name_spaces,
            vec![
                "B4#time=2020-01-01T00:00:00.000Z",
                "B4#time=2020-03-01T00:00:00.000Z"
            ]
        );
    }

    #[test]
    fn test_aggregated_axis_collapses_to_one_namespace() {
        let req = request();
        let metadata = MetadataResponse {
            error: String::new(),
            gdal_datasets: vec![
                dataset("B4", &["2020-01-01T00:00:00.000Z", "2020-02-01T00:00:00.000Z"]),
                dataset("B4", &["2020-03-01T00:00:00.000Z"]),
            ],
        };

        let granules = granules_from_metadata(&req, metadata, false).unwrap();
        // three warp granules but a single output namespace
        assert_eq!(granules.len(), 3);
        assert!(granules.iter().all(|g| g.name_space == "B4"));
        assert!(granules.iter().all(|g| g.config.name_spaces == vec!["B4"]));
        assert!(granules.iter().all(|g| g.band_idx >= 1));
    }

    #[test]
    fn test_descending_order_reverses_agg_timestamps() {
        let mut req = request();
        req.axes.insert(
            "time".to_string(),
            AxisSelector {
                order: 1,
                aggregate: 1,
                ..Default::default()
            },
        );

        let metadata = MetadataResponse {
            error: String::new(),
            gdal_datasets: vec![dataset(
                "B4",
                &["2020-01-01T00:00:00.000Z", "2020-02-01T00:00:00.000Z"],
            )],
        };

        let granules = granules_from_metadata(&req, metadata, false).unwrap();
        let t1 = parse_iso("2020-01-01T00:00:00.000Z").unwrap().timestamp() as f64;
        let t2 = parse_iso("2020-02-01T00:00:00.000Z").unwrap().timestamp() as f64;
        // first combination carries the reversed (later) timestamp
        assert_eq!(granules[0].time_stamp, t2);
        assert_eq!(granules[1].time_stamp, t1);
    }

    #[test]
    fn test_out_of_range_dataset_is_dropped() {
        let mut req = request();
        req.start_time = Some(parse_iso("2021-01-01T00:00:00.000Z").unwrap());
        req.end_time = Some(parse_iso("2021-02-01T00:00:00.000Z").unwrap());

        let metadata = MetadataResponse {
            error: String::new(),
            gdal_datasets: vec![dataset("B4", &["2020-01-01T00:00:00.000Z"])],
        };
        let granules = granules_from_metadata(&req, metadata, false).unwrap();
        assert!(granules.is_empty());
    }

    #[test]
    fn test_heterogeneous_params_fail_index_selection() {
        let mut req = request();
        req.axes.insert(
            "depth".to_string(),
            AxisSelector {
                idx_selectors: vec![IdxSelector {
                    is_all: true,
                    ..Default::default()
                }],
                aggregate: 1,
                ..Default::default()
            },
        );

        let mut ds_a = dataset("B4", &["2020-03-01T00:00:00.000Z"]);
        ds_a.axes = vec![DatasetAxis {
            name: "depth".to_string(),
            params: vec![0.5, 1.5],
            strides: vec![1],
            grid: "enum".to_string(),
            ..Default::default()
        }];
        let mut ds_b = ds_a.clone();
        ds_b.axes[0].params = vec![0.5, 99.0];

        let metadata = MetadataResponse {
            error: String::new(),
            gdal_datasets: vec![ds_a, ds_b],
        };
        let err = granules_from_metadata(&req, metadata, false).unwrap_err();
        assert!(err.to_string().contains("homogeneous"));
    }

    #[test]
    fn test_unrequested_axis_mapping_first() {
        let mut req = request();
        req.config.axis_mapping = AXIS_MAPPING_FIRST;

        let mut ds = dataset("B4", &["2020-03-01T00:00:00.000Z"]);
        ds.axes = vec![
            DatasetAxis {
                name: "time".to_string(),
                strides: vec![4],
                grid: "default".to_string(),
                ..Default::default()
            },
            DatasetAxis {
                name: "level".to_string(),
                params: vec![850.0, 500.0, 250.0],
                strides: vec![1],
                grid: "enum".to_string(),
                ..Default::default()
            },
        ];

        let metadata = MetadataResponse {
            error: String::new(),
            gdal_datasets: vec![ds],
        };
        let granules = granules_from_metadata(&req, metadata, false).unwrap();
        // only the first index of the unrequested axis is selected
        assert_eq!(granules.len(), 1);
        assert_eq!(granules[0].band_idx, 1);
    }

    #[test]
    fn test_unrequested_axis_mapping_all_disambiguates_bands() {
        let mut req = request();
        req.config.axis_mapping = 1;

        let mut ds = dataset("B4", &["2020-03-01T00:00:00.000Z"]);
        ds.axes = vec![
            DatasetAxis {
                name: "time".to_string(),
                strides: vec![3],
                grid: "default".to_string(),
                ..Default::default()
            },
            DatasetAxis {
                name: "level".to_string(),
                params: vec![850.0, 500.0, 250.0],
                strides: vec![1],
                grid: "enum".to_string(),
                ..Default::default()
            },
        ];

        let metadata = MetadataResponse {
            error: String::new(),
            gdal_datasets: vec![ds],
        };
        let granules = granules_from_metadata(&req, metadata, false).unwrap();
        // rightmost axis varies fastest: bands 1, 2, 3
        assert_eq!(granules.len(), 3);
        assert_eq!(
            granules.iter().map(|g| g.band_idx).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        // unrequested axes under mapping=all disaggregate into suffixed
        // namespaces, listed by ascending band timestamp
        assert_eq!(granules[0].name_space, "B4#level=850");
        assert_eq!(granules[1].name_space, "B4#level=500");
        assert_eq!(granules[2].name_space, "B4#level=250");
        assert_eq!(
            granules[0].config.name_spaces,
            vec!["B4#level=250", "B4#level=500", "B4#level=850"]
        );
    }
}
