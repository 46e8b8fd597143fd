//! Resolution of request axis selectors against dataset axes.
//!
//! Both entry points fill the axis's `intersection_idx` /
//! `intersection_values` in place and report whether the selection fell
//! entirely outside the axis range (`Ok(true)`), in which case the
//! dataset is dropped. Malformed selectors are fatal for the request.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::error::{PipelineError, PipelineResult};
use crate::mas::DatasetAxis;
use crate::types::AxisSelector;

const VALUE_TOLERANCE: f64 = 1e-6;

/// Index-based selection over an `enum` grid.
///
/// Returns `Ok(true)` when a selector addresses indices beyond the axis.
pub fn select_by_indices(
    axis: &mut DatasetAxis,
    selector: &AxisSelector,
) -> PipelineResult<bool> {
    if axis.grid != "enum" {
        return Err(PipelineError::Selection(
            "grid type must be 'enum' for index-based selections".to_string(),
        ));
    }

    let len = axis.params.len() as i64;
    let mut idx_lookup: HashSet<i64> = HashSet::new();

    for sel in &selector.idx_selectors {
        if sel.is_all {
            axis.intersection_idx = (0..len).collect();
            axis.intersection_values = axis.params.clone();
            return Ok(false);
        }

        if !sel.is_range {
            let idx = sel.start.ok_or_else(|| {
                PipelineError::Selection("starting index is null".to_string())
            })?;
            if idx < 0 || idx > len - 1 {
                return Ok(true);
            }
            if !idx_lookup.insert(idx) {
                continue;
            }
            axis.intersection_idx.push(idx);
            axis.intersection_values.push(axis.params[idx as usize]);
            continue;
        }

        let idx_start = sel.start.unwrap_or(0);
        let idx_end = sel.end.unwrap_or(len - 1);

        if idx_end > len - 1 {
            return Ok(true);
        }
        if idx_start > idx_end {
            return Err(PipelineError::Selection(
                "starting index must be lower or equal to ending index".to_string(),
            ));
        }

        let step = sel.step.unwrap_or(1);
        if step < 1 {
            return Err(PipelineError::Selection(
                "indexing step must be greater or equal to 1".to_string(),
            ));
        }

        let mut idx = idx_start;
        while idx <= idx_end {
            if idx >= 0 && idx_lookup.insert(idx) {
                axis.intersection_idx.push(idx);
                axis.intersection_values.push(axis.params[idx as usize]);
            }
            idx += step;
        }
    }

    // Sort selected indices ascending, keeping values paired.
    let mut order: Vec<usize> = (0..axis.intersection_idx.len()).collect();
    order.sort_by_key(|&i| axis.intersection_idx[i]);

    axis.intersection_idx = order.iter().map(|&i| axis.intersection_idx[i]).collect();
    axis.intersection_values = order
        .iter()
        .map(|&i| axis.intersection_values[i])
        .collect();

    Ok(false)
}

/// Range- or value-based selection.
///
/// `enum` grids match scalar values against the axis parameters;
/// `default` grids match the request time window against the dataset's
/// timestamps.
pub fn select_by_range(
    axis: &mut DatasetAxis,
    selector: &AxisSelector,
    start_time: Option<&DateTime<Utc>>,
    end_time: Option<&DateTime<Utc>>,
    time_stamps: &[DateTime<Utc>],
) -> PipelineResult<bool> {
    match axis.grid.as_str() {
        "enum" => {
            if axis.params.is_empty() {
                return Err(PipelineError::Selection(format!(
                    "empty params for 'enum' grid: {}",
                    axis.name
                )));
            }

            if !selector.in_values.is_empty()
                || (selector.start.is_some() && selector.end.is_none())
            {
                let mut in_values = selector.in_values.clone();
                if in_values.is_empty() {
                    in_values.push(selector.start.unwrap());
                }
                select_values(axis, in_values)
            } else if let (Some(start), Some(end)) = (selector.start, selector.end) {
                let first = axis.params[0];
                let last = axis.params[axis.params.len() - 1];
                if end < first || start > last {
                    return Ok(true);
                }
                for (iv, &val) in axis.params.iter().enumerate() {
                    if val >= start && val < end {
                        axis.intersection_idx.push(iv as i64);
                        axis.intersection_values.push(val);
                    }
                }
                Ok(false)
            } else {
                Ok(false)
            }
        }
        "default" => {
            let Some(start) = start_time else {
                return Ok(true);
            };
            for (it, t) in time_stamps.iter().enumerate() {
                let selected = t == start
                    || end_time.is_some_and(|end| t == end || (t > start && t < end));
                if selected {
                    axis.intersection_idx.push(it as i64);
                    axis.intersection_values.push(t.timestamp() as f64);
                }
            }
            Ok(axis.intersection_idx.is_empty())
        }
        other => Err(PipelineError::Selection(format!(
            "unknown axis grid type: {other}"
        ))),
    }
}

/// Match explicit selector values against the axis parameters.
fn select_values(axis: &mut DatasetAxis, in_values: Vec<f64>) -> PipelineResult<bool> {
    let params = axis.params.clone();

    let mut min_val = params[0];
    let mut max_val = params[params.len() - 1];
    let mut is_monotonic = true;
    for (iv, &val) in params.iter().enumerate() {
        if val < min_val {
            min_val = val;
        }
        if val > max_val {
            max_val = val;
        }
        if iv > 0 && is_monotonic && val < params[iv - 1] {
            is_monotonic = false;
        }
    }

    let mut in_values: Vec<f64> = in_values
        .into_iter()
        .filter(|&val| !(min_val - val > VALUE_TOLERANCE || val - max_val > VALUE_TOLERANCE))
        .collect();

    if in_values.is_empty() {
        return Ok(true);
    }

    if is_monotonic {
        // Stream-match each selector value to the closest parameter.
        in_values.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let n_vals = in_values.len();
        let mut i_val = 0;
        let mut target = in_values[0];

        for (iv, &val) in params.iter().enumerate() {
            let val_found = if iv < params.len() - 1 {
                val >= target
            } else {
                target - val <= VALUE_TOLERANCE
            };
            if !val_found {
                continue;
            }

            let axis_idx = if iv >= 1
                && (target - params[iv - 1]).abs() <= (target - val).abs()
            {
                iv - 1
            } else {
                iv
            };

            axis.intersection_idx.push(axis_idx as i64);
            axis.intersection_values.push(params[axis_idx]);

            i_val += 1;
            if i_val >= n_vals {
                break;
            }
            target = in_values[i_val];
        }
    } else {
        // Non-monotonic parameter arrays take the nearest-neighbour scan.
        for &val in &in_values {
            let mut min_diff = f64::MAX;
            let mut min_idx = 0;
            for (iv, &pv) in params.iter().enumerate() {
                let diff = (pv - val).abs();
                if diff < min_diff {
                    min_diff = diff;
                    min_idx = iv;
                }
            }
            axis.intersection_idx.push(min_idx as i64);
            axis.intersection_values.push(params[min_idx]);
        }
    }

    Ok(false)
}
