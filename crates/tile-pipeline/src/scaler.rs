//! Scaler: maps numeric rasters to display bytes.
//!
//! Output values live in 0..=254; byte 255 is reserved for no-data and
//! out-of-domain samples.

use rayon::prelude::*;

use ows_common::{ColourScale, ScaleParams};

use crate::error::{PipelineError, PipelineResult};
use crate::raster::{TypedPlane, TypedRaster};

/// No-data byte in scaled output.
pub const NO_DATA_BYTE: u8 = 0xFF;

/// Scale every plane to bytes with the same parameters.
pub fn scale(rasters: &[TypedRaster], params: &ScaleParams) -> PipelineResult<Vec<TypedPlane<u8>>> {
    rasters.iter().map(|r| scale_one(r, params)).collect()
}

/// Replace samples with their natural log, shifted so the smallest valid
/// sample stays in the log domain. Samples the normalisation cannot
/// represent become no-data.
fn log_normalise(samples: &mut [f32]) {
    let mut min = f32::INFINITY;
    for &v in samples.iter() {
        if !v.is_nan() && v < min {
            min = v;
        }
    }
    if !min.is_finite() {
        return;
    }

    let shift = if min <= 0.0 { min - 1.0 } else { 0.0 };
    for v in samples.iter_mut() {
        if v.is_nan() {
            continue;
        }
        let normalised = (*v - shift).ln();
        *v = if normalised.is_finite() {
            normalised
        } else {
            f32::NAN
        };
    }
}

fn scale_one(raster: &TypedRaster, params: &ScaleParams) -> PipelineResult<TypedPlane<u8>> {
    let width = raster.width();
    let height = raster.height();
    let mut samples = raster.samples_f32();

    // Log colour scaling only applies to floating point planes; integer
    // planes are published pre-binned.
    if params.colour_scale == ColourScale::Log && matches!(raster, TypedRaster::Float32(_)) {
        log_normalise(&mut samples);
    }

    let (offset, clip) = if params.clip == 0.0 && params.offset == 0.0 {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &v in &samples {
            if v.is_nan() {
                continue;
            }
            if v < min {
                min = v;
            }
            if v > max {
                max = v;
            }
        }
        if !min.is_finite() {
            // no valid samples at all
            (0.0, 0.1)
        } else {
            if min == max {
                max += 0.1;
            }
            (min, max)
        }
    } else {
        (params.offset as f32, params.clip as f32)
    };

    let range = clip - offset;
    if range <= 0.0 {
        return Err(PipelineError::Validation(format!(
            "scale range is empty: offset {offset}, clip {clip}"
        )));
    }

    let mut out = vec![0u8; samples.len()];
    out.par_chunks_mut(width)
        .zip(samples.par_chunks(width))
        .for_each(|(out_row, sample_row)| {
            for (slot, &v) in out_row.iter_mut().zip(sample_row) {
                // Out-of-domain samples join no-data; in-domain samples
                // quantize to 0..=254 so the reserved byte never leaks
                // into valid output.
                *slot = if v.is_nan() || v < offset || v > clip {
                    NO_DATA_BYTE
                } else {
                    let c = ((v - offset) / range * 255.0).floor();
                    if c < 0.0 {
                        NO_DATA_BYTE
                    } else if c > 254.0 {
                        254
                    } else {
                        c as u8
                    }
                };
            }
        });

    Ok(TypedPlane {
        name_space: raster.name_space().to_string(),
        data: out,
        width,
        height,
        no_data: NO_DATA_BYTE as f64,
    })
}
