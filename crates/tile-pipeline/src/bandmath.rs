//! Band-math stage: evaluates user expressions over merged bands.

use std::collections::HashMap;

use band_math::{eval_number, BandExpressions};

use crate::error::{PipelineError, PipelineResult};
use crate::raster::{TypedPlane, TypedRaster};

/// Evaluate the request's expressions, producing one Float32 plane per
/// expression.
///
/// Identity expression lists (bare band references only) pass the source
/// bands through untouched, byte for byte. Any no-data input sample
/// makes the output sample no-data; non-finite results (division by
/// zero, log of a negative) are no-data as well.
pub fn apply_band_math(
    rasters: Vec<TypedRaster>,
    expr: &BandExpressions,
) -> PipelineResult<Vec<TypedRaster>> {
    if expr.expressions.is_empty() || expr.is_identity() {
        return Ok(rasters);
    }

    let (width, height) = match rasters.first() {
        Some(first) => (first.width(), first.height()),
        None => return Ok(rasters),
    };
    if rasters
        .iter()
        .any(|r| r.width() != width || r.height() != height)
    {
        return Err(PipelineError::Internal(
            "band planes disagree on dimensions".to_string(),
        ));
    }

    let planes: HashMap<&str, Vec<f32>> = rasters
        .iter()
        .map(|r| (r.name_space(), r.samples_f32()))
        .collect();

    let mut outputs = Vec::with_capacity(expr.expressions.len());
    for parsed in &expr.expressions {
        let var_planes: Vec<&Vec<f32>> = parsed
            .variables
            .iter()
            .map(|var| {
                planes.get(var.as_str()).ok_or_else(|| {
                    PipelineError::Validation(format!(
                        "band math variable '{var}' has no matching band"
                    ))
                })
            })
            .collect::<PipelineResult<_>>()?;

        let mut out = vec![f32::NAN; width * height];
        for (i, slot) in out.iter_mut().enumerate() {
            if var_planes.iter().any(|plane| plane[i].is_nan()) {
                continue;
            }
            let resolve = |name: &str| planes.get(name).map(|plane| plane[i]);
            let value = eval_number(&parsed.ast, &resolve)?;
            if value.is_finite() {
                *slot = value;
            }
        }

        outputs.push(TypedRaster::Float32(TypedPlane {
            name_space: parsed.name.clone(),
            data: out,
            width,
            height,
            no_data: f64::NAN,
        }));
    }

    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use band_math::parse_band_expressions;

    fn float_band(ns: &str, data: Vec<f32>) -> TypedRaster {
        TypedRaster::Float32(TypedPlane {
            name_space: ns.to_string(),
            data,
            width: 2,
            height: 2,
            no_data: -9999.0,
        })
    }

    #[test]
    fn test_ndvi_over_two_bands() {
        let bands = vec![
            float_band("B4", vec![0.2, 0.1, -9999.0, 0.3]),
            float_band("B8", vec![0.6, 0.3, 0.5, -9999.0]),
        ];
        let expr = parse_band_expressions(&["ndvi=(B8-B4)/(B8+B4)".to_string()]).unwrap();

        let out = apply_band_math(bands, &expr).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name_space(), "ndvi");

        let TypedRaster::Float32(plane) = &out[0] else {
            panic!("expected float output")
        };
        assert!((plane.data[0] - 0.5).abs() < 1e-6);
        assert!((plane.data[1] - 0.5).abs() < 1e-6);
        // either input no-data → output no-data
        assert!(plane.data[2].is_nan());
        assert!(plane.data[3].is_nan());
    }

    #[test]
    fn test_identity_passes_bands_through() {
        let bands = vec![float_band("B4", vec![1.0, 2.0, 3.0, 4.0])];
        let expr = parse_band_expressions(&["B4".to_string()]).unwrap();

        let out = apply_band_math(bands.clone(), &expr).unwrap();
        let (TypedRaster::Float32(before), TypedRaster::Float32(after)) = (&bands[0], &out[0])
        else {
            panic!("expected float planes")
        };
        assert_eq!(before.data, after.data);
        assert_eq!(before.no_data, after.no_data);
    }

    #[test]
    fn test_non_finite_results_are_no_data() {
        let bands = vec![float_band("B4", vec![0.0, 1.0, 2.0, 4.0])];
        let expr = parse_band_expressions(&["1/B4".to_string()]).unwrap();

        let out = apply_band_math(bands, &expr).unwrap();
        let TypedRaster::Float32(plane) = &out[0] else {
            panic!("expected float output")
        };
        assert!(plane.data[0].is_nan()); // 1/0
        assert_eq!(plane.data[1], 1.0);
        assert_eq!(plane.data[2], 0.5);
    }

    #[test]
    fn test_unknown_band_is_a_validation_error() {
        let bands = vec![float_band("B4", vec![1.0; 4])];
        let expr = parse_band_expressions(&["B9+1".to_string()]).unwrap();
        let err = apply_band_math(bands, &expr).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_multiple_expressions_multiple_outputs() {
        let bands = vec![
            float_band("B4", vec![2.0; 4]),
            float_band("B8", vec![6.0; 4]),
        ];
        let expr = parse_band_expressions(&[
            "sum=B8+B4".to_string(),
            "ratio=B8/B4".to_string(),
        ])
        .unwrap();

        let out = apply_band_math(bands, &expr).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name_space(), "sum");
        assert_eq!(out[1].name_space(), "ratio");
        assert_eq!(out[0].samples_f32()[0], 8.0);
        assert_eq!(out[1].samples_f32()[0], 3.0);
    }
}
