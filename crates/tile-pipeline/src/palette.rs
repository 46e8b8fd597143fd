//! Palette stage: scaled bytes to RGBA.

use rayon::prelude::*;

use ows_common::Palette;

use crate::error::{PipelineError, PipelineResult};
use crate::raster::TypedPlane;
use crate::scaler::NO_DATA_BYTE;

/// A rendered RGBA tile, 4 bytes per pixel.
#[derive(Debug, Clone)]
pub struct RgbaRaster {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

/// Colorize scaled bands.
///
/// One band maps through the palette lookup table; three bands render as
/// an RGB composite (a pixel is transparent when any channel is
/// no-data).
pub fn apply_palette(
    scaled: &[TypedPlane<u8>],
    palette: &Palette,
) -> PipelineResult<RgbaRaster> {
    match scaled {
        [band] => {
            let lut = palette.lookup_table()?;
            let mut data = vec![0u8; band.data.len() * 4];

            data.par_chunks_mut(band.width * 4)
                .zip(band.data.par_chunks(band.width))
                .for_each(|(out_row, in_row)| {
                    for (pixel, &v) in out_row.chunks_exact_mut(4).zip(in_row) {
                        let colour = lut[v as usize];
                        pixel[0] = colour.r;
                        pixel[1] = colour.g;
                        pixel[2] = colour.b;
                        pixel[3] = colour.a;
                    }
                });

            Ok(RgbaRaster {
                data,
                width: band.width,
                height: band.height,
            })
        }
        [r, g, b] => {
            if r.data.len() != g.data.len() || g.data.len() != b.data.len() {
                return Err(PipelineError::Internal(
                    "RGB bands disagree on dimensions".to_string(),
                ));
            }

            let mut data = vec![0u8; r.data.len() * 4];
            data.par_chunks_mut(r.width * 4)
                .enumerate()
                .for_each(|(row, out_row)| {
                    let start = row * r.width;
                    for (col, pixel) in out_row.chunks_exact_mut(4).enumerate() {
                        let i = start + col;
                        let (vr, vg, vb) = (r.data[i], g.data[i], b.data[i]);
                        if vr == NO_DATA_BYTE || vg == NO_DATA_BYTE || vb == NO_DATA_BYTE {
                            pixel.fill(0);
                        } else {
                            pixel[0] = vr;
                            pixel[1] = vg;
                            pixel[2] = vb;
                            pixel[3] = 0xFF;
                        }
                    }
                });

            Ok(RgbaRaster {
                data,
                width: r.width,
                height: r.height,
            })
        }
        other => Err(PipelineError::Validation(format!(
            "palette rendering expects 1 or 3 bands, got {}",
            other.len()
        ))),
    }
}
