//! Raster buffers exchanged between pipeline stages.
//!
//! Warp workers return raw typed bytes covering a sub-rectangle of the
//! destination canvas ([`FlexRaster`]); the merger expands those into
//! full typed canvases ([`TypedRaster`]) before aggregation.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{PipelineError, PipelineResult};
use crate::types::ConfigPayload;

/// Element type of a raster buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RasterType {
    SignedByte,
    Byte,
    Int16,
    UInt16,
    Float32,
}

impl RasterType {
    /// Byte width of one sample.
    pub fn size_of(self) -> usize {
        match self {
            RasterType::SignedByte | RasterType::Byte => 1,
            RasterType::Int16 | RasterType::UInt16 => 2,
            RasterType::Float32 => 4,
        }
    }

    /// Parse a worker element type tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "SignedByte" => Some(RasterType::SignedByte),
            "Byte" => Some(RasterType::Byte),
            "Int16" => Some(RasterType::Int16),
            "UInt16" => Some(RasterType::UInt16),
            "Float32" => Some(RasterType::Float32),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            RasterType::SignedByte => "SignedByte",
            RasterType::Byte => "Byte",
            RasterType::Int16 => "Int16",
            RasterType::UInt16 => "UInt16",
            RasterType::Float32 => "Float32",
        }
    }
}

/// A sample type storable in a [`TypedPlane`].
pub trait Sample: Copy + PartialEq + Send + Sync + 'static {
    const TYPE: RasterType;

    fn to_f32(self) -> f32;
    /// Fold a Float32 value back to this type; integer types round
    /// half-to-even.
    fn from_f32(v: f32) -> Self;
    fn from_no_data(no_data: f64) -> Self;
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! int_sample {
    ($ty:ty, $tag:expr, $width:expr) => {
        impl Sample for $ty {
            const TYPE: RasterType = $tag;

            fn to_f32(self) -> f32 {
                self as f32
            }

            fn from_f32(v: f32) -> Self {
                v.round_ties_even() as $ty
            }

            fn from_no_data(no_data: f64) -> Self {
                no_data as $ty
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; $width];
                buf.copy_from_slice(&bytes[..$width]);
                <$ty>::from_le_bytes(buf)
            }
        }
    };
}

int_sample!(i8, RasterType::SignedByte, 1);
int_sample!(u8, RasterType::Byte, 1);
int_sample!(i16, RasterType::Int16, 2);
int_sample!(u16, RasterType::UInt16, 2);

impl Sample for f32 {
    const TYPE: RasterType = RasterType::Float32;

    fn to_f32(self) -> f32 {
        self
    }

    fn from_f32(v: f32) -> Self {
        v
    }

    fn from_no_data(no_data: f64) -> Self {
        no_data as f32
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&bytes[..4]);
        f32::from_le_bytes(buf)
    }
}

/// A fully materialized single-band canvas.
#[derive(Debug, Clone)]
pub struct TypedPlane<T> {
    pub name_space: String,
    pub data: Vec<T>,
    pub width: usize,
    pub height: usize,
    pub no_data: f64,
}

impl<T: Sample> TypedPlane<T> {
    /// A canvas filled entirely with the no-data value.
    pub fn filled_no_data(
        name_space: impl Into<String>,
        width: usize,
        height: usize,
        no_data: f64,
    ) -> Self {
        Self {
            name_space: name_space.into(),
            data: vec![T::from_no_data(no_data); width * height],
            width,
            height,
            no_data,
        }
    }

    /// Float32 view of the plane with no-data samples as NaN.
    pub fn samples_f32(&self) -> Vec<f32> {
        let nd = T::from_no_data(self.no_data);
        self.data
            .iter()
            .map(|&v| {
                let f = v.to_f32();
                if v == nd || f.is_nan() {
                    f32::NAN
                } else {
                    f
                }
            })
            .collect()
    }
}

/// Tagged raster variant the merger and scaler branch on.
#[derive(Debug, Clone)]
pub enum TypedRaster {
    SignedByte(TypedPlane<i8>),
    Byte(TypedPlane<u8>),
    Int16(TypedPlane<i16>),
    UInt16(TypedPlane<u16>),
    Float32(TypedPlane<f32>),
}

macro_rules! for_each_plane {
    ($self:expr, $plane:ident => $body:expr) => {
        match $self {
            TypedRaster::SignedByte($plane) => $body,
            TypedRaster::Byte($plane) => $body,
            TypedRaster::Int16($plane) => $body,
            TypedRaster::UInt16($plane) => $body,
            TypedRaster::Float32($plane) => $body,
        }
    };
}

impl TypedRaster {
    pub fn raster_type(&self) -> RasterType {
        match self {
            TypedRaster::SignedByte(_) => RasterType::SignedByte,
            TypedRaster::Byte(_) => RasterType::Byte,
            TypedRaster::Int16(_) => RasterType::Int16,
            TypedRaster::UInt16(_) => RasterType::UInt16,
            TypedRaster::Float32(_) => RasterType::Float32,
        }
    }

    pub fn width(&self) -> usize {
        for_each_plane!(self, p => p.width)
    }

    pub fn height(&self) -> usize {
        for_each_plane!(self, p => p.height)
    }

    pub fn no_data(&self) -> f64 {
        for_each_plane!(self, p => p.no_data)
    }

    pub fn name_space(&self) -> &str {
        for_each_plane!(self, p => p.name_space.as_str())
    }

    /// Float32 view with no-data samples as NaN.
    pub fn samples_f32(&self) -> Vec<f32> {
        for_each_plane!(self, p => p.samples_f32())
    }

    /// Fold a Float32 plane (NaN = no-data) back into a raster of the
    /// given element type.
    pub fn from_f32(
        rtype: RasterType,
        name_space: impl Into<String>,
        samples: &[f32],
        width: usize,
        height: usize,
        no_data: f64,
    ) -> TypedRaster {
        fn fold<T: Sample>(
            name_space: String,
            samples: &[f32],
            width: usize,
            height: usize,
            no_data: f64,
        ) -> TypedPlane<T> {
            let nd = T::from_no_data(no_data);
            TypedPlane {
                name_space,
                data: samples
                    .iter()
                    .map(|&v| if v.is_nan() { nd } else { T::from_f32(v) })
                    .collect(),
                width,
                height,
                no_data,
            }
        }

        let ns = name_space.into();
        match rtype {
            RasterType::SignedByte => {
                TypedRaster::SignedByte(fold(ns, samples, width, height, no_data))
            }
            RasterType::Byte => TypedRaster::Byte(fold(ns, samples, width, height, no_data)),
            RasterType::Int16 => TypedRaster::Int16(fold(ns, samples, width, height, no_data)),
            RasterType::UInt16 => TypedRaster::UInt16(fold(ns, samples, width, height, no_data)),
            RasterType::Float32 => {
                TypedRaster::Float32(fold(ns, samples, width, height, no_data))
            }
        }
    }

    /// All-no-data Byte canvas used for empty tiles and missing bands.
    pub fn empty_byte(name_space: impl Into<String>, width: usize, height: usize) -> TypedRaster {
        TypedRaster::Byte(TypedPlane::filled_no_data(name_space, width, height, 255.0))
    }
}

/// Raw warped output for one granule, as returned by a worker.
///
/// `data` covers only the `data_width` x `data_height` sub-rectangle at
/// (`off_x`, `off_y`) of the `width` x `height` destination canvas; the
/// rest of the canvas is implicit no-data. Buffers move through the
/// pipeline by value and are dropped once merged.
#[derive(Debug, Clone)]
pub struct FlexRaster {
    pub config: ConfigPayload,
    pub data: Bytes,
    pub data_width: usize,
    pub data_height: usize,
    pub width: usize,
    pub height: usize,
    pub off_x: usize,
    pub off_y: usize,
    pub raster_type: RasterType,
    pub no_data: f64,
    pub name_space: String,
    pub var_name_space: String,
    pub time_stamp: f64,
    pub geom_mask: Option<Arc<Vec<i32>>>,
}

impl FlexRaster {
    /// Expand the worker sub-rectangle into a full typed canvas.
    pub fn to_canvas(&self) -> PipelineResult<TypedRaster> {
        fn expand<T: Sample>(flex: &FlexRaster) -> PipelineResult<TypedPlane<T>> {
            let size = T::TYPE.size_of();
            let expected = flex.data_width * flex.data_height * size;
            if flex.data.len() != expected {
                return Err(PipelineError::Worker(format!(
                    "raster buffer for {} is {} bytes, expected {}",
                    flex.name_space,
                    flex.data.len(),
                    expected
                )));
            }
            if flex.off_x + flex.data_width > flex.width
                || flex.off_y + flex.data_height > flex.height
            {
                return Err(PipelineError::Worker(format!(
                    "raster bbox [{}, {}, {}, {}] exceeds canvas {}x{}",
                    flex.off_x,
                    flex.off_y,
                    flex.data_width,
                    flex.data_height,
                    flex.width,
                    flex.height
                )));
            }

            let mut plane = TypedPlane::<T>::filled_no_data(
                flex.name_space.clone(),
                flex.width,
                flex.height,
                flex.no_data,
            );
            for row in 0..flex.data_height {
                let src_off = row * flex.data_width * size;
                let dst_off = (flex.off_y + row) * flex.width + flex.off_x;
                for col in 0..flex.data_width {
                    plane.data[dst_off + col] =
                        T::read_le(&flex.data[src_off + col * size..]);
                }
            }
            Ok(plane)
        }

        Ok(match self.raster_type {
            RasterType::SignedByte => TypedRaster::SignedByte(expand(self)?),
            RasterType::Byte => TypedRaster::Byte(expand(self)?),
            RasterType::Int16 => TypedRaster::Int16(expand(self)?),
            RasterType::UInt16 => TypedRaster::UInt16(expand(self)?),
            RasterType::Float32 => TypedRaster::Float32(expand(self)?),
        })
    }
}
