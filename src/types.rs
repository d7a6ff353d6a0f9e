//! Types module: sample formats, video descriptors, and frame-property values.
//!
//! This module provides the descriptor types shared by the decoder, the
//! compiler, and the frame drivers.

use serde::{Deserialize, Serialize};

use crate::ExprError;

/// How the samples of a plane are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    Integer,
    Float,
}

/// Color family of a clip. `Compat` formats are packed legacy formats and are
/// rejected by every filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ColorFamily {
    Gray,
    Yuv,
    Rgb,
    Compat,
}

/// Per-plane sample format: sample type, significant bits, and storage width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Format {
    pub sample_type: SampleType,
    pub bits_per_sample: u32,
    pub bytes_per_sample: u32,
}

impl Format {
    pub fn new(sample_type: SampleType, bits_per_sample: u32) -> Self {
        let bytes_per_sample = match sample_type {
            SampleType::Integer if bits_per_sample <= 8 => 1,
            SampleType::Integer if bits_per_sample <= 16 => 2,
            SampleType::Integer => 4,
            SampleType::Float if bits_per_sample == 16 => 2,
            SampleType::Float => 4,
        };
        Self { sample_type, bits_per_sample, bytes_per_sample }
    }

    /// Accepted input formats: 8-16 bit or exactly 32 bit integer,
    /// 16 or 32 bit float.
    pub fn validate(&self) -> Result<(), ExprError> {
        let bits = self.bits_per_sample;
        let ok = match self.sample_type {
            SampleType::Integer => (8..=16).contains(&bits) || bits == 32,
            SampleType::Float => bits == 16 || bits == 32,
        };
        if ok {
            Ok(())
        } else {
            Err(ExprError::Shape(
                "input clips must be 8-16/32 bit integer or 16/32 bit float format".into(),
            ))
        }
    }

    /// Short descriptor used in the structural kernel-cache key.
    pub fn name(&self) -> String {
        let prefix = match self.sample_type {
            SampleType::Integer => "i",
            SampleType::Float => "f",
        };
        format!("{}{}", prefix, self.bits_per_sample)
    }

    /// Largest representable sample value for integer planes.
    pub fn peak(&self) -> u32 {
        debug_assert!(self.sample_type == SampleType::Integer);
        if self.bits_per_sample >= 32 {
            u32::MAX
        } else {
            (1u32 << self.bits_per_sample) - 1
        }
    }
}

/// Constant-format descriptor of one clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub num_frames: u32,
    pub num_planes: u32,
    pub sub_sampling_w: u32,
    pub sub_sampling_h: u32,
    pub color_family: ColorFamily,
    pub format: Format,
}

impl VideoInfo {
    /// Dimensions of a plane, accounting for chroma subsampling.
    pub fn plane_dimensions(&self, plane: u32) -> (u32, u32) {
        if plane == 0 {
            (self.width, self.height)
        } else {
            (self.width >> self.sub_sampling_w, self.height >> self.sub_sampling_h)
        }
    }

    /// Checks that `other` can be mixed with `self` in one expression:
    /// same dimensions, plane count, and subsampling.
    pub fn check_shape(&self, other: &VideoInfo) -> Result<(), ExprError> {
        if self.width != other.width
            || self.height != other.height
            || self.num_planes != other.num_planes
            || self.sub_sampling_w != other.sub_sampling_w
            || self.sub_sampling_h != other.sub_sampling_h
        {
            return Err(ExprError::Shape(
                "all inputs must have the same number of planes and the same dimensions, \
                 subsampling included"
                    .into(),
            ));
        }
        Ok(())
    }
}

/// A frame property value attached by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum PropValue {
    Int(i64),
    Float(f64),
    Data(Vec<u8>),
}

impl PropValue {
    /// Scalar view used by expressions: integers and floats convert directly,
    /// byte strings contribute their first byte.
    pub fn as_scalar(&self) -> Option<f32> {
        match self {
            PropValue::Int(i) => Some(*i as f32),
            PropValue::Float(f) => Some(*f as f32),
            PropValue::Data(d) => d.first().map(|&b| b as f32),
        }
    }
}

/// Rule applied when a relative pixel load falls outside the plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BoundaryCondition {
    #[default]
    Unspecified,
    Clamped,
    Mirrored,
}
