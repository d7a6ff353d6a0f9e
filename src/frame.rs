//! Frame module: plane buffers and frame properties.
//!
//! Frames are the host-side aggregates the filters read and write. Rows are
//! allocated with 32-byte-aligned strides so kernels can always load and
//! store a full vector at the last processed column.

use rustc_hash::FxHashMap;
use wide::{f32x8, i32x8};

use crate::kernel::SrcPlane;
use crate::math::{f32_to_fp16, fp16_to_f32};
use crate::types::{Format, PropValue, SampleType, VideoInfo};

/// Plane row alignment guaranteed by [`Frame::alloc`].
pub const ALIGNMENT: usize = 32;

fn aligned_stride(width: u32, bytes_per_sample: u32) -> usize {
    let row = width as usize * bytes_per_sample as usize;
    row.div_ceil(ALIGNMENT) * ALIGNMENT
}

/// One video frame: per-plane sample buffers plus the frame property map.
#[derive(Debug, Clone)]
pub struct Frame {
    format: Format,
    planes: Vec<Vec<u8>>,
    strides: Vec<usize>,
    dims: Vec<(u32, u32)>,
    props: FxHashMap<String, PropValue>,
}

impl Frame {
    /// Allocates a zeroed frame laid out for `vi`.
    pub fn alloc(vi: &VideoInfo) -> Frame {
        let mut planes = Vec::with_capacity(vi.num_planes as usize);
        let mut strides = Vec::with_capacity(vi.num_planes as usize);
        let mut dims = Vec::with_capacity(vi.num_planes as usize);
        for p in 0..vi.num_planes {
            let (w, h) = vi.plane_dimensions(p);
            let stride = aligned_stride(w, vi.format.bytes_per_sample);
            planes.push(vec![0u8; stride * h as usize]);
            strides.push(stride);
            dims.push((w, h));
        }
        Frame { format: vi.format, planes, strides, dims, props: FxHashMap::default() }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    /// Width and height of one plane.
    pub fn dimensions(&self, plane: usize) -> (u32, u32) {
        self.dims[plane]
    }

    /// Read-only view of one plane.
    pub fn plane(&self, plane: usize) -> SrcPlane<'_> {
        SrcPlane { data: &self.planes[plane], stride: self.strides[plane] }
    }

    /// Writable buffer and stride of one plane.
    pub fn plane_mut(&mut self, plane: usize) -> (&mut [u8], usize) {
        let stride = self.strides[plane];
        (&mut self.planes[plane], stride)
    }

    /// Copies one plane wholesale from a layout-compatible frame.
    pub fn copy_plane_from(&mut self, src: &Frame, plane: usize) {
        debug_assert_eq!(self.dims[plane], src.dims[plane]);
        debug_assert_eq!(self.strides[plane], src.strides[plane]);
        self.planes[plane].copy_from_slice(&src.planes[plane]);
    }

    pub fn prop(&self, name: &str) -> Option<&PropValue> {
        self.props.get(name)
    }

    pub fn set_prop(&mut self, name: impl Into<String>, value: PropValue) {
        self.props.insert(name.into(), value);
    }

    pub fn delete_prop(&mut self, name: &str) {
        self.props.remove(name);
    }

    pub fn props(&self) -> &FxHashMap<String, PropValue> {
        &self.props
    }

    /// Reads one sample as a float, whatever the plane format.
    pub fn sample(&self, plane: usize, x: u32, y: u32) -> f32 {
        let bps = self.format.bytes_per_sample as usize;
        let off = y as usize * self.strides[plane] + x as usize * bps;
        let data = &self.planes[plane];
        let bits = match bps {
            1 => data[off] as u32,
            2 => u16::from_ne_bytes([data[off], data[off + 1]]) as u32,
            _ => u32::from_ne_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]]),
        };
        match (self.format.sample_type, bps) {
            (SampleType::Integer, _) => bits as f32,
            (SampleType::Float, 2) => fp16_to_f32(i32x8::splat(bits as i32)).to_array()[0],
            (SampleType::Float, _) => f32::from_bits(bits),
        }
    }

    /// Writes one sample from a float, rounding and clamping integer formats.
    pub fn set_sample(&mut self, plane: usize, x: u32, y: u32, value: f32) {
        let fmt = self.format;
        let bps = fmt.bytes_per_sample as usize;
        let off = y as usize * self.strides[plane] + x as usize * bps;
        let bits = match (fmt.sample_type, bps) {
            (SampleType::Integer, _) => {
                value.clamp(0.0, fmt.peak() as f32).round() as u32
            }
            (SampleType::Float, 2) => f32_to_fp16(f32x8::splat(value)).to_array()[0] as u32,
            (SampleType::Float, _) => value.to_bits(),
        };
        let data = &mut self.planes[plane];
        match bps {
            1 => data[off] = bits as u8,
            2 => data[off..off + 2].copy_from_slice(&(bits as u16).to_ne_bytes()),
            _ => data[off..off + 4].copy_from_slice(&bits.to_ne_bytes()),
        }
    }
}
