//! SIMD value model: 8-lane vectors with a two-kind lane type.
//!
//! Every stack value in the vector kernel is either an integer-lane or a
//! float-lane vector. Promotion is explicit: `ensure_float` converts lanes,
//! `ensure_int` rounds to nearest even. The `constant` flag marks values that
//! came straight from a literal, which enables the integer-exponent `pow`
//! fast path.

use bytemuck::cast;
use wide::{f32x8, i32x8, CmpGt};

/// Pixel lanes processed per horizontal step.
pub const LANES: usize = 8;

/// Reinterprets float lanes as their bit patterns.
#[inline]
pub fn float_bits(v: f32x8) -> i32x8 {
    cast(v)
}

/// Reinterprets integer lanes as float bit patterns.
#[inline]
pub fn bits_float(v: i32x8) -> f32x8 {
    cast(v)
}

/// Integer mask from a float comparison result.
#[inline]
pub fn fmask(m: f32x8) -> i32x8 {
    cast(m)
}

/// The lane vector `[0, 1, 2, 3, 4, 5, 6, 7]` used to materialize `X`.
#[inline]
pub fn lane_indices() -> i32x8 {
    i32x8::from([0, 1, 2, 3, 4, 5, 6, 7])
}

#[derive(Debug, Clone, Copy)]
pub enum Lanes {
    Int(i32x8),
    Float(f32x8),
}

/// One stack value of the vector kernel.
#[derive(Debug, Clone, Copy)]
pub struct Value {
    pub lanes: Lanes,
    pub constant: bool,
}

impl Value {
    pub fn from_int(v: i32x8) -> Self {
        Value { lanes: Lanes::Int(v), constant: false }
    }

    pub fn from_float(v: f32x8) -> Self {
        Value { lanes: Lanes::Float(v), constant: false }
    }

    pub fn const_int(x: i32) -> Self {
        Value { lanes: Lanes::Int(i32x8::splat(x)), constant: true }
    }

    pub fn const_float(x: f32) -> Self {
        Value { lanes: Lanes::Float(f32x8::splat(x)), constant: true }
    }

    pub fn is_float(&self) -> bool {
        matches!(self.lanes, Lanes::Float(_))
    }

    /// Float lanes, converting integer lanes if necessary.
    pub fn ensure_float(self) -> f32x8 {
        match self.lanes {
            Lanes::Float(f) => f,
            Lanes::Int(i) => i.round_float(),
        }
    }

    /// Integer lanes, rounding float lanes to nearest even.
    pub fn ensure_int(self) -> i32x8 {
        match self.lanes {
            Lanes::Int(i) => i,
            Lanes::Float(f) => f.round_int(),
        }
    }

    /// Lane-wise minimum with the usual promotion rule.
    pub fn vmin(self, rhs: Value) -> Value {
        if self.is_float() || rhs.is_float() {
            Value::from_float(self.ensure_float().min(rhs.ensure_float()))
        } else {
            Value::from_int(self.ensure_int().min(rhs.ensure_int()))
        }
    }

    /// Lane-wise maximum with the usual promotion rule.
    pub fn vmax(self, rhs: Value) -> Value {
        if self.is_float() || rhs.is_float() {
            Value::from_float(self.ensure_float().max(rhs.ensure_float()))
        } else {
            Value::from_int(self.ensure_int().max(rhs.ensure_int()))
        }
    }

    /// Mask of lanes strictly greater than zero, the truth test shared by the
    /// logical operators and the ternary select.
    pub fn gt_zero_mask(self) -> i32x8 {
        match self.lanes {
            Lanes::Float(f) => fmask(f.cmp_gt(f32x8::ZERO)),
            Lanes::Int(i) => i.cmp_gt(i32x8::splat(0)),
        }
    }
}

/// Branch-free select: lanes where `mask` is set come from `t`, the rest from
/// `f`. The result stays integer-laned only when both branches are.
pub fn select(mask: i32x8, t: Value, f: Value) -> Value {
    if t.is_float() || f.is_float() {
        let tb = float_bits(t.ensure_float());
        let fb = float_bits(f.ensure_float());
        Value::from_float(bits_float((tb & mask) | (fb & !mask)))
    } else {
        Value::from_int((t.ensure_int() & mask) | (f.ensure_int() & !mask))
    }
}

/// Lane-wise float remainder with `fmod` semantics.
pub fn vfmod(a: f32x8, b: f32x8) -> f32x8 {
    let aa = a.to_array();
    let bb = b.to_array();
    f32x8::from(std::array::from_fn::<f32, LANES, _>(|i| aa[i] % bb[i]))
}

/// Truncation toward zero, preserving the sign bit.
pub fn vtrunc(x: f32x8) -> f32x8 {
    let sign = float_bits(x) & i32x8::splat(i32::MIN);
    bits_float(sign | float_bits(x.abs().floor()))
}
