//! Vector math helpers: transcendentals and half-float conversions.
//!
//! One helper per transcendental, shared by every compiled kernel. The
//! polynomials are the classic single-precision minimax fits; `sin`/`cos`
//! reduce with a four-constant split of pi that keeps ~74 mantissa bits.

use wide::{f32x8, i32x8, CmpEq, CmpGe, CmpGt, CmpLe, CmpLt};

use crate::simd::{bits_float, float_bits, fmask};

#[allow(clippy::excessive_precision)]
mod consts {
    pub const EXP_HI: f32 = 88.3762626647949;
    pub const EXP_LO: f32 = -88.3762626647949;
    pub const LOG2E: f32 = 1.44269504088896341;
    pub const EXP_C1: f32 = 0.693359375;
    pub const EXP_C2: f32 = -2.12194440e-4;
    pub const EXP_P0: f32 = 1.9875691500E-4;
    pub const EXP_P1: f32 = 1.3981999507E-3;
    pub const EXP_P2: f32 = 8.3334519073E-3;
    pub const EXP_P3: f32 = 4.1665795894E-2;
    pub const EXP_P4: f32 = 1.6666665459E-1;
    pub const EXP_P5: f32 = 5.0000001201E-1;

    pub const SQRT_1_2: f32 = 0.707106781186547524;
    pub const LOG_P0: f32 = 7.0376836292E-2;
    pub const LOG_P1: f32 = -1.1514610310E-1;
    pub const LOG_P2: f32 = 1.1676998740E-1;
    pub const LOG_P3: f32 = -1.2420140846E-1;
    pub const LOG_P4: f32 = 1.4249322787E-1;
    pub const LOG_P5: f32 = -1.6668057665E-1;
    pub const LOG_P6: f32 = 2.0000714765E-1;
    pub const LOG_P7: f32 = -2.4999993993E-1;
    pub const LOG_P8: f32 = 3.3333331174E-1;
    pub const LOG_Q1: f32 = -2.12194440e-4;
    pub const LOG_Q2: f32 = 0.693359375;
}
use consts::*;

/// `e^x` via range reduction to `k*ln2 + r`, a degree-5 polynomial on `r`,
/// and the integer-bias trick to form `2^k`.
pub fn vexp(x: f32x8) -> f32x8 {
    let x = x.min(f32x8::splat(EXP_HI)).max(f32x8::splat(EXP_LO));
    let fx = f32x8::splat(LOG2E).mul_add(x, f32x8::splat(0.5));
    let emm0 = fx.round_int();
    let etmp = emm0.round_float();
    // Round toward minus infinity: back off one where rounding went up.
    let mask = bits_float(float_bits(f32x8::ONE) & fmask(etmp.cmp_gt(fx)));
    let fx = etmp - mask;
    let x = fx.mul_add(f32x8::splat(-EXP_C1), x);
    let x = fx.mul_add(f32x8::splat(-EXP_C2), x);
    let z = x * x;
    let y = f32x8::splat(EXP_P0);
    let y = y.mul_add(x, f32x8::splat(EXP_P1));
    let y = y.mul_add(x, f32x8::splat(EXP_P2));
    let y = y.mul_add(x, f32x8::splat(EXP_P3));
    let y = y.mul_add(x, f32x8::splat(EXP_P4));
    let y = y.mul_add(x, f32x8::splat(EXP_P5));
    let y = y.mul_add(z, x) + f32x8::ONE;
    let emm0 = fx.round_int() + i32x8::splat(0x7f);
    y * bits_float(emm0 << 23)
}

const MIN_NORM_POS: i32 = 0x0080_0000;
const INV_MANT_MASK: i32 = !0x7f80_0000;

/// Natural logarithm: split into exponent and mantissa by bit-fiddling, fit a
/// polynomial on the mantissa, recombine. Non-positive inputs yield NaN.
pub fn vlog(x: f32x8) -> f32x8 {
    let invalid_mask = fmask(x.cmp_le(f32x8::ZERO));
    let x = x.max(bits_float(i32x8::splat(MIN_NORM_POS)));
    let emm0i: i32x8 = (float_bits(x) >> 23) - i32x8::splat(0x7f);
    let x = bits_float(float_bits(x) & i32x8::splat(INV_MANT_MASK));
    let x = bits_float(float_bits(x) | float_bits(f32x8::splat(0.5)));
    let emm0 = emm0i.round_float() + f32x8::ONE;
    let mask = fmask(x.cmp_lt(f32x8::splat(SQRT_1_2)));
    let etmp = bits_float(mask & float_bits(x));
    let x = x - f32x8::ONE;
    let emm0 = emm0 - bits_float(mask & float_bits(f32x8::ONE));
    let x = x + etmp;
    let z = x * x;
    let y = f32x8::splat(LOG_P0);
    let y = y.mul_add(x, f32x8::splat(LOG_P1));
    let y = y.mul_add(x, f32x8::splat(LOG_P2));
    let y = y.mul_add(x, f32x8::splat(LOG_P3));
    let y = y.mul_add(x, f32x8::splat(LOG_P4));
    let y = y.mul_add(x, f32x8::splat(LOG_P5));
    let y = y.mul_add(x, f32x8::splat(LOG_P6));
    let y = y.mul_add(x, f32x8::splat(LOG_P7));
    let y = y.mul_add(x, f32x8::splat(LOG_P8));
    let y = y * x * z;
    let y = emm0.mul_add(f32x8::splat(LOG_Q1), y);
    let y = z.mul_add(f32x8::splat(-0.5), y);
    let x = x + y;
    let x = emm0.mul_add(f32x8::splat(LOG_Q2), x);
    bits_float(invalid_mask | float_bits(x))
}

#[inline]
fn cbits(u: u32) -> f32x8 {
    bits_float(i32x8::splat(u as i32))
}

fn sin_cos(x: f32x8, is_sin: bool) -> f32x8 {
    let abs_mask = i32x8::splat(0x7fff_ffff);
    let inv_pi = cbits(0x3ea2_f983);
    let pi1 = cbits(0x4049_0000);
    let pi2 = cbits(0x3a7d_a000);
    let pi3 = cbits(0x3422_2000);
    let pi4 = cbits(0x2cb4_611a);

    let mut sign = if is_sin { float_bits(x) & !abs_mask } else { i32x8::splat(0) };
    let t1 = x.abs();
    // Range reduction to [-pi/2, pi/2]; quadrant parity lands in the sign.
    let t2 = t1 * inv_pi;
    let t2i = t2.round_int();
    sign ^= t2i << 31;
    let t2 = t2i.round_float();
    let t1 = t2.mul_add(-pi1, t1);
    let t1 = t2.mul_add(-pi2, t1);
    let t1 = t2.mul_add(-pi3, t1);
    let t1 = t2.mul_add(-pi4, t1);

    let r = if is_sin {
        // x + x * x^2 * (C3 + x^2 * (C5 + x^2 * (C7 + x^2 * C9)))
        let sin_c3 = cbits(0xbe2a_aaa6);
        let sin_c5 = cbits(0x3c08_876a);
        let sin_c7 = cbits(0xb94f_b7ff);
        let sin_c9 = cbits(0x362e_def8);
        let t2 = t1 * t1;
        let t3 = t2.mul_add(sin_c9, sin_c7);
        let t3 = t3.mul_add(t2, sin_c5);
        let t3 = t3.mul_add(t2, sin_c3);
        t1 + t3 * t2 * t1
    } else {
        // 1 + x^2 * (C2 + x^2 * (C4 + x^2 * (C6 + x^2 * C8)))
        let cos_c2 = cbits(0xbeff_ffe2);
        let cos_c4 = cbits(0x3d2a_a73c);
        let cos_c6 = cbits(0xbab5_8d50);
        let cos_c8 = cbits(0x37c1_ad76);
        let t2 = t1 * t1;
        let t3 = t2.mul_add(cos_c8, cos_c6);
        let t3 = t3.mul_add(t2, cos_c4);
        let t3 = t3.mul_add(t2, cos_c2);
        t3.mul_add(t2, f32x8::ONE)
    };
    bits_float(sign ^ float_bits(r))
}

/// Sine via one-pi range reduction and a 5-term minimax polynomial.
pub fn vsin(x: f32x8) -> f32x8 {
    sin_cos(x, true)
}

/// Cosine via the same reduction as [`vsin`].
pub fn vcos(x: f32x8) -> f32x8 {
    sin_cos(x, false)
}

/// `x^y` as `exp(log(x) * y)`.
pub fn vpow(x: f32x8, y: f32x8) -> f32x8 {
    vexp(vlog(x) * y)
}

/// `x^n` for a compile-time integer exponent, by repeated squaring. Unlike
/// [`vpow`] this is defined for negative bases.
pub fn vpow_int(x: f32x8, n: i32) -> f32x8 {
    let mut base = x;
    let mut e = n.unsigned_abs();
    let mut acc = f32x8::ONE;
    while e > 0 {
        if e & 1 == 1 {
            acc = acc * base;
        }
        base = base * base;
        e >>= 1;
    }
    if n < 0 {
        f32x8::ONE / acc
    } else {
        acc
    }
}

/// binary16 -> binary32. Lanes hold zero-extended half bits. The magic
/// multiply rescales the exponent and keeps denormals exact; infinities and
/// NaNs are patched to a full exponent.
pub fn fp16_to_f32(h: i32x8) -> f32x8 {
    let magic = bits_float(i32x8::splat((254 - 15) << 23));
    let inf16 = bits_float(i32x8::splat((127 + 16) << 23));
    let sign = (h & i32x8::splat(0x8000)) << 16;
    let ti = (h & i32x8::splat(0x7fff)) << 13;
    let tf = bits_float(ti) * magic;
    let inf_mask = fmask(tf.cmp_ge(inf16)) & i32x8::splat(255 << 23);
    bits_float(float_bits(tf) | inf_mask | sign)
}

/// binary32 -> binary16 through the scaling-multiply fast path: the product
/// denormalizes half-denormal results (rounding them in hardware) and clamps
/// overflow to infinity. Lanes hold the half bits.
pub fn f32_to_fp16(x: f32x8) -> i32x8 {
    let f32_inf = i32x8::splat(255 << 23);
    let f16_max = bits_float(i32x8::splat((127 + 16) << 23));
    let magic = bits_float(i32x8::splat(15 << 23));
    let exp_adjust = i32x8::splat((255 ^ 31) << 23);
    let ti = float_bits(x);
    let sign = ti & i32x8::splat(i32::MIN);
    let ti = ti ^ sign;
    let sign = sign >> 16;
    let nan_mask = (ti & f32_inf).cmp_eq(f32_inf);
    let if_nan = ti ^ exp_adjust;
    let normal = float_bits(bits_float(ti).min(f16_max) * magic);
    let ti = (nan_mask & if_nan) | (!nan_mask & normal);
    ((ti >> 13) | sign) & i32x8::splat(0xffff)
}
