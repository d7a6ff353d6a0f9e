//! Vector kernel executor.
//!
//! A compiled kernel processes one output plane with two nested loops, eight
//! pixel lanes per horizontal step. Relative loads take the contiguous fast
//! path away from plane edges and fall back to per-lane gathers where the
//! boundary condition has to rewrite columns; ternary select and the logical
//! operators are lowered branch-free through lane masks.

use std::array::from_fn;

use wide::{f32x8, i32x8, CmpEq, CmpGe, CmpGt, CmpLe, CmpLt, CmpNe};

use crate::expr::{CmpOp, ConstKind, Imm, Op, OpKind};
use crate::ir::{FrameConsts, KernelProgram, PropAccess};
use crate::math::{f32_to_fp16, fp16_to_f32, vcos, vexp, vlog, vpow, vpow_int, vsin};
use crate::simd::{fmask, lane_indices, select, vfmod, vtrunc, Lanes, Value, LANES};
use crate::types::{BoundaryCondition, Format, SampleType};

/// One input plane handed to a kernel invocation.
#[derive(Debug, Clone, Copy)]
pub struct SrcPlane<'a> {
    pub data: &'a [u8],
    pub stride: usize,
}

struct IterCtx<'a, 'b> {
    srcs: &'a [SrcPlane<'b>],
    consts: &'a FrameConsts,
    x: usize,
    y: usize,
    width: usize,
    height: usize,
}

/// An executable kernel compiled for one expression and one set of plane
/// formats. Kernels are pure functions of their arguments and may be invoked
/// from any number of threads simultaneously.
#[derive(Debug)]
pub struct CompiledKernel {
    program: KernelProgram,
}

impl CompiledKernel {
    pub(crate) fn new(program: KernelProgram) -> Self {
        Self { program }
    }

    /// Property slots this kernel expects in `FrameConsts::props`, in order.
    pub fn prop_access(&self) -> &[PropAccess] {
        &self.program.prop_access
    }

    /// Processes one output plane. All strides must leave room for one full
    /// vector of samples past the last processed column; plane buffers
    /// allocated with 32-byte-aligned row sizes satisfy this.
    pub fn run(
        &self,
        dst: &mut [u8],
        dst_stride: usize,
        srcs: &[SrcPlane<'_>],
        consts: &FrameConsts,
        width: usize,
        height: usize,
    ) {
        debug_assert_eq!(srcs.len(), self.program.inputs.len());
        let mut stack: Vec<Value> = Vec::with_capacity(self.program.max_depth);
        let mut vars = vec![Value::from_int(i32x8::splat(0)); self.program.num_vars];
        for y in 0..height {
            let mut x = 0usize;
            while x < width {
                let ctx = IterCtx { srcs, consts, x, y, width, height };
                let res = self.eval(&mut stack, &mut vars, &ctx);
                self.store(dst, dst_stride, x, y, res);
                x += LANES;
            }
        }
    }

    fn eval(&self, stack: &mut Vec<Value>, vars: &mut [Value], ctx: &IterCtx<'_, '_>) -> Value {
        let p = &self.program;
        stack.clear();

        macro_rules! pop {
            () => {
                stack.pop().expect("stack depth was validated at compile time")
            };
        }
        macro_rules! binary_num {
            ($op:tt) => {{
                let r = pop!();
                let l = pop!();
                let v = if l.is_float() || r.is_float() || p.force_float {
                    Value::from_float(l.ensure_float() $op r.ensure_float())
                } else {
                    Value::from_int(l.ensure_int() $op r.ensure_int())
                };
                stack.push(v);
            }};
        }
        macro_rules! logic_op {
            ($op:tt) => {{
                let r = pop!();
                let l = pop!();
                let m = l.gt_zero_mask() $op r.gt_zero_mask();
                stack.push(Value::from_int(m & i32x8::splat(1)));
            }};
        }
        macro_rules! bitwise_op {
            ($op:tt) => {{
                let r = pop!();
                let l = pop!();
                stack.push(Value::from_int(l.ensure_int() $op r.ensure_int()));
            }};
        }
        macro_rules! unary_f {
            ($f:expr) => {{
                let v = pop!();
                stack.push(Value::from_float($f(v.ensure_float())));
            }};
        }

        for op in &p.ops {
            match op.kind {
                OpKind::Dup => {
                    let k = op.depth();
                    stack.push(stack[stack.len() - 1 - k]);
                }
                OpKind::Swap => {
                    let k = op.depth();
                    let top = stack.len() - 1;
                    stack.swap(top, top - k);
                }
                OpKind::Drop => {
                    let k = op.depth();
                    stack.truncate(stack.len() - k);
                }

                OpKind::Sort => {
                    let net = &p.networks[&op.depth()];
                    let len = stack.len();
                    for &(a, b) in net.iter() {
                        let ia = len - 1 - a;
                        let ib = len - 1 - b;
                        let lo = stack[ia].vmin(stack[ib]);
                        let hi = stack[ia].vmax(stack[ib]);
                        stack[ia] = lo;
                        stack[ib] = hi;
                    }
                }

                OpKind::MemLoad => {
                    let Imm::Clip(clip) = op.imm else { unreachable!() };
                    let lanes = self.mem_load(op, clip, ctx);
                    stack.push(promote_load(lanes, p.force_float));
                }
                OpKind::MemLoadVar => {
                    let Imm::Clip(clip) = op.imm else { unreachable!() };
                    let absy = pop!().ensure_int();
                    let absx = pop!().ensure_int();
                    let w = ctx.width as i32;
                    let h = ctx.height as i32;
                    let xs = absx.to_array().map(|v| v.clamp(0, w - 1));
                    let ys = absy.to_array().map(|v| v.clamp(0, h - 1));
                    let lanes = gather_vec(&ctx.srcs[clip], p.inputs[clip], &xs, &ys);
                    stack.push(promote_load(lanes, p.force_float));
                }

                OpKind::ConstantI => {
                    let Imm::Int(i) = op.imm else { unreachable!() };
                    stack.push(Value::const_int(i));
                }
                OpKind::ConstantF => {
                    let Imm::Float(f) = op.imm else { unreachable!() };
                    if f == (f as i32) as f32 {
                        stack.push(Value::const_int(f as i32));
                    } else {
                        stack.push(Value::const_float(f));
                    }
                }
                OpKind::ConstLoad => match op.imm {
                    Imm::Const(ConstKind::N) => stack.push(Value::from_int(i32x8::splat(ctx.consts.n))),
                    Imm::Const(ConstKind::X) => {
                        stack.push(Value::from_int(lane_indices() + i32x8::splat(ctx.x as i32)))
                    }
                    Imm::Const(ConstKind::Y) => stack.push(Value::from_int(i32x8::splat(ctx.y as i32))),
                    Imm::Const(ConstKind::Width) => {
                        stack.push(Value::from_int(i32x8::splat(ctx.width as i32)))
                    }
                    Imm::Const(ConstKind::Height) => {
                        stack.push(Value::from_int(i32x8::splat(ctx.height as i32)))
                    }
                    Imm::Prop { slot, .. } => {
                        stack.push(Value::from_float(f32x8::splat(ctx.consts.props[slot])))
                    }
                    _ => unreachable!("const load without const immediate"),
                },

                OpKind::VarLoad => {
                    let Imm::Slot(slot) = op.imm else { unreachable!() };
                    stack.push(vars[slot]);
                }
                OpKind::VarStore => {
                    let Imm::Slot(slot) = op.imm else { unreachable!() };
                    vars[slot] = pop!();
                }

                OpKind::Add => binary_num!(+),
                OpKind::Sub => binary_num!(-),
                OpKind::Mul => binary_num!(*),
                OpKind::Div => {
                    let r = pop!();
                    let l = pop!();
                    stack.push(Value::from_float(l.ensure_float() / r.ensure_float()));
                }
                OpKind::Mod => {
                    let r = pop!();
                    let l = pop!();
                    stack.push(Value::from_float(vfmod(l.ensure_float(), r.ensure_float())));
                }
                OpKind::Sqrt => unary_f!(|f: f32x8| f.max(f32x8::ZERO).sqrt()),
                OpKind::Abs => {
                    let v = pop!();
                    let out = if v.is_float() || p.force_float {
                        Value::from_float(v.ensure_float().abs())
                    } else {
                        Value::from_int(v.ensure_int().abs())
                    };
                    stack.push(out);
                }
                OpKind::Max => {
                    let r = pop!();
                    let l = pop!();
                    let v = if p.force_float && !l.is_float() && !r.is_float() {
                        Value::from_float(l.ensure_float().max(r.ensure_float()))
                    } else {
                        l.vmax(r)
                    };
                    stack.push(v);
                }
                OpKind::Min => {
                    let r = pop!();
                    let l = pop!();
                    let v = if p.force_float && !l.is_float() && !r.is_float() {
                        Value::from_float(l.ensure_float().min(r.ensure_float()))
                    } else {
                        l.vmin(r)
                    };
                    stack.push(v);
                }
                OpKind::Clamp => {
                    let max = pop!();
                    let min = pop!();
                    let x = pop!();
                    let any_float = x.is_float() || min.is_float() || max.is_float();
                    let v = if any_float || p.force_float {
                        Value::from_float(
                            x.ensure_float().min(max.ensure_float()).max(min.ensure_float()),
                        )
                    } else {
                        Value::from_int(x.ensure_int().min(max.ensure_int()).max(min.ensure_int()))
                    };
                    stack.push(v);
                }
                OpKind::Cmp => {
                    let Imm::Cmp(cmp) = op.imm else { unreachable!() };
                    let r = pop!();
                    let l = pop!();
                    let mask = if l.is_float() || r.is_float() {
                        let lf = l.ensure_float();
                        let rf = r.ensure_float();
                        fmask(match cmp {
                            CmpOp::Eq => lf.cmp_eq(rf),
                            CmpOp::Lt => lf.cmp_lt(rf),
                            CmpOp::Le => lf.cmp_le(rf),
                            CmpOp::Neq => lf.cmp_ne(rf),
                            CmpOp::Nlt => lf.cmp_ge(rf),
                            CmpOp::Nle => lf.cmp_gt(rf),
                        })
                    } else {
                        let li = l.ensure_int();
                        let ri = r.ensure_int();
                        match cmp {
                            CmpOp::Eq => li.cmp_eq(ri),
                            CmpOp::Lt => li.cmp_lt(ri),
                            CmpOp::Le => !ri.cmp_lt(li),
                            CmpOp::Neq => !li.cmp_eq(ri),
                            CmpOp::Nlt => !li.cmp_lt(ri),
                            CmpOp::Nle => ri.cmp_lt(li),
                        }
                    };
                    stack.push(Value::from_int(mask & i32x8::splat(1)));
                }

                OpKind::And => logic_op!(&),
                OpKind::Or => logic_op!(|),
                OpKind::Xor => logic_op!(^),
                OpKind::Not => {
                    let v = pop!();
                    let mask = match v.lanes {
                        Lanes::Float(f) => fmask(f.cmp_le(f32x8::ZERO)),
                        Lanes::Int(i) => !i.cmp_gt(i32x8::splat(0)),
                    };
                    stack.push(Value::from_int(mask & i32x8::splat(1)));
                }

                OpKind::BitAnd => bitwise_op!(&),
                OpKind::BitOr => bitwise_op!(|),
                OpKind::BitXor => bitwise_op!(^),
                OpKind::BitNot => {
                    let v = pop!();
                    stack.push(Value::from_int(!v.ensure_int()));
                }

                OpKind::Trunc => unary_f!(vtrunc),
                OpKind::Round => unary_f!(|f: f32x8| f.round()),
                OpKind::Floor => unary_f!(|f: f32x8| f.floor()),

                OpKind::Exp => unary_f!(vexp),
                OpKind::Log => unary_f!(vlog),
                OpKind::Pow => {
                    let r = pop!();
                    let l = pop!();
                    let v = match r.lanes {
                        Lanes::Int(iv) if r.constant => vpow_int(l.ensure_float(), iv.to_array()[0]),
                        _ => vpow(l.ensure_float(), r.ensure_float()),
                    };
                    stack.push(Value::from_float(v));
                }
                OpKind::Sin => unary_f!(vsin),
                OpKind::Cos => unary_f!(vcos),

                OpKind::Ternary => {
                    let f = pop!();
                    let t = pop!();
                    let c = pop!();
                    stack.push(select(c.gt_zero_mask(), t, f));
                }

                // Select-only operators never reach the vector compiler.
                OpKind::ArgMin | OpKind::ArgMax | OpKind::ArgSort => {
                    unreachable!("extended operator in vector kernel")
                }
            }
        }

        stack.pop().expect("validated program leaves one result value")
    }

    fn mem_load(&self, op: &Op, clip: usize, ctx: &IterCtx<'_, '_>) -> Lanes {
        let fmt = self.program.inputs[clip];
        let src = &ctx.srcs[clip];
        let w = ctx.width as i32;
        let h = ctx.height as i32;

        let yy = if op.dy == 0 {
            ctx.y
        } else if op.boundary == BoundaryCondition::Clamped {
            (ctx.y as i32 + op.dy).clamp(0, h - 1) as usize
        } else {
            mirror_coord(ctx.y as i32 + op.dy.clamp(-h, h), h) as usize
        };

        if op.dx == 0 {
            return load_vec(src, fmt, yy, ctx.x);
        }
        if op.boundary == BoundaryCondition::Clamped {
            let sx = ctx.x as i32 + op.dx;
            if sx >= 0 && sx + LANES as i32 <= w {
                return load_vec(src, fmt, yy, sx as usize);
            }
            // Lanes whose source column leaves the plane re-read the edge
            // column instead.
            let xs: [i32; LANES] = from_fn(|i| (ctx.x as i32 + i as i32 + op.dx).clamp(0, w - 1));
            return gather_vec(src, fmt, &xs, &[yy as i32; LANES]);
        }
        let cx = op.dx.clamp(-w, w);
        let xs: [i32; LANES] = from_fn(|i| mirror_coord(ctx.x as i32 + i as i32 + cx, w));
        gather_vec(src, fmt, &xs, &[yy as i32; LANES])
    }

    fn store(&self, dst: &mut [u8], dst_stride: usize, x: usize, y: usize, res: Value) {
        let fmt = self.program.output;
        let bps = fmt.bytes_per_sample as usize;
        let base = y * dst_stride + x * bps;
        match fmt.sample_type {
            SampleType::Integer => {
                let rounded = if res.is_float() {
                    let maxval = f32x8::splat(fmt.peak() as f32);
                    res.ensure_float().max(f32x8::ZERO).min(maxval).round_int()
                } else if fmt.bits_per_sample < 32 {
                    res.ensure_int().max(i32x8::splat(0)).min(i32x8::splat(fmt.peak() as i32))
                } else {
                    res.ensure_int()
                };
                let lanes = rounded.to_array();
                match bps {
                    1 => {
                        for (i, &v) in lanes.iter().enumerate() {
                            dst[base + i] = v as u8;
                        }
                    }
                    2 => {
                        for (i, &v) in lanes.iter().enumerate() {
                            dst[base + 2 * i..][..2].copy_from_slice(&(v as u16).to_ne_bytes());
                        }
                    }
                    _ => {
                        for (i, &v) in lanes.iter().enumerate() {
                            dst[base + 4 * i..][..4].copy_from_slice(&v.to_ne_bytes());
                        }
                    }
                }
            }
            SampleType::Float => {
                if bps == 2 {
                    let lanes = f32_to_fp16(res.ensure_float()).to_array();
                    for (i, &v) in lanes.iter().enumerate() {
                        dst[base + 2 * i..][..2].copy_from_slice(&(v as u16).to_ne_bytes());
                    }
                } else {
                    let lanes = res.ensure_float().to_array();
                    for (i, &v) in lanes.iter().enumerate() {
                        dst[base + 4 * i..][..4].copy_from_slice(&v.to_ne_bytes());
                    }
                }
            }
        }
    }
}

/// Reflects an out-of-range coordinate around the plane edges, then clamps
/// for the tail lanes that fall past the processed width.
fn mirror_coord(c: i32, n: i32) -> i32 {
    let c = if c < 0 {
        -1 - c
    } else if c >= n {
        2 * n - 1 - c
    } else {
        c
    };
    c.clamp(0, n - 1)
}

fn promote_load(lanes: Lanes, force_float: bool) -> Value {
    match lanes {
        Lanes::Int(v) if force_float => Value::from_float(v.round_float()),
        lanes => Value { lanes, constant: false },
    }
}

fn sample_bits(src: &SrcPlane<'_>, bps: usize, x: usize, y: usize) -> u32 {
    let off = y * src.stride + x * bps;
    match bps {
        1 => src.data[off] as u32,
        2 => u16::from_ne_bytes([src.data[off], src.data[off + 1]]) as u32,
        _ => u32::from_ne_bytes([
            src.data[off],
            src.data[off + 1],
            src.data[off + 2],
            src.data[off + 3],
        ]),
    }
}

/// Contiguous 8-lane load from one row, widening to the lane type.
fn load_vec(src: &SrcPlane<'_>, fmt: Format, y: usize, x: usize) -> Lanes {
    let bps = fmt.bytes_per_sample as usize;
    let bits: [u32; LANES] = from_fn(|i| sample_bits(src, bps, x + i, y));
    widen(bits, fmt)
}

/// Per-lane gather load at independent coordinates.
fn gather_vec(src: &SrcPlane<'_>, fmt: Format, xs: &[i32; LANES], ys: &[i32; LANES]) -> Lanes {
    let bps = fmt.bytes_per_sample as usize;
    let bits: [u32; LANES] = from_fn(|i| sample_bits(src, bps, xs[i] as usize, ys[i] as usize));
    widen(bits, fmt)
}

fn widen(bits: [u32; LANES], fmt: Format) -> Lanes {
    match (fmt.sample_type, fmt.bytes_per_sample) {
        (SampleType::Integer, _) => Lanes::Int(i32x8::from(bits.map(|b| b as i32))),
        (SampleType::Float, 2) => Lanes::Float(fp16_to_f32(i32x8::from(bits.map(|b| b as i32)))),
        (SampleType::Float, _) => Lanes::Float(f32x8::from(bits.map(f32::from_bits))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::types::{ColorFamily, VideoInfo};

    fn vi(format: Format, width: u32, height: u32) -> VideoInfo {
        VideoInfo {
            width,
            height,
            num_frames: 1,
            num_planes: 1,
            sub_sampling_w: 0,
            sub_sampling_h: 0,
            color_family: ColorFamily::Gray,
            format,
        }
    }

    fn padded_stride(width: usize, bps: usize) -> usize {
        width.div_ceil(LANES) * LANES * bps
    }

    fn run_u8(expr: &str, input: &[u8], width: usize, height: usize) -> Vec<u8> {
        let fmt = Format::new(SampleType::Integer, 8);
        let out = vi(fmt, width as u32, height as u32);
        let inputs = [out];
        let kernel = Compiler::new(expr, &out, &inputs, 0, false).compile().unwrap();

        let stride = padded_stride(width, 1);
        let mut src = vec![0u8; stride * height];
        for y in 0..height {
            src[y * stride..y * stride + width].copy_from_slice(&input[y * width..(y + 1) * width]);
        }
        let mut dst = vec![0u8; stride * height];
        kernel.run(
            &mut dst,
            stride,
            &[SrcPlane { data: &src, stride }],
            &FrameConsts { n: 0, props: Vec::new() },
            width,
            height,
        );
        let mut out_pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            out_pixels.extend_from_slice(&dst[y * stride..y * stride + width]);
        }
        out_pixels
    }

    #[test]
    fn test_constant_expression_fills_plane() {
        let out = run_u8("7", &[0; 20], 10, 2);
        assert_eq!(out, vec![7; 20]);
    }

    #[test]
    fn test_increment_plane() {
        let input: Vec<u8> = (0..24u8).collect();
        let out = run_u8("x 1 +", &input, 12, 2);
        let want: Vec<u8> = (1..25u8).collect();
        assert_eq!(out, want);
    }

    #[test]
    fn test_store_clamps_and_rounds() {
        let out = run_u8("x 300 +", &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9], 10, 1);
        assert_eq!(out, vec![255; 10]);
        let out = run_u8("0 x -", &[1; 10], 10, 1);
        assert_eq!(out, vec![0; 10]);
        let out = run_u8("x 0.5 +", &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9], 10, 1);
        // Round to nearest even on exact halves.
        assert_eq!(out, vec![0, 2, 2, 4, 4, 6, 6, 8, 8, 10]);
    }

    #[test]
    fn test_x_y_coordinates() {
        let out = run_u8("X Y 10 * +", &[0; 30], 10, 3);
        let want: Vec<u8> = (0..3).flat_map(|y| (0..10).map(move |x| (y * 10 + x) as u8)).collect();
        assert_eq!(out, want);
    }

    #[test]
    fn test_horizontal_clamp_boundary() {
        // Average of left neighbor, self, right neighbor with clamped edges;
        // 80/3 rounds to nearest on the 8-bit store.
        let out = run_u8("x x[-1,0] + x[1,0] + 3 /", &[10, 20, 30], 3, 1);
        assert_eq!(out, vec![13, 20, 27]);
    }

    #[test]
    fn test_horizontal_mirror_boundary() {
        // At column 0 the mirrored left neighbor is column 0 itself.
        let out = run_u8("x[-1,0]:m", &[10, 20, 30, 40, 50, 60, 70, 80, 90], 9, 1);
        assert_eq!(out, vec![10, 10, 20, 30, 40, 50, 60, 70, 80]);
        let out = run_u8("x[1,0]:m", &[10, 20, 30, 40, 50, 60, 70, 80, 90], 9, 1);
        assert_eq!(out, vec![20, 30, 40, 50, 60, 70, 80, 90, 90]);
    }

    #[test]
    fn test_vertical_offsets() {
        let input = vec![1u8, 1, 1, 2, 2, 2, 3, 3, 3];
        let out = run_u8("x[0,-1]", &input, 3, 3);
        assert_eq!(out, vec![1, 1, 1, 1, 1, 1, 2, 2, 2]);
        let out = run_u8("x[0,1]", &input, 3, 3);
        assert_eq!(out, vec![2, 2, 2, 3, 3, 3, 3, 3, 3]);
    }

    #[test]
    fn test_absolute_pixel_load() {
        // Every output pixel reads the sample at (1, 0).
        let out = run_u8("1 0 x[]", &[5, 9, 7, 3, 2, 8], 6, 1);
        assert_eq!(out, vec![9; 6]);
    }

    #[test]
    fn test_named_variables_persist_within_iteration() {
        let out = run_u8("x 2 * t! t@ t@ max", &[1, 2, 3, 4], 4, 1);
        assert_eq!(out, vec![2, 4, 6, 8]);
    }

    #[test]
    fn test_sort_network_on_lanes() {
        let out = run_u8("3 7 1 2 0 4 6 5 sort8 drop7", &[0; 8], 8, 1);
        assert_eq!(out, vec![7; 8]);
    }

    #[test]
    fn test_ternary_select() {
        let out = run_u8("x 2 > 100 50 ?", &[0, 1, 2, 3, 4, 5], 6, 1);
        assert_eq!(out, vec![50, 50, 50, 100, 100, 100]);
    }

    #[test]
    fn test_integer_mode_retains_exact_arithmetic() {
        let fmt = Format::new(SampleType::Integer, 16);
        let out_vi = vi(fmt, 8, 1);
        let inputs = [out_vi];
        let kernel = Compiler::new("x 3 * 2 +", &out_vi, &inputs, 1, false).compile().unwrap();
        let stride = padded_stride(8, 2);
        let mut src = vec![0u8; stride];
        for (i, v) in [1000u16, 2000, 3000, 4000, 5000, 6000, 7000, 8000].iter().enumerate() {
            src[i * 2..i * 2 + 2].copy_from_slice(&v.to_ne_bytes());
        }
        let mut dst = vec![0u8; stride];
        kernel.run(
            &mut dst,
            stride,
            &[SrcPlane { data: &src, stride }],
            &FrameConsts::default(),
            8,
            1,
        );
        let got: Vec<u16> = (0..8).map(|i| u16::from_ne_bytes([dst[i * 2], dst[i * 2 + 1]])).collect();
        assert_eq!(got, vec![3002, 6002, 9002, 12002, 15002, 18002, 21002, 24002]);
    }

    #[test]
    fn test_f32_plane_roundtrip() {
        let fmt = Format::new(SampleType::Float, 32);
        let out_vi = vi(fmt, 8, 1);
        let inputs = [out_vi];
        let kernel = Compiler::new("x 0.25 +", &out_vi, &inputs, 0, false).compile().unwrap();
        let stride = padded_stride(8, 4);
        let mut src = vec![0u8; stride];
        for i in 0..8 {
            src[i * 4..i * 4 + 4].copy_from_slice(&(i as f32).to_ne_bytes());
        }
        let mut dst = vec![0u8; stride];
        kernel.run(
            &mut dst,
            stride,
            &[SrcPlane { data: &src, stride }],
            &FrameConsts::default(),
            8,
            1,
        );
        for i in 0..8 {
            let v = f32::from_ne_bytes([dst[i * 4], dst[i * 4 + 1], dst[i * 4 + 2], dst[i * 4 + 3]]);
            assert_eq!(v, i as f32 + 0.25);
        }
    }

    #[test]
    fn test_fp16_plane_io() {
        let fmt = Format::new(SampleType::Float, 16);
        let out_vi = vi(fmt, 8, 1);
        let inputs = [out_vi];
        let kernel = Compiler::new("x 2 *", &out_vi, &inputs, 0, false).compile().unwrap();
        let stride = padded_stride(8, 2);
        let mut src = vec![0u8; stride];
        for i in 0..8 {
            let h = half::f16::from_f32(i as f32 * 0.5);
            src[i * 2..i * 2 + 2].copy_from_slice(&h.to_bits().to_ne_bytes());
        }
        let mut dst = vec![0u8; stride];
        kernel.run(
            &mut dst,
            stride,
            &[SrcPlane { data: &src, stride }],
            &FrameConsts::default(),
            8,
            1,
        );
        for i in 0..8 {
            let h = half::f16::from_bits(u16::from_ne_bytes([dst[i * 2], dst[i * 2 + 1]]));
            assert_eq!(h.to_f32(), i as f32);
        }
    }
}
