//! Scalar interpreter: the non-vectorized reference evaluator.
//!
//! Select and PropExpr evaluate their expressions here once per frame; the
//! same walk doubles as the executable semantic reference for the vector
//! kernel. All stack values are `f32`.

use rustc_hash::FxHashMap;

use crate::expr::{CmpOp, ConstKind, Imm, Op, OpKind};
use crate::ExprError;

/// Pixel-value callback. Select and PropExpr reject pixel access, so their
/// callbacks raise; the cross-check harness supplies real samples.
pub type PixelGet<'a> = dyn FnMut(&Op, i32, i32) -> Result<f32, ExprError> + 'a;

/// Frame-property callback, keyed by the property-source clip index and the
/// property name.
pub type PropGet<'a> = dyn FnMut(usize, &str) -> Result<f32, ExprError> + 'a;

fn underflow(needed: usize, depth: usize) -> ExprError {
    ExprError::Stack(format!(
        "stack underflow, expecting {needed} args, but only has {depth} elements left on stack"
    ))
}

fn check_stack(stack: &[f32], needed: usize) -> Result<(), ExprError> {
    if stack.len() < needed {
        Err(underflow(needed, stack.len()))
    } else {
        Ok(())
    }
}

/// Executes an operation stream over `f32` scalars and returns the single
/// remaining stack value.
#[allow(clippy::too_many_arguments)]
pub fn interpret(
    ops: &[Op],
    n: i32,
    width: u32,
    height: u32,
    y: i32,
    x: i32,
    pixel_get: &mut PixelGet<'_>,
    prop_get: &mut PropGet<'_>,
) -> Result<f32, ExprError> {
    let mut stack: Vec<f32> = Vec::new();
    let mut vars: FxHashMap<&str, f32> = FxHashMap::default();

    macro_rules! pop {
        () => {{
            check_stack(&stack, 1)?;
            stack.pop().unwrap()
        }};
    }
    macro_rules! pop2 {
        () => {{
            check_stack(&stack, 2)?;
            let r = stack.pop().unwrap();
            let l = stack.pop().unwrap();
            (l, r)
        }};
    }
    macro_rules! logic_op {
        ($op:tt) => {{
            let (l, r) = pop2!();
            let lb = l > 0.0;
            let rb = r > 0.0;
            stack.push(((lb $op rb) as i32) as f32);
        }};
    }
    macro_rules! bitwise_op {
        ($op:tt) => {{
            let (l, r) = pop2!();
            let li = l.round() as i32;
            let ri = r.round() as i32;
            stack.push((li $op ri) as f32);
        }};
    }

    for op in ops {
        match op.kind {
            OpKind::Dup => {
                let k = op.depth();
                if stack.len() <= k {
                    return Err(underflow(k + 1, stack.len()));
                }
                stack.push(stack[stack.len() - 1 - k]);
            }
            OpKind::Swap => {
                let k = op.depth();
                if stack.len() <= k {
                    return Err(underflow(k + 1, stack.len()));
                }
                let top = stack.len() - 1;
                stack.swap(top, top - k);
            }
            OpKind::Drop => {
                let k = op.depth();
                check_stack(&stack, k)?;
                stack.truncate(stack.len() - k);
            }

            OpKind::MemLoad | OpKind::MemLoadVar => {
                let v = pixel_get(op, y, x)?;
                stack.push(v);
            }

            OpKind::ConstantI => {
                if let Imm::Int(i) = op.imm {
                    stack.push(i as f32);
                }
            }
            OpKind::ConstantF => {
                if let Imm::Float(f) = op.imm {
                    stack.push(f);
                }
            }
            OpKind::ConstLoad => match op.imm {
                Imm::Const(ConstKind::N) => stack.push(n as f32),
                Imm::Const(ConstKind::X) => stack.push(x as f32),
                Imm::Const(ConstKind::Y) => stack.push(y as f32),
                Imm::Const(ConstKind::Width) => stack.push(width as f32),
                Imm::Const(ConstKind::Height) => stack.push(height as f32),
                Imm::Prop { clip, .. } => stack.push(prop_get(clip, &op.name)?),
                _ => unreachable!("const load without const immediate"),
            },

            OpKind::VarLoad => match vars.get(op.name.as_str()) {
                Some(&v) => stack.push(v),
                None => {
                    return Err(ExprError::Reference(format!(
                        "variable {} used before assignment",
                        op.name
                    )))
                }
            },
            OpKind::VarStore => {
                let v = pop!();
                vars.insert(op.name.as_str(), v);
            }

            OpKind::Add => {
                let (l, r) = pop2!();
                stack.push(l + r);
            }
            OpKind::Sub => {
                let (l, r) = pop2!();
                stack.push(l - r);
            }
            OpKind::Mul => {
                let (l, r) = pop2!();
                stack.push(l * r);
            }
            OpKind::Div => {
                let (l, r) = pop2!();
                stack.push(l / r);
            }
            OpKind::Mod => {
                let (l, r) = pop2!();
                stack.push(l % r);
            }
            OpKind::Sqrt => {
                let v = pop!();
                stack.push(v.max(0.0).sqrt());
            }
            OpKind::Abs => {
                let v = pop!();
                stack.push(v.abs());
            }
            OpKind::Max => {
                let (l, r) = pop2!();
                stack.push(l.max(r));
            }
            OpKind::Min => {
                let (l, r) = pop2!();
                stack.push(l.min(r));
            }
            OpKind::Clamp => {
                check_stack(&stack, 3)?;
                let max = stack.pop().unwrap();
                let min = stack.pop().unwrap();
                let v = stack.pop().unwrap();
                stack.push(v.min(max).max(min));
            }
            OpKind::Cmp => {
                let (l, r) = pop2!();
                let x = match op.imm {
                    Imm::Cmp(CmpOp::Eq) => l == r,
                    Imm::Cmp(CmpOp::Lt) => l < r,
                    Imm::Cmp(CmpOp::Le) => l <= r,
                    Imm::Cmp(CmpOp::Neq) => l != r,
                    Imm::Cmp(CmpOp::Nlt) => l >= r,
                    Imm::Cmp(CmpOp::Nle) => l > r,
                    _ => unreachable!("comparison without selector"),
                };
                stack.push((x as i32) as f32);
            }

            OpKind::Trunc => {
                let v = pop!();
                stack.push(v.trunc());
            }
            OpKind::Round => {
                let v = pop!();
                stack.push(v.round());
            }
            OpKind::Floor => {
                let v = pop!();
                stack.push(v.floor());
            }

            OpKind::And => logic_op!(&),
            OpKind::Or => logic_op!(|),
            OpKind::Xor => logic_op!(^),
            OpKind::Not => {
                let v = pop!();
                stack.push(((v <= 0.0) as i32) as f32);
            }

            OpKind::BitAnd => bitwise_op!(&),
            OpKind::BitOr => bitwise_op!(|),
            OpKind::BitXor => bitwise_op!(^),
            OpKind::BitNot => {
                let v = pop!();
                stack.push(!(v.round() as i32) as f32);
            }

            OpKind::Exp => {
                let v = pop!();
                stack.push(v.exp());
            }
            OpKind::Log => {
                let v = pop!();
                stack.push(v.ln());
            }
            OpKind::Pow => {
                let (l, r) = pop2!();
                stack.push(l.powf(r));
            }
            OpKind::Sin => {
                let v = pop!();
                stack.push(v.sin());
            }
            OpKind::Cos => {
                let v = pop!();
                stack.push(v.cos());
            }

            OpKind::Ternary => {
                check_stack(&stack, 3)?;
                let f = stack.pop().unwrap();
                let t = stack.pop().unwrap();
                let c = stack.pop().unwrap();
                stack.push(if c > 0.0 { t } else { f });
            }

            OpKind::Sort => {
                let k = op.depth();
                check_stack(&stack, k)?;
                let off = stack.len() - k;
                stack[off..].sort_unstable_by(|l, r| r.total_cmp(l));
            }
            OpKind::ArgMin | OpKind::ArgMax => {
                let k = op.depth();
                if k == 0 {
                    return Err(underflow(1, 0));
                }
                check_stack(&stack, k)?;
                let off = stack.len() - k;
                let mut idx = 0usize;
                let mut cur = stack[off];
                for (i, &v) in stack[off..].iter().enumerate().skip(1) {
                    let better = match op.kind {
                        OpKind::ArgMin => v < cur,
                        _ => v > cur,
                    };
                    if better {
                        cur = v;
                        idx = i;
                    }
                }
                stack.truncate(off);
                stack.push(idx as f32);
            }
            OpKind::ArgSort => {
                let k = op.depth();
                check_stack(&stack, k)?;
                let off = stack.len() - k;
                let mut idxs: Vec<usize> = (0..k).collect();
                idxs.sort_by(|&l, &r| stack[off + r].total_cmp(&stack[off + l]));
                for (i, idx) in idxs.into_iter().enumerate() {
                    stack[off + i] = idx as f32;
                }
            }
        }
    }

    match stack.len() {
        0 => Err(ExprError::Stack("empty expression".into())),
        1 => Ok(stack[0]),
        d => Err(ExprError::Stack(format!("unconsumed {d} values on stack"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::decode_expr;

    fn eval(expr: &str) -> Result<f32, ExprError> {
        let ops = decode_expr(expr, true)?;
        interpret(
            &ops,
            0,
            640,
            480,
            -1,
            -1,
            &mut |_, _, _| Err(ExprError::Reference("no pixels".into())),
            &mut |_, _| Ok(0.0),
        )
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 2 +").unwrap(), 3.0);
        assert_eq!(eval("10 4 -").unwrap(), 6.0);
        assert_eq!(eval("3 4 *").unwrap(), 12.0);
        assert_eq!(eval("1 2 /").unwrap(), 0.5);
        assert_eq!(eval("7 3 %").unwrap(), 1.0);
        assert_eq!(eval("-7 3 %").unwrap(), -1.0);
    }

    #[test]
    fn test_sqrt_of_negative_is_zero() {
        assert_eq!(eval("-4 sqrt").unwrap(), 0.0);
        assert_eq!(eval("9 sqrt").unwrap(), 3.0);
    }

    #[test]
    fn test_comparisons_push_zero_or_one() {
        assert_eq!(eval("1 2 <").unwrap(), 1.0);
        assert_eq!(eval("2 1 <").unwrap(), 0.0);
        assert_eq!(eval("2 2 =").unwrap(), 1.0);
        assert_eq!(eval("2 2 >=").unwrap(), 1.0);
        assert_eq!(eval("2 3 >").unwrap(), 0.0);
        assert_eq!(eval("3 3 <=").unwrap(), 1.0);
    }

    #[test]
    fn test_logic() {
        assert_eq!(eval("1 1 and").unwrap(), 1.0);
        assert_eq!(eval("1 0 and").unwrap(), 0.0);
        assert_eq!(eval("0 1 or").unwrap(), 1.0);
        assert_eq!(eval("1 1 xor").unwrap(), 0.0);
        assert_eq!(eval("0 not").unwrap(), 1.0);
        assert_eq!(eval("0.5 not").unwrap(), 0.0);
        // Only strictly positive values are true.
        assert_eq!(eval("-3 1 and").unwrap(), 0.0);
    }

    #[test]
    fn test_bitwise_rounds_operands() {
        assert_eq!(eval("6 3 bitand").unwrap(), 2.0);
        assert_eq!(eval("6 3 bitor").unwrap(), 7.0);
        assert_eq!(eval("6 3 bitxor").unwrap(), 5.0);
        assert_eq!(eval("0 bitnot").unwrap(), -1.0);
        // 2.5 rounds to nearest before conversion.
        assert_eq!(eval("2.6 2 bitand").unwrap(), 2.0);
    }

    #[test]
    fn test_ternary() {
        assert_eq!(eval("1 10 20 ?").unwrap(), 10.0);
        assert_eq!(eval("0 10 20 ?").unwrap(), 20.0);
        assert_eq!(eval("-1 10 20 ?").unwrap(), 20.0);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(eval("5 0 3 clamp").unwrap(), 3.0);
        assert_eq!(eval("-1 0 3 clamp").unwrap(), 0.0);
        assert_eq!(eval("2 0 3 clip").unwrap(), 2.0);
    }

    #[test]
    fn test_stack_shuffles() {
        assert_eq!(eval("3 dup +").unwrap(), 6.0);
        assert_eq!(eval("1 2 swap -").unwrap(), 1.0);
        assert_eq!(eval("1 2 drop").unwrap(), 1.0);
        assert_eq!(eval("1 2 3 dup2 drop3").unwrap(), 1.0);
    }

    #[test]
    fn test_sort_descending_from_bottom() {
        // The deepest of the sorted run holds the largest value.
        assert_eq!(eval("3 7 1 2 0 4 6 5 sort8 drop7").unwrap(), 7.0);
        assert_eq!(eval("3 7 1 sort3 drop2").unwrap(), 7.0);
        assert_eq!(eval("3 7 1 sort3 swap2 drop2").unwrap(), 1.0);
    }

    #[test]
    fn test_argmin_argmax() {
        assert_eq!(eval("5 1 3 argmin3").unwrap(), 1.0);
        assert_eq!(eval("5 1 3 argmax3").unwrap(), 0.0);
        // Ties break toward the lowest index.
        assert_eq!(eval("2 2 1 argmax3").unwrap(), 0.0);
        assert_eq!(eval("1 1 2 argmin3").unwrap(), 0.0);
    }

    #[test]
    fn test_argsort_stable() {
        // Values 5 1 3: descending order references indices 0, 2, 1.
        assert_eq!(eval("5 1 3 argsort3 drop2").unwrap(), 0.0);
        assert_eq!(eval("5 1 3 argsort3 drop1 swap1 drop1").unwrap(), 2.0);
        assert_eq!(eval("5 1 3 argsort3 swap2 drop2").unwrap(), 1.0);
    }

    #[test]
    fn test_named_variables() {
        assert_eq!(eval("3 v! v@ v@ *").unwrap(), 9.0);
        assert!(matches!(eval("v@"), Err(ExprError::Reference(_))));
    }

    #[test]
    fn test_transcendentals_match_std() {
        assert!((eval("1 exp").unwrap() - 1f32.exp()).abs() < 1e-6);
        assert!((eval("2.5 log").unwrap() - 2.5f32.ln()).abs() < 1e-6);
        assert!((eval("2 10 pow").unwrap() - 1024.0).abs() < 1e-2);
        assert!((eval("1 sin").unwrap() - 1f32.sin()).abs() < 1e-6);
        assert!((eval("1 cos").unwrap() - 1f32.cos()).abs() < 1e-6);
    }

    #[test]
    fn test_stack_underflow() {
        assert!(matches!(eval("+"), Err(ExprError::Stack(_))));
        assert!(matches!(eval("1 +"), Err(ExprError::Stack(_))));
        assert!(matches!(eval("1 dup1"), Err(ExprError::Stack(_))));
    }

    #[test]
    fn test_end_of_stream_discipline() {
        assert!(matches!(eval(""), Err(ExprError::Stack(_))));
        assert!(matches!(eval("1 2"), Err(ExprError::Stack(_))));
    }

    #[test]
    fn test_frame_constants() {
        let ops = decode_expr("N width height + +", false).unwrap();
        let v = interpret(
            &ops,
            7,
            640,
            480,
            -1,
            -1,
            &mut |_, _, _| Ok(0.0),
            &mut |_, _| Ok(0.0),
        )
        .unwrap();
        assert_eq!(v, 7.0 + 640.0 + 480.0);
    }

    #[test]
    fn test_property_callback() {
        let ops = decode_expr("x._Combed 2 *", true).unwrap();
        let v = interpret(
            &ops,
            0,
            8,
            8,
            -1,
            -1,
            &mut |_, _, _| Ok(0.0),
            &mut |clip, name| {
                assert_eq!(clip, 0);
                assert_eq!(name, "_Combed");
                Ok(21.0)
            },
        )
        .unwrap();
        assert_eq!(v, 42.0);
    }
}
