//! Filter drivers: the `Expr`, `Select`, and `PropExpr` entry points.
//!
//! Each driver validates its inputs at construction, so kernel execution and
//! per-frame interpretation cannot fail; all setup errors surface prefixed
//! with the filter name.

use std::sync::Arc;

use crate::compiler::Compiler;
use crate::expr::{decode_expr, Op};
use crate::frame::Frame;
use crate::interp::interpret;
use crate::ir::FrameConsts;
use crate::kernel::{CompiledKernel, SrcPlane};
use crate::types::{ColorFamily, Format, PropValue, VideoInfo};
use crate::ExprError;

/// Per-plane processing decision for [`ExprFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneOp {
    /// Run the compiled kernel.
    Process,
    /// Copy the plane from input 0.
    Copy,
    /// Leave the plane unwritten.
    Undefined,
}

/// Optional `Expr` arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprOptions {
    /// Output format override; the input format is kept when unset.
    pub format: Option<Format>,
    /// Bit 0 retains integer lanes where possible. Other bits reserved.
    pub opt: u32,
    /// 0 clamps relative loads at plane edges, 1 mirrors. Per-token suffixes
    /// override.
    pub boundary: u32,
}

fn scalar_prop(frame: &Frame, name: &str) -> Option<f32> {
    frame.prop(name).and_then(PropValue::as_scalar)
}

fn check_inputs(inputs: &[VideoInfo]) -> Result<(), ExprError> {
    let Some(first) = inputs.first() else {
        return Err(ExprError::Shape("at least one input clip is required".into()));
    };
    for vi in inputs {
        if vi.color_family == ColorFamily::Compat {
            return Err(ExprError::Shape("no compat formats allowed".into()));
        }
        first.check_shape(vi)?;
        vi.format.validate()?;
    }
    Ok(())
}

/// Broadcasts `exprs` over `num_planes` planes: the last expression repeats
/// for the remaining planes.
fn broadcast_exprs(exprs: &[&str], num_planes: usize) -> Result<Vec<String>, ExprError> {
    if exprs.is_empty() {
        return Err(ExprError::Shape("at least one expression is required".into()));
    }
    if exprs.len() > num_planes {
        return Err(ExprError::Shape(
            "more expressions given than there are planes".into(),
        ));
    }
    let mut out: Vec<String> = exprs.iter().map(|e| e.to_string()).collect();
    while out.len() < num_planes {
        out.push(out[out.len() - 1].clone());
    }
    Ok(out)
}

/// Per-plane pixel evaluation over one or more input clips.
#[derive(Debug)]
pub struct ExprFilter {
    vi: VideoInfo,
    inputs: Vec<VideoInfo>,
    plane_op: Vec<PlaneOp>,
    kernels: Vec<Option<Arc<CompiledKernel>>>,
}

impl ExprFilter {
    pub fn new(inputs: &[VideoInfo], exprs: &[&str], options: &ExprOptions) -> Result<Self, ExprError> {
        Self::build(inputs, exprs, options).map_err(|e| e.named("Expr"))
    }

    fn build(inputs: &[VideoInfo], exprs: &[&str], options: &ExprOptions) -> Result<Self, ExprError> {
        check_inputs(inputs)?;
        let mut vi = inputs[0];
        if let Some(format) = options.format {
            format.validate()?;
            vi.format = format;
        }

        let exprs = broadcast_exprs(exprs, vi.num_planes as usize)?;
        let mut plane_op = Vec::with_capacity(exprs.len());
        let mut kernels = Vec::with_capacity(exprs.len());
        for expr in &exprs {
            if expr.is_empty() {
                // An omitted plane is copied when the output format matches
                // input 0 byte for byte, otherwise left undefined.
                let copyable = vi.format.bits_per_sample == inputs[0].format.bits_per_sample
                    && vi.format.sample_type == inputs[0].format.sample_type;
                plane_op.push(if copyable { PlaneOp::Copy } else { PlaneOp::Undefined });
                kernels.push(None);
                continue;
            }
            plane_op.push(PlaneOp::Process);
            let compiler = Compiler::new(expr, &vi, inputs, options.opt, options.boundary == 1);
            kernels.push(Some(compiler.compile()?));
        }

        Ok(Self { vi, inputs: inputs.to_vec(), plane_op, kernels })
    }

    /// Output clip descriptor.
    pub fn video_info(&self) -> &VideoInfo {
        &self.vi
    }

    pub fn plane_op(&self, plane: usize) -> PlaneOp {
        self.plane_op[plane]
    }

    /// Produces output frame `n` from the input frames for `n`, one per clip.
    pub fn process(&self, n: i32, srcs: &[&Frame]) -> Result<Frame, ExprError> {
        if srcs.len() != self.inputs.len() {
            return Err(ExprError::Shape(format!(
                "Expr: expected {} source frames, got {}",
                self.inputs.len(),
                srcs.len()
            )));
        }
        let mut out = Frame::alloc(&self.vi);
        for plane in 0..self.vi.num_planes as usize {
            match self.plane_op[plane] {
                PlaneOp::Copy => out.copy_plane_from(srcs[0], plane),
                PlaneOp::Undefined => {}
                PlaneOp::Process => {
                    let kernel = self.kernels[plane].as_ref().expect("kernel for processed plane");
                    let mut consts = FrameConsts { n, props: Vec::new() };
                    for pa in kernel.prop_access() {
                        let v = scalar_prop(srcs[pa.clip], &pa.name).unwrap_or_else(|| {
                            log::warn!("frame {n}: missing property {} on clip {}", pa.name, pa.clip);
                            f32::NAN
                        });
                        consts.props.push(v);
                    }
                    let src_planes: Vec<SrcPlane<'_>> =
                        srcs.iter().map(|f| f.plane(plane)).collect();
                    let (w, h) = self.vi.plane_dimensions(plane as u32);
                    let (dst, stride) = out.plane_mut(plane);
                    kernel.run(dst, stride, &src_planes, &consts, w as usize, h as usize);
                }
            }
        }
        Ok(out)
    }
}

/// Per-frame clip selection driven by frame properties.
#[derive(Debug)]
pub struct SelectFilter {
    vi: VideoInfo,
    num_src: usize,
    num_prop_inputs: usize,
    plane_ops: Vec<Vec<Op>>,
}

impl SelectFilter {
    pub fn new(src: &[VideoInfo], prop_src: &[VideoInfo], exprs: &[&str]) -> Result<Self, ExprError> {
        Self::build(src, prop_src, exprs).map_err(|e| e.named("Select"))
    }

    fn build(src: &[VideoInfo], prop_src: &[VideoInfo], exprs: &[&str]) -> Result<Self, ExprError> {
        check_inputs(src)?;
        let vi = src[0];
        for other in src {
            if other.format != vi.format {
                return Err(ExprError::Shape("all src inputs must have the same format".into()));
            }
            if other.num_frames != vi.num_frames {
                return Err(ExprError::Shape("all src inputs must be of the same length".into()));
            }
        }

        let exprs = broadcast_exprs(exprs, vi.num_planes as usize)?;
        let num_prop_inputs = prop_src.len();
        let mut plane_ops = Vec::with_capacity(exprs.len());
        for expr in &exprs {
            let ops = decode_expr(expr, true)?;
            // Dry-run: surfaces stack and reference errors at setup.
            interpret(
                &ops,
                0,
                vi.width,
                vi.height,
                -1,
                -1,
                &mut |_, _, _| Err(ExprError::Reference("unable to use pixel values in Select".into())),
                &mut |idx, _| {
                    if idx >= num_prop_inputs {
                        Err(ExprError::Reference("property access clip out of range".into()))
                    } else {
                        Ok(0.0)
                    }
                },
            )?;
            plane_ops.push(ops);
        }

        Ok(Self { vi, num_src: src.len(), num_prop_inputs, plane_ops })
    }

    pub fn video_info(&self) -> &VideoInfo {
        &self.vi
    }

    /// Evaluates the per-plane expressions for frame `n` and returns the
    /// chosen source-clip index per plane. A runtime interpretation error
    /// falls back to clip 0; results round to nearest and clamp into range.
    pub fn select(&self, n: i32, prop_frames: &[&Frame]) -> Vec<usize> {
        debug_assert_eq!(prop_frames.len(), self.num_prop_inputs);
        self.plane_ops
            .iter()
            .map(|ops| {
                let x = interpret(
                    &ops[..],
                    n,
                    self.vi.width,
                    self.vi.height,
                    -1,
                    -1,
                    &mut |_, _, _| Ok(0.0),
                    &mut |idx, name| Ok(scalar_prop(prop_frames[idx], name).unwrap_or(0.0)),
                )
                .unwrap_or(0.0);
                (x.round() as i32).clamp(0, self.num_src as i32 - 1) as usize
            })
            .collect()
    }

    /// Assembles output frame `n` by copying each plane from the selected
    /// source clip's frame. `srcs` holds frame `n` of every source clip.
    pub fn process(&self, n: i32, prop_frames: &[&Frame], srcs: &[&Frame]) -> Result<Frame, ExprError> {
        if srcs.len() != self.num_src {
            return Err(ExprError::Shape(format!(
                "Select: expected {} source frames, got {}",
                self.num_src,
                srcs.len()
            )));
        }
        let selected = self.select(n, prop_frames);
        let mut out = Frame::alloc(&self.vi);
        for (plane, &sel) in selected.iter().enumerate() {
            out.copy_plane_from(srcs[sel], plane);
        }
        Ok(out)
    }
}

/// A value supplied by the `PropExpr` dict callable: literal numbers pass
/// through as constants, strings are full expressions.
#[derive(Debug, Clone)]
pub enum DictValue {
    Int(i64),
    Float(f64),
    Expr(String),
}

impl DictValue {
    fn to_expr(&self) -> String {
        match self {
            DictValue::Int(i) => i.to_string(),
            DictValue::Float(f) => f.to_string(),
            DictValue::Expr(s) => s.clone(),
        }
    }
}

/// Recomputes frame properties per frame from property expressions.
#[derive(Debug)]
pub struct PropExprFilter {
    vi: VideoInfo,
    num_inputs: usize,
    ops: Vec<(String, Vec<Vec<Op>>)>,
}

impl PropExprFilter {
    /// `dict` is invoked once and yields the output property names, each with
    /// one expression per `frame_index % list_length`.
    pub fn new<F>(inputs: &[VideoInfo], dict: F) -> Result<Self, ExprError>
    where
        F: FnOnce() -> Result<Vec<(String, Vec<DictValue>)>, ExprError>,
    {
        Self::build(inputs, dict).map_err(|e| e.named("PropExpr"))
    }

    fn build<F>(inputs: &[VideoInfo], dict: F) -> Result<Self, ExprError>
    where
        F: FnOnce() -> Result<Vec<(String, Vec<DictValue>)>, ExprError>,
    {
        check_inputs(inputs)?;
        let vi = inputs[0];
        let num_inputs = inputs.len();

        let entries = dict().map_err(|e| ExprError::Parse(format!("dict evaluation failed: {e}")))?;
        let mut all_ops = Vec::with_capacity(entries.len());
        for (key, values) in entries {
            if values.is_empty() {
                return Err(ExprError::Shape(format!("no values given for key {key}")));
            }
            let mut per_frame = Vec::with_capacity(values.len());
            for value in &values {
                let expr = value.to_expr();
                if expr.is_empty() {
                    // An empty expression deletes the key on every frame.
                    per_frame.push(Vec::new());
                    continue;
                }
                let ops = decode_expr(&expr, true)?;
                interpret(
                    &ops,
                    0,
                    vi.width,
                    vi.height,
                    -1,
                    -1,
                    &mut |_, _, _| {
                        Err(ExprError::Reference(format!(
                            "{key}: unable to use pixel values in PropExpr"
                        )))
                    },
                    &mut |idx, _| {
                        if idx >= num_inputs {
                            Err(ExprError::Reference(format!(
                                "{key}: property access clip out of range"
                            )))
                        } else {
                            Ok(0.0)
                        }
                    },
                )?;
                per_frame.push(ops);
            }
            all_ops.push((key, per_frame));
        }

        Ok(Self { vi, num_inputs, ops: all_ops })
    }

    pub fn video_info(&self) -> &VideoInfo {
        &self.vi
    }

    /// Produces output frame `n`: the first input frame with the dict
    /// properties recomputed. Integral results are stored as integer
    /// properties, others as floats; runtime errors store 0.
    pub fn process(&self, n: i32, frames: &[&Frame]) -> Result<Frame, ExprError> {
        if frames.len() != self.num_inputs {
            return Err(ExprError::Shape(format!(
                "PropExpr: expected {} input frames, got {}",
                self.num_inputs,
                frames.len()
            )));
        }
        let mut out = frames[0].clone();
        for (name, per_frame) in &self.ops {
            let ops = &per_frame[n as usize % per_frame.len()];
            out.delete_prop(name);
            if ops.is_empty() {
                continue;
            }
            let v = interpret(
                ops,
                n,
                self.vi.width,
                self.vi.height,
                -1,
                -1,
                &mut |_, _, _| Ok(0.0),
                &mut |idx, prop| Ok(scalar_prop(frames[idx], prop).unwrap_or(0.0)),
            )
            .unwrap_or(0.0);
            if v == (v as i64) as f32 {
                out.set_prop(name.clone(), PropValue::Int(v as i64));
            } else {
                out.set_prop(name.clone(), PropValue::Float(v as f64));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleType;

    fn gray8(width: u32, height: u32) -> VideoInfo {
        VideoInfo {
            width,
            height,
            num_frames: 10,
            num_planes: 1,
            sub_sampling_w: 0,
            sub_sampling_h: 0,
            color_family: ColorFamily::Gray,
            format: Format::new(SampleType::Integer, 8),
        }
    }

    fn const_frame(vi: &VideoInfo, value: f32) -> Frame {
        let mut f = Frame::alloc(vi);
        for plane in 0..f.num_planes() {
            let (w, h) = f.dimensions(plane);
            for y in 0..h {
                for x in 0..w {
                    f.set_sample(plane, x, y, value);
                }
            }
        }
        f
    }

    #[test]
    fn test_expr_increment() {
        let vi = gray8(16, 4);
        let filter = ExprFilter::new(&[vi], &["x 1 +"], &ExprOptions::default()).unwrap();
        let src = const_frame(&vi, 0.0);
        let out = filter.process(0, &[&src]).unwrap();
        for y in 0..4 {
            for x in 0..16 {
                assert_eq!(out.sample(0, x, y), 1.0);
            }
        }
    }

    #[test]
    fn test_expr_error_prefixed_with_filter_name() {
        let vi = gray8(16, 4);
        let err = ExprFilter::new(&[vi], &["x bogus$"], &ExprOptions::default()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("Expr: "), "{msg}");
        assert!(msg.contains("bogus$"), "{msg}");
    }

    #[test]
    fn test_expr_empty_plane_policy() {
        let mut vi = gray8(16, 4);
        vi.num_planes = 3;
        let filter = ExprFilter::new(&[vi], &["x 1 +", ""], &ExprOptions::default()).unwrap();
        assert_eq!(filter.plane_op(0), PlaneOp::Process);
        assert_eq!(filter.plane_op(1), PlaneOp::Copy);
        // Broadcast repeats the last (empty) expression.
        assert_eq!(filter.plane_op(2), PlaneOp::Copy);

        // With a different output format the omitted planes become undefined.
        let opts = ExprOptions { format: Some(Format::new(SampleType::Float, 32)), ..Default::default() };
        let filter = ExprFilter::new(&[vi], &["x 1 +", ""], &opts).unwrap();
        assert_eq!(filter.plane_op(1), PlaneOp::Undefined);
    }

    #[test]
    fn test_expr_rejects_too_many_exprs() {
        let vi = gray8(16, 4);
        let err = ExprFilter::new(&[vi], &["x", "x", "x"], &ExprOptions::default()).unwrap_err();
        assert!(err.to_string().contains("more expressions"));
    }

    #[test]
    fn test_expr_rejects_compat() {
        let mut vi = gray8(16, 4);
        vi.color_family = ColorFamily::Compat;
        assert!(ExprFilter::new(&[vi], &["x"], &ExprOptions::default()).is_err());
    }

    #[test]
    fn test_expr_rejects_mismatched_inputs() {
        let a = gray8(16, 4);
        let b = gray8(8, 4);
        let err = ExprFilter::new(&[a, b], &["x y +"], &ExprOptions::default()).unwrap_err();
        assert!(matches!(err, ExprError::Filter { .. }));
    }

    #[test]
    fn test_expr_frame_property_constant() {
        let vi = gray8(16, 2);
        let filter = ExprFilter::new(&[vi], &["x._Gain"], &ExprOptions::default()).unwrap();
        let mut src = const_frame(&vi, 0.0);
        src.set_prop("_Gain", PropValue::Int(9));
        let out = filter.process(0, &[&src]).unwrap();
        assert_eq!(out.sample(0, 5, 1), 9.0);
    }

    #[test]
    fn test_select_by_scene_change() {
        let vi = gray8(8, 2);
        let filter = SelectFilter::new(&[vi, vi], &[vi], &["x._SceneChange"]).unwrap();

        let a = const_frame(&vi, 11.0);
        let b = const_frame(&vi, 22.0);
        let mut p0 = const_frame(&vi, 0.0);
        p0.set_prop("_SceneChange", PropValue::Int(0));
        let mut p1 = const_frame(&vi, 0.0);
        p1.set_prop("_SceneChange", PropValue::Int(1));

        let out0 = filter.process(0, &[&p0], &[&a, &b]).unwrap();
        assert_eq!(out0.sample(0, 0, 0), 11.0);
        let out1 = filter.process(1, &[&p1], &[&a, &b]).unwrap();
        assert_eq!(out1.sample(0, 0, 0), 22.0);
    }

    #[test]
    fn test_select_result_clamped() {
        let vi = gray8(8, 2);
        let filter = SelectFilter::new(&[vi, vi], &[vi], &["5"]).unwrap();
        let p = const_frame(&vi, 0.0);
        assert_eq!(filter.select(0, &[&p]), vec![1]);
        let filter = SelectFilter::new(&[vi, vi], &[vi], &["-3"]).unwrap();
        assert_eq!(filter.select(0, &[&p]), vec![0]);
    }

    #[test]
    fn test_select_rejects_pixel_access_at_setup() {
        let vi = gray8(8, 2);
        let err = SelectFilter::new(&[vi], &[vi], &["x 1 +"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("Select: "), "{msg}");
        assert!(msg.contains("pixel"), "{msg}");
    }

    #[test]
    fn test_select_rejects_prop_clip_out_of_range() {
        let vi = gray8(8, 2);
        let err = SelectFilter::new(&[vi], &[vi], &["y._Foo"]).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_select_missing_property_defaults_to_zero() {
        let vi = gray8(8, 2);
        let filter = SelectFilter::new(&[vi, vi], &[vi], &["x._Missing"]).unwrap();
        let p = const_frame(&vi, 0.0);
        assert_eq!(filter.select(0, &[&p]), vec![0]);
    }

    #[test]
    fn test_propexpr_duration() {
        let vi = gray8(8, 2);
        let filter = PropExprFilter::new(&[vi], || {
            Ok(vec![("_Dur".to_string(), vec![DictValue::Expr("N 1 +".into())])])
        })
        .unwrap();
        let src = const_frame(&vi, 0.0);
        for n in 0..3 {
            let out = filter.process(n, &[&src]).unwrap();
            assert_eq!(out.prop("_Dur"), Some(&PropValue::Int(n as i64 + 1)));
        }
    }

    #[test]
    fn test_propexpr_literals_and_lists() {
        let vi = gray8(8, 2);
        let filter = PropExprFilter::new(&[vi], || {
            Ok(vec![
                ("_A".to_string(), vec![DictValue::Int(7)]),
                ("_B".to_string(), vec![DictValue::Float(0.5)]),
                ("_C".to_string(), vec![DictValue::Int(1), DictValue::Int(2)]),
            ])
        })
        .unwrap();
        let src = const_frame(&vi, 0.0);
        let out = filter.process(0, &[&src]).unwrap();
        assert_eq!(out.prop("_A"), Some(&PropValue::Int(7)));
        assert_eq!(out.prop("_B"), Some(&PropValue::Float(0.5)));
        assert_eq!(out.prop("_C"), Some(&PropValue::Int(1)));
        // The list cycles with frame_index mod list_length.
        let out = filter.process(1, &[&src]).unwrap();
        assert_eq!(out.prop("_C"), Some(&PropValue::Int(2)));
        let out = filter.process(2, &[&src]).unwrap();
        assert_eq!(out.prop("_C"), Some(&PropValue::Int(1)));
    }

    #[test]
    fn test_propexpr_empty_expression_deletes_key() {
        let vi = gray8(8, 2);
        let filter = PropExprFilter::new(&[vi], || {
            Ok(vec![("_Gone".to_string(), vec![DictValue::Expr(String::new())])])
        })
        .unwrap();
        let mut src = const_frame(&vi, 0.0);
        src.set_prop("_Gone", PropValue::Int(1));
        let out = filter.process(0, &[&src]).unwrap();
        assert!(out.prop("_Gone").is_none());
    }

    #[test]
    fn test_propexpr_reads_input_properties() {
        let vi = gray8(8, 2);
        let filter = PropExprFilter::new(&[vi], || {
            Ok(vec![("_Double".to_string(), vec![DictValue::Expr("x._Level 2 *".into())])])
        })
        .unwrap();
        let mut src = const_frame(&vi, 0.0);
        src.set_prop("_Level", PropValue::Float(1.25));
        let out = filter.process(0, &[&src]).unwrap();
        assert_eq!(out.prop("_Double"), Some(&PropValue::Float(2.5)));
    }

    #[test]
    fn test_propexpr_error_prefixed() {
        let vi = gray8(8, 2);
        let err = PropExprFilter::new(&[vi], || {
            Ok(vec![("_Bad".to_string(), vec![DictValue::Expr("x 1 +".into())])])
        })
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("PropExpr: "), "{msg}");
    }
}
