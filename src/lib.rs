//! pixelexpr: a vectorized postfix pixel-expression engine for video frames.
//!
//! Expressions are written in reverse-Polish notation and computed per output
//! pixel from one or more input clips, frame constants, named variables, and
//! frame-level metadata. The engine tokenizes and validates an expression
//! once, compiles it into an 8-lane SIMD kernel memoized process-wide by a
//! structural key, and runs that kernel over whole planes. Expressions that
//! pick between clips per frame (`Select`) or compute frame metadata
//! (`PropExpr`) run on a scalar interpreter instead, which doubles as the
//! semantic reference for the kernel.
//!
//! # Example
//!
//! ```
//! use pixelexpr::{ColorFamily, ExprFilter, ExprOptions, Format, Frame, SampleType, VideoInfo};
//!
//! let vi = VideoInfo {
//!     width: 64,
//!     height: 32,
//!     num_frames: 10,
//!     num_planes: 1,
//!     sub_sampling_w: 0,
//!     sub_sampling_h: 0,
//!     color_family: ColorFamily::Gray,
//!     format: Format::new(SampleType::Integer, 8),
//! };
//! let filter = ExprFilter::new(&[vi], &["x 128 +"], &ExprOptions::default())?;
//! let src = Frame::alloc(&vi);
//! let out = filter.process(0, &[&src])?;
//! assert_eq!(out.sample(0, 0, 0), 128.0);
//! # Ok::<(), pixelexpr::ExprError>(())
//! ```

use thiserror::Error;

mod cache;
mod compiler;
mod expr;
mod filter;
mod frame;
mod interp;
mod ir;
mod kernel;
mod math;
mod simd;
mod types;

pub use compiler::{Compiler, FLAG_USE_INTEGER};
pub use expr::{decode_expr, decode_token, tokenize, CmpOp, ConstKind, Imm, Op, OpKind};
pub use filter::{DictValue, ExprFilter, ExprOptions, PlaneOp, PropExprFilter, SelectFilter};
pub use frame::{Frame, ALIGNMENT};
pub use interp::interpret;
pub use ir::{FrameConsts, KernelProgram, PropAccess};
pub use kernel::{CompiledKernel, SrcPlane};
pub use simd::LANES;
pub use types::{BoundaryCondition, ColorFamily, Format, PropValue, SampleType, VideoInfo};

/// Errors surfaced while setting up a filter or compiling an expression.
/// Kernel execution itself cannot fail.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExprError {
    /// Unknown token, malformed literal, or malformed shuffle prefix.
    #[error("parse error: {0}")]
    Parse(String),
    /// Undefined clip, use-before-store variable, or property clip out of
    /// range.
    #[error("reference error: {0}")]
    Reference(String),
    /// Stack underflow or unconsumed values at end of expression.
    #[error("stack error: {0}")]
    Stack(String),
    /// Input dimension or format mismatch, unsupported pixel format.
    #[error("shape error: {0}")]
    Shape(String),
    /// Any of the above, attributed to the filter that raised it.
    #[error("{filter}: {source}")]
    Filter {
        filter: &'static str,
        #[source]
        source: Box<ExprError>,
    },
}

impl ExprError {
    /// Attributes the error to a filter entry point, once.
    pub fn named(self, filter: &'static str) -> ExprError {
        match self {
            err @ ExprError::Filter { .. } => err,
            other => ExprError::Filter { filter, source: Box::new(other) },
        }
    }
}

/// Feature discovery: the backend identifier and the token sets supported by
/// `Expr` and `Select` expressions.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    pub expr_backend: &'static str,
    pub expr_features: &'static [&'static str],
    pub select_features: &'static [&'static str],
}

const EXPR_FEATURES: &[&str] = &[
    "x.property",
    "sin",
    "cos",
    "%",
    "clip",
    "clamp",
    "**",
    "N",
    "X",
    "Y",
    "pi",
    "width",
    "height",
    "trunc",
    "round",
    "floor",
    "var@",
    "var!",
    "x[x,y]",
    "x[x,y]:m",
    "drop",
    "sort",
    "x[]",
    "bitand",
    "bitor",
    "bitxor",
    "bitnot",
    "src0",
    "src26",
    "first-byte-of-bytes-property",
    "fp16",
];

const SELECT_FEATURES: &[&str] = &[
    "x.property",
    "sin",
    "cos",
    "%",
    "clip",
    "clamp",
    "**",
    "N",
    "pi",
    "width",
    "height",
    "trunc",
    "round",
    "floor",
    "var@",
    "var!",
    "drop",
    "sort",
    "bitand",
    "bitor",
    "bitxor",
    "bitnot",
    "src0",
    "src26",
    "first-byte-of-bytes-property",
    "argmin",
    "argmax",
    "argsort",
];

/// Publishes the backend name and supported token lists.
pub fn version() -> VersionInfo {
    VersionInfo {
        expr_backend: "simd",
        expr_features: EXPR_FEATURES,
        select_features: SELECT_FEATURES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_feature_lists() {
        let v = version();
        assert_eq!(v.expr_backend, "simd");
        assert!(v.expr_features.contains(&"x[x,y]:m"));
        assert!(v.expr_features.contains(&"fp16"));
        assert!(!v.expr_features.contains(&"argmin"));
        assert!(v.select_features.contains(&"argmin"));
        assert!(v.select_features.contains(&"argsort"));
        // Per-pixel tokens are not available in Select.
        assert!(!v.select_features.contains(&"X"));
        assert!(!v.select_features.contains(&"x[]"));
    }

    #[test]
    fn test_error_naming_is_idempotent() {
        let err = ExprError::Parse("bad token".into()).named("Expr").named("Select");
        assert_eq!(err.to_string(), "Expr: parse error: bad token");
    }

    #[test]
    fn test_end_to_end_two_clip_blend() {
        let vi = VideoInfo {
            width: 32,
            height: 8,
            num_frames: 1,
            num_planes: 1,
            sub_sampling_w: 0,
            sub_sampling_h: 0,
            color_family: ColorFamily::Gray,
            format: Format::new(SampleType::Integer, 8),
        };
        let filter = ExprFilter::new(&[vi, vi], &["x y + 2 /"], &ExprOptions::default()).unwrap();
        let mut a = Frame::alloc(&vi);
        let mut b = Frame::alloc(&vi);
        for x in 0..32 {
            for y in 0..8 {
                a.set_sample(0, x, y, 10.0);
                b.set_sample(0, x, y, 21.0);
            }
        }
        let out = filter.process(0, &[&a, &b]).unwrap();
        // (10 + 21) / 2 rounds to nearest even.
        assert_eq!(out.sample(0, 16, 4), 16.0);
    }
}
