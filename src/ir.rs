//! Kernel program representation: the validated, slot-resolved form of an
//! expression that the vector executor runs.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::expr::Op;
use crate::types::Format;

/// Comparator pairs of a sorting network, indexed from the top of the stack.
pub type SortingNetwork = Vec<(usize, usize)>;

/// A `(clip, property name)` pair resolved to a dense constants slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropAccess {
    pub clip: usize,
    pub name: String,
}

/// Per-frame constants for one kernel invocation: the frame number plus one
/// float per resolved property slot, in slot order.
#[derive(Debug, Clone, Default)]
pub struct FrameConsts {
    pub n: i32,
    pub props: Vec<f32>,
}

/// A fully resolved kernel program. Property and variable references carry
/// dense slot indices, every memory load has a concrete boundary condition,
/// and the sorting networks for all `sort k` sizes are pre-built.
#[derive(Debug, Clone)]
pub struct KernelProgram {
    pub ops: Vec<Op>,
    pub prop_access: Vec<PropAccess>,
    pub num_vars: usize,
    /// When set, integer lanes are promoted to float on load and arithmetic
    /// never stays in integers (opt bit 0 cleared).
    pub force_float: bool,
    pub output: Format,
    pub inputs: Vec<Format>,
    pub networks: FxHashMap<usize, Arc<SortingNetwork>>,
    /// Deepest stack the validator observed; the executor preallocates this.
    pub max_depth: usize,
}
