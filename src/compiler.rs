//! Compiler module: turns a decoded operation stream into an executable
//! kernel program.
//!
//! Compilation validates stack discipline and clip references, assigns dense
//! slots to frame properties and named variables, fills in the default
//! boundary condition, pre-builds sorting networks, and memoizes the result
//! in the process-wide cache under a structural key.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, OnceLock};

use rustc_hash::FxHashMap;

use crate::cache;
use crate::expr::{decode_token, tokenize, Imm, Op, OpKind};
use crate::ir::{KernelProgram, PropAccess, SortingNetwork};
use crate::kernel::CompiledKernel;
use crate::types::{BoundaryCondition, VideoInfo};
use crate::ExprError;

/// Opt bit 0: retain integer lanes where the operation permits it.
pub const FLAG_USE_INTEGER: u32 = 1 << 0;

pub struct Compiler<'a> {
    expr: &'a str,
    vo: &'a VideoInfo,
    vi: &'a [VideoInfo],
    opt_mask: u32,
    mirror: bool,
}

impl<'a> Compiler<'a> {
    pub fn new(expr: &'a str, vo: &'a VideoInfo, vi: &'a [VideoInfo], opt_mask: u32, mirror: bool) -> Self {
        Self { expr, vo, vi, opt_mask, mirror }
    }

    /// Structural key identifying a semantically equivalent compilation.
    pub fn key(&self) -> String {
        let mut key = format!(
            "n={}|opt={}|mirror={}|expr={}|vo={};",
            self.vi.len(),
            self.opt_mask,
            self.mirror as u8,
            self.expr,
            self.vo.format.name()
        );
        for (i, vi) in self.vi.iter().enumerate() {
            let _ = write!(key, "|vi{}={};", i, vi.format.name());
        }
        key
    }

    pub fn compile(&self) -> Result<Arc<CompiledKernel>, ExprError> {
        let key = self.key();
        if let Some(kernel) = cache::lookup(&key) {
            return Ok(kernel);
        }
        let program = self.build()?;
        log::debug!(
            "compiled kernel: {} ops, {} property slots, {} variables",
            program.ops.len(),
            program.prop_access.len(),
            program.num_vars
        );
        Ok(cache::insert(key, Arc::new(CompiledKernel::new(program))))
    }

    fn build(&self) -> Result<KernelProgram, ExprError> {
        let tokens = tokenize(self.expr);
        let mut ops = Vec::with_capacity(tokens.len());
        let default_bc = if self.mirror { BoundaryCondition::Mirrored } else { BoundaryCondition::Clamped };
        for tok in &tokens {
            let mut op = decode_token(tok, false)?;
            if op.boundary == BoundaryCondition::Unspecified {
                op.boundary = default_bc;
            }
            ops.push(op);
        }

        let prop_access = self.assign_prop_slots(&mut ops, &tokens)?;
        let num_vars = self.assign_var_slots(&mut ops, &tokens)?;
        let max_depth = self.validate(&ops, &tokens)?;

        let mut networks: FxHashMap<usize, Arc<SortingNetwork>> = FxHashMap::default();
        for op in &ops {
            if op.kind == OpKind::Sort {
                networks.entry(op.depth()).or_insert_with(|| sorting_network(op.depth()));
            }
        }

        Ok(KernelProgram {
            ops,
            prop_access,
            num_vars,
            force_float: self.opt_mask & FLAG_USE_INTEGER == 0,
            output: self.vo.format,
            inputs: self.vi.iter().map(|vi| vi.format).collect(),
            networks,
            max_depth,
        })
    }

    /// Assigns a dense slot to each distinct `(clip, property)` pair, in
    /// first-appearance order.
    fn assign_prop_slots(&self, ops: &mut [Op], tokens: &[&str]) -> Result<Vec<PropAccess>, ExprError> {
        let mut map: FxHashMap<(usize, String), usize> = FxHashMap::default();
        let mut access = Vec::new();
        for (op, tok) in ops.iter_mut().zip(tokens) {
            let Imm::Prop { clip, .. } = op.imm else { continue };
            if clip >= self.vi.len() {
                return Err(ExprError::Reference(format!("reference to undefined clip: {tok}")));
            }
            let next = map.len();
            let idx = *map.entry((clip, op.name.clone())).or_insert(next);
            if idx == access.len() {
                access.push(PropAccess { clip, name: op.name.clone() });
            }
            op.imm = Imm::Prop { clip, slot: idx };
        }
        Ok(access)
    }

    /// Assigns a dense slot to each named variable on first store. A load
    /// before any store is an error.
    fn assign_var_slots(&self, ops: &mut [Op], tokens: &[&str]) -> Result<usize, ExprError> {
        let mut map: FxHashMap<String, usize> = FxHashMap::default();
        for (op, tok) in ops.iter_mut().zip(tokens) {
            match op.kind {
                OpKind::VarStore => {
                    let next = map.len();
                    let idx = *map.entry(op.name.clone()).or_insert(next);
                    op.imm = Imm::Slot(idx);
                }
                OpKind::VarLoad => match map.get(&op.name) {
                    Some(&idx) => op.imm = Imm::Slot(idx),
                    None => {
                        return Err(ExprError::Reference(format!(
                            "reference to uninitialized variable: {tok}"
                        )))
                    }
                },
                _ => {}
            }
        }
        Ok(map.len())
    }

    /// Walks the stream with a virtual stack depth, checking the fixed arity
    /// of every operation and all clip references. Returns the deepest stack
    /// observed.
    fn validate(&self, ops: &[Op], tokens: &[&str]) -> Result<usize, ExprError> {
        let mut depth = 0usize;
        let mut max_depth = 0usize;
        for (op, tok) in ops.iter().zip(tokens) {
            let underflow =
                || ExprError::Stack(format!("insufficient values on stack: {tok}"));
            match op.kind {
                OpKind::MemLoad | OpKind::MemLoadVar => {
                    if let Imm::Clip(clip) = op.imm {
                        if clip >= self.vi.len() {
                            return Err(ExprError::Reference(format!(
                                "reference to undefined clip: {tok}"
                            )));
                        }
                    }
                    if op.kind == OpKind::MemLoadVar {
                        if depth < 2 {
                            return Err(underflow());
                        }
                        depth -= 1;
                    } else {
                        depth += 1;
                    }
                }
                OpKind::Dup | OpKind::Swap => {
                    if depth <= op.depth() {
                        return Err(underflow());
                    }
                    if op.kind == OpKind::Dup {
                        depth += 1;
                    }
                }
                OpKind::Drop | OpKind::Sort => {
                    if depth < op.depth() {
                        return Err(underflow());
                    }
                    if op.kind == OpKind::Drop {
                        depth -= op.depth();
                    }
                }
                OpKind::ArgMin | OpKind::ArgMax | OpKind::ArgSort => {
                    let k = op.depth();
                    if (op.kind != OpKind::ArgSort && k == 0) || depth < k {
                        return Err(underflow());
                    }
                    if op.kind != OpKind::ArgSort {
                        depth = depth - k + 1;
                    }
                }
                kind => {
                    let arity = fixed_arity(kind);
                    if depth < arity {
                        return Err(underflow());
                    }
                    depth -= arity;
                    if kind != OpKind::VarStore {
                        depth += 1;
                    }
                }
            }
            max_depth = max_depth.max(depth);
        }
        match depth {
            0 => Err(ExprError::Stack(format!("empty expression: {}", self.expr))),
            1 => Ok(max_depth),
            d => Err(ExprError::Stack(format!(
                "{d} unconsumed values on stack: {}",
                self.expr
            ))),
        }
    }
}

/// Operand count of operations with a fixed arity.
fn fixed_arity(kind: OpKind) -> usize {
    use OpKind::*;
    match kind {
        ConstantI | ConstantF | ConstLoad | VarLoad => 0,
        VarStore | Sqrt | Abs | Trunc | Round | Floor | Not | BitNot | Exp | Log | Sin | Cos => 1,
        Clamp | Ternary => 3,
        _ => 2,
    }
}

/// Builds (or fetches) the bitonic sorting network for `n` elements: ordered
/// comparator pairs of indices counted from the top of the stack.
pub fn sorting_network(n: usize) -> Arc<SortingNetwork> {
    static NETWORKS: OnceLock<Mutex<FxHashMap<usize, Arc<SortingNetwork>>>> = OnceLock::new();
    let memo = NETWORKS.get_or_init(Default::default);
    let mut guard = memo.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(net) = guard.get(&n) {
        return net.clone();
    }
    let net = Arc::new(build_network(n));
    guard.insert(n, net.clone());
    net
}

fn build_network(n: usize) -> SortingNetwork {
    let mut sn = SortingNetwork::new();
    if n < 2 {
        return sn;
    }
    let n = n as i64;
    let mut t = 0u32;
    while n > (1 << t) {
        t += 1;
    }
    let mut p: i64 = 1 << (t - 1);
    while p > 0 {
        let mut q: i64 = 1 << (t - 1);
        let mut r: i64 = 0;
        let mut d = p;
        while d > 0 {
            for i in 0..(n - d) {
                if (i & p) == r {
                    sn.push((i as usize, (i + d) as usize));
                }
            }
            d = q - p;
            q >>= 1;
            r = p;
        }
        p >>= 1;
    }
    sn
}
