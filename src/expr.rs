//! Expression front-end: tokenizer and token decoder.
//!
//! Expressions are written in postfix form and split on ASCII whitespace.
//! Each token decodes to exactly one [`Op`] record; the decoder tries the
//! fixed operator table first, then the clip-name, variable, stack-shuffle,
//! frame-property and pixel-access patterns, and finally numeric literals.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::BoundaryCondition;
use crate::ExprError;

/// Prefix accepted for numbered clip names (`src0`, `src1`, ...).
pub const CLIP_NAME_PREFIX: &str = "src";

/// Operation kinds. `ArgMin`/`ArgMax`/`ArgSort` are only decoded when the
/// caller admits extended operators (Select expressions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    // Terminals.
    MemLoad,
    MemLoadVar,
    ConstantI,
    ConstantF,
    ConstLoad,
    VarLoad,
    VarStore,

    // Arithmetic primitives.
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Sqrt,
    Abs,
    Max,
    Min,
    Clamp,
    Cmp,

    // Integer conversions.
    Trunc,
    Round,
    Floor,

    // Logical operators.
    And,
    Or,
    Xor,
    Not,

    // Bitwise operators.
    BitAnd,
    BitOr,
    BitXor,
    BitNot,

    // Transcendental functions.
    Exp,
    Log,
    Pow,
    Sin,
    Cos,

    // Ternary operator.
    Ternary,

    // Rank-order operator.
    Sort,

    // Stack helpers.
    Dup,
    Swap,
    Drop,

    // Extended operators, Select only.
    ArgMin,
    ArgMax,
    ArgSort,
}

/// Comparison selector carried by [`OpKind::Cmp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Lt,
    Le,
    Neq,
    Nlt,
    Nle,
}

/// Named frame-level constants loaded by [`OpKind::ConstLoad`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstKind {
    N,
    X,
    Y,
    Width,
    Height,
}

/// Immediate payload of an operation; exactly one interpretation is live for
/// any given [`OpKind`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Imm {
    None,
    /// Integer constant.
    Int(i32),
    /// Float constant.
    Float(f32),
    /// Clip id for pixel loads.
    Clip(usize),
    /// Named frame constant.
    Const(ConstKind),
    /// Frame-property access; `slot` is assigned densely by the compiler.
    Prop { clip: usize, slot: usize },
    /// Named-variable slot, assigned densely by the compiler.
    Slot(usize),
    /// Comparison selector.
    Cmp(CmpOp),
    /// Stack-depth index for `dup`/`swap`/`drop`/`sort`/`arg*`.
    Depth(usize),
}

/// One decoded operation. Equality is structural over all fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    pub kind: OpKind,
    pub imm: Imm,
    /// Identifier of a named variable or frame property; empty otherwise.
    pub name: String,
    /// Signed relative pixel offsets for memory loads.
    pub dx: i32,
    pub dy: i32,
    pub boundary: BoundaryCondition,
}

impl Op {
    pub fn new(kind: OpKind) -> Self {
        Self::with_imm(kind, Imm::None)
    }

    pub fn with_imm(kind: OpKind, imm: Imm) -> Self {
        Op { kind, imm, name: String::new(), dx: 0, dy: 0, boundary: BoundaryCondition::Unspecified }
    }

    fn named(kind: OpKind, imm: Imm, name: &str) -> Self {
        Op { name: name.to_string(), ..Self::with_imm(kind, imm) }
    }

    /// Depth index of a stack-shuffle or rank-order operation.
    pub fn depth(&self) -> usize {
        match self.imm {
            Imm::Depth(k) => k,
            _ => 0,
        }
    }
}

/// Splits an expression on ASCII whitespace, preserving token order. Empty
/// runs yield no token.
pub fn tokenize(expr: &str) -> Vec<&str> {
    expr.split_ascii_whitespace().collect()
}

fn clip_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-z]|src[0-9]+)$").expect("clip name pattern"))
}

fn rel_pixel_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([a-z]|src[0-9]+)\[(-?[0-9]+),(-?[0-9]+)\](:[cm])?$").expect("relative pixel pattern")
    })
}

fn abs_pixel_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-z]|src[0-9]+)\[\]$").expect("absolute pixel pattern"))
}

fn frame_prop_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-z]|src[0-9]+)\.([^\[\]]*)$").expect("frame property pattern"))
}

/// Maps a clip name to its id: single letters run `x y z a b c ...`, the
/// `src` prefix carries an explicit index.
fn extract_clip_id(name: &str) -> Result<usize, ExprError> {
    if name.len() == 1 {
        let c = name.as_bytes()[0];
        return Ok(if c >= b'x' { (c - b'x') as usize } else { (c - b'a') as usize + 3 });
    }
    name[CLIP_NAME_PREFIX.len()..]
        .parse::<usize>()
        .map_err(|_| ExprError::Parse(format!("invalid clip name: {name}")))
}

fn decode_stack_shuffle(token: &str) -> Result<Op, ExprError> {
    let (kind, rest) = if let Some(rest) = token.strip_prefix("dup") {
        (OpKind::Dup, rest)
    } else if let Some(rest) = token.strip_prefix("swap") {
        (OpKind::Swap, rest)
    } else if let Some(rest) = token.strip_prefix("drop") {
        (OpKind::Drop, rest)
    } else {
        (OpKind::Sort, &token["sort".len()..])
    };
    let idx = rest
        .parse::<usize>()
        .map_err(|_| ExprError::Parse(format!("illegal token: {token}")))?;
    Ok(Op::with_imm(kind, Imm::Depth(idx)))
}

fn decode_arg_op(token: &str) -> Result<Op, ExprError> {
    let (kind, rest) = if let Some(rest) = token.strip_prefix("argmin") {
        (OpKind::ArgMin, rest)
    } else if let Some(rest) = token.strip_prefix("argmax") {
        (OpKind::ArgMax, rest)
    } else {
        (OpKind::ArgSort, &token["argsort".len()..])
    };
    let idx = rest
        .parse::<usize>()
        .map_err(|_| ExprError::Parse(format!("illegal token: {token}")))?;
    Ok(Op::with_imm(kind, Imm::Depth(idx)))
}

/// Parses a signed integer with automatic base detection (`0x` hexadecimal,
/// leading `0` octal, decimal otherwise). The whole token must be consumed.
fn parse_int_literal(token: &str) -> Option<i64> {
    let (negative, digits) = match token.as_bytes().first()? {
        b'-' => (true, &token[1..]),
        b'+' => (false, &token[1..]),
        _ => (false, token),
    };
    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8).ok()?
    } else {
        digits.parse::<i64>().ok()?
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn decode_numeric(token: &str) -> Result<Op, ExprError> {
    if let Some(l) = parse_int_literal(token) {
        if let Ok(v) = i32::try_from(l) {
            return Ok(Op::with_imm(OpKind::ConstantI, Imm::Int(v)));
        }
        if let Ok(v) = u32::try_from(l) {
            return Ok(Op::with_imm(OpKind::ConstantI, Imm::Int(v as i32)));
        }
        return Ok(Op::with_imm(OpKind::ConstantF, Imm::Float(l as f32)));
    }
    token
        .parse::<f32>()
        .map(|f| Op::with_imm(OpKind::ConstantF, Imm::Float(f)))
        .map_err(|_| ExprError::Parse(format!("failed to convert '{token}' to float")))
}

/// Decodes a single token. `extended` admits the Select-only operators
/// `argmin`/`argmax`/`argsort`.
pub fn decode_token(token: &str, extended: bool) -> Result<Op, ExprError> {
    use OpKind::*;

    let simple = match token {
        "+" => Some(Op::new(Add)),
        "-" => Some(Op::new(Sub)),
        "*" => Some(Op::new(Mul)),
        "/" => Some(Op::new(Div)),
        "%" => Some(Op::new(Mod)),
        "sqrt" => Some(Op::new(Sqrt)),
        "abs" => Some(Op::new(Abs)),
        "max" => Some(Op::new(Max)),
        "min" => Some(Op::new(Min)),
        // `clip` is accepted for compatibility with other expression filters.
        "clip" | "clamp" => Some(Op::new(Clamp)),
        "<" => Some(Op::with_imm(Cmp, Imm::Cmp(CmpOp::Lt))),
        ">" => Some(Op::with_imm(Cmp, Imm::Cmp(CmpOp::Nle))),
        "=" => Some(Op::with_imm(Cmp, Imm::Cmp(CmpOp::Eq))),
        ">=" => Some(Op::with_imm(Cmp, Imm::Cmp(CmpOp::Nlt))),
        "<=" => Some(Op::with_imm(Cmp, Imm::Cmp(CmpOp::Le))),
        "trunc" => Some(Op::new(Trunc)),
        "round" => Some(Op::new(Round)),
        "floor" => Some(Op::new(Floor)),
        "and" => Some(Op::new(And)),
        "or" => Some(Op::new(Or)),
        "xor" => Some(Op::new(Xor)),
        "not" => Some(Op::new(Not)),
        "bitand" => Some(Op::new(BitAnd)),
        "bitor" => Some(Op::new(BitOr)),
        "bitxor" => Some(Op::new(BitXor)),
        "bitnot" => Some(Op::new(BitNot)),
        "?" => Some(Op::new(Ternary)),
        "exp" => Some(Op::new(Exp)),
        "log" => Some(Op::new(Log)),
        "pow" | "**" => Some(Op::new(Pow)),
        "sin" => Some(Op::new(Sin)),
        "cos" => Some(Op::new(Cos)),
        "dup" => Some(Op::with_imm(Dup, Imm::Depth(0))),
        "swap" => Some(Op::with_imm(Swap, Imm::Depth(1))),
        "drop" => Some(Op::with_imm(Drop, Imm::Depth(1))),
        "pi" => Some(Op::with_imm(ConstantF, Imm::Float(std::f32::consts::PI))),
        "N" => Some(Op::with_imm(ConstLoad, Imm::Const(ConstKind::N))),
        "X" => Some(Op::with_imm(ConstLoad, Imm::Const(ConstKind::X))),
        "Y" => Some(Op::with_imm(ConstLoad, Imm::Const(ConstKind::Y))),
        "width" => Some(Op::with_imm(ConstLoad, Imm::Const(ConstKind::Width))),
        "height" => Some(Op::with_imm(ConstLoad, Imm::Const(ConstKind::Height))),
        _ => None,
    };
    if let Some(op) = simple {
        return Ok(op);
    }

    if clip_name_re().is_match(token) {
        return Ok(Op::with_imm(MemLoad, Imm::Clip(extract_clip_id(token)?)));
    }

    // 'name@' loads a named variable; 'name!' stores to it.
    if token.len() >= 2 && (token.ends_with('@') || token.ends_with('!')) {
        let name = &token[..token.len() - 1];
        let kind = if token.ends_with('@') { VarLoad } else { VarStore };
        return Ok(Op::named(kind, Imm::None, name));
    }

    if ["dup", "swap", "drop", "sort"].iter().any(|p| token.starts_with(p)) {
        return decode_stack_shuffle(token);
    }

    if extended && ["argmin", "argmax", "argsort"].iter().any(|p| token.starts_with(p)) {
        return decode_arg_op(token);
    }

    if let Some(caps) = frame_prop_re().captures(token) {
        let clip = extract_clip_id(&caps[1])?;
        return Ok(Op::named(ConstLoad, Imm::Prop { clip, slot: 0 }, &caps[2]));
    }

    if let Some(caps) = rel_pixel_re().captures(token) {
        let clip = extract_clip_id(&caps[1])?;
        let dx = caps[2]
            .parse::<i32>()
            .map_err(|_| ExprError::Parse(format!("illegal token: {token}")))?;
        let dy = caps[3]
            .parse::<i32>()
            .map_err(|_| ExprError::Parse(format!("illegal token: {token}")))?;
        let boundary = match caps.get(4).map(|m| m.as_str()) {
            Some(":m") => BoundaryCondition::Mirrored,
            Some(_) => BoundaryCondition::Clamped,
            None => BoundaryCondition::Unspecified,
        };
        let mut op = Op::with_imm(MemLoad, Imm::Clip(clip));
        op.dx = dx;
        op.dy = dy;
        op.boundary = boundary;
        return Ok(op);
    }

    if let Some(caps) = abs_pixel_re().captures(token) {
        return Ok(Op::with_imm(MemLoadVar, Imm::Clip(extract_clip_id(&caps[1])?)));
    }

    decode_numeric(token)
}

/// Tokenizes and decodes a whole expression.
pub fn decode_expr(expr: &str, extended: bool) -> Result<Vec<Op>, ExprError> {
    tokenize(expr).into_iter().map(|tok| decode_token(tok, extended)).collect()
}
