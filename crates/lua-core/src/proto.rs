//! Function prototypes: the unit produced by a compiler and shared by closures.

use crate::opcode::OpCode;
use std::sync::Arc;

/// A compiled function prototype. Immutable after compilation.
///
/// Every function (top-level chunk or nested lambda) compiles to a `Proto`.
/// Closures share a `Proto` via `Arc`; upvalue cells and the environment are
/// per-instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Proto {
    pub instructions: Vec<OpCode>,
    /// Constant pool.
    pub constants: Vec<Constant>,
    /// Global and field name strings.
    pub names: Vec<String>,
    /// Children instantiated by `Closure`, indexed by `proto_idx`.
    pub protos: Vec<Arc<Proto>>,
    /// One entry per upvalue of closures made from this prototype.
    pub upvalue_descs: Vec<UpvalueDesc>,
    /// Fixed parameters; extra arguments are dropped unless `is_vararg`.
    pub param_count: u8,
    pub is_vararg: bool,
    /// Chunk name this prototype was compiled from.
    pub source: String,
}

impl Proto {
    /// An empty prototype for chunk `source`.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            instructions: Vec::new(),
            constants: Vec::new(),
            names: Vec::new(),
            protos: Vec::new(),
            upvalue_descs: Vec::new(),
            param_count: 0,
            is_vararg: false,
            source: source.into(),
        }
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// A compile-time constant. Only immutable value kinds can appear here.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl From<bool> for Constant {
    fn from(b: bool) -> Self {
        Constant::Boolean(b)
    }
}

impl From<i64> for Constant {
    fn from(n: i64) -> Self {
        Constant::Integer(n)
    }
}

impl From<f64> for Constant {
    fn from(n: f64) -> Self {
        Constant::Float(n)
    }
}

impl From<&str> for Constant {
    fn from(s: &str) -> Self {
        Constant::String(s.to_owned())
    }
}

impl From<String> for Constant {
    fn from(s: String) -> Self {
        Constant::String(s)
    }
}

// ── Upvalue descriptors ───────────────────────────────────────────────────────

/// Where a new closure takes each upvalue cell from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalueDesc {
    /// Register of the frame running the `Closure` instruction. Captures of
    /// the same register share one cell.
    Stack(u8),
    /// An upvalue cell of the closure running the `Closure` instruction.
    Upvalue(u8),
}
