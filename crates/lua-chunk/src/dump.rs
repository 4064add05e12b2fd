//! Binary writer: [`Proto`] → bytes.
//!
//! Layout: [`SIGNATURE`](crate::SIGNATURE) followed by the root prototype.
//! A prototype is its source name, parameter info, constant pool, name table,
//! upvalue descriptors, nested prototypes (recursively) and finally the
//! instruction stream. Integers are little-endian; strings are a `u32`
//! length followed by UTF-8 bytes.

use lua_core::{Constant, OpCode, Proto, UpvalueDesc};

use crate::SIGNATURE;

pub(crate) const TAG_NIL: u8 = 0;
pub(crate) const TAG_BOOL: u8 = 1;
pub(crate) const TAG_INT: u8 = 2;
pub(crate) const TAG_FLOAT: u8 = 3;
pub(crate) const TAG_STRING: u8 = 4;

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn i16(&mut self, v: i16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn len(&mut self, n: usize) -> &mut Self {
        self.u32(n as u32)
    }

    fn str(&mut self, s: &str) -> &mut Self {
        self.len(s.len());
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    fn abc(&mut self, a: u8, b: u8, c: u8) -> &mut Self {
        self.u8(a).u8(b).u8(c)
    }

    fn proto(&mut self, p: &Proto) {
        self.str(&p.source).u8(p.param_count).u8(p.is_vararg as u8);

        self.len(p.constants.len());
        for c in &p.constants {
            self.constant(c);
        }

        self.len(p.names.len());
        for name in &p.names {
            self.str(name);
        }

        self.len(p.upvalue_descs.len());
        for desc in &p.upvalue_descs {
            match *desc {
                UpvalueDesc::Stack(reg) => self.u8(0).u8(reg),
                UpvalueDesc::Upvalue(idx) => self.u8(1).u8(idx),
            };
        }

        self.len(p.protos.len());
        for child in &p.protos {
            self.proto(child);
        }

        self.len(p.instructions.len());
        for op in &p.instructions {
            self.op(op);
        }
    }

    fn constant(&mut self, c: &Constant) {
        match c {
            Constant::Nil => self.u8(TAG_NIL),
            Constant::Boolean(b) => self.u8(TAG_BOOL).u8(*b as u8),
            Constant::Integer(n) => {
                self.u8(TAG_INT);
                self.buf.extend_from_slice(&n.to_le_bytes());
                self
            }
            Constant::Float(f) => {
                self.u8(TAG_FLOAT);
                self.buf.extend_from_slice(&f.to_bits().to_le_bytes());
                self
            }
            Constant::String(s) => self.u8(TAG_STRING).str(s),
        };
    }

    /// One tag byte, then operands in declaration order. Tags follow
    /// declaration order of [`OpCode`]; `undump` mirrors this table.
    fn op(&mut self, op: &OpCode) {
        use OpCode::*;
        match *op {
            LoadConst { dst, const_idx } => self.u8(0).u8(dst).u16(const_idx),
            LoadNil { dst } => self.u8(1).u8(dst),
            LoadBool { dst, value, skip } => self.u8(2).abc(dst, value as u8, skip as u8),
            Move { dst, src } => self.u8(3).u8(dst).u8(src),
            Add { dst, lhs, rhs } => self.u8(4).abc(dst, lhs, rhs),
            Sub { dst, lhs, rhs } => self.u8(5).abc(dst, lhs, rhs),
            Mul { dst, lhs, rhs } => self.u8(6).abc(dst, lhs, rhs),
            Div { dst, lhs, rhs } => self.u8(7).abc(dst, lhs, rhs),
            Mod { dst, lhs, rhs } => self.u8(8).abc(dst, lhs, rhs),
            Pow { dst, lhs, rhs } => self.u8(9).abc(dst, lhs, rhs),
            IDiv { dst, lhs, rhs } => self.u8(10).abc(dst, lhs, rhs),
            Unm { dst, src } => self.u8(11).u8(dst).u8(src),
            Eq { dst, lhs, rhs } => self.u8(12).abc(dst, lhs, rhs),
            Lt { dst, lhs, rhs } => self.u8(13).abc(dst, lhs, rhs),
            Le { dst, lhs, rhs } => self.u8(14).abc(dst, lhs, rhs),
            Not { dst, src } => self.u8(15).u8(dst).u8(src),
            Jump { offset } => self.u8(16).i16(offset),
            JumpIfFalse { src, offset } => self.u8(17).u8(src).i16(offset),
            JumpIfTrue { src, offset } => self.u8(18).u8(src).i16(offset),
            Concat { dst, lhs, rhs } => self.u8(19).abc(dst, lhs, rhs),
            Len { dst, src } => self.u8(20).u8(dst).u8(src),
            Call { func, num_args, num_results } => self.u8(21).abc(func, num_args, num_results),
            Return { src, num_results } => self.u8(22).u8(src).u8(num_results),
            GetGlobal { dst, name_idx } => self.u8(23).u8(dst).u16(name_idx),
            SetGlobal { src, name_idx } => self.u8(24).u8(src).u16(name_idx),
            Closure { dst, proto_idx } => self.u8(25).u8(dst).u16(proto_idx),
            GetUpvalue { dst, upval_idx } => self.u8(26).u8(dst).u8(upval_idx),
            SetUpvalue { src, upval_idx } => self.u8(27).u8(src).u8(upval_idx),
            CloseUpvalues { from_reg } => self.u8(28).u8(from_reg),
            NewTable { dst } => self.u8(29).u8(dst),
            GetTable { dst, table, key } => self.u8(30).abc(dst, table, key),
            SetTable { table, key, val } => self.u8(31).abc(table, key, val),
            GetField { dst, table, name_idx } => self.u8(32).u8(dst).u8(table).u16(name_idx),
            SetField { table, name_idx, val } => self.u8(33).u8(table).u16(name_idx).u8(val),
            SetList { table, src, count } => self.u8(34).abc(table, src, count),
            VarArg { dst, count } => self.u8(35).u8(dst).u8(count),
        };
    }
}

/// Serialise a prototype tree to a binary chunk that [`undump`](crate::undump)
/// (and therefore `LuaState::load`) accepts.
pub fn dump(proto: &Proto) -> Vec<u8> {
    let mut w = Writer {
        buf: SIGNATURE.to_vec(),
    };
    w.proto(proto);
    tracing::trace!(source = %proto.source, bytes = w.buf.len(), "dumped chunk");
    w.buf
}
