//! Binary reader: bytes → [`Proto`]. Mirrors `dump.rs`.

use std::sync::Arc;

use lua_core::{CompileError, Constant, OpCode, Proto, UpvalueDesc};

use crate::dump::{TAG_BOOL, TAG_FLOAT, TAG_INT, TAG_NIL, TAG_STRING};
use crate::SIGNATURE;

/// Nesting bound for prototypes, so hostile input cannot exhaust the stack.
const MAX_NESTING: usize = 200;

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    chunk: &'a str,
}

impl<'a> Reader<'a> {
    fn fail(&self, message: impl std::fmt::Display) -> CompileError {
        CompileError::new(
            self.chunk,
            0,
            format!("bad binary chunk at offset {}: {message}", self.pos),
        )
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], CompileError> {
        let end = self.pos + N;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| self.fail("truncated"))?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CompileError> {
        Ok(self.take::<1>()?[0])
    }

    fn bool(&mut self) -> Result<bool, CompileError> {
        Ok(self.u8()? != 0)
    }

    fn u16(&mut self) -> Result<u16, CompileError> {
        self.take().map(u16::from_le_bytes)
    }

    fn i16(&mut self) -> Result<i16, CompileError> {
        self.take().map(i16::from_le_bytes)
    }

    fn len(&mut self) -> Result<usize, CompileError> {
        let n = u32::from_le_bytes(self.take()?) as usize;
        // every element occupies at least one byte
        if n > self.data.len() - self.pos {
            return Err(self.fail(format!("length {n} exceeds remaining input")));
        }
        Ok(n)
    }

    fn str(&mut self) -> Result<String, CompileError> {
        let n = self.len()?;
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        String::from_utf8(bytes.to_vec()).map_err(|e| self.fail(e))
    }

    fn proto(&mut self, depth: usize) -> Result<Proto, CompileError> {
        if depth > MAX_NESTING {
            return Err(self.fail("functions nested too deeply"));
        }
        let mut proto = Proto::new(self.str()?);
        proto.param_count = self.u8()?;
        proto.is_vararg = self.bool()?;

        for _ in 0..self.len()? {
            let c = self.constant()?;
            proto.constants.push(c);
        }
        for _ in 0..self.len()? {
            let name = self.str()?;
            proto.names.push(name);
        }
        for _ in 0..self.len()? {
            let desc = match (self.u8()?, self.u8()?) {
                (0, reg) => UpvalueDesc::Stack(reg),
                (1, idx) => UpvalueDesc::Upvalue(idx),
                (tag, _) => return Err(self.fail(format!("unknown upvalue kind {tag}"))),
            };
            proto.upvalue_descs.push(desc);
        }
        for _ in 0..self.len()? {
            let child = self.proto(depth + 1)?;
            proto.protos.push(Arc::new(child));
        }
        for _ in 0..self.len()? {
            let op = self.op()?;
            proto.instructions.push(op);
        }
        Ok(proto)
    }

    fn constant(&mut self) -> Result<Constant, CompileError> {
        Ok(match self.u8()? {
            TAG_NIL => Constant::Nil,
            TAG_BOOL => Constant::Boolean(self.bool()?),
            TAG_INT => Constant::Integer(i64::from_le_bytes(self.take()?)),
            TAG_FLOAT => Constant::Float(f64::from_bits(u64::from_le_bytes(self.take()?))),
            TAG_STRING => Constant::String(self.str()?),
            tag => return Err(self.fail(format!("unknown constant tag {tag}"))),
        })
    }

    fn op(&mut self) -> Result<OpCode, CompileError> {
        use OpCode::*;
        let tag = self.u8()?;
        Ok(match tag {
            0 => LoadConst { dst: self.u8()?, const_idx: self.u16()? },
            1 => LoadNil { dst: self.u8()? },
            2 => LoadBool { dst: self.u8()?, value: self.bool()?, skip: self.bool()? },
            3 => Move { dst: self.u8()?, src: self.u8()? },
            4 => Add { dst: self.u8()?, lhs: self.u8()?, rhs: self.u8()? },
            5 => Sub { dst: self.u8()?, lhs: self.u8()?, rhs: self.u8()? },
            6 => Mul { dst: self.u8()?, lhs: self.u8()?, rhs: self.u8()? },
            7 => Div { dst: self.u8()?, lhs: self.u8()?, rhs: self.u8()? },
            8 => Mod { dst: self.u8()?, lhs: self.u8()?, rhs: self.u8()? },
            9 => Pow { dst: self.u8()?, lhs: self.u8()?, rhs: self.u8()? },
            10 => IDiv { dst: self.u8()?, lhs: self.u8()?, rhs: self.u8()? },
            11 => Unm { dst: self.u8()?, src: self.u8()? },
            12 => Eq { dst: self.u8()?, lhs: self.u8()?, rhs: self.u8()? },
            13 => Lt { dst: self.u8()?, lhs: self.u8()?, rhs: self.u8()? },
            14 => Le { dst: self.u8()?, lhs: self.u8()?, rhs: self.u8()? },
            15 => Not { dst: self.u8()?, src: self.u8()? },
            16 => Jump { offset: self.i16()? },
            17 => JumpIfFalse { src: self.u8()?, offset: self.i16()? },
            18 => JumpIfTrue { src: self.u8()?, offset: self.i16()? },
            19 => Concat { dst: self.u8()?, lhs: self.u8()?, rhs: self.u8()? },
            20 => Len { dst: self.u8()?, src: self.u8()? },
            21 => Call { func: self.u8()?, num_args: self.u8()?, num_results: self.u8()? },
            22 => Return { src: self.u8()?, num_results: self.u8()? },
            23 => GetGlobal { dst: self.u8()?, name_idx: self.u16()? },
            24 => SetGlobal { src: self.u8()?, name_idx: self.u16()? },
            25 => Closure { dst: self.u8()?, proto_idx: self.u16()? },
            26 => GetUpvalue { dst: self.u8()?, upval_idx: self.u8()? },
            27 => SetUpvalue { src: self.u8()?, upval_idx: self.u8()? },
            28 => CloseUpvalues { from_reg: self.u8()? },
            29 => NewTable { dst: self.u8()? },
            30 => GetTable { dst: self.u8()?, table: self.u8()?, key: self.u8()? },
            31 => SetTable { table: self.u8()?, key: self.u8()?, val: self.u8()? },
            32 => GetField { dst: self.u8()?, table: self.u8()?, name_idx: self.u16()? },
            33 => SetField { table: self.u8()?, name_idx: self.u16()?, val: self.u8()? },
            34 => SetList { table: self.u8()?, src: self.u8()?, count: self.u8()? },
            35 => VarArg { dst: self.u8()?, count: self.u8()? },
            _ => return Err(self.fail(format!("unknown opcode tag {tag}"))),
        })
    }
}

/// Read a binary chunk produced by [`dump`](crate::dump).
///
/// `chunk_name` is only used to label errors; the prototype keeps the source
/// name recorded in the chunk.
pub fn undump(bytes: &[u8], chunk_name: &str) -> Result<Proto, CompileError> {
    let Some(body) = bytes.strip_prefix(SIGNATURE) else {
        return Err(CompileError::new(chunk_name, 0, "not a binary chunk (bad signature)"));
    };
    let mut r = Reader {
        data: body,
        pos: 0,
        chunk: chunk_name,
    };
    let proto = r.proto(0)?;
    if r.pos != body.len() {
        return Err(r.fail("trailing bytes after chunk"));
    }
    tracing::trace!(chunk = chunk_name, "undumped chunk");
    Ok(proto)
}
