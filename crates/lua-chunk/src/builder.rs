use lua_core::{Constant, OpCode, Proto, UpvalueDesc};
use std::sync::Arc;

/// Mutable builder for a [`Proto`].
///
/// Compilers assemble prototypes through this; the runtime tests use it to
/// hand-write bytecode.
#[derive(Debug, Default)]
pub struct ProtoBuilder {
    pub instructions: Vec<OpCode>,
    pub constants: Vec<Constant>,
    pub names: Vec<String>,
    pub protos: Vec<Arc<Proto>>,
    pub upvalue_descs: Vec<UpvalueDesc>,
    pub param_count: u8,
    pub is_vararg: bool,
    pub source: String,
}

impl ProtoBuilder {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn params(mut self, count: u8) -> Self {
        self.param_count = count;
        self
    }

    pub fn vararg(mut self) -> Self {
        self.is_vararg = true;
        self
    }

    /// Append an instruction and return its index.
    pub fn emit(&mut self, op: OpCode) -> usize {
        self.instructions.push(op);
        self.instructions.len() - 1
    }

    /// Index of the next instruction to be emitted.
    pub fn here(&self) -> usize {
        self.instructions.len()
    }

    /// Point the jump at `at` to the next instruction to be emitted.
    ///
    /// Panics if `at` is not a jump.
    pub fn patch_jump(&mut self, at: usize) {
        self.patch_jump_to(at, self.here());
    }

    /// Point the jump at `at` to instruction `target`.
    pub fn patch_jump_to(&mut self, at: usize, target: usize) {
        let offset = (target as i64 - at as i64 - 1) as i16;
        match &mut self.instructions[at] {
            OpCode::Jump { offset: o }
            | OpCode::JumpIfFalse { offset: o, .. }
            | OpCode::JumpIfTrue { offset: o, .. } => *o = offset,
            other => panic!("patch_jump on non-jump instruction {}", other.name()),
        }
    }

    /// Intern a constant. Equal constants share one slot; floats are compared
    /// bitwise so `0.0` and `-0.0` stay distinct.
    pub fn add_constant(&mut self, value: impl Into<Constant>) -> u16 {
        let value = value.into();
        let existing = self.constants.iter().position(|c| match (c, &value) {
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        });
        if let Some(idx) = existing {
            return idx as u16;
        }
        self.constants.push(value);
        (self.constants.len() - 1) as u16
    }

    pub fn add_name(&mut self, name: impl Into<String>) -> u16 {
        let name = name.into();
        if let Some(idx) = self.names.iter().position(|n| *n == name) {
            return idx as u16;
        }
        self.names.push(name);
        (self.names.len() - 1) as u16
    }

    pub fn add_proto(&mut self, proto: impl Into<Arc<Proto>>) -> u16 {
        self.protos.push(proto.into());
        (self.protos.len() - 1) as u16
    }

    pub fn add_upvalue(&mut self, desc: UpvalueDesc) -> u8 {
        self.upvalue_descs.push(desc);
        (self.upvalue_descs.len() - 1) as u8
    }

    pub fn finish(self) -> Proto {
        Proto {
            instructions: self.instructions,
            constants: self.constants,
            names: self.names,
            protos: self.protos,
            upvalue_descs: self.upvalue_descs,
            param_count: self.param_count,
            is_vararg: self.is_vararg,
            source: self.source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_interned() {
        let mut b = ProtoBuilder::new("t");
        let a = b.add_constant("x");
        let c = b.add_constant(1i64);
        assert_eq!(b.add_constant("x"), a);
        assert_eq!(b.add_constant(1i64), c);
        // integer and float keep separate slots
        assert_ne!(b.add_constant(1.0f64), c);
        assert_ne!(b.add_constant(-0.0f64), b.add_constant(0.0f64));
        assert_eq!(b.finish().constants.len(), 5);
    }

    #[test]
    fn patch_jump_targets_next_instruction() {
        let mut b = ProtoBuilder::new("t");
        let j = b.emit(OpCode::JumpIfFalse { src: 0, offset: 0 });
        b.emit(OpCode::LoadNil { dst: 1 });
        b.emit(OpCode::LoadNil { dst: 2 });
        b.patch_jump(j);
        let loop_top = b.here();
        b.emit(OpCode::LoadNil { dst: 3 });
        let back = b.emit(OpCode::Jump { offset: 0 });
        b.patch_jump_to(back, loop_top);
        let p = b.finish();
        assert_eq!(p.instructions[0], OpCode::JumpIfFalse { src: 0, offset: 2 });
        assert_eq!(p.instructions[4], OpCode::Jump { offset: -2 });
    }

    #[test]
    #[should_panic(expected = "non-jump")]
    fn patch_jump_rejects_other_instructions() {
        let mut b = ProtoBuilder::new("t");
        let at = b.emit(OpCode::LoadNil { dst: 0 });
        b.patch_jump(at);
    }
}
