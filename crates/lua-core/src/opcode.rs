/// Operand value meaning "as many as there are" for argument, result and
/// vararg counts. The producing instruction records the end of the values in
/// the frame's `top`; the consuming instruction reads up to it.
pub const MULTI: u8 = u8::MAX;

/// Bytecode instruction set executed by `lua-vm`.
///
/// Register-based, loosely following the PUC-Lua 5.1 opcode set. Operands are
/// frame-relative registers unless stated otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Load constant `const_idx` into register `dst`.
    LoadConst {
        dst: u8,
        const_idx: u16,
    },
    LoadNil {
        dst: u8,
    },
    /// Load a boolean into `dst`. If `skip` is set, skip the next instruction.
    LoadBool {
        dst: u8,
        value: bool,
        skip: bool,
    },
    Move {
        dst: u8,
        src: u8,
    },

    // Arithmetic
    Add {
        dst: u8,
        lhs: u8,
        rhs: u8,
    },
    Sub {
        dst: u8,
        lhs: u8,
        rhs: u8,
    },
    Mul {
        dst: u8,
        lhs: u8,
        rhs: u8,
    },
    Div {
        dst: u8,
        lhs: u8,
        rhs: u8,
    },
    Mod {
        dst: u8,
        lhs: u8,
        rhs: u8,
    },
    Pow {
        dst: u8,
        lhs: u8,
        rhs: u8,
    },
    /// Floor division (`//`).
    IDiv {
        dst: u8,
        lhs: u8,
        rhs: u8,
    },
    Unm {
        dst: u8,
        src: u8,
    },

    // Comparison (result stored as a boolean in `dst`)
    Eq {
        dst: u8,
        lhs: u8,
        rhs: u8,
    },
    Lt {
        dst: u8,
        lhs: u8,
        rhs: u8,
    },
    Le {
        dst: u8,
        lhs: u8,
        rhs: u8,
    },
    Not {
        dst: u8,
        src: u8,
    },

    // Control flow. Offsets are relative to the instruction after the jump.
    Jump {
        offset: i16,
    },
    JumpIfFalse {
        src: u8,
        offset: i16,
    },
    JumpIfTrue {
        src: u8,
        offset: i16,
    },

    /// `dst = lhs .. rhs`
    Concat {
        dst: u8,
        lhs: u8,
        rhs: u8,
    },
    /// `dst = #src`
    Len {
        dst: u8,
        src: u8,
    },

    // Functions
    /// Call `func` with the `num_args` registers after it. Results land in
    /// `func..`. Either count may be [`MULTI`].
    Call {
        func: u8,
        num_args: u8,
        num_results: u8,
    },
    /// Return `num_results` registers starting at `src` ([`MULTI`]: up to top).
    Return {
        src: u8,
        num_results: u8,
    },

    // Environment access (the running closure's environment table)
    GetGlobal {
        dst: u8,
        name_idx: u16,
    },
    SetGlobal {
        src: u8,
        name_idx: u16,
    },

    // Closures & upvalues
    /// Instantiate `protos[proto_idx]` of the running prototype.
    Closure {
        dst: u8,
        proto_idx: u16,
    },
    GetUpvalue {
        dst: u8,
        upval_idx: u8,
    },
    SetUpvalue {
        src: u8,
        upval_idx: u8,
    },
    /// Close every open upvalue at or above `from_reg`.
    CloseUpvalues {
        from_reg: u8,
    },

    // Tables
    NewTable {
        dst: u8,
    },
    /// `dst = table[key]`
    GetTable {
        dst: u8,
        table: u8,
        key: u8,
    },
    /// `table[key] = val`
    SetTable {
        table: u8,
        key: u8,
        val: u8,
    },
    /// `dst = table.field` (field name from the name table)
    GetField {
        dst: u8,
        table: u8,
        name_idx: u16,
    },
    /// `table.field = val`
    SetField {
        table: u8,
        name_idx: u16,
        val: u8,
    },
    /// `table[1..=count] = src..` for table constructors ([`MULTI`]: up to top).
    SetList {
        table: u8,
        src: u8,
        count: u8,
    },

    /// Copy `count` varargs into registers starting at `dst` ([`MULTI`]: all).
    VarArg {
        dst: u8,
        count: u8,
    },
}

impl OpCode {
    /// Short mnemonic, used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            OpCode::LoadConst { .. } => "LOADK",
            OpCode::LoadNil { .. } => "LOADNIL",
            OpCode::LoadBool { .. } => "LOADBOOL",
            OpCode::Move { .. } => "MOVE",
            OpCode::Add { .. } => "ADD",
            OpCode::Sub { .. } => "SUB",
            OpCode::Mul { .. } => "MUL",
            OpCode::Div { .. } => "DIV",
            OpCode::Mod { .. } => "MOD",
            OpCode::Pow { .. } => "POW",
            OpCode::IDiv { .. } => "IDIV",
            OpCode::Unm { .. } => "UNM",
            OpCode::Eq { .. } => "EQ",
            OpCode::Lt { .. } => "LT",
            OpCode::Le { .. } => "LE",
            OpCode::Not { .. } => "NOT",
            OpCode::Jump { .. } => "JMP",
            OpCode::JumpIfFalse { .. } => "JMPF",
            OpCode::JumpIfTrue { .. } => "JMPT",
            OpCode::Concat { .. } => "CONCAT",
            OpCode::Len { .. } => "LEN",
            OpCode::Call { .. } => "CALL",
            OpCode::Return { .. } => "RETURN",
            OpCode::GetGlobal { .. } => "GETGLOBAL",
            OpCode::SetGlobal { .. } => "SETGLOBAL",
            OpCode::Closure { .. } => "CLOSURE",
            OpCode::GetUpvalue { .. } => "GETUPVAL",
            OpCode::SetUpvalue { .. } => "SETUPVAL",
            OpCode::CloseUpvalues { .. } => "CLOSE",
            OpCode::NewTable { .. } => "NEWTABLE",
            OpCode::GetTable { .. } => "GETTABLE",
            OpCode::SetTable { .. } => "SETTABLE",
            OpCode::GetField { .. } => "GETFIELD",
            OpCode::SetField { .. } => "SETFIELD",
            OpCode::SetList { .. } => "SETLIST",
            OpCode::VarArg { .. } => "VARARG",
        }
    }
}
