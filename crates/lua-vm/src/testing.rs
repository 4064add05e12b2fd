//! Helpers shared by the unit tests: hand-assembled chunks and a toy
//! compiler.

use crate::error::LuaError;
use crate::state::LuaState;
use crate::value::LuaValue;
use lua_chunk::ProtoBuilder;
use lua_core::{CompileError, OpCode, Proto};

pub(crate) fn load(lua: &mut LuaState, b: ProtoBuilder) -> LuaValue {
    lua.load_proto(b.finish())
}

pub(crate) fn call_chunk(lua: &mut LuaState, b: ProtoBuilder, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let f = load(lua, b);
    lua.call(&f, args)
}

pub(crate) fn global(lua: &LuaState, name: &str) -> LuaValue {
    lua.globals().read().get_str(name)
}

/// Emit `dst = lib.field`.
pub(crate) fn emit_lib_get(b: &mut ProtoBuilder, dst: u8, lib: &str, field: &str) {
    let lib = b.add_name(lib);
    let field = b.add_name(field);
    b.emit(OpCode::GetGlobal { dst, name_idx: lib });
    b.emit(OpCode::GetField { dst, table: dst, name_idx: field });
}

/// Compiles a handful of one-line scripts:
///
/// - `return <name>` returns a global
/// - `error <text>` raises `<text>`
/// - `count <name>` increments global `<name>` and returns a fresh table
/// - empty source returns nothing
pub(crate) fn toy_compile(source: &[u8], chunk_name: &str) -> Result<Proto, CompileError> {
    let text = std::str::from_utf8(source).map_err(|_| CompileError::new(chunk_name, 1, "invalid utf-8"))?;
    let mut b = ProtoBuilder::new(chunk_name).vararg();
    match text.trim().split_once(' ') {
        Some(("return", name)) => {
            let name = b.add_name(name);
            b.emit(OpCode::GetGlobal { dst: 0, name_idx: name });
            b.emit(OpCode::Return { src: 0, num_results: 1 });
        }
        Some(("error", message)) => {
            let error = b.add_name("error");
            let message = b.add_constant(message);
            b.emit(OpCode::GetGlobal { dst: 0, name_idx: error });
            b.emit(OpCode::LoadConst { dst: 1, const_idx: message });
            b.emit(OpCode::Call { func: 0, num_args: 1, num_results: 0 });
        }
        Some(("count", name)) => {
            let name = b.add_name(name);
            let one = b.add_constant(1i64);
            b.emit(OpCode::GetGlobal { dst: 0, name_idx: name });
            b.emit(OpCode::LoadConst { dst: 1, const_idx: one });
            b.emit(OpCode::Add { dst: 0, lhs: 0, rhs: 1 });
            b.emit(OpCode::SetGlobal { src: 0, name_idx: name });
            b.emit(OpCode::NewTable { dst: 0 });
            b.emit(OpCode::Return { src: 0, num_results: 1 });
        }
        None if text.trim().is_empty() => {}
        _ => return Err(CompileError::new(chunk_name, 1, format!("unexpected symbol near '{}'", text.trim()))),
    }
    Ok(b.finish())
}
