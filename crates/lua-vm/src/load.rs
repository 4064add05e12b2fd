use crate::error::LuaError;
use crate::function::{LuaClosure, Upvalue};
use crate::state::LuaState;
use crate::value::LuaValue;
use lua_core::{CompileError, Proto};
use std::sync::Arc;

impl LuaState {
    /// Turn chunk bytes into a function.
    ///
    /// Binary chunks are read directly; anything else goes through the
    /// installed compiler. The function's environment is the running
    /// thread's.
    #[tracing::instrument(level = "debug", skip(self, bytes), fields(len = bytes.len()))]
    pub fn load(&mut self, bytes: &[u8], chunk_name: &str) -> Result<LuaValue, LuaError> {
        let proto = if lua_chunk::is_binary(bytes) {
            lua_chunk::undump(bytes, chunk_name)?
        } else {
            let compiler = self
                .compiler()
                .ok_or_else(|| CompileError::new(chunk_name, 0, "no compiler installed"))?;
            compiler.compile(bytes, chunk_name)?
        };
        Ok(self.load_proto(proto))
    }

    /// Instantiate a top-level prototype. Declared upvalues start as nil.
    pub fn load_proto(&mut self, proto: Proto) -> LuaValue {
        let upvalues = proto
            .upvalue_descs
            .iter()
            .map(|_| {
                let cell = Upvalue::closed(LuaValue::Nil);
                self.track_cell(&cell);
                cell
            })
            .collect();
        let env = self.current_env();
        LuaValue::Closure(Arc::new(LuaClosure::new(Arc::new(proto), upvalues, env)))
    }
}
