//! Embeddable execution engine for Lua 5.1 bytecode.
//!
//! A [`LuaState`] owns the globals, the package cache and every coroutine it
//! creates. Chunks come in through [`LuaState::load`] (binary chunks
//! directly, source through an installed [`lua_core::Compile`]) and run with
//! [`LuaState::call`]. Coroutines are stackless: a yield unwinds the
//! interpreter to the resumer and the suspended frames stay on the thread's
//! own stack.

pub mod config;
pub mod coroutine;
pub mod dispatch;
pub mod error;
pub mod function;
pub mod hook;
mod interp;
mod load;
pub mod package;
pub mod state;
pub mod stdlib;
pub mod table;
mod teardown;
pub mod thread;
pub mod userdata;
pub mod value;

#[cfg(test)]
mod testing;

pub use config::RuntimeConfig;
pub use coroutine::ResumeOutcome;
pub use dispatch::MetaOp;
pub use error::LuaError;
pub use function::{LuaClosure, NativeFn, NativeFunction, Upvalue};
pub use hook::{Budget, InterruptHook, SafePoint};
pub use package::{
    FileResourceFinder, MemoryResources, ModuleState, NativeFactory, Package, ResourceFinder, Search, Searcher,
};
pub use state::LuaState;
pub use stdlib::Library;
pub use table::LuaTable;
pub use thread::{LuaThread, ThreadStatus};
pub use userdata::LuaUserdata;
pub use value::{parse_number, LuaValue, TableRef};
