use crate::error::LuaError;
use crate::state::LuaState;
use crate::value::{LuaValue, TableRef};
use lua_core::Proto;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

// ── Closures ──────────────────────────────────────────────────────────────────

/// A Lua function: a shared prototype, its captured upvalue cells and the
/// environment table used for global access.
pub struct LuaClosure {
    pub proto: Arc<Proto>,
    pub upvalues: Vec<Upvalue>,
    env: RwLock<TableRef>,
}

impl LuaClosure {
    pub fn new(proto: Arc<Proto>, upvalues: Vec<Upvalue>, env: TableRef) -> Self {
        Self {
            proto,
            upvalues,
            env: RwLock::new(env),
        }
    }

    pub fn env(&self) -> TableRef {
        self.env.read().clone()
    }

    pub fn set_env(&self, env: TableRef) {
        *self.env.write() = env;
    }
}

impl std::fmt::Debug for LuaClosure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaClosure")
            .field("source", &self.proto.source)
            .field("upvalues", &self.upvalues.len())
            .finish()
    }
}

// ── Native functions ──────────────────────────────────────────────────────────

/// Signature of host code callable from Lua.
pub type NativeFn =
    dyn Fn(&mut LuaState, Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> + Send + Sync;

/// A host function. It carries an environment only so that `getfenv` and
/// `setfenv` behave the same for every function kind.
pub struct NativeFunction {
    name: String,
    func: Box<NativeFn>,
    env: RwLock<TableRef>,
}

impl NativeFunction {
    pub fn new<F>(name: impl Into<String>, env: TableRef, func: F) -> Self
    where
        F: Fn(&mut LuaState, Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
            env: RwLock::new(env),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env(&self) -> TableRef {
        self.env.read().clone()
    }

    pub fn set_env(&self, env: TableRef) {
        *self.env.write() = env;
    }

    pub(crate) fn invoke(
        &self,
        state: &mut LuaState,
        args: Vec<LuaValue>,
    ) -> Result<Vec<LuaValue>, LuaError> {
        (self.func)(state, args)
    }
}

// ── Upvalues ──────────────────────────────────────────────────────────────────

/// A captured variable, shared by every closure that captured it.
///
/// While the declaring frame is live the cell points into that thread's
/// registers; when the frame exits it is closed over a copy of the value.
#[derive(Clone)]
pub struct Upvalue(pub(crate) Arc<Mutex<UpvalueInner>>);

pub(crate) enum UpvalueInner {
    /// Register `index` of thread slot `thread` in the state with id `state`.
    Open { state: u64, thread: usize, index: usize },
    Closed(LuaValue),
}

impl Upvalue {
    pub(crate) fn open(state: u64, thread: usize, index: usize) -> Self {
        Upvalue(Arc::new(Mutex::new(UpvalueInner::Open { state, thread, index })))
    }

    pub fn closed(value: LuaValue) -> Self {
        Upvalue(Arc::new(Mutex::new(UpvalueInner::Closed(value))))
    }

    /// Replace an open cell's register reference by `value`.
    pub(crate) fn close(&self, value: LuaValue) {
        *self.0.lock() = UpvalueInner::Closed(value);
    }
}
