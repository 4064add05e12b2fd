use crate::value::LuaValue;
use lua_core::CompileError;
use std::sync::Arc;
use thiserror::Error;

/// Every failure the runtime can raise.
///
/// `Runtime` is the script-level error: it carries whatever value was passed
/// to `error` (usually a string). The other variants are produced by the
/// engine itself and become strings when a script observes them.
#[derive(Debug, Clone, Error)]
pub enum LuaError {
    #[error("{}", describe_payload(.0))]
    Runtime(LuaValue),

    #[error("attempt to {operation} a {got} value")]
    TypeError {
        operation: &'static str,
        got: &'static str,
    },

    #[error("bad argument #{position} to '{function}' ({message})")]
    BadArgument {
        position: usize,
        function: &'static str,
        message: String,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("module '{name}' not found:{tried}")]
    ModuleNotFound { name: String, tried: String },

    #[error("loop or previous error loading module '{name}'")]
    ModuleLoop { name: String },

    /// A searcher located `name` but produced something that cannot be called.
    #[error("module '{name}' cannot be loaded: searcher produced a {got} value, expected a function")]
    ModuleShape { name: String, got: &'static str },

    #[error("stack overflow")]
    StackOverflow,

    #[error("attempt to yield from outside a coroutine")]
    YieldOutsideCoroutine,

    #[error("attempt to yield across a native call boundary")]
    YieldAcrossBoundary,

    /// Raised by the interrupt hook; never caught by `pcall` or `resume`.
    #[error("interrupted: {0}")]
    Interrupted(String),

    /// Opaque fault from host code.
    #[error("{0}")]
    Host(Arc<anyhow::Error>),

    #[error("internal error: {0}")]
    Internal(String),

    /// Not an error: `coroutine.yield` unwinds to the resumer with this.
    #[error("yield")]
    Yield(Vec<LuaValue>),
}

fn describe_payload(v: &LuaValue) -> String {
    match v {
        LuaValue::LuaString(_) | LuaValue::Integer(_) | LuaValue::Float(_) => v.to_string(),
        LuaValue::Nil => "nil".to_owned(),
        other => format!("(error object is a {} value)", other.type_name()),
    }
}

impl LuaError {
    pub fn runtime(message: impl Into<String>) -> Self {
        LuaError::Runtime(LuaValue::LuaString(message.into()))
    }

    pub(crate) fn bad_arg(position: usize, function: &'static str, message: impl Into<String>) -> Self {
        LuaError::BadArgument {
            position,
            function,
            message: message.into(),
        }
    }

    /// The value a script sees when it catches this error.
    pub fn into_value(self) -> LuaValue {
        match self {
            LuaError::Runtime(v) => v,
            other => LuaValue::LuaString(other.to_string()),
        }
    }

    /// Whether `pcall` may catch this error. Interrupts, host faults and a
    /// yield with nowhere to go always reach the host.
    pub fn is_catchable(&self) -> bool {
        !matches!(
            self,
            LuaError::Interrupted(_)
                | LuaError::Host(_)
                | LuaError::YieldOutsideCoroutine
                | LuaError::Yield(_)
        )
    }
}

impl From<anyhow::Error> for LuaError {
    fn from(e: anyhow::Error) -> Self {
        LuaError::Host(Arc::new(e))
    }
}
