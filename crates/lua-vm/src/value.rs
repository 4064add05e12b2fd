use crate::error::LuaError;
use crate::function::{LuaClosure, NativeFunction};
use crate::table::LuaTable;
use crate::thread::LuaThread;
use crate::userdata::LuaUserdata;
use lua_core::Constant;
use parking_lot::RwLock;
use std::sync::Arc;

/// Shared, mutable table handle. Tables compare by identity.
pub type TableRef = Arc<RwLock<LuaTable>>;

/// All runtime value types, mirroring the Lua 5.1 type system.
#[derive(Clone, Default)]
pub enum LuaValue {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    LuaString(String),
    Table(TableRef),
    /// A Lua closure (prototype + captured upvalues + environment).
    Closure(Arc<LuaClosure>),
    /// A host function callable from Lua.
    NativeFunction(Arc<NativeFunction>),
    /// A wrapped host object.
    Userdata(Arc<LuaUserdata>),
    Thread(LuaThread),
}

impl LuaValue {
    /// Returns the Lua type name string as per the reference manual.
    pub fn type_name(&self) -> &'static str {
        match self {
            LuaValue::Nil => "nil",
            LuaValue::Boolean(_) => "boolean",
            LuaValue::Integer(_) | LuaValue::Float(_) => "number",
            LuaValue::LuaString(_) => "string",
            LuaValue::Table(_) => "table",
            LuaValue::Closure(_) | LuaValue::NativeFunction(_) => "function",
            LuaValue::Userdata(_) => "userdata",
            LuaValue::Thread(_) => "thread",
        }
    }

    /// Everything except `nil` and `false` is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    /// A plain function: closure or native. Values callable through
    /// `__call` are not included.
    pub fn is_function(&self) -> bool {
        matches!(self, LuaValue::Closure(_) | LuaValue::NativeFunction(_))
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            LuaValue::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            LuaValue::LuaString(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view with string coercion, as arithmetic sees it.
    pub fn to_number(&self) -> Option<LuaValue> {
        match self {
            LuaValue::Integer(_) | LuaValue::Float(_) => Some(self.clone()),
            LuaValue::LuaString(s) => parse_number(s),
            _ => None,
        }
    }

    pub fn metatable(&self) -> Option<TableRef> {
        match self {
            LuaValue::Table(t) => t.read().metatable(),
            LuaValue::Userdata(u) => u.metatable(),
            _ => None,
        }
    }

    /// Environment table of a function or thread.
    pub fn getfenv(&self) -> Result<TableRef, LuaError> {
        match self {
            LuaValue::Closure(c) => Ok(c.env()),
            LuaValue::NativeFunction(f) => Ok(f.env()),
            LuaValue::Thread(t) => Ok(t.env()),
            other => Err(LuaError::TypeError {
                operation: "get the environment of",
                got: other.type_name(),
            }),
        }
    }

    /// Replace the environment of a function or thread. Only this entity is
    /// affected; closures it created earlier keep the table they captured.
    pub fn setfenv(&self, env: TableRef) -> Result<(), LuaError> {
        match self {
            LuaValue::Closure(c) => c.set_env(env),
            LuaValue::NativeFunction(f) => f.set_env(env),
            LuaValue::Thread(t) => t.set_env(env),
            other => {
                return Err(LuaError::TypeError {
                    operation: "set the environment of",
                    got: other.type_name(),
                })
            }
        }
        Ok(())
    }

    /// Address used for identity display and hashing of reference kinds.
    pub(crate) fn identity(&self) -> Option<usize> {
        Some(match self {
            LuaValue::Table(t) => Arc::as_ptr(t) as *const () as usize,
            LuaValue::Closure(c) => Arc::as_ptr(c) as *const () as usize,
            LuaValue::NativeFunction(f) => Arc::as_ptr(f) as *const () as usize,
            LuaValue::Userdata(u) => Arc::as_ptr(u) as *const () as usize,
            LuaValue::Thread(t) => t.identity(),
            _ => return None,
        })
    }
}

/// Parse a numeric literal the way `tonumber` does (decimal or `0x` hex).
pub fn parse_number(s: &str) -> Option<LuaValue> {
    let t = s.trim();
    let (neg, body) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t),
    };
    if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        let n = i64::from_str_radix(hex, 16).ok()?;
        return Some(LuaValue::Integer(if neg { n.wrapping_neg() } else { n }));
    }
    if let Ok(n) = t.parse::<i64>() {
        return Some(LuaValue::Integer(n));
    }
    // Reject forms Rust accepts but Lua does not.
    if t.is_empty() || t.contains(|c: char| c.is_ascii_alphabetic() && !matches!(c, 'e' | 'E')) {
        return None;
    }
    t.parse::<f64>().ok().map(LuaValue::Float)
}

impl From<bool> for LuaValue {
    fn from(b: bool) -> Self {
        LuaValue::Boolean(b)
    }
}

impl From<i64> for LuaValue {
    fn from(n: i64) -> Self {
        LuaValue::Integer(n)
    }
}

impl From<f64> for LuaValue {
    fn from(n: f64) -> Self {
        LuaValue::Float(n)
    }
}

impl From<&str> for LuaValue {
    fn from(s: &str) -> Self {
        LuaValue::LuaString(s.to_owned())
    }
}

impl From<String> for LuaValue {
    fn from(s: String) -> Self {
        LuaValue::LuaString(s)
    }
}

impl From<TableRef> for LuaValue {
    fn from(t: TableRef) -> Self {
        LuaValue::Table(t)
    }
}

impl From<LuaThread> for LuaValue {
    fn from(t: LuaThread) -> Self {
        LuaValue::Thread(t)
    }
}

impl From<&Constant> for LuaValue {
    fn from(c: &Constant) -> Self {
        match c {
            Constant::Nil => LuaValue::Nil,
            Constant::Boolean(b) => LuaValue::Boolean(*b),
            Constant::Integer(n) => LuaValue::Integer(*n),
            Constant::Float(f) => LuaValue::Float(*f),
            Constant::String(s) => LuaValue::LuaString(s.clone()),
        }
    }
}

/// Raw equality: numbers compare by value across integer/float, reference
/// kinds by identity.
impl PartialEq for LuaValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LuaValue::Nil, LuaValue::Nil) => true,
            (LuaValue::Boolean(a), LuaValue::Boolean(b)) => a == b,
            (LuaValue::Integer(a), LuaValue::Integer(b)) => a == b,
            (LuaValue::Float(a), LuaValue::Float(b)) => a == b,
            (LuaValue::Integer(a), LuaValue::Float(b)) => (*a as f64) == *b,
            (LuaValue::Float(a), LuaValue::Integer(b)) => *a == (*b as f64),
            (LuaValue::LuaString(a), LuaValue::LuaString(b)) => a == b,
            (LuaValue::Table(a), LuaValue::Table(b)) => Arc::ptr_eq(a, b),
            (LuaValue::Closure(a), LuaValue::Closure(b)) => Arc::ptr_eq(a, b),
            (LuaValue::NativeFunction(a), LuaValue::NativeFunction(b)) => Arc::ptr_eq(a, b),
            (LuaValue::Userdata(a), LuaValue::Userdata(b)) => Arc::ptr_eq(a, b),
            (LuaValue::Thread(a), LuaValue::Thread(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Debug for LuaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaValue::Nil => write!(f, "LuaValue::Nil"),
            LuaValue::Boolean(b) => write!(f, "LuaValue::Boolean({b})"),
            LuaValue::Integer(n) => write!(f, "LuaValue::Integer({n})"),
            LuaValue::Float(n) => write!(f, "LuaValue::Float({n})"),
            LuaValue::LuaString(s) => write!(f, "LuaValue::LuaString({s:?})"),
            LuaValue::NativeFunction(n) => write!(f, "LuaValue::NativeFunction({})", n.name()),
            other => write!(
                f,
                "LuaValue::{}({:#x})",
                other.type_name(),
                other.identity().unwrap_or_default()
            ),
        }
    }
}

impl std::fmt::Display for LuaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaValue::Nil => write!(f, "nil"),
            LuaValue::Boolean(b) => write!(f, "{b}"),
            LuaValue::Integer(n) => write!(f, "{n}"),
            LuaValue::Float(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{n:.1}")
                } else if n.is_nan() {
                    write!(f, "nan")
                } else if n.is_infinite() {
                    write!(f, "{}inf", if *n < 0.0 { "-" } else { "" })
                } else {
                    write!(f, "{n}")
                }
            }
            LuaValue::LuaString(s) => write!(f, "{s}"),
            LuaValue::NativeFunction(_) | LuaValue::Closure(_) => {
                write!(f, "function: {:#x}", self.identity().unwrap_or_default())
            }
            other => write!(
                f,
                "{}: {:#x}",
                other.type_name(),
                other.identity().unwrap_or_default()
            ),
        }
    }
}
