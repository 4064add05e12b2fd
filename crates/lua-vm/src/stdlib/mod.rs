//! Core libraries and the [`Library`] registration helper.

mod base;
mod coroutine;
mod package;

use crate::error::LuaError;
use crate::function::NativeFn;
use crate::state::LuaState;
use crate::value::{LuaValue, TableRef};
use indexmap::IndexMap;
use std::sync::Arc;

/// A named set of native functions and nested libraries, installed into a
/// table with [`LuaState::install`].
#[derive(Clone, Default)]
pub struct Library {
    entries: IndexMap<String, LibEntry>,
}

#[derive(Clone)]
enum LibEntry {
    Function(Arc<NativeFn>),
    Table(Library),
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&mut LuaState, Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> + Send + Sync + 'static,
    {
        self.entries.insert(name.to_owned(), LibEntry::Function(Arc::new(f)));
        self
    }

    /// A nested library, installed as a sub-table `name`.
    pub fn table(mut self, name: &str, lib: Library) -> Self {
        self.entries.insert(name.to_owned(), LibEntry::Table(lib));
        self
    }
}

impl LuaState {
    /// Install `lib` into the globals table.
    pub fn install(&mut self, lib: &Library) {
        let globals = self.globals();
        self.install_into(&globals, lib);
    }

    /// Install `lib` into `target`. Installing again overwrites functions
    /// and merges into existing sub-tables.
    pub fn install_into(&mut self, target: &TableRef, lib: &Library) {
        for (name, entry) in &lib.entries {
            match entry {
                LibEntry::Function(f) => {
                    let f = f.clone();
                    let value = self.create_function(name, move |lua, args| f(lua, args));
                    target.write().set_str(name, value);
                }
                LibEntry::Table(sub) => {
                    let existing = target.read().get_str(name);
                    let table = match existing {
                        LuaValue::Table(t) => t,
                        _ => {
                            let t = self.create_table();
                            target.write().set_str(name, LuaValue::Table(t.clone()));
                            t
                        }
                    };
                    self.install_into(&table, sub);
                }
            }
        }
    }
}

pub(crate) fn open_core(lua: &mut LuaState, globals: &TableRef) {
    let core = base::library()
        .table("coroutine", coroutine::library())
        .table("package", package::library());
    lua.install_into(globals, &core);

    let mut g = globals.write();
    g.set_str("_G", LuaValue::Table(globals.clone()));
    g.set_str("_VERSION", "Lua 5.1".into());
    if let LuaValue::Table(package) = g.get_str("package") {
        package
            .write()
            .set_str("preload", LuaValue::Table(lua.package.preload.clone()));
    }
}

// ── Argument helpers ──────────────────────────────────────────────────────────

pub(crate) fn arg(args: &[LuaValue], i: usize) -> LuaValue {
    args.get(i).cloned().unwrap_or_default()
}

fn kind_of(v: Option<&LuaValue>) -> &'static str {
    v.map_or("no value", LuaValue::type_name)
}

pub(crate) fn check_any(args: &[LuaValue], i: usize, function: &'static str) -> Result<LuaValue, LuaError> {
    args.get(i)
        .cloned()
        .ok_or_else(|| LuaError::bad_arg(i + 1, function, "value expected"))
}

pub(crate) fn check_table(args: &[LuaValue], i: usize, function: &'static str) -> Result<TableRef, LuaError> {
    match args.get(i) {
        Some(LuaValue::Table(t)) => Ok(t.clone()),
        other => Err(LuaError::bad_arg(
            i + 1,
            function,
            format!("table expected, got {}", kind_of(other)),
        )),
    }
}

pub(crate) fn check_string(args: &[LuaValue], i: usize, function: &'static str) -> Result<String, LuaError> {
    match args.get(i) {
        Some(LuaValue::LuaString(s)) => Ok(s.clone()),
        Some(v @ (LuaValue::Integer(_) | LuaValue::Float(_))) => Ok(v.to_string()),
        other => Err(LuaError::bad_arg(
            i + 1,
            function,
            format!("string expected, got {}", kind_of(other)),
        )),
    }
}

pub(crate) fn check_integer(args: &[LuaValue], i: usize, function: &'static str) -> Result<i64, LuaError> {
    match args.get(i).and_then(LuaValue::to_number) {
        Some(LuaValue::Integer(n)) => Ok(n),
        Some(LuaValue::Float(f)) if f.fract() == 0.0 => Ok(f as i64),
        _ => Err(LuaError::bad_arg(
            i + 1,
            function,
            format!("number expected, got {}", kind_of(args.get(i))),
        )),
    }
}
