use crate::config::RuntimeConfig;
use crate::error::LuaError;
use crate::function::{NativeFunction, Upvalue, UpvalueInner};
use crate::hook::{InterruptHook, SafePoint};
use crate::package::Package;
use crate::stdlib;
use crate::table::LuaTable;
use crate::teardown;
use crate::thread::{ExecStack, LuaThread, ThreadCell, ThreadStatus};
use crate::value::{LuaValue, TableRef};
use lua_core::Compile;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

/// Execution slot of one thread. Slot 0 is the main thread.
pub(crate) struct ThreadSlot {
    pub(crate) handle: Weak<ThreadCell>,
    pub(crate) stack: ExecStack,
}

/// Heap objects that can take part in reference cycles, tracked weakly so
/// that dropping the state can break the cycles.
#[derive(Default)]
struct Tracked {
    tables: Vec<Weak<RwLock<LuaTable>>>,
    cells: Vec<Weak<Mutex<UpvalueInner>>>,
    prune_at: usize,
}

impl Tracked {
    fn maybe_prune(&mut self) {
        if self.tables.len() + self.cells.len() < self.prune_at.max(1024) {
            return;
        }
        self.tables.retain(|w| w.strong_count() > 0);
        self.cells.retain(|w| w.strong_count() > 0);
        self.prune_at = 2 * (self.tables.len() + self.cells.len());
    }
}

/// One embedded runtime instance.
///
/// Owns the main thread, the globals table, the module cache and every
/// coroutine's call stack. Exactly one thread runs at a time; independent
/// states can be driven from different OS threads.
pub struct LuaState {
    id: u64,
    pub(crate) config: RuntimeConfig,
    globals: TableRef,
    pub(crate) threads: Vec<ThreadSlot>,
    main_thread: LuaThread,
    pub(crate) current: LuaThread,
    /// Threads that resumed the current one, innermost last.
    pub(crate) resumers: Vec<LuaThread>,
    compiler: Option<Arc<dyn Compile>>,
    pub(crate) package: Package,
    hook: Option<Box<dyn InterruptHook>>,
    pub(crate) native_depth: usize,
    tracked: Tracked,
}

impl LuaState {
    /// A state with the core libraries (`base`, `coroutine`, `package`)
    /// installed.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let mut lua = Self::bare(config);
        let globals = lua.globals();
        stdlib::open_core(&mut lua, &globals);
        lua
    }

    /// A state with an empty globals table.
    pub fn bare(config: RuntimeConfig) -> Self {
        let id = NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed);
        let globals: TableRef = Arc::default();
        let main_thread = LuaThread::new(0, id, ThreadStatus::Running, globals.clone());
        let mut lua = LuaState {
            id,
            config,
            globals: globals.clone(),
            threads: vec![ThreadSlot {
                handle: Arc::downgrade(&main_thread.0),
                stack: ExecStack::default(),
            }],
            current: main_thread.clone(),
            main_thread,
            resumers: Vec::new(),
            compiler: None,
            package: Package::new(),
            hook: None,
            native_depth: 0,
            tracked: Tracked::default(),
        };
        lua.tracked.tables.push(Arc::downgrade(&globals));
        let preload = lua.create_table();
        lua.package.preload = preload;
        tracing::debug!(state = id, "created runtime state");
        lua
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn globals(&self) -> TableRef {
        self.globals.clone()
    }

    pub fn main_thread(&self) -> LuaThread {
        self.main_thread.clone()
    }

    pub fn current_thread(&self) -> LuaThread {
        self.current.clone()
    }

    /// Environment of the running thread; top-level chunks start with it.
    pub fn current_env(&self) -> TableRef {
        self.current.env()
    }

    pub fn package_mut(&mut self) -> &mut Package {
        &mut self.package
    }

    pub fn set_compiler(&mut self, compiler: impl Compile + 'static) {
        self.compiler = Some(Arc::new(compiler));
    }

    pub(crate) fn compiler(&self) -> Option<Arc<dyn Compile>> {
        self.compiler.clone()
    }

    pub fn set_interrupt_hook(&mut self, hook: impl InterruptHook + 'static) {
        self.hook = Some(Box::new(hook));
    }

    pub fn clear_interrupt_hook(&mut self) {
        self.hook = None;
    }

    pub(crate) fn poll_hook(&mut self, at: SafePoint) -> Result<(), LuaError> {
        if let Some(hook) = self.hook.as_mut() {
            hook.check(at).map_err(LuaError::Interrupted)?;
        }
        Ok(())
    }

    // ── Object creation ───────────────────────────────────────────────────────

    pub fn create_table(&mut self) -> TableRef {
        let t: TableRef = Arc::default();
        self.tracked.tables.push(Arc::downgrade(&t));
        self.tracked.maybe_prune();
        t
    }

    /// Wrap a host function. Its environment is that of the Lua function
    /// running on the current thread, or the thread's own when no Lua
    /// function is active.
    pub fn create_function<F>(&mut self, name: &str, func: F) -> LuaValue
    where
        F: Fn(&mut LuaState, Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> + Send + Sync + 'static,
    {
        let env = self.constructor_env();
        self.create_function_with_env(name, env, func)
    }

    fn constructor_env(&self) -> TableRef {
        self.threads
            .get(self.current.slot())
            .and_then(|slot| slot.stack.frames.last())
            .map(|frame| frame.closure.env())
            .unwrap_or_else(|| self.current_env())
    }

    pub fn create_function_with_env<F>(&mut self, name: &str, env: TableRef, func: F) -> LuaValue
    where
        F: Fn(&mut LuaState, Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> + Send + Sync + 'static,
    {
        LuaValue::NativeFunction(Arc::new(NativeFunction::new(name, env, func)))
    }

    pub(crate) fn track_cell(&mut self, cell: &Upvalue) {
        self.tracked.cells.push(Arc::downgrade(&cell.0));
        self.tracked.maybe_prune();
    }

    // ── Thread slots ──────────────────────────────────────────────────────────

    /// Allocate an execution slot for a new coroutine, reusing the slot of a
    /// thread nobody can reach any more.
    pub(crate) fn alloc_thread(&mut self, body: LuaValue, env: TableRef) -> LuaThread {
        let slot = match self.reclaimable_slot() {
            Some(slot) => slot,
            None => {
                self.threads.push(ThreadSlot {
                    handle: Weak::new(),
                    stack: ExecStack::default(),
                });
                self.threads.len() - 1
            }
        };
        let thread = LuaThread::new(slot, self.id, ThreadStatus::Suspended, env);
        let entry = &mut self.threads[slot];
        entry.handle = Arc::downgrade(&thread.0);
        entry.stack.body = Some(body);
        tracing::trace!(slot, "allocated thread slot");
        thread
    }

    fn reclaimable_slot(&mut self) -> Option<usize> {
        let slot = (1..self.threads.len()).find(|&i| self.threads[i].handle.strong_count() == 0)?;
        self.threads[slot].stack.reset();
        Some(slot)
    }

    /// Release the stacks of unreachable coroutines. Returns how many were
    /// released. Slots are also reclaimed lazily when threads are created.
    pub fn collect_threads(&mut self) -> usize {
        let mut released = 0;
        for slot in self.threads.iter_mut().skip(1) {
            let stale = slot.handle.strong_count() == 0
                && (!slot.stack.frames.is_empty() || slot.stack.body.is_some());
            if stale {
                slot.stack.reset();
                released += 1;
            }
        }
        if released > 0 {
            tracing::debug!(released, "reclaimed suspended thread stacks");
        }
        released
    }

    pub(crate) fn stack(&mut self, tid: usize) -> &mut ExecStack {
        &mut self.threads[tid].stack
    }

    pub(crate) fn enter_native(&mut self) -> Result<(), LuaError> {
        if self.native_depth >= self.config.max_native_depth {
            return Err(LuaError::StackOverflow);
        }
        self.native_depth += 1;
        Ok(())
    }

    pub(crate) fn leave_native(&mut self) {
        self.native_depth = self.native_depth.saturating_sub(1);
    }
}

impl Default for LuaState {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LuaState {
    fn drop(&mut self) {
        for slot in &mut self.threads {
            slot.stack.reset();
        }
        // release the state's own handles so only outside references remain
        let detached = LuaThread::new(0, self.id, ThreadStatus::Dead, TableRef::default());
        self.main_thread = detached.clone();
        self.current = detached;
        self.resumers.clear();
        self.globals = TableRef::default();
        self.package = Package::new();
        self.compiler = None;
        self.hook = None;

        let tables = self.tracked.tables.drain(..).filter_map(|w| w.upgrade()).collect();
        let cells = self
            .tracked
            .cells
            .drain(..)
            .filter_map(|w| w.upgrade())
            .map(Upvalue)
            .collect();
        let cleared = teardown::break_cycles(tables, cells);
        tracing::debug!(state = self.id, cleared, "tore down runtime state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lua_chunk::ProtoBuilder;
    use lua_core::{OpCode, UpvalueDesc};

    fn assert_send<T: Send>() {}

    #[test]
    fn state_is_send() {
        assert_send::<LuaState>();
    }

    #[test]
    fn dropping_the_state_breaks_table_cycles() {
        let weak = {
            let mut lua = LuaState::new();
            let a = lua.create_table();
            let b = lua.create_table();
            a.write().set_str("peer", LuaValue::Table(b.clone()));
            b.write().set_str("peer", LuaValue::Table(a.clone()));
            a.write().set_metatable(Some(b.clone()));
            Arc::downgrade(&a)
        };
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn required_modules_outlive_the_state() {
        let module = {
            let mut lua = LuaState::new();
            let loader = lua.create_function("cfg", |lua, _| {
                let t = lua.create_table();
                t.write().set_str("answer", LuaValue::Integer(42));
                t.write().set_str("me", LuaValue::Table(t.clone()));
                Ok(vec![LuaValue::Table(t)])
            });
            lua.package_mut().preload().write().set_str("cfg", loader);
            lua.require("cfg").unwrap()
        };
        let m = module.as_table().unwrap();
        assert_eq!(m.read().get_str("answer"), LuaValue::Integer(42));
        assert!(matches!(m.read().get_str("me"), LuaValue::Table(me) if Arc::ptr_eq(&me, m)));
    }

    #[test]
    fn host_held_values_keep_what_they_reach() {
        // (function() local x = 7 return function() return x end end)()
        let mut child = ProtoBuilder::new("=child");
        child.add_upvalue(UpvalueDesc::Stack(0));
        child.emit(OpCode::GetUpvalue { dst: 0, upval_idx: 0 });
        child.emit(OpCode::Return { src: 0, num_results: 1 });

        let (getter, orphan) = {
            let mut lua = LuaState::new();
            let mut b = ProtoBuilder::new("=outer");
            let seven = b.add_constant(7i64);
            let child = b.add_proto(child.finish());
            b.emit(OpCode::LoadConst { dst: 0, const_idx: seven });
            b.emit(OpCode::Closure { dst: 1, proto_idx: child });
            b.emit(OpCode::Return { src: 1, num_results: 1 });
            let outer = lua.load_proto(b.finish());
            let getter = lua.call(&outer, vec![]).unwrap().remove(0);

            let orphan = lua.create_table();
            orphan.write().set_str("me", LuaValue::Table(orphan.clone()));
            (getter, Arc::downgrade(&orphan))
        };
        assert!(orphan.upgrade().is_none());

        let mut fresh = LuaState::new();
        assert_eq!(fresh.call(&getter, vec![]).unwrap(), vec![LuaValue::Integer(7)]);
    }

    #[test]
    fn unreachable_thread_slots_are_reused() {
        let mut lua = LuaState::new();
        let f = lua.create_function("noop", |_, _| Ok(vec![]));
        let env = lua.current_env();
        let first = lua.alloc_thread(f.clone(), env.clone());
        let slot = first.slot();
        drop(first);
        assert_eq!(lua.collect_threads(), 1);
        let second = lua.alloc_thread(f, env);
        assert_eq!(second.slot(), slot);
    }
}
