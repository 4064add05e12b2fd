use crate::function::{LuaClosure, Upvalue};
use crate::value::{LuaValue, TableRef};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Registers addressable by one frame (operands are `u8`).
pub(crate) const FRAME_SIZE: usize = 256;

/// Coroutine status as reported by `coroutine.status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Created or yielded; can be resumed.
    Suspended,
    Running,
    /// Resumed another coroutine and is waiting for it.
    Normal,
    /// Returned or raised an error.
    Dead,
}

impl ThreadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreadStatus::Suspended => "suspended",
            ThreadStatus::Running => "running",
            ThreadStatus::Normal => "normal",
            ThreadStatus::Dead => "dead",
        }
    }
}

pub(crate) struct ThreadCell {
    /// Index of this thread's execution slot in the owning state.
    pub(crate) slot: usize,
    /// Id of the owning [`LuaState`](crate::LuaState).
    pub(crate) state_id: u64,
    status: Mutex<ThreadStatus>,
    env: RwLock<TableRef>,
}

/// Handle to a coroutine. The call stack itself lives in the owning state;
/// the slot is reclaimed once every handle is gone.
#[derive(Clone)]
pub struct LuaThread(pub(crate) Arc<ThreadCell>);

impl LuaThread {
    pub(crate) fn new(slot: usize, state_id: u64, status: ThreadStatus, env: TableRef) -> Self {
        LuaThread(Arc::new(ThreadCell {
            slot,
            state_id,
            status: Mutex::new(status),
            env: RwLock::new(env),
        }))
    }

    pub fn status(&self) -> ThreadStatus {
        *self.0.status.lock()
    }

    pub(crate) fn set_status(&self, status: ThreadStatus) {
        *self.0.status.lock() = status;
    }

    pub fn env(&self) -> TableRef {
        self.0.env.read().clone()
    }

    pub fn set_env(&self, env: TableRef) {
        *self.0.env.write() = env;
    }

    pub(crate) fn slot(&self) -> usize {
        self.0.slot
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for LuaThread {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for LuaThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaThread")
            .field("slot", &self.0.slot)
            .field("status", &self.status())
            .finish()
    }
}

// ── Execution stack ───────────────────────────────────────────────────────────

/// A single entry on the call stack.
pub(crate) struct CallFrame {
    pub(crate) closure: Arc<LuaClosure>,
    /// Instruction pointer (index into `closure.proto.instructions`).
    pub(crate) ip: usize,
    /// Absolute index of this frame's register 0.
    pub(crate) base: usize,
    /// Absolute index where results go in the caller's registers. `None`
    /// marks the entry frame of an `execute`: its results are handed back
    /// to Rust.
    pub(crate) result_base: Option<usize>,
    pub(crate) expected_results: u8,
    /// Arguments beyond `param_count`.
    pub(crate) varargs: Vec<LuaValue>,
    /// End (absolute, exclusive) of the last variable-length value run.
    pub(crate) top: usize,
}

/// What the next resume delivers its arguments to.
pub(crate) enum Pending {
    /// Results of the `yield` call made from a Lua frame.
    Resume { result_base: usize, expected: u8 },
    /// A native body yielded; resuming finishes the coroutine.
    Finish,
}

#[derive(Default)]
pub(crate) struct ExecStack {
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) regs: Vec<LuaValue>,
    /// Open upvalue cells keyed by absolute register.
    pub(crate) open_upvalues: Vec<(usize, Upvalue)>,
    pub(crate) pending: Option<Pending>,
    /// Callable a coroutine runs on its first resume.
    pub(crate) body: Option<LuaValue>,
}

impl ExecStack {
    pub(crate) fn ensure(&mut self, len: usize) {
        if self.regs.len() < len {
            self.regs.resize(len, LuaValue::Nil);
        }
    }

    /// Where a frame entered from Rust may start without clobbering live
    /// registers of the frame below.
    pub(crate) fn nested_base(&self) -> usize {
        self.frames
            .last()
            .map(|f| (f.base + FRAME_SIZE).max(f.top))
            .unwrap_or(0)
    }

    /// Close every open upvalue whose register is `>= from`.
    pub(crate) fn close_upvalues(&mut self, from: usize) {
        let regs = &self.regs;
        self.open_upvalues.retain(|(reg, cell)| {
            if *reg >= from {
                cell.close(regs.get(*reg).cloned().unwrap_or_default());
                false
            } else {
                true
            }
        });
    }

    /// Pop frames down to `depth`, closing their upvalues.
    pub(crate) fn unwind_to(&mut self, depth: usize) {
        if self.frames.len() <= depth {
            return;
        }
        let from = self.frames[depth].base;
        self.frames.truncate(depth);
        self.close_upvalues(from);
    }

    /// Drop the whole stack. Upvalues captured from it keep their last values.
    pub(crate) fn reset(&mut self) {
        self.close_upvalues(0);
        *self = ExecStack::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::UpvalueInner;

    #[test]
    fn status_names() {
        assert_eq!(ThreadStatus::Suspended.as_str(), "suspended");
        assert_eq!(ThreadStatus::Running.as_str(), "running");
        assert_eq!(ThreadStatus::Normal.as_str(), "normal");
        assert_eq!(ThreadStatus::Dead.as_str(), "dead");
    }

    #[test]
    fn closing_copies_register_values() {
        let mut stack = ExecStack::default();
        stack.ensure(4);
        stack.regs[1] = LuaValue::Integer(10);
        stack.regs[3] = LuaValue::Integer(30);
        let low = Upvalue::open(1, 0, 1);
        let high = Upvalue::open(1, 0, 3);
        stack.open_upvalues.push((1, low.clone()));
        stack.open_upvalues.push((3, high.clone()));

        stack.close_upvalues(2);
        assert_eq!(stack.open_upvalues.len(), 1);
        assert!(matches!(&*high.0.lock(), UpvalueInner::Closed(LuaValue::Integer(30))));
        assert!(matches!(&*low.0.lock(), UpvalueInner::Open { index: 1, .. }));

        stack.reset();
        assert!(matches!(&*low.0.lock(), UpvalueInner::Closed(LuaValue::Integer(10))));
        assert!(stack.regs.is_empty());
    }
}
