use crate::error::LuaError;
use crate::interp::RunOutcome;
use crate::state::LuaState;
use crate::thread::{LuaThread, Pending, ThreadStatus};
use crate::value::{LuaValue, TableRef};
use lua_core::MULTI;

/// Result of [`LuaState::resume`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeOutcome {
    /// The coroutine yielded these values and can be resumed again.
    Yielded(Vec<LuaValue>),
    /// The body returned; the coroutine is dead.
    Finished(Vec<LuaValue>),
    /// The coroutine raised an error or could not be resumed.
    Failed(LuaValue),
}

impl ResumeOutcome {
    /// `true, values...` or `false, error` as `coroutine.resume` returns it.
    pub fn into_values(self) -> Vec<LuaValue> {
        match self {
            ResumeOutcome::Yielded(mut vals) | ResumeOutcome::Finished(mut vals) => {
                vals.insert(0, LuaValue::Boolean(true));
                vals
            }
            ResumeOutcome::Failed(err) => vec![LuaValue::Boolean(false), err],
        }
    }
}

impl LuaState {
    /// New suspended coroutine running `body`.
    ///
    /// Its environment is the body's environment for a Lua closure, otherwise
    /// the running thread's.
    pub fn create_thread(&mut self, body: LuaValue) -> Result<LuaThread, LuaError> {
        let env = match &body {
            LuaValue::Closure(c) => c.env(),
            _ => self.current_env(),
        };
        self.create_thread_with_env(body, env)
    }

    pub fn create_thread_with_env(&mut self, body: LuaValue, env: TableRef) -> Result<LuaThread, LuaError> {
        if !self.is_callable(&body) {
            return Err(LuaError::TypeError {
                operation: "call",
                got: body.type_name(),
            });
        }
        Ok(self.alloc_thread(body, env))
    }

    /// Run `thread` until it yields, returns or fails.
    ///
    /// Errors raised inside the coroutine come back as
    /// [`ResumeOutcome::Failed`]; only an interrupt propagates as `Err`.
    pub fn resume(&mut self, thread: &LuaThread, args: Vec<LuaValue>) -> Result<ResumeOutcome, LuaError> {
        if thread.0.state_id != self.id() {
            return Ok(ResumeOutcome::Failed(
                "cannot resume a coroutine of another state".into(),
            ));
        }
        match thread.status() {
            ThreadStatus::Suspended => {}
            ThreadStatus::Dead => {
                return Ok(ResumeOutcome::Failed("cannot resume dead coroutine".into()))
            }
            ThreadStatus::Running | ThreadStatus::Normal => {
                return Ok(ResumeOutcome::Failed(
                    "cannot resume non-suspended coroutine".into(),
                ))
            }
        }
        if let Err(e) = self.enter_native() {
            return Ok(ResumeOutcome::Failed(e.into_value()));
        }

        let tid = thread.slot();
        let resumer = std::mem::replace(&mut self.current, thread.clone());
        resumer.set_status(ThreadStatus::Normal);
        self.resumers.push(resumer.clone());
        thread.set_status(ThreadStatus::Running);
        tracing::debug!(slot = tid, nargs = args.len(), "resuming coroutine");

        let result = self.run_thread(tid, args);

        self.resumers.pop();
        self.current = resumer.clone();
        resumer.set_status(ThreadStatus::Running);
        self.leave_native();

        match result {
            Ok(RunOutcome::Yielded(vals)) => {
                thread.set_status(ThreadStatus::Suspended);
                tracing::debug!(slot = tid, nvals = vals.len(), "coroutine yielded");
                Ok(ResumeOutcome::Yielded(vals))
            }
            Ok(RunOutcome::Returned(vals)) => {
                self.finish_thread(thread);
                tracing::debug!(slot = tid, "coroutine finished");
                Ok(ResumeOutcome::Finished(vals))
            }
            Err(e @ LuaError::Interrupted(_)) => {
                self.finish_thread(thread);
                Err(e)
            }
            Err(e) => {
                self.finish_thread(thread);
                tracing::debug!(slot = tid, error = %e, "coroutine failed");
                Ok(ResumeOutcome::Failed(e.into_value()))
            }
        }
    }

    fn finish_thread(&mut self, thread: &LuaThread) {
        thread.set_status(ThreadStatus::Dead);
        self.stack(thread.slot()).reset();
    }

    fn run_thread(&mut self, tid: usize, mut args: Vec<LuaValue>) -> Result<RunOutcome, LuaError> {
        if let Some(body) = self.stack(tid).body.take() {
            return match self.resolve_callable(body, &mut args)? {
                LuaValue::Closure(c) => {
                    self.push_frame(tid, c, args, 0, None, MULTI)?;
                    self.execute(tid, 1, true)
                }
                LuaValue::NativeFunction(f) => match f.invoke(self, args) {
                    Ok(vals) => Ok(RunOutcome::Returned(vals)),
                    Err(LuaError::Yield(vals)) => {
                        self.stack(tid).pending = Some(Pending::Finish);
                        Ok(RunOutcome::Yielded(vals))
                    }
                    Err(e) => Err(e),
                },
                other => Err(LuaError::TypeError {
                    operation: "call",
                    got: other.type_name(),
                }),
            };
        }
        match self.stack(tid).pending.take() {
            Some(Pending::Resume { result_base, expected }) => {
                self.place_results(tid, result_base, expected, args);
                self.execute(tid, 1, true)
            }
            Some(Pending::Finish) => Ok(RunOutcome::Returned(args)),
            None => Err(LuaError::Internal("suspended coroutine has no continuation".into())),
        }
    }

    /// The error a native returns to yield `values` from the running
    /// coroutine. On the main thread this is
    /// [`LuaError::YieldOutsideCoroutine`].
    pub fn yield_now(&self, values: Vec<LuaValue>) -> LuaError {
        if self.current == self.main_thread() {
            LuaError::YieldOutsideCoroutine
        } else {
            LuaError::Yield(values)
        }
    }

    /// Whether a coroutine (rather than the main thread) is running.
    pub fn in_coroutine(&self) -> bool {
        self.current != self.main_thread()
    }
}
