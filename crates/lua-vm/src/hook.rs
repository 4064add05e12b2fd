/// Places where the interpreter polls the interrupt hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafePoint {
    /// A jump to an earlier instruction (every loop iteration).
    BackwardJump,
    /// Any function call made by bytecode.
    Call,
}

/// Host-supplied cancellation check.
///
/// Returning `Err(reason)` aborts the running script with
/// [`LuaError::Interrupted`](crate::LuaError::Interrupted), which neither
/// `pcall` nor `coroutine.resume` can catch.
pub trait InterruptHook: Send {
    fn check(&mut self, at: SafePoint) -> Result<(), String>;
}

impl<F> InterruptHook for F
where
    F: FnMut(SafePoint) -> Result<(), String> + Send,
{
    fn check(&mut self, at: SafePoint) -> Result<(), String> {
        self(at)
    }
}

/// Interrupts after a fixed number of safe points.
#[derive(Debug, Clone)]
pub struct Budget {
    remaining: u64,
}

impl Budget {
    pub fn new(steps: u64) -> Self {
        Self { remaining: steps }
    }
}

impl InterruptHook for Budget {
    fn check(&mut self, _at: SafePoint) -> Result<(), String> {
        if self.remaining == 0 {
            return Err("execution budget exhausted".to_owned());
        }
        self.remaining -= 1;
        Ok(())
    }
}
