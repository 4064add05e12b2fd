use crate::dispatch::MetaOp;
use crate::error::LuaError;
use crate::function::{LuaClosure, Upvalue, UpvalueInner};
use crate::hook::SafePoint;
use crate::state::LuaState;
use crate::thread::{CallFrame, Pending, FRAME_SIZE};
use crate::value::LuaValue;
use lua_core::{OpCode, Proto, UpvalueDesc, MULTI};
use std::sync::Arc;

pub(crate) enum RunOutcome {
    Returned(Vec<LuaValue>),
    Yielded(Vec<LuaValue>),
}

fn malformed(what: &str) -> LuaError {
    LuaError::Internal(format!("malformed bytecode: {what}"))
}

impl LuaState {
    /// Call any callable value and collect all of its results.
    ///
    /// This is a native boundary: a `coroutine.yield` below it cannot
    /// suspend the running coroutine and fails instead.
    pub fn call(&mut self, f: &LuaValue, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
        self.enter_native()?;
        let result = self.call_inner(f.clone(), args);
        self.leave_native();
        result.map_err(|e| match e {
            LuaError::Yield(_) => LuaError::YieldAcrossBoundary,
            e => e,
        })
    }

    fn call_inner(&mut self, f: LuaValue, mut args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
        match self.resolve_callable(f, &mut args)? {
            LuaValue::Closure(c) => {
                let tid = self.current.slot();
                let base = self.stack(tid).nested_base();
                let depth = self.stack(tid).frames.len();
                self.push_frame(tid, c, args, base, None, MULTI)?;
                match self.execute(tid, depth + 1, false)? {
                    RunOutcome::Returned(vals) => Ok(vals),
                    RunOutcome::Yielded(_) => Err(LuaError::YieldAcrossBoundary),
                }
            }
            LuaValue::NativeFunction(n) => n.invoke(self, args),
            other => Err(LuaError::TypeError {
                operation: "call",
                got: other.type_name(),
            }),
        }
    }

    /// The function to run for `f`: `f` itself, or its `__call` handler with
    /// `f` prepended to the arguments.
    pub(crate) fn resolve_callable(&self, f: LuaValue, args: &mut Vec<LuaValue>) -> Result<LuaValue, LuaError> {
        if f.is_function() {
            return Ok(f);
        }
        let handler = self.call_handler(&f)?;
        if !handler.is_function() {
            return Err(LuaError::TypeError {
                operation: "call",
                got: f.type_name(),
            });
        }
        args.insert(0, f);
        Ok(handler)
    }

    /// Push a Lua frame whose register 0 is `base`.
    pub(crate) fn push_frame(
        &mut self,
        tid: usize,
        closure: Arc<LuaClosure>,
        mut args: Vec<LuaValue>,
        base: usize,
        result_base: Option<usize>,
        expected_results: u8,
    ) -> Result<(), LuaError> {
        let max_depth = self.config.max_call_depth;
        let stack = self.stack(tid);
        if stack.frames.len() >= max_depth {
            return Err(LuaError::StackOverflow);
        }
        stack.ensure(base + FRAME_SIZE);
        stack.regs[base..base + FRAME_SIZE].fill(LuaValue::Nil);

        let params = closure.proto.param_count as usize;
        let extra = if args.len() > params {
            args.split_off(params)
        } else {
            Vec::new()
        };
        for (slot, arg) in stack.regs[base..].iter_mut().zip(args) {
            *slot = arg;
        }
        let varargs = if closure.proto.is_vararg { extra } else { Vec::new() };

        stack.frames.push(CallFrame {
            closure,
            ip: 0,
            base,
            result_base,
            expected_results,
            varargs,
            top: base,
        });
        Ok(())
    }

    /// Run frames on thread `tid` until the frame at `entry_depth` returns.
    ///
    /// With `resumable`, a yield from a native called by any of these frames
    /// suspends the thread and leaves the frames in place; otherwise it is an
    /// error. On error the frames are unwound.
    pub(crate) fn execute(&mut self, tid: usize, entry_depth: usize, resumable: bool) -> Result<RunOutcome, LuaError> {
        let result = self.run_loop(tid, resumable);
        if result.is_err() {
            self.stack(tid).unwind_to(entry_depth.saturating_sub(1));
        }
        result
    }

    fn run_loop(&mut self, tid: usize, resumable: bool) -> Result<RunOutcome, LuaError> {
        loop {
            let (closure, ip, base) = {
                let frame = self
                    .stack(tid)
                    .frames
                    .last_mut()
                    .ok_or_else(|| LuaError::Internal("empty call stack".into()))?;
                frame.ip += 1;
                (frame.closure.clone(), frame.ip - 1, frame.base)
            };
            let proto: &Proto = &closure.proto;

            let Some(op) = proto.instructions.get(ip).copied() else {
                // running off the end returns no values
                match self.return_from_frame(tid, Vec::new()) {
                    Some(vals) => return Ok(RunOutcome::Returned(vals)),
                    None => continue,
                }
            };

            macro_rules! reg {
                ($r:expr) => {
                    self.threads[tid].stack.regs[base + $r as usize]
                };
            }
            macro_rules! arith {
                ($op:expr, $dst:expr, $lhs:expr, $rhs:expr) => {{
                    let (a, b) = (reg!($lhs).clone(), reg!($rhs).clone());
                    let v = self.arith($op, &a, &b)?;
                    reg!($dst) = v;
                }};
            }
            macro_rules! compare {
                ($op:expr, $dst:expr, $lhs:expr, $rhs:expr) => {{
                    let (a, b) = (reg!($lhs).clone(), reg!($rhs).clone());
                    let v = self.compare($op, &a, &b)?;
                    reg!($dst) = LuaValue::Boolean(v);
                }};
            }
            let constant = |i: u16| {
                proto
                    .constants
                    .get(i as usize)
                    .map(LuaValue::from)
                    .ok_or_else(|| malformed("constant index out of range"))
            };
            let name = |i: u16| {
                proto
                    .names
                    .get(i as usize)
                    .map(|s| LuaValue::LuaString(s.clone()))
                    .ok_or_else(|| malformed("name index out of range"))
            };
            let upvalue = |i: u8| {
                closure
                    .upvalues
                    .get(i as usize)
                    .cloned()
                    .ok_or_else(|| malformed("upvalue index out of range"))
            };

            match op {
                OpCode::LoadConst { dst, const_idx } => reg!(dst) = constant(const_idx)?,
                OpCode::LoadNil { dst } => reg!(dst) = LuaValue::Nil,
                OpCode::LoadBool { dst, value, skip } => {
                    reg!(dst) = LuaValue::Boolean(value);
                    if skip {
                        self.jump(tid, 1)?;
                    }
                }
                OpCode::Move { dst, src } => reg!(dst) = reg!(src).clone(),

                OpCode::Add { dst, lhs, rhs } => arith!(MetaOp::Add, dst, lhs, rhs),
                OpCode::Sub { dst, lhs, rhs } => arith!(MetaOp::Sub, dst, lhs, rhs),
                OpCode::Mul { dst, lhs, rhs } => arith!(MetaOp::Mul, dst, lhs, rhs),
                OpCode::Div { dst, lhs, rhs } => arith!(MetaOp::Div, dst, lhs, rhs),
                OpCode::Mod { dst, lhs, rhs } => arith!(MetaOp::Mod, dst, lhs, rhs),
                OpCode::Pow { dst, lhs, rhs } => arith!(MetaOp::Pow, dst, lhs, rhs),
                OpCode::IDiv { dst, lhs, rhs } => arith!(MetaOp::IDiv, dst, lhs, rhs),
                OpCode::Concat { dst, lhs, rhs } => arith!(MetaOp::Concat, dst, lhs, rhs),
                OpCode::Unm { dst, src } => {
                    let a = reg!(src).clone();
                    reg!(dst) = self.unm(&a)?;
                }

                OpCode::Eq { dst, lhs, rhs } => compare!(MetaOp::Eq, dst, lhs, rhs),
                OpCode::Lt { dst, lhs, rhs } => compare!(MetaOp::Lt, dst, lhs, rhs),
                OpCode::Le { dst, lhs, rhs } => compare!(MetaOp::Le, dst, lhs, rhs),
                OpCode::Not { dst, src } => reg!(dst) = LuaValue::Boolean(!reg!(src).is_truthy()),
                OpCode::Len { dst, src } => {
                    let a = reg!(src).clone();
                    reg!(dst) = self.len(&a)?;
                }

                OpCode::Jump { offset } => self.jump(tid, offset)?,
                OpCode::JumpIfFalse { src, offset } => {
                    if !reg!(src).is_truthy() {
                        self.jump(tid, offset)?;
                    }
                }
                OpCode::JumpIfTrue { src, offset } => {
                    if reg!(src).is_truthy() {
                        self.jump(tid, offset)?;
                    }
                }

                OpCode::GetGlobal { dst, name_idx } => {
                    let env = LuaValue::Table(closure.env());
                    reg!(dst) = self.index(&env, &name(name_idx)?)?;
                }
                OpCode::SetGlobal { src, name_idx } => {
                    let env = LuaValue::Table(closure.env());
                    let val = reg!(src).clone();
                    self.set_index(&env, name(name_idx)?, val)?;
                }

                OpCode::Closure { dst, proto_idx } => {
                    let child = proto
                        .protos
                        .get(proto_idx as usize)
                        .cloned()
                        .ok_or_else(|| malformed("prototype index out of range"))?;
                    let upvalues = self.instantiate(tid, &closure, base, &child)?;
                    let env = closure.env();
                    reg!(dst) = LuaValue::Closure(Arc::new(LuaClosure::new(child, upvalues, env)));
                }
                OpCode::GetUpvalue { dst, upval_idx } => {
                    let cell = upvalue(upval_idx)?;
                    reg!(dst) = self.read_upvalue(&cell)?;
                }
                OpCode::SetUpvalue { src, upval_idx } => {
                    let cell = upvalue(upval_idx)?;
                    let val = reg!(src).clone();
                    self.write_upvalue(&cell, val)?;
                }
                OpCode::CloseUpvalues { from_reg } => {
                    self.stack(tid).close_upvalues(base + from_reg as usize);
                }

                OpCode::Call { func, num_args, num_results } => {
                    self.poll_hook(SafePoint::Call)?;
                    let func_abs = base + func as usize;
                    let end = if num_args == MULTI {
                        self.frame_top(tid)
                    } else {
                        func_abs + 1 + num_args as usize
                    };
                    let stack = self.stack(tid);
                    stack.ensure(end);
                    let callee = stack.regs[func_abs].clone();
                    let args = stack.regs[func_abs + 1..end.max(func_abs + 1)].to_vec();
                    if let Some(vals) = self.call_from_frame(tid, callee, args, func_abs, num_results, resumable)? {
                        return Ok(RunOutcome::Yielded(vals));
                    }
                }
                OpCode::Return { src, num_results } => {
                    let start = base + src as usize;
                    let end = if num_results == MULTI {
                        self.frame_top(tid)
                    } else {
                        start + num_results as usize
                    };
                    let stack = self.stack(tid);
                    stack.ensure(end);
                    let vals = stack.regs[start..end.max(start)].to_vec();
                    if let Some(vals) = self.return_from_frame(tid, vals) {
                        return Ok(RunOutcome::Returned(vals));
                    }
                }

                OpCode::NewTable { dst } => reg!(dst) = LuaValue::Table(self.create_table()),
                OpCode::GetTable { dst, table, key } => {
                    let (t, k) = (reg!(table).clone(), reg!(key).clone());
                    reg!(dst) = self.index(&t, &k)?;
                }
                OpCode::SetTable { table, key, val } => {
                    let (t, k, v) = (reg!(table).clone(), reg!(key).clone(), reg!(val).clone());
                    self.set_index(&t, k, v)?;
                }
                OpCode::GetField { dst, table, name_idx } => {
                    let t = reg!(table).clone();
                    reg!(dst) = self.index(&t, &name(name_idx)?)?;
                }
                OpCode::SetField { table, name_idx, val } => {
                    let (t, v) = (reg!(table).clone(), reg!(val).clone());
                    self.set_index(&t, name(name_idx)?, v)?;
                }
                OpCode::SetList { table, src, count } => {
                    let start = base + src as usize;
                    let end = if count == MULTI {
                        self.frame_top(tid)
                    } else {
                        start + count as usize
                    };
                    let LuaValue::Table(t) = reg!(table).clone() else {
                        return Err(malformed("SETLIST target is not a table"));
                    };
                    let stack = self.stack(tid);
                    stack.ensure(end);
                    let mut t = t.write();
                    for (i, v) in stack.regs[start..end.max(start)].iter().enumerate() {
                        t.set(LuaValue::Integer(i as i64 + 1), v.clone())?;
                    }
                }
                OpCode::VarArg { dst, count } => {
                    let stack = self.stack(tid);
                    let Some(frame) = stack.frames.last_mut() else {
                        return Err(LuaError::Internal("empty call stack".into()));
                    };
                    let start = base + dst as usize;
                    let n = if count == MULTI {
                        frame.varargs.len()
                    } else {
                        count as usize
                    };
                    let vals: Vec<LuaValue> = (0..n)
                        .map(|i| frame.varargs.get(i).cloned().unwrap_or_default())
                        .collect();
                    if count == MULTI {
                        frame.top = start + n;
                    }
                    stack.ensure(start + n);
                    for (slot, v) in stack.regs[start..].iter_mut().zip(vals) {
                        *slot = v;
                    }
                }
            }
        }
    }

    /// Dispatch a `CALL` instruction. Lua callees get a new frame on this
    /// thread; natives run immediately. Returns the yielded values when a
    /// native yields out of a resumable execution.
    fn call_from_frame(
        &mut self,
        tid: usize,
        callee: LuaValue,
        mut args: Vec<LuaValue>,
        func_abs: usize,
        expected: u8,
        resumable: bool,
    ) -> Result<Option<Vec<LuaValue>>, LuaError> {
        match self.resolve_callable(callee, &mut args)? {
            LuaValue::Closure(c) => {
                self.push_frame(tid, c, args, func_abs, Some(func_abs), expected)?;
                Ok(None)
            }
            LuaValue::NativeFunction(f) => match f.invoke(self, args) {
                Ok(vals) => {
                    self.place_results(tid, func_abs, expected, vals);
                    Ok(None)
                }
                Err(LuaError::Yield(vals)) if resumable => {
                    self.stack(tid).pending = Some(Pending::Resume {
                        result_base: func_abs,
                        expected,
                    });
                    Ok(Some(vals))
                }
                Err(LuaError::Yield(_)) => Err(LuaError::YieldAcrossBoundary),
                Err(e) => Err(e),
            },
            other => Err(LuaError::TypeError {
                operation: "call",
                got: other.type_name(),
            }),
        }
    }

    /// Pop the running frame. Returns the values when it was an entry frame.
    fn return_from_frame(&mut self, tid: usize, vals: Vec<LuaValue>) -> Option<Vec<LuaValue>> {
        let stack = self.stack(tid);
        let frame = stack.frames.pop()?;
        stack.close_upvalues(frame.base);
        match frame.result_base {
            None => Some(vals),
            Some(at) => {
                self.place_results(tid, at, frame.expected_results, vals);
                None
            }
        }
    }

    /// Write call results at `at` in the running frame. A [`MULTI`] count
    /// keeps them all and moves the frame's top past them.
    pub(crate) fn place_results(&mut self, tid: usize, at: usize, expected: u8, mut vals: Vec<LuaValue>) {
        let stack = self.stack(tid);
        if expected == MULTI {
            if let Some(frame) = stack.frames.last_mut() {
                frame.top = at + vals.len();
            }
        } else {
            vals.resize(expected as usize, LuaValue::Nil);
        }
        stack.ensure(at + vals.len());
        for (slot, v) in stack.regs[at..].iter_mut().zip(vals) {
            *slot = v;
        }
    }

    fn frame_top(&mut self, tid: usize) -> usize {
        self.stack(tid).frames.last().map(|f| f.top).unwrap_or(0)
    }

    fn jump(&mut self, tid: usize, offset: i16) -> Result<(), LuaError> {
        if offset < 0 {
            self.poll_hook(SafePoint::BackwardJump)?;
        }
        if let Some(frame) = self.stack(tid).frames.last_mut() {
            frame.ip = frame
                .ip
                .checked_add_signed(offset as isize)
                .ok_or_else(|| malformed("jump before the first instruction"))?;
        }
        Ok(())
    }

    // ── Upvalue helpers ───────────────────────────────────────────────────────

    /// Cells for a closure of `child` created by a frame of `enclosing`.
    /// Captures of the same register share one open cell.
    fn instantiate(
        &mut self,
        tid: usize,
        enclosing: &LuaClosure,
        base: usize,
        child: &Proto,
    ) -> Result<Vec<Upvalue>, LuaError> {
        let mut cells = Vec::with_capacity(child.upvalue_descs.len());
        for desc in &child.upvalue_descs {
            let cell = match *desc {
                UpvalueDesc::Stack(reg) => {
                    let abs = base + reg as usize;
                    let state = self.id();
                    let open = &mut self.threads[tid].stack.open_upvalues;
                    match open.iter().find(|(r, _)| *r == abs).map(|(_, c)| c.clone()) {
                        Some(cell) => cell,
                        None => {
                            let cell = Upvalue::open(state, tid, abs);
                            open.push((abs, cell.clone()));
                            self.track_cell(&cell);
                            cell
                        }
                    }
                }
                UpvalueDesc::Upvalue(idx) => enclosing
                    .upvalues
                    .get(idx as usize)
                    .cloned()
                    .ok_or_else(|| malformed("upvalue index out of range"))?,
            };
            cells.push(cell);
        }
        Ok(cells)
    }

    /// Thread slot holding an open cell's register. A closure carried into
    /// another state cannot reach the registers its cell points at.
    fn open_cell_thread(&self, state: u64, thread: usize) -> Result<usize, LuaError> {
        if state != self.id() || thread >= self.threads.len() {
            return Err(LuaError::Internal("upvalue belongs to another state".into()));
        }
        Ok(thread)
    }

    fn read_upvalue(&self, cell: &Upvalue) -> Result<LuaValue, LuaError> {
        match &*cell.0.lock() {
            UpvalueInner::Open { state, thread, index } => {
                let thread = self.open_cell_thread(*state, *thread)?;
                Ok(self.threads[thread].stack.regs.get(*index).cloned().unwrap_or_default())
            }
            UpvalueInner::Closed(v) => Ok(v.clone()),
        }
    }

    fn write_upvalue(&mut self, cell: &Upvalue, value: LuaValue) -> Result<(), LuaError> {
        let mut inner = cell.0.lock();
        let open = match &*inner {
            UpvalueInner::Open { state, thread, index } => Some((*state, *thread, *index)),
            UpvalueInner::Closed(_) => None,
        };
        match open {
            Some((state, thread, index)) => {
                drop(inner);
                let thread = self.open_cell_thread(state, thread)?;
                if let Some(slot) = self.threads[thread].stack.regs.get_mut(index) {
                    *slot = value;
                }
            }
            None => *inner = UpvalueInner::Closed(value),
        }
        Ok(())
    }
}
