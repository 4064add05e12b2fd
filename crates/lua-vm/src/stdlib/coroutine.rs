use super::{arg, Library};
use crate::coroutine::ResumeOutcome;
use crate::error::LuaError;
use crate::state::LuaState;
use crate::thread::LuaThread;
use crate::value::LuaValue;

pub(super) fn library() -> Library {
    Library::new()
        .function("create", co_create)
        .function("resume", co_resume)
        .function("yield", co_yield)
        .function("status", co_status)
        .function("running", co_running)
        .function("wrap", co_wrap)
}

fn check_thread(args: &[LuaValue], function: &'static str) -> Result<LuaThread, LuaError> {
    match args.first() {
        Some(LuaValue::Thread(t)) => Ok(t.clone()),
        _ => Err(LuaError::bad_arg(1, function, "coroutine expected")),
    }
}

fn new_thread(lua: &mut LuaState, args: &[LuaValue], function: &'static str) -> Result<LuaThread, LuaError> {
    let body = arg(args, 0);
    if !body.is_function() {
        return Err(LuaError::bad_arg(1, function, "function expected"));
    }
    lua.create_thread(body)
}

fn co_create(lua: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    Ok(vec![new_thread(lua, &args, "create")?.into()])
}

fn co_resume(lua: &mut LuaState, mut args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let co = check_thread(&args, "resume")?;
    args.remove(0);
    Ok(lua.resume(&co, args)?.into_values())
}

fn co_yield(lua: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    Err(lua.yield_now(args))
}

fn co_status(_: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let co = check_thread(&args, "status")?;
    Ok(vec![co.status().as_str().into()])
}

/// The running coroutine and `false`, or `nil, true` on the main thread.
fn co_running(lua: &mut LuaState, _: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    if lua.in_coroutine() {
        Ok(vec![lua.current_thread().into(), false.into()])
    } else {
        Ok(vec![LuaValue::Nil, true.into()])
    }
}

/// A function that resumes the same coroutine on each call, returning what it
/// yields. Errors inside the coroutine are re-raised in the caller.
fn co_wrap(lua: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let co = new_thread(lua, &args, "wrap")?;
    let f = lua.create_function("wrap", move |lua, args| match lua.resume(&co, args)? {
        ResumeOutcome::Yielded(vals) | ResumeOutcome::Finished(vals) => Ok(vals),
        ResumeOutcome::Failed(e) => Err(LuaError::Runtime(e)),
    });
    Ok(vec![f])
}
