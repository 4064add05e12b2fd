use super::{arg, check_any, check_integer, check_string, check_table, Library};
use crate::error::LuaError;
use crate::state::LuaState;
use crate::value::{LuaValue, TableRef};

pub(super) fn library() -> Library {
    Library::new()
        .function("print", lua_print)
        .function("type", lua_type)
        .function("tostring", lua_tostring)
        .function("tonumber", lua_tonumber)
        .function("assert", lua_assert)
        .function("error", lua_error)
        .function("pcall", lua_pcall)
        .function("select", lua_select)
        .function("getfenv", lua_getfenv)
        .function("setfenv", lua_setfenv)
        .function("getmetatable", lua_getmetatable)
        .function("setmetatable", lua_setmetatable)
        .function("rawget", lua_rawget)
        .function("rawset", lua_rawset)
        .function("rawequal", lua_rawequal)
        .function("rawlen", lua_rawlen)
        .function("next", lua_next)
        .function("loadstring", lua_loadstring)
}

/// `tostring` semantics, honouring `__tostring`.
fn tostring(lua: &mut LuaState, v: &LuaValue) -> Result<LuaValue, LuaError> {
    let handler = v
        .metatable()
        .map(|mt| mt.read().get_str("__tostring"))
        .unwrap_or_default();
    if handler.is_nil() {
        return Ok(LuaValue::LuaString(v.to_string()));
    }
    Ok(lua.call(&handler, vec![v.clone()])?.into_iter().next().unwrap_or_default())
}

fn lua_print(lua: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let mut parts = Vec::with_capacity(args.len());
    for v in &args {
        parts.push(tostring(lua, v)?.to_string());
    }
    println!("{}", parts.join("\t"));
    Ok(vec![])
}

fn lua_type(_: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let v = check_any(&args, 0, "type")?;
    Ok(vec![v.type_name().into()])
}

fn lua_tostring(lua: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let v = check_any(&args, 0, "tostring")?;
    Ok(vec![tostring(lua, &v)?])
}

fn lua_tonumber(_: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let v = check_any(&args, 0, "tonumber")?;
    if args.len() < 2 || arg(&args, 1).is_nil() {
        return Ok(vec![v.to_number().unwrap_or_default()]);
    }
    let base = check_integer(&args, 1, "tonumber")?;
    if !(2..=36).contains(&base) {
        return Err(LuaError::bad_arg(2, "tonumber", "base out of range"));
    }
    let text = check_string(&args, 0, "tonumber")?;
    let text = text.trim();
    let (neg, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    // `from_str_radix` would take a second sign
    if digits.starts_with(['+', '-']) {
        return Ok(vec![LuaValue::Nil]);
    }
    let n = u64::from_str_radix(digits, base as u32).ok().and_then(|n| {
        if neg {
            0i64.checked_sub_unsigned(n)
        } else {
            i64::try_from(n).ok()
        }
    });
    Ok(vec![n.map_or(LuaValue::Nil, LuaValue::Integer)])
}

fn lua_assert(_: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let v = check_any(&args, 0, "assert")?;
    if v.is_truthy() {
        return Ok(args);
    }
    Err(match args.into_iter().nth(1) {
        Some(message) if !message.is_nil() => LuaError::Runtime(message),
        _ => LuaError::runtime("assertion failed!"),
    })
}

fn lua_error(_: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    Err(LuaError::Runtime(arg(&args, 0)))
}

fn lua_pcall(lua: &mut LuaState, mut args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let f = check_any(&args, 0, "pcall")?;
    args.remove(0);
    match lua.call(&f, args) {
        Ok(mut vals) => {
            vals.insert(0, true.into());
            Ok(vals)
        }
        Err(e) if e.is_catchable() => Ok(vec![false.into(), e.into_value()]),
        Err(e) => Err(e),
    }
}

fn lua_select(_: &mut LuaState, mut args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    if arg(&args, 0).as_str() == Some("#") {
        return Ok(vec![LuaValue::Integer(args.len() as i64 - 1)]);
    }
    let n = check_integer(&args, 0, "select")?;
    let count = args.len() as i64 - 1;
    let start = match n {
        n if n < 0 && -n <= count => count + n + 1,
        n if n > 0 => n.min(count + 1),
        _ => return Err(LuaError::bad_arg(1, "select", "index out of range")),
    };
    Ok(args.split_off(start as usize))
}

/// Environment target of `getfenv`/`setfenv`: a function or thread value, or
/// a stack level.
enum FenvTarget {
    Thread,
    Value(LuaValue),
}

fn fenv_target(lua: &mut LuaState, v: LuaValue, function: &'static str) -> Result<FenvTarget, LuaError> {
    let level = match v {
        LuaValue::Nil => 1,
        LuaValue::Integer(_) | LuaValue::Float(_) => check_integer(&[v], 0, function)?,
        other => return Ok(FenvTarget::Value(other)),
    };
    if level < 0 {
        return Err(LuaError::bad_arg(1, function, "level must be non-negative"));
    }
    if level == 0 {
        return Ok(FenvTarget::Thread);
    }
    let tid = lua.current_thread().slot();
    let frames = &lua.stack(tid).frames;
    frames
        .len()
        .checked_sub(level as usize)
        .map(|i| FenvTarget::Value(LuaValue::Closure(frames[i].closure.clone())))
        .ok_or_else(|| LuaError::bad_arg(1, function, "invalid level"))
}

fn lua_getfenv(lua: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let env = match fenv_target(lua, arg(&args, 0), "getfenv")? {
        FenvTarget::Thread => lua.current_env(),
        FenvTarget::Value(v) => v.getfenv()?,
    };
    Ok(vec![LuaValue::Table(env)])
}

fn lua_setfenv(lua: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let env = check_table(&args, 1, "setfenv")?;
    match fenv_target(lua, arg(&args, 0), "setfenv")? {
        FenvTarget::Thread => {
            lua.current_thread().set_env(env);
            Ok(vec![])
        }
        FenvTarget::Value(v) => {
            v.setfenv(env)?;
            Ok(vec![v])
        }
    }
}

fn lua_getmetatable(_: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let v = check_any(&args, 0, "getmetatable")?;
    let Some(mt) = v.metatable() else {
        return Ok(vec![LuaValue::Nil]);
    };
    let guard = mt.read().get_str("__metatable");
    Ok(vec![if guard.is_nil() { LuaValue::Table(mt) } else { guard }])
}

fn lua_setmetatable(_: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let t = check_table(&args, 0, "setmetatable")?;
    let mt: Option<TableRef> = match arg(&args, 1) {
        LuaValue::Nil => None,
        LuaValue::Table(mt) => Some(mt),
        _ => return Err(LuaError::bad_arg(2, "setmetatable", "nil or table expected")),
    };
    let protected = t
        .read()
        .metatable()
        .is_some_and(|old| !old.read().get_str("__metatable").is_nil());
    if protected {
        return Err(LuaError::runtime("cannot change a protected metatable"));
    }
    t.write().set_metatable(mt);
    Ok(vec![LuaValue::Table(t)])
}

fn lua_rawget(_: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let t = check_table(&args, 0, "rawget")?;
    let v = t.read().get(&arg(&args, 1));
    Ok(vec![v])
}

fn lua_rawset(_: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let t = check_table(&args, 0, "rawset")?;
    t.write().set(arg(&args, 1), arg(&args, 2))?;
    Ok(vec![LuaValue::Table(t)])
}

fn lua_rawequal(_: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    Ok(vec![(arg(&args, 0) == arg(&args, 1)).into()])
}

fn lua_rawlen(_: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let n = match args.first() {
        Some(LuaValue::Table(t)) => t.read().length(),
        Some(LuaValue::LuaString(s)) => s.len() as i64,
        _ => return Err(LuaError::bad_arg(1, "rawlen", "table or string expected")),
    };
    Ok(vec![LuaValue::Integer(n)])
}

fn lua_next(_: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let t = check_table(&args, 0, "next")?;
    let entry = t.read().next(&arg(&args, 1))?;
    Ok(match entry {
        Some((k, v)) => vec![k, v],
        None => vec![LuaValue::Nil],
    })
}

/// `loadstring(source [, chunkname])`: the compiled function, or `nil` and
/// the error message.
fn lua_loadstring(lua: &mut LuaState, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    let source = check_string(&args, 0, "loadstring")?;
    let chunk_name = match arg(&args, 1) {
        LuaValue::Nil => source.clone(),
        _ => check_string(&args, 1, "loadstring")?,
    };
    match lua.load(source.as_bytes(), &chunk_name) {
        Ok(f) => Ok(vec![f]),
        Err(e) => Ok(vec![LuaValue::Nil, e.into_value()]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::Budget;
    use crate::testing::{global, load, toy_compile};
    use crate::thread::ThreadStatus;
    use crate::ResumeOutcome;
    use lua_chunk::ProtoBuilder;
    use lua_core::OpCode;
    use std::sync::Arc;

    fn call_global(lua: &mut LuaState, name: &str, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
        let f = global(lua, name);
        lua.call(&f, args)
    }

    #[test]
    fn type_and_tostring() {
        let mut lua = LuaState::new();
        assert_eq!(call_global(&mut lua, "type", vec![1.5f64.into()]).unwrap(), vec!["number".into()]);
        assert!(call_global(&mut lua, "type", vec![]).is_err());

        let t = lua.create_table();
        let mt = lua.create_table();
        let show = lua.create_function("__tostring", |_, _| Ok(vec!["custom".into()]));
        mt.write().set_str("__tostring", show);
        t.write().set_metatable(Some(mt));
        assert_eq!(
            call_global(&mut lua, "tostring", vec![LuaValue::Table(t)]).unwrap(),
            vec![LuaValue::from("custom")]
        );
        assert_eq!(
            call_global(&mut lua, "tostring", vec![LuaValue::Float(2.0)]).unwrap(),
            vec![LuaValue::from("2.0")]
        );
    }

    #[test]
    fn tonumber_variants() {
        let mut lua = LuaState::new();
        let mut n = |args: Vec<LuaValue>| call_global(&mut lua, "tonumber", args).unwrap().remove(0);
        assert_eq!(n(vec!["42".into()]), LuaValue::Integer(42));
        assert_eq!(n(vec!["0x10".into()]), LuaValue::Integer(16));
        assert_eq!(n(vec![" 2.5 ".into()]), LuaValue::Float(2.5));
        assert_eq!(n(vec!["nope".into()]), LuaValue::Nil);
        assert_eq!(n(vec!["ff".into(), 16i64.into()]), LuaValue::Integer(255));
        assert_eq!(n(vec!["-101".into(), 2i64.into()]), LuaValue::Integer(-5));
        assert_eq!(n(vec!["9".into(), 8i64.into()]), LuaValue::Nil);
        assert_eq!(n(vec![LuaValue::Boolean(true)]), LuaValue::Nil);

        assert_eq!(n(vec!["-9223372036854775808".into(), 10i64.into()]), LuaValue::Integer(i64::MIN));
        assert_eq!(n(vec!["--9223372036854775808".into(), 10i64.into()]), LuaValue::Nil);
        assert_eq!(n(vec!["-+5".into(), 10i64.into()]), LuaValue::Nil);
        assert_eq!(n(vec!["9223372036854775808".into(), 10i64.into()]), LuaValue::Nil);
    }

    #[test]
    fn assert_and_error() {
        let mut lua = LuaState::new();
        assert_eq!(
            call_global(&mut lua, "assert", vec![1i64.into(), "msg".into()]).unwrap(),
            vec![LuaValue::Integer(1), LuaValue::from("msg")]
        );
        let err = call_global(&mut lua, "assert", vec![false.into()]).unwrap_err();
        assert_eq!(err.to_string(), "assertion failed!");
        let err = call_global(&mut lua, "assert", vec![LuaValue::Nil, "custom".into()]).unwrap_err();
        assert_eq!(err.to_string(), "custom");

        let payload = LuaValue::Table(lua.create_table());
        match call_global(&mut lua, "error", vec![payload.clone()]) {
            Err(LuaError::Runtime(v)) => assert_eq!(v, payload),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn pcall_catches_script_errors_only() {
        let mut lua = LuaState::new();
        let error = global(&lua, "error");
        assert_eq!(
            call_global(&mut lua, "pcall", vec![error, "oops".into()]).unwrap(),
            vec![false.into(), "oops".into()]
        );

        let ok = lua.create_function("ok", |_, args| Ok(args));
        assert_eq!(
            call_global(&mut lua, "pcall", vec![ok, 1i64.into()]).unwrap(),
            vec![true.into(), LuaValue::Integer(1)]
        );

        assert_eq!(
            call_global(&mut lua, "pcall", vec![LuaValue::Integer(3)]).unwrap(),
            vec![false.into(), "attempt to call a number value".into()]
        );

        let host = lua.create_function("host", |_, _| Err(anyhow::anyhow!("disk on fire").into()));
        assert!(matches!(call_global(&mut lua, "pcall", vec![host]), Err(LuaError::Host(_))));

        let co = global(&lua, "coroutine");
        let yield_fn = co.as_table().unwrap().read().get_str("yield");
        assert!(matches!(
            call_global(&mut lua, "pcall", vec![yield_fn]),
            Err(LuaError::YieldOutsideCoroutine)
        ));
    }

    #[test]
    fn pcall_does_not_swallow_interrupts() {
        let mut lua = LuaState::new();
        let mut b = ProtoBuilder::new("=spin");
        b.emit(OpCode::Jump { offset: -1 });
        let spin = load(&mut lua, b);
        lua.set_interrupt_hook(Budget::new(10));
        assert!(matches!(
            call_global(&mut lua, "pcall", vec![spin]),
            Err(LuaError::Interrupted(_))
        ));
    }

    #[test]
    fn select_counts_and_slices() {
        let mut lua = LuaState::new();
        let args = |first: LuaValue| vec![first, "a".into(), "b".into(), "c".into()];
        assert_eq!(call_global(&mut lua, "select", args("#".into())).unwrap(), vec![LuaValue::Integer(3)]);
        assert_eq!(
            call_global(&mut lua, "select", args(2i64.into())).unwrap(),
            vec![LuaValue::from("b"), LuaValue::from("c")]
        );
        assert_eq!(call_global(&mut lua, "select", args((-1i64).into())).unwrap(), vec![LuaValue::from("c")]);
        assert!(call_global(&mut lua, "select", args(5i64.into())).unwrap().is_empty());
        assert!(call_global(&mut lua, "select", args(0i64.into())).is_err());
    }

    #[test]
    fn metatables_and_raw_access() {
        let mut lua = LuaState::new();
        let t = LuaValue::Table(lua.create_table());
        let mt = lua.create_table();
        let fallback = lua.create_table();
        fallback.write().set_str("k", "from meta".into());
        mt.write().set_str("__index", LuaValue::Table(fallback));

        call_global(&mut lua, "setmetatable", vec![t.clone(), LuaValue::Table(mt.clone())]).unwrap();
        assert_eq!(lua.index(&t, &"k".into()).unwrap(), LuaValue::from("from meta"));
        assert_eq!(call_global(&mut lua, "rawget", vec![t.clone(), "k".into()]).unwrap(), vec![LuaValue::Nil]);
        assert_eq!(
            call_global(&mut lua, "getmetatable", vec![t.clone()]).unwrap(),
            vec![LuaValue::Table(mt.clone())]
        );

        call_global(&mut lua, "rawset", vec![t.clone(), "k".into(), "raw".into()]).unwrap();
        assert_eq!(lua.index(&t, &"k".into()).unwrap(), LuaValue::from("raw"));
        assert_eq!(call_global(&mut lua, "rawlen", vec!["four".into()]).unwrap(), vec![LuaValue::Integer(4)]);
        assert!(call_global(&mut lua, "rawlen", vec![1i64.into()]).is_err());
        assert_eq!(
            call_global(&mut lua, "rawequal", vec![t.clone(), t.clone()]).unwrap(),
            vec![LuaValue::Boolean(true)]
        );

        mt.write().set_str("__metatable", "locked".into());
        assert_eq!(call_global(&mut lua, "getmetatable", vec![t.clone()]).unwrap(), vec!["locked".into()]);
        let err = call_global(&mut lua, "setmetatable", vec![t, LuaValue::Nil]).unwrap_err();
        assert_eq!(err.to_string(), "cannot change a protected metatable");
    }

    #[test]
    fn next_walks_every_entry() {
        let mut lua = LuaState::new();
        let t = lua.create_table();
        t.write().push("one".into());
        t.write().set_str("two", 2i64.into());
        let t = LuaValue::Table(t);

        let mut key = LuaValue::Nil;
        let mut seen = 0;
        loop {
            let out = call_global(&mut lua, "next", vec![t.clone(), key]).unwrap();
            if out[0].is_nil() {
                break;
            }
            key = out[0].clone();
            seen += 1;
        }
        assert_eq!(seen, 2);
    }

    #[test]
    fn loadstring_reports_compile_errors_as_values() {
        let mut lua = LuaState::new();
        let out = call_global(&mut lua, "loadstring", vec!["return x".into()]).unwrap();
        assert_eq!(out[0], LuaValue::Nil);
        assert!(out[1].to_string().contains("no compiler installed"));

        lua.set_compiler(toy_compile);
        let out = call_global(&mut lua, "loadstring", vec!["return x".into()]).unwrap();
        assert!(out[0].is_function());
    }

    /// Chunk returning two closures made from the same prototype.
    fn closure_pair(lua: &mut LuaState) -> (LuaValue, LuaValue) {
        let mut b = ProtoBuilder::new("=pair");
        let p = b.add_proto(ProtoBuilder::new("=p").finish());
        b.emit(OpCode::Closure { dst: 0, proto_idx: p });
        b.emit(OpCode::Closure { dst: 1, proto_idx: p });
        b.emit(OpCode::Return { src: 0, num_results: 2 });
        let chunk = load(lua, b);
        let mut out = lua.call(&chunk, vec![]).unwrap();
        let c2 = out.pop().unwrap();
        (out.pop().unwrap(), c2)
    }

    #[test]
    fn setfenv_affects_only_the_given_closure() {
        let mut lua = LuaState::new();
        let e1 = lua.globals();
        let e2 = lua.create_table();
        let (c1, c2) = closure_pair(&mut lua);

        let getfenv = |lua: &mut LuaState, f: &LuaValue| call_global(lua, "getfenv", vec![f.clone()]).unwrap().remove(0);
        assert_eq!(getfenv(&mut lua, &c1), LuaValue::Table(e1.clone()));

        let returned = call_global(&mut lua, "setfenv", vec![c1.clone(), LuaValue::Table(e2.clone())]).unwrap();
        assert_eq!(returned, vec![c1.clone()]);
        assert_eq!(getfenv(&mut lua, &c1), LuaValue::Table(e2));
        assert_eq!(getfenv(&mut lua, &c2), LuaValue::Table(e1));
    }

    /// function() return function() end end
    fn closure_factory(lua: &mut LuaState) -> LuaValue {
        let mut b = ProtoBuilder::new("=factory");
        let p = b.add_proto(ProtoBuilder::new("=made").finish());
        b.emit(OpCode::Closure { dst: 0, proto_idx: p });
        b.emit(OpCode::Return { src: 0, num_results: 1 });
        load(lua, b)
    }

    #[test]
    fn closures_take_the_environment_their_creator_has_now() {
        let mut lua = LuaState::new();
        let e1 = lua.globals();
        let e2 = lua.create_table();
        let factory = closure_factory(&mut lua);

        let before = lua.call(&factory, vec![]).unwrap().remove(0);
        call_global(&mut lua, "setfenv", vec![factory.clone(), LuaValue::Table(e2.clone())]).unwrap();
        let after = lua.call(&factory, vec![]).unwrap().remove(0);

        assert!(Arc::ptr_eq(&after.getfenv().unwrap(), &e2));
        assert!(Arc::ptr_eq(&before.getfenv().unwrap(), &e1));
    }

    #[test]
    fn closures_made_in_a_thread_follow_the_body_not_the_thread() {
        let mut lua = LuaState::new();
        let globals = lua.globals();
        let newenv = lua.create_table();
        let body = closure_factory(&mut lua);
        body.setfenv(newenv.clone()).unwrap();

        let co = lua.create_thread_with_env(body, globals.clone()).unwrap();
        let ResumeOutcome::Finished(out) = lua.resume(&co, vec![]).unwrap() else {
            panic!("coroutine should finish");
        };
        let made_env = out[0].getfenv().unwrap();
        assert!(Arc::ptr_eq(&made_env, &newenv));
        assert!(!Arc::ptr_eq(&made_env, &globals));
    }

    #[test]
    fn environments_of_other_kinds() {
        let mut lua = LuaState::new();
        let native = global(&lua, "print");
        let custom = lua.create_table();
        call_global(&mut lua, "setfenv", vec![native.clone(), LuaValue::Table(custom.clone())]).unwrap();
        assert!(Arc::ptr_eq(&native.getfenv().unwrap(), &custom));

        let err = call_global(&mut lua, "getfenv", vec!["str".into()]).unwrap_err();
        assert_eq!(err.to_string(), "attempt to get the environment of a string value");
        let err = call_global(&mut lua, "setfenv", vec![true.into(), LuaValue::Table(custom)]).unwrap_err();
        assert_eq!(err.to_string(), "attempt to set the environment of a boolean value");
        assert!(call_global(&mut lua, "getfenv", vec![5i64.into()]).is_err());
    }

    #[test]
    fn setfenv_by_level_redirects_global_lookups() {
        // function(t) setfenv(1, t) return marker end
        let mut lua = LuaState::new();
        lua.globals().write().set_str("marker", "global".into());
        let mut b = ProtoBuilder::new("=lvl").params(1);
        let setfenv = b.add_name("setfenv");
        let marker = b.add_name("marker");
        let one = b.add_constant(1i64);
        b.emit(OpCode::GetGlobal { dst: 1, name_idx: setfenv });
        b.emit(OpCode::LoadConst { dst: 2, const_idx: one });
        b.emit(OpCode::Move { dst: 3, src: 0 });
        b.emit(OpCode::Call { func: 1, num_args: 2, num_results: 0 });
        b.emit(OpCode::GetGlobal { dst: 1, name_idx: marker });
        b.emit(OpCode::Return { src: 1, num_results: 1 });
        let f = load(&mut lua, b);

        let custom = lua.create_table();
        custom.write().set_str("marker", "custom".into());
        let out = lua.call(&f, vec![LuaValue::Table(custom.clone())]).unwrap();
        assert_eq!(out, vec![LuaValue::from("custom")]);
        assert!(Arc::ptr_eq(&f.getfenv().unwrap(), &custom));
    }

    #[test]
    fn getfenv_level_zero_is_the_thread_environment() {
        let mut lua = LuaState::new();
        let out = call_global(&mut lua, "getfenv", vec![0i64.into()]).unwrap();
        assert_eq!(out, vec![LuaValue::Table(lua.globals())]);
    }

    #[test]
    fn chunks_loaded_in_a_thread_use_the_thread_environment() {
        // function() return loadstring("return x") end
        let mut lua = LuaState::new();
        lua.set_compiler(toy_compile);
        let mut b = ProtoBuilder::new("=c");
        let loadstring = b.add_name("loadstring");
        let src = b.add_constant("return x");
        b.emit(OpCode::GetGlobal { dst: 0, name_idx: loadstring });
        b.emit(OpCode::LoadConst { dst: 1, const_idx: src });
        b.emit(OpCode::Call { func: 0, num_args: 1, num_results: 1 });
        b.emit(OpCode::Return { src: 0, num_results: 1 });
        let c = load(&mut lua, b);
        let e = c.getfenv().unwrap();

        let co = lua.create_thread(c).unwrap();
        let thread_env = lua.create_table();
        LuaValue::Thread(co.clone()).setfenv(thread_env.clone()).unwrap();

        let ResumeOutcome::Finished(out) = lua.resume(&co, vec![]).unwrap() else {
            panic!("coroutine should finish");
        };
        let loaded_env = out[0].getfenv().unwrap();
        assert!(Arc::ptr_eq(&loaded_env, &thread_env));
        assert!(!Arc::ptr_eq(&loaded_env, &e));
        assert_eq!(co.status(), ThreadStatus::Dead);
    }
}
