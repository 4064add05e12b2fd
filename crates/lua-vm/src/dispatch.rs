//! Metatable-mediated operator dispatch.
//!
//! Every overridable operator is resolved by the same driver, [`MetaOp::route`]:
//!
//! 1. the intrinsic rule for the operands' kinds (string length, numeric
//!    arithmetic, raw table hits, ...);
//! 2. a handler from the metatable (tables and userdata only);
//! 3. the kind default (raw table length, nil for a missing table field, ...);
//! 4. otherwise a type error naming the operation and the offending kind.

use crate::error::LuaError;
use crate::state::LuaState;
use crate::value::LuaValue;

/// Longest `__index` / `__newindex` chain followed before giving up.
const MAX_META_CHAIN: usize = 100;

/// Operators with metatable-overridable semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaOp {
    Index,
    NewIndex,
    Call,
    Len,
    Unm,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    IDiv,
    Concat,
    Eq,
    Lt,
    Le,
}

/// Outcome of [`MetaOp::route`].
pub(crate) enum Route {
    Done(LuaValue),
    Handler(LuaValue),
}

impl MetaOp {
    /// Metatable key of the handler.
    pub fn event(self) -> &'static str {
        match self {
            MetaOp::Index => "__index",
            MetaOp::NewIndex => "__newindex",
            MetaOp::Call => "__call",
            MetaOp::Len => "__len",
            MetaOp::Unm => "__unm",
            MetaOp::Add => "__add",
            MetaOp::Sub => "__sub",
            MetaOp::Mul => "__mul",
            MetaOp::Div => "__div",
            MetaOp::Mod => "__mod",
            MetaOp::Pow => "__pow",
            MetaOp::IDiv => "__idiv",
            MetaOp::Concat => "__concat",
            MetaOp::Eq => "__eq",
            MetaOp::Lt => "__lt",
            MetaOp::Le => "__le",
        }
    }

    /// Verb used in type errors: "attempt to {describe} a nil value".
    pub fn describe(self) -> &'static str {
        match self {
            MetaOp::Index | MetaOp::NewIndex => "index",
            MetaOp::Call => "call",
            MetaOp::Len => "get length of",
            MetaOp::Concat => "concatenate",
            MetaOp::Eq | MetaOp::Lt | MetaOp::Le => "compare",
            _ => "perform arithmetic on",
        }
    }

    fn is_binary(self) -> bool {
        !matches!(
            self,
            MetaOp::Index | MetaOp::NewIndex | MetaOp::Call | MetaOp::Len | MetaOp::Unm
        )
    }

    pub(crate) fn route(self, operands: &[LuaValue]) -> Result<Route, LuaError> {
        if let Some(v) = self.intrinsic(operands)? {
            return Ok(Route::Done(v));
        }
        if let Some(h) = self.handler(operands) {
            return Ok(Route::Handler(h));
        }
        if let Some(v) = self.fallback(operands)? {
            return Ok(Route::Done(v));
        }
        Err(LuaError::TypeError {
            operation: self.describe(),
            got: self.offender(operands).type_name(),
        })
    }

    fn intrinsic(self, operands: &[LuaValue]) -> Result<Option<LuaValue>, LuaError> {
        let a = &operands[0];
        Ok(match self {
            MetaOp::Index => {
                let LuaValue::Table(t) = a else { return Ok(None) };
                Some(t.read().get(&operands[1])).filter(|v| !v.is_nil())
            }
            MetaOp::NewIndex => {
                let LuaValue::Table(t) = a else { return Ok(None) };
                let mut t = t.write();
                if t.get(&operands[1]).is_nil() {
                    return Ok(None);
                }
                t.set(operands[1].clone(), operands[2].clone())?;
                Some(LuaValue::Nil)
            }
            MetaOp::Call => None,
            MetaOp::Len => a.as_str().map(|s| LuaValue::Integer(s.len() as i64)),
            MetaOp::Concat => match (concat_piece(a), concat_piece(&operands[1])) {
                (Some(x), Some(y)) => Some(LuaValue::LuaString(x + &y)),
                _ => None,
            },
            MetaOp::Eq => {
                let b = &operands[1];
                if a == b {
                    Some(LuaValue::Boolean(true))
                } else if matches!(
                    (a, b),
                    (LuaValue::Table(_), LuaValue::Table(_))
                        | (LuaValue::Userdata(_), LuaValue::Userdata(_))
                ) {
                    None
                } else {
                    Some(LuaValue::Boolean(false))
                }
            }
            MetaOp::Lt | MetaOp::Le => compare(self, a, &operands[1]).map(LuaValue::Boolean),
            _ => arith(self, a, operands.get(1).unwrap_or(a))?,
        })
    }

    fn handler(self, operands: &[LuaValue]) -> Option<LuaValue> {
        let consulted = if self.is_binary() { &operands[..2] } else { &operands[..1] };
        consulted.iter().find_map(|v| {
            let h = v.metatable()?.read().get_str(self.event());
            (!h.is_nil()).then_some(h)
        })
    }

    fn fallback(self, operands: &[LuaValue]) -> Result<Option<LuaValue>, LuaError> {
        let LuaValue::Table(t) = &operands[0] else {
            return Ok((self == MetaOp::Eq).then_some(LuaValue::Boolean(false)));
        };
        Ok(match self {
            MetaOp::Index => Some(LuaValue::Nil),
            MetaOp::NewIndex => {
                t.write().set(operands[1].clone(), operands[2].clone())?;
                Some(LuaValue::Nil)
            }
            MetaOp::Len => Some(LuaValue::Integer(t.read().length())),
            MetaOp::Eq => Some(LuaValue::Boolean(false)),
            _ => None,
        })
    }

    fn offender(self, operands: &[LuaValue]) -> &LuaValue {
        let ok: fn(&LuaValue) -> bool = match self {
            MetaOp::Concat => |v| concat_piece(v).is_some(),
            MetaOp::Lt | MetaOp::Le => |v| matches!(v, LuaValue::Integer(_) | LuaValue::Float(_) | LuaValue::LuaString(_)),
            op if op.is_binary() => |v| v.to_number().is_some(),
            _ => return &operands[0],
        };
        operands[..2]
            .iter()
            .find(|&v| !ok(v))
            .unwrap_or(&operands[1])
    }
}

fn concat_piece(v: &LuaValue) -> Option<String> {
    match v {
        LuaValue::LuaString(s) => Some(s.clone()),
        LuaValue::Integer(_) | LuaValue::Float(_) => Some(v.to_string()),
        _ => None,
    }
}

fn as_float(v: &LuaValue) -> f64 {
    match v {
        LuaValue::Integer(n) => *n as f64,
        LuaValue::Float(f) => *f,
        _ => f64::NAN,
    }
}

// ── Arithmetic helpers ────────────────────────────────────────────────────────

/// Numeric arithmetic with string coercion. `None` when an operand is not a
/// number; integer division and modulo by zero are errors.
fn arith(op: MetaOp, a: &LuaValue, b: &LuaValue) -> Result<Option<LuaValue>, LuaError> {
    use LuaValue::{Float, Integer};
    let (Some(x), Some(y)) = (a.to_number(), b.to_number()) else {
        return Ok(None);
    };
    let v = match (op, &x, &y) {
        (MetaOp::Unm, Integer(x), _) => Integer(x.wrapping_neg()),
        (MetaOp::Unm, x, _) => Float(-as_float(x)),
        (MetaOp::Add, Integer(x), Integer(y)) => Integer(x.wrapping_add(*y)),
        (MetaOp::Sub, Integer(x), Integer(y)) => Integer(x.wrapping_sub(*y)),
        (MetaOp::Mul, Integer(x), Integer(y)) => Integer(x.wrapping_mul(*y)),
        (MetaOp::IDiv, Integer(_), Integer(0)) => {
            return Err(LuaError::runtime("attempt to perform 'n//0'"))
        }
        (MetaOp::IDiv, Integer(x), Integer(y)) => {
            let q = x.wrapping_div(*y);
            Integer(if x.wrapping_rem(*y) != 0 && (x < &0) != (y < &0) { q - 1 } else { q })
        }
        (MetaOp::Mod, Integer(_), Integer(0)) => {
            return Err(LuaError::runtime("attempt to perform 'n%0'"))
        }
        (MetaOp::Mod, Integer(x), Integer(y)) => {
            let r = x.wrapping_rem(*y);
            Integer(if r != 0 && (r ^ y) < 0 { r + y } else { r })
        }
        (op, x, y) => {
            let (x, y) = (as_float(x), as_float(y));
            Float(match op {
                MetaOp::Add => x + y,
                MetaOp::Sub => x - y,
                MetaOp::Mul => x * y,
                MetaOp::Div => x / y,
                MetaOp::Pow => x.powf(y),
                MetaOp::IDiv => (x / y).floor(),
                MetaOp::Mod => {
                    let r = x % y;
                    if r != 0.0 && (r < 0.0) != (y < 0.0) {
                        r + y
                    } else {
                        r
                    }
                }
                _ => return Ok(None),
            })
        }
    };
    Ok(Some(v))
}

// ── Comparison helpers ────────────────────────────────────────────────────────

fn compare(op: MetaOp, a: &LuaValue, b: &LuaValue) -> Option<bool> {
    use std::cmp::Ordering;
    let ord = match (a, b) {
        (LuaValue::Integer(x), LuaValue::Integer(y)) => x.cmp(y),
        (LuaValue::LuaString(x), LuaValue::LuaString(y)) => x.as_bytes().cmp(y.as_bytes()),
        (LuaValue::Integer(_) | LuaValue::Float(_), LuaValue::Integer(_) | LuaValue::Float(_)) => {
            // NaN compares false both ways
            match as_float(a).partial_cmp(&as_float(b)) {
                Some(o) => o,
                None => return Some(false),
            }
        }
        _ => return None,
    };
    Some(match op {
        MetaOp::Lt => ord == Ordering::Less,
        _ => ord != Ordering::Greater,
    })
}

// ── Operations ────────────────────────────────────────────────────────────────

impl LuaState {
    fn first_result(&mut self, handler: &LuaValue, args: Vec<LuaValue>) -> Result<LuaValue, LuaError> {
        Ok(self.call(handler, args)?.into_iter().next().unwrap_or_default())
    }

    /// `#v`
    pub fn len(&mut self, v: &LuaValue) -> Result<LuaValue, LuaError> {
        match MetaOp::Len.route(std::slice::from_ref(v))? {
            Route::Done(n) => Ok(n),
            Route::Handler(h) => self.first_result(&h, vec![v.clone()]),
        }
    }

    /// `obj[key]`, following `__index`.
    pub fn index(&mut self, obj: &LuaValue, key: &LuaValue) -> Result<LuaValue, LuaError> {
        let mut obj = obj.clone();
        for _ in 0..MAX_META_CHAIN {
            match MetaOp::Index.route(&[obj.clone(), key.clone()])? {
                Route::Done(v) => return Ok(v),
                Route::Handler(h) if h.is_function() => {
                    return self.first_result(&h, vec![obj, key.clone()])
                }
                Route::Handler(next) => obj = next,
            }
        }
        Err(LuaError::runtime("'__index' chain too long; possible loop"))
    }

    /// `obj[key] = val`, following `__newindex`.
    pub fn set_index(&mut self, obj: &LuaValue, key: LuaValue, val: LuaValue) -> Result<(), LuaError> {
        let mut obj = obj.clone();
        for _ in 0..MAX_META_CHAIN {
            match MetaOp::NewIndex.route(&[obj.clone(), key.clone(), val.clone()])? {
                Route::Done(_) => return Ok(()),
                Route::Handler(h) if h.is_function() => {
                    self.call(&h, vec![obj, key, val])?;
                    return Ok(());
                }
                Route::Handler(next) => obj = next,
            }
        }
        Err(LuaError::runtime("'__newindex' chain too long; possible loop"))
    }

    /// Binary arithmetic or concatenation.
    pub fn arith(&mut self, op: MetaOp, a: &LuaValue, b: &LuaValue) -> Result<LuaValue, LuaError> {
        let operands = [a.clone(), b.clone()];
        match op.route(&operands)? {
            Route::Done(v) => Ok(v),
            Route::Handler(h) => self.first_result(&h, operands.to_vec()),
        }
    }

    pub fn unm(&mut self, a: &LuaValue) -> Result<LuaValue, LuaError> {
        let operands = [a.clone(), a.clone()];
        match MetaOp::Unm.route(&operands)? {
            Route::Done(v) => Ok(v),
            Route::Handler(h) => self.first_result(&h, operands.to_vec()),
        }
    }

    /// `==`, `<` or `<=`.
    pub fn compare(&mut self, op: MetaOp, a: &LuaValue, b: &LuaValue) -> Result<bool, LuaError> {
        let operands = [a.clone(), b.clone()];
        match op.route(&operands)? {
            Route::Done(v) => Ok(v.is_truthy()),
            Route::Handler(h) => Ok(self.first_result(&h, operands.to_vec())?.is_truthy()),
        }
    }

    /// The `__call` handler of a non-function value.
    pub(crate) fn call_handler(&self, v: &LuaValue) -> Result<LuaValue, LuaError> {
        match MetaOp::Call.route(std::slice::from_ref(v))? {
            Route::Handler(h) => Ok(h),
            Route::Done(_) => Err(LuaError::Internal("call resolved without a handler".into())),
        }
    }

    /// Whether `v` can be called, directly or through `__call`.
    pub fn is_callable(&self, v: &LuaValue) -> bool {
        v.is_function() || MetaOp::Call.handler(std::slice::from_ref(v)).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::userdata::LuaUserdata;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn table_with_meta(lua: &mut LuaState, event: &str, handler: LuaValue) -> LuaValue {
        let t = lua.create_table();
        let mt = lua.create_table();
        mt.write().set_str(event, handler);
        t.write().set_metatable(Some(mt));
        LuaValue::Table(t)
    }

    #[test]
    fn string_length_is_byte_count() {
        let mut lua = LuaState::new();
        assert_eq!(lua.len(&"héllo".into()).unwrap(), LuaValue::Integer(6));
        assert_eq!(lua.len(&"".into()).unwrap(), LuaValue::Integer(0));
    }

    #[test]
    fn length_of_other_kinds_is_a_type_error() {
        let mut lua = LuaState::new();
        let f = lua.create_function("f", |_, _| Ok(vec![]));
        let co = LuaValue::Thread(lua.create_thread(f.clone()).unwrap());
        let ud = LuaValue::Userdata(Arc::new(LuaUserdata::new(())));
        let cases = [
            (LuaValue::Nil, "nil"),
            (LuaValue::Boolean(false), "boolean"),
            (LuaValue::Integer(3), "number"),
            (LuaValue::Float(0.5), "number"),
            (f, "function"),
            (co, "thread"),
            (ud, "userdata"),
        ];
        for (v, kind) in cases {
            match lua.len(&v) {
                Err(LuaError::TypeError { operation, got }) => {
                    assert_eq!(operation, "get length of");
                    assert_eq!(got, kind);
                }
                other => panic!("expected a type error for {kind}, got {other:?}"),
            }
        }
    }

    #[test]
    fn table_length_uses_handler_then_raw_length() {
        let mut lua = LuaState::new();
        let handler = lua.create_function("__len", |_, _| Ok(vec![LuaValue::Integer(99)]));
        let t = table_with_meta(&mut lua, "__len", handler);
        t.as_table().unwrap().write().push("x".into());
        assert_eq!(lua.len(&t).unwrap(), LuaValue::Integer(99));

        let plain = lua.create_table();
        plain.write().push(1i64.into());
        plain.write().push(2i64.into());
        let plain = LuaValue::Table(plain);
        assert_eq!(lua.len(&plain).unwrap(), LuaValue::Integer(2));
    }

    #[test]
    fn userdata_length_goes_through_its_metatable() {
        let mut lua = LuaState::new();
        let mt = lua.create_table();
        let handler = lua.create_function("__len", |_, args| {
            let LuaValue::Userdata(u) = &args[0] else {
                return Err(LuaError::runtime("expected userdata"));
            };
            Ok(vec![LuaValue::Integer(*u.downcast_ref::<i64>().unwrap_or(&-1))])
        });
        mt.write().set_str("__len", handler);
        let ud = LuaValue::Userdata(Arc::new(LuaUserdata::with_metatable(5i64, mt)));
        assert_eq!(lua.len(&ud).unwrap(), LuaValue::Integer(5));
    }

    #[test]
    fn index_follows_table_and_function_handlers() {
        let mut lua = LuaState::new();
        let base = lua.create_table();
        base.write().set_str("greeting", "hi".into());
        let mid = table_with_meta(&mut lua, "__index", LuaValue::Table(base));
        let top = table_with_meta(&mut lua, "__index", mid);
        assert_eq!(lua.index(&top, &"greeting".into()).unwrap(), LuaValue::from("hi"));
        assert_eq!(lua.index(&top, &"missing".into()).unwrap(), LuaValue::Nil);

        let echo = lua.create_function("__index", |_, args| Ok(vec![args[1].clone()]));
        let t = table_with_meta(&mut lua, "__index", echo);
        assert_eq!(lua.index(&t, &"key".into()).unwrap(), LuaValue::from("key"));
    }

    #[test]
    fn index_loop_is_detected() {
        let mut lua = LuaState::new();
        let t = lua.create_table();
        let mt = lua.create_table();
        mt.write().set_str("__index", LuaValue::Table(t.clone()));
        t.write().set_metatable(Some(mt));
        let err = lua.index(&LuaValue::Table(t), &"x".into()).unwrap_err();
        assert!(err.to_string().contains("chain too long"));
    }

    #[test]
    fn indexing_a_non_table_names_the_kind() {
        let mut lua = LuaState::new();
        let err = lua.index(&LuaValue::Nil, &"x".into()).unwrap_err();
        assert_eq!(err.to_string(), "attempt to index a nil value");
        let err = lua
            .set_index(&LuaValue::Boolean(true), "x".into(), 1i64.into())
            .unwrap_err();
        assert_eq!(err.to_string(), "attempt to index a boolean value");
    }

    #[test]
    fn newindex_redirects_only_missing_keys() {
        let mut lua = LuaState::new();
        let sink = lua.create_table();
        let t = table_with_meta(&mut lua, "__newindex", LuaValue::Table(sink.clone()));
        t.as_table().unwrap().write().set_str("present", 1i64.into());

        lua.set_index(&t, "present".into(), 2i64.into()).unwrap();
        lua.set_index(&t, "absent".into(), 3i64.into()).unwrap();

        let raw = t.as_table().unwrap().read();
        assert_eq!(raw.get_str("present"), LuaValue::Integer(2));
        assert_eq!(raw.get_str("absent"), LuaValue::Nil);
        assert_eq!(sink.read().get_str("absent"), LuaValue::Integer(3));
    }

    #[test]
    fn arithmetic_follows_lua_rules() {
        let mut lua = LuaState::new();
        let i = |n: i64| LuaValue::Integer(n);
        assert_eq!(lua.arith(MetaOp::Add, &i(2), &i(3)).unwrap(), i(5));
        assert_eq!(lua.arith(MetaOp::Add, &"10".into(), &i(1)).unwrap(), i(11));
        assert_eq!(lua.arith(MetaOp::Div, &i(7), &i(2)).unwrap(), LuaValue::Float(3.5));
        assert_eq!(lua.arith(MetaOp::IDiv, &i(7), &i(-2)).unwrap(), i(-4));
        assert_eq!(lua.arith(MetaOp::Mod, &i(-7), &i(3)).unwrap(), i(2));
        assert_eq!(lua.arith(MetaOp::Mod, &i(7), &i(-3)).unwrap(), i(-2));
        assert_eq!(lua.unm(&i(4)).unwrap(), i(-4));
        assert!(lua.arith(MetaOp::IDiv, &i(1), &i(0)).is_err());
        assert_eq!(
            lua.arith(MetaOp::Concat, &"a".into(), &i(1)).unwrap(),
            LuaValue::from("a1")
        );

        let err = lua.arith(MetaOp::Add, &i(1), &LuaValue::Nil).unwrap_err();
        assert_eq!(err.to_string(), "attempt to perform arithmetic on a nil value");
        let err = lua.arith(MetaOp::Concat, &"a".into(), &LuaValue::Boolean(true)).unwrap_err();
        assert_eq!(err.to_string(), "attempt to concatenate a boolean value");
    }

    #[test]
    fn arithmetic_handler_is_found_on_either_operand() {
        let mut lua = LuaState::new();
        let add = lua.create_function("__add", |_, args| {
            Ok(vec![LuaValue::from(format!("{}+{}", args[0].type_name(), args[1].type_name()))])
        });
        let t = table_with_meta(&mut lua, "__add", add);
        assert_eq!(
            lua.arith(MetaOp::Add, &LuaValue::Integer(1), &t).unwrap(),
            LuaValue::from("number+table")
        );
    }

    #[test]
    fn comparisons() {
        let mut lua = LuaState::new();
        assert!(lua.compare(MetaOp::Lt, &1i64.into(), &1.5f64.into()).unwrap());
        assert!(lua.compare(MetaOp::Le, &"a".into(), &"a".into()).unwrap());
        assert!(!lua.compare(MetaOp::Lt, &f64::NAN.into(), &1i64.into()).unwrap());
        assert!(lua.compare(MetaOp::Lt, &1i64.into(), &"2".into()).is_err());
        assert!(!lua.compare(MetaOp::Eq, &1i64.into(), &"1".into()).unwrap());

        let always = lua.create_function("__eq", |_, _| Ok(vec![true.into()]));
        let a = table_with_meta(&mut lua, "__eq", always);
        let b = LuaValue::Table(lua.create_table());
        assert!(lua.compare(MetaOp::Eq, &a, &b).unwrap());
        assert!(!lua.compare(MetaOp::Eq, &a, &LuaValue::Integer(1)).unwrap());
    }

    #[test]
    fn call_handler_makes_tables_callable() {
        let mut lua = LuaState::new();
        let handler = lua.create_function("__call", |_, args| Ok(vec![LuaValue::Integer(args.len() as i64)]));
        let t = table_with_meta(&mut lua, "__call", handler);
        assert!(lua.is_callable(&t));
        assert_eq!(lua.call(&t, vec![1i64.into(), 2i64.into()]).unwrap(), vec![LuaValue::Integer(3)]);

        assert!(!lua.is_callable(&LuaValue::Integer(1)));
        let err = lua.call(&LuaValue::Integer(1), vec![]).unwrap_err();
        assert_eq!(err.to_string(), "attempt to call a number value");
    }

    proptest! {
        #[test]
        fn length_of_any_string_is_its_byte_count(s in ".*") {
            let mut lua = LuaState::new();
            let v = LuaValue::from(s.as_str());
            prop_assert_eq!(lua.len(&v).unwrap(), LuaValue::Integer(s.len() as i64));
        }
    }
}
