use crate::error::LuaError;
use crate::value::{LuaValue, TableRef};
use indexmap::IndexMap;

/// A Lua table: an associative array keyed by any non-nil, non-NaN value.
///
/// Integer keys `1..=n` live in a compact `array` part; everything else goes
/// into the `hash` part. The hash part keeps insertion order, so traversal
/// with [`next`](LuaTable::next) is stable while the table is not given new
/// keys. Assigning nil leaves a tombstone rather than removing the slot, which
/// keeps an in-progress traversal valid; tombstones are swept when new keys
/// are inserted.
#[derive(Debug, Clone, Default)]
pub struct LuaTable {
    array: Vec<LuaValue>,
    hash: IndexMap<HashKey, (LuaValue, LuaValue)>,
    tombstones: usize,
    metatable: Option<TableRef>,
}

/// Hashable projection of a key. Reference kinds hash by address; the entry
/// keeps the original key value alive so the address stays unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum HashKey {
    Int(i64),
    Float(u64),
    Str(String),
    Bool(bool),
    Ref(usize),
}

impl HashKey {
    /// Normalises integral floats to integers. `None` for nil and NaN, which
    /// are never present in a table.
    fn from_value(v: &LuaValue) -> Option<HashKey> {
        Some(match v {
            LuaValue::Nil => return None,
            LuaValue::Boolean(b) => HashKey::Bool(*b),
            LuaValue::Integer(n) => HashKey::Int(*n),
            LuaValue::Float(f) => match float_to_int(*f) {
                Some(n) => HashKey::Int(n),
                None if f.is_nan() => return None,
                None => HashKey::Float(f.to_bits()),
            },
            LuaValue::LuaString(s) => HashKey::Str(s.clone()),
            other => HashKey::Ref(other.identity()?),
        })
    }
}

fn float_to_int(f: f64) -> Option<i64> {
    // `as` saturates, so 2^63 would otherwise alias i64::MAX
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if !(-LIMIT..LIMIT).contains(&f) || f.fract() != 0.0 {
        return None;
    }
    Some(f as i64)
}

/// Integer view of a key, if it has one.
fn int_key(key: &LuaValue) -> Option<i64> {
    match key {
        LuaValue::Integer(n) => Some(*n),
        LuaValue::Float(f) => float_to_int(*f),
        _ => None,
    }
}

impl LuaTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(narray: usize, nhash: usize) -> Self {
        Self {
            array: Vec::with_capacity(narray),
            hash: IndexMap::with_capacity(nhash),
            ..Self::default()
        }
    }

    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.clone()
    }

    pub fn set_metatable(&mut self, mt: Option<TableRef>) {
        self.metatable = mt;
    }

    /// Raw read of `t[key]`. Missing keys read as nil.
    pub fn get(&self, key: &LuaValue) -> LuaValue {
        if let Some(i) = int_key(key) {
            if i >= 1 && (i as usize) <= self.array.len() {
                return self.array[(i - 1) as usize].clone();
            }
        }
        HashKey::from_value(key)
            .and_then(|hk| self.hash.get(&hk))
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    pub fn get_str(&self, key: &str) -> LuaValue {
        self.hash
            .get(&HashKey::Str(key.to_owned()))
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    /// Raw write of `t[key] = val`. Nil and NaN keys are rejected.
    pub fn set(&mut self, key: LuaValue, val: LuaValue) -> Result<(), LuaError> {
        if let Some(i) = int_key(&key) {
            if i >= 1 {
                let idx = (i - 1) as usize;
                if idx < self.array.len() {
                    self.array[idx] = val;
                    return Ok(());
                }
                if idx == self.array.len() && !val.is_nil() {
                    self.array.push(val);
                    self.migrate_sequence();
                    return Ok(());
                }
            }
        }
        let hk = match HashKey::from_value(&key) {
            Some(hk) => hk,
            None if key.is_nil() => return Err(LuaError::runtime("table index is nil")),
            None => return Err(LuaError::runtime("table index is NaN")),
        };
        // Store integral floats as integers so `next` reports the normal form.
        let key = match hk {
            HashKey::Int(n) => LuaValue::Integer(n),
            _ => key,
        };
        match self.hash.get_mut(&hk) {
            Some(slot) => {
                match (slot.1.is_nil(), val.is_nil()) {
                    (false, true) => self.tombstones += 1,
                    (true, false) => self.tombstones -= 1,
                    _ => {}
                }
                slot.1 = val;
            }
            None if val.is_nil() => {}
            None => {
                self.sweep();
                self.hash.insert(hk, (key, val));
            }
        }
        Ok(())
    }

    pub fn set_str(&mut self, key: &str, val: LuaValue) {
        // string keys are always valid
        let _ = self.set(LuaValue::from(key), val);
    }

    /// Lua-style length: a border of the sequence (`t[n] ~= nil` and
    /// `t[n+1] == nil`). Deterministic for an unmodified table.
    pub fn length(&self) -> i64 {
        let mut n = self.array.len();
        while n > 0 && self.array[n - 1].is_nil() {
            n -= 1;
        }
        n as i64
    }

    /// Append `val` at `#t + 1`.
    pub fn push(&mut self, val: LuaValue) {
        let n = self.length();
        let _ = self.set(LuaValue::Integer(n + 1), val);
    }

    /// Traversal step: the entry after `key` (nil starts), or `None` at the
    /// end. Unknown keys are an error.
    pub fn next(&self, key: &LuaValue) -> Result<Option<(LuaValue, LuaValue)>, LuaError> {
        let mut array_from = 0;
        let mut hash_from = 0;
        if !key.is_nil() {
            match int_key(key) {
                Some(i) if i >= 1 && (i as usize) <= self.array.len() => array_from = i as usize,
                _ => {
                    let idx = HashKey::from_value(key)
                        .and_then(|hk| self.hash.get_index_of(&hk))
                        .ok_or_else(|| LuaError::runtime("invalid key to 'next'"))?;
                    array_from = self.array.len();
                    hash_from = idx + 1;
                }
            }
        }
        for (i, v) in self.array.iter().enumerate().skip(array_from) {
            if !v.is_nil() {
                return Ok(Some((LuaValue::Integer(i as i64 + 1), v.clone())));
            }
        }
        Ok(self
            .hash
            .values()
            .skip(hash_from)
            .find(|(_, v)| !v.is_nil())
            .cloned())
    }

    /// Every value held by the table: array slots, then hash keys and values.
    pub(crate) fn values_held(&self) -> impl Iterator<Item = &LuaValue> {
        self.array
            .iter()
            .chain(self.hash.values().flat_map(|(k, v)| [k, v]))
    }

    /// After the array part grows, pull the following integer keys out of
    /// the hash part.
    fn migrate_sequence(&mut self) {
        loop {
            let next = HashKey::Int(self.array.len() as i64 + 1);
            match self.hash.shift_remove(&next) {
                Some((_, v)) if !v.is_nil() => self.array.push(v),
                Some(_) => {
                    self.tombstones -= 1;
                    break;
                }
                None => break,
            }
        }
    }

    fn sweep(&mut self) {
        if self.tombstones > 8 && self.tombstones * 2 > self.hash.len() {
            self.hash.retain(|_, (_, v)| !v.is_nil());
            self.tombstones = 0;
        }
    }
}
