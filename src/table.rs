// ABOUTME: The table value: hybrid associative container with sequence-length
// ABOUTME: hint and metatable support (spec §3.3, §4.4)

use crate::error::RuntimeError;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// A normalized table key: wraps a `Value` known to be non-nil, non-NaN,
/// and (for numeric keys) already collapsed to integer where applicable.
/// Carries its own `Hash`/`Eq` since `Value` itself only implements
/// `PartialEq` (floats are not `Eq`).
#[derive(Debug, Clone)]
pub struct TableKey(pub Value);

impl PartialEq for TableKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for TableKey {}

impl Hash for TableKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            Value::Nil => 0u8.hash(state),
            Value::Boolean(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Integer(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Value::Float(f) => {
                2u8.hash(state); // numbers share a hash bucket regardless of subtype
                f.to_bits().hash(state);
            }
            Value::String(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Value::Table(t) => {
                4u8.hash(state);
                (Rc::as_ptr(t) as usize).hash(state);
            }
            Value::Function(func) => {
                5u8.hash(state);
                func.name().hash(state);
                // identity is folded into name() collisions only; acceptable
                // since functions are rarely used as table keys and the Eq
                // impl (via Value::PartialEq) is authoritative.
            }
        }
    }
}

/// Normalizes a raw key per spec §3.3: a float key equal to an integer is
/// stored as that integer; nil and NaN keys fail.
pub fn normalize_key(key: Value) -> Result<TableKey, RuntimeError> {
    match key {
        Value::Nil => Err(RuntimeError::new("table index is nil")),
        Value::Float(f) => {
            if f.is_nan() {
                return Err(RuntimeError::new("table index is NaN"));
            }
            let i = f as i64;
            if i as f64 == f {
                Ok(TableKey(Value::Integer(i)))
            } else {
                Ok(TableKey(Value::Float(f)))
            }
        }
        other => Ok(TableKey(other)),
    }
}

#[derive(Debug, Default)]
pub struct Table {
    data: HashMap<TableKey, Value>,
    /// Insertion sequence number assigned to each key the first time it is
    /// set, and removed when the key is deleted; a key reinserted after
    /// deletion gets a fresh, later sequence number. Used to order the
    /// `next` snapshot without keeping a parallel key list that could drift
    /// out of sync with `data` (a `Vec` would need its own de-duplication
    /// on delete-then-reinsert, which a `HashMap` keyed by `TableKey`
    /// already gives for free).
    insert_seq: HashMap<TableKey, u64>,
    next_seq: u64,
    pub metatable: Option<Rc<RefCell<Table>>>,
    sequence_hint: i64,
    next_keys: RefCell<Option<Vec<TableKey>>>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rawget(&self, key: &Value) -> Value {
        let Ok(key) = normalize_key(key.clone()) else {
            return Value::Nil;
        };
        self.data.get(&key).cloned().unwrap_or(Value::Nil)
    }

    pub fn rawset(&mut self, key: Value, value: Value) -> Result<(), RuntimeError> {
        let key = normalize_key(key)?;
        self.next_keys.borrow_mut().take();

        let is_new = !self.data.contains_key(&key);
        if matches!(value, Value::Nil) {
            self.data.remove(&key);
            self.insert_seq.remove(&key);
        } else {
            if is_new {
                self.insert_seq.insert(key.clone(), self.next_seq);
                self.next_seq += 1;
            }
            self.data.insert(key.clone(), value.clone());
        }

        if let Value::Integer(i) = key.0 {
            if i >= 1 {
                if !matches!(value, Value::Nil) && i == self.sequence_hint + 1 {
                    self.sequence_hint = i;
                    while self
                        .data
                        .contains_key(&TableKey(Value::Integer(self.sequence_hint + 1)))
                    {
                        self.sequence_hint += 1;
                    }
                } else if matches!(value, Value::Nil) && i <= self.sequence_hint {
                    self.sequence_hint = i - 1;
                }
            }
        }
        Ok(())
    }

    /// The `#` operator: any `n` such that `t[n]` present and `t[n+1]`
    /// absent. Fast path via the hint; otherwise exponential-then-binary
    /// search (spec §3.3).
    pub fn length(&mut self) -> i64 {
        if self.sequence_hint >= 0
            && !self
                .data
                .contains_key(&TableKey(Value::Integer(self.sequence_hint + 1)))
        {
            return self.sequence_hint;
        }
        if !self.data.contains_key(&TableKey(Value::Integer(1))) {
            return 0;
        }
        let mut j: i64 = 1;
        while self.data.contains_key(&TableKey(Value::Integer(j))) {
            match j.checked_mul(2) {
                Some(next) => j = next,
                None => break,
            }
        }
        let (mut lo, mut hi) = (j / 2, j);
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.data.contains_key(&TableKey(Value::Integer(mid))) {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        self.sequence_hint = lo;
        lo
    }

    /// Lazily snapshots the current key set in insertion order; advances
    /// past `key`. Returns `None` once iteration is exhausted.
    pub fn next(&self, key: Option<&Value>) -> Result<Option<(Value, Value)>, RuntimeError> {
        if self.next_keys.borrow().is_none() {
            let mut snapshot: Vec<TableKey> = self.data.keys().cloned().collect();
            snapshot.sort_by_key(|k| self.insert_seq.get(k).copied().unwrap_or(u64::MAX));
            *self.next_keys.borrow_mut() = Some(snapshot);
        }
        let keys_ref = self.next_keys.borrow();
        let keys = keys_ref.as_ref().unwrap();

        match key {
            None => {
                if keys.is_empty() {
                    return Ok(None);
                }
                let k = &keys[0];
                let v = self.data.get(k).cloned().unwrap_or(Value::Nil);
                Ok(Some((k.0.clone(), v)))
            }
            Some(key) => {
                let normalized = normalize_key(key.clone())?;
                let idx = keys
                    .iter()
                    .position(|k| *k == normalized)
                    .ok_or_else(|| RuntimeError::new("invalid key to 'next'"))?;
                if idx + 1 >= keys.len() {
                    return Ok(None);
                }
                let k = &keys[idx + 1];
                let v = self.data.get(k).cloned().unwrap_or(Value::Nil);
                Ok(Some((k.0.clone(), v)))
            }
        }
    }

    /// Extracts the sequence part `1..n` as a plain `Vec`.
    pub fn to_vec(&self) -> Vec<Value> {
        let mut result = Vec::new();
        let mut i = 1i64;
        loop {
            match self.data.get(&TableKey(Value::Integer(i))) {
                Some(v) => {
                    result.push(v.clone());
                    i += 1;
                }
                None => break,
            }
        }
        result
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        let mut t = Table::new();
        for (i, v) in items.into_iter().enumerate() {
            let _ = t.rawset(Value::Integer(i as i64 + 1), v);
        }
        t
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rawset_then_rawget_round_trips() {
        let mut t = Table::new();
        t.rawset(Value::Integer(1), Value::string("a")).unwrap();
        assert_eq!(t.rawget(&Value::Integer(1)), Value::string("a"));
    }

    #[test]
    fn nil_write_deletes_key() {
        let mut t = Table::new();
        t.rawset(Value::Integer(1), Value::string("a")).unwrap();
        t.rawset(Value::Integer(1), Value::Nil).unwrap();
        assert_eq!(t.rawget(&Value::Integer(1)), Value::Nil);
    }

    #[test]
    fn float_key_equal_to_integer_is_normalized() {
        let mut t = Table::new();
        t.rawset(Value::Float(2.0), Value::string("x")).unwrap();
        assert_eq!(t.rawget(&Value::Integer(2)), Value::string("x"));
    }

    #[test]
    fn nan_key_fails() {
        let mut t = Table::new();
        let err = t.rawset(Value::Float(f64::NAN), Value::Integer(1));
        assert!(err.is_err());
    }

    #[test]
    fn sequence_length_matches_contiguous_run() {
        let mut t = Table::new();
        for i in 1..=3 {
            t.rawset(Value::Integer(i), Value::Integer(i * 10)).unwrap();
        }
        assert_eq!(t.length(), 3);
    }

    #[test]
    fn length_after_hole_uses_search_fallback() {
        let mut t = Table::new();
        t.rawset(Value::Integer(1), Value::Integer(1)).unwrap();
        t.rawset(Value::Integer(2), Value::Integer(2)).unwrap();
        t.rawset(Value::Integer(4), Value::Integer(4)).unwrap();
        let n = t.length();
        assert!(n == 2 || n == 4);
    }

    #[test]
    fn next_visits_insertion_order_then_stops() {
        let mut t = Table::new();
        t.rawset(Value::string("a"), Value::Integer(1)).unwrap();
        t.rawset(Value::string("b"), Value::Integer(2)).unwrap();
        let (k1, v1) = t.next(None).unwrap().unwrap();
        assert_eq!(k1, Value::string("a"));
        assert_eq!(v1, Value::Integer(1));
        let (k2, v2) = t.next(Some(&k1)).unwrap().unwrap();
        assert_eq!(k2, Value::string("b"));
        assert_eq!(v2, Value::Integer(2));
        assert!(t.next(Some(&k2)).unwrap().is_none());
    }

    #[test]
    fn next_terminates_after_delete_then_reinsert_of_a_key() {
        // Regression: a key that is set, deleted, then set again must
        // appear exactly once in the `next` snapshot, or iteration over it
        // never advances past the duplicate and never terminates.
        let mut t = Table::new();
        t.rawset(Value::string("a"), Value::Integer(1)).unwrap();
        t.rawset(Value::string("a"), Value::Nil).unwrap();
        t.rawset(Value::string("a"), Value::Integer(2)).unwrap();
        t.rawset(Value::string("b"), Value::Integer(3)).unwrap();

        let mut seen = Vec::new();
        let mut key = None;
        loop {
            match t.next(key.as_ref()).unwrap() {
                None => break,
                Some((k, v)) => {
                    seen.push((k.clone(), v));
                    key = Some(k);
                }
            }
            assert!(seen.len() <= 2, "iteration did not terminate");
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn next_with_absent_key_fails() {
        let t = Table::new();
        assert!(t.next(Some(&Value::string("missing"))).is_err());
    }

    #[test]
    fn to_vec_extracts_sequence_part_only() {
        let mut t = Table::new();
        t.rawset(Value::Integer(1), Value::Integer(10)).unwrap();
        t.rawset(Value::Integer(2), Value::Integer(20)).unwrap();
        t.rawset(Value::string("k"), Value::Integer(99)).unwrap();
        assert_eq!(t.to_vec(), vec![Value::Integer(10), Value::Integer(20)]);
    }
}
