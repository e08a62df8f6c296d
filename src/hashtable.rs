//! Mutable `HashMap` backing store keyed by runtime [`Value`].

use std::fmt;

use crate::sequence::Sequence;
use crate::value::Value;

/// Key hashing/equality here is whatever [`Value`]'s own `Hash`/`Eq` impls
/// provide (pointer identity for compound types, content hash for
/// scalars/strings) — deliberately not fully consistent with the
/// Int/Real-promoting `PartialEq`, matching the source this is ported from.
#[derive(Debug, Clone, Default)]
pub struct Hashtable {
    table: std::collections::HashMap<Value, Value>,
}

impl Hashtable {
    pub fn new() -> Self {
        Hashtable { table: Default::default() }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn get<'a>(&'a self, key: &Value, default_value: &'a Value) -> &'a Value {
        self.table.get(key).unwrap_or(default_value)
    }

    pub fn set(&mut self, key: Value, value: Value) {
        self.table.insert(key, value);
    }

    pub fn remove(&mut self, key: &Value) {
        self.table.remove(key);
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    pub fn exists(&self, key: &Value) -> bool {
        self.table.contains_key(key)
    }

    /// First key (iteration order is unspecified) whose value equals `value`.
    pub fn find(&self, value: &Value) -> Option<&Value> {
        self.table.iter().find(|(_, v)| *v == value).map(|(k, _)| k)
    }

    pub fn count(&self, value: &Value) -> usize {
        self.table.values().filter(|v| *v == value).count()
    }

    pub fn keys(&self) -> Sequence {
        Sequence::from_vec(self.table.keys().cloned().collect())
    }

    pub fn values(&self) -> Sequence {
        Sequence::from_vec(self.table.values().cloned().collect())
    }

    pub fn items(&self) -> Sequence {
        Sequence::from_vec(
            self.table
                .iter()
                .map(|(k, v)| Value::Pair(std::rc::Rc::new(crate::value_pair::ValuePair::new(k.clone(), v.clone()))))
                .collect(),
        )
    }

    pub fn iter(&self) -> std::collections::hash_map::Iter<'_, Value, Value> {
        self.table.iter()
    }
}

impl PartialEq for Hashtable {
    fn eq(&self, other: &Self) -> bool {
        self.table.len() == other.table.len()
            && self.table.iter().all(|(k, v)| other.table.get(k).is_some_and(|ov| ov == v))
    }
}

impl PartialOrd for Hashtable {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.table.len().partial_cmp(&other.table.len())
    }
}

impl fmt::Display for Hashtable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.table.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let mut ht = Hashtable::new();
        ht.set(Value::str("k"), Value::Int(1));
        assert_eq!(*ht.get(&Value::str("k"), &Value::Null), Value::Int(1));
    }

    #[test]
    fn get_missing_returns_default() {
        let ht = Hashtable::new();
        assert_eq!(*ht.get(&Value::str("missing"), &Value::Null), Value::Null);
    }
}
