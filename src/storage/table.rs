use crate::core::{Row, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Committed rows of one entity kind plus its key sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTable {
    rows: HashMap<Value, Row>,
    next_key: i64,
}

impl StoredTable {
    pub fn new() -> Self {
        Self {
            rows: HashMap::new(),
            next_key: 1,
        }
    }

    pub fn get(&self, key: &Value) -> Option<&Row> {
        self.rows.get(key)
    }

    pub fn contains(&self, key: &Value) -> bool {
        self.rows.contains_key(key)
    }

    pub fn put(&mut self, key: Value, row: Row) {
        self.observe_key(&key);
        self.rows.insert(key, row);
    }

    pub fn remove(&mut self, key: &Value) -> Option<Row> {
        self.rows.remove(key)
    }

    /// Hand out the next sequence value. Values are never reused, even if the
    /// unit of work that drew them rolls back.
    pub fn next_key(&mut self) -> Value {
        let key = self.next_key;
        self.next_key += 1;
        Value::Integer(key)
    }

    /// Keep the sequence ahead of application-assigned integer keys.
    pub fn observe_key(&mut self, key: &Value) {
        if let Value::Integer(k) = key
            && *k >= self.next_key
        {
            self.next_key = k + 1;
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn keys(&self) -> Vec<Value> {
        let mut keys: Vec<Value> = self.rows.keys().cloned().collect();
        keys.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        keys
    }
}

impl Default for StoredTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_skips_assigned_keys() {
        let mut table = StoredTable::new();
        assert_eq!(table.next_key(), Value::Integer(1));

        table.put(Value::Integer(10), vec![Value::from("H2G2")]);
        assert_eq!(table.next_key(), Value::Integer(11));

        table.put(Value::from("abc"), vec![]);
        assert_eq!(table.next_key(), Value::Integer(12));
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn test_keys_are_sorted() {
        let mut table = StoredTable::new();
        table.put(Value::Integer(3), vec![]);
        table.put(Value::Integer(1), vec![]);
        assert_eq!(table.keys(), vec![Value::Integer(1), Value::Integer(3)]);
        assert!(table.remove(&Value::Integer(1)).is_some());
        assert!(!table.contains(&Value::Integer(1)));
    }
}
