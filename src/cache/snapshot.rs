//! Immutable view of the cache state.
//!
//! Every accepted update produces a new snapshot; existing snapshots are never
//! mutated, so a holder never observes a torn update.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::query::definition::{ConfigurationError, Record};

/// Cheap-to-clone, copy-on-write mapping from query key to records.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    entries: Arc<HashMap<String, Arc<Vec<Record>>>>,
}

impl CacheSnapshot {
    pub fn get(&self, key: &str) -> Option<&[Record]> {
        self.entries.get(key).map(|items| items.as_slice())
    }

    /// Shared handle to an entry, for callers that outlive the snapshot borrow.
    pub fn entry(&self, key: &str) -> Option<Arc<Vec<Record>>> {
        self.entries.get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether the store holds at least one record for `key`.
    pub fn has_records(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|items| !items.is_empty())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of records across all entries.
    pub fn record_count(&self) -> usize {
        self.entries.values().map(|items| items.len()).sum()
    }

    /// A new snapshot with `key` replaced; `self` is left untouched.
    pub(crate) fn with_entry(&self, key: &str, items: Vec<Record>) -> Self {
        let mut entries = HashMap::clone(&self.entries);
        entries.insert(key.to_string(), Arc::new(items));
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Whether two snapshots are the same state object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    /// Find the first record of `key` whose `field` matches `value`.
    ///
    /// Values are compared by their string form, so `3` matches `"3"`.
    pub fn find_record(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<&Record>, ConfigurationError> {
        if value.is_empty() {
            return Err(ConfigurationError::MissingParameter("value"));
        }
        if key.is_empty() {
            return Err(ConfigurationError::MissingParameter("name"));
        }
        Ok(self
            .get(key)
            .and_then(|items| {
                items
                    .iter()
                    .find(|record| record.get(field).is_some_and(|v| value_eq(v, value)))
            }))
    }

    /// Return the `label` field of the record found by [`find_record`](Self::find_record).
    pub fn lookup(
        &self,
        key: &str,
        field: &str,
        value: &str,
        label: &str,
    ) -> Result<Option<&Value>, ConfigurationError> {
        Ok(self
            .find_record(key, field, value)?
            .and_then(|record| record.get(label)))
    }
}

fn value_eq(candidate: &Value, wanted: &str) -> bool {
    match candidate {
        Value::String(s) => s == wanted,
        other => other.to_string() == wanted,
    }
}

impl Serialize for CacheSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            self.entries
                .iter()
                .map(|(key, records)| (key, records.as_slice())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn sample() -> CacheSnapshot {
        CacheSnapshot::default().with_entry(
            "roles",
            vec![
                record(json!({"id": 1, "label": "Admin"})),
                record(json!({"id": "2", "label": "Editor"})),
            ],
        )
    }

    #[test]
    fn test_serializes_as_key_to_records_map() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            value,
            json!({"roles": [{"id": 1, "label": "Admin"}, {"id": "2", "label": "Editor"}]})
        );
        assert_eq!(serde_json::to_value(CacheSnapshot::default()).unwrap(), json!({}));
    }

    #[test]
    fn test_with_entry_is_copy_on_write() {
        let before = sample();
        let after = before.with_entry("users", vec![]);

        assert!(!before.contains_key("users"));
        assert!(after.contains_key("users"));
        assert!(!after.has_records("users"));
        assert_eq!(after.get("roles").unwrap().len(), 2);
    }

    #[test]
    fn test_lookup_compares_string_forms() {
        let snapshot = sample();
        assert_eq!(
            snapshot.lookup("roles", "id", "1", "label").unwrap(),
            Some(&json!("Admin"))
        );
        assert_eq!(
            snapshot.lookup("roles", "id", "2", "label").unwrap(),
            Some(&json!("Editor"))
        );
        assert_eq!(snapshot.lookup("roles", "id", "9", "label").unwrap(), None);
        assert_eq!(snapshot.lookup("users", "id", "1", "label").unwrap(), None);
    }

    #[test]
    fn test_lookup_requires_parameters() {
        let snapshot = sample();
        assert_eq!(
            snapshot.lookup("roles", "id", "", "label").unwrap_err(),
            ConfigurationError::MissingParameter("value")
        );
        assert_eq!(
            snapshot.find_record("", "id", "1").unwrap_err(),
            ConfigurationError::MissingParameter("name")
        );
    }
}
