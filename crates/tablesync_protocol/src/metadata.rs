//! Extensible per-table key-value metadata.

use serde::{Deserialize, Serialize};

/// Canonical entry types for well-known `(partition, key)` pairs.
///
/// Callers may declare whatever type they like; recognized entries are
/// coerced to the canonical type so clients can rely on it.
const ENFORCED_TYPES: [(&str, &str, &str); 4] = [
    ("Table", "displayName", "object"),
    ("Table", "defaultViewType", "string"),
    ("Column", "displayName", "object"),
    ("Column", "displayChoicesList", "array"),
];

/// One metadata entry, keyed by `(table_id, partition, aspect, key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueStoreEntry {
    /// Owning table.
    pub table_id: String,
    /// Namespace partition (e.g. `Table`, `Column`).
    pub partition: String,
    /// Sub-scope within the partition (e.g. an element key).
    pub aspect: String,
    /// Entry key.
    pub key: String,
    /// Declared value type.
    pub entry_type: String,
    /// Serialized value.
    pub value: Option<String>,
}

impl KeyValueStoreEntry {
    /// Creates an entry.
    pub fn new(
        table_id: impl Into<String>,
        partition: impl Into<String>,
        aspect: impl Into<String>,
        key: impl Into<String>,
        entry_type: impl Into<String>,
        value: Option<String>,
    ) -> Self {
        Self {
            table_id: table_id.into(),
            partition: partition.into(),
            aspect: aspect.into(),
            key: key.into(),
            entry_type: entry_type.into(),
            value,
        }
    }

    /// Coerces the declared type to the canonical type for recognized
    /// `(partition, key)` pairs; unknown pairs are left untouched.
    pub fn enforce_entry_type(&mut self) {
        for (partition, key, canonical) in ENFORCED_TYPES {
            if self.partition == partition && self.key == key {
                self.entry_type = canonical.to_string();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforced_type_is_coerced() {
        let mut entry = KeyValueStoreEntry::new(
            "t1",
            "Table",
            "default",
            "displayName",
            "string",
            Some("{\"text\":\"Households\"}".into()),
        );
        entry.enforce_entry_type();
        assert_eq!(entry.entry_type, "object");
    }

    #[test]
    fn unknown_pair_is_untouched() {
        let mut entry =
            KeyValueStoreEntry::new("t1", "Custom", "default", "whatever", "string", None);
        entry.enforce_entry_type();
        assert_eq!(entry.entry_type, "string");
    }
}
