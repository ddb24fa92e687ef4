//! Per-instance state.

use heinzel_core::{ModelSchema, Value};
use std::collections::{BTreeMap, HashMap};

/// Flags kept for every instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meta {
    /// The instance was evicted and its values were since reloaded from a row
    pub was_reloaded: bool,
    /// Overwrite field values from every row that materializes this instance
    pub force_sync: bool,
    /// Put the instance in the entry cache after saving
    pub do_cache: bool,
    /// Field updates mark the instance dirty
    pub track_changes: bool,
}

impl Meta {
    pub fn new(force_sync: bool) -> Self {
        Self {
            was_reloaded: false,
            force_sync,
            do_cache: true,
            track_changes: false,
        }
    }
}

/// Storage columns and metadata of one instance.
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub model: String,
    pub pk_column: String,
    /// Column name to value
    pub values: HashMap<String, Value>,
    /// Annotation values from the query that produced this instance
    pub extra: BTreeMap<String, Value>,
    /// Placeholder key used in the identity map until a primary key exists
    pub pending: Option<u64>,
    pub meta: Meta,
}

impl InstanceInfo {
    /// Fresh instance with every column at its initial value.
    pub fn new(schema: &ModelSchema, force_sync: bool) -> Self {
        let values = schema
            .fields
            .iter()
            .map(|f| (f.column_name.clone(), f.initial.clone()))
            .collect();
        Self {
            model: schema.name.clone(),
            pk_column: schema.pk_column().to_string(),
            values,
            extra: BTreeMap::new(),
            pending: None,
            meta: Meta::new(force_sync),
        }
    }

    pub fn get(&self, column: &str) -> Value {
        self.values.get(column).cloned().unwrap_or(Value::Null)
    }

    pub fn pk(&self) -> Value {
        self.get(&self.pk_column)
    }

    /// Row identity used by joins and linker tables.
    pub fn row_id(&self) -> Value {
        self.get("id")
    }

    /// Saved at least once?
    pub fn is_saved(&self) -> bool {
        !self.row_id().is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heinzel_core::FieldInfo;

    #[test]
    fn test_initial_values() {
        let schema = ModelSchema::builder("Car")
            .field(FieldInfo::text("name").initial("unnamed"))
            .build()
            .unwrap();
        let info = InstanceInfo::new(&schema, true);
        assert_eq!(info.get("name"), Value::from("unnamed"));
        assert!(info.pk().is_null());
        assert!(!info.is_saved());
        assert!(info.meta.do_cache);
        assert!(!info.meta.was_reloaded);
    }
}
