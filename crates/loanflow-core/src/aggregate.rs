use std::sync::Arc;

use loanflow_types::FieldMap;
use serde_json::Value;

/// Cumulative field values across all steps.
///
/// Values are immutable: [`merge`](Self::merge) builds a new aggregate, so a
/// reader holding one never observes a partially applied merge.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApplicationAggregate {
    fields: Arc<FieldMap>,
    last_delta: Arc<FieldMap>,
}

impl ApplicationAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: FieldMap) -> Self {
        Self {
            fields: Arc::new(fields),
            last_delta: Arc::new(FieldMap::new()),
        }
    }

    /// Keys in `partial` overwrite prior values; every other key is kept.
    pub fn merge(&self, partial: &FieldMap) -> Self {
        let mut fields = (*self.fields).clone();
        for (key, value) in partial {
            fields.insert(key.clone(), value.clone());
        }
        Self {
            fields: Arc::new(fields),
            last_delta: Arc::new(partial.clone()),
        }
    }

    pub fn snapshot(&self) -> Arc<FieldMap> {
        Arc::clone(&self.fields)
    }

    /// The partial applied by the most recent merge.
    pub fn delta(&self) -> Arc<FieldMap> {
        Arc::clone(&self.last_delta)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> FieldMap {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn merge_keeps_unrelated_keys() {
        let merged = ApplicationAggregate::new()
            .merge(&fields(json!({ "a": 1 })))
            .merge(&fields(json!({ "b": 2 })));
        assert_eq!(*merged.snapshot(), fields(json!({ "a": 1, "b": 2 })));
    }

    #[test]
    fn merge_overwrites_repeated_keys() {
        let merged = ApplicationAggregate::new()
            .merge(&fields(json!({ "a": 1 })))
            .merge(&fields(json!({ "a": 3 })));
        assert_eq!(*merged.snapshot(), fields(json!({ "a": 3 })));
    }

    #[test]
    fn merge_leaves_original_untouched() {
        let base = ApplicationAggregate::new().merge(&fields(json!({ "a": 1 })));
        let held = base.snapshot();
        let _next = base.merge(&fields(json!({ "a": 2, "c": 4 })));
        assert_eq!(*held, fields(json!({ "a": 1 })));
        assert_eq!(base.get("a"), Some(&json!(1)));
    }

    #[test]
    fn delta_tracks_latest_partial() {
        let merged = ApplicationAggregate::new()
            .merge(&fields(json!({ "a": 1 })))
            .merge(&fields(json!({ "b": 2 })));
        assert_eq!(*merged.delta(), fields(json!({ "b": 2 })));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn null_overwrites_rather_than_deletes() {
        let merged = ApplicationAggregate::new()
            .merge(&fields(json!({ "a": 1 })))
            .merge(&fields(json!({ "a": null })));
        assert_eq!(merged.get("a"), Some(&Value::Null));
        assert_eq!(merged.len(), 1);
    }
}
