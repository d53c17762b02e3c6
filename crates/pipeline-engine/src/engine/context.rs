//! Cumulative context merging.
//!
//! The context is a flat JSON object threaded through a run. Each step
//! produces a new value; nothing mutates a context another step can see.

use serde_json::{Map, Value};

/// Cumulative context for a run.
pub type Context = Map<String, Value>;

/// Shallow, non-null-wins merge of `output` into `base`.
///
/// Top-level keys of `output` overwrite `base` unless the incoming value is
/// `null`. Nested objects are replaced, not merged. A non-object output
/// contributes nothing.
pub fn merge(base: &Context, output: &Value) -> Context {
    let mut merged = base.clone();
    if let Value::Object(fields) = output {
        merge_into(&mut merged, fields);
    }
    merged
}

/// In-place variant of [`merge`] for building a context from many outputs.
pub fn merge_into(target: &mut Context, fields: &Map<String, Value>) {
    for (key, value) in fields {
        if !value.is_null() {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Interpret a stored JSON value as a context; anything but an object is empty.
pub fn from_value(value: &Value) -> Context {
    match value {
        Value::Object(map) => map.clone(),
        _ => Context::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_non_null_wins() {
        let base = from_value(&json!({"domain": "acme.com", "employees": 50}));
        let merged = merge(&base, &json!({"employees": null, "industry": "saas"}));

        assert_eq!(merged.get("employees"), Some(&json!(50)));
        assert_eq!(merged.get("industry"), Some(&json!("saas")));
        assert_eq!(merged.get("domain"), Some(&json!("acme.com")));
    }

    #[test]
    fn test_merge_last_write_wins_shallow() {
        let base = from_value(&json!({"company": {"name": "Acme", "size": 10}}));
        let merged = merge(&base, &json!({"company": {"name": "Acme Inc"}}));

        assert_eq!(merged.get("company"), Some(&json!({"name": "Acme Inc"})));
    }

    #[test]
    fn test_merge_leaves_base_untouched() {
        let base = from_value(&json!({"a": 1}));
        let merged = merge(&base, &json!({"a": 2}));

        assert_eq!(base.get("a"), Some(&json!(1)));
        assert_eq!(merged.get("a"), Some(&json!(2)));
    }

    #[test]
    fn test_merge_ignores_non_object_output() {
        let base = from_value(&json!({"a": 1}));
        assert_eq!(merge(&base, &json!([1, 2, 3])), base);
        assert_eq!(merge(&base, &Value::Null), base);
    }

    #[test]
    fn test_ordered_merges_match_replay() {
        let outputs = [
            json!({"domain": "acme.com"}),
            json!({"employees": 10, "industry": null}),
            json!({"employees": 12, "industry": "saas"}),
        ];

        let mut replayed = Context::new();
        for output in &outputs {
            replayed = merge(&replayed, output);
        }

        assert_eq!(
            Value::Object(replayed),
            json!({"domain": "acme.com", "employees": 12, "industry": "saas"})
        );
    }
}
