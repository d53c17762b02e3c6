//! Step run-condition evaluation.
//!
//! Conditions are small boolean trees over the cumulative context:
//!
//! ```json
//! {"all": [
//!     {"field": "domain", "op": "exists"},
//!     {"any": [
//!         {"field": "company.employees", "op": "gte", "value": 50},
//!         {"field": "industry", "op": "icontains", "value": "saas"}
//!     ]}
//! ]}
//! ```
//!
//! Evaluation is total: an unresolved path, a type mismatch or a value that
//! cannot be read as a number makes the leaf false. Nothing here returns an
//! error or panics.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::context::Context;

/// Leaf operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Exists,
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    Contains,
    Icontains,
    In,
}

/// A condition expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConditionExpr {
    /// `{}`: always true.
    Empty {},
    All {
        all: Vec<ConditionExpr>,
    },
    Any {
        any: Vec<ConditionExpr>,
    },
    Leaf {
        field: String,
        op: Operator,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
}

// `Empty {}` would swallow any malformed object under a plain untagged
// derive, so the empty case is matched on the raw value first.
impl<'de> Deserialize<'de> for ConditionExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct AllShape {
            all: Vec<ConditionExpr>,
        }

        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct AnyShape {
            any: Vec<ConditionExpr>,
        }

        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct LeafShape {
            field: String,
            op: Operator,
            #[serde(default)]
            value: Option<Value>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            All(AllShape),
            Any(AnyShape),
            Leaf(LeafShape),
        }

        let raw = Value::deserialize(deserializer)?;
        if raw.as_object().is_some_and(|map| map.is_empty()) {
            return Ok(ConditionExpr::Empty {});
        }

        let shape = Shape::deserialize(raw).map_err(|_| {
            serde::de::Error::custom(
                "condition must be {field, op, value?}, {all: [...]}, {any: [...]} or {}",
            )
        })?;

        Ok(match shape {
            Shape::All(AllShape { all }) => ConditionExpr::All { all },
            Shape::Any(AnyShape { any }) => ConditionExpr::Any { any },
            Shape::Leaf(LeafShape { field, op, value }) => ConditionExpr::Leaf { field, op, value },
        })
    }
}

/// Evaluate an optional condition against the context. `None` is true.
pub fn evaluate(condition: Option<&ConditionExpr>, context: &Context) -> bool {
    condition.map_or(true, |expr| expr.evaluate(context))
}

impl ConditionExpr {
    /// Leaf shorthand, mostly for building conditions in code.
    pub fn leaf(field: &str, op: Operator, value: Option<Value>) -> Self {
        ConditionExpr::Leaf {
            field: field.to_string(),
            op,
            value,
        }
    }

    pub fn evaluate(&self, context: &Context) -> bool {
        match self {
            ConditionExpr::Empty {} => true,
            ConditionExpr::All { all } => all.iter().all(|expr| expr.evaluate(context)),
            ConditionExpr::Any { any } => any.iter().any(|expr| expr.evaluate(context)),
            ConditionExpr::Leaf { field, op, value } => {
                evaluate_leaf(resolve_path(context, field), *op, value.as_ref())
            }
        }
    }
}

/// Walk a dot-path through nested objects (and numeric array indexes).
/// `None` is the absent sentinel; JSON `null` counts as absent.
pub fn resolve_path<'a>(context: &'a Context, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    (!current.is_null()).then_some(current)
}

fn evaluate_leaf(actual: Option<&Value>, op: Operator, expected: Option<&Value>) -> bool {
    let Some(actual) = actual else {
        return false;
    };

    match op {
        Operator::Exists => true,
        Operator::Eq => expected.is_some_and(|e| values_equal(actual, e)),
        Operator::Ne => expected.map_or(true, |e| !values_equal(actual, e)),
        Operator::Lt => compare_numeric(actual, expected, |a, b| a < b),
        Operator::Gt => compare_numeric(actual, expected, |a, b| a > b),
        Operator::Lte => compare_numeric(actual, expected, |a, b| a <= b),
        Operator::Gte => compare_numeric(actual, expected, |a, b| a >= b),
        Operator::Contains => contains(actual, expected, false),
        Operator::Icontains => contains(actual, expected, true),
        Operator::In => match expected {
            Some(Value::Array(candidates)) => candidates.iter().any(|c| values_equal(actual, c)),
            _ => false,
        },
    }
}

/// Equality with numeric tolerance: `50`, `50.0` and `"50"` compare equal
/// as long as one side is a JSON number.
fn values_equal(a: &Value, b: &Value) -> bool {
    if a.is_number() || b.is_number() {
        if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
            return x == y;
        }
    }
    a == b
}

fn compare_numeric(actual: &Value, expected: Option<&Value>, cmp: fn(f64, f64) -> bool) -> bool {
    match (as_number(actual), expected.and_then(as_number)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn contains(actual: &Value, expected: Option<&Value>, ignore_case: bool) -> bool {
    let Some(expected) = expected else {
        return false;
    };

    match actual {
        Value::String(haystack) => match expected.as_str() {
            Some(needle) if ignore_case => haystack.to_lowercase().contains(&needle.to_lowercase()),
            Some(needle) => haystack.contains(needle),
            None => false,
        },
        Value::Array(items) => items.iter().any(|item| match (item.as_str(), expected.as_str()) {
            (Some(a), Some(b)) if ignore_case => a.eq_ignore_ascii_case(b),
            _ => values_equal(item, expected),
        }),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Context {
        match value {
            Value::Object(map) => map,
            _ => panic!("context fixture must be an object"),
        }
    }

    fn cond(value: Value) -> ConditionExpr {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_missing_field_is_false_for_every_operator() {
        let context = ctx(json!({"other": 1}));
        let operators = [
            Operator::Exists,
            Operator::Eq,
            Operator::Ne,
            Operator::Lt,
            Operator::Gt,
            Operator::Lte,
            Operator::Gte,
            Operator::Contains,
            Operator::Icontains,
            Operator::In,
        ];

        for op in operators {
            let expr = ConditionExpr::leaf("domain", op, Some(json!(["acme.com"])));
            assert!(!expr.evaluate(&context), "{:?} on a missing field", op);
        }
    }

    #[test]
    fn test_null_and_empty_conditions_are_true() {
        let context = Context::new();
        assert!(evaluate(None, &context));
        assert!(evaluate(Some(&cond(json!({}))), &context));
    }

    #[test]
    fn test_dot_path_resolution() {
        let context = ctx(json!({"company": {"size": {"employees": 120}}, "tags": ["a", "b"]}));
        assert_eq!(
            resolve_path(&context, "company.size.employees"),
            Some(&json!(120))
        );
        assert_eq!(resolve_path(&context, "tags.1"), Some(&json!("b")));
        assert_eq!(resolve_path(&context, "company.size.revenue"), None);
        assert_eq!(resolve_path(&context, "tags.x"), None);
    }

    #[test]
    fn test_null_value_counts_as_absent() {
        let context = ctx(json!({"domain": null}));
        assert!(!cond(json!({"field": "domain", "op": "exists"})).evaluate(&context));
    }

    #[test]
    fn test_numeric_comparison_coerces_strings() {
        let context = ctx(json!({"employees": "250", "revenue": 1.5e6}));
        assert!(cond(json!({"field": "employees", "op": "gt", "value": 100})).evaluate(&context));
        assert!(cond(json!({"field": "employees", "op": "lte", "value": "250"})).evaluate(&context));
        assert!(cond(json!({"field": "revenue", "op": "gte", "value": 1000000})).evaluate(&context));
        assert!(!cond(json!({"field": "employees", "op": "lt", "value": 10})).evaluate(&context));
    }

    #[test]
    fn test_non_numeric_comparison_is_false() {
        let context = ctx(json!({"name": "acme", "flags": {"a": 1}}));
        assert!(!cond(json!({"field": "name", "op": "gt", "value": 1})).evaluate(&context));
        assert!(!cond(json!({"field": "name", "op": "lt", "value": 1})).evaluate(&context));
        assert!(!cond(json!({"field": "flags", "op": "gte", "value": 0})).evaluate(&context));
        assert!(!cond(json!({"field": "name", "op": "gte"})).evaluate(&context));
    }

    #[test]
    fn test_equality_operators() {
        let context = ctx(json!({"status": "active", "employees": 50}));
        assert!(cond(json!({"field": "status", "op": "eq", "value": "active"})).evaluate(&context));
        assert!(cond(json!({"field": "employees", "op": "eq", "value": 50.0})).evaluate(&context));
        assert!(cond(json!({"field": "employees", "op": "eq", "value": "50"})).evaluate(&context));
        assert!(cond(json!({"field": "status", "op": "ne", "value": "churned"})).evaluate(&context));
        assert!(!cond(json!({"field": "status", "op": "ne", "value": "active"})).evaluate(&context));
    }

    #[test]
    fn test_string_and_membership_operators() {
        let context = ctx(json!({"industry": "B2B SaaS", "tags": ["Fintech", "api"], "country": "DE"}));
        assert!(cond(json!({"field": "industry", "op": "contains", "value": "SaaS"})).evaluate(&context));
        assert!(!cond(json!({"field": "industry", "op": "contains", "value": "saas"})).evaluate(&context));
        assert!(cond(json!({"field": "industry", "op": "icontains", "value": "saas"})).evaluate(&context));
        assert!(cond(json!({"field": "tags", "op": "icontains", "value": "fintech"})).evaluate(&context));
        assert!(cond(json!({"field": "country", "op": "in", "value": ["DE", "AT"]})).evaluate(&context));
        assert!(!cond(json!({"field": "country", "op": "in", "value": "DE"})).evaluate(&context));
    }

    #[test]
    fn test_combinators() {
        let context = ctx(json!({"domain": "acme.com", "employees": 10}));
        let expr = cond(json!({"all": [
            {"field": "domain", "op": "exists"},
            {"any": [
                {"field": "employees", "op": "gte", "value": 100},
                {"field": "domain", "op": "contains", "value": "acme"}
            ]}
        ]}));
        assert!(expr.evaluate(&context));

        let expr = cond(json!({"all": [
            {"field": "domain", "op": "exists"},
            {"field": "linkedin_url", "op": "exists"}
        ]}));
        assert!(!expr.evaluate(&context));
        assert!(cond(json!({"all": []})).evaluate(&context));
        assert!(!cond(json!({"any": []})).evaluate(&context));
    }

    #[test]
    fn test_malformed_condition_rejected_at_parse() {
        assert!(serde_json::from_value::<ConditionExpr>(json!({"field": "a", "op": "regex"})).is_err());
        assert!(serde_json::from_value::<ConditionExpr>(json!({"foo": "bar"})).is_err());
    }
}
