//! Per-type canonical field schemas.
//!
//! Provider payloads arrive as untyped JSON. Nothing reaches an entity merge
//! without passing [`validate`]: unknown keys are ignored, nulls are dropped
//! (so they can never overwrite known data) and values of the wrong shape are
//! rejected and reported.

use serde_json::{Map, Number, Value};

use super::types::EntityType;

/// Expected shape of a canonical field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// Absolute http(s) url; normalised to lowercase host without trailing slash.
    Url,
    /// Bare domain; scheme, `www.` and path are stripped.
    Domain,
    Email,
    Integer,
    Number,
    Boolean,
    TextList,
    Object,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind }
}

const COMPANY_FIELDS: &[FieldSpec] = &[
    field("external_id", FieldKind::Text),
    field("domain", FieldKind::Domain),
    field("name", FieldKind::Text),
    field("linkedin_url", FieldKind::Url),
    field("website_url", FieldKind::Url),
    field("industry", FieldKind::Text),
    field("employees", FieldKind::Integer),
    field("founded_year", FieldKind::Integer),
    field("country", FieldKind::Text),
    field("city", FieldKind::Text),
    field("description", FieldKind::Text),
    field("revenue_usd", FieldKind::Number),
    field("technologies", FieldKind::TextList),
    field("attributes", FieldKind::Object),
];

const PERSON_FIELDS: &[FieldSpec] = &[
    field("external_id", FieldKind::Text),
    field("linkedin_url", FieldKind::Url),
    field("email", FieldKind::Email),
    field("full_name", FieldKind::Text),
    field("first_name", FieldKind::Text),
    field("last_name", FieldKind::Text),
    field("title", FieldKind::Text),
    field("seniority", FieldKind::Text),
    field("company_domain", FieldKind::Domain),
    field("company_name", FieldKind::Text),
    field("location", FieldKind::Text),
    field("phone", FieldKind::Text),
];

const JOB_FIELDS: &[FieldSpec] = &[
    field("external_id", FieldKind::Text),
    field("job_url", FieldKind::Url),
    field("title", FieldKind::Text),
    field("company_domain", FieldKind::Domain),
    field("company_name", FieldKind::Text),
    field("location", FieldKind::Text),
    field("employment_type", FieldKind::Text),
    field("remote", FieldKind::Boolean),
    field("salary_min", FieldKind::Number),
    field("salary_max", FieldKind::Number),
    field("posted_at", FieldKind::Text),
    field("description", FieldKind::Text),
];

/// Field table for an entity type.
pub fn fields(entity_type: EntityType) -> &'static [FieldSpec] {
    match entity_type {
        EntityType::Company => COMPANY_FIELDS,
        EntityType::Person => PERSON_FIELDS,
        EntityType::Job => JOB_FIELDS,
    }
}

pub fn field_kind(entity_type: EntityType, name: &str) -> Option<FieldKind> {
    fields(entity_type)
        .iter()
        .find(|spec| spec.name == name)
        .map(|spec| spec.kind)
}

/// Result of projecting a payload through a schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validated {
    /// Normalised, non-null known fields.
    pub fields: Map<String, Value>,
    /// Known fields whose values were rejected, in schema order.
    pub rejected: Vec<String>,
}

impl Validated {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Project `input` through the schema for `entity_type`.
pub fn validate(entity_type: EntityType, input: &Map<String, Value>) -> Validated {
    let mut validated = Validated::default();

    for spec in fields(entity_type) {
        let Some(value) = input.get(spec.name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        match coerce(spec.kind, value) {
            Some(coerced) => {
                validated.fields.insert(spec.name.to_string(), coerced);
            }
            None => validated.rejected.push(spec.name.to_string()),
        }
    }

    validated
}

/// Normalise one value to `kind`, or `None` if it does not fit.
pub fn coerce(kind: FieldKind, value: &Value) -> Option<Value> {
    match kind {
        FieldKind::Text => match value {
            Value::String(s) => non_empty(s).map(|s| Value::String(s.to_string())),
            Value::Number(n) => Some(Value::String(n.to_string())),
            _ => None,
        },
        FieldKind::Url => value.as_str().and_then(normalize_url).map(Value::String),
        FieldKind::Domain => value.as_str().and_then(normalize_domain).map(Value::String),
        FieldKind::Email => value.as_str().and_then(normalize_email).map(Value::String),
        FieldKind::Integer => as_integer(value).map(Value::from),
        FieldKind::Number => as_number(value)
            .and_then(Number::from_f64)
            .map(Value::Number),
        FieldKind::Boolean => match value {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(Value::Bool(true)),
                "false" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        FieldKind::TextList => match value {
            Value::Array(items) => {
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    list.push(Value::String(non_empty(item.as_str()?)?.to_string()));
                }
                Some(Value::Array(list))
            }
            _ => None,
        },
        FieldKind::Object => value.is_object().then(|| value.clone()),
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            let f = n.as_f64()?;
            (f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
        }),
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            cleaned.parse::<i64>().ok()
        }
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

fn strip_scheme(s: &str) -> (Option<&str>, &str) {
    for scheme in ["https://", "http://"] {
        if s
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
        {
            return (Some(&s[..scheme.len() - 3]), &s[scheme.len()..]);
        }
    }
    (None, s)
}

fn valid_host(host: &str) -> bool {
    host.contains('.')
        && !host.starts_with('.')
        && !host.ends_with('.')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

/// `https://WWW.Acme.com/about` → `acme.com`.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let trimmed = non_empty(raw)?;
    let (_, rest) = strip_scheme(trimmed);
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.split(':').next()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    valid_host(&host).then_some(host)
}

/// Lowercase scheme and host, drop `www.` and trailing slash. A missing
/// scheme defaults to https.
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = non_empty(raw)?;
    if trimmed.chars().any(char::is_whitespace) {
        return None;
    }
    let (scheme, rest) = strip_scheme(trimmed);
    let scheme = scheme.map_or_else(|| "https".to_string(), str::to_ascii_lowercase);

    let (host, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    let host = host.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if !valid_host(host.split(':').next().unwrap_or_default()) {
        return None;
    }
    let path = path.trim_end_matches('/');
    Some(format!("{}://{}{}", scheme, host, path))
}

pub fn normalize_email(raw: &str) -> Option<String> {
    let email = non_empty(raw)?.to_ascii_lowercase();
    let (local, domain) = email.split_once('@')?;
    let ok = !local.is_empty()
        && !domain.contains('@')
        && valid_host(domain)
        && !email.chars().any(char::is_whitespace);
    ok.then_some(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validate_drops_nulls_and_unknown_keys() {
        let validated = validate(
            EntityType::Company,
            &object(json!({"domain": "acme.com", "employees": null, "results": [1, 2]})),
        );
        assert_eq!(Value::Object(validated.fields), json!({"domain": "acme.com"}));
        assert!(validated.rejected.is_empty());
    }

    #[test]
    fn test_validate_reports_rejected_fields() {
        let validated = validate(
            EntityType::Company,
            &object(json!({"domain": "not a domain", "employees": "lots", "name": "Acme"})),
        );
        assert_eq!(Value::Object(validated.fields), json!({"name": "Acme"}));
        assert_eq!(validated.rejected, vec!["domain".to_string(), "employees".to_string()]);
    }

    #[test]
    fn test_numeric_strings_are_coerced() {
        let validated = validate(
            EntityType::Company,
            &object(json!({"employees": "1,200", "revenue_usd": "2.5e6", "founded_year": 1999.0})),
        );
        assert_eq!(validated.fields.get("employees"), Some(&json!(1200)));
        assert_eq!(validated.fields.get("revenue_usd"), Some(&json!(2500000.0)));
        assert_eq!(validated.fields.get("founded_year"), Some(&json!(1999)));
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("https://WWW.Acme.com/about"), Some("acme.com".to_string()));
        assert_eq!(normalize_domain("acme.io:443"), Some("acme.io".to_string()));
        assert_eq!(normalize_domain("localhost"), None);
        assert_eq!(normalize_domain("   "), None);
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("HTTPS://www.LinkedIn.com/company/acme/"),
            Some("https://linkedin.com/company/acme".to_string())
        );
        assert_eq!(
            normalize_url("linkedin.com/in/jane"),
            Some("https://linkedin.com/in/jane".to_string())
        );
        assert_eq!(normalize_url("not a url"), None);
    }

    #[test]
    fn test_non_ascii_hosts_are_rejected_without_panicking() {
        assert_eq!(normalize_domain("société.com"), None);
        assert_eq!(normalize_domain("https://société.com/about"), None);
        assert_eq!(normalize_domain("日本.jp"), None);
        assert_eq!(normalize_url("société.com/jobs/1"), None);
        assert_eq!(normalize_url("ht€ps://acme.com"), None);
        assert_eq!(normalize_email("jane@société.com"), None);

        let validated = validate(
            EntityType::Person,
            &object(json!({
                "company_domain": "société.com",
                "linkedin_url": "https://linkédin.com/in/zoe",
                "full_name": "Zoé"
            })),
        );
        assert_eq!(Value::Object(validated.fields), json!({"full_name": "Zoé"}));
        assert_eq!(
            validated.rejected,
            vec!["linkedin_url".to_string(), "company_domain".to_string()]
        );
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email(" Jane@Acme.COM "), Some("jane@acme.com".to_string()));
        assert_eq!(normalize_email("jane@"), None);
        assert_eq!(normalize_email("jane@@acme.com"), None);
    }

    #[test]
    fn test_job_boolean_and_list_fields() {
        let validated = validate(
            EntityType::Job,
            &object(json!({"remote": "yes", "title": "Engineer"})),
        );
        assert_eq!(validated.fields.get("remote"), Some(&json!(true)));

        assert_eq!(
            coerce(FieldKind::TextList, &json!(["rust", " go "])),
            Some(json!(["rust", "go"]))
        );
        assert_eq!(coerce(FieldKind::TextList, &json!(["rust", 3])), None);
    }
}
