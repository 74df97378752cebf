//! JSON coercion helpers (§9 ambient). One place for all lenient extraction
//! out of dynamic `*_json` payloads, each with an explicit fallback.
//! Grounded on the `_coerce_*` staticmethod family in `repository.py`.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Strings pass through stripped-and-non-empty; non-string scalars are
/// stringified; `null`/missing/blank-string all collapse to `None`.
pub fn coerce_text(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Some(other) => Some(value_to_plain_string(other)),
    }
}

fn value_to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => if *b { "True".to_string() } else { "False".to_string() },
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

pub fn coerce_text_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| item.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

pub fn coerce_float(value: Option<&Value>) -> Option<f64> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

pub fn coerce_int(value: Option<&Value>) -> Option<i64> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(Value::Bool(b)) => Some(if *b { 1 } else { 0 }),
        _ => None,
    }
}

/// Always resolves to a concrete `bool` — unrecognized input defaults to
/// `false`, never `Option<bool>`.
pub fn coerce_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => {
            matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
        }
        _ => false,
    }
}

pub fn coerce_datetime(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            let candidate = s.trim();
            if candidate.is_empty() {
                return None;
            }
            let normalized = candidate.replacen('Z', "+00:00", 1);
            DateTime::parse_from_rfc3339(&normalized)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        _ => None,
    }
}

pub fn coerce_json_list(value: Option<&Value>) -> Vec<serde_json::Map<String, Value>> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items.iter().filter_map(|item| item.as_object().cloned()).collect()
}

pub fn coerce_json_dict(value: Option<&Value>) -> serde_json::Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(s)) => serde_json::from_str::<Value>(s)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default(),
        _ => serde_json::Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_text_trims_and_drops_blank() {
        assert_eq!(coerce_text(Some(&Value::String("  hi  ".into()))), Some("hi".into()));
        assert_eq!(coerce_text(Some(&Value::String("   ".into()))), None);
        assert_eq!(coerce_text(None), None);
        assert_eq!(coerce_text(Some(&Value::Null)), None);
    }

    #[test]
    fn coerce_text_stringifies_non_string_scalars() {
        assert_eq!(coerce_text(Some(&serde_json::json!(42))), Some("42".into()));
        assert_eq!(coerce_text(Some(&serde_json::json!(true))), Some("True".into()));
    }

    #[test]
    fn coerce_text_list_filters_non_strings_and_blanks() {
        let value = serde_json::json!(["a", "", " b ", 3, null]);
        assert_eq!(coerce_text_list(Some(&value)), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(coerce_text_list(Some(&serde_json::json!("not a list"))), Vec::<String>::new());
    }

    #[test]
    fn coerce_float_and_int_parse_numeric_strings() {
        assert_eq!(coerce_float(Some(&serde_json::json!("0.72"))), Some(0.72));
        assert_eq!(coerce_float(Some(&serde_json::json!("nope"))), None);
        assert_eq!(coerce_int(Some(&serde_json::json!("42"))), Some(42));
        assert_eq!(coerce_int(Some(&serde_json::json!(3.9))), Some(3));
    }

    #[test]
    fn coerce_bool_recognizes_truthy_and_falsy_strings_and_numbers() {
        assert!(coerce_bool(Some(&serde_json::json!("yes"))));
        assert!(coerce_bool(Some(&serde_json::json!("ON"))));
        assert!(!coerce_bool(Some(&serde_json::json!("off"))));
        assert!(coerce_bool(Some(&serde_json::json!(1))));
        assert!(!coerce_bool(Some(&serde_json::json!(0))));
        assert!(!coerce_bool(None));
        assert!(!coerce_bool(Some(&serde_json::json!("garbage"))));
    }

    #[test]
    fn coerce_datetime_parses_z_suffix_as_utc() {
        let value = serde_json::json!("2026-01-15T10:00:00Z");
        let dt = coerce_datetime(Some(&value)).unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-01-15T10:00:00+00:00");
        assert_eq!(coerce_datetime(Some(&serde_json::json!("not a date"))), None);
        assert_eq!(coerce_datetime(Some(&serde_json::json!(""))), None);
    }

    #[test]
    fn coerce_json_dict_parses_string_encoded_json() {
        let value = serde_json::json!(r#"{"a": 1}"#);
        let dict = coerce_json_dict(Some(&value));
        assert_eq!(dict.get("a"), Some(&serde_json::json!(1)));
        assert!(coerce_json_dict(Some(&serde_json::json!("not json"))).is_empty());
        assert!(coerce_json_dict(Some(&serde_json::json!([1, 2]))).is_empty());
    }

    #[test]
    fn coerce_json_list_keeps_only_object_items() {
        let value = serde_json::json!([{"a": 1}, "skip", 3, {"b": 2}]);
        let list = coerce_json_list(Some(&value));
        assert_eq!(list.len(), 2);
    }
}
