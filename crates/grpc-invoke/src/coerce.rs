//! Coercion of loosely typed chat input into request JSON.
//!
//! Float and double fields accept strings and numbers. String fields accept
//! strings and numbers, stringified. Any other kind is skipped.

use crate::schema::{FieldKind, FieldSpec};
use serde_json::{Map, Number, Value};
use tracing::debug;

/// Build a request object containing the coercible inputs for `fields`.
///
/// Inputs that name no field are ignored, as are fields with no input.
pub fn build_request_json(fields: &[FieldSpec], inputs: &Map<String, Value>) -> Map<String, Value> {
    let mut request = Map::new();

    for field in fields {
        let Some(value) = inputs.get(&field.name) else {
            continue;
        };

        match coerce_value(field.kind, value) {
            Some(coerced) => {
                request.insert(field.name.clone(), coerced);
            }
            None => debug!(
                "Skipping input {} ({}) with value {}",
                field.name, field.kind, value
            ),
        }
    }

    request
}

fn coerce_value(kind: FieldKind, value: &Value) -> Option<Value> {
    match kind {
        FieldKind::Float | FieldKind::Double => {
            let parsed = match value {
                Value::String(s) => s.trim().parse::<f64>().ok()?,
                Value::Number(n) => n.as_f64()?,
                _ => return None,
            };
            Number::from_f64(parsed).map(Value::Number)
        }
        FieldKind::String => match value {
            Value::String(s) => Some(Value::String(s.clone())),
            Value::Number(n) => Some(Value::String(n.to_string())),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec { name: "amount".into(), kind: FieldKind::Float },
            FieldSpec { name: "note".into(), kind: FieldKind::String },
            FieldSpec { name: "count".into(), kind: FieldKind::Int32 },
        ]
    }

    fn inputs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_float_from_string_and_string_from_int() {
        let request = build_request_json(&fields(), &inputs(json!({"amount": "3.5", "note": 42})));

        assert_eq!(request.get("amount"), Some(&json!(3.5)));
        assert_eq!(request.get("note"), Some(&json!("42")));
    }

    #[test]
    fn test_float_from_integer() {
        let request = build_request_json(&fields(), &inputs(json!({"amount": 7})));
        assert_eq!(request.get("amount").and_then(Value::as_f64), Some(7.0));
    }

    #[test]
    fn test_string_from_float() {
        let request = build_request_json(&fields(), &inputs(json!({"note": 2.25})));
        assert_eq!(request.get("note"), Some(&json!("2.25")));
    }

    #[test]
    fn test_other_kinds_skipped() {
        let request = build_request_json(&fields(), &inputs(json!({"count": "5"})));
        assert!(request.is_empty());
    }

    #[test]
    fn test_unparseable_float_skipped() {
        let request = build_request_json(&fields(), &inputs(json!({"amount": "lots", "note": "hi"})));
        assert!(!request.contains_key("amount"));
        assert_eq!(request.get("note"), Some(&json!("hi")));
    }

    #[test]
    fn test_unknown_inputs_ignored() {
        let request = build_request_json(&fields(), &inputs(json!({"extra": "x"})));
        assert!(request.is_empty());
    }
}
