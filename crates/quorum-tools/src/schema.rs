//! Minimal JSON-schema parameter validation: type, required, enum, and one
//! level of array item / nested object checking. Violations come back as
//! messages for a structured error result, never as panics.

use serde_json::Value;

/// Validates `args` against a tool's parameter schema.
pub fn validate_params(schema: &Value, args: &Value) -> Result<(), String> {
    if !schema.is_object() {
        return Ok(());
    }
    validate_value(schema, args, "params")
}

fn validate_value(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("{path}: value {value} not in enum {allowed:?}"));
        }
    }

    let Some(expected) = schema.get("type").and_then(Value::as_str) else {
        return Ok(());
    };

    match expected {
        "object" => {
            let Some(map) = value.as_object() else {
                return Err(format!("{path}: expected object, got {}", type_name(value)));
            };
            if let Some(required) = schema.get("required").and_then(Value::as_array) {
                for field in required.iter().filter_map(Value::as_str) {
                    if !map.contains_key(field) {
                        return Err(format!("{path}: missing required field '{field}'"));
                    }
                }
            }
            if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                for (key, prop_schema) in props {
                    if let Some(entry) = map.get(key) {
                        validate_value(prop_schema, entry, &format!("{path}.{key}"))?;
                    }
                }
            }
            Ok(())
        }
        "array" => {
            let Some(items) = value.as_array() else {
                return Err(format!("{path}: expected array, got {}", type_name(value)));
            };
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate_value(item_schema, item, &format!("{path}[{i}]"))?;
                }
            }
            Ok(())
        }
        "string" => value
            .is_string()
            .then_some(())
            .ok_or_else(|| format!("{path}: expected string, got {}", type_name(value))),
        "number" => value
            .is_number()
            .then_some(())
            .ok_or_else(|| format!("{path}: expected number, got {}", type_name(value))),
        "integer" => value
            .is_i64()
            .then_some(())
            .ok_or_else(|| format!("{path}: expected integer, got {}", type_name(value))),
        "boolean" => value
            .is_boolean()
            .then_some(())
            .ok_or_else(|| format!("{path}: expected boolean, got {}", type_name(value))),
        _ => Ok(()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
