//! Validate tool call arguments against a declaration's JSON Schema.

/// Check `args` against `schema`.
///
/// Covers what the catalog's schemas use: an object at the top level,
/// required keys, and primitive property types. Returns the first
/// violation as a message.
pub fn validate_arguments(
    args: &serde_json::Value,
    schema: &serde_json::Value,
) -> Result<(), String> {
    let wants_object = schema.get("type").and_then(|v| v.as_str()) == Some("object");
    // A missing argument map is the same as an empty one.
    let empty = serde_json::Map::new();
    let obj = match args {
        serde_json::Value::Object(obj) => obj,
        serde_json::Value::Null if wants_object => &empty,
        other if wants_object => {
            return Err(format!(
                "expected object arguments, got {}",
                json_type_name(other)
            ))
        }
        _ => return Ok(()),
    };

    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for name in required.iter().filter_map(|f| f.as_str()) {
            if !obj.contains_key(name) {
                return Err(format!("missing required argument '{name}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) {
        for (key, value) in obj {
            let Some(expected) = properties
                .get(key)
                .and_then(|p| p.get("type"))
                .and_then(|t| t.as_str())
            else {
                continue;
            };
            if !value_matches_type(value, expected) {
                return Err(format!(
                    "argument '{key}' expected type '{expected}', got {}",
                    json_type_name(value)
                ));
            }
        }
    }

    Ok(())
}

fn value_matches_type(value: &serde_json::Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
