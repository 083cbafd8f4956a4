//! JSON-schema subset used for tool inputs.
//!
//! Supported keywords: `type`, `properties`, `required`, `items`, `enum`,
//! `const`, `additionalProperties`. Anything else is ignored.

use serde_json::Value;

const KNOWN_TYPES: &[&str] = &[
    "object", "array", "string", "number", "integer", "boolean", "null",
];

/// Check that a schema is well formed.
pub fn check_schema(schema: &Value) -> Result<(), String> {
    check_at(schema, "$")
}

fn check_at(schema: &Value, path: &str) -> Result<(), String> {
    let obj = schema
        .as_object()
        .ok_or_else(|| format!("schema at '{}' must be an object", path))?;

    if let Some(type_spec) = obj.get("type") {
        match type_spec {
            Value::String(t) => check_type_name(t, path)?,
            Value::Array(types) if !types.is_empty() => {
                for t in types {
                    let name = t
                        .as_str()
                        .ok_or_else(|| format!("'type' at '{}' must list strings", path))?;
                    check_type_name(name, path)?;
                }
            }
            _ => return Err(format!("'type' at '{}' must be a string or non-empty array", path)),
        }
    }

    if let Some(props) = obj.get("properties") {
        let props = props
            .as_object()
            .ok_or_else(|| format!("'properties' at '{}' must be an object", path))?;
        for (key, child) in props {
            check_at(child, &format!("{}.{}", path, key))?;
        }
    }

    if let Some(required) = obj.get("required") {
        let ok = required
            .as_array()
            .is_some_and(|items| items.iter().all(|v| v.is_string()));
        if !ok {
            return Err(format!("'required' at '{}' must be an array of strings", path));
        }
    }

    if let Some(items) = obj.get("items") {
        check_at(items, &format!("{}[]", path))?;
    }

    if let Some(variants) = obj.get("enum") {
        if !variants.is_array() {
            return Err(format!("'enum' at '{}' must be an array", path));
        }
    }

    match obj.get("additionalProperties") {
        None | Some(Value::Bool(_)) => {}
        Some(extra @ Value::Object(_)) => check_at(extra, &format!("{}.*", path))?,
        Some(_) => {
            return Err(format!(
                "'additionalProperties' at '{}' must be a boolean or schema",
                path
            ))
        }
    }

    Ok(())
}

fn check_type_name(name: &str, path: &str) -> Result<(), String> {
    if KNOWN_TYPES.contains(&name) {
        Ok(())
    } else {
        Err(format!("unknown type '{}' at '{}'", name, path))
    }
}

/// Validate a value against a well-formed schema.
pub fn validate(value: &Value, schema: &Value) -> Result<(), String> {
    validate_at(value, schema, "$")
}

fn validate_at(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    let Some(obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(type_spec) = obj.get("type") {
        validate_type(value, type_spec, path)?;
    }

    if let Some(constant) = obj.get("const") {
        if value != constant {
            return Err(format!("{} expected const {}", path, constant));
        }
    }

    if let Some(variants) = obj.get("enum").and_then(|v| v.as_array()) {
        if !variants.iter().any(|candidate| candidate == value) {
            return Err(format!("{} is not one of the allowed enum values", path));
        }
    }

    if let Some(required) = obj.get("required").and_then(|v| v.as_array()) {
        let object = value
            .as_object()
            .ok_or_else(|| format!("{} must be an object", path))?;
        for key in required.iter().filter_map(|v| v.as_str()) {
            if !object.contains_key(key) {
                return Err(format!("{} missing required field '{}'", path, key));
            }
        }
    }

    if let Some(properties) = obj.get("properties").and_then(|v| v.as_object()) {
        if let Some(object) = value.as_object() {
            for (key, property_schema) in properties {
                if let Some(child) = object.get(key) {
                    validate_at(child, property_schema, &format!("{}.{}", path, key))?;
                }
            }

            match obj.get("additionalProperties") {
                Some(Value::Bool(false)) => {
                    if let Some(key) = object.keys().find(|k| !properties.contains_key(*k)) {
                        return Err(format!("{} contains unknown field '{}'", path, key));
                    }
                }
                Some(extra @ Value::Object(_)) => {
                    for (key, child) in object.iter().filter(|(k, _)| !properties.contains_key(*k)) {
                        validate_at(child, extra, &format!("{}.{}", path, key))?;
                    }
                }
                _ => {}
            }
        }
    }

    if let Some(item_schema) = obj.get("items") {
        if let Some(items) = value.as_array() {
            for (i, item) in items.iter().enumerate() {
                validate_at(item, item_schema, &format!("{}[{}]", path, i))?;
            }
        }
    }

    Ok(())
}

fn validate_type(value: &Value, type_spec: &Value, path: &str) -> Result<(), String> {
    let matches = |t: &str| match t {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => false,
    };

    match type_spec {
        Value::String(name) if matches(name.as_str()) => Ok(()),
        Value::String(name) => Err(format!("{} expected type '{}'", path, name)),
        Value::Array(types) => {
            if types.iter().filter_map(|t| t.as_str()).any(matches) {
                Ok(())
            } else {
                Err(format!("{} did not match any allowed types", path))
            }
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query_schema() -> Value {
        json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        })
    }

    #[test]
    fn well_formed_schemas_pass() {
        assert!(check_schema(&query_schema()).is_ok());
        assert!(check_schema(&json!({})).is_ok());
        assert!(check_schema(&json!({
            "type": ["string", "null"],
            "items": {"type": "integer"},
            "additionalProperties": {"type": "string"}
        }))
        .is_ok());
    }

    #[test]
    fn malformed_schemas_fail() {
        assert!(check_schema(&json!("object")).is_err());
        assert!(check_schema(&json!({"type": "text"})).is_err());
        assert!(check_schema(&json!({"type": []})).is_err());
        assert!(check_schema(&json!({"required": "query"})).is_err());
        assert!(check_schema(&json!({"required": [1]})).is_err());
        assert!(check_schema(&json!({"properties": []})).is_err());
        assert!(check_schema(&json!({"properties": {"q": {"type": "strng"}}})).is_err());
        assert!(check_schema(&json!({"enum": "a"})).is_err());
        assert!(check_schema(&json!({"additionalProperties": 3})).is_err());
    }

    #[test]
    fn validates_required_and_types() {
        let schema = query_schema();
        assert!(validate(&json!({"query": "rust"}), &schema).is_ok());

        let err = validate(&json!({}), &schema).unwrap_err();
        assert!(err.contains("missing required field 'query'"));

        let err = validate(&json!({"query": 5}), &schema).unwrap_err();
        assert!(err.contains("$.query expected type 'string'"));

        assert!(validate(&Value::Null, &schema).is_err());
    }

    #[test]
    fn validates_enum_items_and_additional() {
        let schema = json!({
            "type": "object",
            "properties": {
                "choice": {"enum": ["A", "B"]},
                "sources": {"type": "array", "items": {"type": "string"}}
            },
            "additionalProperties": false
        });
        assert!(validate(&json!({"choice": "A", "sources": ["x"]}), &schema).is_ok());
        assert!(validate(&json!({"choice": "C"}), &schema).is_err());
        assert!(validate(&json!({"sources": ["x", 2]}), &schema)
            .unwrap_err()
            .contains("$.sources[1]"));
        assert!(validate(&json!({"extra": true}), &schema)
            .unwrap_err()
            .contains("unknown field 'extra'"));
    }

    #[test]
    fn integer_rejects_floats() {
        let schema = json!({"type": "integer"});
        assert!(validate(&json!(3), &schema).is_ok());
        assert!(validate(&json!(3.5), &schema).is_err());
    }
}
