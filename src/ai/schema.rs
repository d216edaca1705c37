//! JSON-schema subset: builders and a structural validator.
//!
//! Schemas are plain `serde_json::Value`s so they can be serialized into
//! provider requests unchanged. The validator covers exactly the subset
//! the prompt registry uses: `object`, `array` (single `items` schema
//! only), `string`, `boolean`, `integer`, `enum`, `anyOf`, `required`,
//! `minItems`/`maxItems`. Tuple-style `items` arrays are rejected as
//! invalid schemas.

use serde_json::{json, Map, Value};

pub fn string() -> Value {
    json!({ "type": "string" })
}

pub fn boolean() -> Value {
    json!({ "type": "boolean" })
}

pub fn integer() -> Value {
    json!({ "type": "integer" })
}

pub fn string_enum(values: &[&str]) -> Value {
    json!({ "type": "string", "enum": values })
}

pub fn array_of(items: Value) -> Value {
    json!({ "type": "array", "items": items })
}

pub fn bounded_array(items: Value, min: usize, max: usize) -> Value {
    json!({ "type": "array", "items": items, "minItems": min, "maxItems": max })
}

pub fn any_of(variants: Vec<Value>) -> Value {
    json!({ "anyOf": variants })
}

/// Object schema; every listed property is required unless it appears in
/// `optional`.
pub fn object(properties: &[(&str, Value)], optional: &[&str]) -> Value {
    let mut props = Map::new();
    let mut required = Vec::new();
    for (name, schema) in properties {
        props.insert((*name).to_string(), schema.clone());
        if !optional.contains(name) {
            required.push(Value::String((*name).to_string()));
        }
    }
    json!({ "type": "object", "properties": props, "required": required })
}

/// Validates `value` against `schema`. Returns the path and reason of the
/// first violation.
pub fn validate(value: &Value, schema: &Value) -> Result<(), String> {
    validate_at(value, schema, "$")
}

fn validate_at(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    let schema_obj = schema
        .as_object()
        .ok_or_else(|| format!("{path}: schema is not an object"))?;

    if let Some(variants) = schema_obj.get("anyOf") {
        let variants = variants
            .as_array()
            .ok_or_else(|| format!("{path}: anyOf must be an array"))?;
        if variants
            .iter()
            .any(|v| validate_at(value, v, path).is_ok())
        {
            return Ok(());
        }
        return Err(format!("{path}: no anyOf variant matched"));
    }

    if let Some(allowed) = schema_obj.get("enum") {
        let allowed = allowed
            .as_array()
            .ok_or_else(|| format!("{path}: enum must be an array"))?;
        if !allowed.contains(value) {
            return Err(format!("{path}: value not in enum"));
        }
        return Ok(());
    }

    match schema_obj.get("type").and_then(Value::as_str) {
        Some("string") => value
            .is_string()
            .then_some(())
            .ok_or_else(|| format!("{path}: expected string")),
        Some("boolean") => value
            .is_boolean()
            .then_some(())
            .ok_or_else(|| format!("{path}: expected boolean")),
        Some("integer") => value
            .is_i64()
            .then_some(())
            .ok_or_else(|| format!("{path}: expected integer")),
        Some("number") => value
            .is_number()
            .then_some(())
            .ok_or_else(|| format!("{path}: expected number")),
        Some("object") => validate_object(value, schema_obj, path),
        Some("array") => validate_array(value, schema_obj, path),
        Some(other) => Err(format!("{path}: unsupported schema type '{other}'")),
        None => Err(format!("{path}: schema has no type")),
    }
}

fn validate_object(
    value: &Value,
    schema: &Map<String, Value>,
    path: &str,
) -> Result<(), String> {
    let obj = value
        .as_object()
        .ok_or_else(|| format!("{path}: expected object"))?;

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required {
            let name = name.as_str().unwrap_or_default();
            if !obj.contains_key(name) {
                return Err(format!("{path}: missing required property '{name}'"));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (name, prop_schema) in props {
            if let Some(prop_value) = obj.get(name) {
                // Providers emit null for absent optional fields.
                if prop_value.is_null() {
                    continue;
                }
                validate_at(prop_value, prop_schema, &format!("{path}.{name}"))?;
            }
        }
    }
    Ok(())
}

fn validate_array(
    value: &Value,
    schema: &Map<String, Value>,
    path: &str,
) -> Result<(), String> {
    let arr = value
        .as_array()
        .ok_or_else(|| format!("{path}: expected array"))?;

    let items = schema
        .get("items")
        .ok_or_else(|| format!("{path}: array schema without items"))?;
    // Tuple validation (items as a list of schemas) is forbidden: providers
    // handle it inconsistently. Heterogeneous arrays must use anyOf.
    if items.is_array() {
        return Err(format!(
            "{path}: tuple-style items schemas are not supported; use a single items schema with anyOf"
        ));
    }

    if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
        if (arr.len() as u64) < min {
            return Err(format!("{path}: fewer than {min} items"));
        }
    }
    if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
        if (arr.len() as u64) > max {
            return Err(format!("{path}: more than {max} items"));
        }
    }

    for (i, item) in arr.iter().enumerate() {
        validate_at(item, items, &format!("{path}[{i}]"))?;
    }
    Ok(())
}
