//! Structural argument checks against a tool's advertised `inputSchema`.
//!
//! This covers the top level only: object shape, `required` members,
//! `additionalProperties: false`, and the primitive `type` / `enum` of each
//! supplied property. Anything deeper is left to the server.

use serde_json::{Map, Value};

/// Check `arguments` against `schema`. Returns a human-readable reason on
/// mismatch.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    let expects_object = match schema.get("type") {
        Some(ty) => type_names(ty).any(|t| t == "object"),
        None => schema.contains_key("properties") || schema.contains_key("required"),
    };
    if !expects_object {
        return Ok(());
    }

    let Some(args) = arguments.as_object() else {
        return Err(format!(
            "expected an object, got {}",
            json_type_name(arguments)
        ));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(field) {
                return Err(format!("missing required field '{field}'"));
            }
        }
    }

    let empty = Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (key, value) in args {
        let Some(prop) = properties.get(key) else {
            if closed {
                return Err(format!("unexpected field '{key}'"));
            }
            continue;
        };
        check_property(key, prop, value)?;
    }

    Ok(())
}

fn check_property(key: &str, prop: &Value, value: &Value) -> Result<(), String> {
    if let Some(ty) = prop.get("type") {
        let mut names = type_names(ty).peekable();
        if names.peek().is_some() && !names.any(|t| matches_type(t, value)) {
            return Err(format!(
                "field '{key}' should be {}, got {}",
                describe_type(ty),
                json_type_name(value)
            ));
        }
    }

    if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("field '{key}' must be one of {}", Value::Array(allowed.clone())));
        }
    }

    Ok(())
}

/// `"type"` may be a single name or a list of names.
fn type_names(ty: &Value) -> impl Iterator<Item = &str> {
    let list: Vec<&str> = match ty {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    list.into_iter()
}

fn describe_type(ty: &Value) -> String {
    type_names(ty).collect::<Vec<_>>().join(" or ")
}

fn matches_type(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        // Unknown type keywords are not ours to judge.
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
