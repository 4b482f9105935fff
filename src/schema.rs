// Argument validation against a tool's declared input schema.
//
// Checks run in a fixed order so the reported violation is deterministic:
// required properties (declared order), then declared property types
// (declared order), then undeclared properties when the schema is closed.

use serde_json::{Map, Value};

use crate::error::DispatchError;
use crate::registry::InputSchema;

/// Validate `args` and return the normalized argument object with declared
/// defaults filled in. Undeclared properties pass through unless the schema
/// sets `additionalProperties: false`.
pub fn validate(schema: &InputSchema, args: Value) -> Result<Value, DispatchError> {
    let mut object = match args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(invalid(
                "arguments",
                format!("must be an object, got {}", type_name(&other)),
            ));
        }
    };

    for name in &schema.required {
        match object.get(name) {
            None | Some(Value::Null) => return Err(invalid(name, "is required")),
            Some(_) => {}
        }
    }

    for (name, prop) in &schema.properties {
        let value = match object.get(name) {
            Some(Value::Null) | None => {
                if let Some(default) = &prop.default {
                    object.insert(name.clone(), default.clone());
                }
                continue;
            }
            Some(value) => value,
        };
        if !prop.kind.matches(value) {
            return Err(invalid(
                name,
                format!("must be of type {}, got {}", prop.kind.as_str(), type_name(value)),
            ));
        }
    }

    if !schema.additional_properties {
        if let Some(unknown) = object.keys().find(|k| schema.get(k).is_none()) {
            return Err(invalid(unknown, "is not an allowed property"));
        }
    }

    Ok(Value::Object(object))
}

fn invalid(field: &str, reason: impl Into<String>) -> DispatchError {
    DispatchError::InvalidArguments {
        field: field.to_string(),
        reason: reason.into(),
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
