//! JSON Schema adjustments applied to tool input schemas at encode time.

use serde_json::{Map, Value};

/// Keywords holding a map of named subschemas.
const SCHEMA_MAPS: &[&str] = &["properties", "$defs", "definitions"];

/// Keywords holding a list of subschemas.
const SCHEMA_LISTS: &[&str] = &["anyOf", "oneOf", "allOf"];

/// Gemini only accepts these string formats.
const GOOGLE_STRING_FORMATS: &[&str] = &["enum", "date-time"];

/// Removes `$schema` from the schema and every nested subschema.
///
/// OpenAI and Anthropic accept draft 7 otherwise unchanged.
pub(crate) fn strip_schema_keyword(schema: &Value) -> Value {
    let mut schema = schema.clone();
    visit(&mut schema, &mut |object| {
        object.remove("$schema");
    });

    schema
}

/// Converts a draft 7 schema into the OpenAPI 3.0 flavor Gemini expects.
///
/// `$schema`, `additionalProperties`, `default` and unsupported string formats are
/// removed. A union type such as `["string", "null"]` becomes `type: "string"` plus
/// `nullable: true`.
pub(crate) fn to_google_schema(schema: &Value) -> Value {
    let mut schema = schema.clone();
    visit(&mut schema, &mut google_object);

    schema
}

fn google_object(object: &mut Map<String, Value>) {
    object.remove("$schema");
    object.remove("additionalProperties");
    object.remove("default");

    if let Some(Value::Array(types)) = object.get("type") {
        let nullable = types.iter().any(|ty| ty.as_str() == Some("null"));
        let base = types.iter().find(|ty| ty.as_str().is_some_and(|ty| ty != "null")).cloned();

        match base {
            Some(base) => {
                object.insert("type".to_string(), base);
            }
            None => {
                object.remove("type");
            }
        }

        if nullable {
            object.insert("nullable".to_string(), Value::Bool(true));
        }
    }

    let is_string = object.get("type").and_then(Value::as_str) == Some("string");
    let unsupported_format = object
        .get("format")
        .and_then(Value::as_str)
        .is_some_and(|format| !GOOGLE_STRING_FORMATS.contains(&format));

    if is_string && unsupported_format {
        object.remove("format");
    }
}

/// Applies `f` to the schema object and then to every subschema below it.
fn visit(schema: &mut Value, f: &mut impl FnMut(&mut Map<String, Value>)) {
    let Value::Object(object) = schema else {
        return;
    };

    f(object);

    for key in SCHEMA_MAPS {
        if let Some(Value::Object(children)) = object.get_mut(*key) {
            for child in children.values_mut() {
                visit(child, f);
            }
        }
    }

    for key in SCHEMA_LISTS {
        if let Some(Value::Array(children)) = object.get_mut(*key) {
            for child in children {
                visit(child, f);
            }
        }
    }

    match object.get_mut("items") {
        Some(Value::Array(items)) => {
            for item in items {
                visit(item, f);
            }
        }
        Some(items) => visit(items, f),
        None => (),
    }

    if let Some(additional) = object.get_mut("additionalProperties")
        && additional.is_object()
    {
        visit(additional, f);
    }
}
