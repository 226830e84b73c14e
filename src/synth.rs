//! Example request payloads synthesized from a schema.
//!
//! A declared `example` always wins. Otherwise leaves get fixed placeholder
//! values: strings `"example"` (or the first enum member), numbers `1`,
//! booleans `true`; arrays hold one synthesized element.

use crate::openapi::{Operation, Schema};
use serde_json::{json, Map, Value};

const MAX_DEPTH: usize = 32;

/// JSON body for the operation's `application/json` request, if it declares one.
pub fn example_body(op: &Operation) -> Option<Value> {
    let schema = op.request_body_schema()?;
    if let Some(example) = op.request_body_example() {
        return Some(example.clone());
    }
    Some(example_value(schema))
}

/// Serialized form of [`example_body`].
pub fn example_body_bytes(op: &Operation) -> Option<Vec<u8>> {
    example_body(op).and_then(|v| serde_json::to_vec(&v).ok())
}

pub fn example_value(schema: &Schema) -> Value {
    synthesize(schema, 0)
}

fn synthesize(schema: &Schema, depth: usize) -> Value {
    if let Some(example) = &schema.example {
        return example.clone();
    }
    if depth >= MAX_DEPTH {
        return json!("example");
    }
    match schema.type_name() {
        "string" => schema
            .enum_values
            .first()
            .cloned()
            .unwrap_or_else(|| json!("example")),
        "number" | "integer" => json!(1),
        "boolean" => json!(true),
        "array" => {
            let elem = schema
                .items
                .as_deref()
                .map(|items| synthesize(items, depth + 1))
                .unwrap_or_else(|| json!("item"));
            Value::Array(vec![elem])
        }
        "object" => {
            let map: Map<String, Value> = schema
                .properties
                .iter()
                .map(|(name, prop)| (name.clone(), synthesize(prop, depth + 1)))
                .collect();
            Value::Object(map)
        }
        _ => json!("example"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openapi::{MediaType, RequestBody};

    fn object(props: &[(&str, Schema)]) -> Schema {
        let mut s = Schema::of_type("object");
        for (name, prop) in props {
            s.properties.insert(name.to_string(), prop.clone());
        }
        s
    }

    #[test]
    fn leaves_and_containers() {
        let mut status = Schema::of_type("string");
        status.enum_values = vec![json!("active"), json!("closed")];
        let mut tags = Schema::of_type("array");
        tags.items = Some(Box::new(Schema::of_type("integer")));
        let schema = object(&[
            ("name", Schema::of_type("string")),
            ("age", Schema::of_type("integer")),
            ("vip", Schema::of_type("boolean")),
            ("status", status),
            ("tags", tags),
            ("any", Schema::default()),
        ]);
        assert_eq!(
            example_value(&schema),
            json!({
                "name": "example",
                "age": 1,
                "vip": true,
                "status": "active",
                "tags": [1],
                "any": "example"
            })
        );
    }

    #[test]
    fn array_without_items() {
        assert_eq!(example_value(&Schema::of_type("array")), json!(["item"]));
    }

    #[test]
    fn example_wins() {
        let mut s = Schema::of_type("string");
        s.example = Some(json!("bob"));
        assert_eq!(example_value(&object(&[("n", s)])), json!({"n": "bob"}));
    }

    #[test]
    fn body_prefers_media_example() {
        let mut op = Operation::default();
        assert!(example_body(&op).is_none());

        let mut body = RequestBody::default();
        body.content.insert(
            "application/json".into(),
            MediaType {
                schema: Some(object(&[("id", Schema::of_type("integer"))])),
                example: None,
            },
        );
        op.request_body = Some(body);
        assert_eq!(example_body(&op), Some(json!({"id": 1})));

        if let Some(b) = op.request_body.as_mut() {
            if let Some(m) = b.content.get_mut("application/json") {
                m.example = Some(json!({"id": 42}));
            }
        }
        assert_eq!(example_body_bytes(&op).unwrap(), br#"{"id":42}"#.to_vec());
    }
}
