use crate::enums::JsonType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A recursive response-body schema.
///
/// Serialized with an internal `type` tag, e.g.
/// `{"type": "object", "required": ["data"], "properties": {"data": {"type": "array", "items": {"type": "number"}}}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeepSchema {
    Object {
        #[serde(default)]
        required: Vec<String>,
        #[serde(default)]
        properties: BTreeMap<String, DeepSchema>,
    },
    Array {
        #[serde(default)]
        items: Option<Box<DeepSchema>>,
    },
    String,
    Number,
    Boolean,
    Null,
    Any,
}

impl DeepSchema {
    /// The primitive type for leaf schemas; `None` for objects and arrays.
    pub fn leaf_type(&self) -> Option<JsonType> {
        match self {
            DeepSchema::String => Some(JsonType::String),
            DeepSchema::Number => Some(JsonType::Number),
            DeepSchema::Boolean => Some(JsonType::Boolean),
            DeepSchema::Null => Some(JsonType::Null),
            DeepSchema::Any => Some(JsonType::Any),
            DeepSchema::Object { .. } | DeepSchema::Array { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_nested_schema() {
        let schema: DeepSchema = serde_json::from_value(json!({
            "type": "object",
            "required": ["data"],
            "properties": {
                "data": { "type": "array", "items": { "type": "number" } }
            }
        }))
        .unwrap();

        let DeepSchema::Object { required, properties } = schema else {
            panic!("expected object schema");
        };
        assert_eq!(required, vec!["data".to_string()]);
        assert_eq!(
            properties.get("data"),
            Some(&DeepSchema::Array {
                items: Some(Box::new(DeepSchema::Number))
            })
        );
    }

    #[test]
    fn leaf_types() {
        assert_eq!(DeepSchema::Boolean.leaf_type(), Some(JsonType::Boolean));
        assert_eq!(DeepSchema::Array { items: None }.leaf_type(), None);
    }
}
