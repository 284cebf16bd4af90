//! Kubernetes object shapes.
//!
//! Secrets have a fixed schema and deserialize into [`Secret`]. Custom
//! resources are kept as an untyped JSON tree in [`DynamicObject`] and read
//! through [`Field`], which keeps "absent" apart from "present but the wrong
//! type".

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExporterError;

/// Result of looking up a field in an untyped tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field<T> {
    Present(T),
    Absent,
    WrongType { expected: &'static str },
}

impl<T> Field<T> {
    pub fn present(self) -> Option<T> {
        match self {
            Field::Present(value) => Some(value),
            _ => None,
        }
    }

    /// Turns anything but `Present` into a decode error naming `path`.
    pub fn require(self, path: &str) -> Result<T, ExporterError> {
        match self {
            Field::Present(value) => Ok(value),
            Field::Absent => Err(ExporterError::Decode {
                reason: format!("field {} is missing", path),
            }),
            Field::WrongType { expected } => Err(ExporterError::Decode {
                reason: format!("field {} is not a {}", path, expected),
            }),
        }
    }
}

/// Follows `path` through nested objects. A `null` leaf is returned as present.
pub fn nested<'a>(tree: &'a Value, path: &[&str]) -> Field<&'a Value> {
    let mut current = tree;
    for segment in path {
        match current {
            Value::Object(map) => match map.get(*segment) {
                Some(value) => current = value,
                None => return Field::Absent,
            },
            Value::Null => return Field::Absent,
            _ => return Field::WrongType { expected: "object" },
        }
    }
    Field::Present(current)
}

/// Like [`nested`], for string leaves. `null` counts as absent.
pub fn nested_str<'a>(tree: &'a Value, path: &[&str]) -> Field<&'a str> {
    match nested(tree, path) {
        Field::Present(Value::String(s)) => Field::Present(s.as_str()),
        Field::Present(Value::Null) | Field::Absent => Field::Absent,
        Field::Present(_) => Field::WrongType { expected: "string" },
        Field::WrongType { expected } => Field::WrongType { expected },
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A core/v1 Secret. `data` values are base64 as served by the API.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Secret {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, rename = "type")]
    pub secret_type: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Secret {
    /// Decoded bytes of `key`, `None` when the key is absent.
    pub fn data_bytes(&self, key: &str) -> Option<Result<Vec<u8>, ExporterError>> {
        self.data.get(key).map(|encoded| {
            STANDARD
                .decode(encoded)
                .map_err(|e| ExporterError::Decode {
                    reason: format!("data key {} is not base64: {}", key, e),
                })
        })
    }

    pub fn annotation(&self, name: &str) -> Option<&str> {
        self.metadata.annotations.get(name).map(String::as_str)
    }
}

/// A resource of any kind, kept as its JSON tree.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct DynamicObject {
    tree: Value,
}

impl DynamicObject {
    pub fn new(tree: Value) -> Self {
        DynamicObject { tree }
    }

    pub fn name(&self) -> &str {
        self.field_str(&["metadata", "name"]).present().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.field_str(&["metadata", "namespace"])
            .present()
            .unwrap_or_default()
    }

    pub fn field_str(&self, path: &[&str]) -> Field<&str> {
        nested_str(&self.tree, path)
    }
}

/// The envelope of a list call.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}
