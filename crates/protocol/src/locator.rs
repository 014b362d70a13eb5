use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Row payload of unknown shape. Passed through to the display untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct OpaqueDocument(Value);

impl OpaqueDocument {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Top-level fields rendered as `(key, value)` text pairs for a generic
    /// key/value listing. Non-object documents yield a single `value` entry.
    pub fn display_fields(&self) -> Vec<(String, String)> {
        match &self.0 {
            Value::Object(map) => map
                .iter()
                .map(|(key, value)| (key.clone(), display_value(value)))
                .collect(),
            other => vec![("value".to_string(), display_value(other))],
        }
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| self.0.to_string())
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocatorResult {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<OpaqueDocument>,
}

impl LocatorResult {
    pub fn not_found() -> Self {
        Self {
            found: false,
            table_name: None,
            data: None,
        }
    }

    pub fn found(table_name: impl Into<String>, data: Value) -> Self {
        Self {
            found: true,
            table_name: Some(table_name.into()),
            data: Some(OpaqueDocument::new(data)),
        }
    }
}
