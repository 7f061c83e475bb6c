//! Configuration document and flag definitions
//!
//! The sync core keeps flag definitions opaque. It only checks that the response
//! carries a flags collection and that each entry in it is an object.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::{Result, SyncError};

/// Default name of the top-level flags collection in a config response
pub const DEFAULT_FLAGS_KEY: &str = "flags";

/// A flag value as seen by the evaluation layer
#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    Bool(bool),
    Str(String),
    Num(f64),
    /// Objects and arrays
    Json(Value),
    Null,
}

impl From<&Value> for FlagValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Bool(b) => FlagValue::Bool(*b),
            Value::String(s) => FlagValue::Str(s.clone()),
            Value::Number(n) => n.as_f64().map(FlagValue::Num).unwrap_or(FlagValue::Null),
            Value::Null => FlagValue::Null,
            other => FlagValue::Json(other.clone()),
        }
    }
}

impl FlagValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FlagValue::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FlagValue::Null)
    }
}

/// Opaque definition blob of a single flag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagDefinition(Map<String, Value>);

impl FlagDefinition {
    /// Wrap a raw JSON object
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Raw field lookup
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// The `value` field as a tagged value, `Null` when absent
    pub fn value(&self) -> FlagValue {
        self.0.get("value").map(FlagValue::from).unwrap_or(FlagValue::Null)
    }

    /// Borrow the underlying object
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Convert back into a JSON value
    pub fn into_json(self) -> Value {
        Value::Object(self.0)
    }
}

/// Map of flag name to definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub flags: BTreeMap<String, FlagDefinition>,
}

/// A parsed config response together with the entries that had to be dropped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    pub document: ConfigDocument,
    /// Names of malformed flag entries that were skipped
    pub dropped: Vec<String>,
}

impl ConfigDocument {
    /// Empty document ("no flags known")
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn flag(&self, name: &str) -> Option<&FlagDefinition> {
        self.flags.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.flags.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Parse a config response body.
    ///
    /// - An empty body, a non-object body, or an object without an object-valued
    ///   `flags_key` collection yields zero flags.
    /// - Entries whose definition is not an object, or whose name is empty, are
    ///   dropped and reported in [`ParsedDocument::dropped`].
    /// - A body that is not JSON at all is a [`SyncError::SerializationError`].
    pub fn parse(body: &[u8], flags_key: &str) -> Result<ParsedDocument> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(ParsedDocument::default());
        }

        let root: Value = serde_json::from_slice(body)
            .map_err(|e| SyncError::SerializationError(e.to_string()))?;

        let collection = match root {
            Value::Object(mut root) => match root.remove(flags_key) {
                Some(Value::Object(collection)) => collection,
                _ => return Ok(ParsedDocument::default()),
            },
            _ => return Ok(ParsedDocument::default()),
        };

        let mut parsed = ParsedDocument::default();
        for (name, definition) in collection {
            match definition {
                Value::Object(fields) if !name.is_empty() => {
                    parsed
                        .document
                        .flags
                        .insert(name, FlagDefinition::new(fields));
                }
                _ => parsed.dropped.push(name),
            }
        }

        Ok(parsed)
    }
}
