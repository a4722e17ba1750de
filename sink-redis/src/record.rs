//! Record model for the Redis Sink Connector
//!
//! A record is one row emitted by the stream engine: a mapping from field name
//! to JSON value. This module holds the value-to-string conversion used for
//! keys and multi-key values, the row kind carried by a record, and the
//! resolved mutation handed to the store.

use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// One row to persist
pub type Record = Map<String, Value>;

/// Best-effort string form of a value
///
/// Strings are returned as-is, booleans and numbers in their plain textual
/// form and null as an empty string. Arrays and objects have no string form.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(|f| f.to_string())
            }
        }
        Value::Null => Some(String::new()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Intended mutation semantics of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RowKind {
    Insert,
    Update,
    #[default]
    Upsert,
    Delete,
}

impl RowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowKind::Insert => "insert",
            RowKind::Update => "update",
            RowKind::Upsert => "upsert",
            RowKind::Delete => "delete",
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, RowKind::Delete)
    }
}

impl FromStr for RowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(RowKind::Insert),
            "update" => Ok(RowKind::Update),
            "upsert" => Ok(RowKind::Upsert),
            "delete" => Ok(RowKind::Delete),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved write: which key, what value, and with which semantics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub key: String,
    pub value: String,
    pub row_kind: RowKind,
}
