//! Mutation resolution
//!
//! Turns one record into the set of keys to write, the value for each key,
//! and the row kind, then maps every mutation onto a Redis command. Nothing
//! here touches the store, so resolution is safe to run concurrently for
//! distinct records.

use crate::config::{DataType, KeyType, RedisSinkConfig};
use crate::error::{ConnectorError, ConnectorResult};
use crate::record::{value_to_string, Mutation, Record, RowKind};
use serde_json::Value;
use std::time::Duration;

/// Resolve a record into the mutations it implies
///
/// Multiple-key mode yields one mutation per field, with unconvertible values
/// written as an empty string. Single-key mode yields exactly one mutation
/// whose value is the JSON encoding of the whole record.
pub fn resolve(config: &RedisSinkConfig, record: &Record) -> ConnectorResult<Vec<Mutation>> {
    let values = match config.key_type {
        KeyType::Multiple => record
            .iter()
            .map(|(key, val)| (key.clone(), value_to_string(val).unwrap_or_default()))
            .collect::<Vec<_>>(),
        KeyType::Single => {
            let value = serde_json::to_string(record)?;
            vec![(single_key(config, record)?, value)]
        }
    };

    let row_kind = row_kind(config, record)?;

    Ok(values
        .into_iter()
        .map(|(key, value)| Mutation {
            key,
            value,
            row_kind,
        })
        .collect())
}

/// Key for single-key mode: the key field's value if configured, the static key otherwise
fn single_key(config: &RedisSinkConfig, record: &Record) -> ConnectorResult<String> {
    let Some(field) = &config.field else {
        return Ok(config.key.clone());
    };

    let value = record.get(field).ok_or_else(|| ConnectorError::MissingField {
        field: field.clone(),
        data: Value::Object(record.clone()).to_string(),
    })?;

    value_to_string(value).ok_or_else(|| ConnectorError::KeyConversion {
        value: value.to_string(),
    })
}

/// Row kind of a record
///
/// Upsert unless a row kind field is configured and present, in which case
/// it must be a string holding one of the recognized names.
pub fn row_kind(config: &RedisSinkConfig, record: &Record) -> ConnectorResult<RowKind> {
    let Some(field) = &config.rowkind_field else {
        return Ok(RowKind::Upsert);
    };

    match record.get(field) {
        None => Ok(RowKind::Upsert),
        Some(Value::String(kind)) => {
            kind.parse().map_err(|value| ConnectorError::InvalidRowKind {
                field: field.clone(),
                value,
            })
        }
        Some(other) => Err(ConnectorError::InvalidRowKind {
            field: field.clone(),
            value: other.to_string(),
        }),
    }
}

/// Store command a mutation dispatches to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set {
        key: String,
        value: String,
        expiration: Option<Duration>,
    },
    ListPushFront {
        key: String,
        value: String,
    },
    ListPopFront {
        key: String,
    },
    Delete {
        key: String,
    },
}

impl Command {
    /// Pick the command for a mutation
    ///
    /// | row kind                | string | list  |
    /// |-------------------------|--------|-------|
    /// | insert / update / upsert| SET    | LPUSH |
    /// | delete                  | DEL    | LPOP  |
    pub fn dispatch(
        mutation: &Mutation,
        data_type: DataType,
        expiration: Option<Duration>,
    ) -> Self {
        let key = mutation.key.clone();
        match (mutation.row_kind.is_delete(), data_type) {
            (false, DataType::String) => Command::Set {
                key,
                value: mutation.value.clone(),
                expiration,
            },
            (false, DataType::List) => Command::ListPushFront {
                key,
                value: mutation.value.clone(),
            },
            (true, DataType::String) => Command::Delete { key },
            (true, DataType::List) => Command::ListPopFront { key },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Set { .. } => "set",
            Command::ListPushFront { .. } => "lpush",
            Command::ListPopFront { .. } => "lpop",
            Command::Delete { .. } => "del",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Command::Set { key, .. }
            | Command::ListPushFront { key, .. }
            | Command::ListPopFront { key }
            | Command::Delete { key } => key,
        }
    }
}
