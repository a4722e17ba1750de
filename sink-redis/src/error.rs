//! Error types for the Redis Sink Connector
//!
//! `ConnectorError` covers the whole lifecycle: configuration, connection,
//! per-record resolution and store writes. `StoreError` is what the
//! key-value store seam reports; the connector wraps it with the command and
//! key that failed.

use thiserror::Error;

/// Result alias used across the connector
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Errors raised by the key-value store layer
#[derive(Debug, Error)]
pub enum StoreError {
    /// Error returned by the Redis client
    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    /// The configured address could not be turned into a connection URL
    #[error("invalid redis address '{addr}': {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// A list command hit a string key or the other way around
    #[error("WRONGTYPE operation against key '{0}' holding the wrong kind of value")]
    WrongType(String),
}

/// Connector error taxonomy
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Configuration file could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sink properties violate an invariant
    #[error("Validation error: {0}")]
    Validation(String),

    /// Store is unreachable or did not answer the ping
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<StoreError>,
    },

    /// Key field configured but absent from the record
    #[error("field {field} does not exist in data {data}")]
    MissingField { field: String, data: String },

    /// Key field present but its value has no string form
    #[error("key must be string or convertible to string, but got {value}")]
    KeyConversion { value: String },

    /// Row kind field holds a non-string or a name outside insert/update/upsert/delete
    #[error("invalid rowkind {value} in field {field}")]
    InvalidRowKind { field: String, value: String },

    /// Output shaping (dataField, fields, dataTemplate) failed for a record
    #[error("Transform error: {0}")]
    Transform(String),

    /// Record could not be encoded as JSON
    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A single store command failed
    #[error("{command} {key} error, {source}")]
    Store {
        command: &'static str,
        key: String,
        #[source]
        source: StoreError,
    },

    /// Some of the keys derived from one record could not be written
    #[error("{} of {attempted} writes failed: {}", failures.len(), join_errors(failures))]
    PartialWrite {
        attempted: usize,
        failures: Vec<ConnectorError>,
    },

    /// Caller cancelled or the deadline elapsed while a store call was in flight
    #[error("operation cancelled")]
    Cancelled,

    /// Collect or close called without an open connection
    #[error("redis sink is not connected")]
    NotConnected,
}

impl ConnectorError {
    /// Configuration loading error
    pub fn config(msg: impl Into<String>) -> Self {
        ConnectorError::Config(msg.into())
    }

    /// Property validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        ConnectorError::Validation(msg.into())
    }

    /// Connection error wrapping the store error that caused it
    pub fn connection_with_source(msg: impl Into<String>, source: StoreError) -> Self {
        ConnectorError::Connection {
            message: msg.into(),
            source: Some(source),
        }
    }

    /// Whether the error only affects the record being processed
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            ConnectorError::MissingField { .. }
                | ConnectorError::KeyConversion { .. }
                | ConnectorError::InvalidRowKind { .. }
                | ConnectorError::Transform(_)
                | ConnectorError::Serialization(_)
        )
    }
}

fn join_errors(errors: &[ConnectorError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
