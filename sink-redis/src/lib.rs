//! Redis Sink Connector
//!
//! This connector writes stream records into Redis, either as one JSON
//! document per record or as one key per record field.
//!
//! # Features
//!
//! - **Key modes**: a static key, a key taken from a record field, or one key per field
//! - **Data types**: Redis strings (SET / DEL) or lists (LPUSH / LPOP)
//! - **Row kinds**: `insert`, `update`, `upsert` and `delete` read from a record field
//! - **Expiration**: optional TTL on string writes
//! - **Output shaping**: `dataField`, `fields` and `dataTemplate` applied before writing
//! - **Best-effort batches**: failed records are logged and reported, never abort the batch
//!
//! # Example Configuration
//!
//! ```toml
//! connector_name = "redis-sink"
//! batch_size = 100
//!
//! [redis]
//! addr = "localhost:6379"
//! db = 0
//! keyType = "single"
//! field = "id"
//! dataType = "string"
//! expiration = "10m"
//! rowkindField = "op"
//! ```

pub mod config;
pub mod connector;
pub mod error;
pub mod record;
pub mod resolver;
pub mod sink;
pub mod store;
pub mod transform;

pub use config::{ConnectorSettings, DataType, KeyType, RedisSinkConfig};
pub use connector::{RedisSinkConnector, SinkStats};
pub use error::{ConnectorError, ConnectorResult, StoreError};
pub use record::{Record, RowKind};
pub use sink::{BatchReport, ConnectionStatus, SinkConnector, StreamContext};
pub use store::{KeyValueStore, MemoryStore, RedisStore, StoreFactory};
