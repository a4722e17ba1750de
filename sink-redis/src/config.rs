//! Configuration module for Redis Sink Connector
//!
//! This module handles all configuration aspects including:
//! - Sink properties (the option map handed over at provisioning time)
//! - Validation and defaults for key mode, data type and expiration
//! - Redis connection settings (address, credentials, database index)
//! - Connector file loading with environment variable overrides

use crate::error::{ConnectorError, ConnectorResult, StoreError};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::env;
use std::fs;
use std::time::Duration;
use url::Url;

/// How keys are derived from a record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// Whole record stored under one key (default)
    #[default]
    Single,
    /// Every field stored under its own key
    Multiple,
}

/// Redis data structure written to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Plain string values via SET / DEL (default)
    #[default]
    String,
    /// Lists via LPUSH / LPOP
    List,
}

/// Validated, immutable sink configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RedisSinkConfig {
    /// Redis address in host:port form (a redis:// URL is accepted too)
    pub addr: String,

    /// Optional username for ACL authentication
    pub username: Option<String>,

    /// Optional password
    pub password: Option<String>,

    /// Database index, 0-15
    pub db: u8,

    /// Single or multiple key mode
    pub key_type: KeyType,

    /// Static key used in single mode when no key field is set
    pub key: String,

    /// Record field whose value becomes the key in single mode
    pub field: Option<String>,

    /// String or list
    pub data_type: DataType,

    /// TTL applied to SET; `None` means the key never expires
    pub expiration: Option<Duration>,

    /// Record field carrying the row kind
    pub rowkind_field: Option<String>,

    /// Template reshaping each record before it is written
    pub data_template: Option<String>,

    /// Subset of fields to keep
    pub fields: Vec<String>,

    /// Field whose value replaces the record
    pub data_field: Option<String>,
}

/// Raw option map as handed over by the stream engine
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProperties {
    #[serde(default)]
    addr: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default, deserialize_with = "deserialize_db")]
    db: i64,
    #[serde(default)]
    field: String,
    #[serde(default)]
    key: String,
    #[serde(default = "default_key_type")]
    key_type: String,
    #[serde(default = "default_data_type")]
    data_type: String,
    #[serde(default)]
    expiration: Option<Value>,
    #[serde(default)]
    rowkind_field: String,
    #[serde(default)]
    data_template: String,
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default)]
    data_field: String,
}

// Default value functions
fn default_addr() -> String {
    "localhost:6379".to_string()
}

fn default_key_type() -> String {
    "single".to_string()
}

fn default_data_type() -> String {
    "string".to_string()
}

fn default_connector_name() -> String {
    "redis-sink".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn deserialize_db<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| de::Error::custom(format!("db must be an integer, got {}", n))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("db must be an integer, got '{}'", s))),
        Value::Null => Ok(0),
        other => Err(de::Error::custom(format!(
            "db must be an integer, got {}",
            other
        ))),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

impl RedisSinkConfig {
    /// Build a validated configuration from the raw sink properties
    ///
    /// Defaults: `keyType = single`, `dataType = string`, `expiration = -1`
    /// (no expiration), `addr = localhost:6379`. Nothing is returned unless
    /// every check passes.
    pub fn from_properties(props: &Map<String, Value>) -> ConnectorResult<Self> {
        let raw: RawProperties = serde_json::from_value(Value::Object(props.clone()))
            .map_err(|e| ConnectorError::validation(format!("invalid redis sink properties: {}", e)))?;

        if !(0..=15).contains(&raw.db) {
            return Err(ConnectorError::validation(
                "redis sink db should be in range 0-15",
            ));
        }

        if raw.key_type == "single" && raw.key.is_empty() && raw.field.is_empty() {
            return Err(ConnectorError::validation(
                "redis sink must have key or field when keyType is single",
            ));
        }

        let key_type = match raw.key_type.as_str() {
            "single" => KeyType::Single,
            "multiple" => KeyType::Multiple,
            _ => {
                return Err(ConnectorError::validation(
                    "keyType only supports single or multiple",
                ))
            }
        };

        let data_type = match raw.data_type.as_str() {
            "string" => DataType::String,
            "list" => DataType::List,
            _ => {
                return Err(ConnectorError::validation(
                    "redis sink only supports string or list data type",
                ))
            }
        };

        let expiration = parse_expiration(raw.expiration.as_ref())?;

        let addr = if raw.addr.is_empty() {
            default_addr()
        } else {
            raw.addr
        };

        Ok(Self {
            addr,
            username: non_empty(raw.username),
            password: non_empty(raw.password),
            db: raw.db as u8,
            key_type,
            key: raw.key,
            field: non_empty(raw.field),
            data_type,
            expiration,
            rowkind_field: non_empty(raw.rowkind_field),
            data_template: non_empty(raw.data_template),
            fields: raw.fields,
            data_field: non_empty(raw.data_field),
        })
    }

    /// Connection parameters for the store client
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            addr: self.addr.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            db: self.db,
        }
    }
}

/// Store connection parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub addr: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: u8,
}

impl ConnectionOptions {
    /// Render the options as a `redis://` URL
    ///
    /// Credentials are percent-encoded; the database index becomes the path.
    pub fn url(&self) -> Result<Url, StoreError> {
        let invalid = |reason: String| StoreError::InvalidAddress {
            addr: self.addr.clone(),
            reason,
        };

        let raw = if self.addr.contains("://") {
            self.addr.clone()
        } else {
            format!("redis://{}", self.addr)
        };

        let mut url = Url::parse(&raw).map_err(|e| invalid(e.to_string()))?;

        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host".to_string()));
        }

        if let Some(username) = &self.username {
            url.set_username(username)
                .map_err(|_| invalid("address cannot carry a username".to_string()))?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|_| invalid("address cannot carry a password".to_string()))?;
        }

        url.set_path(&format!("/{}", self.db));
        Ok(url)
    }
}

/// Parse the `expiration` property
///
/// Integers are milliseconds; strings use the `1h30m` / `500ms` notation or
/// a bare integer of milliseconds. Zero or negative disables expiration.
fn parse_expiration(value: Option<&Value>) -> ConnectorResult<Option<Duration>> {
    let nanos: f64 = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => {
            let millis = n.as_f64().ok_or_else(|| {
                ConnectorError::validation(format!("invalid expiration {}", n))
            })?;
            millis * 1e6
        }
        Some(Value::String(s)) => match s.trim().parse::<i64>() {
            Ok(millis) => millis as f64 * 1e6,
            Err(_) => parse_duration_nanos(s).map_err(ConnectorError::validation)?,
        },
        Some(other) => {
            return Err(ConnectorError::validation(format!(
                "invalid expiration {}",
                other
            )))
        }
    };

    if nanos <= 0.0 {
        return Ok(None);
    }
    Ok(Some(Duration::from_nanos(nanos as u64)))
}

/// Parse a duration such as `1h30m`, `1.5s` or `-1s` into nanoseconds
fn parse_duration_nanos(input: &str) -> Result<f64, String> {
    let s = input.trim();
    let (negative, mut rest) = match s.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    if rest == "0" {
        return Ok(0.0);
    }
    if rest.is_empty() {
        return Err(format!("invalid duration '{}'", input));
    }

    let mut total = 0.0;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_end == 0 {
            return Err(format!("invalid duration '{}'", input));
        }
        let number: f64 = rest[..number_end]
            .parse()
            .map_err(|_| format!("invalid duration '{}'", input))?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(format!("missing unit in duration '{}'", input)),
            unit => {
                return Err(format!(
                    "unknown unit '{}' in duration '{}'",
                    unit, input
                ))
            }
        };
        total += number * scale;
        rest = &rest[unit_end..];
    }

    Ok(if negative { -total } else { total })
}

/// Connector file: runtime settings plus the raw `[redis]` sink properties
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorSettings {
    /// Name used in logs
    #[serde(default = "default_connector_name")]
    pub connector_name: String,

    /// Number of stdin records collected per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Sink properties, keyed exactly like the stream engine's option map
    #[serde(default)]
    pub redis: Map<String, Value>,
}

impl ConnectorSettings {
    /// Load configuration from TOML file
    ///
    /// The config file path must be specified via CONNECTOR_CONFIG_PATH environment variable.
    /// Environment variables can override the address and credentials.
    pub fn load() -> ConnectorResult<Self> {
        let config_path = env::var("CONNECTOR_CONFIG_PATH").map_err(|_| {
            ConnectorError::config(
                "CONNECTOR_CONFIG_PATH environment variable must be set to the path of the TOML configuration file",
            )
        })?;

        let mut settings = Self::from_file(&config_path)?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> ConnectorResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            ConnectorError::config(format!("Failed to read config file '{}': {}", path, e))
        })?;

        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> ConnectorResult<Self> {
        toml::from_str(contents)
            .map_err(|e| ConnectorError::config(format!("Failed to parse TOML config: {}", e)))
    }

    /// Apply environment variable overrides for secrets and connection details
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| env::var(name).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup("CONNECTOR_NAME") {
            self.connector_name = name;
        }

        let overrides = [
            ("REDIS_ADDR", "addr"),
            ("REDIS_USERNAME", "username"),
            ("REDIS_PASSWORD", "password"),
            ("REDIS_DB", "db"),
        ];
        for (var, property) in overrides {
            if let Some(value) = lookup(var) {
                tracing::info!("Overriding redis {} from environment", property);
                self.redis.insert(property.to_string(), Value::String(value));
            }
        }
    }

    /// Validate runtime settings and the sink properties
    pub fn validate(&self) -> ConnectorResult<RedisSinkConfig> {
        if self.connector_name.is_empty() {
            return Err(ConnectorError::config("connector_name cannot be empty"));
        }
        if self.batch_size == 0 {
            return Err(ConnectorError::config("batch_size must be greater than 0"));
        }

        RedisSinkConfig::from_properties(&self.redis)
    }
}
