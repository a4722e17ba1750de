//! Key-value store access
//!
//! `KeyValueStore` is the narrow set of commands the connector needs.
//! `RedisStore` talks to a Redis server through a shared connection manager;
//! `MemoryStore` keeps everything in process and is used for tests and dry
//! runs. Dropping a store releases its connection.

use crate::config::ConnectionOptions;
use crate::error::StoreError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Commands the sink issues against the store
///
/// Implementations must be safe to share between concurrent callers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Health check
    async fn ping(&self) -> Result<(), StoreError>;

    /// SET, with a TTL when `expiration` is given
    async fn set(
        &self,
        key: &str,
        value: &str,
        expiration: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// LPUSH
    async fn list_push_front(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// LPOP, returning the popped element if any
    async fn list_pop_front(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// DEL
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// GET
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
}

/// Opens store connections from connection options
#[async_trait]
pub trait StoreFactory: Send + Sync {
    type Store: KeyValueStore;

    async fn open(&self, options: &ConnectionOptions) -> Result<Self::Store, StoreError>;
}

/// Redis-backed store
#[derive(Clone)]
pub struct RedisStore {
    conn_manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to the server described by `options`
    pub async fn connect(options: &ConnectionOptions) -> Result<Self, StoreError> {
        let url = options.url()?;
        let client = redis::Client::open(url.as_str())?;
        let conn_manager = client.get_connection_manager().await?;

        debug!("Opened redis connection to {} (db {})", options.addr, options.db);
        Ok(Self { conn_manager })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expiration: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = expiration {
            // PX takes whole milliseconds and rejects 0
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            cmd.arg("PX").arg(millis);
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn list_push_front(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn list_pop_front(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let popped: Option<String> = redis::cmd("LPOP").arg(key).query_async(&mut conn).await?;
        Ok(popped)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }
}

/// Opens `RedisStore` connections
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisStoreFactory;

#[async_trait]
impl StoreFactory for RedisStoreFactory {
    type Store = RedisStore;

    async fn open(&self, options: &ConnectionOptions) -> Result<RedisStore, StoreError> {
        RedisStore::connect(options).await
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Text(String),
    List(VecDeque<String>),
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, Entry>,
    expirations: HashMap<String, Instant>,
}

impl MemoryState {
    fn purge_if_expired(&mut self, key: &str) {
        if let Some(deadline) = self.expirations.get(key) {
            if Instant::now() >= *deadline {
                self.expirations.remove(key);
                self.entries.remove(key);
            }
        }
    }
}

/// In-process store with Redis string and list semantics
///
/// Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Elements of a list, front first
    pub async fn list(&self, key: &str) -> Option<Vec<String>> {
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        match state.entries.get(key) {
            Some(Entry::List(items)) => Some(items.iter().cloned().collect()),
            _ => None,
        }
    }

    /// Remaining time to live of a key
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        state
            .expirations
            .get(key)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Whether a key is present
    pub async fn contains(&self, key: &str) -> bool {
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        state.entries.contains_key(key)
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let mut state = self.state.lock().await;
        let keys: Vec<String> = state.entries.keys().cloned().collect();
        for key in keys {
            state.purge_if_expired(&key);
        }
        state.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expiration: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state
            .entries
            .insert(key.to_string(), Entry::Text(value.to_string()));
        match expiration {
            Some(ttl) => {
                state.expirations.insert(key.to_string(), Instant::now() + ttl);
            }
            None => {
                state.expirations.remove(key);
            }
        }
        Ok(())
    }

    async fn list_push_front(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        let entry = state
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(VecDeque::new()));
        match entry {
            Entry::List(items) => {
                items.push_front(value.to_string());
                Ok(())
            }
            Entry::Text(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn list_pop_front(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        let (popped, now_empty) = match state.entries.get_mut(key) {
            None => return Ok(None),
            Some(Entry::Text(_)) => return Err(StoreError::WrongType(key.to_string())),
            Some(Entry::List(items)) => {
                let popped = items.pop_front();
                (popped, items.is_empty())
            }
        };
        // Redis removes a list once its last element is gone
        if now_empty {
            state.entries.remove(key);
            state.expirations.remove(key);
        }
        Ok(popped)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.entries.remove(key);
        state.expirations.remove(key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        match state.entries.get(key) {
            None => Ok(None),
            Some(Entry::Text(value)) => Ok(Some(value.clone())),
            Some(Entry::List(_)) => Err(StoreError::WrongType(key.to_string())),
        }
    }
}

/// Hands out handles to one shared `MemoryStore`
#[derive(Debug, Clone, Default)]
pub struct MemoryStoreFactory {
    store: MemoryStore,
}

impl MemoryStoreFactory {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

#[async_trait]
impl StoreFactory for MemoryStoreFactory {
    type Store = MemoryStore;

    async fn open(&self, _options: &ConnectionOptions) -> Result<MemoryStore, StoreError> {
        Ok(self.store.clone())
    }
}
