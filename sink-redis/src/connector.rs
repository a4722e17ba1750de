//! Redis Sink Connector implementation
//!
//! This module implements the connector lifecycle for writing records into
//! Redis with:
//! - Single-key (whole record as JSON) and multiple-key (one key per field) modes
//! - String (SET / DEL) and list (LPUSH / LPOP) data types
//! - Row-kind driven deletes
//! - Best-effort batch collection with a per-record failure report

use crate::config::RedisSinkConfig;
use crate::error::{ConnectorError, ConnectorResult, StoreError};
use crate::record::{Mutation, Record};
use crate::resolver::{resolve, Command};
use crate::sink::{
    BatchReport, ConnectionStatus, RecordFailure, SinkConnector, StatusChangeHandler,
    StreamContext,
};
use crate::store::{KeyValueStore, RedisStoreFactory, StoreFactory};
use crate::transform::TransformOptions;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

/// Counters kept over the connector's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub records_written: u64,
    pub records_failed: u64,
    pub commands_executed: u64,
}

/// Redis Sink Connector
///
/// Generic over the store factory so tests and dry runs can swap Redis out.
pub struct RedisSinkConnector<F: StoreFactory = RedisStoreFactory> {
    /// Opens store connections
    factory: F,

    /// Validated configuration, set by `provision`
    config: Option<RedisSinkConfig>,

    /// Output shaping compiled from the configuration
    transform: TransformOptions,

    /// Open store connection, set by `connect`
    store: Option<F::Store>,

    /// Statistics
    stats: SinkStats,
}

impl RedisSinkConnector<RedisStoreFactory> {
    /// Create a connector writing to Redis
    pub fn new() -> Self {
        Self::with_factory(RedisStoreFactory)
    }
}

impl Default for RedisSinkConnector<RedisStoreFactory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: StoreFactory> RedisSinkConnector<F> {
    /// Create a connector using the given store factory
    pub fn with_factory(factory: F) -> Self {
        Self {
            factory,
            config: None,
            transform: TransformOptions::default(),
            store: None,
            stats: SinkStats::default(),
        }
    }

    /// Configuration applied by the last successful `provision`
    pub fn config(&self) -> Option<&RedisSinkConfig> {
        self.config.as_ref()
    }

    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    pub fn is_connected(&self) -> bool {
        self.store.is_some()
    }

    /// Shape, resolve and write one incoming record
    ///
    /// Records expanded by `dataField` or `dataTemplate` are written
    /// best-effort: every element is attempted, one failing element is
    /// returned as is and several report every failure.
    async fn save(&mut self, ctx: &StreamContext, record: Record) -> ConnectorResult<()> {
        let (Some(config), Some(store)) = (self.config.as_ref(), self.store.as_ref()) else {
            return Err(ConnectorError::NotConnected);
        };

        let records = match self.transform.apply(record) {
            Ok(records) => records,
            Err(e) => {
                self.stats.records_failed += 1;
                return Err(e);
            }
        };
        let attempted = records.len();
        let mut failures = Vec::new();

        for record in &records {
            match write_record(ctx, store, config, record).await {
                Ok(executed) => self.stats.commands_executed += executed as u64,
                Err(ConnectorError::Cancelled) => {
                    self.stats.records_failed += 1;
                    return Err(ConnectorError::Cancelled);
                }
                Err(e) => failures.push(e),
            }
        }

        if failures.is_empty() {
            self.stats.records_written += 1;
            return Ok(());
        }

        self.stats.records_failed += 1;
        if attempted == 1 {
            Err(failures.remove(0))
        } else {
            Err(ConnectorError::PartialWrite {
                attempted,
                failures,
            })
        }
    }
}

/// Resolve a record and issue its commands
///
/// Every mutation is attempted even when an earlier one failed; a single
/// failing command is returned as is, several keys report every failure.
/// Cancellation stops immediately. Returns the number of commands executed.
async fn write_record<S: KeyValueStore>(
    ctx: &StreamContext,
    store: &S,
    config: &RedisSinkConfig,
    record: &Record,
) -> ConnectorResult<usize> {
    let mutations = resolve(config, record)?;
    let attempted = mutations.len();
    let mut failures = Vec::new();

    for mutation in &mutations {
        let command = Command::dispatch(mutation, config.data_type, config.expiration);
        match ctx.run(execute(store, &command)).await? {
            Ok(()) => log_success(&command, mutation),
            Err(source) => {
                warn!("{} {} failed: {}", command.name(), command.key(), source);
                failures.push(ConnectorError::Store {
                    command: command.name(),
                    key: command.key().to_string(),
                    source,
                });
            }
        }
    }

    match failures.len() {
        0 => Ok(attempted),
        1 if attempted == 1 => Err(failures.remove(0)),
        _ => Err(ConnectorError::PartialWrite {
            attempted,
            failures,
        }),
    }
}

async fn execute<S: KeyValueStore>(store: &S, command: &Command) -> Result<(), StoreError> {
    match command {
        Command::Set {
            key,
            value,
            expiration,
        } => store.set(key, value, *expiration).await,
        Command::ListPushFront { key, value } => store.list_push_front(key, value).await,
        Command::ListPopFront { key } => store.list_pop_front(key).await.map(|_| ()),
        Command::Delete { key } => store.delete(key).await,
    }
}

fn log_success(command: &Command, mutation: &Mutation) {
    let action = match command {
        Command::Set { .. } => "set redis string",
        Command::ListPushFront { .. } => "push redis list",
        Command::ListPopFront { .. } => "pop redis list",
        Command::Delete { .. } => "delete redis string",
    };
    debug!(
        "{} success, key: {}, data: {}",
        action, mutation.key, mutation.value
    );
}

#[async_trait]
impl<F: StoreFactory> SinkConnector for RedisSinkConnector<F> {
    async fn provision(&mut self, props: &Map<String, Value>) -> ConnectorResult<()> {
        let config = RedisSinkConfig::from_properties(props)?;
        let transform = TransformOptions::from_config(&config)?;

        info!(
            "Provisioned redis sink: addr={}, db={}, keyType={:?}, dataType={:?}",
            config.addr, config.db, config.key_type, config.data_type
        );

        self.config = Some(config);
        self.transform = transform;
        Ok(())
    }

    async fn connect(
        &mut self,
        ctx: &StreamContext,
        on_status: &StatusChangeHandler,
    ) -> ConnectorResult<()> {
        let options = self
            .config
            .as_ref()
            .ok_or_else(|| {
                ConnectorError::validation("redis sink must be provisioned before connecting")
            })?
            .connection_options();

        debug!("Opening redis sink to {} (db {})", options.addr, options.db);

        let factory = &self.factory;
        let opened = ctx
            .run(async {
                let store = factory.open(&options).await?;
                store.ping().await?;
                Ok::<_, StoreError>(store)
            })
            .await;

        match opened {
            Ok(Ok(store)) => {
                self.store = Some(store);
                info!("Connected to redis at {}", options.addr);
                on_status(ConnectionStatus::Connected, "");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Failed to connect to redis at {}: {}", options.addr, e);
                on_status(ConnectionStatus::Disconnected, &e.to_string());
                Err(ConnectorError::connection_with_source(
                    format!("Failed to connect to redis at {}", options.addr),
                    e,
                ))
            }
            Err(e) => {
                on_status(ConnectionStatus::Disconnected, &e.to_string());
                Err(e)
            }
        }
    }

    async fn collect(&mut self, ctx: &StreamContext, record: Record) -> ConnectorResult<()> {
        self.save(ctx, record).await
    }

    async fn collect_list(
        &mut self,
        ctx: &StreamContext,
        records: Vec<Record>,
    ) -> ConnectorResult<BatchReport> {
        let mut report = BatchReport::default();
        let total = records.len();

        for (index, record) in records.into_iter().enumerate() {
            report.processed += 1;
            match self.save(ctx, record).await {
                Ok(()) => report.succeeded += 1,
                Err(e @ (ConnectorError::Cancelled | ConnectorError::NotConnected)) => {
                    warn!(
                        "Batch stopped at record {}: {} ({} written, {} failed, {} not attempted)",
                        index,
                        e,
                        report.succeeded,
                        report.failures.len() + 1,
                        total - report.processed
                    );
                    return Err(e);
                }
                Err(e) => {
                    if e.is_record_level() {
                        warn!("Skipping record {} of batch: {}", index, e);
                    } else {
                        error!("Failed to write record {} of batch: {}", index, e);
                    }
                    report.failures.push(RecordFailure { index, error: e });
                }
            }
        }

        if !report.is_complete() {
            warn!(
                "Batch finished with {} of {} records failed",
                report.failures.len(),
                report.processed
            );
        }
        Ok(report)
    }

    async fn close(&mut self, _ctx: &StreamContext) -> ConnectorResult<()> {
        info!("Closing redis sink");

        if self.store.take().is_none() {
            debug!("Redis sink was not connected");
        }

        info!(
            "Final statistics: {} records written, {} records failed, {} commands",
            self.stats.records_written, self.stats.records_failed, self.stats.commands_executed
        );
        Ok(())
    }

    async fn ping(&self, ctx: &StreamContext, props: &Map<String, Value>) -> ConnectorResult<()> {
        let config = RedisSinkConfig::from_properties(props)?;
        let options = config.connection_options();

        // The throwaway connection is dropped on every path out of this block
        let pinged = ctx
            .run(async {
                let store = self.factory.open(&options).await?;
                store.ping().await
            })
            .await?;

        pinged.map_err(|e| {
            ConnectorError::connection_with_source(
                format!("Failed to ping redis at {}", options.addr),
                e,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RowKind;
    use crate::store::{MemoryStore, MemoryStoreFactory, MockKeyValueStore};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio_test::assert_ok;
    use tokio_util::sync::CancellationToken;

    use crate::config::ConnectionOptions;

    fn map(value: Value) -> Map<String, Value> {
        let Value::Object(map) = value else {
            panic!("expected an object");
        };
        map
    }

    type StatusLog = Arc<Mutex<Vec<(ConnectionStatus, String)>>>;

    fn status_recorder() -> (StatusLog, impl Fn(ConnectionStatus, &str) + Send + Sync) {
        let log: StatusLog = Arc::default();
        let sink = log.clone();
        let handler = move |status: ConnectionStatus, reason: &str| {
            sink.lock().unwrap().push((status, reason.to_string()));
        };
        (log, handler)
    }

    async fn memory_connector(
        props: Value,
    ) -> (RedisSinkConnector<MemoryStoreFactory>, MemoryStore) {
        let store = MemoryStore::new();
        let mut connector = RedisSinkConnector::with_factory(MemoryStoreFactory::new(store.clone()));
        connector.provision(&map(props)).await.unwrap();
        let (_, handler) = status_recorder();
        connector
            .connect(&StreamContext::new(), &handler)
            .await
            .unwrap();
        (connector, store)
    }

    /// Hands out one preconfigured mock store
    struct MockFactory {
        store: Mutex<Option<MockKeyValueStore>>,
    }

    impl MockFactory {
        fn new(store: MockKeyValueStore) -> Self {
            Self {
                store: Mutex::new(Some(store)),
            }
        }
    }

    #[async_trait]
    impl StoreFactory for MockFactory {
        type Store = MockKeyValueStore;

        async fn open(&self, _options: &ConnectionOptions) -> Result<MockKeyValueStore, StoreError> {
            Ok(self.store.lock().unwrap().take().expect("store opened twice"))
        }
    }

    /// Store that cannot be reached
    struct UnreachableFactory;

    #[async_trait]
    impl StoreFactory for UnreachableFactory {
        type Store = MemoryStore;

        async fn open(&self, _options: &ConnectionOptions) -> Result<MemoryStore, StoreError> {
            Err(StoreError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))))
        }
    }

    /// Store whose writes never complete
    struct StalledStore;

    #[async_trait]
    impl KeyValueStore for StalledStore {
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
        async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn list_push_front(&self, _: &str, _: &str) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn list_pop_front(&self, _: &str) -> Result<Option<String>, StoreError> {
            std::future::pending().await
        }
        async fn delete(&self, _: &str) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
    }

    struct StalledFactory;

    #[async_trait]
    impl StoreFactory for StalledFactory {
        type Store = StalledStore;

        async fn open(&self, _options: &ConnectionOptions) -> Result<StalledStore, StoreError> {
            Ok(StalledStore)
        }
    }

    /// Writes keys through to memory, except `stall` which never completes
    struct StallOnKey(MemoryStore);

    #[async_trait]
    impl KeyValueStore for StallOnKey {
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
            if key == "stall" {
                std::future::pending::<()>().await;
            }
            self.0.set(key, value, ttl).await
        }
        async fn list_push_front(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.0.list_push_front(key, value).await
        }
        async fn list_pop_front(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.list_pop_front(key).await
        }
        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.0.delete(key).await
        }
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.get(key).await
        }
    }

    struct StallOnKeyFactory(MemoryStore);

    #[async_trait]
    impl StoreFactory for StallOnKeyFactory {
        type Store = StallOnKey;

        async fn open(&self, _options: &ConnectionOptions) -> Result<StallOnKey, StoreError> {
            Ok(StallOnKey(self.0.clone()))
        }
    }

    #[tokio::test]
    async fn test_single_key_from_field_end_to_end() {
        let (mut connector, store) = memory_connector(json!({
            "keyType": "single", "key": "", "field": "id", "dataType": "string"
        }))
        .await;

        connector
            .collect(&StreamContext::new(), map(json!({"id": "u1", "name": "Ann"})))
            .await
            .unwrap();

        assert_eq!(
            store.get("u1").await.unwrap().as_deref(),
            Some(r#"{"id":"u1","name":"Ann"}"#)
        );
        assert_eq!(store.ttl("u1").await, None);
        assert_eq!(
            connector.stats(),
            SinkStats {
                records_written: 1,
                records_failed: 0,
                commands_executed: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_set_round_trip_is_exact_json() {
        let (mut connector, store) = memory_connector(json!({"key": "doc"})).await;
        let data = map(json!({"text": "quote \" and unicode é", "n": 1.25, "list": [1, null]}));

        connector
            .collect(&StreamContext::new(), data.clone())
            .await
            .unwrap();

        let stored = store.get("doc").await.unwrap().unwrap();
        assert_eq!(stored, serde_json::to_string(&data).unwrap());
        let decoded: Record = serde_json::from_str(&stored).unwrap();
        assert_eq!(decoded, data);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiration_applied_to_set() {
        let (mut connector, store) =
            memory_connector(json!({"key": "k", "expiration": "1m"})).await;

        connector
            .collect(&StreamContext::new(), map(json!({"a": 1})))
            .await
            .unwrap();

        assert_eq!(store.ttl("k").await, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_multiple_keys_written_independently() {
        let (mut connector, store) = memory_connector(json!({"keyType": "multiple"})).await;

        connector
            .collect(&StreamContext::new(), map(json!({"a": 1, "b": "x", "c": {"x": 1}})))
            .await
            .unwrap();

        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("x"));
        assert_eq!(store.get("c").await.unwrap().as_deref(), Some(""));
        assert_eq!(connector.stats().commands_executed, 3);
    }

    #[tokio::test]
    async fn test_list_push_then_delete_pops() {
        let (mut connector, store) = memory_connector(json!({
            "key": "events", "dataType": "list", "rowkindField": "op"
        }))
        .await;
        let ctx = StreamContext::new();

        connector.collect(&ctx, map(json!({"id": 1}))).await.unwrap();
        connector
            .collect(&ctx, map(json!({"id": 2, "op": "insert"})))
            .await
            .unwrap();
        assert_eq!(
            store.list("events").await,
            Some(vec![
                r#"{"id":2,"op":"insert"}"#.to_string(),
                r#"{"id":1}"#.to_string()
            ])
        );

        connector
            .collect(&ctx, map(json!({"id": 2, "op": "delete"})))
            .await
            .unwrap();
        assert_eq!(store.list("events").await, Some(vec![r#"{"id":1}"#.to_string()]));
    }

    #[tokio::test]
    async fn test_delete_on_string_removes_key() {
        let (mut connector, store) =
            memory_connector(json!({"field": "id", "rowkindField": "op"})).await;
        let ctx = StreamContext::new();

        connector
            .collect(&ctx, map(json!({"id": "u1", "op": "upsert"})))
            .await
            .unwrap();
        assert!(store.contains("u1").await);

        connector
            .collect(&ctx, map(json!({"id": "u1", "op": "delete"})))
            .await
            .unwrap();
        assert!(!store.contains("u1").await);
    }

    #[tokio::test]
    async fn test_record_errors_write_nothing() {
        let (mut connector, store) =
            memory_connector(json!({"field": "id", "rowkindField": "op"})).await;
        let ctx = StreamContext::new();

        let err = connector
            .collect(&ctx, map(json!({"name": "Ann"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::MissingField { .. }));

        let err = connector
            .collect(&ctx, map(json!({"id": "u1", "op": "archive"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidRowKind { .. }));

        assert!(store.is_empty().await);
        assert_eq!(connector.stats().records_failed, 2);
    }

    #[tokio::test]
    async fn test_store_error_carries_command_and_key() {
        let store = MemoryStore::new();
        store.set("k", "plain", None).await.unwrap();
        let mut connector = RedisSinkConnector::with_factory(MemoryStoreFactory::new(store));
        connector
            .provision(&map(json!({"key": "k", "dataType": "list"})))
            .await
            .unwrap();
        let (_, handler) = status_recorder();
        connector.connect(&StreamContext::new(), &handler).await.unwrap();

        let err = connector
            .collect(&StreamContext::new(), map(json!({"a": 1})))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ConnectorError::Store { command: "lpush", ref key, source: StoreError::WrongType(_) } if key == "k"
        ));
        assert_eq!(connector.stats().records_failed, 1);
    }

    #[tokio::test]
    async fn test_expanded_records_written_best_effort() {
        let (mut connector, store) =
            memory_connector(json!({"field": "id", "dataField": "rows"})).await;

        let err = connector
            .collect(
                &StreamContext::new(),
                map(json!({"rows": [{"id": "a"}, {"name": "no id"}, {"id": "c"}]})),
            )
            .await
            .unwrap_err();

        match err {
            ConnectorError::PartialWrite {
                attempted,
                failures,
            } => {
                assert_eq!(attempted, 3);
                assert_eq!(failures.len(), 1);
                assert!(matches!(failures[0], ConnectorError::MissingField { .. }));
            }
            other => panic!("expected PartialWrite, got {:?}", other),
        }
        assert!(store.contains("a").await);
        assert!(store.contains("c").await);
        assert_eq!(connector.stats().commands_executed, 2);
    }

    #[tokio::test]
    async fn test_single_expanded_record_error_returned_as_is() {
        let (mut connector, store) =
            memory_connector(json!({"field": "id", "dataField": "rows"})).await;

        let err = connector
            .collect(&StreamContext::new(), map(json!({"rows": [{"name": "no id"}]})))
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectorError::MissingField { .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_partial_failure_attempts_every_key() {
        let mut mock = MockKeyValueStore::new();
        mock.expect_ping().times(1).returning(|| Ok(()));
        mock.expect_set().times(3).returning(|key, _, _| {
            if key == "b" {
                Err(StoreError::WrongType(key.to_string()))
            } else {
                Ok(())
            }
        });

        let mut connector = RedisSinkConnector::with_factory(MockFactory::new(mock));
        connector
            .provision(&map(json!({"keyType": "multiple"})))
            .await
            .unwrap();
        let (_, handler) = status_recorder();
        connector.connect(&StreamContext::new(), &handler).await.unwrap();

        let err = connector
            .collect(&StreamContext::new(), map(json!({"a": 1, "b": 2, "c": 3})))
            .await
            .unwrap_err();

        match err {
            ConnectorError::PartialWrite {
                attempted,
                failures,
            } => {
                assert_eq!(attempted, 3);
                assert_eq!(failures.len(), 1);
                assert!(matches!(
                    &failures[0],
                    ConnectorError::Store { command: "set", key, .. } if key == "b"
                ));
            }
            other => panic!("expected PartialWrite, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_delete_dispatches_to_pop_only() {
        let mut mock = MockKeyValueStore::new();
        mock.expect_ping().returning(|| Ok(()));
        mock.expect_list_pop_front()
            .times(1)
            .returning(|key| {
                assert_eq!(key, "queue");
                Ok(Some("old".to_string()))
            });
        mock.expect_list_push_front().never();

        let mut connector = RedisSinkConnector::with_factory(MockFactory::new(mock));
        connector
            .provision(&map(json!({"key": "queue", "dataType": "list", "rowkindField": "op"})))
            .await
            .unwrap();
        let (_, handler) = status_recorder();
        connector.connect(&StreamContext::new(), &handler).await.unwrap();

        assert_ok!(
            connector
                .collect(&StreamContext::new(), map(json!({"op": "delete"})))
                .await
        );
    }

    #[tokio::test]
    async fn test_batch_is_best_effort() {
        let (mut connector, store) = memory_connector(json!({"field": "id"})).await;

        let report = connector
            .collect_list(
                &StreamContext::new(),
                vec![
                    map(json!({"id": "a"})),
                    map(json!({"name": "no id"})),
                    map(json!({"id": "c"})),
                ],
            )
            .await
            .unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed_indices(), vec![1]);
        assert!(matches!(
            report.failures[0].error,
            ConnectorError::MissingField { .. }
        ));
        assert!(store.contains("a").await);
        assert!(store.contains("c").await);
    }

    #[tokio::test]
    async fn test_collect_requires_connection() {
        let mut connector = RedisSinkConnector::with_factory(MemoryStoreFactory::default());
        connector.provision(&map(json!({"key": "k"}))).await.unwrap();

        let err = connector
            .collect(&StreamContext::new(), map(json!({"a": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::NotConnected));

        let err = connector
            .collect_list(&StreamContext::new(), vec![map(json!({"a": 1}))])
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_requires_provisioning() {
        let mut connector = RedisSinkConnector::with_factory(MemoryStoreFactory::default());
        let (log, handler) = status_recorder();

        let err = connector
            .connect(&StreamContext::new(), &handler)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Validation(_)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_reports_status() {
        let mut connector = RedisSinkConnector::with_factory(MemoryStoreFactory::default());
        connector.provision(&map(json!({"key": "k"}))).await.unwrap();
        let (log, handler) = status_recorder();

        connector.connect(&StreamContext::new(), &handler).await.unwrap();

        assert!(connector.is_connected());
        assert_eq!(
            *log.lock().unwrap(),
            vec![(ConnectionStatus::Connected, String::new())]
        );
    }

    #[tokio::test]
    async fn test_connect_failure_reports_disconnected() {
        let mut connector = RedisSinkConnector::with_factory(UnreachableFactory);
        connector.provision(&map(json!({"key": "k"}))).await.unwrap();
        let (log, handler) = status_recorder();

        let err = connector
            .connect(&StreamContext::new(), &handler)
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectorError::Connection { source: Some(_), .. }));
        assert!(!connector.is_connected());
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, ConnectionStatus::Disconnected);
        assert!(log[0].1.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_cancelled_context_aborts_write() {
        let (mut connector, store) = memory_connector(json!({"key": "k"})).await;
        let token = CancellationToken::new();
        token.cancel();

        let err = connector
            .collect(&StreamContext::with_cancellation(token), map(json!({"a": 1})))
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectorError::Cancelled));
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_in_flight_write_and_stops_batch() {
        let mut connector = RedisSinkConnector::with_factory(StalledFactory);
        connector.provision(&map(json!({"key": "k"}))).await.unwrap();
        let (_, handler) = status_recorder();
        connector.connect(&StreamContext::new(), &handler).await.unwrap();

        let ctx = StreamContext::new().with_timeout(Duration::from_millis(50));
        let err = connector
            .collect_list(&ctx, vec![map(json!({"a": 1})), map(json!({"a": 2}))])
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectorError::Cancelled));
        assert_eq!(connector.stats().records_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_batch_keeps_earlier_writes() {
        let memory = MemoryStore::new();
        let mut connector = RedisSinkConnector::with_factory(StallOnKeyFactory(memory.clone()));
        connector.provision(&map(json!({"field": "id"}))).await.unwrap();
        let (_, handler) = status_recorder();
        connector.connect(&StreamContext::new(), &handler).await.unwrap();

        let ctx = StreamContext::new().with_timeout(Duration::from_millis(50));
        let err = connector
            .collect_list(
                &ctx,
                vec![
                    map(json!({"id": "a"})),
                    map(json!({"id": "stall"})),
                    map(json!({"id": "c"})),
                ],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectorError::Cancelled));
        assert!(memory.contains("a").await);
        assert!(!memory.contains("c").await);
        assert_eq!(connector.stats().records_written, 1);
        assert_eq!(connector.stats().records_failed, 1);
    }

    #[tokio::test]
    async fn test_close_releases_connection() {
        let (mut connector, _store) = memory_connector(json!({"key": "k"})).await;
        let ctx = StreamContext::new();

        connector.close(&ctx).await.unwrap();
        assert!(!connector.is_connected());

        let err = connector.collect(&ctx, map(json!({"a": 1}))).await.unwrap_err();
        assert!(matches!(err, ConnectorError::NotConnected));

        // Closing twice is harmless
        assert_ok!(connector.close(&ctx).await);
    }

    #[tokio::test]
    async fn test_ping_is_stateless() {
        let connector = RedisSinkConnector::with_factory(MemoryStoreFactory::default());
        let ctx = StreamContext::new();

        assert_ok!(connector.ping(&ctx, &map(json!({"key": "k", "db": 15}))).await);
        assert!(connector.config().is_none());
        assert!(!connector.is_connected());

        let err = connector
            .ping(&ctx, &map(json!({"key": "k", "db": 16})))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_ping_unreachable_store() {
        let connector = RedisSinkConnector::with_factory(UnreachableFactory);

        let err = connector
            .ping(&StreamContext::new(), &map(json!({"key": "k"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_transform_applied_before_resolution() {
        let (mut connector, store) = memory_connector(json!({
            "keyType": "multiple",
            "dataField": "after",
            "fields": ["id", "status"]
        }))
        .await;

        connector
            .collect(
                &StreamContext::new(),
                map(json!({"after": {"id": 9, "status": "paid", "internal": true}, "before": null})),
            )
            .await
            .unwrap();

        assert_eq!(store.get("id").await.unwrap().as_deref(), Some("9"));
        assert_eq!(store.get("status").await.unwrap().as_deref(), Some("paid"));
        assert!(!store.contains("internal").await);
        assert!(!store.contains("before").await);
    }

    #[tokio::test]
    async fn test_default_row_kind_is_upsert() {
        let (mut connector, store) =
            memory_connector(json!({"key": "k", "rowkindField": "op"})).await;

        connector
            .collect(&StreamContext::new(), map(json!({"v": 1})))
            .await
            .unwrap();

        assert!(store.contains("k").await);
        assert_eq!(RowKind::default(), RowKind::Upsert);
    }
}
