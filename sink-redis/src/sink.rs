//! Sink lifecycle contract between the stream engine and a connector
//!
//! The engine provisions a sink with its raw options, connects it, hands it
//! records one at a time or in batches, and finally closes it. `ping` checks
//! a set of options end to end without touching the connector's own state.

use crate::error::{ConnectorError, ConnectorResult};
use crate::record::Record;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Connection state reported to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connected => f.write_str("connected"),
            ConnectionStatus::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Callback receiving connection status changes and a reason
pub type StatusChangeHandler = dyn Fn(ConnectionStatus, &str) + Send + Sync;

/// Per-call context: cancellation and an optional deadline
#[derive(Debug, Clone, Default)]
pub struct StreamContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl StreamContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context cancelled through the given token
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Drive `fut` until it completes, the token fires or the deadline passes
    ///
    /// The in-flight future is dropped on cancellation.
    pub async fn run<F, T>(&self, fut: F) -> ConnectorResult<T>
    where
        F: Future<Output = T>,
    {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ConnectorError::Cancelled),
            _ = deadline => Err(ConnectorError::Cancelled),
            out = fut => Ok(out),
        }
    }
}

/// A record of a batch that could not be written
#[derive(Debug)]
pub struct RecordFailure {
    /// Position of the record in the batch
    pub index: usize,
    pub error: ConnectorError,
}

/// Outcome of a batch collection
#[derive(Debug, Default)]
pub struct BatchReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failures: Vec<RecordFailure>,
}

impl BatchReport {
    /// Every record of the batch was written
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.index).collect()
    }
}

/// Lifecycle of a sink connector
#[async_trait]
pub trait SinkConnector: Send + Sync {
    /// Validate and store the sink properties
    async fn provision(&mut self, props: &Map<String, Value>) -> ConnectorResult<()>;

    /// Open the store connection and report the outcome to `on_status`
    async fn connect(
        &mut self,
        ctx: &StreamContext,
        on_status: &StatusChangeHandler,
    ) -> ConnectorResult<()>;

    /// Write one record, failing on the first error
    async fn collect(&mut self, ctx: &StreamContext, record: Record) -> ConnectorResult<()>;

    /// Write a batch best-effort
    ///
    /// Record-level failures are logged and reported, never abort the batch.
    /// Only cancellation or a missing connection stop it early.
    async fn collect_list(
        &mut self,
        ctx: &StreamContext,
        records: Vec<Record>,
    ) -> ConnectorResult<BatchReport>;

    /// Release the store connection
    async fn close(&mut self, ctx: &StreamContext) -> ConnectorResult<()>;

    /// Validate `props` and ping the store on a throwaway connection
    async fn ping(&self, ctx: &StreamContext, props: &Map<String, Value>) -> ConnectorResult<()>;
}
