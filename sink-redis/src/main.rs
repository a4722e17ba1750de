//! Redis Sink Connector - Main Entry Point
//!
//! Reads newline-delimited JSON records from stdin and writes them to Redis
//! in batches. `redis-sink ping` only checks that the configured server is
//! reachable.

use redis_sink::{
    ConnectionStatus, ConnectorError, ConnectorSettings, Record, RedisSinkConnector,
    SinkConnector, StreamContext,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,redis_sink=debug")),
        )
        .init();

    info!("Starting Redis Sink Connector");

    // Load configuration
    info!("Loading configuration from CONNECTOR_CONFIG_PATH");
    let settings = ConnectorSettings::load()?;
    let config = settings.validate()?;

    info!(
        "Configuration loaded successfully: connector_name={}, addr={}, batch_size={}",
        settings.connector_name, config.addr, settings.batch_size
    );

    let mut connector = RedisSinkConnector::new();

    if std::env::args().nth(1).as_deref() == Some("ping") {
        connector
            .ping(&StreamContext::new(), &settings.redis)
            .await?;
        info!("Redis at {} is reachable", config.addr);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let ctx = StreamContext::with_cancellation(cancel.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            cancel.cancel();
        }
    });

    connector.provision(&settings.redis).await?;
    let connector_name = settings.connector_name.clone();
    let on_status = move |status: ConnectionStatus, reason: &str| {
        if reason.is_empty() {
            info!("{} status: {}", connector_name, status);
        } else {
            warn!("{} status: {} ({})", connector_name, status, reason);
        }
    };
    connector.connect(&ctx, &on_status).await?;

    let result = run(&mut connector, &ctx, settings.batch_size).await;
    if let Err(e) = &result {
        error!("Redis sink stopped with error: {}", e);
    }

    connector.close(&StreamContext::new()).await?;
    info!("Redis Sink Connector stopped");
    result
}

/// Feed stdin to the connector until EOF or cancellation
async fn run(
    connector: &mut RedisSinkConnector,
    ctx: &StreamContext,
    batch_size: usize,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut batch: Vec<Record> = Vec::with_capacity(batch_size);

    loop {
        let line = tokio::select! {
            _ = ctx.cancellation_token().cancelled() => break,
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Value>(&line) {
            Ok(Value::Object(record)) => batch.push(record),
            Ok(other) => warn!("Skipping input that is not a JSON object: {}", other),
            Err(e) => warn!("Skipping malformed JSON input: {}", e),
        }

        if batch.len() >= batch_size {
            flush(connector, ctx, &mut batch).await?;
        }
    }

    if batch.is_empty() {
        return Ok(());
    }
    if ctx.is_cancelled() {
        warn!(
            "Shutdown with {} buffered records not written",
            batch.len()
        );
        return Ok(());
    }
    flush(connector, ctx, &mut batch).await
}

async fn flush(
    connector: &mut RedisSinkConnector,
    ctx: &StreamContext,
    batch: &mut Vec<Record>,
) -> anyhow::Result<()> {
    match connector.collect_list(ctx, std::mem::take(batch)).await {
        Ok(report) => {
            info!(
                "Wrote batch: {} of {} records succeeded",
                report.succeeded, report.processed
            );
            Ok(())
        }
        Err(ConnectorError::Cancelled) => {
            let stats = connector.stats();
            warn!(
                "Batch interrupted by shutdown ({} records written so far, {} failed)",
                stats.records_written, stats.records_failed
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
