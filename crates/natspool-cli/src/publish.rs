//! Concurrent publish driver
//!
//! Runs a number of producer tasks that each obtain a connector for the same
//! configuration, publish their messages, and release it. A producer whose
//! connector was closed underneath it (idle eviction, lost connection) asks
//! the pool for a fresh one once and retries the message.

use natspool_core::ConnectorConfig;
use natspool_runtime::{Connector, ConnectorError, ConnectorPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// What each producer sends.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Number of concurrent producers
    pub producers: usize,

    /// Messages every producer publishes, in order
    pub messages: Vec<String>,

    /// How many times each producer repeats the message list
    pub repeat: usize,

    /// Pause between two messages of the same producer
    pub interval: Option<Duration>,

    /// Appended to every configured subject
    pub subject_suffix: Option<String>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            producers: 1,
            messages: Vec::new(),
            repeat: 1,
            interval: None,
            subject_suffix: None,
        }
    }
}

/// Outcome of a publish run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub published: u64,
    pub failed: u64,
    /// Times a producer had to ask the pool again after a stale handle
    pub reacquired: u64,
}

impl PublishSummary {
    fn add(&mut self, other: PublishSummary) {
        self.published += other.published;
        self.failed += other.failed;
        self.reacquired += other.reacquired;
    }
}

/// Run all producers to completion and aggregate their results.
///
/// Connection failures while acquiring a connector abort the run; publish
/// failures are counted and the producer moves on to its next message.
/// Dropping the returned future aborts every producer still running.
pub async fn run_publish(
    pool: &ConnectorPool,
    config: &ConnectorConfig,
    options: &PublishOptions,
) -> Result<PublishSummary, ConnectorError> {
    let mut producers = JoinSet::new();
    for producer in 0..options.producers {
        let pool = pool.clone();
        let config = config.clone();
        let options = options.clone();
        producers.spawn(async move { run_producer(producer, &pool, &config, &options).await });
    }

    let mut summary = PublishSummary::default();
    let mut first_error = None;
    while let Some(joined) = producers.join_next().await {
        match joined {
            Ok(Ok(partial)) => summary.add(partial),
            Ok(Err(e)) => {
                first_error.get_or_insert(e);
            }
            Err(join_error) => {
                first_error.get_or_insert(ConnectorError::SendFailed(format!(
                    "producer task failed: {}",
                    join_error
                )));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(summary),
    }
}

async fn run_producer(
    producer: usize,
    pool: &ConnectorPool,
    config: &ConnectorConfig,
    options: &PublishOptions,
) -> Result<PublishSummary, ConnectorError> {
    let mut summary = PublishSummary::default();
    let mut connector = pool.get_or_create(config).await?;
    let suffix = options.subject_suffix.as_deref();
    let mut first = true;

    for _ in 0..options.repeat {
        for message in &options.messages {
            if let (false, Some(interval)) = (first, options.interval) {
                tokio::time::sleep(interval).await;
            }
            first = false;

            match publish_once(pool, config, &mut connector, message.as_bytes(), suffix).await {
                Ok(reacquired) => {
                    summary.published += 1;
                    summary.reacquired += u64::from(reacquired);
                }
                Err(ConnectorError::ConnectionFailed(reason)) => {
                    pool.release(&connector);
                    return Err(ConnectorError::ConnectionFailed(reason));
                }
                Err(e) => {
                    warn!("Producer {} failed to publish: {}", producer, e);
                    summary.failed += 1;
                }
            }
        }
    }

    pool.release(&connector);
    debug!(
        "Producer {} done: {} published, {} failed",
        producer, summary.published, summary.failed
    );
    Ok(summary)
}

/// Publish one message; on a stale connector fetch a fresh one and retry
/// once. Returns whether a fresh connector was needed.
async fn publish_once(
    pool: &ConnectorPool,
    config: &ConnectorConfig,
    connector: &mut Arc<Connector>,
    payload: &[u8],
    suffix: Option<&str>,
) -> Result<bool, ConnectorError> {
    let result = connector.publish(payload, suffix).await;
    match result {
        Ok(()) => Ok(false),
        Err(e) if e.is_unavailable() => {
            debug!("Connector {} unavailable, reacquiring", connector.id());
            *connector = pool.get_or_create(config).await?;
            connector.publish(payload, suffix).await?;
            Ok(true)
        }
        Err(e) => Err(e),
    }
}
