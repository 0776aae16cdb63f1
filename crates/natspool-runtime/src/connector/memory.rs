//! In-memory transport for testing and dry runs
//!
//! Records every connect, publish and close so tests can assert on the
//! exact side effects the pool produced. Failure modes (refused connects,
//! rejected publishes, dropped connections) can be switched on at runtime.

use super::types::{BrokerError, BrokerSession, BrokerTransport};
use async_trait::async_trait;
use natspool_core::ConnectorConfig;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// A message accepted by a [`MemoryTransport`] session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub connection: String,
    pub subject: String,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct MemoryState {
    connects: AtomicUsize,
    closes: AtomicUsize,
    failing_connects: AtomicUsize,
    reject_publishes: AtomicBool,
    epoch: AtomicU64,
    published: Mutex<Vec<PublishedMessage>>,
}

impl MemoryState {
    fn record(&self, message: PublishedMessage) {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
    }
}

/// Recording transport that never touches the network.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<MemoryState>,
    connect_delay: Option<Duration>,
    publish_delay: Option<Duration>,
    echo: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every connect, widening the window for concurrent creation.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Delay every publish, keeping a send in flight long enough to race it.
    pub fn with_publish_delay(mut self, delay: Duration) -> Self {
        self.publish_delay = Some(delay);
        self
    }

    /// Print every accepted message to stdout.
    pub fn echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: usize) {
        self.state.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Make every session reject publishes (the connection stays healthy).
    pub fn reject_publishes(&self, reject: bool) {
        self.state.reject_publishes.store(reject, Ordering::SeqCst);
    }

    /// Drop every currently open session; their next call reports a lost
    /// connection. Sessions opened afterwards are unaffected.
    pub fn kill_connections(&self) {
        self.state.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Sessions opened and not yet closed.
    pub fn open_count(&self) -> usize {
        self.connect_count().saturating_sub(self.close_count())
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state
            .published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn publish_count(&self) -> usize {
        self.state
            .published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl BrokerTransport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(
        &self,
        config: &ConnectorConfig,
        connection_name: &str,
    ) -> Result<Box<dyn BrokerSession>, BrokerError> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .state
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(BrokerError::Connect(format!(
                "connection refused: {}",
                config.url()
            )));
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        debug!("Memory session {} opened for {}", connection_name, config.url());

        Ok(Box::new(MemorySession {
            state: self.state.clone(),
            connection_name: connection_name.to_string(),
            epoch: self.state.epoch.load(Ordering::SeqCst),
            closed: AtomicBool::new(false),
            publish_delay: self.publish_delay,
            echo: self.echo,
        }))
    }
}

struct MemorySession {
    state: Arc<MemoryState>,
    connection_name: String,
    epoch: u64,
    closed: AtomicBool,
    publish_delay: Option<Duration>,
    echo: bool,
}

impl MemorySession {
    fn check_alive(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionLost(format!(
                "{} is closed",
                self.connection_name
            )));
        }
        if self.state.epoch.load(Ordering::SeqCst) != self.epoch {
            return Err(BrokerError::ConnectionLost(format!(
                "{} was disconnected",
                self.connection_name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerSession for MemorySession {
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.check_alive()?;
        if let Some(delay) = self.publish_delay {
            tokio::time::sleep(delay).await;
            self.check_alive()?;
        }
        if self.state.reject_publishes.load(Ordering::SeqCst) {
            return Err(BrokerError::Rejected(format!("publish to {subject} refused")));
        }

        if self.echo {
            println!(
                "[{}] {} | {}",
                self.connection_name,
                subject,
                String::from_utf8_lossy(payload)
            );
        }
        self.state.record(PublishedMessage {
            connection: self.connection_name.clone(),
            subject: subject.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn flush(&self) -> Result<(), BrokerError> {
        self.check_alive()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
            debug!("Memory session {} closed", self.connection_name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectorConfig {
        ConnectorConfig::builder("nats://memory:4222")
            .subject("a")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn records_connect_publish_close() {
        let transport = MemoryTransport::new();
        let session = transport.connect(&config(), "test-1").await.unwrap();
        session.publish("a", b"hello").await.unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();

        assert_eq!(transport.connect_count(), 1);
        assert_eq!(transport.close_count(), 1);
        assert_eq!(transport.open_count(), 0);
        assert_eq!(
            transport.published(),
            vec![PublishedMessage {
                connection: "test-1".into(),
                subject: "a".into(),
                payload: b"hello".to_vec(),
            }]
        );
    }

    #[tokio::test]
    async fn failing_connects_are_counted_down() {
        let transport = MemoryTransport::new();
        transport.fail_next_connects(1);
        assert!(matches!(
            transport.connect(&config(), "x").await,
            Err(BrokerError::Connect(_))
        ));
        assert!(transport.connect(&config(), "x").await.is_ok());
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn killed_sessions_report_lost_connection() {
        let transport = MemoryTransport::new();
        let old = transport.connect(&config(), "old").await.unwrap();
        transport.kill_connections();
        let new = transport.connect(&config(), "new").await.unwrap();

        assert!(matches!(
            old.publish("a", b"x").await,
            Err(BrokerError::ConnectionLost(_))
        ));
        assert!(new.publish("a", b"x").await.is_ok());
    }

    #[tokio::test]
    async fn rejected_publishes_keep_session_usable() {
        let transport = MemoryTransport::new();
        let session = transport.connect(&config(), "s").await.unwrap();
        transport.reject_publishes(true);
        assert!(matches!(
            session.publish("a", b"x").await,
            Err(BrokerError::Rejected(_))
        ));
        transport.reject_publishes(false);
        assert!(session.publish("a", b"x").await.is_ok());
        assert_eq!(transport.publish_count(), 1);
    }
}
