//! Core connector types, traits, and error definitions

use async_trait::async_trait;
use natspool_core::{ConfigError, ConnectorConfig};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque connector identity.
///
/// Assigned once at creation from a process-wide counter and never reused,
/// so a connector replacing a closed one under the same fingerprint always
/// has a different identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectorId(u64);

impl ConnectorId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connector lifecycle state.
///
/// ```text
/// Created --connected--> Active --idle timeout | close--> Closing --released--> Closed
/// ```
///
/// `Closed` is terminal. A failed connection attempt goes from `Created`
/// straight to `Closed` without ever being registered in a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorState {
    Created,
    Active,
    Closing,
    Closed,
}

impl ConnectorState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ConnectorState::Created => 0,
            ConnectorState::Active => 1,
            ConnectorState::Closing => 2,
            ConnectorState::Closed => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectorState::Created,
            1 => ConnectorState::Active,
            2 => ConnectorState::Closing,
            _ => ConnectorState::Closed,
        }
    }

    /// `true` once the connector can no longer publish.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectorState::Closing | ConnectorState::Closed)
    }
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectorState::Created => "created",
            ConnectorState::Active => "active",
            ConnectorState::Closing => "closing",
            ConnectorState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Point-in-time health snapshot of a connector.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorHealthReport {
    pub id: ConnectorId,
    pub fingerprint: String,
    pub connection_name: String,
    pub url: String,
    pub subjects: Vec<String>,
    pub state: ConnectorState,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub last_error: Option<String>,
    /// `None` until the first successful publish.
    pub seconds_since_last_publish: Option<u64>,
}

/// Opens broker sessions for connectors.
///
/// The pool holds one transport and calls [`connect`](Self::connect) at
/// most once per connector. Implementations must not cache or share the
/// returned sessions; the connector owns its session exclusively.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Transport identifier (e.g. `"nats"`, `"memory"`).
    fn name(&self) -> &str;

    /// Open a new physical connection for `config`.
    ///
    /// `connection_name` is the name the broker should show for this client.
    async fn connect(
        &self,
        config: &ConnectorConfig,
        connection_name: &str,
    ) -> Result<Box<dyn BrokerSession>, BrokerError>;
}

/// A live broker connection owned by exactly one connector.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Publish `payload` on `subject`, returning once the client accepted
    /// (or, for durable sessions, the broker acknowledged) the message.
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Flush buffered messages to the broker.
    async fn flush(&self) -> Result<(), BrokerError>;

    /// Release the connection. Called exactly once by the owning connector.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Transport-level errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The connection could not be established (unreachable, auth, protocol).
    #[error("connect failed: {0}")]
    Connect(String),

    /// The broker or client rejected this message; the connection is fine.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The connection itself is gone.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The transport is not compiled in.
    #[error("not available: {0}")]
    NotAvailable(String),
}

/// Errors surfaced by the pool and its connectors.
///
/// Nothing here is retried internally; retry policy belongs to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// Invalid configuration, rejected before any pool interaction.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The broker connection could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker rejected a publish, or the connection died during one.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The connector is closing or closed. Request a fresh one from the
    /// pool and retry.
    #[error("Connector {0} is unavailable (closed)")]
    Unavailable(ConnectorId),

    /// Requested transport is not available.
    /// May require enabling a feature flag (e.g., `nats`).
    #[error("Connector not available: {0}")]
    NotAvailable(String),
}

impl ConnectorError {
    /// `true` for the stale-handle case, where a fresh connector from the
    /// pool will succeed where this one cannot.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ConnectorError::Unavailable(_))
    }
}
