//! Pooled broker connectors
//!
//! A [`ConnectorPool`] keeps at most one live [`Connector`] per distinct
//! configuration. Each connector owns one broker session opened through a
//! [`BrokerTransport`], and closes itself after its idle timeout.
//!
//! # Architecture
//!
//! ```text
//! producer tasks ──get_or_create──> ConnectorPool ──connect──> BrokerTransport
//!                                        │                         │
//!                                  Arc<Connector> ──publish──> BrokerSession ──> broker
//!                                        │
//!                                   IdleTimer ──(idle)──> close ──> remove_by_identity
//! ```
//!
//! # Available Transports
//!
//! | Transport | Feature Flag | Description |
//! |-----------|--------------|-------------|
//! | `NatsTransport` | `nats` | Core NATS, or JetStream with a durable group |
//! | `MemoryTransport` | default | Recording transport for tests and dry runs |

mod managed;
mod memory;
mod nats;
mod pool;
mod types;

pub use managed::Connector;
pub use memory::{MemoryTransport, PublishedMessage};
pub use nats::NatsTransport;
pub use pool::ConnectorPool;
pub use types::{
    BrokerError, BrokerSession, BrokerTransport, ConnectorError, ConnectorHealthReport,
    ConnectorId, ConnectorState,
};
