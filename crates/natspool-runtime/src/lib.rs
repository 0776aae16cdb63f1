//! natspool Runtime - pooled NATS publishing
//!
//! This crate provides the connector pool that lets many concurrent
//! producers share one broker connection per configuration, and the idle
//! eviction that closes connections nobody has published through lately.

pub mod connector;
mod eviction;

pub use connector::{
    BrokerError, BrokerSession, BrokerTransport, Connector, ConnectorError,
    ConnectorHealthReport, ConnectorId, ConnectorPool, ConnectorState, MemoryTransport,
    NatsTransport,
};
pub use natspool_core::{ConfigError, ConnectorConfig, Fingerprint};
