//! # natspool Core
//!
//! Value types shared by the natspool runtime and CLI.
//!
//! This crate has no async or I/O dependencies. It provides:
//!
//! - **Configuration**: the immutable [`ConnectorConfig`] and its builder
//! - **Fingerprints**: the deterministic key used to decide connection reuse
//! - **Subjects**: subject validation and composition rules
//! - **Security**: [`SecretString`] for credentials
//!
//! ## Quick Start
//!
//! ```rust
//! use natspool_core::ConnectorConfig;
//! use std::time::Duration;
//!
//! let a = ConnectorConfig::builder("nats://localhost:4222")
//!     .subjects(["orders", "audit"])
//!     .idle_timeout(Duration::from_secs(2))
//!     .build()
//!     .unwrap();
//!
//! let b = ConnectorConfig::builder("nats://localhost:4222")
//!     .subjects(["audit", "orders"])
//!     .idle_timeout(Duration::from_secs(2))
//!     .build()
//!     .unwrap();
//!
//! // Subject order does not matter for reuse.
//! assert_eq!(a.fingerprint(), b.fingerprint());
//! ```

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod security;
pub mod subject;

pub use config::{keys, parse_duration, ConnectorConfig, ConnectorConfigBuilder, Credentials};
pub use error::ConfigError;
pub use fingerprint::{fingerprint, Fingerprint};
pub use security::SecretString;
pub use subject::{compose_subject, validate_subject};
