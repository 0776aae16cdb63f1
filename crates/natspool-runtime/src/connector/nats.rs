//! NATS transport using async-nats
//!
//! Without a durable group, messages go out on core NATS and `publish`
//! returns once the client has accepted them (at-most-once). With a durable
//! group, messages go through JetStream and `publish` waits for the server
//! acknowledgement.

use super::types::{BrokerError, BrokerSession, BrokerTransport};
use async_trait::async_trait;
use natspool_core::ConnectorConfig;

#[cfg(feature = "nats")]
mod nats_impl {
    use super::*;
    use natspool_core::Credentials;
    use tracing::{debug, info};

    /// Transport opening one async-nats client per connector.
    #[derive(Debug, Clone, Default)]
    pub struct NatsTransport {
        _private: (),
    }

    impl NatsTransport {
        pub fn new() -> Self {
            Self::default()
        }
    }

    /// Build async-nats ConnectOptions from the connector config.
    fn build_connect_options(
        config: &ConnectorConfig,
        connection_name: &str,
    ) -> async_nats::ConnectOptions {
        let mut opts = async_nats::ConnectOptions::new().name(connection_name);
        match config.credentials() {
            Some(Credentials::UserPassword { username, password }) => {
                opts = opts.user_and_password(username.clone(), password.expose().to_string());
            }
            Some(Credentials::Token(token)) => {
                opts = opts.token(token.expose().to_string());
            }
            None => {}
        }
        opts
    }

    #[async_trait]
    impl BrokerTransport for NatsTransport {
        fn name(&self) -> &str {
            "nats"
        }

        async fn connect(
            &self,
            config: &ConnectorConfig,
            connection_name: &str,
        ) -> Result<Box<dyn BrokerSession>, BrokerError> {
            let opts = build_connect_options(config, connection_name);
            let client = async_nats::connect_with_options(config.url(), opts)
                .await
                .map_err(|e| BrokerError::Connect(e.to_string()))?;

            let jetstream = config
                .durable_group()
                .map(|_| async_nats::jetstream::new(client.clone()));

            info!(
                "NATS {} connected to {}{}",
                connection_name,
                config.url(),
                config
                    .durable_group()
                    .map(|g| format!(" (durable group {})", g))
                    .unwrap_or_default()
            );

            Ok(Box::new(NatsSession {
                connection_name: connection_name.to_string(),
                client,
                jetstream,
            }))
        }
    }

    struct NatsSession {
        connection_name: String,
        client: async_nats::Client,
        jetstream: Option<async_nats::jetstream::Context>,
    }

    impl NatsSession {
        /// A failure on a disconnected client means the connection is gone;
        /// anything else is a per-message rejection.
        fn classify(&self, reason: String) -> BrokerError {
            match self.client.connection_state() {
                async_nats::connection::State::Disconnected => BrokerError::ConnectionLost(reason),
                _ => BrokerError::Rejected(reason),
            }
        }
    }

    #[async_trait]
    impl BrokerSession for NatsSession {
        async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BrokerError> {
            let payload = payload.to_vec();
            match &self.jetstream {
                Some(jetstream) => {
                    let ack = jetstream
                        .publish(subject.to_string(), payload.into())
                        .await
                        .map_err(|e| self.classify(format!("jetstream publish: {}", e)))?;
                    ack.await
                        .map_err(|e| self.classify(format!("jetstream ack: {}", e)))?;
                }
                None => {
                    self.client
                        .publish(subject.to_string(), payload.into())
                        .await
                        .map_err(|e| self.classify(format!("nats publish: {}", e)))?;
                }
            }
            Ok(())
        }

        async fn flush(&self) -> Result<(), BrokerError> {
            self.client
                .flush()
                .await
                .map_err(|e| self.classify(format!("nats flush: {}", e)))
        }

        async fn close(&self) -> Result<(), BrokerError> {
            // Only flushes. The connection itself goes away when the last
            // `Client` clone is dropped, which happens when the connector
            // drops this session right after `close` returns.
            let result = self.client.flush().await;
            debug!("NATS {} released", self.connection_name);
            result.map_err(|e| BrokerError::ConnectionLost(format!("nats flush on close: {}", e)))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn connect_options_accept_credentials() {
            let config = ConnectorConfig::builder("nats://localhost:4222")
                .subject("a")
                .user_and_password("alice", "secret")
                .build()
                .unwrap();
            let _opts = build_connect_options(&config, "natspool-1");

            let config = ConnectorConfig::builder("nats://localhost:4222")
                .subject("a")
                .token("t0k3n")
                .build()
                .unwrap();
            let _opts = build_connect_options(&config, "natspool-2");
        }
    }
}

#[cfg(feature = "nats")]
pub use nats_impl::NatsTransport;

// Stub when nats feature is disabled
#[cfg(not(feature = "nats"))]
#[derive(Debug, Clone, Default)]
pub struct NatsTransport {
    _private: (),
}

#[cfg(not(feature = "nats"))]
impl NatsTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(not(feature = "nats"))]
#[async_trait]
impl BrokerTransport for NatsTransport {
    fn name(&self) -> &str {
        "nats"
    }

    async fn connect(
        &self,
        _config: &ConnectorConfig,
        _connection_name: &str,
    ) -> Result<Box<dyn BrokerSession>, BrokerError> {
        Err(BrokerError::NotAvailable(
            "NATS requires 'nats' feature".to_string(),
        ))
    }
}

#[cfg(all(test, not(feature = "nats")))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_reports_missing_feature() {
        let config = ConnectorConfig::builder("nats://localhost:4222")
            .subject("a")
            .build()
            .unwrap();
        let err = NatsTransport::new()
            .connect(&config, "natspool-1")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BrokerError::NotAvailable(_)));
    }
}
