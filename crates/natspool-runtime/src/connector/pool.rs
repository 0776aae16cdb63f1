//! Connector pool: at most one live connector per configuration fingerprint

use super::managed::Connector;
use super::types::{BrokerTransport, ConnectorError, ConnectorHealthReport, ConnectorId};
use natspool_core::{ConnectorConfig, Fingerprint};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Per-fingerprint creation slot. The first caller initialises it while
/// concurrent callers for the same fingerprint wait on the same cell.
type Slot = Arc<OnceCell<Arc<Connector>>>;

pub(crate) struct PoolInner {
    name: String,
    transport: Arc<dyn BrokerTransport>,
    slots: Mutex<FxHashMap<Fingerprint, Slot>>,
    live: Mutex<FxHashMap<ConnectorId, Arc<Connector>>>,
}

impl PoolInner {
    /// Add a freshly activated connector to the identity index.
    pub(crate) fn register(&self, connector: Arc<Connector>) {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(connector.id(), connector);
    }

    /// Remove `id` from both indices. The fingerprint slot is only dropped
    /// while it still holds this very connector, so a newer connector
    /// created under the same fingerprint is left alone.
    pub(crate) fn remove_by_identity(&self, id: ConnectorId) -> bool {
        let removed = self
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        let Some(connector) = removed else {
            return false;
        };

        let fingerprint = connector.fingerprint();
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let owns_slot = slots
            .get(&fingerprint)
            .and_then(|slot| slot.get())
            .is_some_and(|current| current.id() == id);
        if owns_slot {
            slots.remove(&fingerprint);
        }
        drop(slots);

        debug!(
            "Pool {}: removed connector {} ({})",
            self.name,
            id,
            fingerprint.short()
        );
        true
    }
}

/// Registry of shared connectors keyed by configuration fingerprint.
///
/// Cheap to clone; clones share the same state. Create one per process (or
/// per test) and call [`shutdown`](Self::shutdown) on the way out.
///
/// ```rust
/// use natspool_core::ConnectorConfig;
/// use natspool_runtime::connector::{ConnectorPool, MemoryTransport};
/// use std::sync::Arc;
///
/// # tokio_test_block_on(async {
/// let pool = ConnectorPool::new("example", Arc::new(MemoryTransport::new()));
/// let config = ConnectorConfig::builder("nats://localhost:4222")
///     .subject("orders")
///     .build()?;
///
/// let connector = pool.get_or_create(&config).await?;
/// connector.publish(b"{\"id\":1}", None).await?;
/// pool.release(&connector);
///
/// pool.shutdown().await;
/// assert_eq!(pool.size(), 0);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # }).unwrap();
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectorPool {
    inner: Arc<PoolInner>,
}

impl ConnectorPool {
    pub fn new(name: &str, transport: Arc<dyn BrokerTransport>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: name.to_string(),
                transport,
                slots: Mutex::new(FxHashMap::default()),
                live: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Return the live connector for `config`, creating it if needed.
    ///
    /// Creation opens the broker connection. Concurrent callers with the
    /// same fingerprint share a single creation: one of them connects, the
    /// others wait and receive the same connector. If creation fails the
    /// error goes to the caller that attempted it and nothing is left in the
    /// pool; a later call tries again. A connector found closed is never
    /// returned.
    pub async fn get_or_create(
        &self,
        config: &ConnectorConfig,
    ) -> Result<Arc<Connector>, ConnectorError> {
        let fingerprint = config.fingerprint();

        loop {
            let slot = {
                let mut slots = self.inner.slots.lock().unwrap_or_else(|e| e.into_inner());
                slots.entry(fingerprint).or_default().clone()
            };

            let connector = slot
                .get_or_try_init(|| self.create(config))
                .await?
                .clone();

            if !connector.state().is_terminal() {
                return Ok(connector);
            }

            // Closed between lookup and return: drop the stale slot and retry.
            debug!(
                "Pool {}: connector {} for {} is closed, creating a new one",
                self.inner.name,
                connector.id(),
                fingerprint.short()
            );
            let mut slots = self.inner.slots.lock().unwrap_or_else(|e| e.into_inner());
            if slots
                .get(&fingerprint)
                .is_some_and(|current| Arc::ptr_eq(current, &slot))
            {
                slots.remove(&fingerprint);
            }
        }
    }

    async fn create(&self, config: &ConnectorConfig) -> Result<Arc<Connector>, ConnectorError> {
        let connector = Connector::new(config.clone(), Arc::downgrade(&self.inner));
        connector.activate(self.inner.transport.as_ref()).await?;
        info!(
            "Pool {}: created connector {} for {} ({} live)",
            self.inner.name,
            connector.id(),
            config.fingerprint().short(),
            self.size()
        );
        Ok(connector)
    }

    /// Hand a connector back. Informational only: the connector stays in
    /// the pool until it idles out or is closed.
    pub fn release(&self, connector: &Connector) {
        debug!(
            "Pool {}: connector {} released ({})",
            self.inner.name,
            connector.id(),
            connector.state()
        );
    }

    /// Close the connector with this identity and drop it from the pool.
    /// Waits for an in-flight publish on it to finish. Idempotent; returns
    /// `true` only for the call that closed it.
    pub async fn remove_by_identity(&self, id: ConnectorId) -> bool {
        match self.get(id) {
            Some(connector) => connector.close_for_removal().await,
            None => false,
        }
    }

    /// Number of live connectors.
    pub fn size(&self) -> usize {
        self.inner
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Identities of live connectors, in creation order.
    pub fn connector_ids(&self) -> Vec<ConnectorId> {
        let mut ids: Vec<ConnectorId> = self
            .inner
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Fingerprints of live connectors.
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        let mut fingerprints: Vec<Fingerprint> = self
            .live_connectors()
            .iter()
            .map(|c| c.fingerprint())
            .collect();
        fingerprints.sort_unstable();
        fingerprints.dedup();
        fingerprints
    }

    /// Look up a live connector by identity.
    pub fn get(&self, id: ConnectorId) -> Option<Arc<Connector>> {
        self.inner
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn health_reports(&self) -> Vec<ConnectorHealthReport> {
        self.live_connectors().iter().map(|c| c.health()).collect()
    }

    /// Close every live connector. Connectors requested afterwards are
    /// created fresh.
    pub async fn shutdown(&self) {
        let connectors = self.live_connectors();
        let count = connectors.len();

        futures::future::join_all(connectors.iter().map(|c| c.close_for_shutdown())).await;

        info!(
            "Pool {} shut down ({} connectors closed)",
            self.inner.name, count
        );
    }

    fn live_connectors(&self) -> Vec<Arc<Connector>> {
        let mut connectors: Vec<Arc<Connector>> = self
            .inner
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        connectors.sort_unstable_by_key(|c| c.id());
        connectors
    }
}

impl std::fmt::Debug for ConnectorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorPool")
            .field("name", &self.inner.name)
            .field("transport", &self.inner.transport.name())
            .field("size", &self.size())
            .finish()
    }
}
