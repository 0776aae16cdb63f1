//! Managed connector: one broker connection shared by every producer that
//! asks the pool for the same configuration.
//!
//! All state changes happen under a single per-connector async mutex.
//! "check state, publish, reset the idle timer" and "check state, release
//! the session, leave the pool" are each one critical section on that lock,
//! so a publish never sees a half-closed session and a close never cuts a
//! publish in half.

use super::pool::PoolInner;
use super::types::{
    BrokerError, BrokerSession, BrokerTransport, ConnectorError, ConnectorHealthReport,
    ConnectorId, ConnectorState,
};
use crate::eviction::IdleTimer;
use natspool_core::{compose_subject, validate_subject, ConnectorConfig, Fingerprint};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Why a connector is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Explicit,
    Idle,
    ConnectionLost,
    Removed,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::Explicit => "closed by caller",
            CloseReason::Idle => "idle timeout",
            CloseReason::ConnectionLost => "connection lost",
            CloseReason::Removed => "removed from pool",
            CloseReason::Shutdown => "pool shutdown",
        };
        f.write_str(s)
    }
}

struct Inner {
    session: Option<Box<dyn BrokerSession>>,
    timer: IdleTimer,
}

/// A pooled connector owning exactly one broker session.
///
/// Obtained from [`ConnectorPool::get_or_create`](super::ConnectorPool::get_or_create)
/// and shared as `Arc<Connector>`. Once closed it stays closed; callers
/// holding a stale handle get [`ConnectorError::Unavailable`] and should ask
/// the pool again.
pub struct Connector {
    id: ConnectorId,
    config: ConnectorConfig,
    connection_name: String,
    pool: Weak<PoolInner>,
    me: Weak<Connector>,
    /// Mirrors the state for lock-free reads; only written under `inner`.
    state: AtomicU8,
    inner: Mutex<Inner>,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    last_error: StdMutex<Option<String>>,
    last_publish: StdMutex<Option<Instant>>,
}

impl Connector {
    pub(crate) fn new(config: ConnectorConfig, pool: Weak<PoolInner>) -> Arc<Self> {
        let id = ConnectorId::next();
        let connection_name = format!("{}-{}", config.connection_name(), id.as_u64());
        let timer = IdleTimer::new(config.idle_timeout());

        Arc::new_cyclic(|me| Self {
            id,
            config,
            connection_name,
            pool,
            me: me.clone(),
            state: AtomicU8::new(ConnectorState::Created.as_u8()),
            inner: Mutex::new(Inner {
                session: None,
                timer,
            }),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            last_error: StdMutex::new(None),
            last_publish: StdMutex::new(None),
        })
    }

    /// Open the broker session and move `Created -> Active`.
    ///
    /// On success the connector is registered in the pool's identity index
    /// and the idle timer is armed, both before the lock is released. On
    /// failure the connector ends `Closed` and is never registered.
    pub(crate) async fn activate(
        self: &Arc<Self>,
        transport: &dyn BrokerTransport,
    ) -> Result<(), ConnectorError> {
        let mut inner = self.inner.lock().await;
        if self.state() != ConnectorState::Created {
            return Err(ConnectorError::Unavailable(self.id));
        }

        let session = match transport.connect(&self.config, &self.connection_name).await {
            Ok(session) => session,
            Err(e) => {
                self.set_state(ConnectorState::Closed);
                self.record_error(&e.to_string());
                warn!(
                    "Connector {} failed to connect to {}: {}",
                    self.id,
                    self.config.url(),
                    e
                );
                return Err(match e {
                    BrokerError::NotAvailable(msg) => ConnectorError::NotAvailable(msg),
                    other => ConnectorError::ConnectionFailed(other.to_string()),
                });
            }
        };

        inner.session = Some(session);
        self.set_state(ConnectorState::Active);
        if let Some(pool) = self.pool.upgrade() {
            pool.register(self.clone());
        }
        self.arm_idle_timer(&mut inner);

        info!(
            "Connector {} ({}) connected to {} via {} for subjects {:?}",
            self.id,
            self.connection_name,
            self.config.url(),
            transport.name(),
            self.config.subjects()
        );
        Ok(())
    }

    /// Publish `payload` on every configured subject, in configuration
    /// order. With a `subject_suffix`, each subject is extended by it.
    ///
    /// The idle timer is reset before anything is sent, whether or not the
    /// publish succeeds. Publishing stops at the first failing subject.
    /// A rejected message leaves the connector usable; a lost connection
    /// closes it before the error is returned. A suffix that would produce an
    /// invalid subject is reported before anything is sent.
    pub async fn publish(
        &self,
        payload: &[u8],
        subject_suffix: Option<&str>,
    ) -> Result<(), ConnectorError> {
        let mut inner = self.inner.lock().await;
        if self.state() != ConnectorState::Active {
            return Err(ConnectorError::Unavailable(self.id));
        }
        self.arm_idle_timer(&mut inner);

        let targets = match subject_suffix {
            Some(suffix) => {
                let targets: Vec<String> = self
                    .config
                    .subjects()
                    .iter()
                    .map(|subject| compose_subject(subject, suffix))
                    .collect();
                for target in &targets {
                    validate_subject(target)?;
                }
                targets
            }
            None => self.config.subjects().to_vec(),
        };

        let mut failure = None;
        if let Some(session) = inner.session.as_deref() {
            for target in targets {
                if let Err(e) = session.publish(&target, payload).await {
                    failure = Some((target, e));
                    break;
                }
                self.messages_published.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            return Err(ConnectorError::Unavailable(self.id));
        }

        match failure {
            None => {
                *self
                    .last_publish
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
                Ok(())
            }
            Some((subject, e)) => {
                self.publish_failures.fetch_add(1, Ordering::Relaxed);
                let message = format!("{}: {}", subject, e);
                self.record_error(&message);
                if let BrokerError::ConnectionLost(_) = e {
                    warn!("Connector {} lost its connection on {}", self.id, subject);
                    self.shutdown_locked(&mut inner, CloseReason::ConnectionLost)
                        .await;
                }
                Err(ConnectorError::SendFailed(message))
            }
        }
    }

    /// Flush the session's outgoing buffer.
    pub async fn flush(&self) -> Result<(), ConnectorError> {
        let mut inner = self.inner.lock().await;
        if self.state() != ConnectorState::Active {
            return Err(ConnectorError::Unavailable(self.id));
        }
        let result = match inner.session.as_deref() {
            Some(session) => session.flush().await,
            None => return Err(ConnectorError::Unavailable(self.id)),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                self.record_error(&e.to_string());
                if let BrokerError::ConnectionLost(_) = e {
                    self.shutdown_locked(&mut inner, CloseReason::ConnectionLost)
                        .await;
                }
                Err(ConnectorError::SendFailed(e.to_string()))
            }
        }
    }

    /// Close the connector. Idempotent: only the first call releases the
    /// session and leaves the pool.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        self.shutdown_locked(&mut inner, CloseReason::Explicit).await;
    }

    pub(crate) async fn close_for_shutdown(&self) {
        let mut inner = self.inner.lock().await;
        self.shutdown_locked(&mut inner, CloseReason::Shutdown).await;
    }

    /// Returns `false` if the connector was already closing or closed.
    pub(crate) async fn close_for_removal(&self) -> bool {
        let mut inner = self.inner.lock().await;
        self.shutdown_locked(&mut inner, CloseReason::Removed).await
    }

    /// Called by the idle timer task.
    async fn evict_idle(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        if !inner.timer.is_current(generation) || self.state() != ConnectorState::Active {
            debug!(
                "Connector {} ignoring stale idle timer (generation {})",
                self.id, generation
            );
            return;
        }
        inner.timer.expire();
        self.shutdown_locked(&mut inner, CloseReason::Idle).await;
    }

    /// `Active/Created -> Closing -> Closed`. Must be called with `inner`
    /// held. Returns `false` if the connector was already closing or closed.
    async fn shutdown_locked(&self, inner: &mut Inner, reason: CloseReason) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        self.set_state(ConnectorState::Closing);
        if reason != CloseReason::Idle {
            inner.timer.cancel();
        }

        if let Some(session) = inner.session.take() {
            if let Err(e) = session.close().await {
                warn!("Error closing connector {} session: {}", self.id, e);
            }
        }

        self.set_state(ConnectorState::Closed);
        if let Some(pool) = self.pool.upgrade() {
            pool.remove_by_identity(self.id);
        }

        info!(
            "Connector {} ({}) closed: {}",
            self.id, self.connection_name, reason
        );
        true
    }

    fn arm_idle_timer(&self, inner: &mut Inner) {
        let me = self.me.clone();
        inner.timer.arm(move |generation| async move {
            if let Some(connector) = me.upgrade() {
                connector.evict_idle(generation).await;
            }
        });
    }

    fn set_state(&self, state: ConnectorState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn record_error(&self, message: &str) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.to_string());
    }

    pub fn id(&self) -> ConnectorId {
        self.id
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.config.fingerprint()
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    pub fn state(&self) -> ConnectorState {
        ConnectorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectorState::Active
    }

    pub fn health(&self) -> ConnectorHealthReport {
        let last_error = self
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let seconds_since_last_publish = self
            .last_publish
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|t| t.elapsed().as_secs());

        ConnectorHealthReport {
            id: self.id,
            fingerprint: self.fingerprint().to_string(),
            connection_name: self.connection_name.clone(),
            url: self.config.url().to_string(),
            subjects: self.config.subjects().to_vec(),
            state: self.state(),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            last_error,
            seconds_since_last_publish,
        }
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("id", &self.id)
            .field("connection_name", &self.connection_name)
            .field("fingerprint", &self.fingerprint())
            .field("state", &self.state())
            .finish()
    }
}
