//! Idle eviction timer
//!
//! Each connector owns one [`IdleTimer`]. Arming it replaces any pending
//! task, so the deadline slides forward with every publish. A fired task
//! hands its generation back to the owner, which ignores it if the timer
//! was re-armed or cancelled in the meantime.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// Sliding-window idle timer with at most one outstanding task.
#[derive(Debug)]
pub(crate) struct IdleTimer {
    timeout: Option<Duration>,
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl IdleTimer {
    /// A `None` timeout never fires.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            generation: 0,
            handle: None,
        }
    }

    /// (Re)start the countdown.
    ///
    /// `on_fire` receives the generation it was armed with and must check
    /// it with [`is_current`](Self::is_current) before acting.
    pub fn arm<F, Fut>(&mut self, on_fire: F)
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(timeout) = self.timeout else {
            return;
        };

        self.generation += 1;
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }

        let generation = self.generation;
        trace!("Idle timer armed (generation {}, {:?})", generation, timeout);
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            on_fire(generation).await;
        }));
    }

    /// Stop the countdown from outside the timer task.
    pub fn cancel(&mut self) {
        self.generation += 1;
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Invalidate the countdown from inside the firing task.
    ///
    /// Unlike [`cancel`](Self::cancel) this does not abort the task, which
    /// is still running the eviction.
    pub fn expire(&mut self) {
        self.generation += 1;
        self.handle = None;
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && self.generation == generation
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
