//! Stream admission and graceful shutdown.
//!
//! Every relayed response holds a [`StreamGuard`] for its whole lifetime.
//! The guard owns one of `max_streams` semaphore permits, so the permit
//! count is both the capacity limit and the active-stream gauge. Shutdown
//! closes the semaphore, which refuses new streams, and flips a watch
//! channel that in-flight relays select on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore};

use crate::metrics;

/// Admission control and shutdown signal shared by all requests.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    max_streams: usize,
    slots: Arc<Semaphore>,
    stopping_tx: watch::Sender<bool>,
    drained: Notify,
    next_session_id: AtomicU64,
}

impl ShutdownCoordinator {
    /// Coordinator admitting at most `max_streams` concurrent streams.
    pub fn new(max_streams: usize) -> Self {
        let (stopping_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                max_streams,
                slots: Arc::new(Semaphore::new(max_streams)),
                stopping_tx,
                drained: Notify::new(),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Stop admitting streams and tell running relays to end.
    pub fn shutdown(&self) {
        self.inner.slots.close();
        self.inner.stopping_tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.stopping_tx.borrow()
    }

    /// Receiver that changes to `true` once shutdown starts.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.stopping_tx.subscribe()
    }

    /// Resolves once shutdown has been signaled.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.subscribe();
        // The sender lives in `self`, so this only errs at teardown.
        let _ = rx.wait_for(|stopping| *stopping).await;
    }

    /// Admit a new stream.
    ///
    /// `None` when all slots are taken or shutdown has started.
    pub fn register_stream(&self) -> Option<StreamGuard> {
        let permit = self.inner.slots.clone().try_acquire_owned().ok()?;
        let id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        metrics::set_active_streams(self.active_streams());

        Some(StreamGuard {
            coordinator: self.clone(),
            permit: Some(permit),
            id,
        })
    }

    /// Streams currently holding a slot.
    pub fn active_streams(&self) -> u64 {
        let free = self.inner.slots.available_permits();
        self.inner.max_streams.saturating_sub(free) as u64
    }

    /// Slots still free for new streams.
    pub fn available_streams(&self) -> usize {
        if self.is_shutdown() {
            return 0;
        }
        self.inner.slots.available_permits()
    }

    /// Wait until no stream holds a slot.
    pub async fn wait_for_drain(&self) {
        loop {
            // Register interest before reading the count so a release in
            // between is not missed.
            let drained = self.inner.drained.notified();
            if self.active_streams() == 0 {
                return;
            }
            drained.await;
        }
    }

    fn release(&self, permit: OwnedSemaphorePermit) {
        drop(permit);
        let active = self.active_streams();
        metrics::set_active_streams(active);
        if active == 0 {
            self.inner.drained.notify_waiters();
        }
    }
}

/// One admitted stream. Releases its slot on drop.
pub struct StreamGuard {
    coordinator: ShutdownCoordinator,
    permit: Option<OwnedSemaphorePermit>,
    id: u64,
}

impl StreamGuard {
    /// Relay-local session id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.coordinator.subscribe()
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.coordinator.release(permit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_admission_is_bounded() {
        let coordinator = ShutdownCoordinator::new(2);

        let first = coordinator.register_stream().unwrap();
        let second = coordinator.register_stream().unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(coordinator.active_streams(), 2);
        assert!(coordinator.register_stream().is_none());

        drop(first);
        assert_eq!(coordinator.active_streams(), 1);
        assert_eq!(coordinator.available_streams(), 1);
        assert!(coordinator.register_stream().is_some());
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_streams() {
        let coordinator = ShutdownCoordinator::new(4);
        let running = coordinator.register_stream().unwrap();
        let mut rx = running.subscribe();

        coordinator.shutdown();

        assert!(coordinator.is_shutdown());
        assert!(coordinator.register_stream().is_none());
        assert_eq!(coordinator.available_streams(), 0);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());

        tokio::time::timeout(Duration::from_secs(1), coordinator.wait_for_shutdown())
            .await
            .expect("shutdown already signaled");
    }

    #[tokio::test]
    async fn test_wait_for_drain() {
        let coordinator = ShutdownCoordinator::new(4);
        let guard = coordinator.register_stream().unwrap();

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.wait_for_drain().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("drain completes")
            .unwrap();
    }

    #[tokio::test]
    async fn test_drain_after_shutdown_counts_running_streams() {
        let coordinator = ShutdownCoordinator::new(3);
        let guard = coordinator.register_stream().unwrap();
        coordinator.shutdown();
        assert_eq!(coordinator.active_streams(), 1);

        drop(guard);
        assert_eq!(coordinator.active_streams(), 0);
        tokio::time::timeout(Duration::from_secs(1), coordinator.wait_for_drain())
            .await
            .expect("nothing left to drain");
    }
}
