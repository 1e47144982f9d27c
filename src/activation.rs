//! "Became active" event source.
//!
//! The sync controller subscribes once on construction and unsubscribes on
//! teardown. Events carry no payload. [`ActivationBus`] is the in-process
//! implementation; the binary feeds it from startup, SIGHUP and the watch
//! interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// Callback invoked on every activation.
pub type ActivationHandler = Arc<dyn Fn() + Send + Sync>;

/// Token identifying one subscription, returned by [`ActivationSignal::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub trait ActivationSignal: Send + Sync {
    fn subscribe(&self, handler: ActivationHandler) -> SubscriptionId;

    /// Removing an unknown or already removed subscription is a no-op.
    fn unsubscribe(&self, id: SubscriptionId);
}

#[derive(Default)]
pub struct ActivationBus {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, ActivationHandler)>>,
}

impl std::fmt::Debug for ActivationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationBus")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl ActivationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an activation to every current subscriber.
    ///
    /// Handlers run on the caller's thread after the subscriber list lock is
    /// released, so a handler may subscribe or unsubscribe.
    pub fn fire(&self) {
        let handlers: Vec<ActivationHandler> = match self.handlers.lock() {
            Ok(guard) => guard.iter().map(|(_, h)| Arc::clone(h)).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Activation subscriber list poisoned");
                return;
            }
        };
        tracing::debug!(subscribers = handlers.len(), "Firing activation");
        for handler in handlers {
            handler();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().map(|h| h.len()).unwrap_or(0)
    }
}

impl ActivationSignal for ActivationBus {
    fn subscribe(&self, handler: ActivationHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.push((id, handler));
        }
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.retain(|(existing, _)| *existing != id);
        }
    }
}

/// Fire `bus` on every SIGHUP until `shutdown` is cancelled.
///
/// On non-unix targets this only waits for shutdown.
pub(crate) fn spawn_sighup_activation(
    bus: Arc<ActivationBus>,
    shutdown: CancellationToken,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    #[cfg(unix)]
    let mut sighup = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::hangup())?
    };

    #[cfg(unix)]
    let listener = async move {
        loop {
            tokio::select! {
                received = sighup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    tracing::info!("Received SIGHUP, treating as activation");
                    bus.fire();
                }
                _ = shutdown.cancelled() => break,
            }
        }
    };

    #[cfg(not(unix))]
    let listener = {
        drop(bus);
        async move { shutdown.cancelled().await }
    };

    Ok(tokio::spawn(listener))
}
