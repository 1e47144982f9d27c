//! Sync controller: decides when a cycle is due and drains the photo list
//! through the downloader one photo at a time.
//!
//! State is only touched from two entry points, an activation and a download
//! completion. Both take the state lock for bookkeeping and release it before
//! calling any collaborator that may call back in, so downloaders are free to
//! complete synchronously from inside `download()` or `start()`.
//!
//! Activations are additionally serialized end to end, so a superseded task
//! is always cancelled before the next cycle starts its first download.
//! Activation handlers must therefore not fire the signal re-entrantly.
//!
//! Every issued download carries a ticket. A completion whose ticket is no
//! longer the in-flight one belongs to a cancelled or superseded download and
//! is dropped without writes or queue advancement.


use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use reqwest::Url;
use tokio::sync::watch;

use crate::activation::{ActivationSignal, SubscriptionId};
use crate::clock::Clock;
use crate::compress::{self, Compressor};
use crate::download::{DownloadError, DownloadTask, Downloader};
use crate::store::{compressed_key, ContentStore, LastSyncStore, PREVIOUS_SYNC_TIME_KEY};
use crate::types::Photo;

/// Minimum time between the start of two cycles: four hours, in seconds.
pub const DEFAULT_COOLDOWN_SECS: f64 = 4.0 * 60.0 * 60.0;

/// Externally observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    /// `remaining` counts queued photos plus the one in flight.
    Syncing { remaining: usize },
}

/// The pluggable pieces the controller drives.
#[derive(Clone)]
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub last_sync: Arc<dyn LastSyncStore>,
    pub content: Arc<dyn ContentStore>,
    pub compressor: Arc<dyn Compressor>,
    pub downloader: Arc<dyn Downloader>,
}

/// Whether a cycle should start at `now` given the last recorded start.
///
/// Missing, zero and negative timestamps all mean "never synced".
pub fn is_sync_due(previous: Option<f64>, now: f64, cooldown_secs: f64) -> bool {
    match previous {
        Some(previous) if previous > 0.0 => now - previous >= cooldown_secs,
        _ => true,
    }
}

struct InFlight {
    ticket: u64,
    cycle: u64,
    photo: Photo,
    /// `None` until `download()` has returned.
    task: Option<Arc<dyn DownloadTask>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct CycleStats {
    stored: usize,
    compressed: usize,
    failed: usize,
}

#[derive(Default)]
struct SyncState {
    queue: VecDeque<Photo>,
    in_flight: Option<InFlight>,
    next_ticket: u64,
    cycle: u64,
    syncing: bool,
    stats: CycleStats,
    torn_down: bool,
}

impl SyncState {
    fn status(&self) -> SyncStatus {
        let remaining = self.queue.len() + usize::from(self.in_flight.is_some());
        if remaining == 0 {
            SyncStatus::Idle
        } else {
            SyncStatus::Syncing { remaining }
        }
    }
}

enum PhotoOutcome {
    Stored { compressed: bool },
    NotStored,
    Failed,
}

pub struct SyncController {
    photos: Vec<Photo>,
    collaborators: Collaborators,
    cooldown_secs: f64,
    signal: Arc<dyn ActivationSignal>,
    subscription: Mutex<Option<SubscriptionId>>,
    /// Held for a whole activation, collaborator calls included.
    activation_gate: Mutex<()>,
    state: Mutex<SyncState>,
    status: watch::Sender<SyncStatus>,
    this: Weak<SyncController>,
}

impl std::fmt::Debug for SyncController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncController")
            .field("photos", &self.photos.len())
            .field("cooldown_secs", &self.cooldown_secs)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl SyncController {
    /// Build a controller and subscribe it to `signal`.
    ///
    /// The subscription only holds a weak reference, so dropping the last
    /// `Arc` tears the controller down.
    pub fn new(
        photos: Vec<Photo>,
        collaborators: Collaborators,
        signal: Arc<dyn ActivationSignal>,
        cooldown_secs: f64,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<SyncController>| {
            let handler_ref = this.clone();
            let subscription = signal.subscribe(Arc::new(move || {
                if let Some(controller) = handler_ref.upgrade() {
                    controller.handle_activation();
                }
            }));
            tracing::debug!(photos = photos.len(), cooldown_secs, "Sync controller subscribed");

            Self {
                photos,
                collaborators,
                cooldown_secs,
                signal,
                subscription: Mutex::new(Some(subscription)),
                activation_gate: Mutex::new(()),
                state: Mutex::new(SyncState::default()),
                status: watch::Sender::new(SyncStatus::Idle),
                this: this.clone(),
            }
        })
    }

    pub fn photos(&self) -> &[Photo] {
        &self.photos
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status transition.
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Unsubscribe from activations and cancel any in-flight download.
    ///
    /// Idempotent. Completions arriving afterwards are ignored.
    pub fn shutdown(&self) {
        self.unsubscribe();

        let cancelled = {
            let Some(mut state) = self.lock_state() else {
                return;
            };
            if state.torn_down {
                return;
            }
            state.torn_down = true;
            state.queue.clear();
            state.syncing = false;
            let cancelled = state.in_flight.take();
            self.publish(&state);
            cancelled
        };

        if let Some(task) = cancelled.and_then(|f| f.task) {
            task.cancel();
        }
        tracing::info!("Sync controller shut down");
    }

    fn unsubscribe(&self) {
        let subscription = match self.subscription.lock() {
            Ok(mut slot) => slot.take(),
            Err(e) => e.into_inner().take(),
        };
        if let Some(id) = subscription {
            self.signal.unsubscribe(id);
        }
    }

    fn lock_state(&self) -> Option<MutexGuard<'_, SyncState>> {
        match self.state.lock() {
            Ok(guard) => Some(guard),
            Err(e) => {
                tracing::error!(error = %e, "Sync state poisoned, ignoring event");
                None
            }
        }
    }

    fn publish(&self, state: &SyncState) {
        self.status.send_replace(state.status());
    }

    fn handle_activation(&self) {
        let _gate = self
            .activation_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let superseded = {
            let Some(mut state) = self.lock_state() else {
                return;
            };
            if state.torn_down {
                return;
            }
            if !self.begin_cycle_if_due() {
                return;
            }

            let superseded = state.in_flight.take();
            state.queue.clear();
            state.queue.extend(self.photos.iter().cloned());
            state.cycle += 1;
            state.syncing = true;
            state.stats = CycleStats::default();
            tracing::info!(
                cycle = state.cycle,
                photos = self.photos.len(),
                restarted = superseded.is_some(),
                "Starting sync cycle"
            );
            self.publish(&state);
            superseded
        };

        if let Some(previous) = superseded {
            tracing::debug!(uid = %previous.photo.uid, "Cancelling superseded download");
            if let Some(task) = previous.task {
                task.cancel();
            }
        }

        self.advance_queue();
    }

    /// Throttle check. Records the cycle start before returning `true`.
    fn begin_cycle_if_due(&self) -> bool {
        let now = self.collaborators.clock.now();
        let previous = match self.collaborators.last_sync.get(PREVIOUS_SYNC_TIME_KEY) {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read last sync time, assuming never synced");
                None
            }
        };

        if !is_sync_due(previous, now, self.cooldown_secs) {
            tracing::info!(
                elapsed_secs = previous.map(|p| now - p),
                cooldown_secs = self.cooldown_secs,
                "Last sync too recent, skipping"
            );
            return false;
        }

        if let Err(e) = self.collaborators.last_sync.set(PREVIOUS_SYNC_TIME_KEY, now) {
            tracing::warn!(error = %e, "Failed to record sync start time");
        }
        true
    }

    /// Start the next queued download unless one is already in flight.
    fn advance_queue(&self) {
        let (ticket, photo) = {
            let Some(mut state) = self.lock_state() else {
                return;
            };
            if state.torn_down || state.in_flight.is_some() {
                return;
            }
            let Some(photo) = state.queue.pop_front() else {
                if state.syncing {
                    state.syncing = false;
                    let stats = state.stats;
                    tracing::info!(
                        cycle = state.cycle,
                        stored = stats.stored,
                        compressed = stats.compressed,
                        failed = stats.failed,
                        "Sync cycle complete"
                    );
                }
                self.publish(&state);
                return;
            };

            state.next_ticket += 1;
            let ticket = state.next_ticket;
            state.in_flight = Some(InFlight {
                ticket,
                cycle: state.cycle,
                photo: photo.clone(),
                task: None,
            });
            self.publish(&state);
            (ticket, photo)
        };

        tracing::debug!(uid = %photo.uid, url = %photo.url, ticket, "Downloading photo");
        let controller = self.this.clone();
        let task: Arc<dyn DownloadTask> = Arc::from(self.collaborators.downloader.download(
            photo.url.clone(),
            Box::new(move |url, result| match controller.upgrade() {
                Some(controller) => controller.handle_completion(ticket, url, result),
                None => tracing::debug!(%url, "Sync controller gone, dropping completion"),
            }),
        ));

        let still_current = match self.lock_state() {
            Some(mut state) => match state.in_flight.as_mut() {
                Some(in_flight) if in_flight.ticket == ticket => {
                    in_flight.task = Some(Arc::clone(&task));
                    true
                }
                _ => false,
            },
            None => false,
        };

        if still_current {
            task.start();
        } else {
            // Already completed, superseded, or torn down while download() ran.
            task.cancel();
        }
    }

    fn handle_completion(&self, ticket: u64, url: Url, result: Result<Vec<u8>, DownloadError>) {
        let (photo, cycle) = {
            let Some(mut state) = self.lock_state() else {
                return;
            };
            match state.in_flight.take() {
                Some(in_flight) if in_flight.ticket == ticket && !state.torn_down => {
                    (in_flight.photo, in_flight.cycle)
                }
                other => {
                    state.in_flight = other;
                    tracing::debug!(%url, ticket, "Ignoring completion of superseded download");
                    return;
                }
            }
        };

        let outcome = self.persist(&photo, result);

        if let Some(mut state) = self.lock_state() {
            if state.cycle == cycle {
                match outcome {
                    PhotoOutcome::Stored { compressed } => {
                        state.stats.stored += 1;
                        state.stats.compressed += usize::from(compressed);
                    }
                    PhotoOutcome::NotStored => {}
                    PhotoOutcome::Failed => state.stats.failed += 1,
                }
            }
        }

        self.advance_queue();
    }

    /// Write the raw bytes and, when the image decodes and compresses, the
    /// compressed variant.
    fn persist(&self, photo: &Photo, result: Result<Vec<u8>, DownloadError>) -> PhotoOutcome {
        let data = match result {
            Ok(data) => data,
            Err(e) => {
                if e.is_cancelled() {
                    tracing::debug!(uid = %photo.uid, "Download cancelled");
                } else {
                    tracing::warn!(uid = %photo.uid, error = %e, "Download failed");
                }
                return PhotoOutcome::Failed;
            }
        };

        let content = &self.collaborators.content;
        let raw_stored = match content.set(&photo.uid, &data) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(uid = %photo.uid, error = %e, "Failed to store photo");
                false
            }
        };

        let compressed = compress::decode(&data)
            .and_then(|image| self.collaborators.compressor.compress(&image));
        let compressed_stored = match compressed {
            Some(bytes) => match content.set(&compressed_key(&photo.uid), &bytes) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(uid = %photo.uid, error = %e, "Failed to store compressed photo");
                    false
                }
            },
            None => {
                tracing::debug!(uid = %photo.uid, "No compressed variant produced");
                false
            }
        };

        tracing::debug!(
            uid = %photo.uid,
            bytes = data.len(),
            compressed = compressed_stored,
            "Photo processed"
        );

        if raw_stored {
            PhotoOutcome::Stored {
                compressed: compressed_stored,
            }
        } else {
            PhotoOutcome::NotStored
        }
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        self.unsubscribe();
        if let Ok(state) = self.state.get_mut() {
            if let Some(task) = state.in_flight.take().and_then(|f| f.task) {
                task.cancel();
            }
        }
    }
}
