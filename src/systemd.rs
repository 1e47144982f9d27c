//! sd_notify integration for running under a systemd `Type=notify` unit.
//!
//! All methods are no-ops when disabled or on non-Linux platforms.

use crate::sync::SyncStatus;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SystemdNotifier {
    enabled: bool,
}

enum Notice<'a> {
    Ready,
    Stopping,
    Status(&'a str),
}

impl SystemdNotifier {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub(crate) fn notify_ready(&self) {
        self.send(Notice::Ready);
    }

    pub(crate) fn notify_stopping(&self) {
        self.send(Notice::Stopping);
    }

    /// Publish the controller status as the unit's STATUS line.
    pub(crate) fn notify_sync_status(&self, status: SyncStatus) {
        self.send(Notice::Status(&status_line(status)));
    }

    fn send(&self, notice: Notice<'_>) {
        if self.enabled {
            send_impl(notice);
        }
    }
}

#[cfg(target_os = "linux")]
fn send_impl(notice: Notice<'_>) {
    use sd_notify::NotifyState;

    let state = match notice {
        Notice::Ready => NotifyState::Ready,
        Notice::Stopping => NotifyState::Stopping,
        Notice::Status(msg) => NotifyState::Status(msg),
    };
    if let Err(e) = sd_notify::notify(false, &[state]) {
        tracing::debug!(error = %e, "sd_notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn send_impl(_notice: Notice<'_>) {}

fn status_line(status: SyncStatus) -> String {
    match status {
        SyncStatus::Idle => "Idle".to_string(),
        SyncStatus::Syncing { remaining } => format!("Syncing, {remaining} photos remaining"),
    }
}
