//! Termination signals for the sync daemon.
//!
//! The first SIGINT or SIGTERM cancels the token handed back by
//! [`install_signal_handler`], which makes `run_sync` stop firing activations
//! and shut the controller down. Any further signal exits with status 130.
//! SIGHUP means "sync now" and lives in [`crate::activation`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Spawn the listener and return the token it cancels on the first signal.
pub(crate) fn install_signal_handler() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    let signals = Arc::new(AtomicU32::new(0));

    #[cfg(unix)]
    let mut sigterm = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())?
    };

    let handler_token = token.clone();
    tokio::spawn(async move {
        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }

            #[cfg(not(unix))]
            {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "Cannot listen for Ctrl+C, daemon must be killed");
                    return;
                }
            }

            if signals.fetch_add(1, Ordering::SeqCst) == 0 {
                tracing::info!("Termination requested, stopping photo sync (repeat to exit now)");
                handler_token.cancel();
            } else {
                tracing::warn!("Second termination signal, exiting without teardown");
                std::process::exit(130);
            }
        }
    });

    Ok(token)
}
