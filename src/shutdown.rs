//! # Process termination signals.
//!
//! [`cancel_on_signal`] links OS termination signals to the daemon's root
//! token: the first `SIGINT`, `SIGTERM` or `SIGQUIT` (Ctrl-C elsewhere)
//! cancels it. Later signals are ignored; shutdown is already underway.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Completes on the first termination signal.
///
/// # Errors
/// Fails if a signal handler cannot be installed.
#[cfg(unix)]
pub async fn termination_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };
    Ok(name)
}

/// Completes on the first termination signal.
#[cfg(not(unix))]
pub async fn termination_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

/// Cancels `root` when a termination signal arrives.
///
/// Returns early, without cancelling, if `root` is cancelled first. If signal
/// registration fails the root is cancelled so the daemon does not run
/// unstoppable.
pub async fn cancel_on_signal(root: CancellationToken) {
    tokio::select! {
        _ = root.cancelled() => {}
        res = termination_signal() => {
            match res {
                Ok(signal) => info!(signal, "termination signal received, shutting down.."),
                Err(e) => error!(error = %e, "failed to install signal handlers, shutting down"),
            }
            root.cancel();
        }
    }
}
