//! Process termination signals.
//!
//! On Unix SIGINT, SIGTERM and SIGQUIT all request a graceful shutdown.
//! Elsewhere only Ctrl-C is awaited.

use std::io;

/// Completes on the first termination signal and returns its name.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}
