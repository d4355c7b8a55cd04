//! # OS termination signals.
//!
//! [`wait_for_shutdown_signal`] completes when the process receives a termination
//! signal; [`Context::run_until_signal`](crate::Context::run_until_signal) uses it
//! to trigger a graceful stop.
//!
//! - Unix: `SIGINT`, `SIGTERM`, `SIGQUIT` (and Ctrl-C)
//! - other platforms: Ctrl-C via [`tokio::signal::ctrl_c`]

/// Waits for a termination signal; `Err` if signal registration fails.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = tokio::signal::ctrl_c() => "ctrl-c",
        _ = sigint.recv()  => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    tracing::info!(signal = name, "termination signal received");
    Ok(())
}

/// Waits for a termination signal; `Err` if signal registration fails.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!(signal = "ctrl-c", "termination signal received");
    Ok(())
}
