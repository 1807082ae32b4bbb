//! Termination signals for the host process
//!
//! The host stops its modules in dependency order on the first signal. A
//! second signal while that is still running skips the orderly stop and
//! releases every module process directly.

use std::fmt;
use tokio::signal;
use tracing::warn;

/// Signal that asked the host to exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM
    Terminate,
    /// SIGINT or Ctrl+C
    Interrupt,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Terminate => f.write_str("SIGTERM"),
            ShutdownSignal::Interrupt => f.write_str("SIGINT"),
        }
    }
}

/// Wait until the host is asked to exit
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> ShutdownSignal {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Failed to register SIGTERM handler, listening for Ctrl+C only: {}", e);
            return ctrl_c().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => ShutdownSignal::Terminate,
        signal = ctrl_c() => signal,
    }
}

/// Wait until the host is asked to exit
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> ShutdownSignal {
    ctrl_c().await
}

async fn ctrl_c() -> ShutdownSignal {
    if let Err(e) = signal::ctrl_c().await {
        // Without a handler the host would never exit on its own
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    ShutdownSignal::Interrupt
}
