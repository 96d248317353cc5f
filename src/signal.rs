//! Shutdown signalling.
//!
//! OS signals and the control protocol both end up cancelling one
//! [`CancellationToken`]; whoever owns the token then runs the cleanup.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Listens for termination signals and cancels a token when one arrives.
///
/// If handlers cannot be registered the guard still exists, but only the
/// protocol (exit command, closed input) can trigger shutdown.
pub struct ShutdownGuard {
    task: tokio::task::JoinHandle<()>,
}

impl ShutdownGuard {
    pub fn new(token: CancellationToken) -> Self {
        let task = tokio::spawn(async move {
            if let Some(name) = wait_for_signal().await {
                info!("Received {}, shutting down and cleaning up firewall rules...", name);
                token.cancel();
            }
        });
        Self { task }
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> Option<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut streams = Vec::new();
    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
        (SignalKind::hangup(), "SIGHUP"),
    ] {
        match signal(kind) {
            Ok(stream) => streams.push((stream, name)),
            Err(e) => warn!("Failed to register {} handler: {}", name, e),
        }
    }

    if streams.is_empty() {
        warn!("No signal handlers registered - signal cleanup disabled");
        return None;
    }

    let waits = streams.iter_mut().map(|(stream, name)| {
        let name = *name;
        Box::pin(async move {
            stream.recv().await;
            name
        })
    });
    let (name, _, _) = futures::future::select_all(waits).await;
    Some(name)
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Option<&'static str> {
    match tokio::signal::ctrl_c().await {
        Ok(()) => Some("Ctrl-C"),
        Err(e) => {
            warn!("Failed to register Ctrl-C handler: {} - signal cleanup disabled", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_drop_does_not_cancel() {
        let token = CancellationToken::new();
        drop(ShutdownGuard::new(token.clone()));
        assert!(!token.is_cancelled());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_guard_cancels_on_sighup() {
        use std::time::Duration;

        let token = CancellationToken::new();
        let _guard = ShutdownGuard::new(token.clone());
        // Let the guard register its handlers first
        tokio::time::sleep(Duration::from_millis(50)).await;

        // SAFETY: signalling our own process; the handler above consumes it
        unsafe {
            libc::kill(libc::getpid(), libc::SIGHUP);
        }
        tokio::time::timeout(Duration::from_secs(2), token.cancelled())
            .await
            .expect("token not cancelled");
    }
}
