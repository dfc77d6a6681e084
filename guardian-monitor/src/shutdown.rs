//! Shutdown coordination
//!
//! Holds the daemon's running flag. Signal tasks flip it; the scheduler loop
//! observes it and performs cleanup itself.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Why shutdown was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Requested from inside the process
    Requested,
}

#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    running: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (running, _) = watch::channel(true);
        Self {
            running: Arc::new(running),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Flip the running flag. Returns `true` only for the first request.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let first = self.running.send_if_modified(|running| {
            let was_running = *running;
            *running = false;
            was_running
        });
        if first {
            info!("Shutdown requested ({:?})", reason);
        } else {
            debug!("Duplicate shutdown request ignored ({:?})", reason);
        }
        first
    }

    /// Sleep for `duration` unless shutdown arrives first.
    ///
    /// Returns `true` when the full duration elapsed while still running.
    pub async fn sleep_or_shutdown(&self, duration: Duration) -> bool {
        let mut rx = self.running.subscribe();
        if !*rx.borrow_and_update() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_running(),
            _ = rx.wait_for(|running| !*running) => false,
        }
    }

    /// Resolves once shutdown has been requested
    pub async fn stopped(&self) {
        let mut rx = self.running.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
    }

    /// Spawn listeners for SIGINT and SIGTERM.
    ///
    /// Both handlers are registered before any listener is spawned, so an
    /// error leaves no partial setup behind.
    pub fn listen_for_signals(&self) -> io::Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let interrupt = signal(SignalKind::interrupt())?;
            let terminate = signal(SignalKind::terminate())?;

            for (mut stream, reason) in [
                (interrupt, ShutdownReason::Interrupt),
                (terminate, ShutdownReason::Terminate),
            ] {
                let coordinator = self.clone();
                tokio::spawn(async move {
                    while stream.recv().await.is_some() {
                        coordinator.trigger(reason);
                    }
                });
            }
        }

        #[cfg(not(unix))]
        {
            let coordinator = self.clone();
            tokio::spawn(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    coordinator.trigger(ShutdownReason::Interrupt);
                }
            });
        }

        Ok(())
    }
}
