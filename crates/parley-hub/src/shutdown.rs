//! Graceful shutdown
//!
//! On the termination signal the coordinator:
//! 1. stops the accept loop (the listening socket is dropped)
//! 2. asks the hub to shut down, which closes every outbound queue
//! 3. waits up to the grace period for every session to close cleanly
//!
//! Sessions still running after the grace period are aborted.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::hub::HubHandle;

/// Upper bound on waiting for aborted sessions to unwind
const FORCE_WAIT: Duration = Duration::from_secs(1);

/// How shutdown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every session closed within the grace period
    Drained { sessions_closed: usize },
    /// The grace period ran out and the remaining sessions were aborted
    Forced { remaining: usize },
}

/// Drives the shutdown sequence for one server
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    hub: HubHandle,
    sessions: TaskTracker,
    accept_stop: CancellationToken,
    force_stop: CancellationToken,
    grace_period: Duration,
}

impl ShutdownCoordinator {
    pub(crate) fn new(
        hub: HubHandle,
        sessions: TaskTracker,
        accept_stop: CancellationToken,
        force_stop: CancellationToken,
        grace_period: Duration,
    ) -> Self {
        Self {
            hub,
            sessions,
            accept_stop,
            force_stop,
            grace_period,
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Wait for `signal`, then shut down
    pub async fn run<F>(self, signal: F) -> ShutdownOutcome
    where
        F: Future<Output = ()>,
    {
        signal.await;
        info!("Shutdown signal received");
        self.trigger().await
    }

    /// Shut down now
    pub async fn trigger(self) -> ShutdownOutcome {
        self.accept_stop.cancel();
        self.sessions.close();

        let drain = async {
            let report = match self.hub.shutdown().await {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!("Hub shutdown: {}", e);
                    None
                }
            };
            self.sessions.wait().await;
            report
        };

        match tokio::time::timeout(self.grace_period, drain).await {
            Ok(report) => {
                let sessions_closed = report.map(|r| r.sessions_closed).unwrap_or_default();
                info!("Shutdown complete, {} sessions closed", sessions_closed);
                ShutdownOutcome::Drained { sessions_closed }
            }
            Err(_) => {
                let remaining = self.sessions.len();
                warn!(
                    "Grace period of {:?} exceeded, aborting {} sessions",
                    self.grace_period, remaining
                );
                self.force_stop.cancel();
                if tokio::time::timeout(FORCE_WAIT, self.sessions.wait()).await.is_err() {
                    warn!("{} sessions still unwinding after abort", self.sessions.len());
                }
                ShutdownOutcome::Forced { remaining }
            }
        }
    }
}
