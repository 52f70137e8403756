//! Periodic timeout sweep, composed outside the queue.
//!
//! [`Queue`] never schedules anything itself. A host that wants stale
//! reservations released automatically runs a [`TimeoutSweeper`] next to
//! its consumers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::QueueSettings;
use crate::queue::Queue;

/// Calls `apply_timeout` on a fixed interval until shut down.
#[derive(Clone)]
pub struct TimeoutSweeper {
    queue: Queue,
    interval: Duration,
    timeout_secs: Option<i64>,
    shutdown: Arc<Notify>,
}

impl TimeoutSweeper {
    /// Sweep `queue` every `interval` using the queue's default timeout.
    pub fn new(queue: Queue, interval: Duration) -> Self {
        Self {
            queue,
            interval,
            timeout_secs: None,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Sweeper configured from settings: `sweep_interval_secs` between
    /// sweeps, the queue's own default timeout.
    pub fn with_settings(queue: Queue, settings: &QueueSettings) -> Self {
        Self::new(queue, settings.sweep_interval())
    }

    /// Override the reservation timeout used for each sweep.
    pub fn timeout_secs(mut self, secs: i64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Signal the sweep loop to stop. Takes effect even if called before
    /// `run` starts waiting.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run one sweep immediately. Store errors are logged, not returned,
    /// so a flaky store does not end the loop.
    pub async fn sweep_once(&self) -> u64 {
        match self.queue.apply_timeout(self.timeout_secs).await {
            Ok(released) => {
                debug!(released, "timeout sweep finished");
                released
            }
            Err(e) => {
                warn!("timeout sweep failed: {e}");
                0
            }
        }
    }

    /// Sweep every interval until [`TimeoutSweeper::shutdown`]. Returns the
    /// total number of reservations released.
    pub async fn run(&self) -> u64 {
        info!(
            collection = self.queue.collection(),
            interval_secs = self.interval.as_secs(),
            "timeout sweeper started"
        );

        let mut total = 0;
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(total, "timeout sweeper shutting down");
                    return total;
                }
                _ = tokio::time::sleep(self.interval) => {
                    total += self.sweep_once().await;
                }
            }
        }
    }
}
