//! Periodic revalidation.
//!
//! The validator is single-shot; this timer supplies the retry cadence. A
//! tick that finds a validation already running is dropped, not queued.

use crate::validator::LicenseValidator;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

/// Handle to a running revalidation task. Dropping it stops the task.
#[derive(Debug)]
pub struct RevalidationHandle {
    task: JoinHandle<()>,
}

impl RevalidationHandle {
    /// Stops the timer.
    pub fn shutdown(self) {
        self.task.abort();
    }

    /// Returns true once the task has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RevalidationHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Starts revalidating every `every`, first tick one period from now.
///
/// # Panics
///
/// Panics if `every` is zero.
pub fn spawn_revalidation(validator: Arc<LicenseValidator>, every: Duration) -> RevalidationHandle {
    assert!(!every.is_zero(), "revalidation interval must be non-zero");

    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("License revalidation every {}s", every.as_secs());

        loop {
            ticker.tick().await;
            match validator.try_revalidate().await {
                Some(outcome) => debug!("Scheduled license check: {}", outcome.state),
                None => debug!("Scheduled license check skipped"),
            }
        }
    });

    RevalidationHandle { task }
}
