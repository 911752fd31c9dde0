//! Periodic driver for the pending reclaimer.

use crate::error::{Error, Result};
use crate::reclaimer::{PendingReclaimer, SweepOutcome};

use reclaim_locks::LockManager;
use reclaim_log::StreamLog;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Runs a sweep on every tick of the reclaimer's interval.
///
/// Every member of the fleet runs a scheduler; the sweep lock makes sure only
/// one of them actually sweeps per tick. Ticks missed while a sweep runs long
/// are skipped rather than bunched up.
pub struct ReclaimScheduler<L, M> {
    reclaimer: PendingReclaimer<L, M>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl<L, M> ReclaimScheduler<L, M>
where
    L: StreamLog,
    M: LockManager,
{
    /// Creates a new scheduler. Nothing runs until [`Self::start`].
    #[must_use]
    pub fn new(reclaimer: PendingReclaimer<L, M>) -> Self {
        Self {
            reclaimer,
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Starts the periodic sweep. The first sweep runs immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] if called more than once.
    pub fn start(&self) -> Result<()> {
        if self.task_tracker.is_closed() {
            return Err(Error::AlreadyStarted);
        }

        let reclaimer = self.reclaimer.clone();
        let shutdown_token = self.shutdown_token.clone();

        self.task_tracker.spawn(async move {
            let period = reclaimer.config().interval;
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(?period, "reclaim scheduler started");

            loop {
                tokio::select! {
                    () = shutdown_token.cancelled() => break,
                    _ = ticker.tick() => {
                        match reclaimer.sweep().await {
                            Ok(SweepOutcome::Completed(report)) => debug!(?report, "scheduled sweep completed"),
                            Ok(SweepOutcome::Skipped) => debug!("scheduled sweep skipped"),
                            Err(e) => warn!(error = %e, "scheduled sweep failed"),
                        }
                    }
                }
            }

            info!("reclaim scheduler stopped");
        });

        self.task_tracker.close();

        Ok(())
    }

    /// Stops the scheduler, letting a running sweep finish.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }
}
