//! Long-lived batched pull loops, one per registered listener.

use crate::bootstrap::ensure_group;
use crate::config::{ListenerConfig, ReclaimerConfig};
use crate::error::{Error, Result};
use crate::listener::{ConsumerGroupBinding, StreamListener};
use crate::policy::ReclaimPolicy;
use crate::reclaimer::{pending_of, timed};
use crate::registry::{GroupKey, GroupRegistry};

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use reclaim_locks::LockManager;
use reclaim_log::{IdRange, Record, StreamLog};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Options for creating a [`ListenerRuntime`].
pub struct ListenerRuntimeOptions<L> {
    /// The log to read from.
    pub log: L,
    /// Consumer name used for every binding of this runtime.
    pub consumer: String,
    /// Batch size, poll timeout and shutdown grace.
    pub config: ListenerConfig,
    /// Registry that bound groups are added to.
    pub registry: GroupRegistry,
}

/// What happened to one record handed to a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordOutcome {
    Acked,
    Failed,
    AckFailed,
}

/// Counts of what a local remediation pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemediationReport {
    /// Stuck entries handed back to their listener.
    pub replayed: usize,
    /// Replayed entries that succeeded and were acknowledged.
    pub acked: usize,
    /// Replayed entries that failed again and stay pending.
    pub failed: usize,
}

/// Result of [`ListenerRuntime::remediate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemediationOutcome {
    /// A sweep or another remediation holds the fleet lock.
    Skipped,

    /// The remediation ran.
    Completed(RemediationReport),
}

#[derive(Clone)]
struct Registration {
    binding: ConsumerGroupBinding,
    listener: Arc<dyn StreamListener>,
}

/// Runs one pull loop per registered listener until shutdown.
///
/// Each loop reads up to `batch_size` new records, hands them to the listener
/// in id order and acknowledges each one that succeeds. Failed records are
/// never retried inline; they stay pending for the reclaimer. Read failures
/// are logged and retried after a backoff.
pub struct ListenerRuntime<L> {
    log: L,
    consumer: String,
    config: ListenerConfig,
    registry: GroupRegistry,
    registrations: Mutex<Vec<Registration>>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl<L> ListenerRuntime<L> {
    /// Bindings of every registered listener.
    #[must_use]
    pub fn bindings(&self) -> Vec<ConsumerGroupBinding> {
        self.registrations
            .lock()
            .iter()
            .map(|registration| registration.binding.clone())
            .collect()
    }
}

impl<L> fmt::Debug for ListenerRuntime<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRuntime")
            .field("consumer", &self.consumer)
            .field("config", &self.config)
            .field("bindings", &self.bindings())
            .finish_non_exhaustive()
    }
}

impl<L: StreamLog> ListenerRuntime<L> {
    /// Creates a new runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the poll timeout is not strictly shorter
    /// than the log connection's idle timeout, or the configuration is otherwise
    /// invalid.
    pub fn new(
        ListenerRuntimeOptions {
            log,
            consumer,
            config,
            registry,
        }: ListenerRuntimeOptions<L>,
    ) -> Result<Self> {
        config.validate(log.connection_idle_timeout())?;

        if consumer.is_empty() {
            return Err(Error::Config("consumer name must not be empty".to_string()));
        }

        Ok(Self {
            log,
            consumer,
            config,
            registry,
            registrations: Mutex::new(Vec::new()),
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        })
    }

    /// The consumer name this runtime reads as.
    #[must_use]
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Ensures the listener's group exists and starts its pull loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutDown`] after shutdown began, or the bootstrap error
    /// if the group cannot be created.
    pub async fn register<T: StreamListener>(&self, listener: T) -> Result<ConsumerGroupBinding> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ShutDown);
        }

        let listener: Arc<dyn StreamListener> = Arc::new(listener);
        let binding = ConsumerGroupBinding {
            stream: listener.stream_key().to_string(),
            group: listener.group().to_string(),
            consumer: self.consumer.clone(),
        };

        ensure_group(&self.log, &binding.stream, &binding.group).await?;
        self.registry.register(&binding.stream, &binding.group);

        self.registrations.lock().push(Registration {
            binding: binding.clone(),
            listener: listener.clone(),
        });

        self.task_tracker.spawn(run_binding(
            self.log.clone(),
            binding.clone(),
            listener,
            self.config.clone(),
            self.shutdown_token.clone(),
        ));

        Ok(binding)
    }

    /// Stops all pull loops and waits up to the grace period for in-flight
    /// batches to finish.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimedOut`] if batches are still running when the
    /// grace period ends.
    pub async fn shutdown(&self) -> Result<()> {
        info!(consumer = %self.consumer, "shutting down listener runtime");

        self.shutdown_token.cancel();
        self.task_tracker.close();

        tokio::time::timeout(self.config.shutdown_grace, self.task_tracker.wait())
            .await
            .map_err(|_| Error::ShutdownTimedOut(self.config.shutdown_grace))?;

        info!(consumer = %self.consumer, "listener runtime stopped");

        Ok(())
    }

    /// Waits for every pull loop to exit. Only returns once shutdown has begun.
    pub async fn wait(&self) {
        self.task_tracker.wait().await;
    }

    /// Replays this consumer's own stuck entries through their listeners and
    /// acknowledges the ones that now succeed.
    ///
    /// This is a local remedy next to the fleet-wide sweep. It takes the same
    /// fleet lock as the sweep so the two never act on a group at once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Lock`] if the lock service fails. Log failures skip
    /// the affected binding.
    pub async fn remediate<M: LockManager>(
        &self,
        locks: &M,
        config: &ReclaimerConfig,
    ) -> Result<RemediationOutcome> {
        let Some(guard) = locks
            .try_lock(&config.lock_key, config.lock_wait, config.lock_lease)
            .await
            .map_err(|e| Error::lock("try_lock", &e))?
        else {
            debug!(consumer = %self.consumer, "fleet lock held elsewhere, skipping remediation");
            return Ok(RemediationOutcome::Skipped);
        };

        let policy = ReclaimPolicy::from(config);
        let registrations = self.registrations.lock().clone();
        let mut report = RemediationReport::default();

        for Registration { binding, listener } in registrations {
            let key = GroupKey::new(&binding.stream, &binding.group);
            let entries = match pending_of(
                &self.log,
                &key,
                &binding.consumer,
                config.page_size,
                config.call_timeout,
            )
            .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(stream = %binding.stream, group = %binding.group, error = %e, "cannot list pending entries for remediation");
                    continue;
                }
            };

            for entry in entries.iter().filter(|entry| policy.is_stuck(entry)) {
                let record = match timed(
                    "range",
                    config.call_timeout,
                    self.log
                        .range(&binding.stream, IdRange::single(entry.id), Some(1)),
                )
                .await
                {
                    Ok(records) => records.into_iter().next(),
                    Err(e) => {
                        warn!(stream = %binding.stream, id = %entry.id, error = %e, "cannot fetch stuck record");
                        None
                    }
                };

                let Some(record) = record else {
                    continue;
                };

                report.replayed += 1;
                match process_record(&self.log, &binding, listener.as_ref(), &record).await {
                    RecordOutcome::Acked => report.acked += 1,
                    RecordOutcome::Failed | RecordOutcome::AckFailed => report.failed += 1,
                }
            }
        }

        if let Err(e) = locks.unlock(guard).await {
            warn!(error = %e, "failed to release fleet lock after remediation");
        }

        info!(consumer = %self.consumer, ?report, "remediation finished");

        Ok(RemediationOutcome::Completed(report))
    }
}

async fn run_binding<L: StreamLog>(
    log: L,
    binding: ConsumerGroupBinding,
    listener: Arc<dyn StreamListener>,
    config: ListenerConfig,
    shutdown_token: CancellationToken,
) {
    info!(stream = %binding.stream, group = %binding.group, consumer = %binding.consumer, "listener started");

    loop {
        // Only the read is abandoned on shutdown; a batch in hand always completes
        let read = tokio::select! {
            biased;
            () = shutdown_token.cancelled() => break,
            read = log.read_group(
                &binding.stream,
                &binding.group,
                &binding.consumer,
                config.batch_size,
                config.poll_timeout,
            ) => read,
        };

        match read {
            Ok(records) => {
                if records.is_empty() {
                    continue;
                }

                debug!(stream = %binding.stream, group = %binding.group, count = records.len(), "processing batch");

                for record in &records {
                    process_record(&log, &binding, listener.as_ref(), record).await;
                }
            }
            Err(e) => {
                warn!(stream = %binding.stream, group = %binding.group, error = %e, "read failed, retrying");

                tokio::select! {
                    () = shutdown_token.cancelled() => break,
                    () = tokio::time::sleep(config.read_retry_backoff) => {}
                }
            }
        }
    }

    info!(stream = %binding.stream, group = %binding.group, consumer = %binding.consumer, "listener stopped");
}

/// Hands one record to the listener and acknowledges it on success. Errors and
/// panics are contained to the record.
async fn process_record<L: StreamLog>(
    log: &L,
    binding: &ConsumerGroupBinding,
    listener: &dyn StreamListener,
    record: &Record,
) -> RecordOutcome {
    match AssertUnwindSafe(listener.on_message(record))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(stream = %binding.stream, group = %binding.group, id = %record.id, error = %e, "callback failed, leaving record pending");
            return RecordOutcome::Failed;
        }
        Err(_) => {
            error!(stream = %binding.stream, group = %binding.group, id = %record.id, "callback panicked, leaving record pending");
            return RecordOutcome::Failed;
        }
    }

    match log.ack(&binding.stream, &binding.group, &[record.id]).await {
        Ok(_) => {
            debug!(stream = %binding.stream, group = %binding.group, id = %record.id, "acknowledged");
            RecordOutcome::Acked
        }
        Err(e) => {
            warn!(stream = %binding.stream, group = %binding.group, id = %record.id, error = %e, "ack failed, record stays pending");
            RecordOutcome::AckFailed
        }
    }
}
