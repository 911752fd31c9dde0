//! Fleet-wide sweep over every registered group's pending entries.

use crate::config::ReclaimerConfig;
use crate::error::{Error, Result};
use crate::policy::{Decision, ReclaimPolicy};
use crate::registry::{GroupKey, GroupRegistry};

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use reclaim_locks::LockManager;
use reclaim_log::{IdRange, PendingEntry, RecordId, StreamLog, StreamLogError};
use tracing::{debug, info, instrument, warn};

/// Runs `call` with a timeout, mapping both failure kinds to [`Error`].
pub(crate) async fn timed<T, E, F>(op: &'static str, timeout: Duration, call: F) -> Result<T>
where
    E: StreamLogError,
    F: Future<Output = std::result::Result<T, E>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Error::log(op, &e)),
        Err(_) => Err(Error::Timeout { op, timeout }),
    }
}

/// Every pending entry of `key` owned by `consumer`, fetched page by page in
/// id order.
pub(crate) async fn pending_of<L: StreamLog>(
    log: &L,
    key: &GroupKey,
    consumer: &str,
    page_size: usize,
    timeout: Duration,
) -> Result<Vec<PendingEntry>> {
    let mut entries = Vec::new();
    let mut range = IdRange::all();

    loop {
        let page = timed(
            "pending_detail",
            timeout,
            log.pending_detail(&key.stream, &key.group, Some(consumer), range, page_size),
        )
        .await?;

        let full = page.len() >= page_size;
        let last = page.last().map(|entry| entry.id);
        entries.extend(page);

        match last {
            Some(last) if full && last < RecordId::MAX => range = IdRange::starting_at(last.next()),
            _ => break,
        }
    }

    Ok(entries)
}

/// Counts of what one sweep did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Groups whose pending entries were examined.
    pub groups_swept: usize,
    /// Groups with nothing pending.
    pub groups_empty: usize,
    /// Groups skipped because a log call failed.
    pub groups_failed: usize,
    /// Entries transferred to another consumer.
    pub claimed: usize,
    /// Entries re-published as new records and acknowledged.
    pub requeued: usize,
    /// Entries whose record was already trimmed, acknowledged without a copy.
    pub retired: usize,
    /// Entries considered still in progress.
    pub left: usize,
    /// Stuck entries with no other consumer to take them.
    pub unassigned: usize,
}

impl SweepReport {
    fn absorb(&mut self, group: &Self) {
        self.claimed += group.claimed;
        self.requeued += group.requeued;
        self.retired += group.retired;
        self.left += group.left;
        self.unassigned += group.unassigned;
    }
}

/// Result of one scheduler tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Another fleet member holds the sweep lock; nothing was done.
    Skipped,

    /// The sweep ran.
    Completed(SweepReport),
}

/// Options for creating a [`PendingReclaimer`].
pub struct PendingReclaimerOptions<L, M> {
    /// The log holding the groups.
    pub log: L,
    /// Fleet-wide lock service.
    pub locks: M,
    /// Groups to sweep.
    pub registry: GroupRegistry,
    /// Thresholds, lock and timeouts.
    pub config: ReclaimerConfig,
}

/// Recovers pending entries stuck with dead or slow consumers.
///
/// Each sweep takes the fleet-wide lock, so at most one member sweeps per tick.
/// For every registered group it:
///
/// 1. skips the group if nothing is pending,
/// 2. pages through each owning consumer's entries in id order,
/// 3. transfers first deliveries idle past the threshold to another consumer,
/// 4. re-publishes entries that are still stuck after a transfer, then acks
///    the original.
///
/// Log calls carry a timeout and are not retried; a failing group is skipped
/// until the next tick.
#[derive(Clone, Debug)]
pub struct PendingReclaimer<L, M> {
    log: L,
    locks: M,
    registry: GroupRegistry,
    config: ReclaimerConfig,
    policy: ReclaimPolicy,
}

impl<L, M> PendingReclaimer<L, M>
where
    L: StreamLog,
    M: LockManager,
{
    /// Creates a new reclaimer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(
        PendingReclaimerOptions {
            log,
            locks,
            registry,
            config,
        }: PendingReclaimerOptions<L, M>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            log,
            locks,
            registry,
            policy: ReclaimPolicy::from(&config),
            config,
        })
    }

    /// The reclaimer's configuration.
    #[must_use]
    pub const fn config(&self) -> &ReclaimerConfig {
        &self.config
    }

    /// Runs one sweep if the fleet-wide lock can be taken.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Lock`] if the lock service fails. Log failures never
    /// fail the sweep; they only skip the affected group.
    #[instrument(skip(self), fields(lock_key = %self.config.lock_key))]
    pub async fn sweep(&self) -> Result<SweepOutcome> {
        let Some(guard) = self
            .locks
            .try_lock(
                &self.config.lock_key,
                self.config.lock_wait,
                self.config.lock_lease,
            )
            .await
            .map_err(|e| Error::lock("try_lock", &e))?
        else {
            debug!("sweep lock held elsewhere, skipping tick");
            return Ok(SweepOutcome::Skipped);
        };

        let report = self.sweep_groups().await;

        if let Err(e) = self.locks.unlock(guard).await {
            warn!(error = %e, "failed to release sweep lock, lease will expire it");
        }

        info!(?report, "sweep finished");

        Ok(SweepOutcome::Completed(report))
    }

    async fn sweep_groups(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for key in self.registry.snapshot() {
            let mut group_report = SweepReport::default();
            match self.sweep_group(&key, &mut group_report).await {
                Ok(true) => {
                    report.groups_swept += 1;
                    report.absorb(&group_report);
                }
                Ok(false) => report.groups_empty += 1,
                Err(e) => {
                    warn!(stream = %key.stream, group = %key.group, error = %e, "skipping group this tick");
                    report.groups_failed += 1;
                    // Actions taken before the failure did happen
                    report.absorb(&group_report);
                }
            }
        }

        report
    }

    /// Returns `false` when the group had nothing pending.
    async fn sweep_group(&self, key: &GroupKey, report: &mut SweepReport) -> Result<bool> {
        let timeout = self.config.call_timeout;

        let summary = timed(
            "pending_summary",
            timeout,
            self.log.pending_summary(&key.stream, &key.group),
        )
        .await?;

        if summary.is_empty() {
            return Ok(false);
        }

        debug!(stream = %key.stream, group = %key.group, total = summary.total, "examining pending entries");

        let mut transfers: BTreeMap<String, Vec<RecordId>> = BTreeMap::new();

        for (consumer, count) in summary.consumers_with_pending() {
            debug!(stream = %key.stream, group = %key.group, consumer, count, "examining consumer");

            let entries = pending_of(
                &self.log,
                key,
                consumer,
                self.config.page_size,
                self.config.call_timeout,
            )
            .await?;

            for entry in entries {
                match self.policy.decide(&entry) {
                    Decision::Leave => report.left += 1,
                    Decision::Transfer => transfers
                        .entry(entry.consumer.clone())
                        .or_default()
                        .push(entry.id),
                    Decision::Requeue => {
                        if self.requeue(key, &entry).await? {
                            report.requeued += 1;
                        } else {
                            report.retired += 1;
                        }
                    }
                }
            }
        }

        if !transfers.is_empty() {
            let consumers = timed(
                "list_consumers",
                timeout,
                self.log.list_consumers(&key.stream, &key.group),
            )
            .await?;

            for (stuck, ids) in transfers {
                let Some(target) = consumers.iter().find(|name| **name != stuck) else {
                    warn!(stream = %key.stream, group = %key.group, consumer = %stuck, entries = ids.len(), "no other consumer to take over stuck entries");
                    report.unassigned += ids.len();
                    continue;
                };

                report.claimed += self.transfer(key, &stuck, target, &ids).await?;
            }
        }

        Ok(true)
    }

    async fn transfer(
        &self,
        key: &GroupKey,
        stuck: &str,
        target: &str,
        ids: &[RecordId],
    ) -> Result<usize> {
        let claimed = timed(
            "claim",
            self.config.call_timeout,
            self.log.claim(
                &key.stream,
                &key.group,
                target,
                self.config.claim_min_idle,
                ids,
            ),
        )
        .await?;

        info!(
            stream = %key.stream,
            group = %key.group,
            from = stuck,
            to = target,
            requested = ids.len(),
            claimed = claimed.len(),
            "transferred stuck entries"
        );

        Ok(claimed.len())
    }

    /// Appends the entry's payload as a new record, then acks the original.
    /// The ack only happens once the append succeeded. Returns `false` when the
    /// record was already trimmed and the entry was only acknowledged.
    async fn requeue(&self, key: &GroupKey, entry: &PendingEntry) -> Result<bool> {
        let timeout = self.config.call_timeout;

        let records = timed(
            "range",
            timeout,
            self.log.range(&key.stream, IdRange::single(entry.id), Some(1)),
        )
        .await?;

        let republished = if let Some(record) = records.into_iter().next() {
            let new_id = timed("add", timeout, self.log.add(&key.stream, record.fields)).await?;
            info!(
                stream = %key.stream,
                group = %key.group,
                id = %entry.id,
                %new_id,
                delivery_count = entry.delivery_count,
                "re-published stuck entry"
            );
            true
        } else {
            warn!(stream = %key.stream, group = %key.group, id = %entry.id, "pending record was trimmed, retiring entry");
            false
        };

        timed(
            "ack",
            timeout,
            self.log.ack(&key.stream, &key.group, &[entry.id]),
        )
        .await?;

        Ok(republished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing::FlakyLog;

    use assert_matches::assert_matches;
    use bytes::Bytes;
    use reclaim_locks::LockStatus;
    use reclaim_locks_memory::MemoryLockManager;
    use reclaim_log::{Fields, StartPosition};
    use reclaim_log_memory::MemoryStreamLog;
    use tracing_test::traced_test;

    const STREAM: &str = "orders";
    const GROUP: &str = "billing";
    const CRASHED: &str = "10.0.0.5@123";
    const HEALTHY: &str = "10.0.0.5@124";

    fn payload(value: &str) -> Fields {
        Fields::from([("payload".to_string(), Bytes::from(value.to_string()))])
    }

    struct Fixture {
        log: FlakyLog,
        locks: MemoryLockManager,
        registry: GroupRegistry,
    }

    impl Fixture {
        async fn new() -> Self {
            let log = FlakyLog::new(MemoryStreamLog::default());
            log.create_group(STREAM, GROUP, StartPosition::NewOnly)
                .await
                .unwrap();
            let registry = GroupRegistry::new();
            registry.register(STREAM, GROUP);

            Self {
                log,
                locks: MemoryLockManager::new(),
                registry,
            }
        }

        fn reclaimer(&self, locks: MemoryLockManager) -> PendingReclaimer<FlakyLog, MemoryLockManager> {
            PendingReclaimer::new(PendingReclaimerOptions {
                log: self.log.clone(),
                locks,
                registry: self.registry.clone(),
                config: ReclaimerConfig::default(),
            })
            .unwrap()
        }

        async fn deliver(&self, consumer: &str, count: usize) -> Vec<RecordId> {
            self.log
                .read_group(STREAM, GROUP, consumer, count, Duration::ZERO)
                .await
                .unwrap()
                .into_iter()
                .map(|record| record.id)
                .collect()
        }

        async fn pending(&self) -> Vec<PendingEntry> {
            self.log
                .pending_detail(STREAM, GROUP, None, IdRange::all(), 100)
                .await
                .unwrap()
        }
    }

    fn completed(outcome: SweepOutcome) -> SweepReport {
        match outcome {
            SweepOutcome::Completed(report) => report,
            SweepOutcome::Skipped => panic!("sweep was skipped"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_groups_are_skipped() {
        let fixture = Fixture::new().await;
        let reclaimer = fixture.reclaimer(fixture.locks.clone());

        let report = completed(reclaimer.sweep().await.unwrap());

        assert_eq!(report.groups_empty, 1);
        assert_eq!(report.groups_swept, 0);
        assert_eq!(fixture.log.mutations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_entries_are_left_alone() {
        let fixture = Fixture::new().await;
        fixture.log.add(STREAM, payload("a")).await.unwrap();
        fixture.deliver(HEALTHY, 10).await;
        fixture.deliver(CRASHED, 10).await;
        fixture.log.add(STREAM, payload("b")).await.unwrap();
        fixture.deliver(CRASHED, 10).await;
        let mutations = fixture.log.mutations();

        tokio::time::advance(Duration::from_secs(20)).await;
        let report = completed(fixture.reclaimer(fixture.locks.clone()).sweep().await.unwrap());

        assert_eq!(report.left, 2);
        assert_eq!(report.claimed, 0);
        assert_eq!(report.requeued, 0);
        assert_eq!(fixture.log.mutations(), mutations);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_first_delivery_is_claimed_by_another_consumer() {
        let fixture = Fixture::new().await;
        // Register the healthy consumer before the crashed one reads
        fixture.deliver(HEALTHY, 10).await;
        fixture.log.add(STREAM, payload("a")).await.unwrap();
        let ids = fixture.deliver(CRASHED, 10).await;

        tokio::time::advance(Duration::from_secs(25)).await;
        let report = completed(fixture.reclaimer(fixture.locks.clone()).sweep().await.unwrap());

        assert_eq!(report.claimed, 1);
        assert_eq!(report.requeued, 0);

        let pending = fixture.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, ids[0]);
        assert_eq!(pending[0].consumer, HEALTHY);
        assert_eq!(pending[0].delivery_count, 2);
        assert_eq!(pending[0].idle, Duration::ZERO);
        assert_eq!(fixture.log.inner().len(STREAM).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivered_entry_is_requeued_and_retired() {
        let fixture = Fixture::new().await;
        fixture.deliver(HEALTHY, 10).await;
        fixture.log.add(STREAM, payload("a")).await.unwrap();
        let original = fixture.deliver(CRASHED, 10).await[0];
        let reclaimer = fixture.reclaimer(fixture.locks.clone());

        tokio::time::advance(Duration::from_secs(25)).await;
        completed(reclaimer.sweep().await.unwrap());

        tokio::time::advance(Duration::from_secs(25)).await;
        let report = completed(reclaimer.sweep().await.unwrap());
        assert_eq!(report.requeued, 1);
        assert_eq!(report.claimed, 0);

        // The original id is gone from the pending set for good
        assert!(fixture.pending().await.is_empty());

        // The payload is back as a fresh record at the tail
        let records = fixture
            .log
            .range(STREAM, IdRange::all(), None)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[1].id > original);
        assert_eq!(records[1].fields, payload("a"));

        // And it is delivered through the normal read path
        let redelivered = fixture.deliver(HEALTHY, 10).await;
        assert_eq!(redelivered, vec![records[1].id]);
        assert!(
            fixture
                .pending()
                .await
                .iter()
                .all(|entry| entry.id != original)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_entries_without_other_consumer_stay_put() {
        let fixture = Fixture::new().await;
        fixture.log.add(STREAM, payload("a")).await.unwrap();
        fixture.deliver(CRASHED, 10).await;

        tokio::time::advance(Duration::from_secs(25)).await;
        let report = completed(fixture.reclaimer(fixture.locks.clone()).sweep().await.unwrap());

        assert_eq!(report.unassigned, 1);
        assert_eq!(report.claimed, 0);
        assert_eq!(fixture.pending().await[0].consumer, CRASHED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pages_through_every_pending_entry() {
        let fixture = Fixture::new().await;
        fixture.deliver(HEALTHY, 10).await;
        for i in 0..25 {
            fixture.log.add(STREAM, payload(&i.to_string())).await.unwrap();
        }
        fixture.deliver(CRASHED, 100).await;

        tokio::time::advance(Duration::from_secs(25)).await;
        let report = completed(fixture.reclaimer(fixture.locks.clone()).sweep().await.unwrap());

        assert_eq!(report.claimed, 25);
        assert!(
            fixture
                .pending()
                .await
                .iter()
                .all(|entry| entry.consumer == HEALTHY)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_skipped_while_another_member_holds_lock() {
        let fixture = Fixture::new().await;
        fixture.deliver(HEALTHY, 10).await;
        fixture.log.add(STREAM, payload("a")).await.unwrap();
        fixture.deliver(CRASHED, 10).await;
        tokio::time::advance(Duration::from_secs(25)).await;

        let other = fixture.locks.member("member-b");
        let _held = other
            .try_lock(
                &ReclaimerConfig::default().lock_key,
                Duration::ZERO,
                Duration::from_secs(55),
            )
            .await
            .unwrap()
            .unwrap();
        let mutations = fixture.log.mutations();

        let outcome = fixture
            .reclaimer(fixture.locks.member("member-a"))
            .sweep()
            .await
            .unwrap();

        assert_matches!(outcome, SweepOutcome::Skipped);
        assert_eq!(fixture.log.mutations(), mutations);
        assert_eq!(fixture.pending().await[0].consumer, CRASHED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_members_sweep_once() {
        let fixture = Fixture::new().await;
        fixture.deliver(HEALTHY, 10).await;
        fixture.log.add(STREAM, payload("a")).await.unwrap();
        fixture.deliver(CRASHED, 10).await;
        tokio::time::advance(Duration::from_secs(25)).await;

        // Slow the sweep down so every member ticks while it runs
        fixture.log.delay("pending_summary", Duration::from_millis(100));

        let handles: Vec<_> = (0..5)
            .map(|n| {
                let reclaimer = fixture.reclaimer(fixture.locks.member(format!("member-{n}")));
                tokio::spawn(async move { reclaimer.sweep().await.unwrap() })
            })
            .collect();

        let mut completed_count = 0;
        let mut skipped = 0;
        for handle in handles {
            match handle.await.unwrap() {
                SweepOutcome::Completed(report) => {
                    completed_count += 1;
                    assert_eq!(report.claimed, 1);
                }
                SweepOutcome::Skipped => skipped += 1,
            }
        }

        assert_eq!(completed_count, 1);
        assert_eq!(skipped, 4);
        assert_eq!(
            fixture
                .locks
                .check(&ReclaimerConfig::default().lock_key)
                .await
                .unwrap(),
            LockStatus::Free
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_group_is_skipped_and_lock_released() {
        let fixture = Fixture::new().await;
        fixture.registry.register("payments", "ledger");
        fixture
            .log
            .create_group("payments", "ledger", StartPosition::NewOnly)
            .await
            .unwrap();
        fixture.deliver(HEALTHY, 10).await;
        fixture.log.add(STREAM, payload("a")).await.unwrap();
        fixture.deliver(CRASHED, 10).await;
        tokio::time::advance(Duration::from_secs(25)).await;

        // Groups are swept in key order, so this hits orders/billing
        fixture.log.fail_next("pending_summary", 1);

        let report = completed(fixture.reclaimer(fixture.locks.clone()).sweep().await.unwrap());

        assert_eq!(report.groups_failed, 1);
        assert_eq!(report.groups_empty, 1);
        assert_eq!(report.claimed, 0);
        assert_eq!(
            fixture
                .locks
                .check(&ReclaimerConfig::default().lock_key)
                .await
                .unwrap(),
            LockStatus::Free
        );

        // The next tick recovers
        let report = completed(fixture.reclaimer(fixture.locks.clone()).sweep().await.unwrap());
        assert_eq!(report.claimed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_log_calls_time_out() {
        let fixture = Fixture::new().await;
        fixture.log.add(STREAM, payload("a")).await.unwrap();
        fixture.deliver(CRASHED, 10).await;
        fixture.log.delay("pending_summary", Duration::from_secs(60));

        let report = completed(fixture.reclaimer(fixture.locks.clone()).sweep().await.unwrap());

        assert_eq!(report.groups_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_republish_keeps_original_pending() {
        let fixture = Fixture::new().await;
        fixture.deliver(HEALTHY, 10).await;
        fixture.log.add(STREAM, payload("a")).await.unwrap();
        let original = fixture.deliver(CRASHED, 10).await[0];
        let reclaimer = fixture.reclaimer(fixture.locks.clone());

        tokio::time::advance(Duration::from_secs(25)).await;
        completed(reclaimer.sweep().await.unwrap());
        tokio::time::advance(Duration::from_secs(25)).await;

        fixture.log.fail_next("add", 1);
        let report = completed(reclaimer.sweep().await.unwrap());

        assert_eq!(report.groups_failed, 1);
        assert_eq!(report.requeued, 0);
        let pending = fixture.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, original);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_trimmed_record_is_retired_without_copy() {
        let fixture = Fixture::new().await;
        fixture.deliver(HEALTHY, 10).await;
        fixture.log.add(STREAM, payload("a")).await.unwrap();
        let original = fixture.deliver(CRASHED, 10).await[0];
        let reclaimer = fixture.reclaimer(fixture.locks.clone());

        tokio::time::advance(Duration::from_secs(25)).await;
        assert_eq!(completed(reclaimer.sweep().await.unwrap()).claimed, 1);

        // The record goes while its entry is still pending
        fixture.log.inner().trim(STREAM, 0).await.unwrap();
        assert_eq!(fixture.pending().await[0].id, original);

        tokio::time::advance(Duration::from_secs(25)).await;
        let report = completed(reclaimer.sweep().await.unwrap());

        assert_eq!(report.retired, 1);
        assert_eq!(report.requeued, 0);
        assert!(fixture.pending().await.is_empty());
        assert_eq!(fixture.log.inner().len(STREAM).await.unwrap(), 0);
        assert!(logs_contain("pending record was trimmed"));
    }
}
