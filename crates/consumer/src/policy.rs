//! Per-entry reclaim decisions.

use crate::config::ReclaimerConfig;

use std::time::Duration;

use reclaim_log::PendingEntry;

/// What the reclaimer does with one pending entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// First delivery gone idle: hand ownership to another consumer.
    Transfer,

    /// Still unacked after a transfer: append the payload as a new record and
    /// acknowledge the original.
    Requeue,

    /// Probably still being processed.
    Leave,
}

/// Thresholds deciding when a pending entry is stuck.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReclaimPolicy {
    /// Entries idle for at most this long are always left alone.
    pub idle_threshold: Duration,
}

impl Default for ReclaimPolicy {
    fn default() -> Self {
        Self::from(&ReclaimerConfig::default())
    }
}

impl From<&ReclaimerConfig> for ReclaimPolicy {
    fn from(config: &ReclaimerConfig) -> Self {
        Self {
            idle_threshold: config.idle_threshold,
        }
    }
}

impl ReclaimPolicy {
    /// Decides what to do with `entry`.
    #[must_use]
    pub fn decide(&self, entry: &PendingEntry) -> Decision {
        if entry.idle <= self.idle_threshold {
            return Decision::Leave;
        }

        if entry.delivery_count > 1 {
            Decision::Requeue
        } else {
            Decision::Transfer
        }
    }

    /// Whether `entry` is stuck at all, whatever the remedy.
    #[must_use]
    pub fn is_stuck(&self, entry: &PendingEntry) -> bool {
        self.decide(entry) != Decision::Leave
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use reclaim_log::RecordId;

    fn entry(idle_secs: u64, delivery_count: u64) -> PendingEntry {
        PendingEntry {
            id: RecordId::new(5, 0),
            consumer: "10.0.0.5@123".to_string(),
            delivery_count,
            idle: Duration::from_secs(idle_secs),
        }
    }

    #[test]
    fn test_fresh_entries_are_left_alone() {
        let policy = ReclaimPolicy::default();

        for count in [1, 2, 10] {
            assert_eq!(policy.decide(&entry(0, count)), Decision::Leave);
            assert_eq!(policy.decide(&entry(19, count)), Decision::Leave);
            assert_eq!(policy.decide(&entry(20, count)), Decision::Leave);
        }
    }

    #[test]
    fn test_first_delivery_is_transferred() {
        let policy = ReclaimPolicy::default();

        assert_eq!(policy.decide(&entry(21, 1)), Decision::Transfer);
        assert_eq!(policy.decide(&entry(25, 1)), Decision::Transfer);
    }

    #[test]
    fn test_redelivered_entries_are_requeued() {
        let policy = ReclaimPolicy::default();

        assert_eq!(policy.decide(&entry(25, 2)), Decision::Requeue);
        assert_eq!(policy.decide(&entry(3600, 7)), Decision::Requeue);
        assert!(policy.is_stuck(&entry(25, 2)));
        assert!(!policy.is_stuck(&entry(5, 2)));
    }

    #[test]
    fn test_threshold_follows_config() {
        let policy = ReclaimPolicy::from(&ReclaimerConfig {
            idle_threshold: Duration::from_secs(60),
            ..ReclaimerConfig::default()
        });

        assert_eq!(policy.decide(&entry(30, 1)), Decision::Leave);
        assert_eq!(policy.decide(&entry(61, 1)), Decision::Transfer);
    }
}
