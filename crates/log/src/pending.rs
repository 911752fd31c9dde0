use crate::id::RecordId;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A delivered but not yet acknowledged record, as tracked by a group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    /// Id of the pending record.
    pub id: RecordId,

    /// Consumer currently owning the record.
    pub consumer: String,

    /// How many times the record has been delivered, claims included. Always at least 1.
    pub delivery_count: u64,

    /// Time since the last delivery to the current owner.
    pub idle: Duration,
}

/// Aggregate view over a group's pending entries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSummary {
    /// Total number of pending entries in the group.
    pub total: u64,

    /// Lowest pending id, if any.
    pub lowest_id: Option<RecordId>,

    /// Highest pending id, if any.
    pub highest_id: Option<RecordId>,

    /// Pending count per consumer. Consumers without pending entries are omitted.
    pub consumers: BTreeMap<String, u64>,
}

impl PendingSummary {
    /// Whether the group has nothing pending.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Consumers holding at least one pending entry.
    pub fn consumers_with_pending(&self) -> impl Iterator<Item = (&str, u64)> {
        self.consumers
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(name, count)| (name.as_str(), *count))
    }
}
