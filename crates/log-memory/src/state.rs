use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use reclaim_log::{Fields, IdRange, PendingEntry, PendingSummary, Record, RecordId};
use tokio::time::{Duration, Instant};

#[derive(Debug)]
pub struct PendingState {
    pub consumer: String,
    pub delivered_at: Instant,
    pub delivery_count: u64,
}

#[derive(Debug)]
pub struct GroupState {
    /// `None` until the first delivery of a group created at the beginning.
    pub last_delivered: Option<RecordId>,
    pub pending: BTreeMap<RecordId, PendingState>,
    pub consumers: BTreeMap<String, Instant>,
}

impl GroupState {
    pub const fn new(last_delivered: Option<RecordId>) -> Self {
        Self {
            last_delivered,
            pending: BTreeMap::new(),
            consumers: BTreeMap::new(),
        }
    }

    pub fn touch_consumer(&mut self, consumer: &str, now: Instant) {
        self.consumers.insert(consumer.to_string(), now);
    }

    pub fn ack(&mut self, ids: &[RecordId]) -> u64 {
        ids.iter()
            .filter(|id| self.pending.remove(id).is_some())
            .count() as u64
    }

    pub fn summary(&self) -> PendingSummary {
        let mut consumers = BTreeMap::new();
        for pending in self.pending.values() {
            *consumers.entry(pending.consumer.clone()).or_insert(0) += 1;
        }

        PendingSummary {
            total: self.pending.len() as u64,
            lowest_id: self.pending.keys().next().copied(),
            highest_id: self.pending.keys().next_back().copied(),
            consumers,
        }
    }

    pub fn detail(
        &self,
        consumer: Option<&str>,
        range: IdRange,
        count: usize,
        now: Instant,
    ) -> Vec<PendingEntry> {
        if range.start > range.end {
            return Vec::new();
        }

        self.pending
            .range(range.start..=range.end)
            .filter(|(_, pending)| consumer.is_none_or(|name| pending.consumer == name))
            .take(count)
            .map(|(id, pending)| PendingEntry {
                id: *id,
                consumer: pending.consumer.clone(),
                delivery_count: pending.delivery_count,
                idle: now.saturating_duration_since(pending.delivered_at),
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct StreamState {
    pub entries: BTreeMap<RecordId, Fields>,
    pub last_id: RecordId,
    pub groups: HashMap<String, GroupState>,
}

impl StreamState {
    /// Generates the next id from wall-clock milliseconds, never going backwards.
    pub fn next_id(&mut self) -> RecordId {
        let ms = u64::try_from(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis(),
        )
        .unwrap_or(u64::MAX);

        let id = if ms > self.last_id.ms {
            RecordId::new(ms, 0)
        } else {
            self.last_id.next()
        };
        self.last_id = id;
        id
    }

    /// Hands out undelivered records to `consumer`, making them pending.
    pub fn deliver(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        now: Instant,
    ) -> Option<Vec<Record>> {
        let group = self.groups.get_mut(group)?;
        group.touch_consumer(consumer, now);

        let start = group.last_delivered.map_or(RecordId::MIN, RecordId::next);
        let records: Vec<Record> = if group.last_delivered == Some(RecordId::MAX) {
            Vec::new()
        } else {
            self.entries
                .range(start..)
                .take(count)
                .map(|(id, fields)| Record {
                    id: *id,
                    stream: stream.to_string(),
                    fields: fields.clone(),
                })
                .collect()
        };

        for record in &records {
            group.pending.insert(
                record.id,
                PendingState {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
            group.last_delivered = Some(record.id);
        }

        Some(records)
    }

    /// Transfers idle pending entries to `new_owner`. Entries whose record has
    /// been trimmed are dropped from the pending list instead.
    pub fn claim(
        &mut self,
        stream: &str,
        group: &str,
        new_owner: &str,
        min_idle: Duration,
        ids: &[RecordId],
        now: Instant,
    ) -> Option<Vec<Record>> {
        let group_state = self.groups.get_mut(group)?;
        group_state.touch_consumer(new_owner, now);

        let mut claimed = Vec::new();
        for id in ids {
            let Some(pending) = group_state.pending.get_mut(id) else {
                continue;
            };

            if now.saturating_duration_since(pending.delivered_at) < min_idle {
                continue;
            }

            let Some(fields) = self.entries.get(id) else {
                group_state.pending.remove(id);
                continue;
            };

            pending.consumer = new_owner.to_string();
            pending.delivered_at = now;
            pending.delivery_count += 1;

            claimed.push(Record {
                id: *id,
                stream: stream.to_string(),
                fields: fields.clone(),
            });
        }

        Some(claimed)
    }

    pub fn trim(&mut self, max_len: u64) -> u64 {
        let max_len = usize::try_from(max_len).unwrap_or(usize::MAX);
        let mut removed = 0;
        while self.entries.len() > max_len {
            if self.entries.pop_first().is_none() {
                break;
            }
            removed += 1;
        }
        removed
    }

    pub fn trim_before(&mut self, min_id: RecordId) -> u64 {
        let kept = self.entries.split_off(&min_id);
        let removed = std::mem::replace(&mut self.entries, kept).len();
        removed as u64
    }
}
