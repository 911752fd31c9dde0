//! In-memory (single node) implementation of the stream log for local development.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod state;

pub use error::Error;

use state::{GroupState, StreamState};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reclaim_log::{
    Fields, IdRange, PendingEntry, PendingSummary, Record, RecordId, StartPosition, StreamLog,
};
use tokio::sync::{Mutex, Notify};
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Options for the in-memory log.
#[derive(Clone, Debug, Default)]
pub struct MemoryStreamLogOptions {
    /// Simulated connection idle timeout reported to callers.
    pub connection_idle_timeout: Option<Duration>,
}

/// In-memory stream log.
#[derive(Clone, Debug, Default)]
pub struct MemoryStreamLog {
    streams: Arc<Mutex<HashMap<String, StreamState>>>,
    appended: Arc<Notify>,
    options: MemoryStreamLogOptions,
}

impl MemoryStreamLog {
    /// Creates a new instance of `MemoryStreamLog`.
    #[must_use]
    pub fn new(options: MemoryStreamLogOptions) -> Self {
        Self {
            streams: Arc::new(Mutex::new(HashMap::new())),
            appended: Arc::new(Notify::new()),
            options,
        }
    }

    fn no_group(stream: &str, group: &str) -> Error {
        Error::NoSuchGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        }
    }

    async fn with_group<R: Send>(
        &self,
        stream: &str,
        group: &str,
        f: impl FnOnce(&GroupState) -> R + Send,
    ) -> Result<R, Error> {
        let streams = self.streams.lock().await;
        streams
            .get(stream)
            .and_then(|state| state.groups.get(group))
            .map(f)
            .ok_or_else(|| Self::no_group(stream, group))
    }
}

#[async_trait]
impl StreamLog for MemoryStreamLog {
    type Error = Error;

    fn connection_idle_timeout(&self) -> Option<Duration> {
        self.options.connection_idle_timeout
    }

    async fn add(&self, stream: &str, fields: Fields) -> Result<RecordId, Self::Error> {
        let id = {
            let mut streams = self.streams.lock().await;
            let state = streams.entry(stream.to_string()).or_default();
            let id = state.next_id();
            state.entries.insert(id, fields);
            id
        };

        debug!(stream, %id, "appended record");
        self.appended.notify_waiters();

        Ok(id)
    }

    async fn len(&self, stream: &str) -> Result<u64, Self::Error> {
        let streams = self.streams.lock().await;
        Ok(streams
            .get(stream)
            .map_or(0, |state| state.entries.len() as u64))
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartPosition,
    ) -> Result<(), Self::Error> {
        let mut streams = self.streams.lock().await;
        let state = streams.entry(stream.to_string()).or_default();

        if state.groups.contains_key(group) {
            return Err(Error::GroupExists {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        }

        let last_delivered = match start {
            StartPosition::NewOnly => Some(state.last_id),
            StartPosition::Beginning => None,
            StartPosition::After(id) => Some(id),
        };
        state
            .groups
            .insert(group.to_string(), GroupState::new(last_delivered));
        drop(streams);

        debug!(stream, group, ?start, "created consumer group");

        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Record>, Self::Error> {
        let count = if count == 0 { usize::MAX } else { count };
        let deadline = Instant::now() + block;

        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut streams = self.streams.lock().await;
                let records = streams
                    .get_mut(stream)
                    .and_then(|state| {
                        state.deliver(stream, group, consumer, count, Instant::now())
                    })
                    .ok_or_else(|| Self::no_group(stream, group))?;

                if !records.is_empty() {
                    debug!(stream, group, consumer, delivered = records.len(), "delivered records");
                    return Ok(records);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[RecordId]) -> Result<u64, Self::Error> {
        let mut streams = self.streams.lock().await;
        Ok(streams
            .get_mut(stream)
            .and_then(|state| state.groups.get_mut(group))
            .map_or(0, |group_state| group_state.ack(ids)))
    }

    async fn pending_summary(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<PendingSummary, Self::Error> {
        self.with_group(stream, group, GroupState::summary).await
    }

    async fn pending_detail(
        &self,
        stream: &str,
        group: &str,
        consumer: Option<&str>,
        range: IdRange,
        count: usize,
    ) -> Result<Vec<PendingEntry>, Self::Error> {
        let now = Instant::now();
        self.with_group(stream, group, |group_state| {
            group_state.detail(consumer, range, count, now)
        })
        .await
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        new_owner: &str,
        min_idle: Duration,
        ids: &[RecordId],
    ) -> Result<Vec<Record>, Self::Error> {
        let mut streams = self.streams.lock().await;
        let claimed = streams
            .get_mut(stream)
            .and_then(|state| state.claim(stream, group, new_owner, min_idle, ids, Instant::now()))
            .ok_or_else(|| Self::no_group(stream, group))?;
        drop(streams);

        debug!(stream, group, new_owner, claimed = claimed.len(), "claimed records");

        Ok(claimed)
    }

    async fn range(
        &self,
        stream: &str,
        range: IdRange,
        count: Option<usize>,
    ) -> Result<Vec<Record>, Self::Error> {
        if range.start > range.end {
            return Ok(Vec::new());
        }

        let streams = self.streams.lock().await;
        Ok(streams.get(stream).map_or_else(Vec::new, |state| {
            state
                .entries
                .range(range.start..=range.end)
                .take(count.unwrap_or(usize::MAX))
                .map(|(id, fields)| Record {
                    id: *id,
                    stream: stream.to_string(),
                    fields: fields.clone(),
                })
                .collect()
        }))
    }

    async fn trim(&self, stream: &str, max_len: u64) -> Result<u64, Self::Error> {
        let mut streams = self.streams.lock().await;
        let removed = streams.get_mut(stream).map_or(0, |state| state.trim(max_len));
        drop(streams);

        debug!(stream, max_len, removed, "trimmed stream");

        Ok(removed)
    }

    async fn trim_before(&self, stream: &str, min_id: RecordId) -> Result<u64, Self::Error> {
        let mut streams = self.streams.lock().await;
        let removed = streams
            .get_mut(stream)
            .map_or(0, |state| state.trim_before(min_id));
        drop(streams);

        debug!(stream, %min_id, removed, "trimmed stream before id");

        Ok(removed)
    }

    async fn list_consumers(&self, stream: &str, group: &str) -> Result<Vec<String>, Self::Error> {
        self.with_group(stream, group, |group_state| {
            group_state.consumers.keys().cloned().collect()
        })
        .await
    }
}
