//! A log wrapper that injects failures and delays.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reclaim_log::{
    Fields, IdRange, PendingEntry, PendingSummary, Record, RecordId, StartPosition, StreamLog,
    StreamLogError,
};
use reclaim_log_memory::MemoryStreamLog;
use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum FlakyError {
    #[error("injected failure in {0}")]
    Injected(&'static str),

    #[error(transparent)]
    Inner(#[from] reclaim_log_memory::Error),
}

impl StreamLogError for FlakyError {
    fn is_group_exists(&self) -> bool {
        matches!(self, Self::Inner(inner) if inner.is_group_exists())
    }

    fn is_transient(&self) -> bool {
        matches!(self, Self::Injected(_))
    }
}

#[derive(Clone, Debug, Default)]
pub struct FlakyLog {
    inner: MemoryStreamLog,
    failures: Arc<Mutex<HashMap<&'static str, usize>>>,
    delays: Arc<Mutex<HashMap<&'static str, Duration>>>,
    mutations: Arc<AtomicU64>,
}

impl FlakyLog {
    pub fn new(inner: MemoryStreamLog) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn inner(&self) -> &MemoryStreamLog {
        &self.inner
    }

    /// Fails the next `times` calls of `op`.
    pub fn fail_next(&self, op: &'static str, times: usize) {
        self.failures.lock().insert(op, times);
    }

    /// Delays every call of `op`.
    pub fn delay(&self, op: &'static str, delay: Duration) {
        self.delays.lock().insert(op, delay);
    }

    /// Number of mutating calls (add, ack, claim, trim) that reached the log.
    pub fn mutations(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    async fn enter(&self, op: &'static str) -> Result<(), FlakyError> {
        let delay = self.delays.lock().get(op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut failures = self.failures.lock();
        if let Some(remaining) = failures.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FlakyError::Injected(op));
            }
        }

        Ok(())
    }

    fn mutated(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StreamLog for FlakyLog {
    type Error = FlakyError;

    fn connection_idle_timeout(&self) -> Option<Duration> {
        self.inner.connection_idle_timeout()
    }

    async fn add(&self, stream: &str, fields: Fields) -> Result<RecordId, Self::Error> {
        self.enter("add").await?;
        self.mutated();
        Ok(self.inner.add(stream, fields).await?)
    }

    async fn len(&self, stream: &str) -> Result<u64, Self::Error> {
        self.enter("len").await?;
        Ok(self.inner.len(stream).await?)
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartPosition,
    ) -> Result<(), Self::Error> {
        self.enter("create_group").await?;
        Ok(self.inner.create_group(stream, group, start).await?)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Record>, Self::Error> {
        self.enter("read_group").await?;
        Ok(self
            .inner
            .read_group(stream, group, consumer, count, block)
            .await?)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[RecordId]) -> Result<u64, Self::Error> {
        self.enter("ack").await?;
        self.mutated();
        Ok(self.inner.ack(stream, group, ids).await?)
    }

    async fn pending_summary(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<PendingSummary, Self::Error> {
        self.enter("pending_summary").await?;
        Ok(self.inner.pending_summary(stream, group).await?)
    }

    async fn pending_detail(
        &self,
        stream: &str,
        group: &str,
        consumer: Option<&str>,
        range: IdRange,
        count: usize,
    ) -> Result<Vec<PendingEntry>, Self::Error> {
        self.enter("pending_detail").await?;
        Ok(self
            .inner
            .pending_detail(stream, group, consumer, range, count)
            .await?)
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        new_owner: &str,
        min_idle: Duration,
        ids: &[RecordId],
    ) -> Result<Vec<Record>, Self::Error> {
        self.enter("claim").await?;
        self.mutated();
        Ok(self
            .inner
            .claim(stream, group, new_owner, min_idle, ids)
            .await?)
    }

    async fn range(
        &self,
        stream: &str,
        range: IdRange,
        count: Option<usize>,
    ) -> Result<Vec<Record>, Self::Error> {
        self.enter("range").await?;
        Ok(self.inner.range(stream, range, count).await?)
    }

    async fn trim(&self, stream: &str, max_len: u64) -> Result<u64, Self::Error> {
        self.enter("trim").await?;
        self.mutated();
        Ok(self.inner.trim(stream, max_len).await?)
    }

    async fn trim_before(&self, stream: &str, min_id: RecordId) -> Result<u64, Self::Error> {
        self.enter("trim_before").await?;
        self.mutated();
        Ok(self.inner.trim_before(stream, min_id).await?)
    }

    async fn list_consumers(&self, stream: &str, group: &str) -> Result<Vec<String>, Self::Error> {
        self.enter("list_consumers").await?;
        Ok(self.inner.list_consumers(stream, group).await?)
    }
}
