//! Decorators composed around processing callbacks.

use crate::listener::{BoxError, StreamListener};

use std::time::Duration;

use async_trait::async_trait;
use reclaim_locks::LockManager;
use reclaim_log::Record;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{Instrument, debug, info_span, warn};

/// Failures produced by middleware rather than by the wrapped callback.
#[derive(Debug, Error)]
pub enum MiddlewareError {
    /// The callback exceeded its deadline.
    #[error("callback exceeded {0:?}")]
    Timeout(Duration),

    /// The guarding lock is held elsewhere.
    #[error("lock '{0}' is held by another consumer")]
    LockContended(String),

    /// The lock manager failed.
    #[error("lock '{key}' could not be acquired: {message}")]
    Lock {
        /// The lock key.
        key: String,
        /// Error reported by the lock manager.
        message: String,
    },
}

/// Logs every callback inside a span carrying the record's coordinates.
#[derive(Clone, Debug)]
pub struct Traced<L> {
    inner: L,
}

impl<L> Traced<L> {
    pub(crate) const fn new(inner: L) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<L: StreamListener> StreamListener for Traced<L> {
    fn stream_key(&self) -> &str {
        self.inner.stream_key()
    }

    fn group(&self) -> &str {
        self.inner.group()
    }

    async fn on_message(&self, record: &Record) -> Result<(), BoxError> {
        let span = info_span!(
            "on_message",
            stream = %record.stream,
            group = %self.inner.group(),
            id = %record.id
        );

        async {
            let started = Instant::now();
            let result = self.inner.on_message(record).await;
            match &result {
                Ok(()) => debug!(elapsed = ?started.elapsed(), "processed record"),
                Err(e) => warn!(elapsed = ?started.elapsed(), error = %e, "processing failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

/// Fails callbacks that do not finish within a deadline.
#[derive(Clone, Debug)]
pub struct Timeout<L> {
    inner: L,
    limit: Duration,
}

impl<L> Timeout<L> {
    pub(crate) const fn new(inner: L, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl<L: StreamListener> StreamListener for Timeout<L> {
    fn stream_key(&self) -> &str {
        self.inner.stream_key()
    }

    fn group(&self) -> &str {
        self.inner.group()
    }

    async fn on_message(&self, record: &Record) -> Result<(), BoxError> {
        tokio::time::timeout(self.limit, self.inner.on_message(record))
            .await
            .map_err(|_| Box::new(MiddlewareError::Timeout(self.limit)) as BoxError)?
    }
}

/// How a lock-guarded listener derives its lock key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockKey {
    /// One lock for every record of the listener.
    Fixed(String),

    /// One lock per record, `{prefix}:{stream}:{id}`.
    PerRecord(String),
}

impl LockKey {
    fn resolve(&self, record: &Record) -> String {
        match self {
            Self::Fixed(key) => key.clone(),
            Self::PerRecord(prefix) => format!("{prefix}:{}:{}", record.stream, record.id),
        }
    }
}

/// Runs callbacks while holding a distributed lock.
#[derive(Clone, Debug)]
pub struct LockGuarded<L, M> {
    inner: L,
    locks: M,
    key: LockKey,
    wait: Duration,
    lease: Duration,
}

impl<L, M> LockGuarded<L, M> {
    pub(crate) const fn new(inner: L, locks: M, key: LockKey, wait: Duration, lease: Duration) -> Self {
        Self {
            inner,
            locks,
            key,
            wait,
            lease,
        }
    }
}

#[async_trait]
impl<L, M> StreamListener for LockGuarded<L, M>
where
    L: StreamListener,
    M: LockManager,
{
    fn stream_key(&self) -> &str {
        self.inner.stream_key()
    }

    fn group(&self) -> &str {
        self.inner.group()
    }

    async fn on_message(&self, record: &Record) -> Result<(), BoxError> {
        let key = self.key.resolve(record);

        let guard = self
            .locks
            .try_lock(&key, self.wait, self.lease)
            .await
            .map_err(|e| {
                Box::new(MiddlewareError::Lock {
                    key: key.clone(),
                    message: e.to_string(),
                }) as BoxError
            })?
            .ok_or_else(|| Box::new(MiddlewareError::LockContended(key.clone())) as BoxError)?;

        let result = self.inner.on_message(record).await;

        if let Err(e) = self.locks.unlock(guard).await {
            warn!(key = %key, error = %e, "failed to release callback lock");
        }

        result
    }
}
