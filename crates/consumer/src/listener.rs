//! The processing capability registered into a listener runtime.

use crate::middleware::{LockGuarded, LockKey, Timeout, Traced};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reclaim_locks::LockManager;
use reclaim_log::Record;

/// Error returned by processing callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Identity of a listener runtime when reading a stream through a group.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConsumerGroupBinding {
    /// Stream key.
    pub stream: String,
    /// Group name.
    pub group: String,
    /// Name of the consumer reading on behalf of this process.
    pub consumer: String,
}

/// Processes the records of one stream for one consumer group.
///
/// A record is acknowledged only when `on_message` returns `Ok`. Failed records
/// stay pending and are recovered by the pending reclaimer.
#[async_trait]
pub trait StreamListener
where
    Self: Send + Sync + 'static,
{
    /// Key of the stream to read.
    fn stream_key(&self) -> &str;

    /// Consumer group to read through.
    fn group(&self) -> &str;

    /// Processes one record.
    async fn on_message(&self, record: &Record) -> Result<(), BoxError>;
}

#[async_trait]
impl<T> StreamListener for Arc<T>
where
    T: StreamListener + ?Sized,
{
    fn stream_key(&self) -> &str {
        (**self).stream_key()
    }

    fn group(&self) -> &str {
        (**self).group()
    }

    async fn on_message(&self, record: &Record) -> Result<(), BoxError> {
        (**self).on_message(record).await
    }
}

/// Composes middleware around a listener.
pub trait ListenerExt: StreamListener + Sized {
    /// Wraps every callback in a tracing span and logs its outcome and duration.
    fn traced(self) -> Traced<Self> {
        Traced::new(self)
    }

    /// Fails callbacks that run longer than `limit`.
    fn with_timeout(self, limit: Duration) -> Timeout<Self> {
        Timeout::new(self, limit)
    }

    /// Runs callbacks under a distributed lock. A callback that cannot get the
    /// lock within `wait` fails, leaving its record pending.
    fn lock_guarded<M: LockManager>(
        self,
        locks: M,
        key: LockKey,
        wait: Duration,
        lease: Duration,
    ) -> LockGuarded<Self, M> {
        LockGuarded::new(self, locks, key, wait, lease)
    }
}

impl<T: StreamListener> ListenerExt for T {}
