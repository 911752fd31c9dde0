//! Abstract interface for append-only logs with consumer groups.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod id;
mod pending;
mod record;

pub use id::{ParseRecordIdError, RecordId};
pub use pending::{PendingEntry, PendingSummary};
pub use record::{Fields, IdRange, Record, StartPosition};

use std::error::Error;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

/// Marker trait for `StreamLog` errors
pub trait StreamLogError: Debug + Error + Send + Sync + 'static {
    /// Whether the error reports that a consumer group already exists.
    fn is_group_exists(&self) -> bool;

    /// Whether the error is transient (timeouts, dropped connections) and the
    /// same call may succeed later.
    fn is_transient(&self) -> bool {
        false
    }
}

/// A partitioned, append-only log exposing consumer-group primitives.
///
/// Every call is atomic on the log side. Callers never need to wrap several
/// calls in a transaction.
#[async_trait]
pub trait StreamLog
where
    Self: Clone + Send + Sync + 'static,
{
    /// The error type for log operations.
    type Error: StreamLogError;

    /// Idle timeout of the underlying connection, if the log has one.
    /// Blocking reads must time out strictly before it.
    fn connection_idle_timeout(&self) -> Option<Duration>;

    /// Appends a record to the stream, creating the stream if needed.
    async fn add(&self, stream: &str, fields: Fields) -> Result<RecordId, Self::Error>;

    /// Number of records currently in the stream.
    async fn len(&self, stream: &str) -> Result<u64, Self::Error>;

    /// Creates a consumer group. Fails with an error for which
    /// [`StreamLogError::is_group_exists`] is true if the group already exists.
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartPosition,
    ) -> Result<(), Self::Error>;

    /// Reads up to `count` records never delivered to the group, blocking up to
    /// `block` when none are available. Delivered records become pending for
    /// `consumer`; nothing is acknowledged.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Record>, Self::Error>;

    /// Acknowledges records, removing their pending entries. Returns how many
    /// entries were actually removed.
    async fn ack(&self, stream: &str, group: &str, ids: &[RecordId]) -> Result<u64, Self::Error>;

    /// Summarizes the group's pending entries.
    async fn pending_summary(&self, stream: &str, group: &str)
    -> Result<PendingSummary, Self::Error>;

    /// Lists pending entries in ascending id order, optionally restricted to
    /// one consumer.
    async fn pending_detail(
        &self,
        stream: &str,
        group: &str,
        consumer: Option<&str>,
        range: IdRange,
        count: usize,
    ) -> Result<Vec<PendingEntry>, Self::Error>;

    /// Transfers ownership of pending records idle for at least `min_idle` to
    /// `new_owner`, returning the claimed records.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        new_owner: &str,
        min_idle: Duration,
        ids: &[RecordId],
    ) -> Result<Vec<Record>, Self::Error>;

    /// Fetches records by id range in ascending order.
    async fn range(
        &self,
        stream: &str,
        range: IdRange,
        count: Option<usize>,
    ) -> Result<Vec<Record>, Self::Error>;

    /// Trims the stream to approximately `max_len` most recent records.
    /// Returns the number of records removed.
    async fn trim(&self, stream: &str, max_len: u64) -> Result<u64, Self::Error>;

    /// Removes every record with an id lower than `min_id`. Returns the number
    /// of records removed.
    async fn trim_before(&self, stream: &str, min_id: RecordId) -> Result<u64, Self::Error>;

    /// Names of the consumers known to the group.
    async fn list_consumers(&self, stream: &str, group: &str) -> Result<Vec<String>, Self::Error>;
}
