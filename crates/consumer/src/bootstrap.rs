//! Idempotent consumer-group creation.

use crate::error::{Error, Result};

use reclaim_log::{StartPosition, StreamLog, StreamLogError};
use tracing::{debug, info};

/// What [`ensure_group`] found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupCreation {
    /// The group was created by this call.
    Created,

    /// The group already existed and was left unchanged.
    AlreadyExists,
}

/// Ensures a consumer group exists on `stream`, positioned at new records only.
///
/// Several processes may race to create the same group at startup, so the
/// log's "already exists" failure is a success here. Every other failure is
/// returned.
///
/// # Errors
///
/// Returns [`Error::Log`] if the log fails for any other reason.
pub async fn ensure_group<L: StreamLog>(log: &L, stream: &str, group: &str) -> Result<GroupCreation> {
    match log.create_group(stream, group, StartPosition::NewOnly).await {
        Ok(()) => {
            info!(stream, group, "created consumer group");
            Ok(GroupCreation::Created)
        }
        Err(e) if e.is_group_exists() => {
            debug!(stream, group, "consumer group already exists");
            Ok(GroupCreation::AlreadyExists)
        }
        Err(e) => Err(Error::log("create_group", &e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing::FlakyLog;

    use assert_matches::assert_matches;
    use bytes::Bytes;
    use reclaim_log::Fields;
    use reclaim_log_memory::MemoryStreamLog;
    use std::time::Duration;

    #[tokio::test]
    async fn test_ensure_group_is_idempotent() {
        let log = MemoryStreamLog::default();

        assert_eq!(
            ensure_group(&log, "orders", "billing").await.unwrap(),
            GroupCreation::Created
        );

        let id = log
            .add("orders", Fields::from([("n".to_string(), Bytes::from("1"))]))
            .await
            .unwrap();

        assert_eq!(
            ensure_group(&log, "orders", "billing").await.unwrap(),
            GroupCreation::AlreadyExists
        );

        // The second call must not reposition the group
        let records = log
            .read_group("orders", "billing", "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
    }

    #[tokio::test]
    async fn test_ensure_group_surfaces_other_errors() {
        let log = FlakyLog::new(MemoryStreamLog::default());
        log.fail_next("create_group", 1);

        assert_matches!(
            ensure_group(&log, "orders", "billing").await,
            Err(Error::Log {
                op: "create_group",
                ..
            })
        );
    }
}
