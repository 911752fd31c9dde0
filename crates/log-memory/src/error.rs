use reclaim_log::StreamLogError;
use thiserror::Error;

/// Errors that can occur in the in-memory log.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The consumer group already exists.
    #[error("BUSYGROUP consumer group '{group}' already exists on stream '{stream}'")]
    GroupExists {
        /// Stream key.
        stream: String,
        /// Group name.
        group: String,
    },

    /// The stream or the consumer group does not exist.
    #[error("NOGROUP no consumer group '{group}' on stream '{stream}'")]
    NoSuchGroup {
        /// Stream key.
        stream: String,
        /// Group name.
        group: String,
    },
}

impl StreamLogError for Error {
    fn is_group_exists(&self) -> bool {
        matches!(self, Self::GroupExists { .. })
    }
}
