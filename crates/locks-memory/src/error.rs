use reclaim_locks::LockManagerError;
use thiserror::Error;

/// Errors that can occur when using the in-memory lock manager.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The guard belongs to a different lock table.
    #[error("guard for '{0}' was not issued by this lock manager")]
    ForeignGuard(String),
}

impl LockManagerError for Error {}
