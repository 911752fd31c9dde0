use std::time::Duration;

use reclaim_locks::LockManagerError;
use reclaim_log::StreamLogError;
use thiserror::Error;

/// Result type for consumer-group operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur in the consumer-group runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration rejected at startup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The host address could not be resolved, so no consumer name can be derived.
    #[error("could not resolve host address for consumer identity: {0}")]
    Identity(#[source] std::io::Error),

    /// A lock manager call failed.
    #[error("lock operation '{op}' failed: {message}")]
    Lock {
        /// Name of the failed operation.
        op: &'static str,
        /// Error reported by the lock manager.
        message: String,
    },

    /// A log call failed.
    #[error("log operation '{op}' failed: {message}")]
    Log {
        /// Name of the failed operation.
        op: &'static str,
        /// Error reported by the log.
        message: String,
        /// Whether the log classified the error as transient.
        transient: bool,
    },

    /// A log call did not complete in time.
    #[error("log operation '{op}' timed out after {timeout:?}")]
    Timeout {
        /// Name of the timed out operation.
        op: &'static str,
        /// The per-call timeout.
        timeout: Duration,
    },

    /// The component has already been started.
    #[error("already started")]
    AlreadyStarted,

    /// The runtime is shutting down and accepts no new listeners.
    #[error("listener runtime is shut down")]
    ShutDown,

    /// In-flight batches did not finish within the grace period.
    #[error("in-flight batches still running after {0:?} grace period")]
    ShutdownTimedOut(Duration),
}

impl Error {
    pub(crate) fn log<E: StreamLogError>(op: &'static str, error: &E) -> Self {
        Self::Log {
            op,
            message: error.to_string(),
            transient: error.is_transient(),
        }
    }

    pub(crate) fn lock<E: LockManagerError>(op: &'static str, error: &E) -> Self {
        Self::Lock {
            op,
            message: error.to_string(),
        }
    }
}
