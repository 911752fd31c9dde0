//! Abstract interface for fleet-wide distributed locks.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

/// Marker trait for `LockManager` errors
pub trait LockManagerError: Debug + Error + Send + Sync + 'static {}

/// Represents the current status of a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    /// The lock is free.
    Free,

    /// The lock is held by another fleet member, identified by the String.
    HeldByOther(String),

    /// The lock is held by this manager's fleet member.
    HeldBySelf,
}

/// A distributed lock manager shared by every member of a fleet.
///
/// Locks carry a lease so a crashed holder cannot block the fleet forever.
/// Acquisition returns a guard that releases the lock when dropped, so every
/// exit path of the guarded section unlocks.
#[async_trait]
pub trait LockManager
where
    Self: Clone + Send + Sync + 'static,
{
    /// The error type for lock operations.
    type Error: LockManagerError;

    /// The guard type that releases the lock on drop.
    type Guard: Send + Sync + 'static;

    /// Checks the status of a lock.
    ///
    /// # Arguments
    /// * `resource_id`: The unique identifier for the resource.
    async fn check(&self, resource_id: &str) -> Result<LockStatus, Self::Error>;

    /// Whether this fleet member currently holds the lock.
    async fn is_held_by_self(&self, resource_id: &str) -> Result<bool, Self::Error> {
        Ok(self.check(resource_id).await? == LockStatus::HeldBySelf)
    }

    /// Acquires a lock, waiting indefinitely until it becomes available. The
    /// manager's default lease applies.
    ///
    /// # Arguments
    /// * `resource_id`: A unique identifier for the resource to be locked.
    async fn lock(&self, resource_id: &str) -> Result<Self::Guard, Self::Error>;

    /// Attempts to acquire a lock, waiting at most `wait`.
    ///
    /// Returns `Ok(Some(Guard))` on success and `Ok(None)` if the lock is still
    /// held by another member once `wait` has elapsed. The lock is released
    /// after `lease` even if the guard is never dropped.
    ///
    /// # Arguments
    /// * `resource_id`: A unique identifier for the resource to be locked.
    /// * `wait`: How long to keep retrying. `Duration::ZERO` tries once.
    /// * `lease`: How long the lock stays valid once acquired.
    async fn try_lock(
        &self,
        resource_id: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<Self::Guard>, Self::Error>;

    /// Releases a lock explicitly. Dropping the guard has the same effect.
    async fn unlock(&self, guard: Self::Guard) -> Result<(), Self::Error>;
}
