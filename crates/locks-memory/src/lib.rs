//! In-memory (single process) implementation of fleet locks for local development.
//!
//! Several fleet members can be simulated in one process: [`MemoryLockManager::member`]
//! returns a handle with its own identity that shares the lock table.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reclaim_locks::{LockManager, LockStatus};
use tokio::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_LEASE: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct Holder {
    member: String,
    token: Uuid,
    expires_at: Instant,
}

type LockTable = Arc<Mutex<HashMap<String, Holder>>>;

/// Guard releasing an in-memory lock when dropped.
#[derive(Debug)]
pub struct MemoryLockGuard {
    table: LockTable,
    resource_id: String,
    token: Uuid,
}

impl MemoryLockGuard {
    /// The locked resource.
    #[must_use]
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl Drop for MemoryLockGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        // The lease may have expired and the lock moved on to someone else
        if table
            .get(&self.resource_id)
            .is_some_and(|holder| holder.token == self.token)
        {
            table.remove(&self.resource_id);
            debug!(resource_id = %self.resource_id, "lock released");
        }
    }
}

/// In-memory lock manager.
#[derive(Clone, Debug)]
pub struct MemoryLockManager {
    table: LockTable,
    member: String,
    default_lease: Duration,
}

impl Default for MemoryLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLockManager {
    /// Creates a new lock table with a randomly named member.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            member: Uuid::new_v4().to_string(),
            default_lease: DEFAULT_LEASE,
        }
    }

    /// Returns a handle for another fleet member sharing this lock table.
    #[must_use]
    pub fn member<S: Into<String>>(&self, member: S) -> Self {
        Self {
            table: self.table.clone(),
            member: member.into(),
            default_lease: self.default_lease,
        }
    }

    /// Sets the lease used by [`LockManager::lock`].
    #[must_use]
    pub const fn with_default_lease(mut self, lease: Duration) -> Self {
        self.default_lease = lease;
        self
    }

    /// Identity of this fleet member.
    #[must_use]
    pub fn member_id(&self) -> &str {
        &self.member
    }

    fn try_acquire(&self, resource_id: &str, lease: Duration) -> Option<MemoryLockGuard> {
        let now = Instant::now();
        let mut table = self.table.lock();

        if let Some(holder) = table.get(resource_id) {
            if holder.expires_at > now {
                debug!(resource_id, holder = %holder.member, "lock held");
                return None;
            }
            info!(resource_id, holder = %holder.member, "lock lease expired, taking over");
        }

        let token = Uuid::new_v4();
        table.insert(
            resource_id.to_string(),
            Holder {
                member: self.member.clone(),
                token,
                expires_at: now + lease,
            },
        );
        drop(table);

        debug!(resource_id, member = %self.member, ?lease, "lock acquired");

        Some(MemoryLockGuard {
            table: self.table.clone(),
            resource_id: resource_id.to_string(),
            token,
        })
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    type Error = Error;
    type Guard = MemoryLockGuard;

    async fn check(&self, resource_id: &str) -> Result<LockStatus, Self::Error> {
        let table = self.table.lock();
        Ok(match table.get(resource_id) {
            Some(holder) if holder.expires_at > Instant::now() => {
                if holder.member == self.member {
                    LockStatus::HeldBySelf
                } else {
                    LockStatus::HeldByOther(holder.member.clone())
                }
            }
            _ => LockStatus::Free,
        })
    }

    async fn lock(&self, resource_id: &str) -> Result<Self::Guard, Self::Error> {
        loop {
            if let Some(guard) = self.try_acquire(resource_id, self.default_lease) {
                return Ok(guard);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn try_lock(
        &self,
        resource_id: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<Self::Guard>, Self::Error> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(guard) = self.try_acquire(resource_id, lease) {
                return Ok(Some(guard));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn unlock(&self, guard: Self::Guard) -> Result<(), Self::Error> {
        if !Arc::ptr_eq(&self.table, &guard.table) {
            return Err(Error::ForeignGuard(guard.resource_id.clone()));
        }

        drop(guard);

        Ok(())
    }
}
