//! Consumer-group runtime with fleet-wide recovery of stuck pending records.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod bootstrap;
mod config;
mod error;
mod identity;
mod listener;
mod middleware;
mod policy;
mod reclaimer;
mod registry;
mod runtime;
mod scheduler;
mod trim;

#[cfg(test)]
mod testing;

pub use bootstrap::{GroupCreation, ensure_group};
pub use config::{IdentityConfig, ListenerConfig, ReclaimerConfig, Settings, TrimConfig};
pub use error::{Error, Result};
pub use identity::{consumer_name, format_consumer_name};
pub use listener::{BoxError, ConsumerGroupBinding, ListenerExt, StreamListener};
pub use middleware::{LockGuarded, LockKey, MiddlewareError, Timeout, Traced};
pub use policy::{Decision, ReclaimPolicy};
pub use reclaimer::{PendingReclaimer, PendingReclaimerOptions, SweepOutcome, SweepReport};
pub use registry::{GroupKey, GroupRegistry};
pub use runtime::{
    ListenerRuntime, ListenerRuntimeOptions, RemediationOutcome, RemediationReport,
};
pub use scheduler::ReclaimScheduler;
pub use trim::{TrimHook, TrimOutcome};
