//! Configuration for listeners, the pending reclaimer and the trim hook.

use crate::error::{Error, Result};

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a listener runtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Maximum number of records per read.
    pub batch_size: usize,
    /// How long a read blocks waiting for records. Must be shorter than the
    /// log connection's idle timeout.
    pub poll_timeout: Duration,
    /// Pause before retrying a failed read.
    pub read_retry_backoff: Duration,
    /// How long shutdown waits for in-flight batches.
    pub shutdown_grace: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_timeout: Duration::from_secs(2),
            read_retry_backoff: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl ListenerConfig {
    /// Validates the configuration against the log's connection idle timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty batch, a zero poll timeout, or a
    /// poll timeout that is not strictly shorter than `connection_idle_timeout`.
    pub fn validate(&self, connection_idle_timeout: Option<Duration>) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".to_string()));
        }

        if self.poll_timeout.is_zero() {
            return Err(Error::Config("poll_timeout must be positive".to_string()));
        }

        if let Some(idle) = connection_idle_timeout {
            if self.poll_timeout >= idle {
                return Err(Error::Config(format!(
                    "poll_timeout ({:?}) must be shorter than the connection idle timeout ({idle:?})",
                    self.poll_timeout
                )));
            }
        }

        Ok(())
    }
}

/// Configuration for the pending reclaimer and its scheduler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReclaimerConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Fleet-wide lock key guarding a sweep.
    pub lock_key: String,
    /// How long to wait for the sweep lock before skipping the tick.
    pub lock_wait: Duration,
    /// Lease on the sweep lock. Should stay below `interval`.
    pub lock_lease: Duration,
    /// Entries idle for at most this long are never touched.
    pub idle_threshold: Duration,
    /// Minimum idle time passed to claim requests.
    pub claim_min_idle: Duration,
    /// Page size for pending-entry listings.
    pub page_size: usize,
    /// Timeout applied to every log call made during a sweep.
    pub call_timeout: Duration,
}

impl Default for ReclaimerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            lock_key: "reclaim:pending-sweep".to_string(),
            lock_wait: Duration::ZERO,
            lock_lease: Duration::from_secs(55),
            idle_threshold: Duration::from_secs(20),
            claim_min_idle: Duration::from_secs(10),
            page_size: 10,
            call_timeout: Duration::from_secs(5),
        }
    }
}

impl ReclaimerConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a value cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::Config("interval must be positive".to_string()));
        }

        if self.page_size == 0 {
            return Err(Error::Config("page_size must be positive".to_string()));
        }

        if self.lock_key.is_empty() {
            return Err(Error::Config("lock_key must not be empty".to_string()));
        }

        if self.lock_lease.is_zero() || self.call_timeout.is_zero() {
            return Err(Error::Config(
                "lock_lease and call_timeout must be positive".to_string(),
            ));
        }

        // A claim guard above the selection threshold would refuse entries the
        // policy just selected.
        if self.claim_min_idle > self.idle_threshold {
            return Err(Error::Config(format!(
                "claim_min_idle ({:?}) must not exceed idle_threshold ({:?})",
                self.claim_min_idle, self.idle_threshold
            )));
        }

        Ok(())
    }
}

/// Configuration for the trim hook.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimConfig {
    /// Never trim below this many records.
    pub min_retained: u64,
}

/// Configuration for consumer identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Host address to use instead of discovering it.
    pub host_ip: Option<IpAddr>,
}

/// All settings of a process, as loaded from a settings file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Identity settings.
    pub identity: IdentityConfig,
    /// Listener settings.
    pub listener: ListenerConfig,
    /// Reclaimer settings.
    pub reclaimer: ReclaimerConfig,
    /// Trim settings.
    pub trim: TrimConfig,
}
