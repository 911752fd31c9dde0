//! The set of consumer groups the reclaimer sweeps.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

/// A `(stream, group)` pair.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    /// Stream key.
    pub stream: String,
    /// Group name.
    pub group: String,
}

impl GroupKey {
    /// Creates a new key.
    pub fn new(stream: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stream, self.group)
    }
}

/// Shared registry of consumer groups.
///
/// Listener runtimes register every group they bind to; applications may add
/// groups they only publish to.
#[derive(Clone, Debug, Default)]
pub struct GroupRegistry {
    groups: Arc<RwLock<BTreeSet<GroupKey>>>,
}

impl GroupRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a group. Returns `false` if it was already registered.
    pub fn register(&self, stream: impl Into<String>, group: impl Into<String>) -> bool {
        self.groups.write().insert(GroupKey::new(stream, group))
    }

    /// Whether a group is registered.
    #[must_use]
    pub fn contains(&self, stream: &str, group: &str) -> bool {
        self.groups.read().contains(&GroupKey::new(stream, group))
    }

    /// Registered groups in a stable order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<GroupKey> {
        self.groups.read().iter().cloned().collect()
    }
}
