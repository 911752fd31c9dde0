use crate::id::RecordId;

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The opaque field map carried by a record.
pub type Fields = BTreeMap<String, Bytes>;

/// An immutable entry in a stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Log-assigned id, monotonically increasing within the stream.
    pub id: RecordId,

    /// Key of the stream the record belongs to.
    pub stream: String,

    /// Serialized message.
    pub fields: Fields,
}

impl Record {
    /// Returns the value of a field, if present.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Bytes> {
        self.fields.get(name)
    }
}

/// Where a newly created consumer group starts delivering from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartPosition {
    /// Only records appended after the group is created.
    #[default]
    NewOnly,

    /// Every record currently in the stream.
    Beginning,

    /// Records with an id strictly greater than the given one.
    After(RecordId),
}

/// An inclusive range of record ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    /// Lowest id in the range.
    pub start: RecordId,

    /// Highest id in the range.
    pub end: RecordId,
}

impl IdRange {
    /// Every possible id.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            start: RecordId::MIN,
            end: RecordId::MAX,
        }
    }

    /// Exactly one id.
    #[must_use]
    pub const fn single(id: RecordId) -> Self {
        Self { start: id, end: id }
    }

    /// Every id from `start` upwards.
    #[must_use]
    pub const fn starting_at(start: RecordId) -> Self {
        Self {
            start,
            end: RecordId::MAX,
        }
    }

    /// Whether the range contains the id.
    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.start <= id && id <= self.end
    }
}

impl Default for IdRange {
    fn default() -> Self {
        Self::all()
    }
}
