use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a record id string cannot be parsed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid record id: {0}")]
pub struct ParseRecordIdError(pub String);

/// Log-assigned identifier of a record, ordered first by milliseconds and then
/// by sequence within the millisecond.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId {
    /// Milliseconds part.
    pub ms: u64,

    /// Sequence number within the millisecond.
    pub seq: u64,
}

impl RecordId {
    /// The smallest possible id.
    pub const MIN: Self = Self { ms: 0, seq: 0 };

    /// The largest possible id.
    pub const MAX: Self = Self {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    /// Creates a new record id.
    #[must_use]
    pub const fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// The id immediately following this one, saturating at `MAX`.
    #[must_use]
    pub const fn next(self) -> Self {
        if self.seq < u64::MAX {
            Self {
                ms: self.ms,
                seq: self.seq + 1,
            }
        } else if self.ms < u64::MAX {
            Self {
                ms: self.ms + 1,
                seq: 0,
            }
        } else {
            self
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for RecordId {
    type Err = ParseRecordIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseRecordIdError(s.to_string());

        match s.split_once('-') {
            Some((ms, seq)) => Ok(Self {
                ms: ms.parse().map_err(|_| invalid())?,
                seq: seq.parse().map_err(|_| invalid())?,
            }),
            None => Ok(Self {
                ms: s.parse().map_err(|_| invalid())?,
                seq: 0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    #[test]
    fn test_parse_and_display() {
        let id: RecordId = "5-0".parse().unwrap();
        assert_eq!(id, RecordId::new(5, 0));
        assert_eq!(id.to_string(), "5-0");

        let bare: RecordId = "1700000000000".parse().unwrap();
        assert_eq!(bare, RecordId::new(1_700_000_000_000, 0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for input in ["", "5-x", "a-1", "1-2-3"] {
            assert_matches!(
                input.parse::<RecordId>(),
                Err(ParseRecordIdError(rejected)) if rejected == input
            );
        }
    }

    #[test]
    fn test_ordering() {
        assert!(RecordId::new(5, 0) < RecordId::new(5, 1));
        assert!(RecordId::new(5, 9) < RecordId::new(6, 0));
        assert_eq!(RecordId::new(5, 0).next(), RecordId::new(5, 1));
        assert_eq!(RecordId::new(5, u64::MAX).next(), RecordId::new(6, 0));
        assert_eq!(RecordId::MAX.next(), RecordId::MAX);
    }
}
