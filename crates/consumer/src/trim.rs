//! Stream trimming sized by a group's pending backlog.

use crate::config::TrimConfig;
use crate::error::{Error, Result};

use reclaim_log::{IdRange, RecordId, StreamLog};
use tracing::{debug, info};

/// Result of one trim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrimOutcome {
    /// Number of most recent records the stream was sized to.
    pub target: u64,
    /// Oldest id kept, when anything was trimmed.
    pub retained_from: Option<RecordId>,
    /// Records removed from the head of the stream.
    pub removed: u64,
}

/// Trims a stream to roughly its group's pending count.
///
/// Pending count only approximates the live backlog: records appended after
/// the group's last delivery are not counted, so a busy stream can lose
/// undelivered records. `min_retained` bounds how far a trim may go. The
/// group's lowest pending record and everything after it are always kept.
#[derive(Clone, Debug)]
pub struct TrimHook<L> {
    log: L,
    config: TrimConfig,
}

impl<L: StreamLog> TrimHook<L> {
    /// Creates a new trim hook.
    pub const fn new(log: L, config: TrimConfig) -> Self {
        Self { log, config }
    }

    /// Trims `stream` to `max(total pending of group, min_retained)` records,
    /// stopping short of the group's lowest pending id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Log`] if a log call fails.
    pub async fn trim_group(&self, stream: &str, group: &str) -> Result<TrimOutcome> {
        let summary = self
            .log
            .pending_summary(stream, group)
            .await
            .map_err(|e| Error::log("pending_summary", &e))?;

        let target = summary.total.max(self.config.min_retained);
        let len = self
            .log
            .len(stream)
            .await
            .map_err(|e| Error::log("len", &e))?;

        let excess = usize::try_from(len.saturating_sub(target)).unwrap_or(usize::MAX);
        if excess == 0 {
            return Ok(TrimOutcome {
                target,
                retained_from: None,
                removed: 0,
            });
        }

        // One record past the excess is the first to keep
        let head = self
            .log
            .range(stream, IdRange::all(), Some(excess.saturating_add(1)))
            .await
            .map_err(|e| Error::log("range", &e))?;

        let mut boundary = match (head.get(excess), head.last()) {
            (Some(first_kept), _) => first_kept.id,
            (None, Some(last)) => last.id.next(),
            (None, None) => {
                return Ok(TrimOutcome {
                    target,
                    retained_from: None,
                    removed: 0,
                });
            }
        };

        if let Some(lowest) = summary.lowest_id {
            if lowest < boundary {
                debug!(%stream, %group, %lowest, "trim stops at lowest pending record");
                boundary = lowest;
            }
        }

        let removed = self
            .log
            .trim_before(stream, boundary)
            .await
            .map_err(|e| Error::log("trim_before", &e))?;

        info!(%stream, %group, target, %boundary, removed, "trimmed stream");

        Ok(TrimOutcome {
            target,
            retained_from: Some(boundary),
            removed,
        })
    }
}
