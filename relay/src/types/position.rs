use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Resumable position of a change record within its source.
///
/// Polling sources address rows by primary key, log-based sources by the
/// native offset of the transaction log. Positions of the same variant are
/// totally ordered; positions of different variants are never compared in
/// practice because a pipeline sticks to one source technology for its whole
/// life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePosition {
    /// Primary key of a row in a polled source table.
    RowId(i64),
    /// Native offset (LSN, binlog position) in a transaction log.
    LogOffset(u64),
}

impl SourcePosition {
    /// Returns true when `self` is strictly after `other`.
    ///
    /// Positions of different variants are incomparable and return false.
    pub fn is_after(&self, other: &SourcePosition) -> bool {
        matches!(self.partial_cmp(other), Some(Ordering::Greater))
    }
}

impl PartialOrd for SourcePosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (SourcePosition::RowId(a), SourcePosition::RowId(b)) => a.partial_cmp(b),
            (SourcePosition::LogOffset(a), SourcePosition::LogOffset(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourcePosition::RowId(id) => write!(f, "row:{id}"),
            SourcePosition::LogOffset(offset) => write!(f, "log:{offset}"),
        }
    }
}

/// Durable watermark recording that everything up to and including the wrapped
/// position has been published and acknowledged.
///
/// Owned by the offset store; advanced monotonically and read once at startup
/// to resume capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishPosition(pub SourcePosition);

impl PublishPosition {
    /// Returns the wrapped source position.
    pub fn position(&self) -> SourcePosition {
        self.0
    }
}

impl fmt::Display for PublishPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
