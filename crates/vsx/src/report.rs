//! 📋 Reports: what one refresh of one source amounted to.
//!
//! Per-record failures never escape `IngestWorker::process`. They end up here
//! instead, as counts, so "the pipeline swallowed it" always comes with a
//! receipt.

use std::fmt;
use std::time::Duration;

use crate::common::SourceRef;

/// 🧮 Per-record outcomes, summed over a file or a whole source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordTally {
    pub inserted: u64,
    pub merged: u64,
    /// Locations and kinds we don't ingest.
    pub skipped: u64,
    pub decode_errors: u64,
    pub parent_missing: u64,
    pub invalid: u64,
    pub storage_errors: u64,
}

impl RecordTally {
    pub fn absorb(&mut self, other: &RecordTally) {
        self.inserted += other.inserted;
        self.merged += other.merged;
        self.skipped += other.skipped;
        self.decode_errors += other.decode_errors;
        self.parent_missing += other.parent_missing;
        self.invalid += other.invalid;
        self.storage_errors += other.storage_errors;
    }

    /// ✅ Records that became exactly one insert or merge.
    pub fn persisted(&self) -> u64 {
        self.inserted + self.merged
    }

    /// 💀 Records that went in and did not come out the other side.
    pub fn rejected(&self) -> u64 {
        self.decode_errors + self.parent_missing + self.invalid + self.storage_errors
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    Completed,
    /// ☠️ Manifest fetch failed, or the store went away mid-source.
    Aborted { reason: String },
}

impl fmt::Display for SourceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceOutcome::Completed => f.write_str("completed"),
            SourceOutcome::Aborted { reason } => write!(f, "aborted: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub source: SourceRef,
    pub files_total: usize,
    /// 📄 Files that could not be opened, broke mid-stream, or were abandoned.
    pub files_failed: usize,
    pub records: RecordTally,
    pub outcome: SourceOutcome,
    pub elapsed: Duration,
}

impl SourceReport {
    pub fn aborted(source: SourceRef, reason: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            source,
            files_total: 0,
            files_failed: 0,
            records: RecordTally::default(),
            outcome: SourceOutcome::Aborted {
                reason: reason.into(),
            },
            elapsed,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == SourceOutcome::Completed
    }
}

/// 📣 Lifecycle of one dequeued source, as broadcast by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingEvent {
    Started(SourceRef),
    Finished(SourceReport),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_tallies_add_up() {
        let mut total = RecordTally {
            inserted: 2,
            decode_errors: 1,
            ..RecordTally::default()
        };
        total.absorb(&RecordTally {
            inserted: 1,
            merged: 4,
            parent_missing: 2,
            ..RecordTally::default()
        });

        assert_eq!(total.persisted(), 7);
        assert_eq!(total.rejected(), 3);
    }
}
