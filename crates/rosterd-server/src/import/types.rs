//! Import pipeline data model
//!
//! [`UploadJob`] is the mutable state owned by one ingest run; everything a
//! client sees is a [`ProgressSnapshot`] projected from it. Recent row
//! outcomes are kept in a bounded ring so memory stays flat for large files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Lifecycle state of one upload job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Per-row result kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Success,
    Error,
    Skipped,
}

/// The recorded result of processing one CSV row.
///
/// Immutable once produced. `row` is 1-based and excludes the header line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowOutcome {
    pub row: u64,
    pub subject: String,
    pub kind: OutcomeKind,
    pub message: String,
    pub duration_ms: u64,
}

/// Point-in-time, read-only projection of an [`UploadJob`].
///
/// Snapshots for one job carry a strictly increasing `seq` and a
/// non-decreasing `processed` count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub upload_id: String,
    pub seq: u64,
    pub status: JobStatus,
    pub total: u64,
    pub processed: u64,
    pub success: u64,
    pub error: u64,
    pub skipped: u64,
    /// Derived completion percentage, 0 when `total` is 0.
    pub percent: f64,
    /// Job-level failure message, only set on `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub recent: Vec<RowOutcome>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Mutable state of one upload job.
///
/// Owned by the registry, mutated only by the ingest job that created it.
#[derive(Debug)]
pub struct UploadJob {
    pub id: String,
    pub status: JobStatus,
    pub total: u64,
    pub processed: u64,
    pub success: u64,
    pub error: u64,
    pub skipped: u64,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    recent: VecDeque<RowOutcome>,
    recent_capacity: usize,
    seq: u64,
}

impl UploadJob {
    pub fn new(id: String, total: u64, recent_capacity: usize) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            total,
            processed: 0,
            success: 0,
            error: 0,
            skipped: 0,
            failure: None,
            created_at: Utc::now(),
            finished_at: None,
            recent: VecDeque::with_capacity(recent_capacity),
            recent_capacity,
            seq: 0,
        }
    }

    /// Transition to `processing`. No-op unless the job is still queued.
    pub fn begin(&mut self) {
        if self.status == JobStatus::Queued {
            self.status = JobStatus::Processing;
        }
    }

    /// Record one row outcome, updating the tallies and the ring.
    pub fn record(&mut self, outcome: RowOutcome) {
        debug_assert!(self.processed < self.total, "processed must stay within total");
        match outcome.kind {
            OutcomeKind::Success => self.success += 1,
            OutcomeKind::Error => self.error += 1,
            OutcomeKind::Skipped => self.skipped += 1,
        }
        self.processed += 1;
        if self.recent.len() == self.recent_capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(outcome);
    }

    /// Transition to `completed`. Row-level errors do not prevent this.
    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    /// Transition to `failed` with a job-level message.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.failure = Some(message.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Read-only projection at the current sequence number.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let percent = if self.total == 0 {
            0.0
        } else {
            self.processed as f64 * 100.0 / self.total as f64
        };
        ProgressSnapshot {
            upload_id: self.id.clone(),
            seq: self.seq,
            status: self.status,
            total: self.total,
            processed: self.processed,
            success: self.success,
            error: self.error,
            skipped: self.skipped,
            percent,
            message: self.failure.clone(),
            recent: self.recent.iter().cloned().collect(),
            created_at: self.created_at,
            finished_at: self.finished_at,
        }
    }

    /// Projection with a freshly advanced sequence number.
    ///
    /// Used by the owning job when emitting to the publisher; plain readers
    /// use [`UploadJob::snapshot`] and never advance the sequence.
    pub fn next_snapshot(&mut self) -> ProgressSnapshot {
        self.seq += 1;
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(row: u64, kind: OutcomeKind) -> RowOutcome {
        RowOutcome {
            row,
            subject: format!("student {}", row),
            kind,
            message: String::new(),
            duration_ms: 1,
        }
    }

    #[test]
    fn tallies_stay_consistent() {
        let mut job = UploadJob::new("u1".into(), 5, 50);
        job.begin();
        job.record(outcome(1, OutcomeKind::Success));
        job.record(outcome(2, OutcomeKind::Error));
        job.record(outcome(3, OutcomeKind::Skipped));

        let snap = job.snapshot();
        assert_eq!(snap.processed, snap.success + snap.error + snap.skipped);
        assert_eq!(snap.processed, 3);
        assert!(snap.processed <= snap.total);
    }

    #[test]
    fn recent_ring_is_bounded() {
        let mut job = UploadJob::new("u1".into(), 10, 3);
        for row in 1..=10 {
            job.record(outcome(row, OutcomeKind::Success));
        }

        let snap = job.snapshot();
        assert_eq!(snap.recent.len(), 3);
        assert_eq!(snap.recent[0].row, 8);
        assert_eq!(snap.recent[2].row, 10);
    }

    #[test]
    fn percent_is_zero_for_empty_total() {
        let job = UploadJob::new("u1".into(), 0, 50);
        assert_eq!(job.snapshot().percent, 0.0);
    }

    #[test]
    fn next_snapshot_advances_seq_monotonically() {
        let mut job = UploadJob::new("u1".into(), 2, 50);
        job.begin();
        job.record(outcome(1, OutcomeKind::Success));
        let a = job.next_snapshot();
        job.record(outcome(2, OutcomeKind::Success));
        let b = job.next_snapshot();
        assert!(b.seq > a.seq);
        assert!(b.processed >= a.processed);
    }

    #[test]
    fn failure_message_surfaces_in_snapshot() {
        let mut job = UploadJob::new("u1".into(), 4, 50);
        job.begin();
        job.fail("source file unreadable");
        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.message.as_deref(), Some("source file unreadable"));
        assert!(job.is_terminal());
    }
}
