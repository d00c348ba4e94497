//! Per-(document, stage) idempotency tracking.
//!
//! Every stage execution first asks the tracker for ownership of the
//! (document, stage) slot. Exactly one caller is granted; finished stages
//! are skipped on retry; a RUNNING slot whose holder has gone quiet past
//! the staleness window is reclaimed.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::storage::Database;
use crate::types::PipelineStage;

/// Outcome of a stage acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Caller owns the stage and must run it to completion or failure
    Granted,
    /// Another worker holds the stage; do nothing
    AlreadyRunning,
    /// The stage finished earlier; skip it
    AlreadyDone,
}

/// Status of a (document, stage) execution record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageJobStatus {
    Running,
    Done,
    Failed,
}

impl StageJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(Self::Running),
            "DONE" => Some(Self::Done),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One (document, stage) execution record
#[derive(Debug, Clone)]
pub struct StageJob {
    pub document_id: Uuid,
    pub stage: PipelineStage,
    pub status: StageJobStatus,
    /// Times this stage has been re-granted after failure or staleness
    pub retry_count: u32,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Grants at most one live execution of each pipeline stage per document
#[derive(Clone)]
pub struct StageTracker {
    db: Database,
    stale_after_secs: i64,
}

impl StageTracker {
    pub fn new(db: Database, stale_after_secs: u64) -> Self {
        Self {
            db,
            stale_after_secs: stale_after_secs as i64,
        }
    }

    /// Try to take ownership of a stage for a document
    pub fn acquire(&self, document_id: Uuid, stage: PipelineStage) -> Result<AcquireOutcome> {
        self.db
            .acquire_stage(document_id, stage, self.stale_after_secs)
    }

    /// Record completion. Returns false when the slot was not RUNNING,
    /// so DONE can only be recorded once.
    pub fn complete(&self, document_id: Uuid, stage: PipelineStage) -> Result<bool> {
        self.db.complete_stage(document_id, stage)
    }

    /// Record a failure; a later acquire will be granted again
    pub fn fail(&self, document_id: Uuid, stage: PipelineStage, error: &str) -> Result<()> {
        self.db.fail_stage(document_id, stage, error)
    }

    pub fn job(&self, document_id: Uuid, stage: PipelineStage) -> Result<Option<StageJob>> {
        self.db.get_stage_job(document_id, stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_stages_are_skipped_on_retry() {
        let tracker = StageTracker::new(Database::in_memory().unwrap(), 600);
        let doc_id = Uuid::new_v4();

        assert_eq!(
            tracker.acquire(doc_id, PipelineStage::Extract).unwrap(),
            AcquireOutcome::Granted
        );
        assert!(tracker.complete(doc_id, PipelineStage::Extract).unwrap());
        assert_eq!(
            tracker.acquire(doc_id, PipelineStage::Extract).unwrap(),
            AcquireOutcome::AlreadyDone
        );
        // Completion is recorded exactly once
        assert!(!tracker.complete(doc_id, PipelineStage::Extract).unwrap());
    }

    #[test]
    fn concurrent_holders_are_refused_and_failures_regranted() {
        let db = Database::in_memory().unwrap();
        let a = StageTracker::new(db.clone(), 600);
        let b = StageTracker::new(db, 600);
        let doc_id = Uuid::new_v4();

        assert_eq!(
            a.acquire(doc_id, PipelineStage::Embed).unwrap(),
            AcquireOutcome::Granted
        );
        assert_eq!(
            b.acquire(doc_id, PipelineStage::Embed).unwrap(),
            AcquireOutcome::AlreadyRunning
        );

        a.fail(doc_id, PipelineStage::Embed, "provider unreachable")
            .unwrap();
        let job = a.job(doc_id, PipelineStage::Embed).unwrap().unwrap();
        assert_eq!(job.status, StageJobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("provider unreachable"));

        assert_eq!(
            b.acquire(doc_id, PipelineStage::Embed).unwrap(),
            AcquireOutcome::Granted
        );
        assert_eq!(
            b.job(doc_id, PipelineStage::Embed).unwrap().unwrap().retry_count,
            1
        );
    }
}
