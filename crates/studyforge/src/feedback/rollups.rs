//! Progress rollups derived from graded attempts.
//!
//! Every value here is recomputed from the attempt history on each grading
//! event. Nothing is incremented in place, so replaying a recompute (crash
//! recovery, double delivery) always converges on the same numbers.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::Database;
use crate::types::{CompletionStatus, UserDocumentStats, UserModuleProgress};

/// Best score that marks a module COMPLETED
const COMPLETION_THRESHOLD: f64 = 70.0;

/// A concept must be hit this often before the rollup reports it
const CONCEPT_MIN_COUNT: u32 = 2;
const CONCEPT_LIMIT: u32 = 10;

#[derive(Clone)]
pub struct ProgressRollups {
    db: Database,
}

impl ProgressRollups {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Refresh the module progress and document stats touched by one
    /// graded attempt.
    pub fn recompute_for_attempt(&self, attempt_id: Uuid) -> Result<()> {
        let attempt = self
            .db
            .get_attempt(attempt_id)?
            .ok_or_else(|| Error::not_found(format!("Attempt {} not found", attempt_id)))?;
        let quiz = self
            .db
            .get_quiz(attempt.quiz_id)?
            .ok_or_else(|| Error::not_found(format!("Quiz {} not found", attempt.quiz_id)))?;
        let module = self
            .db
            .get_module(quiz.module_id)?
            .ok_or_else(|| Error::not_found(format!("Module {} not found", quiz.module_id)))?;

        self.recompute_module(&attempt.user_id, quiz.id, module.id)?;
        self.recompute_document(&attempt.user_id, module.document_id)?;
        Ok(())
    }

    fn recompute_module(&self, user_id: &str, quiz_id: Uuid, module_id: Uuid) -> Result<()> {
        let graded = self.db.list_graded_attempts(user_id, quiz_id)?;
        let best_score = graded
            .iter()
            .filter_map(|a| a.score)
            .fold(0.0f64, f64::max);
        let completion_status = if best_score >= COMPLETION_THRESHOLD {
            CompletionStatus::Completed
        } else {
            CompletionStatus::InProgress
        };

        self.db.upsert_module_progress(&UserModuleProgress {
            user_id: user_id.to_string(),
            module_id,
            best_score,
            attempts_count: graded.len() as u32,
            mastery_level: best_score / 100.0,
            completion_status,
            last_accessed_at: Utc::now(),
        })?;

        tracing::debug!(
            "Module progress for {} on {}: best {}, {} attempts, {}",
            user_id,
            module_id,
            best_score,
            graded.len(),
            completion_status.as_str()
        );
        Ok(())
    }

    fn recompute_document(&self, user_id: &str, document_id: Uuid) -> Result<()> {
        let modules = self.db.list_modules(document_id)?;
        let progress = self.db.list_module_progress(user_id, document_id)?;
        let completed = progress
            .iter()
            .filter(|p| p.completion_status == CompletionStatus::Completed)
            .count();

        let aggregates = self.db.attempt_aggregates(user_id, document_id)?;
        let weak_concepts =
            self.db
                .concept_counts(user_id, document_id, false, CONCEPT_MIN_COUNT, CONCEPT_LIMIT)?;
        let strong_concepts =
            self.db
                .concept_counts(user_id, document_id, true, CONCEPT_MIN_COUNT, CONCEPT_LIMIT)?;

        self.db.upsert_document_stats(&UserDocumentStats {
            user_id: user_id.to_string(),
            document_id,
            total_modules: modules.len() as u32,
            completed_modules: completed as u32,
            average_score: aggregates.average_score,
            total_time_spent_seconds: aggregates.total_time_seconds,
            weak_concepts,
            strong_concepts,
            updated_at: Utc::now(),
        })
    }
}
