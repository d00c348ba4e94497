//! Aggregate progress rollups, recomputed on every grading event

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Module completion state for one user
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionStatus {
    InProgress,
    Completed,
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Per-(user, module) rollup, derived from the user's attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserModuleProgress {
    pub user_id: String,
    pub module_id: Uuid,
    /// Best score across attempts
    pub best_score: f64,
    /// Total attempts on this module's quiz
    pub attempts_count: u32,
    /// best_score / 100
    pub mastery_level: f64,
    /// COMPLETED once best_score reaches 70.0
    pub completion_status: CompletionStatus,
    pub last_accessed_at: DateTime<Utc>,
}

/// A concept with how often it was answered (in)correctly
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConceptCount {
    pub concept: String,
    pub count: u32,
}

/// Aggregates over a user's graded attempts on one document's modules
#[derive(Debug, Clone, Copy, Default)]
pub struct AttemptAggregates {
    /// Mean score across graded attempts; 0.0 when there are none
    pub average_score: f64,
    pub graded_attempts: u32,
    pub total_time_seconds: u32,
}

/// Per-(user, document) rollup, derived from all the user's attempts on the
/// document's modules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDocumentStats {
    pub user_id: String,
    pub document_id: Uuid,
    pub total_modules: u32,
    /// Modules the user has completed (best score >= 70.0)
    pub completed_modules: u32,
    /// Mean score across all attempts
    pub average_score: f64,
    /// Sum of time spent across all attempts
    pub total_time_spent_seconds: u32,
    /// Concepts missed at least twice, most-missed first
    pub weak_concepts: Vec<ConceptCount>,
    /// Concepts answered correctly at least twice, most-hit first
    pub strong_concepts: Vec<ConceptCount>,
    pub updated_at: DateTime<Utc>,
}
