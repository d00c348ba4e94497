//! Feedback report types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a feedback report
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackStatus {
    Generating,
    Completed,
    Failed,
}

impl FeedbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generating => "GENERATING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GENERATING" => Some(Self::Generating),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Structured feedback content produced by the synthesizer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackContent {
    /// Narrative summary of the attempt
    #[serde(default)]
    pub overall_feedback: String,
    /// Topics the learner handled well
    #[serde(default)]
    pub strengths: Vec<String>,
    /// Topics that need work, with explanations
    #[serde(default)]
    pub weaknesses: Vec<String>,
    /// Suggested topics to review next
    #[serde(default)]
    pub recommended_topics: Vec<String>,
    /// Motivational closing message
    #[serde(default)]
    pub personalized_message: String,
}

/// AI-synthesized narrative derived from a graded attempt
///
/// Created in GENERATING when the attempt is graded; mutated exactly once by
/// the synthesizer; best-effort and never affects the attempt's score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackReport {
    pub attempt_id: Uuid,
    pub status: FeedbackStatus,
    /// Present once status is COMPLETED
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<FeedbackContent>,
    /// Failure reason when status is FAILED
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeedbackReport {
    /// Fresh report, created at grading time
    pub fn generating(attempt_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            attempt_id,
            status: FeedbackStatus::Generating,
            content: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
