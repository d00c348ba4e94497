//! Quiz attempt, answer, and grading types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a quiz attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
    Graded,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Submitted => "SUBMITTED",
            Self::Graded => "GRADED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IN_PROGRESS" => Some(Self::InProgress),
            "SUBMITTED" => Some(Self::Submitted),
            "GRADED" => Some(Self::Graded),
            _ => None,
        }
    }
}

/// One user's single pass through a quiz's questions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAttempt {
    /// Unique attempt ID
    pub id: Uuid,
    /// Answering user
    pub user_id: String,
    /// Quiz being attempted
    pub quiz_id: Uuid,
    /// 1-based sequence number among this user's attempts on the quiz
    pub attempt_number: u32,
    /// Lifecycle status
    pub status: AttemptStatus,
    /// Score out of 100, set at grading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Total seconds reported across answers
    pub time_spent_seconds: u32,
    pub started_at: DateTime<Utc>,
    /// Set when the attempt is graded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl QuizAttempt {
    pub fn new(user_id: String, quiz_id: Uuid, attempt_number: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            quiz_id,
            attempt_number,
            status: AttemptStatus::InProgress,
            score: None,
            time_spent_seconds: 0,
            started_at: Utc::now(),
            submitted_at: None,
        }
    }
}

/// A stored answer, correctness derived server-side at grading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAnswer {
    pub attempt_id: Uuid,
    pub question_id: Uuid,
    /// Answer text as submitted
    pub user_answer: String,
    pub is_correct: bool,
    pub time_spent_seconds: u32,
}

/// One answer in a submission request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerSubmission {
    pub question_id: Uuid,
    pub user_answer: String,
    #[serde(default)]
    pub time_spent_seconds: u32,
}

/// Per-question outcome in a graded result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    pub question_id: Uuid,
    pub your_answer: String,
    pub is_correct: bool,
    /// Revealed only when the answer was wrong
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    pub explanation: String,
}

/// The graded outcome of a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradedResult {
    pub attempt_id: Uuid,
    /// 100 * correct / total, one decimal
    pub score: f64,
    pub correct_answers: u32,
    pub total_questions: u32,
    pub time_spent_seconds: u32,
    /// Feedback report status at grading time (always GENERATING)
    pub feedback_status: String,
    /// Per-question outcomes in question order
    pub results: Vec<AnswerResult>,
}
