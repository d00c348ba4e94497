//! Quiz and question types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Quiz difficulty level
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "EASY",
            Self::Medium => "MEDIUM",
            Self::Hard => "HARD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EASY" => Some(Self::Easy),
            "MEDIUM" => Some(Self::Medium),
            "HARD" => Some(Self::Hard),
            _ => None,
        }
    }
}

/// A generated quiz, immutable after creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    /// Unique quiz ID
    pub id: Uuid,
    /// Module this quiz assesses
    pub module_id: Uuid,
    /// Difficulty level
    pub difficulty: Difficulty,
    /// Number of questions
    pub total_questions: u32,
    /// Estimated time to complete, in minutes
    pub estimated_duration_minutes: u32,
    pub created_at: DateTime<Utc>,
}

impl Quiz {
    pub fn new(
        module_id: Uuid,
        difficulty: Difficulty,
        total_questions: u32,
        estimated_duration_minutes: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            module_id,
            difficulty,
            total_questions,
            estimated_duration_minutes,
            created_at: Utc::now(),
        }
    }
}

/// A multiple-choice question belonging to one quiz
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    /// Unique question ID
    pub id: Uuid,
    /// Parent quiz ID
    pub quiz_id: Uuid,
    /// Question text
    pub question_text: String,
    /// Ordered options; display order fixed at generation time
    pub options: Vec<String>,
    /// Text of the correct option; never exposed at attempt start
    pub correct_answer: String,
    /// Why the correct answer is right
    pub explanation: String,
    /// Specific topic the question tests
    pub concept_covered: String,
    /// Estimated difficulty, 0.0 (easy) to 1.0 (hard)
    pub difficulty_score: f64,
    /// 1 - max cosine similarity between distractors and the correct option
    pub distractor_quality_score: f64,
    /// Presentation order within the quiz (1-based)
    pub question_order: u32,
}

/// Question payload expected back from the generation capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    pub question_text: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub concept_covered: String,
    #[serde(default = "default_difficulty_score")]
    pub difficulty_score: f64,
}

fn default_difficulty_score() -> f64 {
    0.5
}

/// A question as shown at attempt start: no correct answer, no explanation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: Uuid,
    pub question_text: String,
    pub options: Vec<String>,
    pub question_order: u32,
}

impl From<&Question> for QuestionView {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id,
            question_text: q.question_text.clone(),
            options: q.options.clone(),
            question_order: q.question_order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_view_withholds_answer_fields() {
        let question = Question {
            id: Uuid::new_v4(),
            quiz_id: Uuid::new_v4(),
            question_text: "What is the capital of France?".to_string(),
            options: vec![
                "Paris".to_string(),
                "Lyon".to_string(),
                "Marseille".to_string(),
                "Nice".to_string(),
            ],
            correct_answer: "Paris".to_string(),
            explanation: "Paris has been the capital since 508 AD.".to_string(),
            concept_covered: "European capitals".to_string(),
            difficulty_score: 0.2,
            distractor_quality_score: 0.8,
            question_order: 1,
        };

        let view = QuestionView::from(&question);
        let payload = serde_json::to_string(&view).unwrap();
        assert!(payload.contains("What is the capital"));
        assert!(!payload.contains("correct_answer"));
        assert!(!payload.contains("explanation"));
        assert!(!payload.contains("508 AD"));
    }

    #[test]
    fn difficulty_round_trips() {
        for d in [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard] {
            assert_eq!(Difficulty::parse(d.as_str()), Some(d));
        }
        assert_eq!(Difficulty::parse("IMPOSSIBLE"), None);
        assert_eq!(Difficulty::default(), Difficulty::Medium);
    }
}
