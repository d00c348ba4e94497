//! Quiz attempt lifecycle: start, submit, grade.
//!
//! Grading compares answer text against the stored correct option text,
//! trimmed and case-sensitive. Correctness is text-based rather than
//! index-based because option display order is fixed at generation time.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::Database;
use crate::types::{
    AnswerResult, AnswerSubmission, AttemptStatus, GradedResult, QuestionView, UserAnswer,
};

/// Attempt-start payload: questions carry options but never the correct
/// answer designation or the explanation
#[derive(Debug, Clone, Serialize)]
pub struct AttemptStarted {
    pub attempt_id: Uuid,
    pub quiz_id: Uuid,
    pub attempt_number: u32,
    pub estimated_duration_minutes: u32,
    pub questions: Vec<QuestionView>,
}

#[derive(Clone)]
pub struct AttemptEngine {
    db: Database,
}

impl AttemptEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Start a fresh attempt on a quiz
    pub fn start(&self, user_id: &str, quiz_id: Uuid) -> Result<AttemptStarted> {
        let quiz = self
            .db
            .get_quiz(quiz_id)?
            .ok_or_else(|| Error::not_found(format!("Quiz {} not found", quiz_id)))?;

        let questions = self.db.list_questions(quiz.id)?;
        let attempt = self.db.create_attempt(user_id, quiz.id)?;

        tracing::info!(
            "User {} started attempt {} (#{}) on quiz {}",
            user_id,
            attempt.id,
            attempt.attempt_number,
            quiz.id
        );
        Ok(AttemptStarted {
            attempt_id: attempt.id,
            quiz_id: quiz.id,
            attempt_number: attempt.attempt_number,
            estimated_duration_minutes: quiz.estimated_duration_minutes,
            questions: questions.iter().map(QuestionView::from).collect(),
        })
    }

    /// Grade a submission. Every question must be answered or the call
    /// fails with `IncompleteSubmission` before anything is written; the
    /// answer rows, score, and GRADED transition then land in one
    /// transaction, so a concurrent duplicate submission observes
    /// `AlreadySubmitted` and changes nothing.
    pub fn submit(
        &self,
        user_id: &str,
        attempt_id: Uuid,
        answers: &[AnswerSubmission],
    ) -> Result<GradedResult> {
        let attempt = self
            .db
            .get_attempt(attempt_id)?
            .filter(|a| a.user_id == user_id)
            .ok_or_else(|| Error::not_found(format!("Attempt {} not found", attempt_id)))?;

        if attempt.status != AttemptStatus::InProgress {
            return Err(Error::AlreadySubmitted);
        }

        let questions = self.db.list_questions(attempt.quiz_id)?;
        if questions.is_empty() {
            return Err(Error::internal(format!(
                "Quiz {} has no questions",
                attempt.quiz_id
            )));
        }

        let submitted: HashMap<Uuid, &AnswerSubmission> =
            answers.iter().map(|a| (a.question_id, a)).collect();

        let missing = questions
            .iter()
            .filter(|q| !submitted.contains_key(&q.id))
            .count();
        if missing > 0 {
            return Err(Error::incomplete_submission(format!(
                "{} of {} questions unanswered",
                missing,
                questions.len()
            )));
        }

        let mut rows = Vec::with_capacity(questions.len());
        let mut results = Vec::with_capacity(questions.len());
        let mut correct_count = 0u32;
        let mut total_time = 0u32;

        for question in &questions {
            let submission = submitted[&question.id];
            let is_correct = submission.user_answer.trim() == question.correct_answer.trim();
            if is_correct {
                correct_count += 1;
            }
            total_time = total_time.saturating_add(submission.time_spent_seconds);

            rows.push(UserAnswer {
                attempt_id,
                question_id: question.id,
                user_answer: submission.user_answer.clone(),
                is_correct,
                time_spent_seconds: submission.time_spent_seconds,
            });
            results.push(AnswerResult {
                question_id: question.id,
                your_answer: submission.user_answer.clone(),
                is_correct,
                correct_answer: if is_correct {
                    None
                } else {
                    Some(question.correct_answer.clone())
                },
                explanation: question.explanation.clone(),
            });
        }

        let score = round_score(correct_count, questions.len() as u32);

        if !self.db.finalize_attempt(attempt_id, &rows, score, total_time)? {
            return Err(Error::AlreadySubmitted);
        }

        tracing::info!(
            "Graded attempt {}: {}/{} correct, score {}",
            attempt_id,
            correct_count,
            questions.len(),
            score
        );
        Ok(GradedResult {
            attempt_id,
            score,
            correct_answers: correct_count,
            total_questions: questions.len() as u32,
            time_spent_seconds: total_time,
            feedback_status: "GENERATING".to_string(),
            results,
        })
    }
}

/// 100 * correct / total, rounded to one decimal
fn round_score(correct: u32, total: u32) -> f64 {
    (100.0 * correct as f64 / total as f64 * 10.0).round() / 10.0
}
