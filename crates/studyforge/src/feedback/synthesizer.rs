//! Personalized feedback synthesis for graded attempts.
//!
//! Feedback is best-effort: a failed report stays FAILED and the attempt
//! keeps its score and GRADED status untouched.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::config::FeedbackConfig;
use crate::error::{Error, Result};
use crate::generation::{AnswerBreakdown, FeedbackContext, PromptBuilder};
use crate::providers::LlmProvider;
use crate::storage::Database;
use crate::types::{AttemptStatus, FeedbackContent, QuizAttempt};

pub struct FeedbackSynthesizer {
    db: Database,
    llm: Arc<dyn LlmProvider>,
    config: FeedbackConfig,
}

impl FeedbackSynthesizer {
    pub fn new(db: Database, llm: Arc<dyn LlmProvider>, config: FeedbackConfig) -> Self {
        Self { db, llm, config }
    }

    /// Fill in the feedback report opened at grading time. On success the
    /// report moves to COMPLETED with content; on failure it moves to
    /// FAILED with the error message.
    pub async fn generate_for_attempt(&self, attempt_id: Uuid) -> Result<FeedbackContent> {
        match self.synthesize(attempt_id).await {
            Ok(content) => {
                self.db.complete_feedback(attempt_id, &content)?;
                tracing::info!("Feedback completed for attempt {}", attempt_id);
                Ok(content)
            }
            Err(e) => {
                tracing::warn!("Feedback failed for attempt {}: {}", attempt_id, e);
                self.db.fail_feedback(attempt_id, &e.to_string())?;
                Err(e)
            }
        }
    }

    async fn synthesize(&self, attempt_id: Uuid) -> Result<FeedbackContent> {
        let context = self.gather_context(attempt_id)?;
        let prompt = PromptBuilder::build_feedback_prompt(&context);

        let mut last_error = None;
        for round in 0..self.config.max_attempts {
            let raw = match self.llm.generate(&prompt, self.config.temperature).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(
                        "Feedback generation round {} failed for attempt {}: {}",
                        round + 1,
                        attempt_id,
                        e
                    );
                    last_error = Some(e);
                    continue;
                }
            };
            match crate::generation::parse_feedback_payload(&raw) {
                Ok(content) => return Ok(content),
                Err(e) => {
                    tracing::warn!(
                        "Feedback payload round {} invalid for attempt {}: {}",
                        round + 1,
                        attempt_id,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::generation(format!("No feedback produced for attempt {}", attempt_id))
        }))
    }

    /// Assemble the attempt, its answers, and the user's history on this
    /// document. Pure database reads; the LLM call happens afterwards.
    fn gather_context(&self, attempt_id: Uuid) -> Result<FeedbackContext> {
        let attempt = self
            .db
            .get_attempt(attempt_id)?
            .ok_or_else(|| Error::not_found(format!("Attempt {} not found", attempt_id)))?;
        if attempt.status != AttemptStatus::Graded {
            return Err(Error::internal(format!(
                "Attempt {} has not been graded",
                attempt_id
            )));
        }

        let quiz = self
            .db
            .get_quiz(attempt.quiz_id)?
            .ok_or_else(|| Error::not_found(format!("Quiz {} not found", attempt.quiz_id)))?;
        let module = self
            .db
            .get_module(quiz.module_id)?
            .ok_or_else(|| Error::not_found(format!("Module {} not found", quiz.module_id)))?;

        let answers = self.db.list_answers(attempt_id)?;
        let questions = self.db.list_questions(quiz.id)?;
        let by_id: HashMap<Uuid, usize> = questions
            .iter()
            .enumerate()
            .map(|(i, q)| (q.id, i))
            .collect();

        let mut breakdowns = Vec::with_capacity(answers.len());
        let mut missed_concepts = Vec::new();
        let mut correct_count = 0u32;
        for answer in &answers {
            let Some(&idx) = by_id.get(&answer.question_id) else {
                continue;
            };
            let question = &questions[idx];
            if answer.is_correct {
                correct_count += 1;
            } else if !question.concept_covered.is_empty()
                && !missed_concepts.contains(&question.concept_covered)
            {
                missed_concepts.push(question.concept_covered.clone());
            }
            breakdowns.push(AnswerBreakdown {
                question: question.question_text.clone(),
                your_answer: answer.user_answer.clone(),
                correct_answer: question.correct_answer.clone(),
                is_correct: answer.is_correct,
                concept: question.concept_covered.clone(),
            });
        }

        let history = self.db.list_graded_attempts(&attempt.user_id, quiz.id)?;
        let best_module_score = previous_best(&history, attempt_id);
        let aggregates = self
            .db
            .attempt_aggregates(&attempt.user_id, module.document_id)?;
        let recurring = self
            .db
            .concept_counts(&attempt.user_id, module.document_id, false, 2, 10)?;

        Ok(FeedbackContext {
            score: attempt.score.unwrap_or(0.0),
            total_questions: questions.len() as u32,
            correct_count,
            time_spent_seconds: attempt.time_spent_seconds,
            attempt_number: attempt.attempt_number,
            best_module_score,
            document_average: aggregates.average_score,
            missed_concepts,
            recurring_weak_concepts: recurring.into_iter().map(|c| c.concept).collect(),
            answers: breakdowns,
        })
    }
}

/// Best score over earlier graded attempts, 0.0 when this is the first
fn previous_best(history: &[QuizAttempt], current_id: Uuid) -> f64 {
    history
        .iter()
        .filter(|a| a.id != current_id)
        .filter_map(|a| a.score)
        .fold(0.0, f64::max)
}
