//! Prompt construction and payload parsing for the generation capability

pub mod payload;
pub mod prompt;

pub use payload::{parse_feedback_payload, parse_question_payload};
pub use prompt::{AnswerBreakdown, FeedbackContext, PromptBuilder};
