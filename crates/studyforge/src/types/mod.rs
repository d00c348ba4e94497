//! Core data types

pub mod attempt;
pub mod document;
pub mod feedback;
pub mod module;
pub mod progress;
pub mod quiz;

pub use attempt::{
    AnswerResult, AnswerSubmission, AttemptStatus, GradedResult, QuizAttempt, UserAnswer,
};
pub use document::{
    Chunk, Document, DocumentStatus, ExtractedDocument, PageContent, PipelineStage, SourceFormat,
    StageProgress,
};
pub use feedback::{FeedbackContent, FeedbackReport, FeedbackStatus};
pub use module::CourseModule;
pub use progress::{
    AttemptAggregates, CompletionStatus, ConceptCount, UserDocumentStats, UserModuleProgress,
};
pub use quiz::{Difficulty, GeneratedQuestion, Question, QuestionView, Quiz};
