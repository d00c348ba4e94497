//! studyforge: document-to-assessment pipeline
//!
//! Turns an uploaded document into searchable, quiz-ready learning content:
//! extraction, chunking, embedding, module organization, quiz generation,
//! attempt grading, and personalized feedback. Processing is asynchronous,
//! idempotent per stage, and resumable after a crash or provider outage.

pub mod config;
pub mod error;
pub mod feedback;
pub mod generation;
pub mod ingestion;
pub mod pipeline;
pub mod providers;
pub mod quiz;
pub mod server;
pub mod storage;
pub mod types;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use types::{
    attempt::{AnswerSubmission, GradedResult, QuizAttempt},
    document::{Chunk, Document, DocumentStatus, PipelineStage, SourceFormat},
    feedback::{FeedbackContent, FeedbackReport, FeedbackStatus},
    module::CourseModule,
    quiz::{Question, Quiz},
};
