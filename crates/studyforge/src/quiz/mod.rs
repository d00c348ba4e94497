//! Quiz generation and attempt grading

pub mod attempts;
pub mod generator;

pub use attempts::{AttemptEngine, AttemptStarted};
pub use generator::QuizGenerator;
