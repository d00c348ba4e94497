//! Post-grading feedback synthesis and progress rollups

pub mod rollups;
pub mod synthesizer;

pub use rollups::ProgressRollups;
pub use synthesizer::FeedbackSynthesizer;
