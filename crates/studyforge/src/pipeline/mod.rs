//! Pipeline machinery: queue, stage tracking, and the background worker

pub mod indexer;
pub mod organizer;
pub mod queue;
pub mod tracker;
pub mod worker;

pub use indexer::{EmbeddingIndexer, ScoredChunk};
pub use organizer::ModuleOrganizer;
pub use queue::{PipelineQueue, QueueStats};
pub use tracker::{AcquireOutcome, StageTracker};
pub use worker::PipelineWorker;
