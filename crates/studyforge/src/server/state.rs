//! Shared application state
//!
//! Everything behind one `Arc`, so handlers and the background worker
//! clone cheaply and share the same database handle, providers, and queue.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::Result;
use crate::pipeline::{PipelineQueue, PipelineWorker, StageTracker};
use crate::providers::{build_providers, EmbeddingProvider, LlmProvider};
use crate::storage::{BlobStore, Database, FsBlobStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: AppConfig,
    /// SQLite metadata store
    db: Database,
    /// Raw upload bytes, content-addressed
    blobs: Arc<dyn BlobStore>,
    /// Embedding provider (Ollama or deterministic hash)
    embedder: Arc<dyn EmbeddingProvider>,
    /// Generation provider
    llm: Arc<dyn LlmProvider>,
    /// Per-(document, stage) execution tracker
    tracker: StageTracker,
    /// Bounded processing queue
    queue: PipelineQueue,
}

impl AppState {
    /// Create the application state, start the background worker, and
    /// re-queue any documents interrupted mid-pipeline.
    pub async fn new(config: AppConfig) -> Result<Self> {
        tracing::info!("Initializing application state...");

        let db = Database::new(&config.storage.database_path())?;
        tracing::info!("Database ready at {}", config.storage.database_path().display());

        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.storage.blob_dir())?);
        tracing::info!("Blob store ready at {}", config.storage.blob_dir().display());

        let (embedder, llm) = build_providers(&config)?;
        tracing::info!(
            "Providers initialized (embedding: {}, generation: {})",
            embedder.name(),
            llm.model()
        );

        let worker_count = config.pipeline.document_workers();
        let (queue, receiver) = PipelineQueue::new(worker_count, config.pipeline.queue_capacity);
        tracing::info!("Pipeline queue initialized with {} workers", worker_count);

        let state = Self::assemble(config, db, blobs, embedder, llm, queue);

        // Start the background worker with a clone of the state
        let worker = PipelineWorker::new(state.clone(), state.queue().clone());
        tokio::spawn(async move {
            worker.run(receiver).await;
        });

        // Resume documents that never reached a terminal status
        let unfinished = state.db().list_unfinished_documents()?;
        let mut resumed = 0usize;
        for document_id in unfinished {
            if state.queue().enqueue(document_id) {
                resumed += 1;
            }
        }
        tracing::info!("Re-queued {} unfinished documents", resumed);

        Ok(state)
    }

    /// Wire the state from prebuilt components. The worker is not started;
    /// callers drive processing themselves.
    pub(crate) fn assemble(
        config: AppConfig,
        db: Database,
        blobs: Arc<dyn BlobStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        queue: PipelineQueue,
    ) -> Self {
        let tracker = StageTracker::new(db.clone(), config.pipeline.stage_timeout_secs);
        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                blobs,
                embedder,
                llm,
                tracker,
                queue,
            }),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// Get the database handle
    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    /// Get the blob store
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.inner.blobs
    }

    /// Get the embedding provider
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.inner.embedder
    }

    /// Get the generation provider
    pub fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.inner.llm
    }

    /// Get the stage tracker
    pub fn tracker(&self) -> &StageTracker {
        &self.inner.tracker
    }

    /// Get the pipeline queue
    pub fn queue(&self) -> &PipelineQueue {
        &self.inner.queue
    }
}
