//! Background worker driving documents through the pipeline.
//!
//! One task per document, bounded by a semaphore. Each document walks the
//! stages in order; ownership of every stage goes through the tracker, so
//! a stage that already ran (or is running elsewhere) is never repeated.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ingestion::{ContentExtractor, TextChunker};
use crate::pipeline::indexer::EmbeddingIndexer;
use crate::pipeline::organizer::ModuleOrganizer;
use crate::pipeline::queue::PipelineQueue;
use crate::pipeline::tracker::AcquireOutcome;
use crate::quiz::QuizGenerator;
use crate::server::state::AppState;
use crate::types::{Document, DocumentStatus, ExtractedDocument, PipelineStage};

/// Worker processing queued documents in the background
pub struct PipelineWorker {
    state: AppState,
    queue: PipelineQueue,
    parallel_documents: usize,
    stage_timeout: Duration,
}

impl PipelineWorker {
    pub fn new(state: AppState, queue: PipelineQueue) -> Self {
        let config = state.config();
        let parallel_documents = config.pipeline.document_workers();
        let stage_timeout = Duration::from_secs(config.pipeline.stage_timeout_secs);

        tracing::info!(
            "Worker configured: {} parallel documents, {}s stage timeout",
            parallel_documents,
            config.pipeline.stage_timeout_secs
        );

        Self {
            state,
            queue,
            parallel_documents,
            stage_timeout,
        }
    }

    /// Pull document ids off the queue and process them concurrently
    pub async fn run(self, mut receiver: mpsc::Receiver<Uuid>) {
        tracing::info!(
            "Pipeline worker started: {} parallel documents",
            self.parallel_documents
        );

        let semaphore = Arc::new(Semaphore::new(self.parallel_documents));
        let worker = Arc::new(self);

        while let Some(document_id) = receiver.recv().await {
            let worker = worker.clone();
            let sem = semaphore.clone();

            tokio::spawn(async move {
                let _permit = sem.acquire().await.unwrap();

                if let Err(e) = worker.process_document(document_id).await {
                    tracing::error!("Document {} failed: {}", document_id, e);
                }
                worker.queue.mark_done(document_id);
            });
        }

        tracing::info!("Pipeline worker shutting down");
    }

    /// Drive one document through every stage in order.
    ///
    /// Extracted text is carried between the extract and chunk stages in
    /// memory; when the extract stage was finished by an earlier run, the
    /// chunk stage re-derives it from the stored blob instead.
    pub async fn process_document(&self, document_id: Uuid) -> Result<()> {
        let db = self.state.db();
        let Some(document) = db.get_document(document_id)? else {
            tracing::warn!("Document {} vanished before processing", document_id);
            return Ok(());
        };
        if document.status.is_terminal() {
            tracing::debug!(
                "[{}] Already {}, nothing to do",
                document_id,
                document.status.as_str()
            );
            return Ok(());
        }

        tracing::info!("[{}] Processing '{}'", document_id, document.title);
        let mut extracted: Option<ExtractedDocument> = None;

        for stage in PipelineStage::ALL {
            // Walk the status ladder for every stage, including ones that
            // finished in an earlier run, so a retried document reaches
            // COMPLETED without skipping a status.
            if !self.advance_status(document_id, stage)? {
                tracing::warn!(
                    "[{}] No longer processable, stopping at {}",
                    document_id,
                    stage.as_str()
                );
                return Ok(());
            }

            match self.state.tracker().acquire(document_id, stage)? {
                AcquireOutcome::AlreadyDone => {
                    tracing::debug!("[{}] Stage {} already done", document_id, stage.as_str());
                    continue;
                }
                AcquireOutcome::AlreadyRunning => {
                    tracing::info!(
                        "[{}] Stage {} held by another worker, leaving it",
                        document_id,
                        stage.as_str()
                    );
                    return Ok(());
                }
                AcquireOutcome::Granted => {}
            }

            let started = std::time::Instant::now();
            let result = match timeout(
                self.stage_timeout,
                self.run_stage(document_id, stage, &mut extracted),
            )
            .await
            {
                Ok(inner) => inner,
                Err(_) => Err(Error::stage(
                    stage.as_str(),
                    format!("Timed out after {}s", self.stage_timeout.as_secs()),
                )),
            };

            match result {
                Ok(()) => {
                    self.state.tracker().complete(document_id, stage)?;
                    tracing::info!(
                        "[{}] Stage {} done in {:.1}s",
                        document_id,
                        stage.as_str(),
                        started.elapsed().as_secs_f64()
                    );
                }
                Err(e) => {
                    tracing::error!(
                        "[{}] Stage {} failed: {}",
                        document_id,
                        stage.as_str(),
                        e
                    );
                    self.state.tracker().fail(document_id, stage, &e.to_string())?;
                    db.mark_document_failed(document_id, &e.to_string())?;
                    return Err(e);
                }
            }
        }

        db.advance_document_status(document_id, DocumentStatus::Completed)?;
        tracing::info!("[{}] COMPLETE", document_id);
        Ok(())
    }

    /// Move the document to this stage's running status. Returns false
    /// when the document is gone or already terminal.
    fn advance_status(&self, document_id: Uuid, stage: PipelineStage) -> Result<bool> {
        let Some(document) = self.state.db().get_document(document_id)? else {
            return Ok(false);
        };
        if document.status.is_terminal() {
            return Ok(false);
        }

        let target = stage.running_status();
        if document.status.rank() < target.rank() {
            self.state.db().advance_document_status(document_id, target)?;
        }
        Ok(true)
    }

    async fn run_stage(
        &self,
        document_id: Uuid,
        stage: PipelineStage,
        extracted: &mut Option<ExtractedDocument>,
    ) -> Result<()> {
        match stage {
            PipelineStage::Extract => {
                let document = self.load_document(document_id)?;
                *extracted = Some(self.extract_content(&document).await?);
                Ok(())
            }
            PipelineStage::Chunk => self.chunk_document(document_id, extracted).await,
            PipelineStage::Embed => {
                let config = self.state.config();
                let indexer = EmbeddingIndexer::new(
                    self.state.db().clone(),
                    self.state.embedder().clone(),
                    config.pipeline.embedding_workers(),
                    Duration::from_secs(config.pipeline.call_timeout_secs),
                );
                let embedded = indexer.embed_document(document_id).await?;
                tracing::info!("[{}] Embedded {} chunks", document_id, embedded);
                Ok(())
            }
            PipelineStage::Organize => {
                let organizer = ModuleOrganizer::new(
                    self.state.db().clone(),
                    self.state.config().organizer.clone(),
                );
                let modules = organizer.organize_document(document_id)?;
                self.state
                    .db()
                    .set_module_counters(document_id, 0, modules.len() as u32)?;
                Ok(())
            }
            PipelineStage::GenerateQuizzes => self.generate_quizzes(document_id).await,
        }
    }

    async fn extract_content(&self, document: &Document) -> Result<ExtractedDocument> {
        let bytes = self.state.blobs().get(&document.blob_id).await?;
        let format = document.format;

        // Parsing is CPU-bound; keep it off the async executor
        let extracted =
            tokio::task::spawn_blocking(move || ContentExtractor::extract(format, &bytes))
                .await
                .map_err(|e| Error::internal(format!("Extraction task failed: {}", e)))??;

        tracing::info!(
            "[{}] Extracted {} pages, {} chars",
            document.id,
            extracted.total_pages,
            extracted.content.len()
        );
        Ok(extracted)
    }

    async fn chunk_document(
        &self,
        document_id: Uuid,
        extracted: &mut Option<ExtractedDocument>,
    ) -> Result<()> {
        let document = self.load_document(document_id)?;
        let text = match extracted.take() {
            Some(text) => text,
            // Extract finished in an earlier run; extraction is
            // deterministic, so re-deriving gives the same text
            None => self.extract_content(&document).await?,
        };

        let chunker = TextChunker::new(&self.state.config().chunking);
        let chunks = chunker.chunk_document(document_id, &text);

        // A crash mid-insert leaves partial rows; replace wholesale
        self.state.db().delete_chunks(document_id)?;
        self.state.db().insert_chunks(&chunks)?;
        tracing::info!("[{}] Stored {} chunks", document_id, chunks.len());
        Ok(())
    }

    /// Fan quiz generation out across the document's modules. A module
    /// whose generation exhausts its retries is left without a quiz; the
    /// stage still completes and the document still reaches COMPLETED.
    async fn generate_quizzes(&self, document_id: Uuid) -> Result<()> {
        let db = self.state.db().clone();
        let config = self.state.config();

        let modules = db.list_modules(document_id)?;
        let total = modules.len();
        // Reset the counters so a re-run never double-counts
        db.set_module_counters(document_id, 0, total as u32)?;

        let generator = Arc::new(QuizGenerator::new(
            db.clone(),
            self.state.llm().clone(),
            self.state.embedder().clone(),
            config.quiz.clone(),
        ));
        let semaphore = Arc::new(Semaphore::new(config.quiz.module_workers()));

        let quiz_futures: Vec<_> = modules
            .into_iter()
            .map(|module| {
                let generator = generator.clone();
                let db = db.clone();
                let sem = semaphore.clone();

                async move {
                    let _permit = sem.acquire().await.unwrap();
                    let result = generator.generate_for_module(module.id).await;
                    if let Err(e) = db.increment_modules_completed(document_id) {
                        tracing::warn!("[{}] Failed to bump module counter: {}", document_id, e);
                    }
                    (module, result)
                }
            })
            .collect();

        let results = join_all(quiz_futures).await;

        let mut failed = 0usize;
        for (module, result) in results {
            match result {
                Ok(quiz) => tracing::info!(
                    "[{}] Module '{}' ready with quiz {}",
                    document_id,
                    module.title,
                    quiz.id
                ),
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        "[{}] Quiz for module '{}' failed: {}",
                        document_id,
                        module.title,
                        e
                    );
                }
            }
        }

        if failed > 0 {
            tracing::warn!(
                "[{}] {} of {} module quizzes failed; completing with partial quizzes",
                document_id,
                failed,
                total
            );
        }
        Ok(())
    }

    fn load_document(&self, document_id: Uuid) -> Result<Document> {
        self.state
            .db()
            .get_document(document_id)?
            .ok_or_else(|| Error::not_found(format!("Document {} not found", document_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::providers::{EmbeddingProvider, HashEmbedder, LlmProvider};
    use crate::storage::{BlobStore, Database, FsBlobStore};
    use crate::types::SourceFormat;
    use async_trait::async_trait;
    use sha2::{Digest, Sha256};

    struct AlwaysLlm {
        payload: String,
    }

    #[async_trait]
    impl LlmProvider for AlwaysLlm {
        async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String> {
            Ok(self.payload.clone())
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        fn name(&self) -> &str {
            "always"
        }

        fn model(&self) -> &str {
            "always"
        }
    }

    struct BrokenLlm;

    #[async_trait]
    impl LlmProvider for BrokenLlm {
        async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String> {
            Err(Error::generation("model offline".to_string()))
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(false)
        }

        fn name(&self) -> &str {
            "broken"
        }

        fn model(&self) -> &str {
            "broken"
        }
    }

    struct OfflineEmbedder;

    #[async_trait]
    impl EmbeddingProvider for OfflineEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::embedding("embedding backend offline".to_string()))
        }

        fn dimensions(&self) -> usize {
            64
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(false)
        }

        fn name(&self) -> &str {
            "offline"
        }
    }

    fn quiz_payload() -> String {
        let questions: Vec<serde_json::Value> = (0..5)
            .map(|i| {
                serde_json::json!({
                    "question_text": format!("What does part {} describe?", i),
                    "options": [
                        format!("Energy pathways {}", i),
                        format!("Cell membranes {}", i),
                        format!("River deltas {}", i),
                        format!("Iron alloys {}", i),
                    ],
                    "correct_answer": format!("Energy pathways {}", i),
                    "explanation": "Stated in the module text.",
                    "concept_covered": format!("Concept {}", i),
                    "difficulty_score": 0.5
                })
            })
            .collect();
        serde_json::Value::Array(questions).to_string()
    }

    fn test_state(
        db: Database,
        blob_root: std::path::PathBuf,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
    ) -> AppState {
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(blob_root).unwrap());
        let (queue, _receiver) = PipelineQueue::new(1, 8);
        AppState::assemble(AppConfig::default(), db, blobs, embedder, llm, queue)
    }

    fn worker_for(state: &AppState) -> PipelineWorker {
        PipelineWorker::new(state.clone(), state.queue().clone())
    }

    async fn upload(state: &AppState, title: &str, bytes: &[u8], format: SourceFormat) -> Uuid {
        let blob_id = state.blobs().put(bytes).await.unwrap();
        let doc = Document::new(
            "learner".to_string(),
            title.to_string(),
            blob_id,
            hex::encode(Sha256::digest(bytes)),
            bytes.len() as u64,
            format,
        );
        let id = doc.id;
        state.db().insert_document(&doc).unwrap();
        id
    }

    fn study_text() -> String {
        let mut text = String::new();
        for i in 0..40 {
            text.push_str(&format!(
                "Section {} explains how cellular respiration converts glucose into usable \
                 energy. The mitochondria run the citric acid cycle and oxidative \
                 phosphorylation to produce ATP for the cell. ",
                i
            ));
        }
        text
    }

    #[tokio::test]
    async fn text_upload_runs_to_completion_with_quizzes() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory().unwrap();
        let state = test_state(
            db.clone(),
            dir.path().to_path_buf(),
            Arc::new(HashEmbedder::new(64)),
            Arc::new(AlwaysLlm {
                payload: quiz_payload(),
            }),
        );
        let worker = worker_for(&state);

        let doc_id = upload(&state, "bio.txt", study_text().as_bytes(), SourceFormat::Txt).await;
        worker.process_document(doc_id).await.unwrap();

        let doc = db.get_document(doc_id).unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert!(doc.error.is_none());

        let chunks = db.list_chunks(doc_id).unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.is_embedded()));

        let modules = db.list_modules(doc_id).unwrap();
        assert!(!modules.is_empty());
        assert!(modules.iter().all(|m| m.ready_for_quiz));

        // Every module got a quiz and the progress counters agree
        for module in &modules {
            let quiz = db.get_quiz_for_module(module.id).unwrap().unwrap();
            assert_eq!(db.list_questions(quiz.id).unwrap().len(), 5);
        }
        assert_eq!(doc.progress.total_modules, modules.len() as u32);
        assert_eq!(doc.progress.modules_completed, modules.len() as u32);

        // Every stage is recorded DONE
        for stage in PipelineStage::ALL {
            let job = state.tracker().job(doc_id, stage).unwrap().unwrap();
            assert_eq!(job.status, crate::pipeline::tracker::StageJobStatus::Done);
        }
    }

    #[tokio::test]
    async fn reprocessing_a_completed_document_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory().unwrap();
        let state = test_state(
            db.clone(),
            dir.path().to_path_buf(),
            Arc::new(HashEmbedder::new(64)),
            Arc::new(AlwaysLlm {
                payload: quiz_payload(),
            }),
        );
        let worker = worker_for(&state);

        let doc_id = upload(&state, "bio.txt", study_text().as_bytes(), SourceFormat::Txt).await;
        worker.process_document(doc_id).await.unwrap();

        let chunks_before: Vec<Uuid> =
            db.list_chunks(doc_id).unwrap().iter().map(|c| c.id).collect();
        let modules_before = db.list_modules(doc_id).unwrap().len();

        worker.process_document(doc_id).await.unwrap();

        let chunks_after: Vec<Uuid> =
            db.list_chunks(doc_id).unwrap().iter().map(|c| c.id).collect();
        assert_eq!(chunks_before, chunks_after);
        assert_eq!(db.list_modules(doc_id).unwrap().len(), modules_before);
        assert_eq!(
            state.tracker().acquire(doc_id, PipelineStage::Chunk).unwrap(),
            AcquireOutcome::AlreadyDone
        );
    }

    #[tokio::test]
    async fn corrupt_upload_fails_without_modules_or_quizzes() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory().unwrap();
        let state = test_state(
            db.clone(),
            dir.path().to_path_buf(),
            Arc::new(HashEmbedder::new(64)),
            Arc::new(AlwaysLlm {
                payload: quiz_payload(),
            }),
        );
        let worker = worker_for(&state);

        let doc_id = upload(
            &state,
            "broken.pdf",
            b"%PDF-1.4 this is not a real pdf body",
            SourceFormat::Pdf,
        )
        .await;
        assert!(worker.process_document(doc_id).await.is_err());

        let doc = db.get_document(doc_id).unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert!(doc.error.is_some());

        assert!(db.list_chunks(doc_id).unwrap().is_empty());
        assert!(db.list_modules(doc_id).unwrap().is_empty());

        let job = state
            .tracker()
            .job(doc_id, PipelineStage::Extract)
            .unwrap()
            .unwrap();
        assert_eq!(job.status, crate::pipeline::tracker::StageJobStatus::Failed);
        assert!(job.error.is_some());
    }

    #[tokio::test]
    async fn retry_after_embed_outage_resumes_without_rechunking() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory().unwrap();
        let broken = test_state(
            db.clone(),
            dir.path().to_path_buf(),
            Arc::new(OfflineEmbedder),
            Arc::new(AlwaysLlm {
                payload: quiz_payload(),
            }),
        );
        let worker = worker_for(&broken);

        let doc_id = upload(&broken, "bio.txt", study_text().as_bytes(), SourceFormat::Txt).await;
        assert!(worker.process_document(doc_id).await.is_err());

        let doc = db.get_document(doc_id).unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        let chunks_before: Vec<Uuid> =
            db.list_chunks(doc_id).unwrap().iter().map(|c| c.id).collect();
        assert!(!chunks_before.is_empty());

        // Embedding comes back; retry resumes from the failed stage
        assert!(db.reset_document_for_retry(doc_id).unwrap());
        let healthy = test_state(
            db.clone(),
            dir.path().to_path_buf(),
            Arc::new(HashEmbedder::new(64)),
            Arc::new(AlwaysLlm {
                payload: quiz_payload(),
            }),
        );
        worker_for(&healthy).process_document(doc_id).await.unwrap();

        let doc = db.get_document(doc_id).unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert!(doc.error.is_none());

        // Extract and chunk stages were not repeated
        let chunks_after: Vec<Uuid> =
            db.list_chunks(doc_id).unwrap().iter().map(|c| c.id).collect();
        assert_eq!(chunks_before, chunks_after);
        assert!(db.list_chunks(doc_id).unwrap().iter().all(|c| c.is_embedded()));
    }

    #[tokio::test]
    async fn quiz_outage_still_completes_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory().unwrap();
        let state = test_state(
            db.clone(),
            dir.path().to_path_buf(),
            Arc::new(HashEmbedder::new(64)),
            Arc::new(BrokenLlm),
        );
        let worker = worker_for(&state);

        let doc_id = upload(&state, "bio.txt", study_text().as_bytes(), SourceFormat::Txt).await;
        worker.process_document(doc_id).await.unwrap();

        let doc = db.get_document(doc_id).unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);

        // Modules exist but none produced a quiz
        let modules = db.list_modules(doc_id).unwrap();
        assert!(!modules.is_empty());
        for module in &modules {
            assert!(db.get_quiz_for_module(module.id).unwrap().is_none());
        }
        // All modules were still counted as finished
        assert_eq!(doc.progress.modules_completed, modules.len() as u32);
    }

    #[tokio::test]
    async fn unsupported_format_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory().unwrap();
        let state = test_state(
            db.clone(),
            dir.path().to_path_buf(),
            Arc::new(HashEmbedder::new(64)),
            Arc::new(AlwaysLlm {
                payload: quiz_payload(),
            }),
        );
        let worker = worker_for(&state);

        let doc_id = upload(&state, "sheet.xlsx", b"PK fake sheet", SourceFormat::Unknown).await;
        let err = worker.process_document(doc_id).await.unwrap_err();
        assert!(err.is_fatal_for_document());

        let doc = db.get_document(doc_id).unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
    }
}
