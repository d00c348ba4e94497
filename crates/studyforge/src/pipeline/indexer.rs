//! Embedding indexer: computes and stores vectors for pending chunks.
//!
//! The stage tolerates partial completion. Chunks that already carry a
//! stored vector are never re-embedded, so retrying after a mid-stage
//! failure only computes what is missing.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::providers::{cosine_similarity, EmbeddingProvider};
use crate::storage::Database;
use crate::types::Chunk;

/// A chunk scored against a query vector
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

pub struct EmbeddingIndexer {
    db: Database,
    provider: Arc<dyn EmbeddingProvider>,
    parallel: usize,
    call_timeout: Duration,
}

impl EmbeddingIndexer {
    pub fn new(
        db: Database,
        provider: Arc<dyn EmbeddingProvider>,
        parallel: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            db,
            provider,
            parallel: parallel.max(1),
            call_timeout,
        }
    }

    /// Embed every chunk of the document that does not yet have a stored
    /// vector. Returns the number of newly embedded chunks; errors if any
    /// chunk failed, leaving the successes persisted for the next attempt.
    pub async fn embed_document(&self, document_id: Uuid) -> Result<usize> {
        let pending = self.db.list_unembedded_chunks(document_id)?;
        if pending.is_empty() {
            return Ok(0);
        }

        let total = pending.len();
        let semaphore = Arc::new(Semaphore::new(self.parallel));

        let embed_futures: Vec<_> = pending
            .into_iter()
            .map(|chunk| {
                let db = self.db.clone();
                let provider = self.provider.clone();
                let sem = semaphore.clone();
                let call_timeout = self.call_timeout;

                async move {
                    let _permit = sem.acquire().await.map_err(|_| {
                        Error::internal("Embedding semaphore closed".to_string())
                    })?;

                    let vector = timeout(call_timeout, provider.embed(&chunk.content))
                        .await
                        .map_err(|_| {
                            Error::embedding(format!(
                                "Embedding timed out after {}s for chunk {}",
                                call_timeout.as_secs(),
                                chunk.position
                            ))
                        })??;

                    db.set_chunk_embedding(chunk.id, &vector)?;
                    Ok::<(), Error>(())
                }
            })
            .collect();

        let results = join_all(embed_futures).await;

        let mut failed = 0usize;
        for result in &results {
            if let Err(e) = result {
                failed += 1;
                tracing::warn!("Chunk embedding failed: {}", e);
            }
        }

        if failed > 0 {
            return Err(Error::embedding(format!(
                "{} of {} chunks failed to embed",
                failed, total
            )));
        }

        tracing::info!(
            "Embedded {} chunks for document {} via {}",
            total,
            document_id,
            self.provider.name()
        );
        Ok(total)
    }

    /// Rank the document's embedded chunks against a query vector by cosine
    /// similarity. Equal scores are broken by chunk position.
    pub fn most_similar(
        &self,
        document_id: Uuid,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let mut scored: Vec<ScoredChunk> = self
            .db
            .list_chunks(document_id)?
            .into_iter()
            .filter_map(|chunk| {
                let embedding = chunk.embedding.as_deref()?;
                let score = cosine_similarity(query, embedding);
                Some(ScoredChunk { chunk, score })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.position.cmp(&b.chunk.position))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::HashEmbedder;
    use crate::types::{Document, SourceFormat};
    use async_trait::async_trait;

    /// Embedder that refuses chunks containing a marker string
    struct FlakyEmbedder {
        inner: HashEmbedder,
        fail_on: &'static str,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains(self.fail_on) {
                return Err(Error::embedding("Simulated provider outage".to_string()));
            }
            self.inner.embed(text).await
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn seed_document(db: &Database, chunk_texts: &[&str]) -> Uuid {
        let doc = Document::new(
            "tester".to_string(),
            "notes.txt".to_string(),
            "blob-1".to_string(),
            "hash-1".to_string(),
            64,
            SourceFormat::Txt,
        );
        let document_id = doc.id;
        db.insert_document(&doc).unwrap();

        let chunks: Vec<Chunk> = chunk_texts
            .iter()
            .enumerate()
            .map(|(i, text)| Chunk::new(document_id, text.to_string(), i as u32, i * 100, i * 100 + 50))
            .collect();
        db.insert_chunks(&chunks).unwrap();
        document_id
    }

    fn indexer_with(db: &Database, provider: Arc<dyn EmbeddingProvider>) -> EmbeddingIndexer {
        EmbeddingIndexer::new(db.clone(), provider, 2, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn embeds_all_pending_chunks() {
        let db = Database::in_memory().unwrap();
        let document_id = seed_document(&db, &["alpha", "beta", "gamma", "delta", "epsilon"]);

        let indexer = indexer_with(&db, Arc::new(HashEmbedder::new(32)));
        let embedded = indexer.embed_document(document_id).await.unwrap();

        assert_eq!(embedded, 5);
        assert_eq!(db.embedding_progress(document_id).unwrap(), (5, 5));
    }

    #[tokio::test]
    async fn already_embedded_chunks_are_not_recomputed() {
        let db = Database::in_memory().unwrap();
        let document_id = seed_document(&db, &["alpha", "beta", "gamma"]);

        // Hand-embed the first chunk with a sentinel vector
        let chunks = db.list_chunks(document_id).unwrap();
        let sentinel = vec![9.0f32; 32];
        db.set_chunk_embedding(chunks[0].id, &sentinel).unwrap();

        let indexer = indexer_with(&db, Arc::new(HashEmbedder::new(32)));
        let embedded = indexer.embed_document(document_id).await.unwrap();

        assert_eq!(embedded, 2, "only the missing chunks should be computed");
        let after = db.list_chunks(document_id).unwrap();
        assert_eq!(after[0].embedding.as_deref(), Some(sentinel.as_slice()));
    }

    #[tokio::test]
    async fn partial_failure_leaves_successes_and_retry_fills_the_gap() {
        let db = Database::in_memory().unwrap();
        let document_id = seed_document(&db, &["one", "two", "POISON three", "four", "five"]);

        let flaky = Arc::new(FlakyEmbedder {
            inner: HashEmbedder::new(32),
            fail_on: "POISON",
        });
        let err = indexer_with(&db, flaky)
            .embed_document(document_id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
        assert_eq!(db.embedding_progress(document_id).unwrap(), (4, 5));

        // Retry with a healthy provider embeds exactly the missing chunk
        let retried = indexer_with(&db, Arc::new(HashEmbedder::new(32)))
            .embed_document(document_id)
            .await
            .unwrap();
        assert_eq!(retried, 1);
        assert_eq!(db.embedding_progress(document_id).unwrap(), (5, 5));
    }

    #[tokio::test]
    async fn similarity_ties_break_by_position() {
        let db = Database::in_memory().unwrap();
        let document_id = seed_document(&db, &["a", "b", "c"]);

        let chunks = db.list_chunks(document_id).unwrap();
        db.set_chunk_embedding(chunks[0].id, &[1.0, 0.0]).unwrap();
        db.set_chunk_embedding(chunks[1].id, &[0.0, 1.0]).unwrap();
        db.set_chunk_embedding(chunks[2].id, &[1.0, 0.0]).unwrap();

        let indexer = indexer_with(&db, Arc::new(HashEmbedder::new(2)));
        let ranked = indexer.most_similar(document_id, &[1.0, 0.0], 3).unwrap();

        assert_eq!(ranked.len(), 3);
        // Positions 0 and 2 tie at score 1.0; the lower position wins
        assert_eq!(ranked[0].chunk.position, 0);
        assert_eq!(ranked[1].chunk.position, 2);
        assert_eq!(ranked[2].chunk.position, 1);
    }
}
