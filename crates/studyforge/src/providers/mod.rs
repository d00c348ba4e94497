//! Embedding and generation capabilities behind trait seams

pub mod embedding;
pub mod llm;
pub mod local;
pub mod ollama;

pub use embedding::{cosine_similarity, EmbeddingProvider, OllamaEmbedding};
pub use llm::{LlmProvider, OllamaLlm};
pub use local::HashEmbedder;
pub use ollama::OllamaClient;

use std::sync::Arc;

use crate::config::{AppConfig, EmbeddingBackend};
use crate::error::Result;

/// Build the configured embedding and generation providers. Both Ollama
/// providers share one HTTP client.
pub fn build_providers(
    config: &AppConfig,
) -> Result<(Arc<dyn EmbeddingProvider>, Arc<dyn LlmProvider>)> {
    let client = Arc::new(OllamaClient::new(&config.llm)?);

    let embedding: Arc<dyn EmbeddingProvider> = match config.embedding.backend {
        EmbeddingBackend::Ollama => Arc::new(OllamaEmbedding::new(
            client.clone(),
            config.llm.embed_model.clone(),
            config.embedding.dimensions,
        )),
        EmbeddingBackend::Hash => Arc::new(HashEmbedder::new(config.embedding.dimensions)),
    };
    let llm: Arc<dyn LlmProvider> = Arc::new(OllamaLlm::new(client, config.llm.generate_model.clone()));

    Ok((embedding, llm))
}
