//! Text generation capability.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::providers::ollama::OllamaClient;

/// Produces free-form completions for a prompt
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion at the given sampling temperature
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String>;

    /// Whether the backing service is reachable
    async fn health_check(&self) -> Result<bool>;

    fn name(&self) -> &str;

    fn model(&self) -> &str;
}

/// Ollama-backed generation
pub struct OllamaLlm {
    client: Arc<OllamaClient>,
    model: String,
}

impl OllamaLlm {
    pub fn new(client: Arc<OllamaClient>, model: String) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl LlmProvider for OllamaLlm {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String> {
        self.client.generate(&self.model, prompt, temperature).await
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
