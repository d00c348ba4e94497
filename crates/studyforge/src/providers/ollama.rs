//! HTTP client for a local Ollama server.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{Error, Result};

/// Shared client for the Ollama embeddings and generation endpoints
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::embedding(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }

    /// Run a request with exponential backoff. Attempt n sleeps 2^n seconds
    /// before retrying.
    async fn retry_request<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2u64.pow(attempt));
                tracing::warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}",
                    operation,
                    attempt,
                    self.max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error
            .unwrap_or_else(|| Error::internal(format!("{}: retry loop exhausted", operation))))
    }

    /// Embed one text. Transient failures are retried with backoff.
    pub async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        self.retry_request("embedding request", || async {
            let response = self
                .client
                .post(&url)
                .json(&EmbedRequest {
                    model,
                    prompt: text,
                })
                .send()
                .await
                .map_err(|e| Error::embedding(format!("Embedding request failed: {}", e)))?;

            if !response.status().is_success() {
                return Err(Error::embedding(format!(
                    "Ollama embeddings returned {}",
                    response.status()
                )));
            }

            let body: EmbedResponse = response
                .json()
                .await
                .map_err(|e| Error::embedding(format!("Invalid embedding response: {}", e)))?;
            if body.embedding.is_empty() {
                return Err(Error::embedding("Ollama returned an empty embedding"));
            }
            Ok(body.embedding)
        })
        .await
    }

    /// Generate a completion at the given temperature.
    ///
    /// Single attempt: callers own their retry policy (the quiz generator
    /// walks a temperature ladder, the feedback synthesizer re-prompts), so
    /// retrying here as well would multiply the attempt count.
    pub async fn generate(&self, model: &str, prompt: &str, temperature: f32) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model,
                prompt,
                stream: false,
                options: GenerateOptions { temperature },
            })
            .send()
            .await
            .map_err(|e| Error::generation(format!("Generation request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::generation(format!(
                "Ollama generate returned {}",
                response.status()
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::generation(format!("Invalid generation response: {}", e)))?;
        Ok(body.response)
    }

    /// True when the server answers the tags endpoint
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}
