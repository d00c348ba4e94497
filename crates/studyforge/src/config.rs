//! Configuration for the pipeline, providers, and server

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage paths
    #[serde(default)]
    pub storage: StorageConfig,
    /// Chunking configuration
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Embedding configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Ollama/LLM configuration
    #[serde(default)]
    pub llm: LlmConfig,
    /// Pipeline execution configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Module segmentation configuration
    #[serde(default)]
    pub organizer: OrganizerConfig,
    /// Quiz generation configuration
    #[serde(default)]
    pub quiz: QuizConfig,
    /// Feedback generation configuration
    #[serde(default)]
    pub feedback: FeedbackConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// `path` is None. `STUDYFORGE_HOST` / `STUDYFORGE_PORT` override the
    /// server address either way.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| Error::config(format!("Failed to read {}: {}", p.display(), e)))?;
                toml::from_str(&raw)
                    .map_err(|e| Error::config(format!("Failed to parse {}: {}", p.display(), e)))?
            }
            None => Self::default(),
        };

        if let Ok(host) = std::env::var("STUDYFORGE_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("STUDYFORGE_PORT") {
            config.server.port = port
                .parse()
                .map_err(|e| Error::config(format!("Invalid STUDYFORGE_PORT: {}", e)))?;
        }

        Ok(config)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 50MB)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            max_upload_size: 50 * 1024 * 1024,
        }
    }
}

/// Storage paths for the database and blob store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root data directory; database and blobs live under it
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("studyforge");
        Self { data_dir }
    }
}

impl StorageConfig {
    /// Path of the SQLite database file
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("studyforge.db")
    }

    /// Directory holding raw uploaded blobs
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters
    pub chunk_overlap: usize,
    /// Minimum chunk size; a smaller trailing remainder merges backward
    pub min_chunk_size: usize,
    /// Respect sentence boundaries
    pub respect_sentences: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            chunk_overlap: 200,
            min_chunk_size: 100,
            respect_sentences: true,
        }
    }
}

/// Embedding backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Ollama HTTP embeddings (nomic-embed-text or similar)
    #[default]
    Ollama,
    /// Deterministic content-hash embeddings, no network (dev/test)
    Hash,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend provider
    #[serde(default)]
    pub backend: EmbeddingBackend,
    /// Embedding dimensions (768 for nomic-embed-text)
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            dimensions: 768,
        }
    }
}

/// LLM (Ollama) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ollama base URL
    pub base_url: String,
    /// Embedding model name
    pub embed_model: String,
    /// Generation model name
    pub generate_model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Number of retries for failed requests
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            generate_model: "llama3.2:3b".to_string(),
            timeout_secs: 120,
            max_retries: 3,
        }
    }
}

/// Pipeline execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Documents processed in parallel (default: CPU count, max 8)
    pub parallel_documents: Option<usize>,
    /// Chunks embedded in parallel within one document (default: 4)
    pub parallel_embeddings: Option<usize>,
    /// Seconds after which a RUNNING stage is considered abandoned
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,
    /// Per-call timeout for embedding/generation calls in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Bounded queue capacity for pending documents
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_stage_timeout() -> u64 {
    600
}

fn default_call_timeout() -> u64 {
    120
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallel_documents: None,
            parallel_embeddings: None,
            stage_timeout_secs: 600,
            call_timeout_secs: 120,
            queue_capacity: 256,
        }
    }
}

impl PipelineConfig {
    /// Effective document-level parallelism
    pub fn document_workers(&self) -> usize {
        self.parallel_documents
            .unwrap_or_else(|| num_cpus::get().min(8))
            .max(1)
    }

    /// Effective per-document embedding parallelism
    pub fn embedding_workers(&self) -> usize {
        self.parallel_embeddings.unwrap_or(4).max(1)
    }
}

/// Module segmentation configuration
///
/// Defaults target roughly 3000-word modules out of 1024-char chunks: a new
/// module opens when consecutive-chunk similarity drops below
/// `min_similarity`, or the open module hits `max_chunks_per_module` chunks
/// or `max_module_chars` characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizerConfig {
    /// Cosine similarity below which a module boundary is placed
    pub min_similarity: f32,
    /// Maximum chunks per module
    pub max_chunks_per_module: usize,
    /// Maximum accumulated characters per module
    pub max_module_chars: usize,
}

impl Default for OrganizerConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.6,
            max_chunks_per_module: 8,
            max_module_chars: 12_000,
        }
    }
}

/// Quiz generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizConfig {
    /// Questions per generated quiz
    pub questions_per_quiz: usize,
    /// Options per question, exactly one correct
    pub options_per_question: usize,
    /// Generation attempts before the module's quiz is marked failed
    pub max_attempts: u32,
    /// Temperature ladder walked across attempts
    pub temperatures: Vec<f32>,
    /// Module content cap fed into the prompt, in characters
    pub max_context_chars: usize,
    /// Distractors more similar than this to the correct option are rejected
    pub max_distractor_similarity: f32,
    /// Estimated quiz duration reported to callers, in minutes
    pub estimated_duration_minutes: u32,
    /// Modules generated in parallel per document (default: 4)
    pub parallel_modules: Option<usize>,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            questions_per_quiz: 5,
            options_per_question: 4,
            max_attempts: 3,
            temperatures: vec![0.7, 0.8, 0.9],
            max_context_chars: 8000,
            max_distractor_similarity: 0.9,
            estimated_duration_minutes: 10,
            parallel_modules: None,
        }
    }
}

impl QuizConfig {
    /// Temperature for the given 0-based attempt, clamped to the ladder end
    pub fn temperature_for_attempt(&self, attempt: u32) -> f32 {
        let idx = (attempt as usize).min(self.temperatures.len().saturating_sub(1));
        self.temperatures.get(idx).copied().unwrap_or(0.7)
    }

    /// Effective per-document module parallelism
    pub fn module_workers(&self) -> usize {
        self.parallel_modules.unwrap_or(4).max(1)
    }
}

/// Feedback generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Generation attempts before the report is marked failed
    pub max_attempts: u32,
    /// Generation temperature
    pub temperature: f32,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            temperature: 0.5,
        }
    }
}
