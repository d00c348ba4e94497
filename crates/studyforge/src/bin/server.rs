//! Assessment server binary
//!
//! Run with: cargo run -p studyforge --bin studyforge-server

use std::path::PathBuf;

use studyforge::{config::AppConfig, server::StudyForgeServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "studyforge=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!(
        r#"
╔═══════════════════════════════════════════════════════════╗
║                        StudyForge                         ║
║        Documents in, Quizzes and Feedback out             ║
╚═══════════════════════════════════════════════════════════╝
"#
    );

    // Load configuration: first CLI argument is an optional TOML path
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Data directory: {}", config.storage.data_dir.display());
    tracing::info!("  - Embedding backend: {:?}", config.embedding.backend);
    tracing::info!("  - Embedding dimensions: {}", config.embedding.dimensions);
    tracing::info!("  - LLM model: {}", config.llm.generate_model);
    tracing::info!("  - Chunk size: {}", config.chunking.chunk_size);

    // Check Ollama
    tracing::info!("Checking Ollama at {}...", config.llm.base_url);
    let client = reqwest::Client::new();
    match client.get(format!("{}/api/tags", config.llm.base_url)).send().await {
        Ok(resp) if resp.status().is_success() => {
            tracing::info!("Ollama is running");
        }
        _ => {
            tracing::warn!("Ollama not available at {}", config.llm.base_url);
            tracing::warn!("Quiz and feedback generation will fail until it is up:");
            tracing::warn!("  1. Install: brew install ollama");
            tracing::warn!("  2. Start: ollama serve");
            tracing::warn!(
                "  3. Pull models: ollama pull {} && ollama pull {}",
                config.llm.embed_model,
                config.llm.generate_model
            );
        }
    }

    // Create and start server
    let server = StudyForgeServer::new(config).await?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nEndpoints:");
    println!("  POST /api/documents            - Upload a document");
    println!("  GET  /api/documents/:id/status - Poll processing progress");
    println!("  POST /api/quizzes/:id/start    - Start a quiz attempt");
    println!("  POST /api/attempts/:id/submit  - Submit answers for grading");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
