//! HTTP server for the assessment pipeline

pub mod routes;
pub mod state;

use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::error::Result;
use state::AppState;

/// The assessment HTTP server
pub struct StudyForgeServer {
    config: AppConfig,
    state: AppState,
}

impl StudyForgeServer {
    /// Create a new server, starting the background pipeline worker
    pub async fn new(config: AppConfig) -> Result<Self> {
        let state = AppState::new(config.clone()).await?;
        Ok(Self { config, state })
    }

    /// Create with default configuration
    pub async fn default() -> Result<Self> {
        Self::new(AppConfig::default()).await
    }

    /// Build the router with all routes
    fn build_router(&self) -> Router {
        let mut router = Router::new()
            // Health check
            .route("/health", get(health_check))
            // API routes with body limit for multipart uploads
            .nest("/api", routes::api_routes(self.config.server.max_upload_size))
            .with_state(self.state.clone())
            // Middleware layers (order matters - applied bottom to top)
            .layer(TraceLayer::new_for_http())
            .layer(CompressionLayer::new());

        if self.config.server.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }
        router
    }

    /// Start the server
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| crate::error::Error::config(format!("Invalid address: {}", e)))?;

        let router = self.build_router();

        tracing::info!("Starting server on http://{}", addr);
        tracing::info!("API documentation: http://{}/api/info", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| crate::error::Error::config(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| crate::error::Error::internal(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// Get the server address
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    database: bool,
    embedding_provider: bool,
    llm_provider: bool,
    queue: crate::pipeline::QueueStats,
}

/// Health check endpoint reporting per-component status
async fn health_check(
    state: axum::extract::State<AppState>,
) -> (axum::http::StatusCode, Json<HealthResponse>) {
    let database = state.db().list_unfinished_documents().is_ok();
    let embedding_provider = state.embedder().health_check().await.unwrap_or(false);
    let llm_provider = state.llm().health_check().await.unwrap_or(false);

    let healthy = database && embedding_provider && llm_provider;
    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        database,
        embedding_provider,
        llm_provider,
        queue: state.queue().stats(),
    };
    let code = if healthy {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}
