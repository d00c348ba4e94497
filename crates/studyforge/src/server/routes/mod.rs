//! API routes for the assessment server

pub mod attempts;
pub mod documents;
pub mod quizzes;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // Documents - upload with a larger body limit
        .route(
            "/documents",
            post(documents::upload_document).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/documents", get(documents::list_documents))
        .route("/documents/:id/status", get(documents::document_status))
        .route("/documents/:id/retry", post(documents::retry_document))
        .route("/documents/:id/modules", get(documents::list_modules))
        .route("/documents/:id/stats", get(documents::document_stats))
        // Quizzes and attempts
        .route("/modules/:id/quiz", get(quizzes::module_quiz))
        .route("/quizzes/:id/start", post(quizzes::start_attempt))
        .route("/attempts/:id/submit", post(attempts::submit_attempt))
        .route("/attempts/:id/feedback", get(attempts::attempt_feedback))
        // Info
        .route("/info", get(info))
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "studyforge",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Turns uploaded documents into modules, quizzes, and personalized feedback",
        "endpoints": {
            "POST /api/documents": "Upload a document for processing",
            "GET /api/documents": "List your documents",
            "GET /api/documents/:id/status": "Poll processing progress",
            "POST /api/documents/:id/retry": "Re-queue a failed document",
            "GET /api/documents/:id/modules": "List a document's modules",
            "GET /api/documents/:id/stats": "Your progress rollup for a document",
            "GET /api/modules/:id/quiz": "Quiz metadata for a module",
            "POST /api/quizzes/:id/start": "Start a quiz attempt",
            "POST /api/attempts/:id/submit": "Submit answers for grading",
            "GET /api/attempts/:id/feedback": "Poll for personalized feedback"
        },
        "features": {
            "deduplication": "Content-hash based upload deduplication",
            "resumable_pipeline": "Per-stage idempotency with crash recovery",
            "partial_completion": "Documents complete even when some module quizzes fail",
            "server_side_grading": "Scores recomputed from stored answers, never trusted from the client"
        }
    }))
}
