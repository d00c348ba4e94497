//! Attempt submission and feedback endpoints

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::feedback::{FeedbackSynthesizer, ProgressRollups};
use crate::quiz::AttemptEngine;
use crate::server::routes::documents::caller;
use crate::server::state::AppState;
use crate::types::{AnswerSubmission, FeedbackContent, FeedbackStatus, GradedResult};

/// Body of a submission request
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub answers: Vec<AnswerSubmission>,
}

/// POST /api/attempts/:id/submit - Grade an attempt
///
/// Grading is synchronous; feedback synthesis and progress rollups run in
/// the background after the graded result is returned.
pub async fn submit_attempt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(attempt_id): Path<Uuid>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<GradedResult>> {
    let user = caller(&headers);
    let result = AttemptEngine::new(state.db().clone()).submit(&user, attempt_id, &request.answers)?;

    let rollups = ProgressRollups::new(state.db().clone());
    let synthesizer = FeedbackSynthesizer::new(
        state.db().clone(),
        state.llm().clone(),
        state.config().feedback.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = rollups.recompute_for_attempt(attempt_id) {
            tracing::warn!("Progress rollup for attempt {} failed: {}", attempt_id, e);
        }
        // Failures are recorded on the report; the graded score stands
        if let Err(e) = synthesizer.generate_for_attempt(attempt_id).await {
            tracing::warn!("Feedback for attempt {} failed: {}", attempt_id, e);
        }
    });

    Ok(Json(result))
}

/// Feedback report as seen by the caller
#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub attempt_id: Uuid,
    pub status: FeedbackStatus,
    /// Null until the report reaches COMPLETED
    pub feedback: Option<FeedbackContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /api/attempts/:id/feedback - Poll for synthesized feedback
pub async fn attempt_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(attempt_id): Path<Uuid>,
) -> Result<Json<FeedbackResponse>> {
    let user = caller(&headers);
    state
        .db()
        .get_attempt(attempt_id)?
        .filter(|a| a.user_id == user)
        .ok_or_else(|| Error::not_found(format!("Attempt {} not found", attempt_id)))?;

    let report = state.db().get_feedback(attempt_id)?.ok_or_else(|| {
        Error::not_found(format!("Attempt {} has not been graded yet", attempt_id))
    })?;

    Ok(Json(FeedbackResponse {
        attempt_id,
        status: report.status,
        feedback: report.content,
        error: report.error,
    }))
}
