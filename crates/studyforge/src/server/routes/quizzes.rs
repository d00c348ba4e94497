//! Quiz lookup and attempt-start endpoints

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::quiz::{AttemptEngine, AttemptStarted};
use crate::server::routes::documents::caller;
use crate::server::state::AppState;
use crate::types::Difficulty;

/// Quiz metadata, without questions
#[derive(Debug, Serialize)]
pub struct QuizInfo {
    pub quiz_id: Uuid,
    pub module_id: Uuid,
    pub module_title: String,
    pub difficulty: Difficulty,
    pub total_questions: u32,
    pub estimated_duration_minutes: u32,
    pub created_at: DateTime<Utc>,
}

/// GET /api/modules/:id/quiz - The quiz generated for a module
pub async fn module_quiz(
    State(state): State<AppState>,
    Path(module_id): Path<Uuid>,
) -> Result<Json<QuizInfo>> {
    let module = state
        .db()
        .get_module(module_id)?
        .ok_or_else(|| Error::not_found(format!("Module {} not found", module_id)))?;

    let quiz = state.db().get_quiz_for_module(module.id)?.ok_or_else(|| {
        Error::quiz_not_ready(format!("No quiz available yet for module '{}'", module.title))
    })?;

    Ok(Json(QuizInfo {
        quiz_id: quiz.id,
        module_id: module.id,
        module_title: module.title,
        difficulty: quiz.difficulty,
        total_questions: quiz.total_questions,
        estimated_duration_minutes: quiz.estimated_duration_minutes,
        created_at: quiz.created_at,
    }))
}

/// POST /api/quizzes/:id/start - Begin an attempt on a quiz
pub async fn start_attempt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(quiz_id): Path<Uuid>,
) -> Result<Json<AttemptStarted>> {
    let user = caller(&headers);
    let started = AttemptEngine::new(state.db().clone()).start(&user, quiz_id)?;
    Ok(Json(started))
}
