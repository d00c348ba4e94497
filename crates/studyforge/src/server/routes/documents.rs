//! Document upload, status, and module endpoints

use axum::{
    extract::{Multipart, Path, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{
    Document, DocumentStatus, SourceFormat, StageProgress, UserDocumentStats,
};

/// Resolve the calling user from the identity header supplied by the
/// auth layer in front of this service
pub(crate) fn caller(headers: &HeaderMap) -> String {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

/// Response from document upload
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub document_id: Uuid,
    pub status: DocumentStatus,
    /// True when an identical upload already existed for this user
    pub deduplicated: bool,
}

/// POST /api/documents - Upload a document and queue it for processing
pub async fn upload_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let owner = caller(&headers);

    let mut upload: Option<(String, Option<String>, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::internal(format!("Failed to read multipart field: {}", e)))?
    {
        let Some(filename) = field.file_name().map(|s| s.to_string()) else {
            continue;
        };
        let content_type = field.content_type().map(|s| s.to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::internal(format!("Failed to read file {}: {}", filename, e)))?;

        upload = Some((filename, content_type, data.to_vec()));
        break;
    }

    let Some((filename, content_type, data)) = upload else {
        return Err(Error::corrupt_input("No file provided"));
    };
    if data.is_empty() {
        return Err(Error::corrupt_input("Uploaded file is empty"));
    }

    let format = detect_format(&filename, content_type.as_deref());
    if !format.is_supported() {
        return Err(Error::unsupported_format(format!(
            "Cannot process '{}'. Supported formats: PDF, DOCX, TXT, Markdown",
            filename
        )));
    }

    // Identical bytes from the same user map to the already-created document
    let content_hash = hex::encode(Sha256::digest(&data));
    if let Some(existing) = state.db().find_document_by_hash(&owner, &content_hash)? {
        tracing::info!(
            "Upload of '{}' matches existing document {}, skipping",
            filename,
            existing.id
        );
        return Ok(Json(UploadResponse {
            document_id: existing.id,
            status: existing.status,
            deduplicated: true,
        }));
    }

    let blob_id = state.blobs().put(&data).await?;
    let document = Document::new(
        owner,
        filename.clone(),
        blob_id,
        content_hash,
        data.len() as u64,
        format,
    );
    let document_id = document.id;
    state.db().insert_document(&document)?;

    if !state.queue().enqueue(document_id) {
        tracing::warn!(
            "[{}] Queue full, document stays PENDING until restart re-queues it",
            document_id
        );
    }

    tracing::info!(
        "[{}] Accepted '{}' ({} bytes, {:?})",
        document_id,
        filename,
        data.len(),
        format
    );
    Ok(Json(UploadResponse {
        document_id,
        status: DocumentStatus::Pending,
        deduplicated: false,
    }))
}

fn detect_format(filename: &str, content_type: Option<&str>) -> SourceFormat {
    if let Some(mime) = content_type {
        // Strip parameters like "; charset=utf-8"
        let essence = mime.split(';').next().unwrap_or(mime).trim();
        let format = SourceFormat::from_mime(essence);
        if format.is_supported() {
            return format;
        }
    }
    if let Some(ext) = std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
    {
        let format = SourceFormat::from_extension(ext);
        if format.is_supported() {
            return format;
        }
    }
    // Last resort for uploads without a usable extension or content type
    mime_guess::from_path(filename)
        .first_raw()
        .map(SourceFormat::from_mime)
        .unwrap_or(SourceFormat::Unknown)
}

/// One document in a listing
#[derive(Debug, Serialize)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub title: String,
    pub status: DocumentStatus,
    pub format: SourceFormat,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentSummary>,
    pub total: usize,
}

/// GET /api/documents - List the caller's documents
pub async fn list_documents(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DocumentListResponse>> {
    let owner = caller(&headers);
    let documents: Vec<DocumentSummary> = state
        .db()
        .list_documents(&owner)?
        .into_iter()
        .map(|d| DocumentSummary {
            id: d.id,
            title: d.title,
            status: d.status,
            format: d.format,
            file_size: d.file_size,
            created_at: d.created_at,
            updated_at: d.updated_at,
        })
        .collect();

    let total = documents.len();
    Ok(Json(DocumentListResponse { documents, total }))
}

/// Processing status of one document
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: DocumentStatus,
    pub progress: StageProgress,
    /// Failure reason, null unless the document is FAILED
    pub error: Option<String>,
    /// Modules whose quiz is available, regardless of overall status
    pub modules_ready: Vec<Uuid>,
}

/// GET /api/documents/:id/status - Poll processing progress
pub async fn document_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>> {
    let document = load_owned(&state, &headers, id)?;

    let mut modules_ready = Vec::new();
    for module in state.db().list_modules(id)? {
        if state.db().get_quiz_for_module(module.id)?.is_some() {
            modules_ready.push(module.id);
        }
    }

    Ok(Json(StatusResponse {
        status: document.status,
        progress: document.progress,
        error: document.error,
        modules_ready,
    }))
}

/// Response from a retry request
#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub document_id: Uuid,
    /// False when the document was not in FAILED
    pub requeued: bool,
    pub status: DocumentStatus,
}

/// POST /api/documents/:id/retry - Re-queue a failed document
pub async fn retry_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<RetryResponse>> {
    let document = load_owned(&state, &headers, id)?;

    if !state.db().reset_document_for_retry(id)? {
        return Ok(Json(RetryResponse {
            document_id: id,
            requeued: false,
            status: document.status,
        }));
    }

    if !state.queue().enqueue(id) {
        tracing::warn!("[{}] Retry accepted but queue is full", id);
    }
    tracing::info!("[{}] Retry requested, document re-queued", id);

    Ok(Json(RetryResponse {
        document_id: id,
        requeued: true,
        status: DocumentStatus::Pending,
    }))
}

/// One module in a listing, with its quiz when generated
#[derive(Debug, Serialize)]
pub struct ModuleInfo {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    pub module_order: u32,
    pub total_chunks: u32,
    pub ready_for_quiz: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiz_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ModuleListResponse {
    pub document_id: Uuid,
    pub modules: Vec<ModuleInfo>,
}

/// GET /api/documents/:id/modules - List a document's modules
pub async fn list_modules(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ModuleListResponse>> {
    load_owned(&state, &headers, id)?;

    let mut modules = Vec::new();
    for module in state.db().list_modules(id)? {
        let quiz_id = state.db().get_quiz_for_module(module.id)?.map(|q| q.id);
        modules.push(ModuleInfo {
            id: module.id,
            title: module.title,
            summary: module.summary,
            module_order: module.module_order,
            total_chunks: module.total_chunks,
            ready_for_quiz: module.ready_for_quiz,
            quiz_id,
        });
    }

    Ok(Json(ModuleListResponse {
        document_id: id,
        modules,
    }))
}

/// GET /api/documents/:id/stats - The caller's rollup over this document
pub async fn document_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<UserDocumentStats>> {
    let owner = caller(&headers);
    let document = state
        .db()
        .get_document(id)?
        .filter(|d| d.owner == owner)
        .ok_or_else(|| Error::not_found(format!("Document {} not found", id)))?;

    let stats = match state.db().get_document_stats(&owner, id)? {
        Some(stats) => stats,
        // No graded attempts yet; report an empty rollup
        None => UserDocumentStats {
            user_id: owner,
            document_id: id,
            total_modules: document.progress.total_modules,
            completed_modules: 0,
            average_score: 0.0,
            total_time_spent_seconds: 0,
            weak_concepts: Vec::new(),
            strong_concepts: Vec::new(),
            updated_at: Utc::now(),
        },
    };
    Ok(Json(stats))
}

fn load_owned(state: &AppState, headers: &HeaderMap, id: Uuid) -> Result<Document> {
    let owner = caller(headers);
    state
        .db()
        .get_document(id)?
        .filter(|d| d.owner == owner)
        .ok_or_else(|| Error::not_found(format!("Document {} not found", id)))
}
