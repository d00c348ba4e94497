//! SQLite persistence for documents, chunks, modules, quizzes, attempts,
//! feedback reports, and progress rollups.
//!
//! A single connection behind a mutex; every statement runs while the lock
//! is held, and multi-statement invariants (quiz inserts, attempt grading,
//! module replacement) run inside one transaction.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::pipeline::tracker::{AcquireOutcome, StageJob, StageJobStatus};
use crate::types::{
    AttemptAggregates, AttemptStatus, Chunk, CompletionStatus, ConceptCount, CourseModule,
    Difficulty, Document, DocumentStatus, FeedbackContent, FeedbackReport, FeedbackStatus,
    PipelineStage, Question, Quiz, QuizAttempt, SourceFormat, StageProgress, UserAnswer,
    UserDocumentStats, UserModuleProgress,
};

/// Handle to the SQLite database
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at the given path and run migrations
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::database(format!("Failed to create data directory: {}", e)))?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| Error::database(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = 10000;
             PRAGMA temp_store = MEMORY;",
        )
        .map_err(|e| Error::database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database for tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::database(format!("Failed to open in-memory database: {}", e)))?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                title TEXT NOT NULL,
                blob_id TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                format TEXT NOT NULL,
                status TEXT NOT NULL,
                current_stage TEXT NOT NULL DEFAULT 'queued',
                modules_completed INTEGER NOT NULL DEFAULT 0,
                total_modules INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner);
            CREATE INDEX IF NOT EXISTS idx_documents_hash ON documents(owner, content_hash);

            CREATE TABLE IF NOT EXISTS module_chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                module_id TEXT,
                content TEXT NOT NULL,
                embedding BLOB,
                position INTEGER NOT NULL,
                char_start INTEGER NOT NULL,
                char_end INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_document ON module_chunks(document_id, position);
            CREATE INDEX IF NOT EXISTS idx_chunks_module ON module_chunks(module_id);

            CREATE TABLE IF NOT EXISTS modules (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                title TEXT NOT NULL,
                summary TEXT NOT NULL,
                module_order INTEGER NOT NULL,
                total_chunks INTEGER NOT NULL DEFAULT 0,
                ready_for_quiz INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_modules_document ON modules(document_id, module_order);

            CREATE TABLE IF NOT EXISTS processing_jobs (
                document_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                PRIMARY KEY (document_id, stage)
            );

            CREATE TABLE IF NOT EXISTS quizzes (
                id TEXT PRIMARY KEY,
                module_id TEXT NOT NULL UNIQUE,
                difficulty TEXT NOT NULL,
                total_questions INTEGER NOT NULL,
                estimated_duration_minutes INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS questions (
                id TEXT PRIMARY KEY,
                quiz_id TEXT NOT NULL,
                question_text TEXT NOT NULL,
                options TEXT NOT NULL,
                correct_answer TEXT NOT NULL,
                explanation TEXT NOT NULL DEFAULT '',
                concept_covered TEXT NOT NULL DEFAULT '',
                difficulty_score REAL NOT NULL DEFAULT 0.5,
                distractor_quality_score REAL NOT NULL DEFAULT 0.0,
                question_order INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_questions_quiz ON questions(quiz_id, question_order);

            CREATE TABLE IF NOT EXISTS quiz_attempts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                quiz_id TEXT NOT NULL,
                attempt_number INTEGER NOT NULL,
                status TEXT NOT NULL,
                score REAL,
                time_spent_seconds INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                submitted_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_attempts_user_quiz ON quiz_attempts(user_id, quiz_id);

            CREATE TABLE IF NOT EXISTS user_answers (
                attempt_id TEXT NOT NULL,
                question_id TEXT NOT NULL,
                user_answer TEXT NOT NULL,
                is_correct INTEGER NOT NULL,
                time_spent_seconds INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (attempt_id, question_id)
            );

            CREATE TABLE IF NOT EXISTS feedback_reports (
                attempt_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                content TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_module_progress (
                user_id TEXT NOT NULL,
                module_id TEXT NOT NULL,
                best_score REAL NOT NULL DEFAULT 0.0,
                attempts_count INTEGER NOT NULL DEFAULT 0,
                mastery_level REAL NOT NULL DEFAULT 0.0,
                completion_status TEXT NOT NULL,
                last_accessed_at TEXT NOT NULL,
                PRIMARY KEY (user_id, module_id)
            );

            CREATE TABLE IF NOT EXISTS user_document_stats (
                user_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                total_modules INTEGER NOT NULL DEFAULT 0,
                completed_modules INTEGER NOT NULL DEFAULT 0,
                average_score REAL NOT NULL DEFAULT 0.0,
                total_time_spent_seconds INTEGER NOT NULL DEFAULT 0,
                weak_concepts TEXT NOT NULL DEFAULT '[]',
                strong_concepts TEXT NOT NULL DEFAULT '[]',
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, document_id)
            );",
        )
        .map_err(|e| Error::database(format!("Failed to run migrations: {}", e)))?;

        tracing::info!("Database migrations complete");
        Ok(())
    }

    // ---- documents ----

    /// Insert a freshly uploaded document
    pub fn insert_document(&self, doc: &Document) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO documents (id, owner, title, blob_id, content_hash, file_size, format,
                                    status, current_stage, modules_completed, total_modules,
                                    error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                doc.id.to_string(),
                doc.owner,
                doc.title,
                doc.blob_id,
                doc.content_hash,
                doc.file_size as i64,
                format_to_string(doc.format),
                doc.status.as_str(),
                doc.progress.current_stage,
                doc.progress.modules_completed as i64,
                doc.progress.total_modules as i64,
                doc.error,
                doc.created_at.to_rfc3339(),
                doc.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::database(format!("Failed to insert document: {}", e)))?;
        Ok(())
    }

    pub fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, owner, title, blob_id, content_hash, file_size, format, status,
                    current_stage, modules_completed, total_modules, error, created_at, updated_at
             FROM documents WHERE id = ?1",
            params![id.to_string()],
            row_to_document,
        )
        .optional()
        .map_err(|e| Error::database(format!("Failed to get document: {}", e)))
    }

    /// Upload deduplication lookup: same owner, same content hash
    pub fn find_document_by_hash(&self, owner: &str, content_hash: &str) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, owner, title, blob_id, content_hash, file_size, format, status,
                    current_stage, modules_completed, total_modules, error, created_at, updated_at
             FROM documents WHERE owner = ?1 AND content_hash = ?2
             ORDER BY created_at DESC LIMIT 1",
            params![owner, content_hash],
            row_to_document,
        )
        .optional()
        .map_err(|e| Error::database(format!("Failed to look up document by hash: {}", e)))
    }

    pub fn list_documents(&self, owner: &str) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, owner, title, blob_id, content_hash, file_size, format, status,
                        current_stage, modules_completed, total_modules, error, created_at, updated_at
                 FROM documents WHERE owner = ?1 ORDER BY created_at DESC",
            )
            .map_err(|e| Error::database(format!("Failed to prepare document list: {}", e)))?;

        let docs = stmt
            .query_map(params![owner], row_to_document)
            .map_err(|e| Error::database(format!("Failed to list documents: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(docs)
    }

    /// Documents that have not reached a terminal state, oldest first.
    /// Used to resume interrupted processing after a restart.
    pub fn list_unfinished_documents(&self) -> Result<Vec<Uuid>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id FROM documents WHERE status NOT IN ('COMPLETED', 'FAILED')
                 ORDER BY created_at",
            )
            .map_err(|e| Error::database(format!("Failed to prepare unfinished query: {}", e)))?;

        let ids = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                Ok(id)
            })
            .map_err(|e| Error::database(format!("Failed to list unfinished documents: {}", e)))?
            .filter_map(|r| r.ok())
            .filter_map(|s| Uuid::parse_str(&s).ok())
            .collect();
        Ok(ids)
    }

    /// Advance a document one step along the status ladder.
    ///
    /// Returns false (and writes nothing) when the transition is not legal
    /// from the current status, so concurrent writers cannot move a document
    /// backwards.
    pub fn advance_document_status(&self, id: Uuid, next: DocumentStatus) -> Result<bool> {
        let conn = self.conn.lock();
        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM documents WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::database(format!("Failed to read document status: {}", e)))?;

        let current = match current.as_deref().and_then(DocumentStatus::parse) {
            Some(s) => s,
            None => return Ok(false),
        };
        if !current.can_transition_to(next) {
            return Ok(false);
        }

        conn.execute(
            "UPDATE documents SET status = ?1, current_stage = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                next.as_str(),
                stage_label(next),
                Utc::now().to_rfc3339(),
                id.to_string()
            ],
        )
        .map_err(|e| Error::database(format!("Failed to advance document status: {}", e)))?;
        Ok(true)
    }

    /// Mark a document failed with a reason. No-op on terminal documents.
    pub fn mark_document_failed(&self, id: Uuid, error: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE documents SET status = ?1, current_stage = ?2, error = ?3, updated_at = ?4
                 WHERE id = ?5 AND status NOT IN ('COMPLETED', 'FAILED')",
                params![
                    DocumentStatus::Failed.as_str(),
                    stage_label(DocumentStatus::Failed),
                    error,
                    Utc::now().to_rfc3339(),
                    id.to_string()
                ],
            )
            .map_err(|e| Error::database(format!("Failed to mark document failed: {}", e)))?;
        Ok(rows > 0)
    }

    /// Retry path. Drops a FAILED document back to PENDING so the ladder can
    /// restart; finished stages are skipped by the stage tracker.
    pub fn reset_document_for_retry(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE documents SET status = ?1, current_stage = 'queued', error = NULL,
                        updated_at = ?2
                 WHERE id = ?3 AND status = 'FAILED'",
                params![
                    DocumentStatus::Pending.as_str(),
                    Utc::now().to_rfc3339(),
                    id.to_string()
                ],
            )
            .map_err(|e| Error::database(format!("Failed to reset document: {}", e)))?;
        Ok(rows > 0)
    }

    /// Overwrite the module progress counters shown in status queries
    pub fn set_module_counters(&self, id: Uuid, completed: u32, total: u32) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE documents SET modules_completed = ?1, total_modules = ?2, updated_at = ?3
             WHERE id = ?4",
            params![
                completed as i64,
                total as i64,
                Utc::now().to_rfc3339(),
                id.to_string()
            ],
        )
        .map_err(|e| Error::database(format!("Failed to update module counters: {}", e)))?;
        Ok(())
    }

    pub fn increment_modules_completed(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE documents SET modules_completed = modules_completed + 1, updated_at = ?1
             WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id.to_string()],
        )
        .map_err(|e| Error::database(format!("Failed to increment module counter: {}", e)))?;
        Ok(())
    }

    // ---- chunks ----

    /// Insert chunks in one transaction
    pub fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::database(format!("Failed to begin transaction: {}", e)))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO module_chunks (id, document_id, module_id, content, embedding,
                                                position, char_start, char_end)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .map_err(|e| Error::database(format!("Failed to prepare chunk insert: {}", e)))?;
            for chunk in chunks {
                stmt.execute(params![
                    chunk.id.to_string(),
                    chunk.document_id.to_string(),
                    chunk.module_id.map(|m| m.to_string()),
                    chunk.content,
                    chunk.embedding.as_ref().map(|e| embedding_to_blob(e)),
                    chunk.position as i64,
                    chunk.char_start as i64,
                    chunk.char_end as i64,
                ])
                .map_err(|e| Error::database(format!("Failed to insert chunk: {}", e)))?;
            }
        }
        tx.commit()
            .map_err(|e| Error::database(format!("Failed to commit chunk insert: {}", e)))?;
        Ok(())
    }

    /// Delete a document's chunks before a re-chunk pass
    pub fn delete_chunks(&self, document_id: Uuid) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM module_chunks WHERE document_id = ?1",
            params![document_id.to_string()],
        )
        .map_err(|e| Error::database(format!("Failed to delete chunks: {}", e)))?;
        Ok(())
    }

    pub fn list_chunks(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, document_id, module_id, content, embedding, position, char_start, char_end
                 FROM module_chunks WHERE document_id = ?1 ORDER BY position",
            )
            .map_err(|e| Error::database(format!("Failed to prepare chunk list: {}", e)))?;

        let chunks = stmt
            .query_map(params![document_id.to_string()], row_to_chunk)
            .map_err(|e| Error::database(format!("Failed to list chunks: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(chunks)
    }

    /// Chunks that still need a vector, in document order
    pub fn list_unembedded_chunks(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, document_id, module_id, content, embedding, position, char_start, char_end
                 FROM module_chunks WHERE document_id = ?1 AND embedding IS NULL ORDER BY position",
            )
            .map_err(|e| Error::database(format!("Failed to prepare unembedded list: {}", e)))?;

        let chunks = stmt
            .query_map(params![document_id.to_string()], row_to_chunk)
            .map_err(|e| Error::database(format!("Failed to list unembedded chunks: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(chunks)
    }

    pub fn set_chunk_embedding(&self, chunk_id: Uuid, embedding: &[f32]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE module_chunks SET embedding = ?1 WHERE id = ?2",
            params![embedding_to_blob(embedding), chunk_id.to_string()],
        )
        .map_err(|e| Error::database(format!("Failed to store embedding: {}", e)))?;
        Ok(())
    }

    /// (embedded, total) chunk counts for a document
    pub fn embedding_progress(&self, document_id: Uuid) -> Result<(u64, u64)> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(embedding), COUNT(*) FROM module_chunks WHERE document_id = ?1",
            params![document_id.to_string()],
            |row| {
                let embedded: i64 = row.get(0)?;
                let total: i64 = row.get(1)?;
                Ok((embedded as u64, total as u64))
            },
        )
        .map_err(|e| Error::database(format!("Failed to count embeddings: {}", e)))
    }

    pub fn list_module_chunks(&self, module_id: Uuid) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, document_id, module_id, content, embedding, position, char_start, char_end
                 FROM module_chunks WHERE module_id = ?1 ORDER BY position",
            )
            .map_err(|e| Error::database(format!("Failed to prepare module chunk list: {}", e)))?;

        let chunks = stmt
            .query_map(params![module_id.to_string()], row_to_chunk)
            .map_err(|e| Error::database(format!("Failed to list module chunks: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(chunks)
    }

    // ---- modules ----

    /// Replace a document's modules and chunk assignments in one transaction.
    ///
    /// The organizer calls this with its full output, so a re-run after a
    /// partial failure leaves no stale modules behind.
    pub fn replace_modules(
        &self,
        document_id: Uuid,
        modules: &[CourseModule],
        assignments: &[(Uuid, Uuid)],
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::database(format!("Failed to begin transaction: {}", e)))?;

        tx.execute(
            "DELETE FROM modules WHERE document_id = ?1",
            params![document_id.to_string()],
        )
        .map_err(|e| Error::database(format!("Failed to clear modules: {}", e)))?;
        tx.execute(
            "UPDATE module_chunks SET module_id = NULL WHERE document_id = ?1",
            params![document_id.to_string()],
        )
        .map_err(|e| Error::database(format!("Failed to clear chunk assignments: {}", e)))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO modules (id, document_id, title, summary, module_order,
                                          total_chunks, ready_for_quiz, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .map_err(|e| Error::database(format!("Failed to prepare module insert: {}", e)))?;
            for module in modules {
                stmt.execute(params![
                    module.id.to_string(),
                    module.document_id.to_string(),
                    module.title,
                    module.summary,
                    module.module_order as i64,
                    module.total_chunks as i64,
                    module.ready_for_quiz as i64,
                    module.created_at.to_rfc3339(),
                ])
                .map_err(|e| Error::database(format!("Failed to insert module: {}", e)))?;
            }

            let mut assign = tx
                .prepare("UPDATE module_chunks SET module_id = ?1 WHERE id = ?2")
                .map_err(|e| Error::database(format!("Failed to prepare assignment: {}", e)))?;
            for (chunk_id, module_id) in assignments {
                assign
                    .execute(params![module_id.to_string(), chunk_id.to_string()])
                    .map_err(|e| Error::database(format!("Failed to assign chunk: {}", e)))?;
            }
        }

        tx.commit()
            .map_err(|e| Error::database(format!("Failed to commit modules: {}", e)))?;
        Ok(())
    }

    pub fn get_module(&self, id: Uuid) -> Result<Option<CourseModule>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, document_id, title, summary, module_order, total_chunks, ready_for_quiz,
                    created_at
             FROM modules WHERE id = ?1",
            params![id.to_string()],
            row_to_module,
        )
        .optional()
        .map_err(|e| Error::database(format!("Failed to get module: {}", e)))
    }

    pub fn list_modules(&self, document_id: Uuid) -> Result<Vec<CourseModule>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, document_id, title, summary, module_order, total_chunks, ready_for_quiz,
                        created_at
                 FROM modules WHERE document_id = ?1 ORDER BY module_order",
            )
            .map_err(|e| Error::database(format!("Failed to prepare module list: {}", e)))?;

        let modules = stmt
            .query_map(params![document_id.to_string()], row_to_module)
            .map_err(|e| Error::database(format!("Failed to list modules: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(modules)
    }

    pub fn set_module_ready(&self, module_id: Uuid, ready: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE modules SET ready_for_quiz = ?1 WHERE id = ?2",
            params![ready as i64, module_id.to_string()],
        )
        .map_err(|e| Error::database(format!("Failed to update module readiness: {}", e)))?;
        Ok(())
    }

    // ---- stage jobs ----

    /// Try to take ownership of a (document, stage) slot.
    ///
    /// Read and write happen under one connection lock, so exactly one
    /// caller is granted. A RUNNING row older than `stale_after_secs` is
    /// treated as abandoned and taken over.
    pub fn acquire_stage(
        &self,
        document_id: Uuid,
        stage: PipelineStage,
        stale_after_secs: i64,
    ) -> Result<AcquireOutcome> {
        let conn = self.conn.lock();
        let now = Utc::now();

        let existing = conn
            .query_row(
                "SELECT document_id, stage, status, retry_count, error, started_at, completed_at
                 FROM processing_jobs WHERE document_id = ?1 AND stage = ?2",
                params![document_id.to_string(), stage.as_str()],
                row_to_stage_job,
            )
            .optional()
            .map_err(|e| Error::database(format!("Failed to read stage job: {}", e)))?;

        match existing {
            None => {
                conn.execute(
                    "INSERT INTO processing_jobs (document_id, stage, status, retry_count,
                                                  error, started_at, completed_at)
                     VALUES (?1, ?2, ?3, 0, NULL, ?4, NULL)",
                    params![
                        document_id.to_string(),
                        stage.as_str(),
                        StageJobStatus::Running.as_str(),
                        now.to_rfc3339()
                    ],
                )
                .map_err(|e| Error::database(format!("Failed to insert stage job: {}", e)))?;
                Ok(AcquireOutcome::Granted)
            }
            Some(job) => match job.status {
                StageJobStatus::Done => Ok(AcquireOutcome::AlreadyDone),
                StageJobStatus::Running => {
                    let age = now - job.started_at;
                    if age <= chrono::Duration::seconds(stale_after_secs) {
                        return Ok(AcquireOutcome::AlreadyRunning);
                    }
                    // Stale holder: assume the worker died mid-stage.
                    conn.execute(
                        "UPDATE processing_jobs
                         SET status = ?1, retry_count = retry_count + 1, error = NULL,
                             started_at = ?2, completed_at = NULL
                         WHERE document_id = ?3 AND stage = ?4",
                        params![
                            StageJobStatus::Running.as_str(),
                            now.to_rfc3339(),
                            document_id.to_string(),
                            stage.as_str()
                        ],
                    )
                    .map_err(|e| Error::database(format!("Failed to reclaim stage job: {}", e)))?;
                    Ok(AcquireOutcome::Granted)
                }
                StageJobStatus::Failed => {
                    conn.execute(
                        "UPDATE processing_jobs
                         SET status = ?1, retry_count = retry_count + 1, error = NULL,
                             started_at = ?2, completed_at = NULL
                         WHERE document_id = ?3 AND stage = ?4",
                        params![
                            StageJobStatus::Running.as_str(),
                            now.to_rfc3339(),
                            document_id.to_string(),
                            stage.as_str()
                        ],
                    )
                    .map_err(|e| Error::database(format!("Failed to restart stage job: {}", e)))?;
                    Ok(AcquireOutcome::Granted)
                }
            },
        }
    }

    /// Mark a stage DONE. Only a RUNNING job can complete, so DONE is
    /// recorded at most once per (document, stage).
    pub fn complete_stage(&self, document_id: Uuid, stage: PipelineStage) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE processing_jobs SET status = ?1, completed_at = ?2
                 WHERE document_id = ?3 AND stage = ?4 AND status = ?5",
                params![
                    StageJobStatus::Done.as_str(),
                    Utc::now().to_rfc3339(),
                    document_id.to_string(),
                    stage.as_str(),
                    StageJobStatus::Running.as_str()
                ],
            )
            .map_err(|e| Error::database(format!("Failed to complete stage job: {}", e)))?;
        Ok(rows > 0)
    }

    pub fn fail_stage(&self, document_id: Uuid, stage: PipelineStage, error: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE processing_jobs SET status = ?1, error = ?2, completed_at = ?3
             WHERE document_id = ?4 AND stage = ?5",
            params![
                StageJobStatus::Failed.as_str(),
                error,
                Utc::now().to_rfc3339(),
                document_id.to_string(),
                stage.as_str()
            ],
        )
        .map_err(|e| Error::database(format!("Failed to record stage failure: {}", e)))?;
        Ok(())
    }

    pub fn get_stage_job(
        &self,
        document_id: Uuid,
        stage: PipelineStage,
    ) -> Result<Option<StageJob>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT document_id, stage, status, retry_count, error, started_at, completed_at
             FROM processing_jobs WHERE document_id = ?1 AND stage = ?2",
            params![document_id.to_string(), stage.as_str()],
            row_to_stage_job,
        )
        .optional()
        .map_err(|e| Error::database(format!("Failed to get stage job: {}", e)))
    }

    pub fn list_stage_jobs(&self, document_id: Uuid) -> Result<Vec<StageJob>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT document_id, stage, status, retry_count, error, started_at, completed_at
                 FROM processing_jobs WHERE document_id = ?1",
            )
            .map_err(|e| Error::database(format!("Failed to prepare stage job list: {}", e)))?;

        let jobs = stmt
            .query_map(params![document_id.to_string()], row_to_stage_job)
            .map_err(|e| Error::database(format!("Failed to list stage jobs: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(jobs)
    }

    // ---- quizzes ----

    /// Insert a quiz and its questions together; a quiz is never visible
    /// without its full question set.
    pub fn insert_quiz(&self, quiz: &Quiz, questions: &[Question]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::database(format!("Failed to begin transaction: {}", e)))?;

        tx.execute(
            "INSERT INTO quizzes (id, module_id, difficulty, total_questions,
                                  estimated_duration_minutes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                quiz.id.to_string(),
                quiz.module_id.to_string(),
                quiz.difficulty.as_str(),
                quiz.total_questions as i64,
                quiz.estimated_duration_minutes as i64,
                quiz.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::database(format!("Failed to insert quiz: {}", e)))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO questions (id, quiz_id, question_text, options, correct_answer,
                                            explanation, concept_covered, difficulty_score,
                                            distractor_quality_score, question_order)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )
                .map_err(|e| Error::database(format!("Failed to prepare question insert: {}", e)))?;
            for q in questions {
                let options = serde_json::to_string(&q.options)
                    .map_err(|e| Error::database(format!("Failed to serialize options: {}", e)))?;
                stmt.execute(params![
                    q.id.to_string(),
                    q.quiz_id.to_string(),
                    q.question_text,
                    options,
                    q.correct_answer,
                    q.explanation,
                    q.concept_covered,
                    q.difficulty_score,
                    q.distractor_quality_score,
                    q.question_order as i64,
                ])
                .map_err(|e| Error::database(format!("Failed to insert question: {}", e)))?;
            }
        }

        tx.commit()
            .map_err(|e| Error::database(format!("Failed to commit quiz: {}", e)))?;
        Ok(())
    }

    pub fn get_quiz(&self, id: Uuid) -> Result<Option<Quiz>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, module_id, difficulty, total_questions, estimated_duration_minutes,
                    created_at
             FROM quizzes WHERE id = ?1",
            params![id.to_string()],
            row_to_quiz,
        )
        .optional()
        .map_err(|e| Error::database(format!("Failed to get quiz: {}", e)))
    }

    pub fn get_quiz_for_module(&self, module_id: Uuid) -> Result<Option<Quiz>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, module_id, difficulty, total_questions, estimated_duration_minutes,
                    created_at
             FROM quizzes WHERE module_id = ?1",
            params![module_id.to_string()],
            row_to_quiz,
        )
        .optional()
        .map_err(|e| Error::database(format!("Failed to get module quiz: {}", e)))
    }

    pub fn list_questions(&self, quiz_id: Uuid) -> Result<Vec<Question>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, quiz_id, question_text, options, correct_answer, explanation,
                        concept_covered, difficulty_score, distractor_quality_score, question_order
                 FROM questions WHERE quiz_id = ?1 ORDER BY question_order",
            )
            .map_err(|e| Error::database(format!("Failed to prepare question list: {}", e)))?;

        let questions = stmt
            .query_map(params![quiz_id.to_string()], row_to_question)
            .map_err(|e| Error::database(format!("Failed to list questions: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(questions)
    }

    // ---- attempts ----

    /// Create a new attempt; attempt numbers are dense per (user, quiz)
    pub fn create_attempt(&self, user_id: &str, quiz_id: Uuid) -> Result<QuizAttempt> {
        let conn = self.conn.lock();
        let prior: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM quiz_attempts WHERE user_id = ?1 AND quiz_id = ?2",
                params![user_id, quiz_id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(format!("Failed to count attempts: {}", e)))?;

        let attempt = QuizAttempt::new(user_id.to_string(), quiz_id, prior as u32 + 1);
        conn.execute(
            "INSERT INTO quiz_attempts (id, user_id, quiz_id, attempt_number, status, score,
                                        time_spent_seconds, started_at, submitted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, 0, ?6, NULL)",
            params![
                attempt.id.to_string(),
                attempt.user_id,
                attempt.quiz_id.to_string(),
                attempt.attempt_number as i64,
                attempt.status.as_str(),
                attempt.started_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::database(format!("Failed to insert attempt: {}", e)))?;
        Ok(attempt)
    }

    pub fn get_attempt(&self, id: Uuid) -> Result<Option<QuizAttempt>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, user_id, quiz_id, attempt_number, status, score, time_spent_seconds,
                    started_at, submitted_at
             FROM quiz_attempts WHERE id = ?1",
            params![id.to_string()],
            row_to_attempt,
        )
        .optional()
        .map_err(|e| Error::database(format!("Failed to get attempt: {}", e)))
    }

    /// Grade an attempt: store answers, set score and GRADED status, and
    /// open a GENERATING feedback report, all in one transaction.
    ///
    /// Returns false without writing anything when the attempt is not
    /// IN_PROGRESS, which is how a duplicate submission is detected.
    pub fn finalize_attempt(
        &self,
        attempt_id: Uuid,
        answers: &[UserAnswer],
        score: f64,
        total_time_seconds: u32,
    ) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::database(format!("Failed to begin transaction: {}", e)))?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM quiz_attempts WHERE id = ?1",
                params![attempt_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::database(format!("Failed to read attempt status: {}", e)))?;

        match status.as_deref().and_then(AttemptStatus::parse) {
            Some(AttemptStatus::InProgress) => {}
            _ => return Ok(false),
        }

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO user_answers (attempt_id, question_id, user_answer, is_correct,
                                               time_spent_seconds)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(|e| Error::database(format!("Failed to prepare answer insert: {}", e)))?;
            for answer in answers {
                stmt.execute(params![
                    answer.attempt_id.to_string(),
                    answer.question_id.to_string(),
                    answer.user_answer,
                    answer.is_correct as i64,
                    answer.time_spent_seconds as i64,
                ])
                .map_err(|e| Error::database(format!("Failed to insert answer: {}", e)))?;
            }
        }

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "UPDATE quiz_attempts SET status = ?1, score = ?2, time_spent_seconds = ?3,
                    submitted_at = ?4
             WHERE id = ?5",
            params![
                AttemptStatus::Graded.as_str(),
                score,
                total_time_seconds as i64,
                now,
                attempt_id.to_string()
            ],
        )
        .map_err(|e| Error::database(format!("Failed to grade attempt: {}", e)))?;

        tx.execute(
            "INSERT INTO feedback_reports (attempt_id, status, content, error, created_at, updated_at)
             VALUES (?1, ?2, NULL, NULL, ?3, ?3)
             ON CONFLICT(attempt_id) DO NOTHING",
            params![
                attempt_id.to_string(),
                FeedbackStatus::Generating.as_str(),
                now
            ],
        )
        .map_err(|e| Error::database(format!("Failed to open feedback report: {}", e)))?;

        tx.commit()
            .map_err(|e| Error::database(format!("Failed to commit grading: {}", e)))?;
        Ok(true)
    }

    pub fn list_answers(&self, attempt_id: Uuid) -> Result<Vec<UserAnswer>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT attempt_id, question_id, user_answer, is_correct, time_spent_seconds
                 FROM user_answers WHERE attempt_id = ?1",
            )
            .map_err(|e| Error::database(format!("Failed to prepare answer list: {}", e)))?;

        let answers = stmt
            .query_map(params![attempt_id.to_string()], row_to_answer)
            .map_err(|e| Error::database(format!("Failed to list answers: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(answers)
    }

    /// Graded attempts by one user on one quiz, oldest first
    pub fn list_graded_attempts(&self, user_id: &str, quiz_id: Uuid) -> Result<Vec<QuizAttempt>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, quiz_id, attempt_number, status, score, time_spent_seconds,
                        started_at, submitted_at
                 FROM quiz_attempts
                 WHERE user_id = ?1 AND quiz_id = ?2 AND status = 'GRADED'
                 ORDER BY attempt_number",
            )
            .map_err(|e| Error::database(format!("Failed to prepare attempt list: {}", e)))?;

        let attempts = stmt
            .query_map(params![user_id, quiz_id.to_string()], row_to_attempt)
            .map_err(|e| Error::database(format!("Failed to list attempts: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(attempts)
    }

    // ---- feedback ----

    pub fn get_feedback(&self, attempt_id: Uuid) -> Result<Option<FeedbackReport>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT attempt_id, status, content, error, created_at, updated_at
             FROM feedback_reports WHERE attempt_id = ?1",
            params![attempt_id.to_string()],
            row_to_feedback,
        )
        .optional()
        .map_err(|e| Error::database(format!("Failed to get feedback report: {}", e)))
    }

    /// Move a GENERATING report to COMPLETED. A report is mutated at most
    /// once; later calls are no-ops.
    pub fn complete_feedback(&self, attempt_id: Uuid, content: &FeedbackContent) -> Result<bool> {
        let json = serde_json::to_string(content)
            .map_err(|e| Error::database(format!("Failed to serialize feedback: {}", e)))?;
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE feedback_reports SET status = ?1, content = ?2, updated_at = ?3
                 WHERE attempt_id = ?4 AND status = ?5",
                params![
                    FeedbackStatus::Completed.as_str(),
                    json,
                    Utc::now().to_rfc3339(),
                    attempt_id.to_string(),
                    FeedbackStatus::Generating.as_str()
                ],
            )
            .map_err(|e| Error::database(format!("Failed to complete feedback: {}", e)))?;
        Ok(rows > 0)
    }

    /// Move a GENERATING report to FAILED with a reason
    pub fn fail_feedback(&self, attempt_id: Uuid, error: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE feedback_reports SET status = ?1, error = ?2, updated_at = ?3
                 WHERE attempt_id = ?4 AND status = ?5",
                params![
                    FeedbackStatus::Failed.as_str(),
                    error,
                    Utc::now().to_rfc3339(),
                    attempt_id.to_string(),
                    FeedbackStatus::Generating.as_str()
                ],
            )
            .map_err(|e| Error::database(format!("Failed to mark feedback failed: {}", e)))?;
        Ok(rows > 0)
    }

    // ---- rollups ----

    pub fn upsert_module_progress(&self, progress: &UserModuleProgress) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO user_module_progress (user_id, module_id, best_score, attempts_count,
                                               mastery_level, completion_status, last_accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, module_id) DO UPDATE SET
                 best_score = excluded.best_score,
                 attempts_count = excluded.attempts_count,
                 mastery_level = excluded.mastery_level,
                 completion_status = excluded.completion_status,
                 last_accessed_at = excluded.last_accessed_at",
            params![
                progress.user_id,
                progress.module_id.to_string(),
                progress.best_score,
                progress.attempts_count as i64,
                progress.mastery_level,
                progress.completion_status.as_str(),
                progress.last_accessed_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::database(format!("Failed to upsert module progress: {}", e)))?;
        Ok(())
    }

    pub fn get_module_progress(
        &self,
        user_id: &str,
        module_id: Uuid,
    ) -> Result<Option<UserModuleProgress>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT user_id, module_id, best_score, attempts_count, mastery_level,
                    completion_status, last_accessed_at
             FROM user_module_progress WHERE user_id = ?1 AND module_id = ?2",
            params![user_id, module_id.to_string()],
            row_to_module_progress,
        )
        .optional()
        .map_err(|e| Error::database(format!("Failed to get module progress: {}", e)))
    }

    /// Progress rows for all of a document's modules
    pub fn list_module_progress(
        &self,
        user_id: &str,
        document_id: Uuid,
    ) -> Result<Vec<UserModuleProgress>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT p.user_id, p.module_id, p.best_score, p.attempts_count, p.mastery_level,
                        p.completion_status, p.last_accessed_at
                 FROM user_module_progress p
                 JOIN modules m ON m.id = p.module_id
                 WHERE p.user_id = ?1 AND m.document_id = ?2
                 ORDER BY m.module_order",
            )
            .map_err(|e| Error::database(format!("Failed to prepare progress list: {}", e)))?;

        let rows = stmt
            .query_map(params![user_id, document_id.to_string()], row_to_module_progress)
            .map_err(|e| Error::database(format!("Failed to list module progress: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn upsert_document_stats(&self, stats: &UserDocumentStats) -> Result<()> {
        let weak = serde_json::to_string(&stats.weak_concepts)
            .map_err(|e| Error::database(format!("Failed to serialize weak concepts: {}", e)))?;
        let strong = serde_json::to_string(&stats.strong_concepts)
            .map_err(|e| Error::database(format!("Failed to serialize strong concepts: {}", e)))?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO user_document_stats (user_id, document_id, total_modules,
                                              completed_modules, average_score,
                                              total_time_spent_seconds, weak_concepts,
                                              strong_concepts, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(user_id, document_id) DO UPDATE SET
                 total_modules = excluded.total_modules,
                 completed_modules = excluded.completed_modules,
                 average_score = excluded.average_score,
                 total_time_spent_seconds = excluded.total_time_spent_seconds,
                 weak_concepts = excluded.weak_concepts,
                 strong_concepts = excluded.strong_concepts,
                 updated_at = excluded.updated_at",
            params![
                stats.user_id,
                stats.document_id.to_string(),
                stats.total_modules as i64,
                stats.completed_modules as i64,
                stats.average_score,
                stats.total_time_spent_seconds as i64,
                weak,
                strong,
                stats.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::database(format!("Failed to upsert document stats: {}", e)))?;
        Ok(())
    }

    pub fn get_document_stats(
        &self,
        user_id: &str,
        document_id: Uuid,
    ) -> Result<Option<UserDocumentStats>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT user_id, document_id, total_modules, completed_modules, average_score,
                    total_time_spent_seconds, weak_concepts, strong_concepts, updated_at
             FROM user_document_stats WHERE user_id = ?1 AND document_id = ?2",
            params![user_id, document_id.to_string()],
            row_to_document_stats,
        )
        .optional()
        .map_err(|e| Error::database(format!("Failed to get document stats: {}", e)))
    }

    /// Mean score, attempt count, and total time over one user's graded
    /// attempts on a document's modules
    pub fn attempt_aggregates(&self, user_id: &str, document_id: Uuid) -> Result<AttemptAggregates> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COALESCE(AVG(a.score), 0.0), COUNT(*), COALESCE(SUM(a.time_spent_seconds), 0)
             FROM quiz_attempts a
             JOIN quizzes z ON z.id = a.quiz_id
             JOIN modules m ON m.id = z.module_id
             WHERE a.user_id = ?1 AND m.document_id = ?2 AND a.status = 'GRADED'",
            params![user_id, document_id.to_string()],
            |row| {
                let average_score: f64 = row.get(0)?;
                let graded: i64 = row.get(1)?;
                let total_time: i64 = row.get(2)?;
                Ok(AttemptAggregates {
                    average_score,
                    graded_attempts: graded as u32,
                    total_time_seconds: total_time as u32,
                })
            },
        )
        .map_err(|e| Error::database(format!("Failed to aggregate attempts: {}", e)))
    }

    /// Concept hit counts over one user's graded attempts on a document.
    ///
    /// `correct = false` counts misses (weak concepts), `correct = true`
    /// counts right answers (strong concepts). Ordered by count descending,
    /// then concept name for a stable result.
    pub fn concept_counts(
        &self,
        user_id: &str,
        document_id: Uuid,
        correct: bool,
        min_count: u32,
        limit: u32,
    ) -> Result<Vec<ConceptCount>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT q.concept_covered, COUNT(*) AS hits
                 FROM user_answers ua
                 JOIN quiz_attempts a ON a.id = ua.attempt_id
                 JOIN quizzes z ON z.id = a.quiz_id
                 JOIN modules m ON m.id = z.module_id
                 JOIN questions q ON q.id = ua.question_id
                 WHERE a.user_id = ?1 AND m.document_id = ?2 AND a.status = 'GRADED'
                   AND ua.is_correct = ?3 AND q.concept_covered <> ''
                 GROUP BY q.concept_covered
                 HAVING COUNT(*) >= ?4
                 ORDER BY hits DESC, q.concept_covered ASC
                 LIMIT ?5",
            )
            .map_err(|e| Error::database(format!("Failed to prepare concept counts: {}", e)))?;

        let counts = stmt
            .query_map(
                params![
                    user_id,
                    document_id.to_string(),
                    correct as i64,
                    min_count as i64,
                    limit as i64
                ],
                |row| {
                    let concept: String = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    Ok(ConceptCount {
                        concept,
                        count: count as u32,
                    })
                },
            )
            .map_err(|e| Error::database(format!("Failed to count concepts: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(counts)
    }
}

// ---- helpers ----

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn format_to_string(format: SourceFormat) -> &'static str {
    match format {
        SourceFormat::Pdf => "pdf",
        SourceFormat::Docx => "docx",
        SourceFormat::Txt => "txt",
        SourceFormat::Markdown => "markdown",
        SourceFormat::Unknown => "unknown",
    }
}

/// current_stage display label for a status
fn stage_label(status: DocumentStatus) -> &'static str {
    match status {
        DocumentStatus::Pending => "queued",
        DocumentStatus::Extracting => "extracting",
        DocumentStatus::Chunking => "chunking",
        DocumentStatus::Embedding => "embedding",
        DocumentStatus::Organizing => "organizing",
        DocumentStatus::QuizGenerating => "generating_quizzes",
        DocumentStatus::Completed => "completed",
        DocumentStatus::Failed => "failed",
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
    let id_str: String = row.get(0)?;
    let owner: String = row.get(1)?;
    let title: String = row.get(2)?;
    let blob_id: String = row.get(3)?;
    let content_hash: String = row.get(4)?;
    let file_size: i64 = row.get(5)?;
    let format_str: String = row.get(6)?;
    let status_str: String = row.get(7)?;
    let current_stage: String = row.get(8)?;
    let modules_completed: i64 = row.get(9)?;
    let total_modules: i64 = row.get(10)?;
    let error: Option<String> = row.get(11)?;
    let created_at_str: String = row.get(12)?;
    let updated_at_str: String = row.get(13)?;

    Ok(Document {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::new_v4()),
        owner,
        title,
        blob_id,
        content_hash,
        file_size: file_size as u64,
        format: SourceFormat::from_extension(&format_str),
        status: DocumentStatus::parse(&status_str).unwrap_or(DocumentStatus::Failed),
        progress: StageProgress {
            current_stage,
            modules_completed: modules_completed as u32,
            total_modules: total_modules as u32,
        },
        error,
        created_at: parse_timestamp(&created_at_str),
        updated_at: parse_timestamp(&updated_at_str),
    })
}

fn row_to_chunk(row: &rusqlite::Row) -> rusqlite::Result<Chunk> {
    let id_str: String = row.get(0)?;
    let document_id_str: String = row.get(1)?;
    let module_id_str: Option<String> = row.get(2)?;
    let content: String = row.get(3)?;
    let embedding_blob: Option<Vec<u8>> = row.get(4)?;
    let position: i64 = row.get(5)?;
    let char_start: i64 = row.get(6)?;
    let char_end: i64 = row.get(7)?;

    Ok(Chunk {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::new_v4()),
        document_id: Uuid::parse_str(&document_id_str).unwrap_or_else(|_| Uuid::new_v4()),
        module_id: module_id_str.and_then(|s| Uuid::parse_str(&s).ok()),
        content,
        embedding: embedding_blob.map(|b| blob_to_embedding(&b)),
        position: position as u32,
        char_start: char_start as usize,
        char_end: char_end as usize,
    })
}

fn row_to_module(row: &rusqlite::Row) -> rusqlite::Result<CourseModule> {
    let id_str: String = row.get(0)?;
    let document_id_str: String = row.get(1)?;
    let title: String = row.get(2)?;
    let summary: String = row.get(3)?;
    let module_order: i64 = row.get(4)?;
    let total_chunks: i64 = row.get(5)?;
    let ready_for_quiz: i64 = row.get(6)?;
    let created_at_str: String = row.get(7)?;

    Ok(CourseModule {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::new_v4()),
        document_id: Uuid::parse_str(&document_id_str).unwrap_or_else(|_| Uuid::new_v4()),
        title,
        summary,
        module_order: module_order as u32,
        total_chunks: total_chunks as u32,
        ready_for_quiz: ready_for_quiz != 0,
        created_at: parse_timestamp(&created_at_str),
    })
}

fn row_to_stage_job(row: &rusqlite::Row) -> rusqlite::Result<StageJob> {
    let document_id_str: String = row.get(0)?;
    let stage_str: String = row.get(1)?;
    let status_str: String = row.get(2)?;
    let retry_count: i64 = row.get(3)?;
    let error: Option<String> = row.get(4)?;
    let started_at_str: String = row.get(5)?;
    let completed_at_str: Option<String> = row.get(6)?;

    Ok(StageJob {
        document_id: Uuid::parse_str(&document_id_str).unwrap_or_else(|_| Uuid::new_v4()),
        stage: PipelineStage::parse(&stage_str).unwrap_or(PipelineStage::Extract),
        status: StageJobStatus::parse(&status_str).unwrap_or(StageJobStatus::Failed),
        retry_count: retry_count as u32,
        error,
        started_at: parse_timestamp(&started_at_str),
        completed_at: completed_at_str.as_deref().map(parse_timestamp),
    })
}

fn row_to_quiz(row: &rusqlite::Row) -> rusqlite::Result<Quiz> {
    let id_str: String = row.get(0)?;
    let module_id_str: String = row.get(1)?;
    let difficulty_str: String = row.get(2)?;
    let total_questions: i64 = row.get(3)?;
    let estimated_duration_minutes: i64 = row.get(4)?;
    let created_at_str: String = row.get(5)?;

    Ok(Quiz {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::new_v4()),
        module_id: Uuid::parse_str(&module_id_str).unwrap_or_else(|_| Uuid::new_v4()),
        difficulty: Difficulty::parse(&difficulty_str).unwrap_or_default(),
        total_questions: total_questions as u32,
        estimated_duration_minutes: estimated_duration_minutes as u32,
        created_at: parse_timestamp(&created_at_str),
    })
}

fn row_to_question(row: &rusqlite::Row) -> rusqlite::Result<Question> {
    let id_str: String = row.get(0)?;
    let quiz_id_str: String = row.get(1)?;
    let question_text: String = row.get(2)?;
    let options_json: String = row.get(3)?;
    let correct_answer: String = row.get(4)?;
    let explanation: String = row.get(5)?;
    let concept_covered: String = row.get(6)?;
    let difficulty_score: f64 = row.get(7)?;
    let distractor_quality_score: f64 = row.get(8)?;
    let question_order: i64 = row.get(9)?;

    Ok(Question {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::new_v4()),
        quiz_id: Uuid::parse_str(&quiz_id_str).unwrap_or_else(|_| Uuid::new_v4()),
        question_text,
        options: serde_json::from_str(&options_json).unwrap_or_default(),
        correct_answer,
        explanation,
        concept_covered,
        difficulty_score,
        distractor_quality_score,
        question_order: question_order as u32,
    })
}

fn row_to_attempt(row: &rusqlite::Row) -> rusqlite::Result<QuizAttempt> {
    let id_str: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let quiz_id_str: String = row.get(2)?;
    let attempt_number: i64 = row.get(3)?;
    let status_str: String = row.get(4)?;
    let score: Option<f64> = row.get(5)?;
    let time_spent_seconds: i64 = row.get(6)?;
    let started_at_str: String = row.get(7)?;
    let submitted_at_str: Option<String> = row.get(8)?;

    Ok(QuizAttempt {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::new_v4()),
        user_id,
        quiz_id: Uuid::parse_str(&quiz_id_str).unwrap_or_else(|_| Uuid::new_v4()),
        attempt_number: attempt_number as u32,
        status: AttemptStatus::parse(&status_str).unwrap_or(AttemptStatus::Graded),
        score,
        time_spent_seconds: time_spent_seconds as u32,
        started_at: parse_timestamp(&started_at_str),
        submitted_at: submitted_at_str.as_deref().map(parse_timestamp),
    })
}

fn row_to_answer(row: &rusqlite::Row) -> rusqlite::Result<UserAnswer> {
    let attempt_id_str: String = row.get(0)?;
    let question_id_str: String = row.get(1)?;
    let user_answer: String = row.get(2)?;
    let is_correct: i64 = row.get(3)?;
    let time_spent_seconds: i64 = row.get(4)?;

    Ok(UserAnswer {
        attempt_id: Uuid::parse_str(&attempt_id_str).unwrap_or_else(|_| Uuid::new_v4()),
        question_id: Uuid::parse_str(&question_id_str).unwrap_or_else(|_| Uuid::new_v4()),
        user_answer,
        is_correct: is_correct != 0,
        time_spent_seconds: time_spent_seconds as u32,
    })
}

fn row_to_feedback(row: &rusqlite::Row) -> rusqlite::Result<FeedbackReport> {
    let attempt_id_str: String = row.get(0)?;
    let status_str: String = row.get(1)?;
    let content_json: Option<String> = row.get(2)?;
    let error: Option<String> = row.get(3)?;
    let created_at_str: String = row.get(4)?;
    let updated_at_str: String = row.get(5)?;

    Ok(FeedbackReport {
        attempt_id: Uuid::parse_str(&attempt_id_str).unwrap_or_else(|_| Uuid::new_v4()),
        status: FeedbackStatus::parse(&status_str).unwrap_or(FeedbackStatus::Failed),
        content: content_json.and_then(|j| serde_json::from_str(&j).ok()),
        error,
        created_at: parse_timestamp(&created_at_str),
        updated_at: parse_timestamp(&updated_at_str),
    })
}

fn row_to_module_progress(row: &rusqlite::Row) -> rusqlite::Result<UserModuleProgress> {
    let user_id: String = row.get(0)?;
    let module_id_str: String = row.get(1)?;
    let best_score: f64 = row.get(2)?;
    let attempts_count: i64 = row.get(3)?;
    let mastery_level: f64 = row.get(4)?;
    let completion_status_str: String = row.get(5)?;
    let last_accessed_at_str: String = row.get(6)?;

    Ok(UserModuleProgress {
        user_id,
        module_id: Uuid::parse_str(&module_id_str).unwrap_or_else(|_| Uuid::new_v4()),
        best_score,
        attempts_count: attempts_count as u32,
        mastery_level,
        completion_status: CompletionStatus::parse(&completion_status_str)
            .unwrap_or(CompletionStatus::InProgress),
        last_accessed_at: parse_timestamp(&last_accessed_at_str),
    })
}

fn row_to_document_stats(row: &rusqlite::Row) -> rusqlite::Result<UserDocumentStats> {
    let user_id: String = row.get(0)?;
    let document_id_str: String = row.get(1)?;
    let total_modules: i64 = row.get(2)?;
    let completed_modules: i64 = row.get(3)?;
    let average_score: f64 = row.get(4)?;
    let total_time_spent_seconds: i64 = row.get(5)?;
    let weak_json: String = row.get(6)?;
    let strong_json: String = row.get(7)?;
    let updated_at_str: String = row.get(8)?;

    Ok(UserDocumentStats {
        user_id,
        document_id: Uuid::parse_str(&document_id_str).unwrap_or_else(|_| Uuid::new_v4()),
        total_modules: total_modules as u32,
        completed_modules: completed_modules as u32,
        average_score,
        total_time_spent_seconds: total_time_spent_seconds as u32,
        weak_concepts: serde_json::from_str(&weak_json).unwrap_or_default(),
        strong_concepts: serde_json::from_str(&strong_json).unwrap_or_default(),
        updated_at: parse_timestamp(&updated_at_str),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document(owner: &str) -> Document {
        Document::new(
            owner.to_string(),
            "Linear Algebra Notes.pdf".to_string(),
            "blob-1".to_string(),
            "hash-1".to_string(),
            2048,
            SourceFormat::Pdf,
        )
    }

    fn sample_question(quiz_id: Uuid, order: u32, concept: &str) -> Question {
        Question {
            id: Uuid::new_v4(),
            quiz_id,
            question_text: format!("Question {}?", order),
            options: vec![
                "A".to_string(),
                "B".to_string(),
                "C".to_string(),
                "D".to_string(),
            ],
            correct_answer: "A".to_string(),
            explanation: "Because A.".to_string(),
            concept_covered: concept.to_string(),
            difficulty_score: 0.5,
            distractor_quality_score: 0.7,
            question_order: order,
        }
    }

    #[test]
    fn test_document_round_trip() {
        let db = Database::in_memory().unwrap();
        let doc = sample_document("alice");
        db.insert_document(&doc).unwrap();

        let fetched = db.get_document(doc.id).unwrap().unwrap();
        assert_eq!(fetched.title, "Linear Algebra Notes.pdf");
        assert_eq!(fetched.format, SourceFormat::Pdf);
        assert_eq!(fetched.status, DocumentStatus::Pending);
        assert_eq!(fetched.progress.current_stage, "queued");

        let by_hash = db.find_document_by_hash("alice", "hash-1").unwrap();
        assert!(by_hash.is_some());
        assert!(db.find_document_by_hash("bob", "hash-1").unwrap().is_none());

        assert_eq!(db.list_documents("alice").unwrap().len(), 1);
        assert!(db.list_documents("bob").unwrap().is_empty());
    }

    #[test]
    fn test_status_ladder_is_enforced() {
        let db = Database::in_memory().unwrap();
        let doc = sample_document("alice");
        db.insert_document(&doc).unwrap();

        assert!(db
            .advance_document_status(doc.id, DocumentStatus::Extracting)
            .unwrap());
        // Skipping ahead is rejected
        assert!(!db
            .advance_document_status(doc.id, DocumentStatus::Embedding)
            .unwrap());
        // Moving backwards is rejected
        assert!(!db
            .advance_document_status(doc.id, DocumentStatus::Pending)
            .unwrap());

        assert!(db.mark_document_failed(doc.id, "extractor blew up").unwrap());
        let failed = db.get_document(doc.id).unwrap().unwrap();
        assert_eq!(failed.status, DocumentStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("extractor blew up"));

        // Terminal documents stay put
        assert!(!db
            .advance_document_status(doc.id, DocumentStatus::Extracting)
            .unwrap());
        assert!(!db.mark_document_failed(doc.id, "again").unwrap());

        // Retry drops back to PENDING and clears the error
        assert!(db.reset_document_for_retry(doc.id).unwrap());
        let reset = db.get_document(doc.id).unwrap().unwrap();
        assert_eq!(reset.status, DocumentStatus::Pending);
        assert!(reset.error.is_none());
        // Only FAILED documents can be reset
        assert!(!db.reset_document_for_retry(doc.id).unwrap());
    }

    #[test]
    fn test_stage_acquire_contract() {
        let db = Database::in_memory().unwrap();
        let doc_id = Uuid::new_v4();
        let stage = PipelineStage::Extract;

        assert_eq!(
            db.acquire_stage(doc_id, stage, 600).unwrap(),
            AcquireOutcome::Granted
        );
        assert_eq!(
            db.acquire_stage(doc_id, stage, 600).unwrap(),
            AcquireOutcome::AlreadyRunning
        );

        assert!(db.complete_stage(doc_id, stage).unwrap());
        // DONE is recorded at most once
        assert!(!db.complete_stage(doc_id, stage).unwrap());
        assert_eq!(
            db.acquire_stage(doc_id, stage, 600).unwrap(),
            AcquireOutcome::AlreadyDone
        );

        // A failed stage can be re-acquired
        let chunk = PipelineStage::Chunk;
        assert_eq!(
            db.acquire_stage(doc_id, chunk, 600).unwrap(),
            AcquireOutcome::Granted
        );
        db.fail_stage(doc_id, chunk, "boom").unwrap();
        assert_eq!(
            db.acquire_stage(doc_id, chunk, 600).unwrap(),
            AcquireOutcome::Granted
        );
        let job = db.get_stage_job(doc_id, chunk).unwrap().unwrap();
        assert_eq!(job.retry_count, 1);
        assert!(job.error.is_none());
    }

    #[test]
    fn test_stale_running_stage_is_reclaimed() {
        let db = Database::in_memory().unwrap();
        let doc_id = Uuid::new_v4();
        let stage = PipelineStage::Embed;

        assert_eq!(
            db.acquire_stage(doc_id, stage, 600).unwrap(),
            AcquireOutcome::Granted
        );
        std::thread::sleep(std::time::Duration::from_millis(20));
        // With a zero staleness window the running holder is presumed dead
        assert_eq!(
            db.acquire_stage(doc_id, stage, 0).unwrap(),
            AcquireOutcome::Granted
        );
        assert_eq!(db.get_stage_job(doc_id, stage).unwrap().unwrap().retry_count, 1);
    }

    #[test]
    fn test_chunk_embedding_round_trip() {
        let db = Database::in_memory().unwrap();
        let doc_id = Uuid::new_v4();
        let chunks: Vec<Chunk> = (0..3)
            .map(|i| Chunk::new(doc_id, format!("chunk {}", i), i, 0, 10))
            .collect();
        db.insert_chunks(&chunks).unwrap();

        assert_eq!(db.list_unembedded_chunks(doc_id).unwrap().len(), 3);
        assert_eq!(db.embedding_progress(doc_id).unwrap(), (0, 3));

        let vector = vec![0.25f32, -1.5, 3.75];
        db.set_chunk_embedding(chunks[1].id, &vector).unwrap();

        assert_eq!(db.list_unembedded_chunks(doc_id).unwrap().len(), 2);
        assert_eq!(db.embedding_progress(doc_id).unwrap(), (1, 3));

        let stored = db.list_chunks(doc_id).unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[1].embedding.as_deref(), Some(vector.as_slice()));
        assert!(stored[0].embedding.is_none());

        db.delete_chunks(doc_id).unwrap();
        assert!(db.list_chunks(doc_id).unwrap().is_empty());
    }

    #[test]
    fn test_replace_modules_assigns_chunks() {
        let db = Database::in_memory().unwrap();
        let doc_id = Uuid::new_v4();
        let chunks: Vec<Chunk> = (0..4)
            .map(|i| Chunk::new(doc_id, format!("chunk {}", i), i, 0, 10))
            .collect();
        db.insert_chunks(&chunks).unwrap();

        let mut m1 = CourseModule::new(doc_id, "Module 1".to_string(), "Intro".to_string(), 1);
        m1.total_chunks = 2;
        let mut m2 = CourseModule::new(doc_id, "Module 2".to_string(), "More".to_string(), 2);
        m2.total_chunks = 2;

        db.replace_modules(
            doc_id,
            &[m1.clone(), m2.clone()],
            &[
                (chunks[0].id, m1.id),
                (chunks[1].id, m1.id),
                (chunks[2].id, m2.id),
                (chunks[3].id, m2.id),
            ],
        )
        .unwrap();

        let modules = db.list_modules(doc_id).unwrap();
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].title, "Module 1");
        assert_eq!(db.list_module_chunks(m1.id).unwrap().len(), 2);

        // Re-running the organizer replaces rather than appends
        let m3 = CourseModule::new(doc_id, "Module 1".to_string(), "All".to_string(), 1);
        let assignments: Vec<(Uuid, Uuid)> = chunks.iter().map(|c| (c.id, m3.id)).collect();
        db.replace_modules(doc_id, &[m3.clone()], &assignments).unwrap();

        assert_eq!(db.list_modules(doc_id).unwrap().len(), 1);
        assert_eq!(db.list_module_chunks(m3.id).unwrap().len(), 4);
        assert!(db.list_module_chunks(m1.id).unwrap().is_empty());

        db.set_module_ready(m3.id, true).unwrap();
        assert!(db.get_module(m3.id).unwrap().unwrap().ready_for_quiz);
    }

    #[test]
    fn test_quiz_insert_and_fetch() {
        let db = Database::in_memory().unwrap();
        let module_id = Uuid::new_v4();
        let quiz = Quiz::new(module_id, Difficulty::Medium, 2, 10);
        let questions = vec![
            sample_question(quiz.id, 1, "vectors"),
            sample_question(quiz.id, 2, "matrices"),
        ];
        db.insert_quiz(&quiz, &questions).unwrap();

        let fetched = db.get_quiz_for_module(module_id).unwrap().unwrap();
        assert_eq!(fetched.id, quiz.id);
        assert_eq!(fetched.total_questions, 2);
        assert_eq!(fetched.difficulty, Difficulty::Medium);

        let listed = db.list_questions(quiz.id).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].question_order, 1);
        assert_eq!(listed[0].options.len(), 4);
        assert_eq!(listed[1].concept_covered, "matrices");
    }

    #[test]
    fn test_attempt_numbering_and_finalize() {
        let db = Database::in_memory().unwrap();
        let quiz_id = Uuid::new_v4();

        let first = db.create_attempt("alice", quiz_id).unwrap();
        assert_eq!(first.attempt_number, 1);
        let second = db.create_attempt("alice", quiz_id).unwrap();
        assert_eq!(second.attempt_number, 2);
        // Numbering is per user
        assert_eq!(db.create_attempt("bob", quiz_id).unwrap().attempt_number, 1);

        let answers = vec![
            UserAnswer {
                attempt_id: first.id,
                question_id: Uuid::new_v4(),
                user_answer: "A".to_string(),
                is_correct: true,
                time_spent_seconds: 30,
            },
            UserAnswer {
                attempt_id: first.id,
                question_id: Uuid::new_v4(),
                user_answer: "C".to_string(),
                is_correct: false,
                time_spent_seconds: 45,
            },
        ];
        assert!(db.finalize_attempt(first.id, &answers, 50.0, 75).unwrap());

        let graded = db.get_attempt(first.id).unwrap().unwrap();
        assert_eq!(graded.status, AttemptStatus::Graded);
        assert_eq!(graded.score, Some(50.0));
        assert_eq!(graded.time_spent_seconds, 75);
        assert!(graded.submitted_at.is_some());

        // Double submission is refused without touching the stored answers
        assert!(!db.finalize_attempt(first.id, &answers, 100.0, 10).unwrap());
        assert_eq!(db.list_answers(first.id).unwrap().len(), 2);

        // Grading opened the feedback report
        let report = db.get_feedback(first.id).unwrap().unwrap();
        assert_eq!(report.status, FeedbackStatus::Generating);

        let graded_list = db.list_graded_attempts("alice", quiz_id).unwrap();
        assert_eq!(graded_list.len(), 1);
    }

    #[test]
    fn test_feedback_is_mutated_once() {
        let db = Database::in_memory().unwrap();
        let attempt = db.create_attempt("alice", Uuid::new_v4()).unwrap();
        assert!(db.finalize_attempt(attempt.id, &[], 0.0, 0).unwrap());

        let content = FeedbackContent {
            overall_feedback: "Solid work.".to_string(),
            strengths: vec!["vectors".to_string()],
            ..FeedbackContent::default()
        };
        assert!(db.complete_feedback(attempt.id, &content).unwrap());

        let report = db.get_feedback(attempt.id).unwrap().unwrap();
        assert_eq!(report.status, FeedbackStatus::Completed);
        assert_eq!(report.content.unwrap().overall_feedback, "Solid work.");

        // Completed reports cannot be failed or rewritten
        assert!(!db.fail_feedback(attempt.id, "late error").unwrap());
        assert!(!db.complete_feedback(attempt.id, &content).unwrap());
        let report = db.get_feedback(attempt.id).unwrap().unwrap();
        assert_eq!(report.status, FeedbackStatus::Completed);
    }

    #[test]
    fn test_concept_counts_and_aggregates() {
        let db = Database::in_memory().unwrap();
        let doc_id = Uuid::new_v4();
        let module = CourseModule::new(doc_id, "Module 1".to_string(), "Intro".to_string(), 1);
        db.replace_modules(doc_id, &[module.clone()], &[]).unwrap();

        let quiz = Quiz::new(module.id, Difficulty::Medium, 3, 10);
        let questions = vec![
            sample_question(quiz.id, 1, "vectors"),
            sample_question(quiz.id, 2, "vectors"),
            sample_question(quiz.id, 3, "matrices"),
        ];
        db.insert_quiz(&quiz, &questions).unwrap();

        for _ in 0..2 {
            let attempt = db.create_attempt("alice", quiz.id).unwrap();
            let answers: Vec<UserAnswer> = questions
                .iter()
                .map(|q| UserAnswer {
                    attempt_id: attempt.id,
                    question_id: q.id,
                    // Both vectors questions missed, matrices answered right
                    user_answer: if q.concept_covered == "vectors" { "B" } else { "A" }.to_string(),
                    is_correct: q.concept_covered != "vectors",
                    time_spent_seconds: 20,
                })
                .collect();
            assert!(db.finalize_attempt(attempt.id, &answers, 33.3, 60).unwrap());
        }

        let weak = db.concept_counts("alice", doc_id, false, 2, 10).unwrap();
        assert_eq!(weak.len(), 1);
        assert_eq!(weak[0].concept, "vectors");
        assert_eq!(weak[0].count, 4);

        let strong = db.concept_counts("alice", doc_id, true, 2, 10).unwrap();
        assert_eq!(strong.len(), 1);
        assert_eq!(strong[0].concept, "matrices");
        assert_eq!(strong[0].count, 2);

        let aggregates = db.attempt_aggregates("alice", doc_id).unwrap();
        assert_eq!(aggregates.graded_attempts, 2);
        assert!((aggregates.average_score - 33.3).abs() < 1e-9);
        assert_eq!(aggregates.total_time_seconds, 120);

        // Other users see nothing
        assert!(db.concept_counts("bob", doc_id, false, 1, 10).unwrap().is_empty());
        assert_eq!(db.attempt_aggregates("bob", doc_id).unwrap().graded_attempts, 0);
    }

    #[test]
    fn test_progress_and_stats_upsert() {
        let db = Database::in_memory().unwrap();
        let module_id = Uuid::new_v4();
        let doc_id = Uuid::new_v4();

        let mut progress = UserModuleProgress {
            user_id: "alice".to_string(),
            module_id,
            best_score: 60.0,
            attempts_count: 1,
            mastery_level: 0.6,
            completion_status: CompletionStatus::InProgress,
            last_accessed_at: Utc::now(),
        };
        db.upsert_module_progress(&progress).unwrap();

        progress.best_score = 80.0;
        progress.attempts_count = 2;
        progress.mastery_level = 0.8;
        progress.completion_status = CompletionStatus::Completed;
        db.upsert_module_progress(&progress).unwrap();

        let stored = db.get_module_progress("alice", module_id).unwrap().unwrap();
        assert_eq!(stored.best_score, 80.0);
        assert_eq!(stored.attempts_count, 2);
        assert_eq!(stored.completion_status, CompletionStatus::Completed);

        let stats = UserDocumentStats {
            user_id: "alice".to_string(),
            document_id: doc_id,
            total_modules: 3,
            completed_modules: 1,
            average_score: 71.5,
            total_time_spent_seconds: 300,
            weak_concepts: vec![ConceptCount {
                concept: "matrices".to_string(),
                count: 3,
            }],
            strong_concepts: vec![],
            updated_at: Utc::now(),
        };
        db.upsert_document_stats(&stats).unwrap();

        let stored = db.get_document_stats("alice", doc_id).unwrap().unwrap();
        assert_eq!(stored.total_modules, 3);
        assert_eq!(stored.weak_concepts.len(), 1);
        assert_eq!(stored.weak_concepts[0].concept, "matrices");
        assert!(db.get_document_stats("bob", doc_id).unwrap().is_none());
    }
}
