//! Learning module types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A topical grouping of chunks, the unit of quiz generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseModule {
    /// Unique module ID
    pub id: Uuid,
    /// Parent document ID
    pub document_id: Uuid,
    /// Display title ("Module N" when nothing better is derivable)
    pub title: String,
    /// Short summary derived from the opening chunk
    pub summary: String,
    /// Order within the document (1-based)
    pub module_order: u32,
    /// Number of chunks assigned
    pub total_chunks: u32,
    /// True once every assigned chunk has a stored embedding
    pub ready_for_quiz: bool,
    pub created_at: DateTime<Utc>,
}

impl CourseModule {
    pub fn new(document_id: Uuid, title: String, summary: String, module_order: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            title,
            summary,
            module_order,
            total_chunks: 0,
            ready_for_quiz: false,
            created_at: Utc::now(),
        }
    }
}
