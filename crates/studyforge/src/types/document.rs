//! Document, extraction, and chunk types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported source formats
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// PDF document
    Pdf,
    /// Microsoft Word document (.docx)
    Docx,
    /// Plain text file
    Txt,
    /// Markdown file
    Markdown,
    /// Unknown format
    Unknown,
}

impl SourceFormat {
    /// Detect format from a MIME type string
    pub fn from_mime(mime: &str) -> Self {
        match mime {
            "application/pdf" => Self::Pdf,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Self::Docx
            }
            "text/plain" => Self::Txt,
            "text/markdown" | "text/x-markdown" => Self::Markdown,
            _ => Self::Unknown,
        }
    }

    /// Detect format from a filename extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "docx" => Self::Docx,
            "txt" | "text" => Self::Txt,
            "md" | "markdown" => Self::Markdown,
            _ => Self::Unknown,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Canonical MIME type for storage
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Self::Txt => "text/plain",
            Self::Markdown => "text/markdown",
            Self::Unknown => "application/octet-stream",
        }
    }
}

/// Processing status of a document
///
/// Advances monotonically through the pipeline; any state may drop to
/// `Failed`, and `Completed`/`Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Extracting,
    Chunking,
    Embedding,
    Organizing,
    QuizGenerating,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Extracting => "EXTRACTING",
            Self::Chunking => "CHUNKING",
            Self::Embedding => "EMBEDDING",
            Self::Organizing => "ORGANIZING",
            Self::QuizGenerating => "QUIZ_GENERATING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "EXTRACTING" => Some(Self::Extracting),
            "CHUNKING" => Some(Self::Chunking),
            "EMBEDDING" => Some(Self::Embedding),
            "ORGANIZING" => Some(Self::Organizing),
            "QUIZ_GENERATING" => Some(Self::QuizGenerating),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Ordinal used to enforce monotonic transitions; Failed sits outside
    /// the ladder and is reachable from anywhere.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Extracting => 1,
            Self::Chunking => 2,
            Self::Embedding => 3,
            Self::Organizing => 4,
            Self::QuizGenerating => 5,
            Self::Completed => 6,
            Self::Failed => 7,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` is a legal transition from this status
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        next.rank() == self.rank() + 1
    }
}

/// Pipeline stages tracked by the idempotency layer, in execution order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Extract,
    Chunk,
    Embed,
    Organize,
    GenerateQuizzes,
}

impl PipelineStage {
    /// All stages in execution order
    pub const ALL: [PipelineStage; 5] = [
        Self::Extract,
        Self::Chunk,
        Self::Embed,
        Self::Organize,
        Self::GenerateQuizzes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Chunk => "chunk",
            Self::Embed => "embed",
            Self::Organize => "organize",
            Self::GenerateQuizzes => "generate_quizzes",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "extract" => Some(Self::Extract),
            "chunk" => Some(Self::Chunk),
            "embed" => Some(Self::Embed),
            "organize" => Some(Self::Organize),
            "generate_quizzes" => Some(Self::GenerateQuizzes),
            _ => None,
        }
    }

    /// Document status while this stage runs
    pub fn running_status(&self) -> DocumentStatus {
        match self {
            Self::Extract => DocumentStatus::Extracting,
            Self::Chunk => DocumentStatus::Chunking,
            Self::Embed => DocumentStatus::Embedding,
            Self::Organize => DocumentStatus::Organizing,
            Self::GenerateQuizzes => DocumentStatus::QuizGenerating,
        }
    }
}

/// Stage progress counters reported in status queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageProgress {
    /// Human-readable stage name ("queued", "extracting", ...)
    pub current_stage: String,
    /// Modules whose quiz generation has finished (success or failure)
    pub modules_completed: u32,
    /// Total modules organized for this document (0 until organized)
    pub total_modules: u32,
}

/// An uploaded document and its processing state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique document ID
    pub id: Uuid,
    /// Owning user id (opaque, supplied by the caller)
    pub owner: String,
    /// Display title (defaults to the uploaded filename)
    pub title: String,
    /// Blob store id of the raw bytes
    pub blob_id: String,
    /// SHA-256 of the raw bytes, used for upload deduplication
    pub content_hash: String,
    /// Size in bytes
    pub file_size: u64,
    /// Declared or inferred source format
    pub format: SourceFormat,
    /// Pipeline status
    pub status: DocumentStatus,
    /// Progress counters
    #[serde(default)]
    pub progress: StageProgress,
    /// Failure message when status is FAILED
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        owner: String,
        title: String,
        blob_id: String,
        content_hash: String,
        file_size: u64,
        format: SourceFormat,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner,
            title,
            blob_id,
            content_hash,
            file_size,
            format,
            status: DocumentStatus::Pending,
            progress: StageProgress {
                current_stage: "queued".to_string(),
                modules_completed: 0,
                total_modules: 0,
            },
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One extracted page or section of a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageContent {
    /// Page number (1-indexed)
    pub page_number: u32,
    /// Plain text content
    pub content: String,
    /// Character offset of this page in the concatenated text
    pub char_offset: usize,
}

/// Output of the content extractor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedDocument {
    /// Concatenated plain text
    pub content: String,
    /// Total pages (1 for unpaged formats)
    pub total_pages: u32,
    /// Ordered page segments
    pub pages: Vec<PageContent>,
}

impl ExtractedDocument {
    /// Single-segment document for unpaged formats
    pub fn single(content: String) -> Self {
        Self {
            total_pages: 1,
            pages: vec![PageContent {
                page_number: 1,
                content: content.clone(),
                char_offset: 0,
            }],
            content,
        }
    }
}

/// A bounded span of extracted text, the unit of embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique chunk ID
    pub id: Uuid,
    /// Parent document ID
    pub document_id: Uuid,
    /// Owning module, assigned by the organizer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_id: Option<Uuid>,
    /// Text content
    pub content: String,
    /// Embedding vector, present once the chunk has been indexed
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub embedding: Option<Vec<f32>>,
    /// Position within the document (0-based, dense)
    pub position: u32,
    /// Character range in the extracted text
    pub char_start: usize,
    pub char_end: usize,
}

impl Chunk {
    pub fn new(
        document_id: Uuid,
        content: String,
        position: u32,
        char_start: usize,
        char_end: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            module_id: None,
            content,
            embedding: None,
            position,
            char_start,
            char_end,
        }
    }

    /// Whether the chunk already has a stored vector
    pub fn is_embedded(&self) -> bool {
        self.embedding.is_some()
    }
}
