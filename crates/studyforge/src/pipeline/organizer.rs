//! Module organizer: groups embedded chunks into topical learning modules.
//!
//! Segmentation is purely similarity and size driven, so the same chunks
//! with the same embeddings always organize into the same modules.

use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use crate::config::OrganizerConfig;
use crate::error::{Error, Result};
use crate::providers::cosine_similarity;
use crate::storage::Database;
use crate::types::{Chunk, CourseModule};

pub struct ModuleOrganizer {
    db: Database,
    config: OrganizerConfig,
}

impl ModuleOrganizer {
    pub fn new(db: Database, config: OrganizerConfig) -> Self {
        Self { db, config }
    }

    /// Segment the document's chunks into modules and persist the result,
    /// replacing any previous organization. A module is ready for quiz
    /// generation only when every chunk assigned to it has a stored vector.
    pub fn organize_document(&self, document_id: Uuid) -> Result<Vec<CourseModule>> {
        let chunks = self.db.list_chunks(document_id)?;
        if chunks.is_empty() {
            return Err(Error::stage(
                "organize",
                format!("Document {} has no chunks to organize", document_id),
            ));
        }

        let boundaries = segment(&chunks, &self.config);

        let mut modules = Vec::with_capacity(boundaries.len());
        let mut assignments = Vec::with_capacity(chunks.len());

        for (order, (start, end)) in boundaries.iter().enumerate() {
            let group = &chunks[*start..*end];
            let order = order as u32 + 1;

            let mut module = CourseModule::new(
                document_id,
                derive_title(group, order),
                derive_summary(group),
                order,
            );
            module.total_chunks = group.len() as u32;
            module.ready_for_quiz = group.iter().all(Chunk::is_embedded);

            for chunk in group {
                assignments.push((chunk.id, module.id));
            }
            modules.push(module);
        }

        self.db.replace_modules(document_id, &modules, &assignments)?;

        let ready = modules.iter().filter(|m| m.ready_for_quiz).count();
        tracing::info!(
            "Organized document {} into {} modules ({} ready for quiz)",
            document_id,
            modules.len(),
            ready
        );
        Ok(modules)
    }
}

/// Half-open index ranges of the module groups.
///
/// A new module opens when similarity between consecutive chunks drops
/// below the threshold, or when the open module would exceed its chunk or
/// character cap; every module keeps at least one chunk.
fn segment(chunks: &[Chunk], config: &OrganizerConfig) -> Vec<(usize, usize)> {
    let max_chunks = config.max_chunks_per_module.max(1);
    let mut boundaries = Vec::new();

    let mut start = 0usize;
    let mut chars = chunks[0].content.len();

    for i in 1..chunks.len() {
        let count = i - start;
        let over_caps =
            count >= max_chunks || chars + chunks[i].content.len() > config.max_module_chars;
        let topic_shift = consecutive_similarity(&chunks[i - 1], &chunks[i])
            .map(|sim| sim < config.min_similarity)
            .unwrap_or(false);

        if over_caps || topic_shift {
            boundaries.push((start, i));
            start = i;
            chars = 0;
        }
        chars += chunks[i].content.len();
    }
    boundaries.push((start, chunks.len()));

    boundaries
}

/// Similarity between two adjacent chunks, None when either lacks a vector
fn consecutive_similarity(a: &Chunk, b: &Chunk) -> Option<f32> {
    match (a.embedding.as_deref(), b.embedding.as_deref()) {
        (Some(x), Some(y)) => Some(cosine_similarity(x, y)),
        _ => None,
    }
}

/// Use the opening chunk's first line as the title when it looks like a
/// heading, falling back to "Module N"
fn derive_title(group: &[Chunk], order: u32) -> String {
    if let Some(first_line) = group[0].content.lines().next() {
        let candidate = first_line.trim();
        if (3..=80).contains(&candidate.len()) && !candidate.ends_with('.') {
            return candidate.to_string();
        }
    }
    format!("Module {}", order)
}

/// First sentence of the opening chunk, capped for display
fn derive_summary(group: &[Chunk]) -> String {
    let text = group[0].content.trim();
    let first_sentence = text
        .split_sentence_bounds()
        .next()
        .unwrap_or(text)
        .trim();

    if first_sentence.len() <= 240 {
        return first_sentence.to_string();
    }
    let mut cut = 240;
    while cut > 0 && !first_sentence.is_char_boundary(cut) {
        cut -= 1;
    }
    first_sentence[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Document, SourceFormat};

    fn seed_chunks(db: &Database, texts_and_vectors: &[(&str, Vec<f32>)]) -> Uuid {
        let doc = Document::new(
            "tester".to_string(),
            "notes.txt".to_string(),
            "blob-org".to_string(),
            "hash-org".to_string(),
            64,
            SourceFormat::Txt,
        );
        let document_id = doc.id;
        db.insert_document(&doc).unwrap();

        let chunks: Vec<Chunk> = texts_and_vectors
            .iter()
            .enumerate()
            .map(|(i, (text, _))| {
                Chunk::new(document_id, text.to_string(), i as u32, i * 100, i * 100 + 50)
            })
            .collect();
        db.insert_chunks(&chunks).unwrap();

        for (chunk, (_, vector)) in chunks.iter().zip(texts_and_vectors) {
            if !vector.is_empty() {
                db.set_chunk_embedding(chunk.id, vector).unwrap();
            }
        }
        document_id
    }

    fn organizer(db: &Database) -> ModuleOrganizer {
        ModuleOrganizer::new(
            db.clone(),
            OrganizerConfig {
                min_similarity: 0.6,
                max_chunks_per_module: 3,
                max_module_chars: 10_000,
            },
        )
    }

    #[test]
    fn similarity_drop_opens_a_new_module() {
        let db = Database::in_memory().unwrap();
        // Two topically distinct runs: x-axis vectors then y-axis vectors
        let document_id = seed_chunks(
            &db,
            &[
                ("Cells are the unit of life. They are everywhere.", vec![1.0, 0.0]),
                ("Organelles divide labor inside the cell membrane.", vec![0.9, 0.1]),
                ("Momentum is conserved in closed systems always.", vec![0.0, 1.0]),
                ("Forces change momentum over elapsed time spans.", vec![0.1, 0.9]),
            ],
        );

        let modules = organizer(&db).organize_document(document_id).unwrap();
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].total_chunks, 2);
        assert_eq!(modules[1].total_chunks, 2);
        assert_eq!(modules[0].module_order, 1);
        assert_eq!(modules[1].module_order, 2);

        // Assignments persisted with the split
        let first = db.list_module_chunks(modules[0].id).unwrap();
        assert_eq!(first.iter().map(|c| c.position).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn chunk_cap_closes_a_module() {
        let db = Database::in_memory().unwrap();
        // All chunks identical in direction; only the cap can split them
        let entries: Vec<(&str, Vec<f32>)> = (0..7)
            .map(|_| ("Same topic throughout the document.", vec![1.0, 0.0]))
            .collect();
        let document_id = seed_chunks(&db, &entries);

        let modules = organizer(&db).organize_document(document_id).unwrap();
        assert_eq!(modules.len(), 3, "7 chunks under cap 3 split 3+3+1");
        assert!(modules.iter().all(|m| m.total_chunks <= 3));
        assert!(modules.iter().all(|m| m.total_chunks >= 1));
    }

    #[test]
    fn organization_is_stable_across_reruns() {
        let db = Database::in_memory().unwrap();
        let document_id = seed_chunks(
            &db,
            &[
                ("First topic sentence here.", vec![1.0, 0.0]),
                ("Still the first topic.", vec![0.95, 0.05]),
                ("A wholly different subject.", vec![0.0, 1.0]),
            ],
        );

        let org = organizer(&db);
        let first_pass = org.organize_document(document_id).unwrap();
        let second_pass = org.organize_document(document_id).unwrap();

        assert_eq!(first_pass.len(), second_pass.len());
        for (a, b) in first_pass.iter().zip(second_pass.iter()) {
            assert_eq!(a.title, b.title);
            assert_eq!(a.total_chunks, b.total_chunks);
            assert_eq!(a.module_order, b.module_order);
        }
        // Re-running replaced modules rather than accumulating them
        assert_eq!(db.list_modules(document_id).unwrap().len(), second_pass.len());
    }

    #[test]
    fn module_with_unembedded_chunk_is_not_ready() {
        let db = Database::in_memory().unwrap();
        let document_id = seed_chunks(
            &db,
            &[
                ("Embedded chunk content.", vec![1.0, 0.0]),
                ("Never embedded chunk.", vec![]),
            ],
        );

        let modules = organizer(&db).organize_document(document_id).unwrap();
        assert_eq!(modules.len(), 1);
        assert!(!modules[0].ready_for_quiz);
    }

    #[test]
    fn heading_like_first_line_becomes_the_title() {
        let db = Database::in_memory().unwrap();
        let document_id = seed_chunks(
            &db,
            &[(
                "Photosynthesis Basics\nPlants convert light into chemical energy.",
                vec![1.0, 0.0],
            )],
        );

        let modules = organizer(&db).organize_document(document_id).unwrap();
        assert_eq!(modules[0].title, "Photosynthesis Basics");
        assert!(modules[0].summary.starts_with("Photosynthesis Basics"));
    }

    #[test]
    fn plain_prose_falls_back_to_numbered_title() {
        let db = Database::in_memory().unwrap();
        let document_id = seed_chunks(
            &db,
            &[(
                "The mitochondrion is the powerhouse of the cell and produces ATP through oxidative phosphorylation.",
                vec![1.0, 0.0],
            )],
        );

        let modules = organizer(&db).organize_document(document_id).unwrap();
        assert_eq!(modules[0].title, "Module 1");
    }
}
