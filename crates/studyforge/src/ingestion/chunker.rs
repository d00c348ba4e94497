//! Deterministic text chunking with sentence-aware boundaries.
//!
//! Re-running the chunker on identical text and configuration yields
//! identical chunks, which is what makes re-entering the chunking stage
//! after a crash safe.

use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::types::{Chunk, ExtractedDocument};

/// Splits extracted text into bounded, overlapping chunks
pub struct TextChunker {
    /// Hard upper bound on chunk size in bytes
    chunk_size: usize,
    /// Bytes of trailing context carried into the next chunk
    overlap: usize,
    /// Preferred minimum; a short tail merges into the previous chunk
    min_size: usize,
    /// Accumulate whole sentences rather than words
    respect_sentences: bool,
}

impl TextChunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            overlap: config.chunk_overlap.min(config.chunk_size / 2),
            min_size: config.min_chunk_size,
            respect_sentences: config.respect_sentences,
        }
    }

    /// Chunk an extracted document. Pages are chunked independently, so no
    /// chunk ever spans a page boundary; positions stay dense across pages.
    pub fn chunk_document(&self, document_id: Uuid, extracted: &ExtractedDocument) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        if extracted.pages.len() > 1 {
            for page in &extracted.pages {
                let page_chunks = self.chunk_text(
                    document_id,
                    &page.content,
                    page.char_offset,
                    chunks.len() as u32,
                );
                chunks.extend(page_chunks);
            }
        } else {
            chunks = self.chunk_text(document_id, &extracted.content, 0, 0);
        }
        chunks
    }

    fn chunk_text(
        &self,
        document_id: Uuid,
        text: &str,
        base_offset: usize,
        start_position: u32,
    ) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut position = start_position;
        let mut current = String::new();
        let mut current_start = 0usize;
        let mut char_pos = 0usize;

        let units: Vec<&str> = if self.respect_sentences {
            text.split_sentence_bounds().collect()
        } else {
            text.split_word_bounds().collect()
        };

        for unit in units {
            for piece in split_oversized(unit, self.chunk_size) {
                if !current.is_empty() && current.len() + piece.len() > self.chunk_size {
                    if !current.trim().is_empty() {
                        chunks.push(Chunk::new(
                            document_id,
                            current.trim().to_string(),
                            position,
                            base_offset + current_start,
                            base_offset + char_pos,
                        ));
                        position += 1;
                    }

                    let overlap_text = self.overlap_text(&current);
                    current_start = char_pos.saturating_sub(overlap_text.len());
                    current = overlap_text;
                }
                current.push_str(piece);
                char_pos += piece.len();
            }
        }

        // Tail: emit when it stands on its own, otherwise fold it into the
        // previous chunk rather than dropping text.
        let tail = current.trim();
        if !tail.is_empty() {
            if tail.len() >= self.min_size || chunks.is_empty() {
                chunks.push(Chunk::new(
                    document_id,
                    tail.to_string(),
                    position,
                    base_offset + current_start,
                    base_offset + char_pos,
                ));
            } else if let Some(last) = chunks.last_mut() {
                last.content.push(' ');
                last.content.push_str(tail);
                last.char_end = base_offset + char_pos;
            }
        }

        chunks
    }

    /// Trailing overlap seed for the next chunk, preferring to begin at a
    /// sentence boundary, then a word boundary
    fn overlap_text(&self, text: &str) -> String {
        if self.overlap == 0 {
            return String::new();
        }
        if text.len() <= self.overlap {
            return text.to_string();
        }

        let mut start = text.len() - self.overlap;
        while start > 0 && !text.is_char_boundary(start) {
            start -= 1;
        }
        let tail = &text[start..];

        if let Some(pos) = tail.find(". ") {
            return tail[pos + 2..].to_string();
        }
        if let Some(pos) = tail.find(' ') {
            return tail[pos + 1..].to_string();
        }
        tail.to_string()
    }
}

/// Split a unit that alone exceeds the bound into pieces that fit,
/// breaking at char boundaries
fn split_oversized(unit: &str, chunk_size: usize) -> Vec<&str> {
    if unit.len() <= chunk_size {
        return vec![unit];
    }

    let mut pieces = Vec::new();
    let mut rest = unit;
    while rest.len() > chunk_size {
        let mut cut = chunk_size;
        while cut > 0 && !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            break;
        }
        pieces.push(&rest[..cut]);
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        pieces.push(rest);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageContent;

    fn config(chunk_size: usize, overlap: usize, min: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            chunk_overlap: overlap,
            min_chunk_size: min,
            respect_sentences: true,
        }
    }

    fn long_text(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("Sentence number {} talks about cell biology in detail. ", i))
            .collect()
    }

    #[test]
    fn chunking_is_deterministic() {
        let chunker = TextChunker::new(&config(200, 40, 50));
        let doc_id = Uuid::new_v4();
        let extracted = ExtractedDocument::single(long_text(30));

        let first = chunker.chunk_document(doc_id, &extracted);
        let second = chunker.chunk_document(doc_id, &extracted);

        assert!(first.len() > 1);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.content, b.content);
            assert_eq!(a.position, b.position);
            assert_eq!(a.char_start, b.char_start);
            assert_eq!(a.char_end, b.char_end);
        }
    }

    #[test]
    fn chunks_respect_the_size_bound() {
        let chunker = TextChunker::new(&config(200, 40, 50));
        let chunks = chunker.chunk_document(
            Uuid::new_v4(),
            &ExtractedDocument::single(long_text(40)),
        );

        // The tail merge may push only the final chunk past the bound,
        // and never by more than the preferred minimum.
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.content.len() <= 200, "chunk too big: {}", chunk.content.len());
        }
        assert!(chunks.last().unwrap().content.len() <= 200 + 50);
    }

    #[test]
    fn positions_are_dense_and_ranges_monotonic() {
        let chunker = TextChunker::new(&config(150, 30, 40));
        let chunks = chunker.chunk_document(
            Uuid::new_v4(),
            &ExtractedDocument::single(long_text(25)),
        );

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.position, i as u32);
            assert!(chunk.char_start < chunk.char_end);
            if i > 0 {
                assert!(chunk.char_start >= chunks[i - 1].char_start);
            }
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let chunker = TextChunker::new(&config(200, 60, 50));
        let chunks = chunker.chunk_document(
            Uuid::new_v4(),
            &ExtractedDocument::single(long_text(30)),
        );
        assert!(chunks.len() >= 2);

        // The second chunk opens with text already seen at the end of the first
        let head: String = chunks[1].content.chars().take(20).collect();
        assert!(
            chunks[0].content.contains(head.trim()),
            "no shared context between consecutive chunks"
        );
    }

    #[test]
    fn tiny_document_yields_one_chunk() {
        let chunker = TextChunker::new(&config(1024, 200, 100));
        let chunks = chunker.chunk_document(
            Uuid::new_v4(),
            &ExtractedDocument::single("Short note.".to_string()),
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Short note.");
        assert_eq!(chunks[0].position, 0);
    }

    #[test]
    fn short_tail_merges_into_previous_chunk() {
        let chunker = TextChunker::new(&config(100, 0, 60));
        let text = format!("{} End.", "This sentence fills most of the chunk window now. ".repeat(2));
        let chunks = chunker.chunk_document(Uuid::new_v4(), &ExtractedDocument::single(text));

        assert!(!chunks.is_empty());
        assert!(
            chunks.last().unwrap().content.ends_with("End."),
            "tail text was dropped"
        );
    }

    #[test]
    fn oversized_sentence_is_hard_split() {
        let chunker = TextChunker::new(&config(100, 0, 20));
        let giant = "x".repeat(350);
        let chunks = chunker.chunk_document(Uuid::new_v4(), &ExtractedDocument::single(giant));

        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.content.len() <= 120);
        }
        let total: usize = chunks.iter().map(|c| c.content.len()).sum();
        assert_eq!(total, 350);
    }

    #[test]
    fn chunks_never_span_pages() {
        let chunker = TextChunker::new(&config(500, 50, 40));
        let page1 = long_text(4);
        let page2 = long_text(4);
        let extracted = ExtractedDocument {
            content: format!("{}{}", page1, page2),
            total_pages: 2,
            pages: vec![
                PageContent {
                    page_number: 1,
                    content: page1.clone(),
                    char_offset: 0,
                },
                PageContent {
                    page_number: 2,
                    content: page2,
                    char_offset: page1.len(),
                },
            ],
        };

        let chunks = chunker.chunk_document(Uuid::new_v4(), &extracted);
        assert!(chunks.len() >= 2);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.position, i as u32);
            // Each chunk sits entirely within one page
            let in_page1 = chunk.char_end <= page1.len();
            let in_page2 = chunk.char_start >= page1.len();
            assert!(in_page1 || in_page2, "chunk straddles the page boundary");
        }
    }

    #[test]
    fn word_mode_still_bounds_chunks() {
        let mut cfg = config(80, 10, 20);
        cfg.respect_sentences = false;
        let chunker = TextChunker::new(&cfg);
        let chunks = chunker.chunk_document(
            Uuid::new_v4(),
            &ExtractedDocument::single("word ".repeat(100)),
        );
        assert!(chunks.len() > 1);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.content.len() <= 80);
        }
    }
}
