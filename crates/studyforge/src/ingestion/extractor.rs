//! Multi-format content extraction.
//!
//! Pure and stateless: bytes plus a declared format in, ordered text
//! segments out. Failures here are fatal for the document, split into
//! `UnsupportedFormat` (we do not handle this type) and `CorruptInput`
//! (we should have been able to, but the bytes are unreadable).

use std::io::Read;

use pulldown_cmark::{Event, Parser};

use crate::error::{Error, Result};
use crate::types::{ExtractedDocument, SourceFormat};

/// Multi-format extractor
pub struct ContentExtractor;

impl ContentExtractor {
    /// Extract plain text from raw bytes of the given format
    pub fn extract(format: SourceFormat, data: &[u8]) -> Result<ExtractedDocument> {
        if data.is_empty() {
            return Err(Error::corrupt_input("Uploaded file is empty"));
        }

        match format {
            SourceFormat::Pdf => Self::extract_pdf(data),
            SourceFormat::Docx => Self::extract_docx(data),
            SourceFormat::Txt => Self::extract_text(data),
            SourceFormat::Markdown => Self::extract_markdown(data),
            SourceFormat::Unknown => Err(Error::unsupported_format(
                "File type not supported; accepted formats are pdf, docx, txt, and markdown",
            )),
        }
    }

    /// PDF extraction via pdf-extract, falling back to a raw lopdf content
    /// stream scan when the primary path fails on unusual fonts.
    fn extract_pdf(data: &[u8]) -> Result<ExtractedDocument> {
        let raw = match pdf_extract::extract_text_from_mem(data) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("pdf-extract failed: {}, trying content stream fallback", e);
                Self::extract_pdf_fallback(data)?
            }
        };

        let content = normalize_text(&raw);
        if content.trim().is_empty() {
            return Err(Error::corrupt_input(
                "No text could be extracted from PDF; it may be image-based or encrypted",
            ));
        }

        let total_pages = match lopdf::Document::load_mem(data) {
            Ok(doc) => doc.get_pages().len().max(1) as u32,
            Err(_) => 1,
        };

        // pdf-extract returns the document as one undifferentiated stream,
        // so page markers collapse to a single segment.
        let mut extracted = ExtractedDocument::single(content);
        extracted.total_pages = total_pages;
        Ok(extracted)
    }

    /// Scan text-show operators straight from the content streams. Produces
    /// rough output but rescues PDFs that pdf-extract cannot load.
    fn extract_pdf_fallback(data: &[u8]) -> Result<String> {
        let doc = lopdf::Document::load_mem(data)
            .map_err(|e| Error::corrupt_input(format!("Failed to load PDF: {}", e)))?;

        let mut all_text = String::new();
        for (_page_num, page_id) in doc.get_pages() {
            if let Ok(content) = doc.get_page_content(page_id) {
                let text = scan_content_stream(&content);
                if !text.is_empty() {
                    all_text.push_str(&text);
                    all_text.push('\n');
                }
            }
        }

        if all_text.trim().is_empty() {
            return Err(Error::corrupt_input(
                "PDF has no extractable text; it may be image-based or encrypted",
            ));
        }
        Ok(all_text)
    }

    /// DOCX extraction via docx-rs, with a raw zip + XML scan fallback for
    /// files that docx-rs rejects but standard tools still open.
    fn extract_docx(data: &[u8]) -> Result<ExtractedDocument> {
        let content = match docx_rs::read_docx(data) {
            Ok(doc) => {
                let mut text = String::new();
                for child in doc.document.children {
                    if let docx_rs::DocumentChild::Paragraph(p) = child {
                        for child in p.children {
                            if let docx_rs::ParagraphChild::Run(run) = child {
                                for child in run.children {
                                    if let docx_rs::RunChild::Text(t) = child {
                                        text.push_str(&t.text);
                                    }
                                }
                            }
                        }
                        text.push('\n');
                    }
                }
                text
            }
            Err(e) => {
                tracing::warn!("docx-rs failed: {}, trying raw XML fallback", e);
                Self::extract_docx_fallback(data)?
            }
        };

        let content = normalize_text(&content);
        if content.trim().is_empty() {
            return Err(Error::corrupt_input("DOCX contains no extractable text"));
        }
        Ok(ExtractedDocument::single(content))
    }

    /// Unzip word/document.xml and collect the text nodes
    fn extract_docx_fallback(data: &[u8]) -> Result<String> {
        let cursor = std::io::Cursor::new(data);
        let mut archive = zip::ZipArchive::new(cursor)
            .map_err(|e| Error::corrupt_input(format!("Failed to open DOCX archive: {}", e)))?;

        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .map_err(|e| Error::corrupt_input(format!("DOCX missing document.xml: {}", e)))?
            .read_to_string(&mut xml)
            .map_err(|e| Error::corrupt_input(format!("Failed to read document.xml: {}", e)))?;

        Ok(extract_docx_xml_text(&xml))
    }

    /// Plain text: lossy UTF-8, accepted as-is
    fn extract_text(data: &[u8]) -> Result<ExtractedDocument> {
        let content = String::from_utf8_lossy(data).to_string();
        if content.trim().is_empty() {
            return Err(Error::corrupt_input("Text file contains no content"));
        }
        Ok(ExtractedDocument::single(content))
    }

    /// Markdown: strip formatting down to the readable text
    fn extract_markdown(data: &[u8]) -> Result<ExtractedDocument> {
        let source = String::from_utf8_lossy(data);
        let mut content = String::new();

        for event in Parser::new(&source) {
            match event {
                Event::Text(text) | Event::Code(text) => content.push_str(&text),
                Event::SoftBreak | Event::HardBreak => content.push(' '),
                Event::End(_) => {
                    if !content.ends_with('\n') {
                        content.push('\n');
                    }
                }
                _ => {}
            }
        }

        let content = normalize_text(&content);
        if content.trim().is_empty() {
            return Err(Error::corrupt_input("Markdown file contains no content"));
        }
        Ok(ExtractedDocument::single(content))
    }
}

/// Strip null bytes and collapse blank-heavy extractor output
fn normalize_text(text: &str) -> String {
    text.replace('\0', "")
        .lines()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Pull text between BT/ET blocks out of a PDF content stream
fn scan_content_stream(content: &[u8]) -> String {
    let content_str = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut in_text_block = false;

    for line in content_str.lines() {
        let line = line.trim();
        if line == "BT" {
            in_text_block = true;
            continue;
        }
        if line == "ET" {
            in_text_block = false;
            if !text.ends_with(' ') {
                text.push(' ');
            }
            continue;
        }
        if in_text_block && (line.ends_with("Tj") || line.ends_with("TJ")) {
            if let (Some(start), Some(end)) = (line.find('('), line.rfind(')')) {
                if start < end {
                    let extracted = &line[start + 1..end];
                    let decoded = extracted
                        .replace("\\n", "\n")
                        .replace("\\r", "\r")
                        .replace("\\t", "\t")
                        .replace("\\(", "(")
                        .replace("\\)", ")")
                        .replace("\\\\", "\\");
                    text.push_str(&decoded);
                }
            }
        }
    }

    text
}

/// Collect the contents of <w:t> elements from WordprocessingML
fn extract_docx_xml_text(xml: &str) -> String {
    use quick_xml::events::Event as XmlEvent;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut in_text_node = false;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(ref e)) if e.local_name().as_ref() == b"t" => {
                in_text_node = true;
            }
            Ok(XmlEvent::End(ref e)) if e.local_name().as_ref() == b"t" => {
                in_text_node = false;
            }
            Ok(XmlEvent::End(ref e)) if e.local_name().as_ref() == b"p" => {
                text.push('\n');
            }
            Ok(XmlEvent::Text(e)) if in_text_node => {
                if let Ok(t) = e.unescape() {
                    text.push_str(&t);
                }
            }
            Ok(XmlEvent::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txt_round_trips_content() {
        let extracted =
            ContentExtractor::extract(SourceFormat::Txt, b"Photosynthesis converts light.").unwrap();
        assert_eq!(extracted.content, "Photosynthesis converts light.");
        assert_eq!(extracted.total_pages, 1);
        assert_eq!(extracted.pages.len(), 1);
        assert_eq!(extracted.pages[0].page_number, 1);
        assert_eq!(extracted.pages[0].char_offset, 0);
    }

    #[test]
    fn markdown_strips_formatting() {
        let md = b"# Cell Biology\n\nThe **mitochondria** is the `powerhouse` of the cell.\n";
        let extracted = ContentExtractor::extract(SourceFormat::Markdown, md).unwrap();
        assert!(extracted.content.contains("Cell Biology"));
        assert!(extracted.content.contains("mitochondria"));
        assert!(extracted.content.contains("powerhouse"));
        assert!(!extracted.content.contains('#'));
        assert!(!extracted.content.contains("**"));
    }

    #[test]
    fn unknown_format_is_unsupported() {
        let err = ContentExtractor::extract(SourceFormat::Unknown, b"anything").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
        assert!(err.is_fatal_for_document());
    }

    #[test]
    fn corrupt_pdf_is_fatal() {
        let err = ContentExtractor::extract(SourceFormat::Pdf, b"not a pdf at all").unwrap_err();
        assert!(matches!(err, Error::CorruptInput(_)));
        assert!(err.is_fatal_for_document());
    }

    #[test]
    fn empty_input_is_corrupt() {
        let err = ContentExtractor::extract(SourceFormat::Txt, b"").unwrap_err();
        assert!(matches!(err, Error::CorruptInput(_)));
    }

    #[test]
    fn whitespace_only_text_is_corrupt() {
        let err = ContentExtractor::extract(SourceFormat::Txt, b"   \n\t  \n").unwrap_err();
        assert!(matches!(err, Error::CorruptInput(_)));
    }

    #[test]
    fn lossy_utf8_does_not_fail() {
        let mut data = b"Valid prefix ".to_vec();
        data.push(0xFF);
        data.extend_from_slice(b" valid suffix");
        let extracted = ContentExtractor::extract(SourceFormat::Txt, &data).unwrap();
        assert!(extracted.content.contains("Valid prefix"));
        assert!(extracted.content.contains("valid suffix"));
    }

    #[test]
    fn docx_xml_fallback_collects_text_nodes() {
        let xml = r#"<?xml version="1.0"?>
            <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
              <w:body>
                <w:p><w:r><w:t>First paragraph.</w:t></w:r></w:p>
                <w:p><w:r><w:t>Second paragraph.</w:t></w:r></w:p>
              </w:body>
            </w:document>"#;
        let text = extract_docx_xml_text(xml);
        assert!(text.contains("First paragraph."));
        assert!(text.contains("Second paragraph."));
    }
}
