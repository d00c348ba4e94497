//! Parsing of structured payloads returned by the generation capability.
//!
//! Local models wrap JSON in markdown fences or surround it with prose more
//! often than not, so parsing strips fences first and falls back to locating
//! the outermost JSON value in the raw text.

use regex::Regex;

use crate::error::{Error, Result};
use crate::types::{FeedbackContent, GeneratedQuestion};

/// Parse a generated question list from raw model output
pub fn parse_question_payload(raw: &str) -> Result<Vec<GeneratedQuestion>> {
    let cleaned = strip_code_fences(raw);
    if let Ok(questions) = serde_json::from_str::<Vec<GeneratedQuestion>>(&cleaned) {
        return Ok(questions);
    }

    let slice = extract_json_slice(&cleaned, '[', ']')
        .ok_or_else(|| Error::schema_validation("Response contains no JSON array"))?;
    serde_json::from_str(slice)
        .map_err(|e| Error::schema_validation(format!("Malformed question payload: {}", e)))
}

/// Parse a feedback report body from raw model output
pub fn parse_feedback_payload(raw: &str) -> Result<FeedbackContent> {
    let cleaned = strip_code_fences(raw);
    if let Ok(content) = serde_json::from_str::<FeedbackContent>(&cleaned) {
        return Ok(content);
    }

    let slice = extract_json_slice(&cleaned, '{', '}')
        .ok_or_else(|| Error::schema_validation("Response contains no JSON object"))?;
    serde_json::from_str(slice)
        .map_err(|e| Error::schema_validation(format!("Malformed feedback payload: {}", e)))
}

/// Strip a surrounding markdown code fence, tolerating a language tag
fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let fence = Regex::new(r"(?s)^```[a-zA-Z]*\s*\n?(.*?)\n?```\s*$").expect("Invalid regex");
    match fence.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => {
            // Unterminated fence; drop the opening line and keep the rest
            trimmed
                .lines()
                .skip(1)
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        }
    }
}

/// Locate the outermost `open`..`close` span in text that mixes prose
/// with a JSON value
fn extract_json_slice(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}
