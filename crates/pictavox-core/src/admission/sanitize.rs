//! Prompt validation and cleaning.

use crate::error::{Error, Result};

/// Longest accepted prompt, counted in characters after cleaning.
pub const MAX_PROMPT_CHARS: usize = 500;

/// Characters removed from every prompt before validation.
const STRIPPED_CHARS: &[char] = &['<', '>', '"', '\''];

/// Substrings that reject a prompt outright (matched case-insensitively).
const FORBIDDEN_PATTERNS: &[&str] = &[
    "system:",
    "exec",
    "eval",
    "import",
    "os.",
    "subprocess",
    "file://",
    "http://",
    "https://",
    "ftp://",
];

/// Clean a free-text prompt and reject anything unsafe or oversized.
///
/// Angle brackets and quotes are stripped first, the result is trimmed, and
/// only then are the length and pattern checks applied.
pub fn sanitize_prompt(prompt: &str) -> Result<String> {
    if prompt.trim().is_empty() {
        return Err(Error::Validation("Prompt must not be empty".to_string()));
    }

    let cleaned: String = prompt
        .chars()
        .filter(|c| !STRIPPED_CHARS.contains(c))
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err(Error::Validation("Prompt must not be empty".to_string()));
    }

    let length = cleaned.chars().count();
    if length > MAX_PROMPT_CHARS {
        return Err(Error::Validation(format!(
            "Prompt too long: {length} characters (max {MAX_PROMPT_CHARS})"
        )));
    }

    let lowered = cleaned.to_lowercase();
    if let Some(pattern) = FORBIDDEN_PATTERNS.iter().find(|p| lowered.contains(**p)) {
        return Err(Error::Validation(format!(
            "Prompt contains a forbidden pattern: {pattern}"
        )));
    }

    Ok(cleaned.to_string())
}
