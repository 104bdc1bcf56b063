//! Best-effort JSON extraction from free-form LLM output.
//!
//! Models wrap their JSON in prose, markdown fences, or both. The helpers
//! here scan for the first balanced `{…}` (or `[…]`) block that parses,
//! then deserialize it into the caller's type. Every failure is reported
//! as an [`ExtractError`] so the drafting, editing, and topic stages share
//! one failure path.

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::utils::looks_truncated;

/// Why a response could not be turned into a value.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("response was empty")]
    Empty,
    #[error("no JSON {0} found in response")]
    NotFound(&'static str),
    #[error("JSON block was cut off before it closed")]
    Truncated,
    #[error("JSON block did not match the expected shape: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("required field `{0}` is missing or empty")]
    MissingField(&'static str),
}

/// Extract the first well-formed JSON object from `text` and deserialize it.
pub fn extract_object<T: DeserializeOwned>(text: &str) -> Result<T, ExtractError> {
    extract_block(text, '{', '}', "object")
}

/// Extract the first well-formed JSON array from `text` and deserialize it.
pub fn extract_array<T: DeserializeOwned>(text: &str) -> Result<Vec<T>, ExtractError> {
    extract_block(text, '[', ']', "array")
}

/// Fail with [`ExtractError::MissingField`] when `value` is blank.
pub fn require_non_empty(value: &str, field: &'static str) -> Result<(), ExtractError> {
    if value.trim().is_empty() {
        Err(ExtractError::MissingField(field))
    } else {
        Ok(())
    }
}

fn extract_block<T: DeserializeOwned>(
    text: &str,
    open: char,
    close: char,
    kind: &'static str,
) -> Result<T, ExtractError> {
    if text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }

    let mut first_error: Option<serde_json::Error> = None;
    let mut saw_unclosed = false;

    for (start, _) in text.match_indices(open) {
        match balanced_end(&text[start..], open, close) {
            Some(len) => {
                let candidate = &text[start..start + len];
                match serde_json::from_str::<serde_json::Value>(candidate) {
                    Ok(value) => return serde_json::from_value(value).map_err(ExtractError::from),
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
            None => saw_unclosed = true,
        }
    }

    match first_error {
        Some(e) if looks_truncated(&e) => Err(ExtractError::Truncated),
        Some(e) => Err(ExtractError::Malformed(e)),
        None if saw_unclosed => Err(ExtractError::Truncated),
        None => Err(ExtractError::NotFound(kind)),
    }
}

/// Byte length of the balanced block starting at `s[0]`, honouring JSON
/// string literals and escapes.
fn balanced_end(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i + c.len_utf8());
            }
        }
    }
    None
}
