//! Utility functions for string manipulation, markup handling, and file system checks.
//!
//! This module provides helper functions used throughout the pipeline:
//! - String truncation for logging and for bounded snippets
//! - Slug and title normalisation for storage keys and duplicate checks
//! - Markup stripping for feed descriptions
//! - JSON error detection for handling truncated LLM responses
//! - File system validation for the data directory

use scraper::Html;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};

use crate::BoxError;

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to roughly `max` bytes (never splitting a
/// character) with an ellipsis and byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log("a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Keep at most `max` characters of `s`, appending `...` when something was cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max).collect();
    format!("{}...", kept.trim_end())
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// When the LLM response is cut off (e.g., due to token limits), the
/// resulting JSON will fail to parse with an EOF error.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Convert a title to a URL-friendly slug.
///
/// Lowercases the text, drops anything that is not alphanumeric, and joins
/// the remaining words with single hyphens.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(slugify_title("Hello World"), "hello-world");
/// assert_eq!(slugify_title("Test-Article!"), "test-article");
/// ```
pub fn slugify_title(title: &str) -> String {
    title
        .to_lowercase()
        .replace(|c: char| !c.is_alphanumeric() && c != ' ' && c != '-', "")
        .split(|c: char| c == ' ' || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Normalise a title for equality checks: case-folded, punctuation removed,
/// whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip markup and decode entities, returning whitespace-collapsed text.
///
/// CDATA wrappers are removed before the fragment is parsed so the HTML
/// they usually carry is stripped too.
pub fn strip_markup(raw: &str) -> String {
    let unwrapped = raw
        .trim()
        .trim_start_matches("<![CDATA[")
        .trim_end_matches("]]>");
    // Feeds frequently double-encode the HTML inside <description>.
    let decoded = fragment_text(unwrapped);
    let text = if decoded.contains('<') && decoded.contains('>') {
        fragment_text(&decoded)
    } else {
        decoded
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fragment_text(raw: &str) -> String {
    let fragment = Html::parse_fragment(raw);
    fragment.root_element().text().collect::<Vec<_>>().join(" ")
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then performs a write test by
/// creating and immediately deleting a probe file.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or is not writable.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), BoxError> {
    fs::create_dir_all(path).await?;
    let probe_path = format!("{}/..__probe_write__", path.trim_end_matches('/'));
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Data directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_multibyte_boundary() {
        let s = "é".repeat(10);
        let result = truncate_for_log(&s, 5);
        assert!(result.starts_with("éé"));
        assert!(result.contains("bytes)"));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdefghij", 4), "abcd...");
    }

    #[test]
    fn test_slugify_title() {
        assert_eq!(slugify_title("Hello World"), "hello-world");
        assert_eq!(slugify_title("Test-Article!"), "test-article");
        assert_eq!(slugify_title("Multiple   Spaces"), "multiple-spaces");
        assert_eq!(slugify_title("Special@#$Characters"), "specialcharacters");
        assert_eq!(
            slugify_title("Trump-Xi 'situationship'"),
            "trump-xi-situationship"
        );
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(
            normalize_title("  Markets Rally,  Again! "),
            "markets rally again"
        );
        assert_eq!(normalize_title("MARKETS rally again"), "markets rally again");
    }

    #[test]
    fn test_strip_markup_plain_html() {
        assert_eq!(
            strip_markup("<p>Rates <b>rise</b> &amp; stocks fall</p>"),
            "Rates rise & stocks fall"
        );
    }

    #[test]
    fn test_strip_markup_cdata_and_encoded_html() {
        assert_eq!(
            strip_markup("<![CDATA[<div>Budget talks <i>stall</i></div>]]>"),
            "Budget talks stall"
        );
        assert_eq!(
            strip_markup("&lt;p&gt;Encoded &amp;quot;twice&amp;quot;&lt;/p&gt;"),
            "Encoded \"twice\""
        );
    }

    #[test]
    fn test_looks_truncated() {
        let json_eof = r#"{"field": "value"#;
        let result: Result<serde_json::Value, _> = serde_json::from_str(json_eof);
        let e = result.unwrap_err();
        assert!(looks_truncated(&e));
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        ensure_writable_dir(nested.to_str().unwrap()).await.unwrap();
        assert!(nested.is_dir());
    }
}
