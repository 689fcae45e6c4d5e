//! Text preprocessing for embedding and cache lookups.
//!
//! Two jobs:
//! 1. Build the text for a candidate record (title, description, category,
//!    location joined). Keyword scoring sees all of it; only the copy sent to
//!    the embedding provider is truncated.
//! 2. Normalize any text into the cache key used by the embedding cache

/// Maximum content length for embedding input (characters, not tokens)
const MAX_CONTENT_LENGTH: usize = 512;

/// Ellipsis suffix when content is truncated
const TRUNCATION_SUFFIX: &str = "...";

/// Text embedded for a record that carries no text at all.
pub const EMPTY_RECORD_TEXT: &str = "item";

/// Join a record's text fields, untruncated.
///
/// Non-empty fields are trimmed and joined with single spaces in the order
/// given. A record with no text at all becomes [`EMPTY_RECORD_TEXT`] so it
/// still gets a (meaningless but valid) vector.
pub fn join_record_fields(fields: &[&str]) -> String {
    let content = fields
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if content.is_empty() {
        return EMPTY_RECORD_TEXT.to_string();
    }
    content
}

/// Compose the embedding input for a record from its text fields.
pub fn compose_record_text(fields: &[&str]) -> String {
    embedding_input(&join_record_fields(fields))
}

/// Truncate text to MAX_CONTENT_LENGTH characters for the embedding
/// provider, adding an ellipsis if truncated.
pub fn embedding_input(content: &str) -> String {
    if content.chars().count() <= MAX_CONTENT_LENGTH {
        return content.to_string();
    }

    let max_chars = MAX_CONTENT_LENGTH - TRUNCATION_SUFFIX.len();
    let truncated: String = content.chars().take(max_chars).collect();

    format!("{}{}", truncated.trim_end(), TRUNCATION_SUFFIX)
}

/// Normalize text into a cache key: case-folded, trimmed, with runs of
/// whitespace collapsed to a single space.
///
/// `"Black Bag"`, `" black   bag "` and `"BLACK\tBAG"` all map to `"black bag"`.
pub fn normalize_key(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize a category label for equality comparison.
///
/// Same rules as [`normalize_key`]; kept separate so the two can diverge.
pub fn normalize_category(label: &str) -> String {
    normalize_key(label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_record_uses_placeholder() {
        assert_eq!(compose_record_text(&["", "", "", ""]), "item");
        assert_eq!(compose_record_text(&["   ", "\n\t", "", " "]), "item");
    }

    #[test]
    fn test_fields_joined_in_order() {
        let text = compose_record_text(&["Black Bag", "leather strap", "accessories", "Library"]);
        assert_eq!(text, "Black Bag leather strap accessories Library");
    }

    #[test]
    fn test_skips_empty_fields() {
        let text = compose_record_text(&["  Wallet ", "", "accessories", ""]);
        assert_eq!(text, "Wallet accessories");
    }

    #[test]
    fn test_truncation() {
        let long_content = "x".repeat(600);
        let content = compose_record_text(&[&long_content]);

        assert!(content.chars().count() <= MAX_CONTENT_LENGTH);
        assert!(content.ends_with(TRUNCATION_SUFFIX));
    }

    #[test]
    fn test_joined_fields_keep_full_length() {
        let long_content = format!("{} wallet", "x".repeat(600));
        let joined = join_record_fields(&[&long_content, "accessories"]);

        assert!(joined.ends_with("wallet accessories"));
        assert!(!compose_record_text(&[&long_content]).contains("wallet"));
    }

    #[test]
    fn test_short_text_passes_through() {
        assert_eq!(embedding_input("Black Bag"), "Black Bag");
    }

    #[test]
    fn test_truncation_respects_utf8() {
        let long_content = "é".repeat(600);
        let content = compose_record_text(&[&long_content]);
        assert_eq!(content.chars().count(), MAX_CONTENT_LENGTH);
    }

    #[test]
    fn test_normalize_key_collapses_whitespace_and_case() {
        assert_eq!(normalize_key("Black Bag"), "black bag");
        assert_eq!(normalize_key("  black   bag  "), "black bag");
        assert_eq!(normalize_key("BLACK\tBAG\n"), "black bag");
    }

    #[test]
    fn test_normalize_key_is_idempotent() {
        let once = normalize_key("  Lost   Keys On\tBus ");
        assert_eq!(normalize_key(&once), once);
    }

    #[test]
    fn test_normalize_key_empty() {
        assert_eq!(normalize_key(""), "");
        assert_eq!(normalize_key("   "), "");
    }
}
