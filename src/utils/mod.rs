//! Common utilities and helper functions

pub mod retry;

use sha2::{Digest, Sha256};

/// Truncate post text to a maximum character count
///
/// Counts characters, not bytes, so multi-byte scripts are never cut mid
/// character. Text within the limit is returned unchanged; longer text is
/// cut to `max_chars - 1` and gets a trailing ellipsis.
pub fn truncate_post(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut truncated: String = text.chars().take(max_chars - 1).collect();
    truncated.push('\u{2026}');
    truncated
}

/// SHA-256 hex digest of post content, used for deduplication
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
