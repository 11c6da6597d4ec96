//! Content summary and key helpers

use sha2::{Digest, Sha256};

/// Character budget for key-store content summaries.
pub const SUMMARY_MAX_CHARS: usize = 200;

/// Truncate content to a key-store summary on a char boundary, appending an
/// ellipsis when anything was dropped.
pub fn content_summary(content: &str) -> String {
    summarize(content, SUMMARY_MAX_CHARS)
}

/// Truncate to `max_chars` characters on a char boundary.
pub fn summarize(content: &str, max_chars: usize) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(max_chars).collect();
    format!("{head}…")
}

/// Kebab-case slug for natural keys derived from display names.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Short hex digest of content, used for idempotent derived keys.
pub fn content_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}
