//! Read-time message compression
//!
//! Long assistant turns are replaced by head + tail substrings around an
//! embedded lookup hint of the form `[REM LOOKUP session-{id}-msg-{index}]`.
//! An agent that needs the full text issues that LOOKUP. System and user
//! messages are never compressed.

use rem_core::MessageRole;

/// Compresses and recognizes compressed message content.
#[derive(Debug, Clone)]
pub struct MessageCompressor {
    /// Characters kept from each end.
    pub truncate_length: usize,
    /// Content at or below this length is left alone.
    pub min_length_for_compression: usize,
}

impl Default for MessageCompressor {
    fn default() -> Self {
        Self::new(200)
    }
}

impl MessageCompressor {
    pub fn new(truncate_length: usize) -> Self {
        Self {
            truncate_length,
            min_length_for_compression: truncate_length * 2,
        }
    }

    /// Whether a turn of this role and content qualifies for compression.
    pub fn should_compress(&self, role: MessageRole, content: &str) -> bool {
        role == MessageRole::Assistant
            && content.chars().count() > self.min_length_for_compression
    }

    /// Head + tail with an embedded LOOKUP hint when a key is available.
    pub fn compress(&self, content: &str, entity_key: Option<&str>) -> String {
        let chars: Vec<char> = content.chars().collect();
        if chars.len() <= self.min_length_for_compression {
            return content.to_string();
        }
        let head: String = chars[..self.truncate_length].iter().collect();
        let tail: String = chars[chars.len() - self.truncate_length..].iter().collect();

        match entity_key {
            Some(key) => format!("{head}\n\n... [REM LOOKUP {key}] ...\n\n{tail}"),
            None => {
                let omitted = chars.len() - 2 * self.truncate_length;
                format!("{head}\n\n... [{omitted} characters omitted] ...\n\n{tail}")
            }
        }
    }

    /// Extract the lookup key from compressed content, if any.
    pub fn lookup_hint(content: &str) -> Option<&str> {
        let start = content.find("[REM LOOKUP ")?;
        let rest = &content[start + "[REM LOOKUP ".len()..];
        let end = rest.find(']')?;
        Some(&rest[..end])
    }
}

/// Lookup key for one stored session turn.
pub fn session_message_key(session_id: &str, index: i64) -> String {
    format!("session-{session_id}-msg-{index}")
}
