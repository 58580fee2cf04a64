//! Utility functions for chat channels

/// Maximum length for a response body kept in error messages.
pub const MAX_BODY_LENGTH: usize = 4000;

/// Truncates to at most `max_len` bytes without splitting a character.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut cut = max_len;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... [truncated]", &s[..cut])
}
