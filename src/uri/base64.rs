//! Lenient Base64 decoding for subscription documents
//!
//! Panels serve standard and URL-safe alphabets, with and without padding,
//! sometimes wrapped across lines.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use tracing::trace;

/// Decodes Base64 content, trying each alphabet and padding variant.
///
/// Whitespace is stripped first. Returns `None` when no variant decodes.
pub fn decode_lenient(content: &str) -> Option<Vec<u8>> {
    let cleaned: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    trace!("Attempting Base64 decode of {} bytes", cleaned.len());

    if let Ok(decoded) = STANDARD.decode(&cleaned) {
        return Some(decoded);
    }
    if let Ok(decoded) = URL_SAFE.decode(&cleaned) {
        return Some(decoded);
    }
    if let Ok(decoded) = URL_SAFE_NO_PAD.decode(&cleaned) {
        return Some(decoded);
    }

    let padded = add_padding(&cleaned);
    STANDARD
        .decode(&padded)
        .or_else(|_| URL_SAFE.decode(&padded))
        .ok()
}

/// Pads to a multiple of four with `=`
pub fn add_padding(s: &str) -> String {
    let mut result = s.to_string();
    while !result.len().is_multiple_of(4) {
        result.push('=');
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_standard() {
        assert_eq!(decode_lenient("aGVsbG8gd29ybGQ=").unwrap(), b"hello world");
    }

    #[test]
    fn test_decode_missing_padding() {
        assert_eq!(decode_lenient("aGVsbG8gd29ybGQ").unwrap(), b"hello world");
    }

    #[test]
    fn test_decode_wrapped_lines() {
        assert_eq!(decode_lenient("aGVs\nbG8g\r\nd29y\tbGQ=").unwrap(), b"hello world");
    }

    #[test]
    fn test_decode_standard_alphabet_without_padding() {
        let encoded = STANDARD.encode("a??>").trim_end_matches('=').to_string();
        assert_eq!(decode_lenient(&encoded).unwrap(), b"a??>");
    }

    #[test]
    fn test_decode_url_safe() {
        let encoded = URL_SAFE_NO_PAD.encode("a??>");
        assert_eq!(decode_lenient(&encoded).unwrap(), b"a??>");
    }

    #[test]
    fn test_decode_invalid() {
        assert!(decode_lenient("not valid base64!!!").is_none());
    }

    #[test]
    fn test_add_padding() {
        assert_eq!(add_padding("abcd"), "abcd");
        assert_eq!(add_padding("abc"), "abc=");
        assert_eq!(add_padding("ab"), "ab==");
        assert_eq!(add_padding(""), "");
    }
}
