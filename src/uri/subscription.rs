//! Subscription document decoding
//!
//! A subscription is either a plain list of URIs, one per line, or the same
//! list Base64 encoded. Only the known schemes survive decoding.

use tracing::{debug, warn};

use super::base64::decode_lenient;
use super::{ConnectionUri, KNOWN_SCHEMES};

/// Checks if a line starts with an accepted scheme
pub fn is_known_uri(line: &str) -> bool {
    KNOWN_SCHEMES.iter().any(|scheme| line.starts_with(scheme))
}

fn contains_known_scheme(content: &str) -> bool {
    KNOWN_SCHEMES.iter().any(|scheme| content.contains(scheme))
}

/// Decodes a subscription body into its connection URIs.
///
/// Plaintext is detected by the presence of a known scheme anywhere in the
/// body; anything else is Base64 decoded leniently and scanned again.
/// Undecodable bodies yield no URIs.
pub fn decode_subscription(body: &str) -> Vec<ConnectionUri> {
    let trimmed = body.trim();

    let text = if contains_known_scheme(trimmed) {
        debug!("Subscription body is a plain URI list");
        trimmed.to_string()
    } else {
        match decode_lenient(trimmed).map(String::from_utf8) {
            Some(Ok(decoded)) => {
                debug!("Subscription body decoded from Base64");
                decoded
            }
            _ => {
                warn!("Subscription body is neither a URI list nor Base64");
                return Vec::new();
            }
        }
    };

    text.lines()
        .map(str::trim)
        .filter(|line| is_known_uri(line))
        .map(ConnectionUri::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};

    const LINES: [&str; 5] = [
        "vless://id@h1:443?type=tcp&security=none#a",
        "vmess://eyJ2IjoiMiJ9",
        "trojan://pw@h2:443?type=ws#b",
        "ss://YWVzLTI1Ni1nY206cHc@h3:8388#c",
        "hy2://pw@h4:443#d",
    ];

    fn strings(uris: &[ConnectionUri]) -> Vec<&str> {
        uris.iter().map(ConnectionUri::as_str).collect()
    }

    #[test]
    fn test_plaintext_list() {
        let body = format!("{}\n\n{}\r\n", LINES[0], LINES[2]);
        assert_eq!(strings(&decode_subscription(&body)), vec![LINES[0], LINES[2]]);
    }

    #[test]
    fn test_base64_round_trip_of_every_scheme() {
        let encoded = STANDARD.encode(LINES.join("\n"));
        assert_eq!(strings(&decode_subscription(&encoded)), LINES.to_vec());
    }

    #[test]
    fn test_base64_without_padding_url_safe() {
        let encoded = URL_SAFE_NO_PAD.encode(format!("{}\n{}", LINES[1], LINES[3]));
        assert_eq!(
            strings(&decode_subscription(&encoded)),
            vec![LINES[1], LINES[3]]
        );
    }

    #[test]
    fn test_unknown_schemes_are_filtered() {
        let body = format!(
            "{}\nsocks://user@h:1080#x\nhttps://example.com/\n# comment\n{}",
            LINES[0], LINES[4]
        );
        assert_eq!(strings(&decode_subscription(&body)), vec![LINES[0], LINES[4]]);

        let encoded = STANDARD.encode("tuic://x@h:1#t\nsocks://y@h:2#s");
        assert!(decode_subscription(&encoded).is_empty());
    }

    #[test]
    fn test_garbage_body() {
        assert!(decode_subscription("<html>502 Bad Gateway</html>").is_empty());
        assert!(decode_subscription("").is_empty());
    }
}
