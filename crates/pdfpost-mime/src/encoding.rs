//! Transfer and header encodings.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt::Write as _;

/// Maximum encoded line length for base64 bodies (RFC 2045).
const MAX_LINE_LENGTH: usize = 76;

/// Raw bytes per RFC 2047 encoded-word; 45 bytes become 60 base64 chars,
/// which keeps each word under the 75-character limit.
const WORD_BYTES: usize = 45;

/// Encodes data as Base64 on a single line.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Encodes data as Base64 broken into CRLF-terminated 76-column lines.
#[must_use]
pub fn encode_base64_lines(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / MAX_LINE_LENGTH * 2 + 2);
    // Base64 output is ASCII, so byte chunks are valid UTF-8.
    for line in encoded.as_bytes().chunks(MAX_LINE_LENGTH) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push_str("\r\n");
    }
    out
}

/// Returns true if `text` can go into a header without encoding.
#[must_use]
pub fn is_plain_header_text(text: &str) -> bool {
    text.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) && !text.contains("=?")
}

/// Encodes a header value using RFC 2047 `B` encoded-words if needed.
///
/// Long values are split into several words joined by folding whitespace.
#[must_use]
pub fn encode_rfc2047(text: &str) -> String {
    if is_plain_header_text(text) {
        return text.to_string();
    }
    encoded_words(text).join("\r\n ")
}

/// Splits `text` on character boundaries into RFC 2047 encoded-words.
#[must_use]
pub fn encoded_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (idx, ch) in text.char_indices() {
        let next = idx + ch.len_utf8();
        if next - start > WORD_BYTES && end > start {
            words.push(encoded_word(&text.as_bytes()[start..end]));
            start = end;
        }
        end = next;
    }
    if end > start {
        words.push(encoded_word(&text.as_bytes()[start..end]));
    }
    words
}

fn encoded_word(bytes: &[u8]) -> String {
    format!("=?utf-8?B?{}?=", encode_base64(bytes))
}

/// Percent-encodes a parameter value per RFC 2231 (`utf-8''...`).
#[must_use]
pub fn encode_rfc2231(text: &str) -> String {
    let mut out = String::from("utf-8''");
    for byte in text.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

/// Quotes a parameter value, escaping `"` and `\`.
#[must_use]
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode_words(encoded: &str) -> String {
        let mut bytes = Vec::new();
        for word in encoded.split("\r\n ") {
            let inner = word
                .strip_prefix("=?utf-8?B?")
                .and_then(|w| w.strip_suffix("?="))
                .unwrap();
            bytes.extend(STANDARD.decode(inner).unwrap());
        }
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_base64_lines_wrap_at_76() {
        let encoded = encode_base64_lines(&[0xAB; 200]);
        let lines: Vec<&str> = encoded.split("\r\n").collect();
        assert_eq!(lines[0].len(), 76);
        assert_eq!(lines[1].len(), 76);
        assert_eq!(lines.last().copied(), Some(""));
        assert!(encoded.ends_with("\r\n"));
    }

    #[test]
    fn test_base64_lines_empty_input() {
        assert_eq!(encode_base64_lines(b""), "");
    }

    #[test]
    fn test_ascii_subject_untouched() {
        assert_eq!(encode_rfc2047("Scan from ACME\\jdoe"), "Scan from ACME\\jdoe");
    }

    #[test]
    fn test_non_ascii_subject_encoded() {
        let encoded = encode_rfc2047("Yazdırma işi");
        assert!(encoded.starts_with("=?utf-8?B?"));
        assert_eq!(decode_words(&encoded), "Yazdırma işi");
    }

    #[test]
    fn test_long_subject_split_into_words() {
        let subject = "ü".repeat(60);
        let encoded = encode_rfc2047(&subject);
        assert!(encoded.contains("\r\n "));
        for word in encoded.split("\r\n ") {
            assert!(word.len() <= 75, "{word}");
        }
        assert_eq!(decode_words(&encoded), subject);
    }

    #[test]
    fn test_rfc2231() {
        assert_eq!(encode_rfc2231("rapor ö.pdf"), "utf-8''rapor%20%C3%B6.pdf");
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote(r#"a "b" \c"#), r#""a \"b\" \\c""#);
    }

    proptest! {
        #[test]
        fn rfc2047_preserves_text(text in "\\PC{1,120}") {
            let encoded = encode_rfc2047(&text);
            if is_plain_header_text(&text) {
                prop_assert_eq!(encoded, text);
            } else {
                prop_assert_eq!(decode_words(&encoded), text);
            }
        }
    }
}
