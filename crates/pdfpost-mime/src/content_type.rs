//! MIME content types.

use crate::encoding::{encoded_words, is_plain_header_text, quote};
use std::fmt;

/// A media type with ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// `type/subtype`, e.g. `application/pdf`.
    pub essence: String,
    /// Parameters in output order; values are quoted when rendered.
    pub parameters: Vec<(String, String)>,
}

impl ContentType {
    /// Creates a content type without parameters.
    #[must_use]
    pub fn new(essence: impl Into<String>) -> Self {
        Self {
            essence: essence.into(),
            parameters: Vec::new(),
        }
    }

    /// `text/html; charset=utf-8`
    #[must_use]
    pub fn text_html() -> Self {
        Self::new("text/html").with_parameter("charset", "utf-8")
    }

    /// `multipart/mixed` with the given boundary.
    #[must_use]
    pub fn multipart_mixed(boundary: impl Into<String>) -> Self {
        Self::new("multipart/mixed").with_parameter("boundary", boundary)
    }

    /// Guesses the type of an attachment from its extension.
    #[must_use]
    pub fn for_filename(filename: &str) -> Self {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        let essence = match ext.as_str() {
            "pdf" => "application/pdf",
            "zip" => "application/zip",
            "txt" => "text/plain",
            _ => "application/octet-stream",
        };
        Self::new(essence)
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((key.into(), value.into()));
        self
    }

    /// Adds `name=` for an attachment, RFC 2047-encoded if needed.
    #[must_use]
    pub fn with_name(self, filename: &str) -> Self {
        if is_plain_header_text(filename) {
            self.with_parameter("name", filename)
        } else {
            self.with_parameter("name", encoded_words(filename).join(" "))
        }
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("boundary"))
            .map(|(_, v)| v.as_str())
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.essence
            .get(..10)
            .is_some_and(|p| p.eq_ignore_ascii_case("multipart/"))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.essence)?;
        for (key, value) in &self.parameters {
            if value.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
                write!(f, "; {key}={value}")?;
            } else {
                write!(f, "; {key}={}", quote(value))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_guesses_attachment_types() {
        assert_eq!(ContentType::for_filename("scan.PDF").essence, "application/pdf");
        assert_eq!(ContentType::for_filename("scan.zip").essence, "application/zip");
        assert_eq!(
            ContentType::for_filename("noext").essence,
            "application/octet-stream"
        );
    }

    #[test]
    fn test_display_quotes_when_needed() {
        assert_eq!(ContentType::text_html().to_string(), "text/html; charset=utf-8");
        assert_eq!(
            ContentType::for_filename("a b.pdf").with_name("a b.pdf").to_string(),
            r#"application/pdf; name="a b.pdf""#
        );
    }

    #[test]
    fn test_multipart_boundary() {
        let ct = ContentType::multipart_mixed("----=_b1");
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("----=_b1"));
        assert_eq!(ct.to_string(), r#"multipart/mixed; boundary="----=_b1""#);
    }
}
