//! Ordered header block.

use crate::encoding::encode_rfc2047;
use crate::error::{Error, Result};
use std::fmt;

/// Headers in insertion order, rendered as `Name: value\r\n` lines.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds unstructured text (e.g. `Subject`), RFC 2047-encoding it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHeader`] if the value contains CR or LF.
    pub fn add_text(&mut self, name: &str, value: &str) -> Result<()> {
        check(name, value)?;
        self.entries.push((name.to_string(), encode_rfc2047(value)));
        Ok(())
    }

    /// Adds a structured value verbatim (addresses, dates, content types).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHeader`] if the value contains CR or LF.
    pub fn add_raw(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        check(name, &value)?;
        self.entries.push((name.to_string(), value));
        Ok(())
    }

    /// Returns the first value stored under `name`, case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns an iterator over all headers.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

fn check(name: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) {
        return Err(Error::InvalidHeader {
            name: name.to_string(),
            reason: "line breaks are not allowed",
        });
    }
    Ok(())
}
