//! Message assembly.

use crate::content_type::ContentType;
use crate::encoding::{encode_base64_lines, encode_rfc2231, is_plain_header_text, quote};
use crate::error::{Error, Result};
use crate::header::Headers;
use chrono::{DateTime, FixedOffset, Local};
use rand::Rng;
use rand::distributions::Alphanumeric;

/// A file carried by the message.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// File name shown to the recipient.
    pub filename: String,
    /// Media type; guessed from the extension by [`Attachment::new`].
    pub content_type: ContentType,
    /// Raw file contents.
    pub data: Vec<u8>,
}

impl Attachment {
    /// Creates an attachment, guessing its type from `filename`.
    #[must_use]
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let filename = filename.into();
        let content_type = ContentType::for_filename(&filename);
        Self {
            filename,
            content_type,
            data,
        }
    }

    fn disposition(&self) -> String {
        if is_plain_header_text(&self.filename) {
            format!("attachment; filename={}", quote(&self.filename))
        } else {
            format!("attachment; filename*={}", encode_rfc2231(&self.filename))
        }
    }
}

/// Builder for the outbound `multipart/mixed` message.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    subject: String,
    html_body: String,
    attachments: Vec<Attachment>,
    date: Option<DateTime<FixedOffset>>,
    boundary: Option<String>,
    message_id: Option<String>,
}

impl MessageBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `From` address.
    #[must_use]
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = Some(address.into());
        self
    }

    /// Adds `To` addresses.
    #[must_use]
    pub fn to<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.to.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the HTML body.
    #[must_use]
    pub fn html_body(mut self, html: impl Into<String>) -> Self {
        self.html_body = html.into();
        self
    }

    /// Adds an attachment.
    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Sets the `Date` header (defaults to now).
    #[must_use]
    pub const fn date(mut self, date: DateTime<FixedOffset>) -> Self {
        self.date = Some(date);
        self
    }

    /// Fixes the multipart boundary (random by default).
    #[must_use]
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    /// Fixes the `Message-ID` (random by default), without angle brackets.
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Renders the message as CRLF-terminated bytes ready for DATA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingHeader`] without a sender or recipients, and
    /// [`Error::InvalidHeader`] if a header value contains a line break.
    pub fn build(self) -> Result<Vec<u8>> {
        let from = self.from.ok_or(Error::MissingHeader("From"))?;
        if self.to.is_empty() {
            return Err(Error::MissingHeader("To"));
        }

        let date = self.date.unwrap_or_else(|| Local::now().fixed_offset());
        let boundary = self
            .boundary
            .unwrap_or_else(|| format!("----=_pdfpost_{}", random_token(24)));
        let message_id = self.message_id.unwrap_or_else(|| {
            let domain = from.rsplit_once('@').map_or("localhost", |(_, d)| d);
            format!("{}@{domain}", random_token(20))
        });

        let mut headers = Headers::new();
        headers.add_raw("From", from.as_str())?;
        headers.add_raw("To", self.to.join(", "))?;
        headers.add_text("Subject", &self.subject)?;
        headers.add_raw("Date", date.to_rfc2822())?;
        headers.add_raw("Message-ID", format!("<{message_id}>"))?;
        headers.add_raw("MIME-Version", "1.0")?;
        headers.add_raw(
            "Content-Type",
            ContentType::multipart_mixed(boundary.as_str()).to_string(),
        )?;

        let mut out = headers.to_string();
        out.push_str("\r\n");

        out.push_str(&format!("--{boundary}\r\n"));
        let mut part = Headers::new();
        part.add_raw("Content-Type", ContentType::text_html().to_string())?;
        part.add_raw("Content-Transfer-Encoding", "base64")?;
        out.push_str(&part.to_string());
        out.push_str("\r\n");
        out.push_str(&encode_base64_lines(self.html_body.as_bytes()));

        for attachment in &self.attachments {
            out.push_str(&format!("--{boundary}\r\n"));
            let mut part = Headers::new();
            part.add_raw(
                "Content-Type",
                attachment
                    .content_type
                    .clone()
                    .with_name(&attachment.filename)
                    .to_string(),
            )?;
            part.add_raw("Content-Transfer-Encoding", "base64")?;
            part.add_raw("Content-Disposition", attachment.disposition())?;
            out.push_str(&part.to_string());
            out.push_str("\r\n");
            out.push_str(&encode_base64_lines(&attachment.data));
        }

        out.push_str(&format!("--{boundary}--\r\n"));
        Ok(out.into_bytes())
    }
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
