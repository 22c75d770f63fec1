//! # pdfpost-mime
//!
//! Generation of the outbound delivery message: an RFC 5322 envelope with a
//! `multipart/mixed` body holding one HTML part and one file attachment.
//!
//! ## Quick Start
//!
//! ```ignore
//! use pdfpost_mime::{Attachment, MessageBuilder};
//!
//! let bytes = MessageBuilder::new()
//!     .from("scanner@example.com")
//!     .to(["archive@example.com"])
//!     .subject("Print job from ACME\\jdoe")
//!     .html_body("<p>Attached.</p>")
//!     .attach(Attachment::new("report.pdf", std::fs::read("report.pdf")?))
//!     .build()?;
//! ```
//!
//! Non-ASCII subjects and file names are encoded per RFC 2047 / RFC 2231;
//! all bodies are base64 with 76-column lines, so the output is 7-bit clean.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod content_type;
mod error;
mod header;
mod message;

pub mod encoding;

pub use content_type::ContentType;
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Attachment, MessageBuilder};
