//! # pdfpost-smtp
//!
//! A small SMTP submission client used to hand PDF deliveries to a mail
//! relay (Office 365, Gmail, an on-premise Exchange, ...).
//!
//! ## Features
//!
//! - **Type-state sessions**: the compiler rejects `DATA` before `RCPT TO`
//!   and similar ordering mistakes
//! - **Opportunistic STARTTLS**: upgrade when the server advertises it
//! - **Authentication**: `AUTH PLAIN` and `AUTH XOAUTH2`
//! - **Bounded I/O**: every command round-trip is wrapped in a timeout
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use pdfpost_smtp::{Address, Client};
//!
//! #[tokio::main]
//! async fn main() -> pdfpost_smtp::Result<()> {
//!     let client = Client::connect("smtp.example.com", 587, Duration::from_secs(60)).await?;
//!     let client = client.ehlo("printer-host").await?;
//!     let client = client.starttls_if_available("smtp.example.com").await?;
//!     let client = client.auth_plain("user@example.com", "secret").await?;
//!
//!     let client = client.mail_from(Address::new("user@example.com")?, None).await?;
//!     let client = client.rcpt_to(Address::new("archive@example.com")?).await?;
//!     let client = client.data().await?;
//!     let client = client.send_message(b"Subject: hi\r\n\r\nbody\r\n").await?;
//!     client.quit().await
//! }
//! ```
//!
//! ## Session States
//!
//! ```text
//! Connected ── auth_*() ──→ Authenticated ── mail_from() ──→ MailTransaction
//!                                                              │ rcpt_to()
//!                                                              ▼
//!                         Connected ←── send_message() ── Data ←── RecipientAdded
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use connection::{
    Authenticated, Client, Connected, Data, MailTransaction, RecipientAdded, ServerInfo,
};
pub use error::{Error, Result};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
