//! # pdfpost-oauth
//!
//! App-only `OAuth2` for mail submission: the client-credentials grant
//! against a Microsoft identity tenant, plus a small cache that hands out
//! the current access token and refreshes it shortly before expiry.
//!
//! ## Quick Start
//!
//! ```ignore
//! use pdfpost_oauth::{ClientCredentialsFlow, TokenCache};
//!
//! #[tokio::main]
//! async fn main() -> pdfpost_oauth::Result<()> {
//!     let flow = ClientCredentialsFlow::new(
//!         "https://login.microsoftonline.com",
//!         "contoso.onmicrosoft.com",
//!         "client-id",
//!         "client-secret",
//!     )?;
//!     let cache = TokenCache::new(flow);
//!
//!     let token = cache.access_token().await?;
//!     // AUTH XOAUTH2 with `token`
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
pub mod flow;
pub mod token;

pub use error::{Error, Result};
pub use flow::{ClientCredentialsFlow, TokenCache};
pub use token::Token;
