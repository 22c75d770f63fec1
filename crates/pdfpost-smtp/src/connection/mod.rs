//! SMTP sessions.

mod client;
mod stream;

pub use client::{Authenticated, Client, Connected, Data, MailTransaction, RecipientAdded};
pub use stream::SmtpStream;

use crate::types::{AuthMechanism, Extension};
use std::collections::HashSet;

/// What the server told us about itself.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Host name from the greeting line.
    pub hostname: String,
    /// Extensions from the most recent EHLO.
    pub extensions: HashSet<Extension>,
}

impl ServerInfo {
    /// Returns true if STARTTLS was advertised.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.extensions.contains(&Extension::StartTls)
    }

    /// Returns the advertised SIZE limit, if any.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Size(size) => *size,
            _ => None,
        })
    }

    /// Returns true if the server advertised SIZE at all.
    #[must_use]
    pub fn advertises_size(&self) -> bool {
        self.extensions
            .iter()
            .any(|ext| matches!(ext, Extension::Size(_)))
    }

    /// Returns true if `mechanism` appears in the AUTH line.
    #[must_use]
    pub fn supports_auth(&self, mechanism: AuthMechanism) -> bool {
        self.extensions.iter().any(|ext| match ext {
            Extension::Auth(mechs) => mechs.contains(&mechanism),
            _ => false,
        })
    }
}
