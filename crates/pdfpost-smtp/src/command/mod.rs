//! Commands sent by the client.

use crate::types::{Address, AuthMechanism};

/// A client command, serialized with a trailing CRLF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// EHLO - extended greeting
    Ehlo {
        /// Name the client announces itself with
        hostname: String,
    },
    /// STARTTLS - upgrade to TLS
    StartTls,
    /// AUTH - begin authentication with an initial response
    Auth {
        /// SASL mechanism
        mechanism: AuthMechanism,
        /// Base64 initial response (SASL-IR)
        initial_response: Option<String>,
    },
    /// MAIL FROM - open a transaction
    MailFrom {
        /// Envelope sender
        from: Address,
        /// SIZE hint, sent only when the server advertises SIZE
        size: Option<usize>,
    },
    /// RCPT TO - add a recipient
    RcptTo {
        /// Envelope recipient
        to: Address,
    },
    /// DATA - start message content
    Data,
    /// RSET - abort the transaction
    Rset,
    /// QUIT - close the session
    Quit,
}

impl Command {
    /// Short name used in logs and timeout errors.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Ehlo { .. } => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::Auth { .. } => "AUTH",
            Self::MailFrom { .. } => "MAIL FROM",
            Self::RcptTo { .. } => "RCPT TO",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Quit => "QUIT",
        }
    }

    /// Serializes the command to bytes.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut line = match self {
            Self::Ehlo { hostname } => format!("EHLO {hostname}"),
            Self::Auth {
                mechanism,
                initial_response: Some(resp),
            } => format!("AUTH {} {resp}", mechanism.as_str()),
            Self::Auth {
                mechanism,
                initial_response: None,
            } => format!("AUTH {}", mechanism.as_str()),
            Self::MailFrom { from, size } => match size {
                Some(size) => format!("MAIL FROM:<{from}> SIZE={size}"),
                None => format!("MAIL FROM:<{from}>"),
            },
            Self::RcptTo { to } => format!("RCPT TO:<{to}>"),
            Self::StartTls | Self::Data | Self::Rset | Self::Quit => self.verb().to_string(),
        };
        line.push_str("\r\n");
        line.into_bytes()
    }
}
