//! Type-state SMTP client.

use super::{ServerInfo, SmtpStream};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

/// Bytes written per bounded write while streaming message content.
const BODY_CHUNK: usize = 64 * 1024;

/// Session is open; greeting received.
#[derive(Debug)]
pub struct Connected;

/// AUTH succeeded.
#[derive(Debug)]
pub struct Authenticated;

/// MAIL FROM accepted.
#[derive(Debug)]
pub struct MailTransaction;

/// At least one RCPT TO accepted.
#[derive(Debug)]
pub struct RecipientAdded;

/// DATA accepted; server waits for content.
#[derive(Debug)]
pub struct Data;

/// SMTP client whose state is tracked in the type.
///
/// Every command round-trip is bounded by the timeout given to
/// [`Client::connect`].
#[derive(Debug)]
pub struct Client<State> {
    stream: SmtpStream,
    server_info: ServerInfo,
    client_name: String,
    timeout: Duration,
    _state: PhantomData<State>,
}

impl Client<Connected> {
    /// Connects over TCP and reads the greeting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the connect or greeting exceeds
    /// `timeout`, or the server's rejection if the greeting is not 2xx.
    pub async fn connect(hostname: &str, port: u16, timeout: Duration) -> Result<Self> {
        tracing::debug!(hostname, port, "connecting to mail relay");
        let stream = within(timeout, "connect", SmtpStream::connect(hostname, port)).await?;
        Self::from_stream(stream, timeout).await
    }

    /// Wraps an already-open stream and reads the greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the greeting cannot be read or is not 2xx.
    pub async fn from_stream(mut stream: SmtpStream, timeout: Duration) -> Result<Self> {
        let greeting = within(timeout, "greeting", read_reply(&mut stream)).await?;
        let greeting = expect_success(greeting)?;

        let hostname = greeting
            .lines
            .first()
            .and_then(|line| line.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            stream,
            server_info: ServerInfo {
                hostname,
                extensions: std::collections::HashSet::new(),
            },
            client_name: String::new(),
            timeout,
            _state: PhantomData,
        })
    }

    /// Sends EHLO and records the advertised extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects EHLO.
    pub async fn ehlo(mut self, client_name: &str) -> Result<Self> {
        client_name.clone_into(&mut self.client_name);
        self.refresh_extensions().await?;
        Ok(self)
    }

    /// Upgrades to TLS. EHLO is re-sent afterwards, as required.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if STARTTLS was not advertised, or an
    /// error if the command or handshake fails.
    pub async fn starttls(mut self, server_name: &str) -> Result<Self> {
        if !self.server_info.supports_starttls() {
            return Err(Error::Protocol("server does not advertise STARTTLS".into()));
        }

        expect_success(self.send_command(Command::StartTls).await?)?;

        let limit = self.timeout;
        self.stream = within(limit, "TLS handshake", self.stream.upgrade_to_tls(server_name)).await?;
        tracing::debug!(server_name, "STARTTLS negotiated");

        self.refresh_extensions().await?;
        Ok(self)
    }

    /// Upgrades to TLS only if the server offers STARTTLS.
    ///
    /// # Errors
    ///
    /// Returns an error if an advertised upgrade fails.
    pub async fn starttls_if_available(self, server_name: &str) -> Result<Self> {
        if self.server_info.supports_starttls() {
            self.starttls(server_name).await
        } else {
            tracing::debug!(server_name, "STARTTLS not offered, continuing in plain text");
            Ok(self)
        }
    }

    /// Authenticates with `AUTH PLAIN`.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection if authentication fails.
    pub async fn auth_plain(mut self, username: &str, password: &str) -> Result<Client<Authenticated>> {
        let credentials = format!("\0{username}\0{password}");
        let cmd = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some(STANDARD.encode(credentials)),
        };

        let reply = self.send_command(cmd).await?;
        expect_code(reply, ReplyCode::AUTH_OK)?;
        Ok(self.transition())
    }

    /// Authenticates with `AUTH XOAUTH2` using an OAuth access token.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection if the token is refused.
    pub async fn auth_xoauth2(mut self, username: &str, access_token: &str) -> Result<Client<Authenticated>> {
        let payload = format!("user={username}\x01auth=Bearer {access_token}\x01\x01");
        let cmd = Command::Auth {
            mechanism: AuthMechanism::XOAuth2,
            initial_response: Some(STANDARD.encode(payload)),
        };

        let mut reply = self.send_command(cmd).await?;
        if reply.code == ReplyCode::AUTH_CONTINUE {
            // Failure details arrive as a challenge; an empty response ends the exchange.
            let detail = reply.text();
            reply = self.send_raw("AUTH", b"\r\n").await?;
            if reply.code != ReplyCode::AUTH_OK {
                let decoded = STANDARD
                    .decode(detail.trim())
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
                    .unwrap_or(detail);
                return Err(Error::rejected(
                    reply.code.as_u16(),
                    format!("{} ({decoded})", reply.text()),
                ));
            }
        }

        expect_code(reply, ReplyCode::AUTH_OK)?;
        Ok(self.transition())
    }

    /// Opens a transaction without authenticating (open relays, internal MTAs).
    ///
    /// # Errors
    ///
    /// Returns the server's rejection if MAIL FROM fails.
    pub async fn mail_from(self, from: Address, size_hint: Option<usize>) -> Result<Client<MailTransaction>> {
        self.open_transaction(from, size_hint).await
    }

    async fn refresh_extensions(&mut self) -> Result<()> {
        let cmd = Command::Ehlo {
            hostname: self.client_name.clone(),
        };
        let reply = expect_success(self.send_command(cmd).await?)?;

        // First line is the server's greeting text.
        self.server_info.extensions = reply
            .lines
            .iter()
            .skip(1)
            .map(|line| Extension::parse(line))
            .collect();
        Ok(())
    }
}

impl Client<Authenticated> {
    /// Opens a transaction.
    ///
    /// `size_hint` is sent as the SIZE parameter when the server advertises it.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection if MAIL FROM fails.
    pub async fn mail_from(self, from: Address, size_hint: Option<usize>) -> Result<Client<MailTransaction>> {
        self.open_transaction(from, size_hint).await
    }
}

impl Client<MailTransaction> {
    /// Adds the first recipient.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection if RCPT TO fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Client<RecipientAdded>> {
        expect_success(self.send_command(Command::RcptTo { to }).await?)?;
        Ok(self.transition())
    }
}

impl Client<RecipientAdded> {
    /// Adds another recipient.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection if RCPT TO fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Self> {
        expect_success(self.send_command(Command::RcptTo { to }).await?)?;
        Ok(self)
    }

    /// Sends DATA.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection unless it answers 354.
    pub async fn data(mut self) -> Result<Client<Data>> {
        let reply = self.send_command(Command::Data).await?;
        expect_code(reply, ReplyCode::START_DATA)?;
        Ok(self.transition())
    }
}

impl Client<Data> {
    /// Streams the message, terminates it with `.` and waits for acceptance.
    ///
    /// Bare LF line endings are normalized to CRLF and leading dots are
    /// stuffed. Each chunk written counts against the session timeout
    /// separately, so large attachments are not cut off by a single timer.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection if the message is refused.
    pub async fn send_message(mut self, message: &[u8]) -> Result<Client<Connected>> {
        let mut body = dot_stuff(message);
        body.extend_from_slice(b".\r\n");

        let limit = self.timeout;
        for chunk in body.chunks(BODY_CHUNK) {
            within(limit, "message body", self.stream.write_all(chunk)).await?;
        }

        let reply = within(limit, "end of data", read_reply(&mut self.stream)).await?;
        let reply = expect_success(reply)?;
        tracing::debug!(reply = %reply.text(), "message accepted");
        Ok(self.transition())
    }
}

impl<S> Client<S> {
    /// Returns what the server advertised.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Returns true once STARTTLS has completed.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.stream.is_tls()
    }

    /// Aborts any open transaction.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection if RSET fails.
    pub async fn reset(mut self) -> Result<Client<Connected>> {
        expect_success(self.send_command(Command::Rset).await?)?;
        Ok(self.transition())
    }

    /// Sends QUIT. Available in any state.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection if QUIT is not acknowledged.
    pub async fn quit(mut self) -> Result<()> {
        let reply = self.send_command(Command::Quit).await?;
        if !reply.is_success() && reply.code != ReplyCode::CLOSING {
            return Err(Error::rejected(reply.code.as_u16(), reply.text()));
        }
        Ok(())
    }

    async fn open_transaction(mut self, from: Address, size_hint: Option<usize>) -> Result<Client<MailTransaction>> {
        let size = size_hint.filter(|_| self.server_info.advertises_size());
        expect_success(self.send_command(Command::MailFrom { from, size }).await?)?;
        Ok(self.transition())
    }

    async fn send_command(&mut self, cmd: Command) -> Result<Reply> {
        tracing::trace!(command = cmd.verb(), "smtp >");
        self.send_raw(cmd.verb(), &cmd.serialize()).await
    }

    async fn send_raw(&mut self, operation: &'static str, data: &[u8]) -> Result<Reply> {
        let limit = self.timeout;
        let stream = &mut self.stream;
        let reply = within(limit, operation, async move {
            stream.write_all(data).await?;
            read_reply(stream).await
        })
        .await?;
        tracing::trace!(code = reply.code.as_u16(), "smtp <");
        Ok(reply)
    }

    fn transition<T>(self) -> Client<T> {
        Client {
            stream: self.stream,
            server_info: self.server_info,
            client_name: self.client_name,
            timeout: self.timeout,
            _state: PhantomData,
        }
    }
}

async fn within<T>(
    limit: Duration,
    operation: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout {
            operation,
            after: limit,
        })?
}

async fn read_reply(stream: &mut SmtpStream) -> Result<Reply> {
    let mut lines = Vec::new();
    loop {
        let line = stream.read_line().await?;
        if line.is_empty() {
            continue;
        }

        let is_last = is_last_reply_line(&line);
        lines.push(line);
        if is_last {
            break;
        }
    }
    parse_reply(&lines)
}

fn expect_success(reply: Reply) -> Result<Reply> {
    if reply.is_success() {
        Ok(reply)
    } else {
        Err(Error::rejected(reply.code.as_u16(), reply.text()))
    }
}

fn expect_code(reply: Reply, code: ReplyCode) -> Result<Reply> {
    if reply.code == code {
        Ok(reply)
    } else {
        Err(Error::rejected(reply.code.as_u16(), reply.text()))
    }
}

/// Normalizes line endings to CRLF and doubles leading dots.
///
/// A trailing newline does not produce an extra empty line.
fn dot_stuff(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + message.len() / 64 + 2);
    let body = message.strip_suffix(b"\n").unwrap_or(message);
    let body = body.strip_suffix(b"\r").unwrap_or(body);

    for line in body.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.first() == Some(&b'.') {
            out.push(b'.');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stuffs_leading_dots() {
        assert_eq!(dot_stuff(b"a\r\n.b\r\n..c"), b"a\r\n..b\r\n...c\r\n");
    }

    #[test]
    fn normalizes_bare_lf() {
        assert_eq!(dot_stuff(b"one\ntwo\n"), b"one\r\ntwo\r\n");
    }

    #[test]
    fn trailing_crlf_not_doubled() {
        assert_eq!(dot_stuff(b"body\r\n"), b"body\r\n");
        assert_eq!(dot_stuff(b"body"), b"body\r\n");
    }

    #[test]
    fn keeps_blank_lines() {
        assert_eq!(dot_stuff(b"h: v\r\n\r\nbody"), b"h: v\r\n\r\nbody\r\n");
    }
}
