//! Reply parser.

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Parses the collected lines of one reply.
///
/// Continuation lines use `-` after the code (`250-SIZE`), the final line a
/// space (`250 OK`). Every line must carry the same code.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the reply is malformed.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let Some(first) = lines.first() else {
        return Err(Error::Protocol("empty reply".into()));
    };

    let code = parse_code(first)?;
    let mut text = Vec::with_capacity(lines.len());

    for line in lines {
        if parse_code(line)? != code {
            return Err(Error::Protocol(format!(
                "mixed reply codes in multi-line reply: {line}"
            )));
        }
        text.push(line.get(4..).unwrap_or_default().to_string());
    }

    Ok(Reply::new(ReplyCode::new(code), text))
}

fn parse_code(line: &str) -> Result<u16> {
    let digits = line
        .get(..3)
        .ok_or_else(|| Error::Protocol(format!("reply too short: {line}")))?;

    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Protocol(format!("invalid reply code: {line}")));
    }

    match line.as_bytes().get(3) {
        None | Some(b' ' | b'-') => {}
        Some(_) => return Err(Error::Protocol(format!("malformed reply line: {line}"))),
    }

    digits
        .parse()
        .map_err(|_| Error::Protocol(format!("invalid reply code: {line}")))
}

/// Returns true if `line` terminates a reply.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    match line.as_bytes().get(3) {
        Some(b) => *b == b' ',
        None => line.len() == 3,
    }
}
