//! Session tests against a scripted relay on a loopback socket.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pdfpost_smtp::{Address, Client, Error};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const TIMEOUT: Duration = Duration::from_secs(5);

/// One step of the relay script: the command prefix expected and the reply.
type Step = (&'static str, &'static str);

/// Starts a relay that greets, then answers each expected command in turn.
///
/// After a `DATA` step it swallows the message up to the terminating dot and
/// answers with the next step's reply. Returns everything the client sent.
async fn scripted_relay(script: Vec<Step>) -> (u16, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);
        let mut transcript = String::new();

        write
            .write_all(b"220 relay.test ESMTP ready\r\n")
            .await
            .unwrap();

        let mut in_data = false;
        for (expected, reply) in script {
            if in_data {
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap() == 0 {
                        return transcript;
                    }
                    transcript.push_str(&line);
                    if line == ".\r\n" {
                        break;
                    }
                }
                in_data = false;
            } else {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    return transcript;
                }
                assert!(
                    line.starts_with(expected),
                    "expected {expected:?}, got {line:?}"
                );
                transcript.push_str(&line);
                in_data = expected == "DATA" && reply.starts_with("354");
            }
            write.write_all(reply.as_bytes()).await.unwrap();
        }

        // Drain until the client hangs up.
        let mut rest = String::new();
        let _ = reader.read_to_string(&mut rest).await;
        transcript.push_str(&rest);
        transcript
    });

    (port, handle)
}

fn addr(s: &str) -> Address {
    Address::new(s).unwrap()
}

#[tokio::test]
async fn delivers_with_plain_auth() {
    let (port, relay) = scripted_relay(vec![
        ("EHLO", "250-relay.test\r\n250-SIZE 36700160\r\n250 AUTH PLAIN LOGIN\r\n"),
        ("AUTH PLAIN", "235 2.7.0 Authentication successful\r\n"),
        ("MAIL FROM:", "250 2.1.0 OK\r\n"),
        ("RCPT TO:", "250 2.1.5 OK\r\n"),
        ("RCPT TO:", "250 2.1.5 OK\r\n"),
        ("DATA", "354 Start mail input\r\n"),
        ("", "250 2.0.0 queued\r\n"),
        ("QUIT", "221 2.0.0 bye\r\n"),
    ])
    .await;

    let client = Client::connect("127.0.0.1", port, TIMEOUT).await.unwrap();
    let client = client.ehlo("scanner-host").await.unwrap();
    let client = client.starttls_if_available("127.0.0.1").await.unwrap();
    assert!(!client.is_tls());
    assert_eq!(client.server_info().max_message_size(), Some(36_700_160));

    let client = client.auth_plain("scanner", "hunter2").await.unwrap();
    let client = client
        .mail_from(addr("scanner@example.com"), Some(2048))
        .await
        .unwrap();
    let client = client.rcpt_to(addr("a@example.com")).await.unwrap();
    let client = client.rcpt_to(addr("b@example.com")).await.unwrap();
    let client = client.data().await.unwrap();
    let client = client
        .send_message(b"Subject: scan\r\n\r\n.hidden line\r\nend\r\n")
        .await
        .unwrap();
    client.quit().await.unwrap();

    let transcript = relay.await.unwrap();
    let plain = STANDARD.encode("\0scanner\0hunter2");
    assert!(transcript.contains(&format!("AUTH PLAIN {plain}\r\n")));
    assert!(transcript.contains("MAIL FROM:<scanner@example.com> SIZE=2048\r\n"));
    assert!(transcript.contains("RCPT TO:<b@example.com>\r\n"));
    assert!(transcript.contains("\r\n..hidden line\r\nend\r\n.\r\n"));
}

#[tokio::test]
async fn omits_size_when_not_advertised() {
    let (port, relay) = scripted_relay(vec![
        ("EHLO", "250 relay.test\r\n"),
        ("MAIL FROM:", "250 OK\r\n"),
        ("QUIT", "221 bye\r\n"),
    ])
    .await;

    let client = Client::connect("127.0.0.1", port, TIMEOUT).await.unwrap();
    let client = client.ehlo("scanner-host").await.unwrap();
    let client = client
        .mail_from(addr("scanner@example.com"), Some(10))
        .await
        .unwrap();
    client.quit().await.unwrap();

    let transcript = relay.await.unwrap();
    assert!(transcript.contains("MAIL FROM:<scanner@example.com>\r\n"));
}

#[tokio::test]
async fn surfaces_recipient_rejection() {
    let (port, _relay) = scripted_relay(vec![
        ("EHLO", "250 relay.test\r\n"),
        ("MAIL FROM:", "250 OK\r\n"),
        ("RCPT TO:", "550 5.1.1 mailbox unavailable\r\n"),
    ])
    .await;

    let client = Client::connect("127.0.0.1", port, TIMEOUT).await.unwrap();
    let client = client.ehlo("scanner-host").await.unwrap();
    let client = client
        .mail_from(addr("scanner@example.com"), None)
        .await
        .unwrap();
    let err = client.rcpt_to(addr("nobody@example.com")).await.unwrap_err();

    assert!(err.is_permanent());
    assert_eq!(err.to_string(), "SMTP error 550: 5.1.1 mailbox unavailable");
}

#[tokio::test]
async fn xoauth2_failure_reports_server_detail() {
    let (port, relay) = scripted_relay(vec![
        ("EHLO", "250-relay.test\r\n250 AUTH XOAUTH2\r\n"),
        (
            "AUTH XOAUTH2",
            "334 eyJzdGF0dXMiOiI0MDEifQ==\r\n",
        ),
        ("", "535 5.7.3 Authentication unsuccessful\r\n"),
    ])
    .await;

    let client = Client::connect("127.0.0.1", port, TIMEOUT).await.unwrap();
    let client = client.ehlo("scanner-host").await.unwrap();
    let err = client
        .auth_xoauth2("scanner@example.com", "expired-token")
        .await
        .unwrap_err();

    match err {
        Error::Rejected { code, message } => {
            assert_eq!(code, 535);
            assert!(message.contains(r#"{"status":"401"}"#), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }

    let transcript = relay.await.unwrap();
    let payload = STANDARD.encode("user=scanner@example.com\x01auth=Bearer expired-token\x01\x01");
    assert!(transcript.contains(&format!("AUTH XOAUTH2 {payload}\r\n")));
}

#[tokio::test]
async fn silent_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _relay = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket.write_all(b"220 relay.test\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let limit = Duration::from_millis(200);
    let client = Client::connect("127.0.0.1", port, limit).await.unwrap();
    let err = client.ehlo("scanner-host").await.unwrap_err();

    assert!(
        matches!(err, Error::Timeout { operation: "EHLO", .. }),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn hang_up_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket.write_all(b"220 relay.test\r\n").await.unwrap();
    });

    let client = Client::connect("127.0.0.1", port, TIMEOUT).await.unwrap();
    let err = client.ehlo("scanner-host").await.unwrap_err();
    assert!(
        matches!(err, Error::ConnectionClosed | Error::Io(_)),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn rejecting_greeting_fails_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket
            .write_all(b"554 5.3.2 service unavailable\r\n")
            .await
            .unwrap();
    });

    let err = Client::connect("127.0.0.1", port, TIMEOUT).await.unwrap_err();
    assert!(err.is_permanent());
}
