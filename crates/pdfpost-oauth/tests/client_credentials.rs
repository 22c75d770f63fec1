//! Token requests against a one-shot HTTP responder on loopback.

#![allow(clippy::unwrap_used)]

use pdfpost_oauth::{ClientCredentialsFlow, Error, TokenCache};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serves `responses` to successive connections and returns each request.
async fn token_endpoint(responses: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let authority = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        for (status, body) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            requests.push(read_request(&mut socket).await);

            let reason = if status == 200 { "OK" } else { "Bad Request" };
            let reply = format!(
                "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        }
        requests
    });

    (authority, handle)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(split) = text.find("\r\n\r\n") {
            let length = text[..split]
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= split + 4 + length {
                break;
            }
        }
    }
    String::from_utf8(buf).unwrap()
}

#[tokio::test]
async fn posts_client_credentials_form() {
    let (authority, server) = token_endpoint(vec![(
        200,
        r#"{"token_type":"Bearer","expires_in":3599,"access_token":"app-token"}"#,
    )])
    .await;

    let flow = ClientCredentialsFlow::new(&authority, "contoso", "app-id", "s3cret").unwrap();
    let token = flow.request_token().await.unwrap();
    assert_eq!(token.access_token, "app-token");
    assert!(!token.is_expired());

    let requests = server.await.unwrap();
    let request = &requests[0];
    assert!(request.starts_with("POST /contoso/oauth2/v2.0/token HTTP/1.1"));
    assert!(request.contains("grant_type=client_credentials"));
    assert!(request.contains("client_id=app-id"));
    assert!(request.contains("client_secret=s3cret"));
    assert!(request.contains("scope=https%3A%2F%2Foutlook.office365.com%2F.default"));
}

#[tokio::test]
async fn surfaces_endpoint_error() {
    let (authority, _server) = token_endpoint(vec![(
        400,
        r#"{"error":"unauthorized_client","error_description":"AADSTS700016: Application not found"}"#,
    )])
    .await;

    let flow = ClientCredentialsFlow::new(&authority, "contoso", "app-id", "s3cret").unwrap();
    let err = flow.request_token().await.unwrap_err();
    match &err {
        Error::Refused { code, description } => {
            assert_eq!(code, "unauthorized_client");
            assert!(err.is_bad_credentials());
            assert!(description.starts_with("AADSTS700016"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn cache_fetches_once() {
    let (authority, server) = token_endpoint(vec![(
        200,
        r#"{"token_type":"Bearer","expires_in":3599,"access_token":"only-once"}"#,
    )])
    .await;

    let flow = ClientCredentialsFlow::new(&authority, "contoso", "app-id", "s3cret").unwrap();
    let cache = TokenCache::new(flow);

    assert_eq!(cache.access_token().await.unwrap(), "only-once");
    assert_eq!(cache.access_token().await.unwrap(), "only-once");

    assert_eq!(server.await.unwrap().len(), 1);
}
