//! Minimal HTTP/1.1 fake relay for integration tests: just enough request
//! parsing to capture headers/body and a scripted response queue, with no
//! dependency on a real server framework (the production connector is
//! hand-rolled too, so the test double matches it in spirit).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct RelayResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RelayResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status_only(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }
}

pub struct CapturedRequest {
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Shared state a test can inspect while the relay runs in the background.
#[derive(Default)]
pub struct RelayState {
    pub requests: Mutex<Vec<CapturedRequest>>,
}

pub struct FakeRelay {
    pub port: u16,
    pub state: Arc<RelayState>,
}

/// Starts a fake relay on an ephemeral loopback port. `scripted` responses
/// are served in order, one per accepted connection; once exhausted,
/// `default` is served for every subsequent connection.
pub async fn start_relay(scripted: Vec<RelayResponse>, default: RelayResponse) -> FakeRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(RelayState::default());
    let script = Arc::new(Mutex::new(VecDeque::from(scripted)));

    let state_for_task = Arc::clone(&state);
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let script = Arc::clone(&script);
            let state = Arc::clone(&state_for_task);
            let default = default.clone();
            tokio::spawn(async move {
                if let Some(request) = read_request(&mut stream).await {
                    let response = script
                        .lock()
                        .unwrap()
                        .pop_front()
                        .unwrap_or(default);
                    write_response(&mut stream, &response).await;
                    state.requests.lock().unwrap().push(request);
                }
            });
        }
    });

    FakeRelay { port, state }
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> Option<CapturedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > 1 << 20 {
            return None;
        }
    };

    let header_text = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut headers = HashMap::new();
    for line in header_text.split("\r\n").skip(1) {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Some(CapturedRequest { headers, body })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

async fn write_response(stream: &mut tokio::net::TcpStream, response: &RelayResponse) {
    let reason = match response.status {
        200 => "OK",
        503 => "Service Unavailable",
        _ => "Status",
    };
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        reason,
        response.body.len()
    );
    let _ = stream.write_all(head.as_bytes()).await;
    let _ = stream.write_all(&response.body).await;
    let _ = stream.shutdown().await;
}
