//! Minimal HTTP/1.1 server standing in for the Deezer API and CDN.
//!
//! Routes:
//! - `GET /track/3135556`: track JSON whose preview points back at this server
//! - `GET /track/1`: API error body
//! - `GET /track/2`: track without a preview
//! - `GET|HEAD /preview/3135556.mp3`: [`AUDIO`]
//! - `GET /flaky.mp3`: 503 until the configured failures are used up, then [`AUDIO`]
//! - `GET /stall.mp3`: headers and the first bytes of [`AUDIO`], then silence

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const TRACK_ID: &str = "3135556";

lazy_static::lazy_static! {
    pub static ref AUDIO: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
}

pub struct TestServer {
    pub base: String,
    pub requests: Arc<AtomicUsize>,
    /// Hits on `/stall.mp3`
    pub stalls: Arc<AtomicUsize>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

struct Routes {
    base: String,
    flaky_failures: AtomicUsize,
    requests: Arc<AtomicUsize>,
    stalls: Arc<AtomicUsize>,
}

pub async fn start_server(flaky_failures: usize) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test server");
    let base = format!("http://{}", listener.local_addr().expect("local addr"));
    let requests = Arc::new(AtomicUsize::new(0));
    let stalls = Arc::new(AtomicUsize::new(0));

    let routes = Arc::new(Routes {
        base: base.clone(),
        flaky_failures: AtomicUsize::new(flaky_failures),
        requests: Arc::clone(&requests),
        stalls: Arc::clone(&stalls),
    });

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(handle(stream, Arc::clone(&routes)));
        }
    });

    TestServer { base, requests, stalls }
}

async fn handle(mut stream: TcpStream, routes: Arc<Routes>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    routes.requests.fetch_add(1, Ordering::SeqCst);
    let request = String::from_utf8_lossy(&buf).to_string();
    let mut line = request.lines().next().unwrap_or_default().split_whitespace();
    let method = line.next().unwrap_or_default().to_string();
    let path = line.next().unwrap_or_default().to_string();

    if path == "/stall.mp3" {
        routes.stalls.fetch_add(1, Ordering::SeqCst);
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            AUDIO.len()
        );
        let _ = stream.write_all(head.as_bytes()).await;
        let _ = stream.write_all(&AUDIO[..512]).await;
        let _ = stream.flush().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        return;
    }

    let (status, content_type, body) = route(&routes, &path);
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len()
    );

    let _ = stream.write_all(head.as_bytes()).await;
    if method != "HEAD" {
        let _ = stream.write_all(&body).await;
    }
    let _ = stream.shutdown().await;
}

fn route(routes: &Routes, path: &str) -> (&'static str, &'static str, Vec<u8>) {
    match path {
        "/track/3135556" => {
            let body = serde_json::json!({
                "id": 3135556,
                "title": "Harder, Better, Faster, Stronger",
                "preview": format!("{}/preview/{}.mp3", routes.base, TRACK_ID),
                "artist": { "name": "Daft Punk" },
                "album": { "title": "Discovery" },
            });
            ("200 OK", "application/json", body.to_string().into_bytes())
        }
        "/track/1" => {
            let body = serde_json::json!({
                "error": { "type": "DataException", "message": "no data", "code": 800 }
            });
            ("200 OK", "application/json", body.to_string().into_bytes())
        }
        "/track/2" => {
            let body = serde_json::json!({
                "title": "Unreleased",
                "preview": "",
                "artist": { "name": "Nobody" },
            });
            ("200 OK", "application/json", body.to_string().into_bytes())
        }
        "/preview/3135556.mp3" => ("200 OK", "audio/mpeg", AUDIO.clone()),
        "/flaky.mp3" => {
            let failed = routes
                .flaky_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                ("503 Service Unavailable", "text/plain", b"try later".to_vec())
            } else {
                ("200 OK", "audio/mpeg", AUDIO.clone())
            }
        }
        _ => ("404 Not Found", "text/plain", b"not found".to_vec()),
    }
}
