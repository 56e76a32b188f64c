//! A minimal hand-rolled HTTP/1.1 stub used in place of `wiremock`/`axum` to
//! stand in for the coordinator and the origin media server in integration
//! tests (section 8: "a hand-rolled `tokio::net::TcpListener` stub").
//!
//! Handles both `Content-Length` and chunked request bodies since
//! `upload_complete` streams its body without a known length.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// One observed request: method, path (including query string), and body.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

pub type Responder = Arc<dyn Fn(&Request) -> (u16, String) + Send + Sync>;

/// A running fake server. Dropping it aborts the accept loop.
pub struct FakeServer {
    pub base_url: String,
    handle: JoinHandle<()>,
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_fake_server(responder: Responder) -> FakeServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake server to an ephemeral port");
    let addr = listener.local_addr().expect("fake server has a local addr");
    let base_url = format!("http://{addr}");

    let handle = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let responder = responder.clone();
            tokio::spawn(async move {
                let _ = serve_one(stream, responder).await;
            });
        }
    });

    FakeServer { base_url, handle }
}

async fn serve_one(mut stream: TcpStream, responder: Responder) -> std::io::Result<()> {
    let request = read_request(&mut stream).await?;
    let (status, body) = responder(&request);
    write_response(&mut stream, status, &body).await
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<Request> {
    let mut header_buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            break;
        }
        header_buf.push(byte[0]);
        if header_buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }

    let header_text = String::from_utf8_lossy(&header_buf);
    let mut lines = header_text.lines();
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("").to_string();

    let mut content_length: Option<usize> = None;
    let mut chunked = false;
    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if key == "content-length" {
            content_length = value.parse().ok();
        } else if key == "transfer-encoding" && value.to_ascii_lowercase().contains("chunked") {
            chunked = true;
        }
    }

    let body = if chunked {
        read_chunked_body(stream).await?
    } else if let Some(len) = content_length {
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;
        body
    } else {
        Vec::new()
    };

    Ok(Request { method, path, body })
}

async fn read_chunked_body(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let size_line = read_line(stream).await?;
        let size_hex = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_hex, 16).unwrap_or(0);
        if size == 0 {
            // Trailing headers (none expected) terminated by a blank line.
            read_line(stream).await.ok();
            break;
        }
        let mut chunk = vec![0u8; size];
        stream.read_exact(&mut chunk).await?;
        body.extend_from_slice(&chunk);
        // Consume the chunk's trailing CRLF.
        let mut crlf = [0u8; 2];
        stream.read_exact(&mut crlf).await?;
    }
    Ok(body)
}

async fn read_line(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            break;
        }
        if byte[0] == b'\n' {
            break;
        }
        if byte[0] != b'\r' {
            line.push(byte[0]);
        }
    }
    Ok(String::from_utf8_lossy(&line).to_string())
}

async fn write_response(stream: &mut TcpStream, status: u16, body: &str) -> std::io::Result<()> {
    let reason = match status {
        200 => "OK",
        204 => "No Content",
        401 => "Unauthorized",
        403 => "Forbidden",
        410 => "Gone",
        500 => "Internal Server Error",
        _ => "OK",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// Locates the compiled `mock_ffmpeg` test binary, mirroring the teacher's
/// `CARGO_BIN_EXE_ffui_mock_ffmpeg` lookup convention for `[[test]]` helper
/// executables declared with `harness = false`.
pub fn locate_mock_ffmpeg() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_mock_ffmpeg") {
        let path = std::path::PathBuf::from(path);
        if path.exists() {
            return path;
        }
    }

    let current_exe = std::env::current_exe().expect("test binary has a current_exe");
    let deps_dir = current_exe
        .parent()
        .expect("test binary has a parent dir")
        .to_path_buf();
    let candidate_dirs = [deps_dir.clone(), deps_dir.join("..")];
    for dir in candidate_dirs {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut matches: Vec<std::path::PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("mock_ffmpeg") && !n.ends_with(".d"))
            })
            .filter(|p| p.is_file())
            .collect();
        matches.sort();
        if let Some(path) = matches.pop() {
            return path;
        }
    }

    panic!("unable to locate compiled mock_ffmpeg test binary");
}
