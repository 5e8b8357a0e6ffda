//! Status server on a Unix socket
//!
//! Answers minimal HTTP/1.x `GET` requests with the current status. One
//! request per connection, then the connection is closed.
//!
//! # Limits
//! - **Connections**: at most `MAX_CONNECTIONS` handled at once
//! - **Request head**: bounded by `MAX_HEAD_SIZE`, bodies are never read
//! - **Timeouts**: read/write timeouts per connection
//! - **Socket**: stale socket removal refuses symlinks

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pf_core::constants::timing;
use pf_core::{monotonic_seconds, PifanError, Result, SharedStatus, StopSignal};
use pf_protocol::{HttpReply, StateReport};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

/// Maximum concurrent client connections
const MAX_CONNECTIONS: usize = 16;

/// Maximum size of request line plus headers
const MAX_HEAD_SIZE: usize = 8 * 1024;

/// Read timeout for the request head
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Write timeout for the reply
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bind the listening socket.
///
/// With `remove_stale` an existing file at `path` is removed first, unless it
/// is a symlink. `mode` is applied to the socket file after binding.
pub fn bind(path: &Path, remove_stale: bool, mode: Option<u32>) -> Result<UnixListener> {
    if remove_stale {
        match path.symlink_metadata() {
            Ok(metadata) => {
                if metadata.file_type().is_symlink() {
                    return Err(PifanError::server(format!(
                        "Socket path {} is a symlink, refusing to remove it",
                        path.display()
                    )));
                }
                fs::remove_file(path)?;
                debug!(path = %path.display(), "Removed existing socket file");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    let listener = UnixListener::bind(path)
        .map_err(|e| PifanError::server(format!("Can't bind {}: {}", path.display(), e)))?;

    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }

    info!(path = %path.display(), mode = ?mode.map(|m| format!("{:o}", m)), "Listening");
    Ok(listener)
}

/// Serve until `stop` is set
pub async fn serve(listener: UnixListener, status: Arc<SharedStatus>, stop: StopSignal) {
    let active = Arc::new(AtomicUsize::new(0));

    while !stop.is_stopped() {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let current = active.load(Ordering::SeqCst);
                        if current >= MAX_CONNECTIONS {
                            warn!(current, "Connection limit reached, rejecting new connection");
                            drop(stream);
                            continue;
                        }

                        active.fetch_add(1, Ordering::SeqCst);
                        let active = active.clone();
                        let status = status.clone();
                        tokio::spawn(async move {
                            handle_client(stream, &status).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Accept error");
                    }
                }
            }
            _ = tokio::time::sleep(timing::STOP_POLL) => {}
        }
    }

    info!("Status server stopped");
}

/// Parsed request head
#[derive(Debug, PartialEq, Eq)]
struct RequestHead {
    method: String,
    target: String,
    has_body: bool,
}

async fn handle_client(stream: UnixStream, status: &SharedStatus) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let reply = match timeout(READ_TIMEOUT, read_head(&mut reader)).await {
        Ok(Ok(Some(head))) => {
            trace!(method = %head.method, target = %head.target, "Request");
            pf_protocol::route(&head.method, &head.target, head.has_body, || state_report(status))
        }
        Ok(Ok(None)) => return,
        Ok(Err(e)) => {
            debug!(error = %e, "Malformed request");
            HttpReply::bad_request()
        }
        Err(_) => {
            debug!("Read timeout");
            return;
        }
    };

    let bytes = render(&reply);
    let write_result = timeout(WRITE_TIMEOUT, async {
        writer.write_all(&bytes).await?;
        writer.shutdown().await
    })
    .await;

    match write_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Write error"),
        Err(_) => debug!("Write timeout"),
    }
}

fn state_report(status: &SharedStatus) -> StateReport {
    let snap = status.snapshot();
    StateReport::new(
        monotonic_seconds(),
        snap.temp_real,
        snap.temp_fixed,
        snap.speed,
        snap.pwm,
        snap.ok,
        snap.last_fail_ts,
        status.has_hall(),
        snap.rpm,
    )
}

fn render(reply: &HttpReply) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        reply.status,
        reply.reason,
        reply.content_type,
        reply.body.len()
    )
    .into_bytes();
    out.extend_from_slice(reply.body.as_bytes());
    out
}

/// Read the request line and headers; `None` if the peer sent nothing
async fn read_head<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<RequestHead>> {
    let mut line = Vec::with_capacity(256);
    let mut budget = MAX_HEAD_SIZE;

    let n = read_line_bounded(reader, &mut line, budget).await?;
    if n == 0 {
        return Ok(None);
    }
    budget -= n;

    let request_line = String::from_utf8_lossy(&line);
    let mut parts = request_line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v)) => (m.to_string(), t.to_string(), v),
        _ => return Err(io::Error::new(io::ErrorKind::InvalidData, "Bad request line")),
    };
    if !version.starts_with("HTTP/1.") {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "Unsupported HTTP version"));
    }

    let mut has_body = false;
    loop {
        let n = read_line_bounded(reader, &mut line, budget).await?;
        if n == 0 {
            break;
        }
        budget -= n;

        let header = String::from_utf8_lossy(&line);
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                has_body |= value.parse::<u64>().map_or(true, |len| len > 0);
            } else if name.eq_ignore_ascii_case("transfer-encoding") {
                has_body = true;
            }
        }
    }

    Ok(Some(RequestHead {
        method,
        target,
        has_body,
    }))
}

async fn read_line_bounded<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(out.len());
        }

        let mut take_len = available.len();
        let mut found_newline = false;
        if let Some(pos) = available.iter().position(|b| *b == b'\n') {
            take_len = pos + 1;
            found_newline = true;
        }

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(io::Error::new(io::ErrorKind::InvalidData, "Request head too large"));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_core::StatusSnapshot;
    use tokio::io::AsyncReadExt;

    async fn request(path: &Path, raw: &str) -> String {
        let mut stream = UnixStream::connect(path).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    fn body(response: &str) -> &str {
        response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap()
    }

    async fn start(status: Arc<SharedStatus>) -> (tempfile::TempDir, std::path::PathBuf, StopSignal) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pifan.sock");
        let listener = bind(&path, false, Some(0o660)).unwrap();
        let stop = StopSignal::new();
        tokio::spawn(serve(listener, status, stop.clone()));
        (dir, path, stop)
    }

    #[tokio::test]
    async fn test_state_round_trip() {
        let status = Arc::new(SharedStatus::new(true));
        status.publish(StatusSnapshot {
            temp_real: 52.5,
            temp_fixed: 51.0,
            speed: 35.5,
            pwm: 364,
            rpm: 1650,
            ok: false,
            last_fail_ts: Some(321.25),
        });
        let (_dir, path, stop) = start(status).await;

        let response = request(&path, "GET /state HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Type: application/json\r\n"));

        let value: serde_json::Value = serde_json::from_str(body(&response)).unwrap();
        let result = &value["result"];
        assert_eq!(value["ok"], true);
        assert_eq!(result["temp"]["real"], 52.5);
        assert_eq!(result["temp"]["fixed"], 51.0);
        assert_eq!(result["fan"]["speed"], 35.5);
        assert_eq!(result["fan"]["pwm"], 364);
        assert_eq!(result["fan"]["ok"], false);
        assert_eq!(result["fan"]["last_fail_ts"], 321.25);
        assert_eq!(result["hall"]["available"], true);
        assert_eq!(result["hall"]["rpm"], 1650);
        assert!(result["service"]["now_ts"].as_f64().unwrap() > 0.0);
        stop.stop();
    }

    #[tokio::test]
    async fn test_version_and_not_found() {
        let (_dir, path, stop) = start(Arc::new(SharedStatus::new(false))).await;

        let response = request(&path, "GET / HTTP/1.0\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(body(&response).contains(pf_protocol::VERSION));

        let response = request(&path, "GET /nope HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found"));
        assert_eq!(body(&response), "Not found\n");
        stop.stop();
    }

    #[tokio::test]
    async fn test_rejects_methods_and_bodies() {
        let (_dir, path, stop) = start(Arc::new(SharedStatus::new(false))).await;

        let response = request(&path, "POST /state HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 405"));

        let response = request(&path, "GET /state HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcd").await;
        assert!(response.starts_with("HTTP/1.1 405"));

        let response = request(&path, "garbage\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 400"));
        stop.stop();
    }

    #[tokio::test]
    async fn test_socket_mode_applied() {
        let (_dir, path, stop) = start(Arc::new(SharedStatus::new(false))).await;
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o660);
        stop.stop();
    }

    #[tokio::test]
    async fn test_stale_socket_removed_but_not_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        fs::write(&path, b"").unwrap();
        assert!(bind(&path, false, None).is_err());
        assert!(bind(&path, true, None).is_ok());

        let target = dir.path().join("target");
        fs::write(&target, b"keep").unwrap();
        let link = dir.path().join("link.sock");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        assert!(matches!(bind(&link, true, None), Err(PifanError::Server(_))));
        assert_eq!(fs::read(&target).unwrap(), b"keep");
    }

    #[tokio::test]
    async fn test_serve_returns_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let listener = bind(&dir.path().join("s.sock"), false, None).unwrap();
        let stop = StopSignal::new();
        stop.stop();
        timeout(Duration::from_secs(2), serve(listener, Arc::new(SharedStatus::new(false)), stop))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_head_size_is_bounded() {
        let mut raw = b"GET /".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_HEAD_SIZE * 2));
        raw.extend_from_slice(b" HTTP/1.1\r\n\r\n");
        let mut reader = BufReader::new(&raw[..]);
        let err = read_head(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_head_parsing() {
        let raw = b"GET /state?x=1 HTTP/1.1\r\nHost: a\r\ncontent-length: 0\r\n\r\n";
        let mut reader = BufReader::new(&raw[..]);
        let head = read_head(&mut reader).await.unwrap().unwrap();
        assert_eq!(
            head,
            RequestHead {
                method: "GET".into(),
                target: "/state?x=1".into(),
                has_body: false,
            }
        );

        let mut empty = BufReader::new(&b""[..]);
        assert!(read_head(&mut empty).await.unwrap().is_none());
    }
}
