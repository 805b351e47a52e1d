//! Liveness endpoint.
//!
//! Every connection gets `200 OK`, whatever its method, path or framing. HTTP
//! requests go through an axum router served by hyper with half-close enabled,
//! so a client that shuts down its write side still gets its answer. Anything
//! that does not open with an HTTP/1.x request line gets a fixed response
//! written straight to the socket. The server shares nothing mutable with the
//! bot; its failures are logged and stay here.

use std::io::Cursor;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{HealthConfig, HealthFormat};

/// Bytes read while looking for the request line.
const REQUEST_LINE_LIMIT: usize = 1024;
/// Bytes discarded from a non-HTTP peer before answering.
const DRAIN_LIMIT: usize = 16 * 1024;
/// How long a silent peer may hold a connection before it is answered anyway.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct HealthState {
    format: HealthFormat,
    service: String,
}

#[derive(Serialize)]
struct StatusBody<'a> {
    status: &'static str,
    service: &'a str,
    timestamp: String,
}

/// Content type and body for one health answer.
fn render(state: &HealthState) -> (&'static str, String) {
    match state.format {
        HealthFormat::Plain => ("text/plain; charset=utf-8", "running".to_string()),
        HealthFormat::Json => {
            let body = StatusBody {
                status: "ok",
                service: &state.service,
                timestamp: chrono::Utc::now().to_rfc3339(),
            };
            let json = serde_json::to_string(&body)
                .unwrap_or_else(|_| r#"{"status":"ok"}"#.to_string());
            ("application/json", json)
        }
    }
}

async fn status(State(state): State<HealthState>) -> Response {
    let (content_type, body) = render(&state);
    (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response()
}

pub struct HealthServer {
    listener: TcpListener,
    state: HealthState,
}

impl HealthServer {
    pub async fn bind(addr: SocketAddr, format: HealthFormat, service: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind health endpoint to {addr}"))?;
        Ok(Self {
            listener,
            state: HealthState {
                format,
                service: service.to_string(),
            },
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Health listener has no local address")
    }

    /// Accept until `shutdown` is cancelled. Each connection runs on its own task.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let app = Router::new().fallback(status).with_state(self.state.clone());

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        // Usually fd exhaustion; back off instead of spinning.
                        warn!("Health endpoint accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };

            let app = app.clone();
            let state = self.state.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, app, &state).await {
                    debug!(%peer, "Health connection ended: {:#}", e);
                }
            });
        }
    }
}

async fn handle_connection(stream: TcpStream, app: Router, state: &HealthState) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut head = Vec::with_capacity(256);
    let finished = read_request_line(&mut reader, &mut head).await?;

    if is_http_request_line(&head) {
        // Replay what was already read, then hand the socket to hyper.
        let io = tokio::io::join(Cursor::new(head).chain(reader), writer);
        http1::Builder::new()
            .half_close(true)
            .serve_connection(TokioIo::new(io), TowerToHyperService::new(app))
            .await
            .context("HTTP connection error")?;
        return Ok(());
    }

    if !finished {
        drain(&mut reader, &mut head).await;
    }
    let (content_type, body) = render(state);
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    writer.write_all(response.as_bytes()).await?;
    writer.shutdown().await?;
    Ok(())
}

/// Read until the first line ends, the limit is hit, the peer closes, or the
/// peer goes quiet. Returns `true` when nothing more should be read.
async fn read_request_line<R>(reader: &mut R, head: &mut Vec<u8>) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 512];
    let read = async {
        loop {
            if head.contains(&b'\n') || head.len() >= REQUEST_LINE_LIMIT {
                return Ok::<_, std::io::Error>(false);
            }
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(true);
            }
            head.extend_from_slice(&buf[..n]);
        }
    };
    match tokio::time::timeout(READ_TIMEOUT, read).await {
        Ok(result) => Ok(result?),
        Err(_) => Ok(true),
    }
}

/// Discard input up to a blank line, EOF, the drain limit or the read timeout.
async fn drain<R>(reader: &mut R, head: &mut Vec<u8>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 1024];
    let read = async {
        while !head.windows(4).any(|w| w == b"\r\n\r\n") && head.len() < DRAIN_LIMIT {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => head.extend_from_slice(&buf[..n]),
            }
        }
    };
    let _ = tokio::time::timeout(READ_TIMEOUT, read).await;
}

// "GET /path HTTP/1.1" -> true. Requires a complete first line.
fn is_http_request_line(head: &[u8]) -> bool {
    let Some(end) = head.iter().position(|b| *b == b'\n') else {
        return false;
    };
    let line = String::from_utf8_lossy(&head[..end]);
    let mut parts = line.trim_end_matches('\r').split(' ');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version), None) => {
            !method.is_empty()
                && method.bytes().all(|b| b.is_ascii_uppercase())
                && !target.is_empty()
                && version.starts_with("HTTP/1.")
        }
        _ => false,
    }
}

async fn bind_and_serve(config: HealthConfig, shutdown: CancellationToken) -> Result<()> {
    let addr = config.socket_addr()?;
    let server = HealthServer::bind(addr, config.format, &config.service).await?;
    info!("Health endpoint listening on {}", server.local_addr()?);
    server.serve(shutdown).await
}

/// Bind and serve on a background task. Errors are logged, never returned.
pub fn spawn(config: &HealthConfig, shutdown: CancellationToken) -> JoinHandle<()> {
    let config = config.clone();
    tokio::spawn(async move {
        if let Err(e) = bind_and_serve(config, shutdown).await {
            error!("Health endpoint stopped: {:#}", e);
        }
    })
}
