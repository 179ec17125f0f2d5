//! C6: protocol adapter — HTTP request construction, response classification,
//! body drain.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;

use crate::error::PacerError;
use crate::operation::Method;

/// Everything needed to construct one outgoing request.
pub struct RequestSpec {
    pub seq: u64,
    pub method: Method,
    pub url: String,
    pub host_header: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

/// Result of a completed request, carried back to the read state machine.
/// `status == 0` signals "no connection" — a failed connect attempt folds
/// into this uniform shape rather than surfacing as `Err` from
/// `Transport::send_request`, so classification of that one case still
/// lives in `classify_status`/`dispatch_response` alongside every other
/// status code. Failures *after* a connection is established take the
/// `Err` path instead (see `Transport::send_request`).
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub seq: u64,
    pub method: Method,
    pub status: u16,
    pub rx_bytes: u64,
}

/// Outcome of classifying a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    Miss,
    ConnectionRefused,
    Unknown,
}

pub fn classify_status(status: u16) -> Classification {
    match status {
        0 => Classification::ConnectionRefused,
        200 | 202 => Classification::Success,
        204 | 301 | 302 | 304 | 400 | 404 | 405 | 413 | 417 | 500 | 501 | 503 => {
            Classification::Miss
        }
        _ => Classification::Unknown,
    }
}

/// The HTTP transport contract a `Connection` drives requests through.
/// `setup_connection_w`/`setup_connection_r` exist for a two-phase
/// handshake hook a raw-protocol transport could use; the HTTP transport's
/// implementation is a no-op that reports "ready" immediately, since its
/// handshake is entirely inside `reqwest`'s connection pool.
///
/// `Err` is reserved for a `TransportError` — an underlying error or
/// unexpected EOF while an op is outstanding, distinct from a failed
/// connect attempt, which is reported as `Ok(status = 0)` instead so the
/// read state machine can classify it as `ConnectRefused`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send_request(&self, spec: RequestSpec) -> Result<ResponseEvent, PacerError>;

    fn setup_connection_w(&self) -> bool {
        true
    }

    fn setup_connection_r(&self) -> bool {
        true
    }
}

/// Maximum bytes drained from a single response body before giving up —
/// bodies are drained for byte-count only, never validated.
const MAX_DRAIN_BYTES: u64 = 16 * 1024 * 1024;

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// `no_nodelay`: when true, Nagle's algorithm is left enabled instead
    /// of disabled.
    pub fn new(no_nodelay: bool) -> Result<Self, PacerError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .tcp_nodelay(!no_nodelay)
            .build()
            .map_err(PacerError::Request)?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send_request(&self, spec: RequestSpec) -> Result<ResponseEvent, PacerError> {
        let method = match spec.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };

        let mut builder = self
            .client
            .request(method, &spec.url)
            .header("Host", spec.host_header)
            .header("Connection", "close");

        for (name, value) in &spec.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = spec.body {
            builder = builder.body(body);
        }

        let response = match builder.send().await {
            Ok(resp) => resp,
            Err(e) if e.is_connect() => {
                // Failed to establish a connection at all: report as
                // status 0, the read state machine classifies this as
                // `ConnectRefused`, not a `TransportError`.
                return Ok(ResponseEvent {
                    seq: spec.seq,
                    method: spec.method,
                    status: 0,
                    rx_bytes: 0,
                });
            }
            Err(e) => {
                // A connected request that failed mid-flight (timeout,
                // reset, malformed response): fatal, distinct from a
                // failed connect attempt.
                return Err(PacerError::TransportError(e.to_string()));
            }
        };

        let status = response.status().as_u16();
        let rx_bytes = drain_body(response).await?;

        Ok(ResponseEvent {
            seq: spec.seq,
            method: spec.method,
            status,
            rx_bytes,
        })
    }
}

/// Drain a response body, counting bytes, discarding contents. An error or
/// unexpected EOF mid-body is an outstanding-op transport failure, not
/// silently ignored.
async fn drain_body(response: reqwest::Response) -> Result<u64, PacerError> {
    let mut stream = response.bytes_stream();
    let mut total: u64 = 0;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                total += bytes.len() as u64;
                if total >= MAX_DRAIN_BYTES {
                    break;
                }
            }
            Err(e) => return Err(PacerError::TransportError(e.to_string())),
        }
    }
    Ok(total)
}
