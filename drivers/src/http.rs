//! HTTP/1.1 over a connection's stream view, driven by `hyper`
//!
//! A fixed "Hello World" server and a small keep-alive client. Both sides
//! read through a buffer of [`MAX_HEAD_SIZE`] bytes, so no message head can
//! grow past it; bodies are bounded by [`MAX_BODY_SIZE`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body as _, Incoming};
use hyper::client::conn::http1::SendRequest;
use hyper::header::{HeaderMap, CONNECTION, HOST};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, Version};
use hyper_util::rt::TokioIo;
use pipenet::Connection;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::DriverError;

/// Read buffer of server and client; a head that does not fit gets a 431
pub const MAX_HEAD_SIZE: usize = 8 * 1024;

/// Largest request body the server accepts (413 beyond) and largest
/// response body the client collects
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

const HELLO_BODY: &str = "Hello World";

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("HTTP protocol error: {0}")]
    Protocol(#[from] hyper::Error),

    #[error("Invalid request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("Response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("Response body error: {0}")]
    Body(String),
}

impl HttpError {
    /// The peer closed the connection before a complete message
    #[must_use]
    pub fn is_incomplete_message(&self) -> bool {
        matches!(self, Self::Protocol(e) if e.is_incomplete_message())
    }
}

type HelloResponse = Response<Full<Bytes>>;

fn refuse(status: StatusCode) -> Result<HelloResponse, HttpError> {
    Ok(Response::builder()
        .status(status)
        .header(CONNECTION, "close")
        .body(Full::new(Bytes::new()))?)
}

async fn hello(
    req: Request<Incoming>,
    answered: Arc<AtomicU64>,
) -> Result<HelloResponse, HttpError> {
    info!(method = %req.method(), uri = %req.uri(), "http request");
    answered.fetch_add(1, Ordering::Relaxed);

    let limit = MAX_BODY_SIZE as u64;
    if let Some(declared) = req.body().size_hint().upper().filter(|len| *len > limit) {
        warn!(declared, limit, "request body too large");
        return refuse(StatusCode::PAYLOAD_TOO_LARGE);
    }

    // The body is not used: drop each frame as it arrives
    let mut body = req.into_body();
    let mut discarded: u64 = 0;
    while let Some(frame) = body.frame().await {
        if let Ok(data) = frame?.into_data() {
            discarded += data.len() as u64;
        }
        if discarded > limit {
            warn!(discarded, limit, "chunked request body too large");
            return refuse(StatusCode::PAYLOAD_TOO_LARGE);
        }
    }

    Ok(Response::new(Full::new(Bytes::from_static(HELLO_BODY.as_bytes()))))
}

/// Answer every request on the connection with `200 OK` "Hello World"
///
/// Keeps the connection alive until the client ends its output or sends
/// `Connection: close`. Returns the number of requests answered.
///
/// # Errors
/// A malformed or oversized request head; the client gets a 400 or 431 first
pub async fn serve_hello(connection: Connection) -> Result<u64, DriverError> {
    let id = connection.id();
    let answered = Arc::new(AtomicU64::new(0));
    let service = {
        let answered = Arc::clone(&answered);
        service_fn(move |req| hello(req, Arc::clone(&answered)))
    };

    let mut builder = hyper::server::conn::http1::Builder::new();
    builder.max_buf_size(MAX_HEAD_SIZE);
    let served = builder
        .serve_connection(TokioIo::new(connection.into_stream()), service)
        .await;

    let answered = answered.load(Ordering::Relaxed);
    served.map_err(HttpError::from)?;
    debug!(connection = %id, answered, "http connection finished");
    Ok(answered)
}

/// Response collected by [`HttpClient`]
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub version: Version,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    /// Value of the header `name`, if present and visible ASCII
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

impl fmt::Display for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:?} {}", self.version, self.status)?;
        for (name, value) in &self.headers {
            writeln!(f, "{name}: {}", String::from_utf8_lossy(value.as_bytes()))?;
        }
        writeln!(f)?;
        write!(f, "{}", String::from_utf8_lossy(&self.body))
    }
}

fn body_error(err: Box<dyn std::error::Error + Send + Sync>) -> HttpError {
    if err.is::<LengthLimitError>() {
        return HttpError::BodyTooLarge {
            limit: MAX_BODY_SIZE,
        };
    }
    match err.downcast::<hyper::Error>() {
        Ok(err) => HttpError::Protocol(*err),
        Err(err) => HttpError::Body(err.to_string()),
    }
}

/// Keep-alive HTTP/1.1 client on one connection
///
/// The protocol state machine runs on a spawned task until the client is
/// closed or the server hangs up.
pub struct HttpClient {
    sender: SendRequest<Full<Bytes>>,
    driver: JoinHandle<()>,
    host: String,
}

impl HttpClient {
    /// # Errors
    /// The HTTP/1.1 handshake failed
    pub async fn handshake(connection: Connection, host: &str) -> Result<Self, HttpError> {
        let id = connection.id();
        let mut builder = hyper::client::conn::http1::Builder::new();
        builder.max_buf_size(MAX_HEAD_SIZE);
        let (sender, conn) = builder
            .handshake(TokioIo::new(connection.into_stream()))
            .await?;

        let driver = tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(connection = %id, error = %e, "http client connection ended");
            }
        });
        Ok(Self {
            sender,
            driver,
            host: host.to_string(),
        })
    }

    /// Send `GET path` and collect the response
    ///
    /// # Errors
    /// - `Protocol` if the server goes away before a full response or sends garbage
    /// - `BodyTooLarge` for a body over [`MAX_BODY_SIZE`]
    pub async fn get(&mut self, path: &str) -> Result<HttpResponse, HttpError> {
        self.sender.ready().await?;
        let request = Request::get(path)
            .header(HOST, self.host.as_str())
            .body(Full::new(Bytes::new()))?;
        let response = self.sender.send_request(request).await?;

        let (parts, body) = response.into_parts();
        let body = Limited::new(body, MAX_BODY_SIZE)
            .collect()
            .await
            .map_err(body_error)?
            .to_bytes();
        debug!(status = %parts.status, body = body.len(), "http response");
        Ok(HttpResponse {
            version: parts.version,
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    /// Release the connection and wait for the protocol task
    pub async fn close(self) {
        drop(self.sender);
        if let Err(e) = self.driver.await {
            warn!(error = %e, "http client task failed");
        }
    }
}

/// One `GET path` on a fresh client, then close it
///
/// # Errors
/// See [`HttpClient::handshake`] and [`HttpClient::get`]
pub async fn http_get(
    connection: Connection,
    host: &str,
    path: &str,
) -> Result<HttpResponse, HttpError> {
    let mut client = HttpClient::handshake(connection, host).await?;
    let response = client.get(path).await;
    client.close().await;
    response
}
