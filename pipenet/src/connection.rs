//! A single bidirectional channel: pipe view, stream view, metadata

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tracing::debug;

use crate::duplex::DuplexPipe;
use crate::endpoint::Endpoint;
use crate::idgen::{Handle, IdGen};
use crate::pipe::{PipeOptions, PipeReader, PipeWriter};
use crate::properties::ConnectionProperties;
use crate::pump::{spawn_pumps, PumpTasks};

/// Buffer size of the in-process stream behind `into_stream`
const STREAM_BUFFER_SIZE: usize = 64 * 1024;

static CONNECTION_IDS: IdGen = IdGen::new();

/// Application side of a logical connection
///
/// Reading `input` yields what the peer sent; writing `output` sends to the
/// peer. Whether bytes travel over memory, TCP or TLS is invisible here.
///
/// Dropping a connection completes both pipe ends; `dispose` does the same
/// and also waits for the background copy tasks, if any.
pub struct Connection {
    id: Handle,
    pipe: DuplexPipe,
    local: Endpoint,
    remote: Endpoint,
    properties: ConnectionProperties,
    pumps: Option<PumpTasks>,
}

impl Connection {
    #[must_use]
    pub fn new(
        id: Handle,
        pipe: DuplexPipe,
        local: Endpoint,
        remote: Endpoint,
        properties: ConnectionProperties,
    ) -> Self {
        Self {
            id,
            pipe,
            local,
            remote,
            properties,
            pumps: None,
        }
    }

    /// Process-wide unique connection id
    #[must_use]
    pub fn next_id() -> Handle {
        CONNECTION_IDS.next_handle()
    }

    /// Wrap a byte stream: two spawned tasks copy between `stream` and a
    /// fresh pipe pair whose application side is the returned connection
    ///
    /// Must be called within a tokio runtime.
    pub fn from_stream<S>(
        stream: S,
        properties: ConnectionProperties,
        local: Endpoint,
        remote: Endpoint,
        options: PipeOptions,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::from_stream_with_id(Self::next_id(), stream, properties, local, remote, options)
    }

    pub(crate) fn from_stream_with_id<S>(
        id: Handle,
        stream: S,
        properties: ConnectionProperties,
        local: Endpoint,
        remote: Endpoint,
        options: PipeOptions,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (application, transport) = DuplexPipe::create_pair(options, options);
        let pumps = spawn_pumps(stream, transport, &format!("conn {id} stream"));
        Self {
            id,
            pipe: application,
            local,
            remote,
            properties,
            pumps: Some(pumps),
        }
    }

    #[must_use]
    pub fn id(&self) -> Handle {
        self.id
    }

    pub fn pipe_mut(&mut self) -> &mut DuplexPipe {
        &mut self.pipe
    }

    /// Bytes sent by the peer
    pub fn input(&mut self) -> &mut PipeReader {
        &mut self.pipe.input
    }

    /// Bytes for the peer
    pub fn output(&mut self) -> &mut PipeWriter {
        &mut self.pipe.output
    }

    #[must_use]
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    #[must_use]
    pub fn remote_endpoint(&self) -> &Endpoint {
        &self.remote
    }

    #[must_use]
    pub fn properties(&self) -> &ConnectionProperties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut ConnectionProperties {
        &mut self.properties
    }

    /// Classic stream view of this connection
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn into_stream(self) -> ConnectionStream {
        let (stream, pump_side) = tokio::io::duplex(STREAM_BUFFER_SIZE);
        let mut pumps = spawn_pumps(pump_side, self.pipe, &format!("conn {} view", self.id));
        if let Some(inner) = self.pumps {
            pumps.absorb(inner);
        }
        ConnectionStream {
            id: self.id,
            stream,
            local: self.local,
            remote: self.remote,
            properties: self.properties,
            pumps,
        }
    }

    /// Complete both directions and wait for background copy tasks
    ///
    /// A peer suspended in `read` observes end-of-data.
    pub async fn dispose(mut self) {
        debug!(id = %self.id, local = %self.local, remote = %self.remote, "dispose connection");
        self.pipe.complete();
        if let Some(pumps) = self.pumps.take() {
            pumps.join().await;
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// `AsyncRead + AsyncWrite` view of a [`Connection`]
///
/// Keeps the connection's endpoints and properties. Dropping the stream
/// ends the connection's output once buffered bytes are delivered.
pub struct ConnectionStream {
    id: Handle,
    stream: DuplexStream,
    local: Endpoint,
    remote: Endpoint,
    properties: ConnectionProperties,
    pumps: PumpTasks,
}

impl ConnectionStream {
    #[must_use]
    pub fn id(&self) -> Handle {
        self.id
    }

    #[must_use]
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    #[must_use]
    pub fn remote_endpoint(&self) -> &Endpoint {
        &self.remote
    }

    #[must_use]
    pub fn properties(&self) -> &ConnectionProperties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut ConnectionProperties {
        &mut self.properties
    }

    /// Whether the copy tasks behind this stream have finished
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.pumps.is_finished()
    }
}

impl fmt::Debug for ConnectionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStream")
            .field("id", &self.id)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for ConnectionStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for ConnectionStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
