//! TCP transport over `tokio::net`
//!
//! Sockets become connections through `Connection::from_stream`; callers see
//! the same pipe surface as with the in-memory transport.

use serde::Deserialize;
use socket2::SockRef;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tracing::{debug, info};

use crate::config::TransportConfig;
use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::idgen::Handle;
use crate::notification_queue::NotificationQueueArc;
use crate::properties::ConnectionProperties;
use crate::transport::{ConnectionFactory, ConnectionListener, ListenerFactory, ListenerState};

/// Socket options applied to every accepted or connected stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TcpOptions {
    /// `TCP_NODELAY`
    pub nodelay: bool,
    /// `SO_RCVBUF`, OS default if unset
    pub recv_buffer_size: Option<usize>,
    /// `SO_SNDBUF`, OS default if unset
    pub send_buffer_size: Option<usize>,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            recv_buffer_size: None,
            send_buffer_size: None,
        }
    }
}

impl TcpOptions {
    /// # Errors
    /// The OS rejected an option
    pub fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        let sock = SockRef::from(stream);
        if let Some(size) = self.recv_buffer_size {
            sock.set_recv_buffer_size(size)?;
        }
        if let Some(size) = self.send_buffer_size {
            sock.set_send_buffer_size(size)?;
        }
        Ok(())
    }
}

/// Peer address of a TCP connection, stored in its properties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

fn map_io_error(err: io::Error, endpoint: &Endpoint) -> TransportError {
    match err.kind() {
        io::ErrorKind::AddrInUse => TransportError::AddressInUse(endpoint.clone()),
        io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused(endpoint.clone()),
        _ => TransportError::Io(err),
    }
}

fn tcp_addr(endpoint: &Endpoint) -> Result<SocketAddr, TransportError> {
    endpoint
        .as_tcp()
        .ok_or_else(|| TransportError::UnsupportedEndpoint(endpoint.clone()))
}

/// Listener and connection factory over TCP sockets
#[derive(Debug, Clone)]
pub struct TcpTransport {
    config: TransportConfig,
    queue: NotificationQueueArc,
}

impl TcpTransport {
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            queue: NotificationQueueArc::new(),
        }
    }

    fn wrap(&self, stream: TcpStream, local: SocketAddr, peer: SocketAddr) -> Connection {
        let mut properties = ConnectionProperties::new();
        properties.insert(PeerAddr(peer));
        Connection::from_stream(
            stream,
            properties,
            Endpoint::Tcp(local),
            Endpoint::Tcp(peer),
            self.config.pipe,
        )
    }
}

impl ListenerFactory for TcpTransport {
    type Listener = TcpListener;

    async fn listen<'a>(&'a self, endpoint: &'a Endpoint) -> Result<TcpListener, TransportError> {
        let addr = tcp_addr(endpoint)?;
        let listener = TokioTcpListener::bind(addr)
            .await
            .map_err(|e| map_io_error(e, endpoint))?;
        let local = Endpoint::Tcp(listener.local_addr()?);
        let id = Connection::next_id();
        self.queue.whitelist(id, &format!("tcp listener {local}"));
        info!(endpoint = %local, "listening");
        Ok(TcpListener {
            id,
            listener,
            local,
            transport: self.clone(),
            stopped: AtomicBool::new(false),
        })
    }
}

impl ConnectionFactory for TcpTransport {
    async fn connect<'a>(&'a self, endpoint: &'a Endpoint) -> Result<Connection, TransportError> {
        let addr = tcp_addr(endpoint)?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| map_io_error(e, endpoint))?;
        self.config.tcp.apply(&stream)?;
        let local = stream.local_addr()?;
        debug!(%endpoint, %local, "connected");
        Ok(self.wrap(stream, local, addr))
    }
}

/// Bound TCP listener; `local_endpoint` carries the actual port
///
/// `stop` fails pending and later accepts; the port is released when the
/// listener is dropped.
pub struct TcpListener {
    id: Handle,
    listener: TokioTcpListener,
    local: Endpoint,
    transport: TcpTransport,
    stopped: AtomicBool,
}

impl ConnectionListener for TcpListener {
    fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    fn state(&self) -> ListenerState {
        if self.stopped.load(Ordering::Acquire) {
            ListenerState::Stopped
        } else {
            ListenerState::Listening
        }
    }

    async fn accept(&self) -> Result<Connection, TransportError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(TransportError::ListenerClosed);
        }
        let queue = &self.transport.queue;
        let stopped = queue.wait_async(self.id, "tcp accept", queue.get_lock());
        let (stream, peer) = tokio::select! {
            biased;
            _ = stopped => return Err(TransportError::ListenerClosed),
            accepted = self.listener.accept() => accepted?,
        };
        self.transport.config.tcp.apply(&stream)?;
        let local = stream.local_addr()?;
        debug!(endpoint = %self.local, %peer, "accepted");
        Ok(self.transport.wrap(stream, local, peer))
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.transport.queue.unlist(self.id);
        info!(endpoint = %self.local, "stopped");
    }
}

impl fmt::Debug for TcpListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpListener")
            .field("endpoint", &self.local)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        self.stop();
    }
}
