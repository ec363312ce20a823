//! Listener and factory capabilities, and configuration-selected dispatch

use std::future::Future;

use crate::config::{TransportConfig, TransportKind};
use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::memory::{MemoryListener, MemoryTransport};
use crate::tcp::{TcpListener, TcpTransport};

/// Lifecycle of a bound listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Listening,
    Stopped,
}

/// Accepts incoming connections on a bound endpoint
///
/// `accept` and `stop` take `&self`: one task may stop the listener while
/// another is suspended in `accept`, which then fails with
/// `TransportError::ListenerClosed`.
pub trait ConnectionListener: Send + Sync + 'static {
    fn local_endpoint(&self) -> &Endpoint;

    fn state(&self) -> ListenerState;

    /// Wait for the next connection
    fn accept(&self) -> impl Future<Output = Result<Connection, TransportError>> + Send + '_;

    /// Unbind; idempotent
    fn stop(&self);
}

/// Binds listeners
pub trait ListenerFactory: Send + Sync {
    type Listener: ConnectionListener;

    fn listen<'a>(
        &'a self,
        endpoint: &'a Endpoint,
    ) -> impl Future<Output = Result<Self::Listener, TransportError>> + Send + 'a;
}

/// Opens outbound connections
pub trait ConnectionFactory: Send + Sync {
    fn connect<'a>(
        &'a self,
        endpoint: &'a Endpoint,
    ) -> impl Future<Output = Result<Connection, TransportError>> + Send + 'a;
}

/// Transport chosen by `TransportConfig::kind`
#[derive(Debug, Clone)]
pub enum AnyTransport {
    Memory(MemoryTransport),
    Tcp(TcpTransport),
}

impl AnyTransport {
    #[must_use]
    pub fn from_config(config: &TransportConfig) -> Self {
        match config.kind {
            TransportKind::Memory => Self::Memory(MemoryTransport::new(config.clone())),
            TransportKind::Tcp => Self::Tcp(TcpTransport::new(config.clone())),
        }
    }

    #[must_use]
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Memory(_) => TransportKind::Memory,
            Self::Tcp(_) => TransportKind::Tcp,
        }
    }
}

/// Listener of an [`AnyTransport`]
#[derive(Debug)]
pub enum AnyListener {
    Memory(MemoryListener),
    Tcp(TcpListener),
}

impl ListenerFactory for AnyTransport {
    type Listener = AnyListener;

    async fn listen<'a>(&'a self, endpoint: &'a Endpoint) -> Result<AnyListener, TransportError> {
        match self {
            Self::Memory(t) => t.listen(endpoint).await.map(AnyListener::Memory),
            Self::Tcp(t) => t.listen(endpoint).await.map(AnyListener::Tcp),
        }
    }
}

impl ConnectionFactory for AnyTransport {
    async fn connect<'a>(&'a self, endpoint: &'a Endpoint) -> Result<Connection, TransportError> {
        match self {
            Self::Memory(t) => t.connect(endpoint).await,
            Self::Tcp(t) => t.connect(endpoint).await,
        }
    }
}

impl ConnectionListener for AnyListener {
    fn local_endpoint(&self) -> &Endpoint {
        match self {
            Self::Memory(l) => l.local_endpoint(),
            Self::Tcp(l) => l.local_endpoint(),
        }
    }

    fn state(&self) -> ListenerState {
        match self {
            Self::Memory(l) => l.state(),
            Self::Tcp(l) => l.state(),
        }
    }

    async fn accept(&self) -> Result<Connection, TransportError> {
        match self {
            Self::Memory(l) => l.accept().await,
            Self::Tcp(l) => l.accept().await,
        }
    }

    fn stop(&self) {
        match self {
            Self::Memory(l) => l.stop(),
            Self::Tcp(l) => l.stop(),
        }
    }
}
