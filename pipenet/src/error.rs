//! Error types for pipes, transports and configuration

use crate::endpoint::Endpoint;

/// Errors reported by pipe readers and writers
///
/// End-of-data is not an error: it is reported through
/// [`ReadResult::is_completed`](crate::pipe::ReadResult).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipeError {
    #[error("Writer is completed")]
    WriterCompleted,

    #[error("Reader is completed")]
    ReaderCompleted,

    #[error("Pipe buffer is full: {requested} bytes requested, {available} of {max} available")]
    BufferFull {
        requested: usize,
        available: usize,
        max: usize,
    },

    #[error("Cannot advance {requested} bytes, only {buffered} buffered")]
    InvalidAdvance { requested: usize, buffered: usize },

    #[error("Pipe aborted: {reason}")]
    Aborted { reason: String },
}

impl PipeError {
    #[must_use]
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }
}

/// Errors reported by listeners, connection factories and upgrades
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Address already in use: {0}")]
    AddressInUse(Endpoint),

    #[error("Connection refused: {0}")]
    ConnectionRefused(Endpoint),

    #[error("Listener is closed")]
    ListenerClosed,

    #[error("Accept backlog is full: {0}")]
    BacklogFull(Endpoint),

    #[error("Endpoint is not supported by this transport: {0}")]
    UnsupportedEndpoint(Endpoint),

    #[error("Handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("Pipe error: {0}")]
    Pipe(#[from] PipeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<PipeError> for std::io::Error {
    fn from(err: PipeError) -> Self {
        let kind = match err {
            PipeError::WriterCompleted | PipeError::ReaderCompleted => {
                std::io::ErrorKind::BrokenPipe
            }
            PipeError::BufferFull { .. } => std::io::ErrorKind::WouldBlock,
            PipeError::InvalidAdvance { .. } => std::io::ErrorKind::InvalidInput,
            PipeError::Aborted { .. } => std::io::ErrorKind::ConnectionAborted,
        };
        std::io::Error::new(kind, err)
    }
}

impl embedded_io_async::Error for PipeError {
    fn kind(&self) -> embedded_io_async::ErrorKind {
        match self {
            Self::WriterCompleted | Self::ReaderCompleted => embedded_io_async::ErrorKind::BrokenPipe,
            Self::BufferFull { .. } => embedded_io_async::ErrorKind::Other,
            Self::InvalidAdvance { .. } => embedded_io_async::ErrorKind::InvalidInput,
            Self::Aborted { .. } => embedded_io_async::ErrorKind::ConnectionAborted,
        }
    }
}
