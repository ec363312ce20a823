use pipenet::{PipeError, TransportError};

use crate::http::HttpError;

/// Failure of a single connection handler
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Pipe error: {0}")]
    Pipe(#[from] PipeError),

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Local stream error: {0}")]
    Io(#[from] std::io::Error),
}
