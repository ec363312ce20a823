//! Transport configuration, loaded from JSON

use serde::Deserialize;
use std::path::Path;

use crate::error::ConfigError;
use crate::pipe::PipeOptions;
use crate::tcp::TcpOptions;

/// Which transport serves listeners and connections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Memory,
    Tcp,
}

/// Example:
///
/// ```json
/// {
///   "kind": "memory",
///   "accept_backlog": 16,
///   "pipe": { "max_buffer_size": 65536 }
/// }
/// ```
///
/// Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// Buffering of every pipe a transport creates
    pub pipe: PipeOptions,
    /// Connections queued per listener before `connect` is refused
    pub accept_backlog: usize,
    pub tcp: TcpOptions,
}

impl TransportConfig {
    pub const DEFAULT_ACCEPT_BACKLOG: usize = 128;

    /// Creates a new `TransportConfig` by reading JSON from a reader.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - There are I/O errors reading from the provided reader
    /// - The JSON input is invalid or malformed
    /// - The values are inconsistent (see `validate`)
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Same as `from_reader`
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Same as `from_reader`, plus failure to open the file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// # Errors
    /// `ConfigError::Invalid` for bad pipe thresholds or a zero backlog
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipe.validate()?;
        if self.accept_backlog == 0 {
            return Err(ConfigError::Invalid(
                "accept_backlog must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            pipe: PipeOptions::default(),
            accept_backlog: Self::DEFAULT_ACCEPT_BACKLOG,
            tcp: TcpOptions::default(),
        }
    }
}
