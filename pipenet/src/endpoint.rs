//! Addresses of listeners and connections

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

const MEMORY_SCHEME: &str = "memory://";
const TCP_SCHEME: &str = "tcp://";

/// Where a listener is bound, or where a connection leads
///
/// Endpoints compare by value: two connects to `Memory("default")` reach the
/// same in-memory listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Named endpoint of the in-memory transport
    Memory(String),
    /// Socket address of the TCP transport
    Tcp(SocketAddr),
}

impl Endpoint {
    #[must_use]
    pub fn memory(name: impl Into<String>) -> Self {
        Self::Memory(name.into())
    }

    #[must_use]
    pub fn tcp(addr: SocketAddr) -> Self {
        Self::Tcp(addr)
    }

    /// Name of an in-memory endpoint
    #[must_use]
    pub fn as_memory(&self) -> Option<&str> {
        match self {
            Self::Memory(name) => Some(name),
            Self::Tcp(_) => None,
        }
    }

    #[must_use]
    pub fn as_tcp(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(addr) => Some(*addr),
            Self::Memory(_) => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory(name) => write!(f, "{MEMORY_SCHEME}{name}"),
            Self::Tcp(addr) => write!(f, "{TCP_SCHEME}{addr}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid endpoint '{input}': {reason}")]
pub struct ParseEndpointError {
    input: String,
    reason: String,
}

/// Accepts `memory://name`, `tcp://host:port`, a bare socket address (tcp)
/// or a bare name (memory).
impl FromStr for Endpoint {
    type Err = ParseEndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| ParseEndpointError {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        if let Some(name) = s.strip_prefix(MEMORY_SCHEME) {
            if name.is_empty() {
                return Err(err("empty memory endpoint name"));
            }
            return Ok(Self::Memory(name.to_string()));
        }
        if let Some(addr) = s.strip_prefix(TCP_SCHEME) {
            return addr
                .parse()
                .map(Self::Tcp)
                .map_err(|e| err(&e.to_string()));
        }
        if s.is_empty() {
            return Err(err("empty endpoint"));
        }
        if s.contains("://") {
            return Err(err("unknown scheme"));
        }
        Ok(s.parse::<SocketAddr>()
            .map_or_else(|_| Self::Memory(s.to_string()), Self::Tcp))
    }
}
