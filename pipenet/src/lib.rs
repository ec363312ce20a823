pub mod config;
pub mod connection;
pub mod duplex;
pub mod endpoint;
pub mod error;
pub mod idgen;
pub mod memory;
pub mod notification_queue;
pub mod pipe;
pub mod properties;
pub mod pump;
pub mod tcp;
pub mod tls;
pub mod transport;

// Re-export idgen types for convenience
pub use idgen::{Handle, HandleType, IdGen, IntCanBeHandle};

// Re-export pipe types for convenience
pub use duplex::DuplexPipe;
pub use pipe::{FlushResult, Pipe, PipeOptions, PipeReader, PipeWriter, ReadCanceller, ReadResult};

// Re-export connection types
pub use connection::{Connection, ConnectionStream};
pub use endpoint::{Endpoint, ParseEndpointError};
pub use properties::ConnectionProperties;

// Re-export transports
pub use memory::{MemoryListener, MemoryTransport};
pub use tcp::{PeerAddr, TcpListener, TcpOptions, TcpTransport};
pub use transport::{
    AnyListener, AnyTransport, ConnectionFactory, ConnectionListener, ListenerFactory,
    ListenerState,
};

// Re-export upgrades
pub use tls::{self_signed, ConnectionUpgrade, Plain, TlsClient, TlsInfo, TlsRole, TlsServer};

pub use config::{TransportConfig, TransportKind};
pub use error::{ConfigError, PipeError, TransportError};
