//! Connection upgrades: plain pass-through and TLS via `tokio-rustls`
//!
//! An upgraded connection satisfies the same contract as the raw one:
//! `Connection -> stream view -> TLS stream -> Connection`.

use std::future::Future;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::debug;

use crate::connection::Connection;
use crate::error::TransportError;
use crate::pipe::PipeOptions;
use crate::properties::ConnectionProperties;

/// Turns an established connection into another one, e.g. after a handshake
pub trait ConnectionUpgrade: Send + Sync + 'static {
    fn upgrade(
        &self,
        connection: Connection,
    ) -> impl Future<Output = Result<Connection, TransportError>> + Send + '_;
}

/// No upgrade: the connection is used as is
#[derive(Debug, Clone, Copy, Default)]
pub struct Plain;

impl ConnectionUpgrade for Plain {
    async fn upgrade(&self, connection: Connection) -> Result<Connection, TransportError> {
        Ok(connection)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsRole {
    Server,
    Client,
}

/// Negotiated session parameters, stored in the upgraded connection's properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsInfo {
    pub role: TlsRole,
    /// SNI as sent by the client
    pub server_name: Option<String>,
    pub alpn: Option<Vec<u8>>,
    pub protocol_version: Option<String>,
}

/// Detach what the upgraded connection keeps from the raw one
fn take_parts(mut connection: Connection) -> (Connection, ConnectionProperties) {
    let properties = std::mem::take(connection.properties_mut());
    (connection, properties)
}

/// Server side of a TLS upgrade
#[derive(Clone)]
pub struct TlsServer {
    acceptor: TlsAcceptor,
    options: PipeOptions,
}

impl TlsServer {
    #[must_use]
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            acceptor: TlsAcceptor::from(config),
            options: PipeOptions::default(),
        }
    }

    /// Buffering of the pipes behind the upgraded connection
    #[must_use]
    pub fn with_pipe_options(mut self, options: PipeOptions) -> Self {
        self.options = options;
        self
    }
}

impl ConnectionUpgrade for TlsServer {
    async fn upgrade(&self, connection: Connection) -> Result<Connection, TransportError> {
        let (connection, mut properties) = take_parts(connection);
        let id = connection.id();
        let local = connection.local_endpoint().clone();
        let remote = connection.remote_endpoint().clone();

        let tls = self
            .acceptor
            .accept(connection.into_stream())
            .await
            .map_err(TransportError::Handshake)?;

        let (_, session) = tls.get_ref();
        let info = TlsInfo {
            role: TlsRole::Server,
            server_name: session.server_name().map(str::to_string),
            alpn: session.alpn_protocol().map(<[u8]>::to_vec),
            protocol_version: session.protocol_version().map(|v| format!("{v:?}")),
        };
        debug!(connection = %id, %remote, ?info, "tls accepted");
        properties.insert(info);

        Ok(Connection::from_stream_with_id(
            id, tls, properties, local, remote, self.options,
        ))
    }
}

/// Client side of a TLS upgrade
#[derive(Clone)]
pub struct TlsClient {
    connector: TlsConnector,
    server_name: ServerName<'static>,
    sni: String,
    options: PipeOptions,
}

impl TlsClient {
    /// # Errors
    /// `TlsConfig` if `server_name` is neither a DNS name nor an IP address
    pub fn new(config: Arc<ClientConfig>, server_name: &str) -> Result<Self, TransportError> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| TransportError::TlsConfig(format!("{server_name}: {e}")))?;
        Ok(Self {
            connector: TlsConnector::from(config),
            server_name: name,
            sni: server_name.to_string(),
            options: PipeOptions::default(),
        })
    }

    #[must_use]
    pub fn with_pipe_options(mut self, options: PipeOptions) -> Self {
        self.options = options;
        self
    }
}

impl ConnectionUpgrade for TlsClient {
    async fn upgrade(&self, connection: Connection) -> Result<Connection, TransportError> {
        let (connection, mut properties) = take_parts(connection);
        let id = connection.id();
        let local = connection.local_endpoint().clone();
        let remote = connection.remote_endpoint().clone();

        let tls = self
            .connector
            .connect(self.server_name.clone(), connection.into_stream())
            .await
            .map_err(TransportError::Handshake)?;

        let (_, session) = tls.get_ref();
        let info = TlsInfo {
            role: TlsRole::Client,
            server_name: Some(self.sni.clone()),
            alpn: session.alpn_protocol().map(<[u8]>::to_vec),
            protocol_version: session.protocol_version().map(|v| format!("{v:?}")),
        };
        debug!(connection = %id, %remote, ?info, "tls connected");
        properties.insert(info);

        Ok(Connection::from_stream_with_id(
            id, tls, properties, local, remote, self.options,
        ))
    }
}

/// Self-signed credentials for `names`: a server config and a client config
/// that trusts exactly that certificate
///
/// # Errors
/// `TlsConfig` if certificate generation or config building fails
pub fn self_signed(
    names: &[&str],
) -> Result<(Arc<ServerConfig>, Arc<ClientConfig>), TransportError> {
    let tls_err = |e: &dyn std::fmt::Display| TransportError::TlsConfig(e.to_string());

    let names: Vec<String> = names.iter().map(|n| (*n).to_string()).collect();
    let params = rcgen::CertificateParams::new(names).map_err(|e| tls_err(&e))?;
    let key_pair = rcgen::KeyPair::generate().map_err(|e| tls_err(&e))?;
    let certificate = params.self_signed(&key_pair).map_err(|e| tls_err(&e))?;

    let cert_der = CertificateDer::from(certificate.der().to_vec());
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let server = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_err(&e))?
        .with_no_client_auth()
        .with_single_cert(vec![cert_der.clone()], key_der)
        .map_err(|e| tls_err(&e))?;

    let mut roots = RootCertStore::empty();
    roots.add(cert_der).map_err(|e| tls_err(&e))?;
    let client = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_err(&e))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok((Arc::new(server), Arc::new(client)))
}
