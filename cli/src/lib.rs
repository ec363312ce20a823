//! Command line front end: echo, relay and HTTP demos over pipenet
//!
//! The in-process demos (`echo`, `tls-echo`, `http`) run server and client
//! over one `MemoryTransport`. `serve` and `connect` use the transport chosen
//! by the configuration, which must be a network one.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use drivers::{
    http_get, relay, run_echo_server, serve, serve_hello, HttpResponse, RelayStats, ServerReport,
};
use pipenet::{
    self_signed, AnyTransport, ConnectionFactory, ConnectionListener, ConnectionUpgrade, Endpoint,
    ListenerFactory, MemoryListener, MemoryTransport, Plain, TlsClient, TlsServer,
    TransportConfig, TransportKind,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::info;

/// Name in the self-signed demo certificate
const TLS_SERVER_NAME: &str = "localhost";

#[derive(Debug, Parser)]
#[command(name = "pipenet")]
#[command(about = "Echo, relay and HTTP over in-memory, TCP and TLS connections", long_about = None)]
#[command(version)]
pub struct Cli {
    /// JSON transport configuration
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// In-process echo server on endpoint "default"; stdin goes to it, the echo to stdout
    Echo,

    /// Same as `echo`, through a self-signed TLS upgrade on endpoint "tls"
    TlsEcho,

    /// In-process "Hello World" HTTP server and one GET against it
    Http {
        /// Request target
        #[arg(long, default_value = "/")]
        path: String,
    },

    /// Echo server on the configured transport, until Ctrl-C (needs `"kind": "tcp"`)
    Serve {
        /// e.g. `tcp://127.0.0.1:7000`
        #[arg(short, long, value_name = "ENDPOINT")]
        endpoint: Endpoint,
    },

    /// Relay stdin/stdout to a server (needs `"kind": "tcp"`)
    Connect {
        #[arg(short, long, value_name = "ENDPOINT")]
        endpoint: Endpoint,
    },
}

/// Default configuration unless a file is given
///
/// # Errors
/// The file cannot be read, parsed or validated
pub fn load_config(path: Option<&Path>) -> Result<TransportConfig> {
    match path {
        Some(path) => TransportConfig::from_path(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(TransportConfig::default()),
    }
}

/// # Errors
/// Whatever the chosen command fails with
pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Echo => {
            echo_session(&config, false, tokio::io::stdin(), tokio::io::stdout()).await?;
        }
        Command::TlsEcho => {
            echo_session(&config, true, tokio::io::stdin(), tokio::io::stdout()).await?;
        }
        Command::Http { path } => {
            let response = http_session(&config, &path).await?;
            println!("{response}");
        }
        Command::Serve { endpoint } => {
            let transport = network_transport(&config)?;
            let listener = Arc::new(
                transport
                    .listen(&endpoint)
                    .await
                    .with_context(|| format!("listening on {endpoint}"))?,
            );
            println!("Server listening to {}", listener.local_endpoint());
            serve_until(listener, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "cannot wait for Ctrl-C");
                }
            })
            .await?;
        }
        Command::Connect { endpoint } => {
            let transport = network_transport(&config)?;
            let connection = transport
                .connect(&endpoint)
                .await
                .with_context(|| format!("connecting to {endpoint}"))?;
            let stats = relay(connection, tokio::io::stdin(), tokio::io::stdout()).await?;
            info!(sent = stats.sent, received = stats.received, "disconnected");
        }
    }
    Ok(())
}

/// Transport for `serve` and `connect`, which talk across processes
fn network_transport(config: &TransportConfig) -> Result<AnyTransport> {
    if config.kind == TransportKind::Memory {
        bail!(
            "the memory transport does not cross process boundaries; \
             use a configuration with \"kind\": \"tcp\""
        );
    }
    Ok(AnyTransport::from_config(config))
}

fn spawn_echo<U: ConnectionUpgrade>(
    listener: &Arc<MemoryListener>,
    upgrade: U,
) -> JoinHandle<ServerReport> {
    let listener = Arc::clone(listener);
    tokio::spawn(async move { run_echo_server(&*listener, Arc::new(upgrade)).await })
}

/// Echo server and relay client in one process
///
/// Local input is relayed to the server, the echo to local output. Ends once
/// local input ends and the echo is drained.
///
/// # Errors
/// Listening, connecting, the TLS handshake or the relay failed
pub async fn echo_session<R, W>(
    config: &TransportConfig,
    tls: bool,
    local_in: R,
    local_out: W,
) -> Result<RelayStats>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let transport = MemoryTransport::new(config.clone());
    let endpoint = Endpoint::memory(if tls { "tls" } else { "default" });
    let listener = Arc::new(transport.listen(&endpoint).await?);
    info!(endpoint = %listener.local_endpoint(), tls, "server listening");

    let (server, client_tls) = if tls {
        let (server_config, client_config) = self_signed(&[TLS_SERVER_NAME])?;
        let server = TlsServer::new(server_config).with_pipe_options(config.pipe);
        let client = TlsClient::new(client_config, TLS_SERVER_NAME)?.with_pipe_options(config.pipe);
        (spawn_echo(&listener, server), Some(client))
    } else {
        (spawn_echo(&listener, Plain), None)
    };

    let mut connection = transport.connect(&endpoint).await?;
    if let Some(client_tls) = client_tls {
        connection = client_tls.upgrade(connection).await?;
    }
    let stats = relay(connection, local_in, local_out).await;

    listener.stop();
    let report = server.await?;
    info!(accepted = report.accepted, failed = report.failed, "server stopped");
    Ok(stats?)
}

/// "Hello World" server and one GET in one process
///
/// # Errors
/// Listening, connecting or the HTTP exchange failed
pub async fn http_session(config: &TransportConfig, path: &str) -> Result<HttpResponse> {
    let transport = MemoryTransport::new(config.clone());
    let endpoint = Endpoint::memory("default");
    let listener = Arc::new(transport.listen(&endpoint).await?);
    info!(endpoint = %listener.local_endpoint(), "HTTP listening");

    let server = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { serve(&*listener, Arc::new(Plain), serve_hello).await })
    };

    let connection = transport.connect(&endpoint).await?;
    let response = http_get(connection, "default", path).await;

    listener.stop();
    server.await?;
    Ok(response?)
}

/// Run an echo server on `listener` until `shutdown` resolves
///
/// # Errors
/// The server task panicked
pub async fn serve_until<L, F>(listener: Arc<L>, shutdown: F) -> Result<ServerReport>
where
    L: ConnectionListener,
    F: Future<Output = ()>,
{
    let server = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { run_echo_server(&*listener, Arc::new(Plain)).await })
    };
    shutdown.await;
    info!(endpoint = %listener.local_endpoint(), "shutting down");
    listener.stop();
    let report = server.await?;
    info!(accepted = report.accepted, failed = report.failed, "server stopped");
    Ok(report)
}
