//! Accept loop shared by the servers
//!
//! One spawned task per accepted connection. A failing connection is logged
//! and counted; it never stops the loop. The loop ends when the listener is
//! stopped, then waits for the in-flight handlers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use pipenet::{Connection, ConnectionListener, ConnectionUpgrade, ListenerState, TransportError};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::error::DriverError;

/// Pause after the first failed `accept`; doubled per failure in a row
pub const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
pub const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// What a server did before its listener was stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerReport {
    pub accepted: usize,
    pub failed: usize,
}

impl ServerReport {
    fn record(&mut self, joined: Result<Result<u64, DriverError>, JoinError>) {
        match joined {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => self.failed += 1,
            Err(e) => {
                warn!(error = %e, "connection task panicked");
                self.failed += 1;
            }
        }
    }
}

/// Serve `listener` until it is stopped
///
/// Each connection goes through `upgrade` first and is then handed to
/// `handler`, which returns a per-connection count for the logs.
pub async fn serve<L, U, H, F>(listener: &L, upgrade: Arc<U>, handler: H) -> ServerReport
where
    L: ConnectionListener,
    U: ConnectionUpgrade,
    H: Fn(Connection) -> F + Clone + Send + 'static,
    F: Future<Output = Result<u64, DriverError>> + Send + 'static,
{
    let endpoint = listener.local_endpoint().clone();
    let mut report = ServerReport::default();
    let mut handlers: FuturesUnordered<JoinHandle<Result<u64, DriverError>>> =
        FuturesUnordered::new();
    let mut backoff = ACCEPT_BACKOFF_MIN;
    info!(%endpoint, "serving");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(connection) => {
                    backoff = ACCEPT_BACKOFF_MIN;
                    report.accepted += 1;
                    handlers.push(tokio::spawn(handle(
                        connection,
                        Arc::clone(&upgrade),
                        handler.clone(),
                    )));
                }
                Err(TransportError::ListenerClosed) => break,
                Err(e) => {
                    if listener.state() == ListenerState::Stopped {
                        break;
                    }
                    warn!(%endpoint, error = %e, retry_in = ?backoff, "accept failed");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                }
            },

            Some(joined) = handlers.next(), if !handlers.is_empty() => {
                report.record(joined);
            }
        }
    }

    debug!(%endpoint, in_flight = handlers.len(), "listener stopped, draining handlers");
    while let Some(joined) = handlers.next().await {
        report.record(joined);
    }
    info!(
        %endpoint,
        accepted = report.accepted,
        failed = report.failed,
        "server finished"
    );
    report
}

async fn handle<U, H, F>(
    connection: Connection,
    upgrade: Arc<U>,
    handler: H,
) -> Result<u64, DriverError>
where
    U: ConnectionUpgrade,
    H: Fn(Connection) -> F,
    F: Future<Output = Result<u64, DriverError>>,
{
    let id = connection.id();
    let remote = connection.remote_endpoint().clone();
    debug!(connection = %id, %remote, "accepted");

    let result = match upgrade.upgrade(connection).await {
        Ok(connection) => handler(connection).await,
        Err(e) => Err(e.into()),
    };
    match &result {
        Ok(count) => debug!(connection = %id, count, "connection finished"),
        Err(e) => warn!(connection = %id, %remote, error = %e, "connection failed"),
    }
    result
}
