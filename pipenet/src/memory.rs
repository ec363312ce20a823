//! In-memory transport: listeners and connections without sockets
//!
//! Each `MemoryTransport` owns a registry `endpoint name -> listener backlog`.
//! Clones share the registry; independent transports never see each other.
//!
//! `connect` builds a fresh pipe pair and pushes the server side into the
//! listener's bounded backlog while holding the registry lock, so every
//! connection is delivered to exactly one `accept`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use crate::config::TransportConfig;
use crate::connection::Connection;
use crate::duplex::DuplexPipe;
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::idgen::{Handle, IdGen};
use crate::notification_queue::NotificationQueueArc;
use crate::properties::ConnectionProperties;
use crate::transport::{ConnectionFactory, ConnectionListener, ListenerFactory, ListenerState};

struct Registration {
    listener_id: Handle,
    backlog: mpsc::Sender<Connection>,
}

type Registry = Arc<Mutex<HashMap<String, Registration>>>;

struct Shared {
    registry: Registry,
    queue: NotificationQueueArc,
    ids: IdGen,
}

/// Listener and connection factory over named in-memory endpoints
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
    config: TransportConfig,
}

impl MemoryTransport {
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Arc::new(Mutex::new(HashMap::new())),
                queue: NotificationQueueArc::new(),
                ids: IdGen::new(),
            }),
            config,
        }
    }

    /// Names with an active listener, sorted
    #[must_use]
    pub fn registered_endpoints(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.registry.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn bind(&self, endpoint: &Endpoint) -> Result<MemoryListener, TransportError> {
        let name = endpoint
            .as_memory()
            .ok_or_else(|| TransportError::UnsupportedEndpoint(endpoint.clone()))?;

        let mut registry = self.shared.registry.lock();
        if registry.contains_key(name) {
            return Err(TransportError::AddressInUse(endpoint.clone()));
        }
        let (tx, rx) = mpsc::channel(self.config.accept_backlog);
        let listener_id = self.shared.ids.next_handle();
        self.shared
            .queue
            .whitelist(listener_id, &format!("memory listener {name}"));
        registry.insert(
            name.to_string(),
            Registration {
                listener_id,
                backlog: tx,
            },
        );
        drop(registry);

        info!(%endpoint, listener = %listener_id, "listening");
        Ok(MemoryListener {
            id: listener_id,
            name: name.to_string(),
            endpoint: endpoint.clone(),
            registry: Arc::clone(&self.shared.registry),
            queue: self.shared.queue.clone(),
            backlog: tokio::sync::Mutex::new(rx),
            stopped: AtomicBool::new(false),
        })
    }

    fn connect_now(&self, endpoint: &Endpoint) -> Result<Connection, TransportError> {
        let name = endpoint
            .as_memory()
            .ok_or_else(|| TransportError::UnsupportedEndpoint(endpoint.clone()))?;

        let registry = self.shared.registry.lock();
        let registration = registry
            .get(name)
            .ok_or_else(|| TransportError::ConnectionRefused(endpoint.clone()))?;

        // Both sides share the id of the logical connection
        let id = Connection::next_id();
        let client_endpoint = Endpoint::memory(format!("{name}#{id}"));
        let pipe_options = self.config.pipe;
        let (server_pipe, client_pipe) = DuplexPipe::create_pair(pipe_options, pipe_options);
        let server = Connection::new(
            id,
            server_pipe,
            endpoint.clone(),
            client_endpoint.clone(),
            ConnectionProperties::new(),
        );
        let client = Connection::new(
            id,
            client_pipe,
            client_endpoint,
            endpoint.clone(),
            ConnectionProperties::new(),
        );

        match registration.backlog.try_send(server) {
            Ok(()) => {
                debug!(%endpoint, connection = %id, "connection queued");
                Ok(client)
            }
            Err(TrySendError::Full(_)) => Err(TransportError::BacklogFull(endpoint.clone())),
            Err(TrySendError::Closed(_)) => Err(TransportError::ConnectionRefused(endpoint.clone())),
        }
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("endpoints", &self.registered_endpoints())
            .field("config", &self.config)
            .finish()
    }
}

impl ListenerFactory for MemoryTransport {
    type Listener = MemoryListener;

    async fn listen<'a>(&'a self, endpoint: &'a Endpoint) -> Result<MemoryListener, TransportError> {
        self.bind(endpoint)
    }
}

impl ConnectionFactory for MemoryTransport {
    async fn connect<'a>(&'a self, endpoint: &'a Endpoint) -> Result<Connection, TransportError> {
        self.connect_now(endpoint)
    }
}

/// Listener bound to a named in-memory endpoint
///
/// Dropping the listener stops it.
pub struct MemoryListener {
    id: Handle,
    name: String,
    endpoint: Endpoint,
    registry: Registry,
    queue: NotificationQueueArc,
    backlog: tokio::sync::Mutex<mpsc::Receiver<Connection>>,
    stopped: AtomicBool,
}

impl MemoryListener {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Drop connections nobody will accept, so their clients see end-of-data
    ///
    /// No-op while an `accept` holds the backlog.
    fn refuse_queued(&self) {
        let Ok(mut backlog) = self.backlog.try_lock() else {
            return;
        };
        backlog.close();
        let mut refused = 0usize;
        while backlog.try_recv().is_ok() {
            refused += 1;
        }
        if refused > 0 {
            debug!(endpoint = %self.endpoint, refused, "dropped queued connections");
        }
    }
}

impl ConnectionListener for MemoryListener {
    fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn state(&self) -> ListenerState {
        if self.is_stopped() {
            ListenerState::Stopped
        } else {
            ListenerState::Listening
        }
    }

    async fn accept(&self) -> Result<Connection, TransportError> {
        let accepted = {
            let mut backlog = self.backlog.lock().await;
            if self.is_stopped() {
                Err(TransportError::ListenerClosed)
            } else {
                // Resolves at once if `stop` already unlisted the handle
                let stopped = self
                    .queue
                    .wait_async(self.id, "memory accept", self.queue.get_lock());
                tokio::select! {
                    biased;
                    _ = stopped => Err(TransportError::ListenerClosed),
                    connection = backlog.recv() => connection.ok_or(TransportError::ListenerClosed),
                }
            }
        };
        // `stop` skips the drain while an accept holds the backlog; the
        // holder finishes it after letting go
        if self.is_stopped() {
            self.refuse_queued();
        }
        accepted
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut registry = self.registry.lock();
            // The name may already belong to a newer listener
            if registry
                .get(&self.name)
                .is_some_and(|r| r.listener_id == self.id)
            {
                registry.remove(&self.name);
            }
        }
        self.queue.unlist(self.id);

        self.refuse_queued();
        info!(endpoint = %self.endpoint, listener = %self.id, "stopped");
    }
}

impl fmt::Debug for MemoryListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryListener")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.stop();
    }
}
