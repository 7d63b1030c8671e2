//! Peer-facing HTTP server.
//!
//! Answers cache lookups from other nodes and doubles as the node's peer
//! selector: `set_peers` builds the consistent-hash ring plus one client
//! per peer, and `pick` routes keys through it, short-circuiting to "local"
//! when this node is the owner.
//!
//! Lifecycle is one-way: constructed, then running after `start`, then
//! stopped after `stop`. A stopped server cannot be restarted; in-flight
//! requests are drained during graceful shutdown.

use super::client::Client;
use super::protocol::{service_name, valid_peer_addr, BASE_PATH};
use super::{Fetcher, Picker};
use crate::registry;
use crate::ring::{HashRing, DEFAULT_REPLICAS};
use anyhow::{bail, Context, Result};
use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone, Copy, PartialEq)]
enum Lifecycle {
    Constructed,
    Running,
    Stopped,
}

struct ServerState {
    lifecycle: Lifecycle,
    shutdown: Option<watch::Sender<bool>>,
}

pub struct Server {
    addr: String,
    state: Mutex<ServerState>,
    ring: Mutex<Option<HashRing>>,
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

impl Server {
    /// Creates a server for `addr` (`host:port`). The address is validated
    /// here; binding happens in `start`.
    pub fn new(addr: &str) -> Result<Arc<Self>> {
        if !valid_peer_addr(addr) {
            bail!("invalid address {}, expected host:port", addr);
        }
        Ok(Arc::new(Self {
            addr: addr.to_string(),
            state: Mutex::new(ServerState {
                lifecycle: Lifecycle::Constructed,
                shutdown: None,
            }),
            ring: Mutex::new(None),
            clients: Mutex::new(HashMap::new()),
        }))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().lifecycle == Lifecycle::Running
    }

    /// Binds the listener, serves peer lookups in the background, and
    /// publishes this node to the service registry when registry endpoints
    /// are configured. Registration failure aborts start-up; a later lease
    /// loss only costs discoverability.
    ///
    /// Fails when called on a running or stopped server.
    pub async fn start(&self) -> Result<()> {
        {
            let state = self.state.lock();
            match state.lifecycle {
                Lifecycle::Running => bail!("server already started"),
                Lifecycle::Stopped => bail!("server is stopped"),
                Lifecycle::Constructed => {}
            }
        }

        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("failed to bind {}", self.addr))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        if let Some(endpoints) = registry::endpoints_from_env() {
            let service = service_name(&self.addr);
            let registration =
                registry::Registration::publish(&endpoints, &service, &self.addr).await?;
            let stop = shutdown_rx.clone();
            tokio::spawn(async move {
                // Renewal failure ends discoverability but not local serving.
                if let Err(e) = registration.keep_alive(stop).await {
                    tracing::error!("registry lease lost, node no longer discoverable: {:#}", e);
                }
            });
        } else {
            tracing::debug!("no registry endpoints configured, running standalone");
        }

        {
            let mut state = self.state.lock();
            // A concurrent start may have won the race while we were binding.
            if state.lifecycle != Lifecycle::Constructed {
                bail!("server already started");
            }
            state.lifecycle = Lifecycle::Running;
            state.shutdown = Some(shutdown_tx);
        }

        let app = Router::new().route(
            &format!("{}:group/:key", BASE_PATH),
            get(handle_peer_lookup),
        );

        let addr = self.addr.clone();
        let mut shutdown = shutdown_rx;
        tokio::spawn(async move {
            tracing::info!("peer server listening on {}", addr);
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            });
            if let Err(e) = serve.await {
                tracing::error!("peer server on {} failed: {}", addr, e);
            }
        });

        Ok(())
    }

    /// Replaces the peer set. Rebuilds the ring and the per-peer clients;
    /// every entry must be `host:port`. The node's own address is normally
    /// part of the set so the ring can assign keys to it.
    pub fn set_peers<S: AsRef<str>>(&self, peers: &[S]) -> Result<()> {
        for peer in peers {
            if !valid_peer_addr(peer.as_ref()) {
                bail!("invalid peer address {}, expected host:port", peer.as_ref());
            }
        }

        let mut ring = HashRing::new(DEFAULT_REPLICAS, None);
        ring.register(peers.iter().map(|p| p.as_ref()));

        let clients = peers
            .iter()
            .map(|peer| {
                let addr = peer.as_ref().to_string();
                let client = Arc::new(Client::new(&service_name(&addr)));
                (addr, client)
            })
            .collect();

        *self.ring.lock() = Some(ring);
        *self.clients.lock() = clients;
        tracing::info!("server {} now knows {} peer(s)", self.addr, peers.len());
        Ok(())
    }

    /// Signals the registry to revoke this node and drains the listener.
    /// Stopping a server that never ran, or ran and already stopped, is a
    /// no-op for the second case and terminal either way.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        match state.lifecycle {
            Lifecycle::Stopped => {}
            Lifecycle::Constructed => {
                state.lifecycle = Lifecycle::Stopped;
            }
            Lifecycle::Running => {
                if let Some(shutdown) = state.shutdown.take() {
                    let _ = shutdown.send(true);
                }
                state.lifecycle = Lifecycle::Stopped;
                tracing::info!("peer server {} stopped", self.addr);
            }
        }
    }
}

impl Picker for Server {
    fn pick(&self, key: &str) -> Option<Arc<dyn Fetcher>> {
        let owner = {
            let ring = self.ring.lock();
            ring.as_ref()?.get_peer(key)?.to_string()
        };

        if owner == self.addr {
            tracing::debug!("{} owns {} itself", self.addr, key);
            return None;
        }

        let client = self.clients.lock().get(&owner)?.clone();
        tracing::info!("{} picked remote peer {} for key {}", self.addr, owner, key);
        Some(client)
    }
}

/// Serves one lookup from a peer. The group resolves the key through its
/// normal pipeline; the ring guarantees this node will not forward it
/// onward (see the module doc).
async fn handle_peer_lookup(Path((group_name, key)): Path<(String, String)>) -> Response {
    tracing::debug!("peer lookup {}/{}", group_name, key);

    if key.is_empty() {
        return (StatusCode::BAD_REQUEST, "key is required").into_response();
    }

    let Some(group) = crate::group::get_group(&group_name) else {
        return (
            StatusCode::NOT_FOUND,
            format!("group {} not found", group_name),
        )
            .into_response();
    };

    match group.get(&key).await {
        Ok(view) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            view.to_vec(),
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response(),
    }
}
