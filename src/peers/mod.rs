//! Peer Cooperation Module
//!
//! Everything a node needs to take part in the fleet: the capability traits
//! the group coordinator programs against, the shared wire conventions, the
//! HTTP server answering lookups from other nodes, and the client used to
//! fetch from them.
//!
//! ## Routing discipline
//! `Server::pick` compares the ring's owner against the node's own address
//! and reports "no peer" for keys it owns itself. Inbound peer requests are
//! therefore served through the normal group lookup without ever being
//! forwarded a second hop, which keeps two nodes from bouncing a key back
//! and forth.

pub mod client;
pub mod protocol;
pub mod server;


use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Selects the peer that owns a key.
pub trait Picker: Send + Sync {
    /// Returns a fetcher for the owning peer, or `None` when the key should
    /// be resolved on this node.
    fn pick(&self, key: &str) -> Option<Arc<dyn Fetcher>>;
}

/// Retrieves a cached value from one remote peer.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, group: &str, key: &str) -> Result<Vec<u8>>;
}
