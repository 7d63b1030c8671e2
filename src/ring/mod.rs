//! Consistent-Hash Ring
//!
//! Maps keys to the peer that owns them. Every peer is projected onto the
//! ring as `replicas` virtual nodes to smooth the key distribution; a key
//! belongs to the first virtual node clockwise from its own hash.
//!
//! ## Mechanism
//! - **Placement**: virtual node `i` of peer `p` sits at `hash(itoa(i) + p)`.
//!   All nodes compute the same positions independently, so any node can
//!   route any key without coordination.
//! - **Lookup**: binary search over the sorted ring for the first position
//!   at or after `hash(key)`, wrapping to the start past the end.
//! - **Rebalance**: registering a new peer moves only the keys that fall
//!   between its virtual nodes and their predecessors.

use std::collections::HashMap;

/// Pluggable hash over raw bytes. Defaults to CRC32; tests inject simpler
/// functions to make ring positions predictable.
pub type HashFn = Box<dyn Fn(&[u8]) -> u32 + Send + Sync>;

/// Number of virtual nodes per registered peer.
pub const DEFAULT_REPLICAS: usize = 50;

pub struct HashRing {
    replicas: usize,
    hash: HashFn,
    sorted: Vec<u32>,
    owners: HashMap<u32, String>,
}

impl HashRing {
    /// Creates an empty ring. `replicas` is clamped to at least 1; passing
    /// `None` for the hash selects CRC32.
    pub fn new(replicas: usize, hash: Option<HashFn>) -> Self {
        Self {
            replicas: replicas.max(1),
            hash: hash.unwrap_or_else(|| Box::new(crc32fast::hash)),
            sorted: Vec::new(),
            owners: HashMap::new(),
        }
    }

    /// Projects each peer onto the ring as `replicas` virtual nodes.
    ///
    /// When two virtual nodes collide on a position, the peer registered
    /// last owns it.
    pub fn register<I, S>(&mut self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for peer in peers {
            let peer = peer.as_ref();
            for i in 0..self.replicas {
                let position = self.virtual_position(i, peer);
                self.sorted.push(position);
                self.owners.insert(position, peer.to_string());
            }
        }
        self.sorted.sort_unstable();
    }

    /// Returns the peer that owns `key`, or `None` on an empty ring.
    pub fn get_peer(&self, key: &str) -> Option<&str> {
        if self.sorted.is_empty() {
            return None;
        }
        let position = (self.hash)(key.as_bytes());
        let idx = match self.sorted.binary_search(&position) {
            Ok(idx) => idx,
            Err(idx) => idx,
        };
        let slot = self.sorted[idx % self.sorted.len()];
        self.owners.get(&slot).map(String::as_str)
    }

    /// Erases a peer's virtual nodes from the ring.
    pub fn remove(&mut self, peer: &str) {
        for i in 0..self.replicas {
            let position = self.virtual_position(i, peer);
            if let Ok(idx) = self.sorted.binary_search(&position) {
                self.sorted.remove(idx);
            }
            self.owners.remove(&position);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    fn virtual_position(&self, replica: usize, peer: &str) -> u32 {
        (self.hash)(format!("{}{}", replica, peer).as_bytes())
    }
}
