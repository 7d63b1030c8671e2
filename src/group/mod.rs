//! Cache Group Coordination
//!
//! A group is a named cache namespace with its own loader, byte budget, and
//! TTL. The coordinator wires the lookup path together: local hit, then the
//! peer that owns the key, then the user-supplied loader as the source of
//! truth. Every miss resolution runs under the single-flight coalescer so a
//! hot key costs one load per node no matter how many workers miss on it.
//!
//! Groups live in a process-global directory so the peer server can route
//! inbound lookups by group name alone.

pub mod flight;


use crate::byteview::ByteView;
use crate::peers::Picker;
use crate::store::cache::Cache;
use anyhow::{bail, Result};
use dashmap::DashMap;
use flight::SingleFlight;
use once_cell::sync::Lazy;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Caller-provided callback that materializes the bytes for a key from the
/// underlying source of truth.
pub type LoaderFn =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send>> + Send + Sync>;

static GROUPS: Lazy<DashMap<String, Arc<Group>>> = Lazy::new(DashMap::new);

/// A named cache namespace.
pub struct Group {
    name: String,
    loader: LoaderFn,
    main_cache: Cache,
    peers: OnceLock<Arc<dyn Picker>>,
    flight: SingleFlight<ByteView>,
    ttl: Duration,
}

/// Creates a group and registers it in the process-global directory,
/// replacing any previous group of the same name. `capacity` bounds the
/// local cache in bytes (0 = unbounded); `ttl` applies to every cached
/// value (zero = never expires).
pub fn new_group<F, Fut>(name: &str, capacity: u64, ttl: Duration, loader: F) -> Arc<Group>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
{
    let loader: LoaderFn = Arc::new(move |key: String| {
        Box::pin(loader(key)) as Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send>>
    });

    let group = Arc::new(Group {
        name: name.to_string(),
        loader,
        main_cache: Cache::new(capacity),
        peers: OnceLock::new(),
        flight: SingleFlight::new(),
        ttl,
    });

    GROUPS.insert(name.to_string(), group.clone());
    tracing::info!("registered cache group {} (capacity {} bytes)", name, capacity);
    group
}

/// Looks up a previously created group by name.
pub fn get_group(name: &str) -> Option<Arc<Group>> {
    GROUPS.get(name).map(|entry| entry.value().clone())
}

/// Removes a group from the directory and shuts its expiry sweeper down.
/// Outstanding handles keep working until dropped; the peer server simply
/// stops routing to the name.
pub fn destroy_group(name: &str) {
    if let Some((_, group)) = GROUPS.remove(name) {
        group.main_cache.stop();
        tracing::info!("destroyed cache group {}", name);
    }
}

impl Group {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of values currently resident in the local cache.
    pub fn cached_entries(&self) -> usize {
        self.main_cache.len()
    }

    /// Installs the peer selector. Allowed exactly once; a second call is a
    /// wiring bug and panics.
    pub fn register_peers(&self, picker: Arc<dyn Picker>) {
        if self.peers.set(picker).is_err() {
            panic!("register_peers called more than once for group {}", self.name);
        }
    }

    /// Resolves `key`: local cache hit, else the owning peer, else the
    /// loader. The returned view shares the cached buffer.
    pub async fn get(&self, key: &str) -> Result<ByteView> {
        if key.is_empty() {
            bail!("key is required");
        }

        if let Some(view) = self.main_cache.get(key) {
            tracing::debug!("group {} hit for {}", self.name, key);
            return Ok(view);
        }

        self.load(key).await
    }

    async fn load(&self, key: &str) -> Result<ByteView> {
        self.flight
            .fly(key, || self.resolve_miss(key))
            .await
            .map_err(|e| anyhow::anyhow!("{e:#}"))
    }

    /// Runs at most once per key at a time, under the coalescer.
    async fn resolve_miss(&self, key: &str) -> Result<ByteView> {
        if let Some(picker) = self.peers.get() {
            if let Some(fetcher) = picker.pick(key) {
                match fetcher.fetch(&self.name, key).await {
                    Ok(bytes) => {
                        let view = ByteView::with_expiry(bytes, self.deadline());
                        self.main_cache.add(key, view.clone(), self.ttl);
                        return Ok(view);
                    }
                    Err(e) => {
                        // Transient peer failures are never surfaced to the
                        // caller; the loader is the fallback.
                        tracing::warn!(
                            "group {} failed to fetch {} from peer, falling back to loader: {:#}",
                            self.name,
                            key,
                            e
                        );
                    }
                }
            }
        }

        let bytes = (self.loader)(key.to_string()).await?;
        tracing::debug!("group {} loaded {} from source", self.name, key);
        let view = ByteView::with_expiry(bytes, self.deadline());
        self.main_cache.add(key, view.clone(), self.ttl);
        Ok(view)
    }

    fn deadline(&self) -> Option<Instant> {
        if self.ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + self.ttl)
        }
    }
}
