//! Concurrency-safe façade over the LRU store.
//!
//! A single mutex guards the store; the store itself is constructed lazily
//! on the first write so an idle group costs nothing. The façade also owns
//! the expiry sweeper: a background task that periodically reaps expired
//! entries from the LRU end, taking the same mutex every caller takes.

use super::lru::LruStore;
use crate::byteview::ByteView;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;

/// How often the sweeper wakes to reap expired entries.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Mutex-guarded, lazily initialized LRU store.
pub struct Cache {
    store: Arc<Mutex<Option<LruStore>>>,
    capacity: u64,
    stop: watch::Sender<bool>,
}

impl Cache {
    /// Creates a cache bounded by `capacity` bytes (0 = unbounded) and
    /// starts the expiry sweeper. The sweep interval can be overridden with
    /// the `MESHCACHE_SWEEP_SECS` environment variable.
    pub fn new(capacity: u64) -> Self {
        let interval = std::env::var("MESHCACHE_SWEEP_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SWEEP_INTERVAL);
        Self::with_sweep_interval(capacity, interval)
    }

    pub fn with_sweep_interval(capacity: u64, interval: Duration) -> Self {
        let store = Arc::new(Mutex::new(None));
        let (stop, stop_rx) = watch::channel(false);

        // The sweeper needs a running reactor. Without one (plain unit
        // tests, synchronous construction before the runtime boots) expired
        // entries are still filtered at get time.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(sweep_loop(Arc::downgrade(&store), interval, stop_rx));
            }
            Err(_) => {
                tracing::debug!("no async runtime available, expiry sweeper disabled");
            }
        }

        Self {
            store,
            capacity,
            stop,
        }
    }

    pub fn get(&self, key: &str) -> Option<ByteView> {
        let mut guard = self.store.lock();
        guard.as_mut()?.get(key)
    }

    pub fn add(&self, key: &str, value: ByteView, ttl: Duration) {
        let mut guard = self.store.lock();
        let store = guard.get_or_insert_with(|| LruStore::new(self.capacity, None));
        store.add(key, value, ttl);
    }

    pub fn len(&self) -> usize {
        let guard = self.store.lock();
        guard.as_ref().map(|store| store.len()).unwrap_or(0)
    }

    /// Shuts the sweeper down. Entries remain readable; expired ones are
    /// then only reaped when a lookup touches them.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

async fn sweep_loop(
    store: Weak<Mutex<Option<LruStore>>>,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick of a tokio interval completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(store) = store.upgrade() else { break };
                let removed = {
                    let mut guard = store.lock();
                    guard.as_mut().map(|lru| lru.sweep_expired()).unwrap_or(0)
                };
                if removed > 0 {
                    tracing::debug!("expiry sweep removed {} entries", removed);
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
}
