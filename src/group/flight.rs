//! Single-flight request coalescing.
//!
//! A cache miss can be expensive to resolve (peer round-trip or a loader
//! hitting the source of truth), and a hot key misses on many workers at
//! once. The coalescer collapses all concurrent resolutions of one key into
//! a single in-flight call: the first caller becomes the leader and runs the
//! work, everyone else waits on the leader's barrier and shares its result.
//!
//! Results are shared, never cached: once the leader finishes, the table
//! entry is gone and the next caller starts a fresh call. Errors propagate
//! to every waiter of the same call and are likewise not remembered.

use anyhow::anyhow;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// One error instance shared by every caller of the same in-flight call.
pub type SharedError = Arc<anyhow::Error>;

type CallResult<T> = Result<T, SharedError>;
type CallTable<T> = Mutex<HashMap<String, watch::Receiver<Option<CallResult<T>>>>>;

/// Deduplicates concurrent invocations per key.
pub struct SingleFlight<T> {
    calls: CallTable<T>,
}

enum Role<T> {
    Leader(watch::Sender<Option<CallResult<T>>>),
    Waiter(watch::Receiver<Option<CallResult<T>>>),
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `work` for `key`, unless a call for the same key is already in
    /// flight, in which case the caller blocks until that call completes
    /// and shares its outcome. The table entry is removed before waiters
    /// are released, so a caller arriving after completion starts fresh.
    pub async fn fly<F, Fut>(&self, key: &str, work: F) -> CallResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let role = {
            let mut calls = self.calls.lock();
            match calls.get(key) {
                Some(rx) => Role::Waiter(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    calls.insert(key.to_string(), rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Waiter(mut rx) => loop {
                if let Some(result) = rx.borrow_and_update().as_ref() {
                    return result.clone();
                }
                if rx.changed().await.is_err() {
                    // The leader went away. Either it published a result
                    // just before dropping the channel, or it was torn down
                    // mid-call and the waiters must fail.
                    if let Some(result) = rx.borrow().as_ref() {
                        return result.clone();
                    }
                    return Err(Arc::new(anyhow!("in-flight load was aborted")));
                }
            },
            Role::Leader(tx) => {
                // The guard clears the table on every exit path. If `work`
                // panics or the leader is cancelled, dropping `tx` releases
                // the waiters, so the key cannot stay poisoned.
                let guard = CallGuard {
                    calls: &self.calls,
                    key,
                };
                let result = work().await.map_err(Arc::new);
                drop(guard);
                let _ = tx.send(Some(result.clone()));
                result
            }
        }
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct CallGuard<'a, T> {
    calls: &'a CallTable<T>,
    key: &'a str,
}

impl<T> Drop for CallGuard<'_, T> {
    fn drop(&mut self) {
        self.calls.lock().remove(self.key);
    }
}
