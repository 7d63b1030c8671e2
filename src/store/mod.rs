//! Local Storage Module
//!
//! The in-memory value store backing every cache group on this node.
//!
//! ## Layers
//! - **`lru`**: the entry table. MRU to LRU ordering, byte accounting
//!   against a configurable budget, per-entry expiry, eviction callbacks.
//!   Unsynchronized by design; callers own the locking.
//! - **`cache`**: the concurrent façade. One mutex, lazy store construction
//!   on first write, and the background sweeper that reaps expired entries
//!   from the LRU end on a timer.

pub mod cache;
pub mod lru;

#[cfg(test)]
mod tests;
