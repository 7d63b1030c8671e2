//! Immutable views over cached payloads.
//!
//! Cache values live inside the LRU store and are shared between the store,
//! concurrent readers, and in-flight peer responses. Handing out a plain
//! mutable slice would let one caller corrupt what every other reader sees,
//! so values are wrapped in a `ByteView`: a reference-counted, read-only
//! buffer plus the entry's expiry metadata. Cloning a view is a refcount
//! bump, never a data copy.

use bytes::Bytes;
use std::fmt;
use std::time::Instant;

/// A read-only view of a cached value.
///
/// The underlying buffer is never mutated after construction. Callers that
/// need an owned, mutable copy go through [`ByteView::to_vec`], which
/// allocates a fresh buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ByteView {
    bytes: Bytes,
    expires_at: Option<Instant>,
}

impl ByteView {
    /// Wraps a payload with no expiry metadata.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            expires_at: None,
        }
    }

    /// Wraps a payload carrying the instant after which the owning cache
    /// entry is considered dead. `None` means the entry never expires.
    pub fn with_expiry(bytes: impl Into<Bytes>, expires_at: Option<Instant>) -> Self {
        Self {
            bytes: bytes.into(),
            expires_at,
        }
    }

    /// Length of the payload in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrows the payload without copying. The buffer is shared and
    /// read-only; this cannot be used to mutate the cached value.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Copies the payload out into a fresh, caller-owned buffer.
    ///
    /// Mutating the returned vector has no effect on the cached value.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// The instant this value's cache entry expires, if it has a TTL.
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }
}

impl fmt::Display for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes))
    }
}

impl AsRef<[u8]> for ByteView {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&'static str> for ByteView {
    fn from(s: &'static str) -> Self {
        Self::new(Bytes::from_static(s.as_bytes()))
    }
}
