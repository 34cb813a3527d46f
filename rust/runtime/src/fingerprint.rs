//! Program-state fingerprints for cycle detection.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tangle_types::{Event, Value};

/// SHA-256 digest of a canonical program state.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 32]);

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Incremental hasher handed to `hash_state` hooks.
///
/// Every write is length-prefixed so adjacent fields cannot alias.
pub struct StateHasher {
    inner: Sha256,
}

impl Default for StateHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl StateHasher {
    /// Fresh hasher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    /// Raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.inner.update((bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
    }

    /// Unsigned integer.
    pub fn write_u64(&mut self, value: u64) {
        self.inner.update(value.to_le_bytes());
    }

    /// Signed integer.
    pub fn write_i64(&mut self, value: i64) {
        self.inner.update(value.to_le_bytes());
    }

    /// Boolean.
    pub fn write_bool(&mut self, value: bool) {
        self.inner.update([u8::from(value)]);
    }

    /// String.
    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// Payload value.
    pub fn write_value(&mut self, value: &Value) {
        self.write_bytes(&value.canonical_bytes());
    }

    /// Event kind and payload.
    pub fn write_event(&mut self, event: &Event) {
        self.write_bytes(&event.canonical_bytes());
    }

    /// Section tag separating components.
    pub fn write_tag(&mut self, tag: u8) {
        self.inner.update([tag]);
    }

    /// Finish the digest.
    #[must_use]
    pub fn finish(self) -> Fingerprint {
        Fingerprint(self.inner.finalize().into())
    }
}
