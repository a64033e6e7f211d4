//! Storage key derivation.

use std::fmt;

/// A fixed-width key identifying one caller on one route.
///
/// The key is the 256-bit BLAKE3 digest of the scope label and the caller
/// identity. Both inputs are length-prefixed before hashing so that
/// different splits of the same concatenated text produce different keys.
/// Only determinism and a negligible collision rate are relied upon.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageKey([u8; 32]);

impl StorageKey {
    /// Derive the key for a caller identity within a scope.
    pub fn derive(identity: &str, scope: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in [scope, identity] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Scope label for a resource group and operation.
    pub fn scope_label(group: &str, operation: &str) -> String {
        format!("{}-{}", group, operation)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageKey({})", self)
    }
}
