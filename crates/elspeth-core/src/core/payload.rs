// elspeth-core/src/core/payload.rs
// ============================================================================
// Module: Elspeth Payload Store
// Description: Content-addressed blob persistence for large audit payloads.
// Purpose: Give the recorder a stable ref for request/response/row bytes.
// Dependencies: crate::core::hashing
// ============================================================================

//! ## Overview
//! Large payloads (request JSON, response JSON, full row data) are written
//! once under a content-addressed ref and referenced from the audit DB by
//! that ref plus its hash. `put` is idempotent: writing the same bytes twice
//! yields the same ref and is a no-op on the second write.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use thiserror::Error;

use crate::core::hashing::CANONICAL_VERSION;
use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::hash_bytes;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by a [`PayloadStore`] implementation.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The requested ref was not found.
    #[error("payload not found for ref: {0}")]
    NotFound(String),
    /// The ref string was malformed.
    #[error("malformed payload ref: {0}")]
    MalformedRef(String),
    /// An implementation-specific I/O failure occurred.
    #[error("payload store io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: PayloadStore Trait
// ============================================================================

/// A content-addressed blob store.
pub trait PayloadStore {
    /// Stores `bytes`, returning a ref of the form
    /// `{canonical_version}:{sha256_hex}`.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] if the underlying storage write fails.
    fn put(&self, bytes: &[u8]) -> Result<String, PayloadError>;

    /// Retrieves the bytes previously stored under `payload_ref`.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::NotFound`] if the payload has been purged or
    /// never existed, or [`PayloadError::MalformedRef`] if `payload_ref`
    /// does not parse.
    fn get(&self, payload_ref: &str) -> Result<Vec<u8>, PayloadError>;

    /// Returns whether a payload exists under `payload_ref`.
    fn exists(&self, payload_ref: &str) -> bool;
}

/// Parses a ref into its canonical-version and hash components.
///
/// # Errors
///
/// Returns [`PayloadError::MalformedRef`] if `payload_ref` does not contain
/// exactly one `:` separator.
pub fn parse_ref(payload_ref: &str) -> Result<(&str, &str), PayloadError> {
    payload_ref
        .split_once(':')
        .ok_or_else(|| PayloadError::MalformedRef(payload_ref.to_string()))
}

fn make_ref(hash_hex: &str) -> String {
    format!("{CANONICAL_VERSION}:{hash_hex}")
}

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// In-memory content-addressed payload store.
///
/// Grounded on the reference crate's `Arc<Mutex<BTreeMap<...>>>`
/// in-memory store shape (`InMemoryRunStateStore`), generalized from run
/// state to arbitrary byte payloads.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPayloadStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryPayloadStore {
    /// Creates a new, empty in-memory payload store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayloadStore for InMemoryPayloadStore {
    fn put(&self, bytes: &[u8]) -> Result<String, PayloadError> {
        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, bytes);
        let payload_ref = make_ref(&digest.value);
        let mut guard = self
            .blobs
            .write()
            .map_err(|_| PayloadError::Io("payload store lock poisoned".to_string()))?;
        guard.entry(payload_ref.clone()).or_insert_with(|| bytes.to_vec());
        Ok(payload_ref)
    }

    fn get(&self, payload_ref: &str) -> Result<Vec<u8>, PayloadError> {
        parse_ref(payload_ref)?;
        let guard = self
            .blobs
            .read()
            .map_err(|_| PayloadError::Io("payload store lock poisoned".to_string()))?;
        guard
            .get(payload_ref)
            .cloned()
            .ok_or_else(|| PayloadError::NotFound(payload_ref.to_string()))
    }

    fn exists(&self, payload_ref: &str) -> bool {
        self.blobs.read().is_ok_and(|guard| guard.contains_key(payload_ref))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test assertions")]

    use super::*;

    #[test]
    fn put_is_idempotent_under_content_addressing() {
        let store = InMemoryPayloadStore::new();
        let a = store.put(b"hello").unwrap();
        let b = store.put(b"hello").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn get_round_trips_bytes() {
        let store = InMemoryPayloadStore::new();
        let payload_ref = store.put(b"payload bytes").unwrap();
        assert_eq!(store.get(&payload_ref).unwrap(), b"payload bytes");
    }

    #[test]
    fn missing_ref_is_not_found() {
        let store = InMemoryPayloadStore::new();
        let fake = format!("{CANONICAL_VERSION}:{}", "0".repeat(64));
        assert!(matches!(store.get(&fake), Err(PayloadError::NotFound(_))));
    }
}
