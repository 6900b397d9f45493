// elspeth-core/src/core/hashing.rs
// ============================================================================
// Module: Elspeth Canonical Hashing
// Description: RFC 8785 JSON canonicalization and content hashing utilities.
// Purpose: Provide deterministic hashes for rows, contracts, and audit artifacts.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Elspeth hashes all canonical JSON using RFC 8785 (JCS) to guarantee stable,
//! replayable digests across implementations. Binary payloads are hashed
//! directly over raw bytes.
//!
//! Security posture: hashing is part of audit integrity; a hash mismatch on
//! checkpoint restore or audit reload is a [`DataIntegrityError`](crate::core::error::ElspethError).

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Hash Algorithm
// ============================================================================

/// Supported hash algorithms for Elspeth artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256 hashing (the only algorithm the engine currently emits).
    Sha256,
}

/// Default hash algorithm for Elspeth.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

/// Canonicalization contract version attached to every run.
///
/// Consumers comparing hashes across runs with different values of this
/// string must treat the hashes as incomparable.
pub const CANONICAL_VERSION: &str = "elspeth-canon-v1";

// ============================================================================
// SECTION: Hash Digest
// ============================================================================

/// Deterministic content hash representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashDigest {
    /// Hash algorithm identifier.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex-encoded digest bytes (full width, not truncated).
    pub value: String,
}

impl HashDigest {
    /// Creates a new digest from raw bytes.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            value: hex_encode(bytes),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when computing canonical hashes.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
    /// The value contained a non-finite float (NaN or +/-Infinity).
    #[error("non-finite numeric value is not permitted in canonical json")]
    NonFiniteNumber,
}

// ============================================================================
// SECTION: Hashing Helpers
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails, or
/// [`HashError::NonFiniteNumber`] when the value contains NaN or infinity.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    let as_value =
        serde_json::to_value(value).map_err(|err| HashError::Canonicalization(err.to_string()))?;
    reject_non_finite(&as_value)?;
    serde_jcs::to_vec(&as_value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes canonical JSON using the provided algorithm.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails, or
/// [`HashError::NonFiniteNumber`] when the value contains NaN or infinity.
pub fn hash_canonical_json<T: Serialize + ?Sized>(
    algorithm: HashAlgorithm,
    value: &T,
) -> Result<HashDigest, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(algorithm, &bytes))
}

/// Returns the 32 hex-character `stable_hash` prefix mandated for row and
/// contract hashing: the leading half of the SHA-256 digest over canonical
/// JSON of `value`.
///
/// # Errors
///
/// Returns [`HashError`] under the same conditions as [`hash_canonical_json`].
pub fn stable_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    let digest = hash_canonical_json(DEFAULT_HASH_ALGORITHM, value)?;
    Ok(digest.value[.. 32].to_string())
}

/// Hashes raw bytes using the provided algorithm.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            let digest = hasher.finalize();
            HashDigest::new(HashAlgorithm::Sha256, &digest)
        }
    }
}

/// Rejects a JSON value containing a float that round-tripped from NaN or
/// infinity. `serde_json` cannot represent these directly, but upstream
/// producers (e.g. an `f64` ingress path) may hand us a `Value::Null` or a
/// sentinel string; this walk is the single choke point that enforces the
/// "NaN/Inf rejected at ingress" rule for anything already shaped as JSON.
fn reject_non_finite(value: &serde_json::Value) -> Result<(), HashError> {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(HashError::NonFiniteNumber);
                }
            }
            Ok(())
        }
        serde_json::Value::Array(items) => items.iter().try_for_each(reject_non_finite),
        serde_json::Value::Object(map) => map.values().try_for_each(reject_non_finite),
        serde_json::Value::Null | serde_json::Value::Bool(_) | serde_json::Value::String(_) => {
            Ok(())
        }
    }
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
