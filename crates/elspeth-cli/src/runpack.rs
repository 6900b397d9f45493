// elspeth-cli/src/runpack.rs
// ============================================================================
// Module: Runpack Export / Verify
// Description: Serializes a signed audit bundle to disk and independently
//              re-verifies one, without needing database access.
// Purpose: Back the `runpack export` / `runpack verify` CLI commands.
// Dependencies: elspeth-core, elspeth-store-sqlite, hmac, sha2, serde_json
// ============================================================================

//! ## Overview
//! `runpack export` asks [`elspeth_store_sqlite::SqliteRunRecorder`] for a
//! signed [`elspeth_store_sqlite::ExportBundle`] and writes it to a plain
//! JSON file. `runpack verify` reads that file back and recomputes every
//! record's HMAC and the manifest's folded hash independently — exactly what
//! a third party without database access would do — rather than trusting
//! the `signature`/`final_hash` fields at face value.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;

use elspeth_core::core::hashing::canonical_json_bytes;
use elspeth_store_sqlite::ExportBundle;
use hmac::Hmac;
use hmac::Mac;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

/// HMAC over SHA-256, used for both per-record and manifest signatures.
type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised writing or re-verifying a runpack bundle file.
#[derive(Debug, Error)]
pub enum RunpackError {
    /// The bundle file could not be read or written.
    #[error("runpack io error at {path}: {detail}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying I/O failure.
        detail: String,
    },
    /// The bundle file was not valid JSON for this schema.
    #[error("runpack file is not a valid bundle: {0}")]
    Malformed(String),
    /// A record's canonical JSON could not be computed.
    #[error("could not canonicalize record: {0}")]
    Canonicalization(String),
    /// The signing key was rejected by HMAC construction.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    /// A record's signature did not match its recomputed value.
    #[error("signature mismatch on record {index} ({record_type})")]
    SignatureMismatch {
        /// Zero-based position of the offending record.
        index: usize,
        /// The offending record's type.
        record_type: String,
    },
    /// The manifest's folded hash did not match the recomputed chain.
    #[error("manifest final_hash does not match the recomputed chain")]
    ChainMismatch,
    /// The bundle was signed (or claims to be) but carries no manifest.
    #[error("signed bundle is missing its terminal manifest record")]
    MissingManifest,
}

// ============================================================================
// SECTION: Bundle File Format
// ============================================================================

/// One record in a runpack bundle file, mirroring
/// [`elspeth_store_sqlite::ExportRecord`] with `Deserialize` added so a
/// bundle can round-trip through a plain JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleRecord {
    /// Discriminates the table this record came from, or `"manifest"`.
    pub record_type: String,
    /// Full field set for this record, as a JSON object.
    pub data: Value,
    /// HMAC-SHA256 signature over `data`'s canonical JSON, when signed.
    pub signature: Option<String>,
}

/// On-disk shape of an exported runpack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleFile {
    /// Records in emission order, including a terminal manifest when signed.
    pub records: Vec<BundleRecord>,
    /// Folded hash over every record's signature, when signed.
    pub final_hash: Option<String>,
}

impl From<&ExportBundle> for BundleFile {
    fn from(bundle: &ExportBundle) -> Self {
        Self {
            records: bundle
                .records
                .iter()
                .map(|record| BundleRecord {
                    record_type: record.record_type.clone(),
                    data: record.data.clone(),
                    signature: record.signature.clone(),
                })
                .collect(),
            final_hash: bundle.final_hash.clone(),
        }
    }
}

/// Writes `bundle` to `path` as pretty-printed JSON.
///
/// # Errors
///
/// Returns [`RunpackError::Io`] if the file cannot be written.
pub fn write_bundle(path: &Path, bundle: &ExportBundle) -> Result<(), RunpackError> {
    let file = BundleFile::from(bundle);
    let text = serde_json::to_string_pretty(&file)
        .map_err(|err| RunpackError::Malformed(err.to_string()))?;
    std::fs::write(path, text).map_err(|err| RunpackError::Io {
        path: path.display().to_string(),
        detail: err.to_string(),
    })
}

/// Loads a bundle file from `path`.
///
/// # Errors
///
/// Returns [`RunpackError::Io`] if the file cannot be read, or
/// [`RunpackError::Malformed`] if it is not a valid bundle.
pub fn read_bundle(path: &Path) -> Result<BundleFile, RunpackError> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| RunpackError::Io { path: path.display().to_string(), detail: err.to_string() })?;
    serde_json::from_str(&text).map_err(|err| RunpackError::Malformed(err.to_string()))
}

// ============================================================================
// SECTION: Verification
// ============================================================================

/// Independently re-verifies every signature and the manifest's folded hash
/// in `bundle` against `sign_key`.
///
/// # Errors
///
/// Returns [`RunpackError::SignatureMismatch`] for the first record whose
/// recomputed signature disagrees, or [`RunpackError::ChainMismatch`] if the
/// manifest's `final_hash` does not match the recomputed chain.
pub fn verify_bundle(bundle: &BundleFile, sign_key: &[u8]) -> Result<(), RunpackError> {
    let Some((manifest, records)) = bundle.records.split_last() else {
        return Err(RunpackError::MissingManifest);
    };
    if manifest.record_type != "manifest" {
        return Err(RunpackError::MissingManifest);
    }

    for (index, record) in records.iter().enumerate() {
        let expected = sign_record(sign_key, record)?;
        if record.signature.as_deref() != Some(expected.as_str()) {
            return Err(RunpackError::SignatureMismatch { index, record_type: record.record_type.clone() });
        }
    }

    let final_hash = fold_chain(sign_key, records);
    let manifest_expected = sign_bytes(sign_key, final_hash.as_bytes())?;
    if manifest.signature.as_deref() != Some(manifest_expected.as_str()) {
        return Err(RunpackError::SignatureMismatch { index: records.len(), record_type: "manifest".to_string() });
    }
    let claimed_hash = manifest.data.get("final_hash").and_then(Value::as_str);
    if claimed_hash != Some(final_hash.as_str()) || bundle.final_hash.as_deref() != Some(final_hash.as_str()) {
        return Err(RunpackError::ChainMismatch);
    }
    Ok(())
}

/// Recomputes the HMAC-SHA256 signature a record should carry under `key`.
fn sign_record(key: &[u8], record: &BundleRecord) -> Result<String, RunpackError> {
    let canonical =
        canonical_json_bytes(&record.data).map_err(|err| RunpackError::Canonicalization(err.to_string()))?;
    sign_bytes(key, &canonical)
}

/// Computes an HMAC-SHA256 signature over `bytes` under `key`, hex-encoded.
fn sign_bytes(key: &[u8], bytes: &[u8]) -> Result<String, RunpackError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|err| RunpackError::InvalidKey(err.to_string()))?;
    mac.update(bytes);
    Ok(base16_encode(&mac.finalize().into_bytes()))
}

/// Folds every signed record's `(record_type, signature)` pair into a single
/// chained SHA-256 hash, seeded with `key`.
fn fold_chain(key: &[u8], records: &[BundleRecord]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key);
    for record in records {
        if let Some(signature) = &record.signature {
            hasher.update(record.record_type.as_bytes());
            hasher.update(signature.as_bytes());
        }
    }
    base16_encode(&hasher.finalize())
}

/// Hex-encodes `bytes` as lowercase base16.
fn base16_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
