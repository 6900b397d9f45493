// elspeth-store-sqlite/src/exporter.rs
// ============================================================================
// Module: Audit Bundle Exporter
// Description: Flattens one run's full relational audit trail into an
//              ordered, optionally HMAC-signed record sequence.
// Purpose: Produce a self-contained bundle a third party can verify without
//          database access.
// Dependencies: elspeth-core, rusqlite, serde_json, hmac, sha2
// ============================================================================

//! ## Overview
//! [`Exporter::export_run`] walks one run's tables in a fixed order — run,
//! node, edge, operation, row, token, token parent, node state, routing
//! event, call, batch, batch member, artifact — and emits each row as a
//! self-contained [`ExportRecord`]: full resolved data, not a hash a reader
//! would need the database to resolve. When a signing key is supplied, each
//! record also carries an HMAC-SHA256 signature over its own canonical JSON,
//! and a terminal `manifest` record folds every signature into a running
//! hash chain so a single `final_hash` attests to the whole sequence.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::core::identifiers::RunId;
use hmac::Hmac;
use hmac::Mac;
use rusqlite::Connection;
use rusqlite::params;
use serde::Serialize;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised exporting a run's audit trail.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The underlying database query failed.
    #[error("export query failed: {0}")]
    Query(String),
    /// A record could not be canonicalized for signing.
    #[error("export record could not be canonicalized: {0}")]
    Canonicalization(String),
    /// The requested run does not exist.
    #[error("run not found: {0}")]
    RunNotFound(String),
}

// ============================================================================
// SECTION: Export Record
// ============================================================================

/// One self-contained record in an exported audit bundle.
#[derive(Debug, Clone, Serialize)]
pub struct ExportRecord {
    /// Discriminates the table this record came from, or `"manifest"` for
    /// the terminal chain-closing record.
    pub record_type: String,
    /// Full field set for this record, as a JSON object.
    pub data: Value,
    /// Base64-encoded HMAC-SHA256 signature over `data`'s canonical JSON,
    /// present only when the export was requested with a signing key.
    pub signature: Option<String>,
}

/// Result of exporting one run.
#[derive(Debug, Clone)]
pub struct ExportBundle {
    /// Records in emission order, including the terminal manifest record
    /// when the export was signed.
    pub records: Vec<ExportRecord>,
    /// Folded hash over every record's signature, present only when the
    /// export was signed.
    pub final_hash: Option<String>,
}

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// SECTION: Exporter
// ============================================================================

/// Reads a run's audit trail directly off a `SQLite` connection and
/// flattens it into an ordered, optionally signed bundle.
pub struct Exporter<'a> {
    connection: &'a Connection,
}

impl<'a> Exporter<'a> {
    /// Creates an exporter bound to an open connection.
    #[must_use]
    pub const fn new(connection: &'a Connection) -> Self {
        Self { connection }
    }

    /// Exports the full audit trail for `run_id` in canonical table order.
    ///
    /// When `sign_key` is provided, each record carries an HMAC-SHA256
    /// signature over its canonical JSON, and the bundle ends with a
    /// `manifest` record whose `final_hash` folds every signature into a
    /// running hash chain.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError`] if the run does not exist or a query fails.
    pub fn export_run(&self, run_id: &RunId, sign_key: Option<&[u8]>) -> Result<ExportBundle, ExportError> {
        let mut records = Vec::new();
        self.export_table(
            "run",
            "SELECT run_id, status, started_at, completed_at, config_hash, settings_json, \
             canonical_version FROM runs WHERE run_id = ?1",
            &[
                "run_id",
                "status",
                "started_at",
                "completed_at",
                "config_hash",
                "settings_json",
                "canonical_version",
            ],
            run_id.as_str(),
            &mut records,
        )?;
        if records.is_empty() {
            return Err(ExportError::RunNotFound(run_id.as_str().to_string()));
        }

        self.export_table(
            "node",
            "SELECT node_id, run_id, plugin_name, node_type, plugin_version, determinism, \
             config_hash, config_json, schema_hash, schema_mode, schema_fields_json, \
             sequence_in_pipeline FROM nodes WHERE run_id = ?1 ORDER BY sequence_in_pipeline",
            &[
                "node_id",
                "run_id",
                "plugin_name",
                "node_type",
                "plugin_version",
                "determinism",
                "config_hash",
                "config_json",
                "schema_hash",
                "schema_mode",
                "schema_fields_json",
                "sequence_in_pipeline",
            ],
            run_id.as_str(),
            &mut records,
        )?;

        self.export_table(
            "edge",
            "SELECT edge_id, run_id, from_node_id, to_node_id, label, default_mode FROM edges \
             WHERE run_id = ?1 ORDER BY edge_id",
            &["edge_id", "run_id", "from_node_id", "to_node_id", "label", "default_mode"],
            run_id.as_str(),
            &mut records,
        )?;

        self.export_table(
            "operation",
            "SELECT operation_id, run_id, node_id, operation_type, status, started_at, \
             completed_at, duration_ms, error_message, input_data_ref, input_data_hash, \
             output_data_ref, output_data_hash FROM operations WHERE run_id = ?1 ORDER BY \
             operation_id",
            &[
                "operation_id",
                "run_id",
                "node_id",
                "operation_type",
                "status",
                "started_at",
                "completed_at",
                "duration_ms",
                "error_message",
                "input_data_ref",
                "input_data_hash",
                "output_data_ref",
                "output_data_hash",
            ],
            run_id.as_str(),
            &mut records,
        )?;

        self.export_table(
            "row",
            "SELECT row_id, run_id, source_node_id, row_index, source_data_hash, \
             source_data_ref FROM rows_ WHERE run_id = ?1 ORDER BY row_index",
            &["row_id", "run_id", "source_node_id", "row_index", "source_data_hash", "source_data_ref"],
            run_id.as_str(),
            &mut records,
        )?;

        self.export_table(
            "token",
            "SELECT t.token_id, t.row_id, t.created_at, t.fork_group_id, t.branch_name, \
             t.join_group_id, t.expand_group_id, t.step_in_pipeline FROM tokens t JOIN rows_ r \
             ON t.row_id = r.row_id WHERE r.run_id = ?1 ORDER BY t.token_id",
            &[
                "token_id",
                "row_id",
                "created_at",
                "fork_group_id",
                "branch_name",
                "join_group_id",
                "expand_group_id",
                "step_in_pipeline",
            ],
            run_id.as_str(),
            &mut records,
        )?;

        self.export_table(
            "token_parent",
            "SELECT tp.token_id, tp.parent_token_id, tp.ordinal FROM token_parents tp JOIN \
             tokens t ON tp.token_id = t.token_id JOIN rows_ r ON t.row_id = r.row_id WHERE \
             r.run_id = ?1 ORDER BY tp.token_id, tp.ordinal",
            &["token_id", "parent_token_id", "ordinal"],
            run_id.as_str(),
            &mut records,
        )?;

        self.export_table(
            "node_state",
            "SELECT state_id, token_id, node_id, run_id, step_index, attempt, input_hash, \
             context_before_json, started_at, phase_json FROM node_states WHERE run_id = ?1 \
             ORDER BY step_index, attempt",
            &[
                "state_id",
                "token_id",
                "node_id",
                "run_id",
                "step_index",
                "attempt",
                "input_hash",
                "context_before_json",
                "started_at",
                "phase_json",
            ],
            run_id.as_str(),
            &mut records,
        )?;

        self.export_table(
            "routing_event",
            "SELECT re.event_id, re.state_id, re.edge_id, re.routing_group_id, re.ordinal, \
             re.mode, re.reason_hash, re.reason_ref, re.created_at FROM routing_events re JOIN \
             node_states ns ON re.state_id = ns.state_id WHERE ns.run_id = ?1 ORDER BY \
             re.routing_group_id, re.ordinal",
            &[
                "event_id",
                "state_id",
                "edge_id",
                "routing_group_id",
                "ordinal",
                "mode",
                "reason_hash",
                "reason_ref",
                "created_at",
            ],
            run_id.as_str(),
            &mut records,
        )?;

        self.export_table(
            "call",
            "SELECT c.call_id, c.state_id, c.operation_id, c.call_index, c.call_type, \
             c.status, c.request_hash, c.response_hash, c.request_ref, c.response_ref, \
             c.latency_ms, c.error_json, c.created_at, c.provider FROM calls c LEFT JOIN \
             node_states ns ON c.state_id = ns.state_id LEFT JOIN operations op ON \
             c.operation_id = op.operation_id WHERE ns.run_id = ?1 OR op.run_id = ?1 ORDER BY \
             c.created_at",
            &[
                "call_id",
                "state_id",
                "operation_id",
                "call_index",
                "call_type",
                "status",
                "request_hash",
                "response_hash",
                "request_ref",
                "response_ref",
                "latency_ms",
                "error_json",
                "created_at",
                "provider",
            ],
            run_id.as_str(),
            &mut records,
        )?;

        self.export_table(
            "batch",
            "SELECT batch_id, run_id, aggregation_node_id, attempt, status, trigger_type, \
             trigger_reason, created_at, completed_at FROM batches WHERE run_id = ?1 ORDER BY \
             batch_id",
            &[
                "batch_id",
                "run_id",
                "aggregation_node_id",
                "attempt",
                "status",
                "trigger_type",
                "trigger_reason",
                "created_at",
                "completed_at",
            ],
            run_id.as_str(),
            &mut records,
        )?;

        self.export_table(
            "batch_member",
            "SELECT bm.batch_id, bm.token_id, bm.ordinal FROM batch_members bm JOIN batches b \
             ON bm.batch_id = b.batch_id WHERE b.run_id = ?1 ORDER BY bm.batch_id, bm.ordinal",
            &["batch_id", "token_id", "ordinal"],
            run_id.as_str(),
            &mut records,
        )?;

        self.export_table(
            "artifact",
            "SELECT artifact_id, run_id, sink_node_id, produced_by_state_id, artifact_type, \
             path_or_uri, content_hash, size_bytes, created_at FROM artifacts WHERE run_id = \
             ?1 ORDER BY created_at",
            &[
                "artifact_id",
                "run_id",
                "sink_node_id",
                "produced_by_state_id",
                "artifact_type",
                "path_or_uri",
                "content_hash",
                "size_bytes",
                "created_at",
            ],
            run_id.as_str(),
            &mut records,
        )?;

        let Some(key) = sign_key else {
            return Ok(ExportBundle { records, final_hash: None });
        };

        for record in &mut records {
            record.signature = Some(sign_record(key, record)?);
        }
        let final_hash = fold_chain(key, &records)?;
        let manifest_signature = sign_bytes(key, final_hash.as_bytes())?;
        records.push(ExportRecord {
            record_type: "manifest".to_string(),
            data: serde_json::json!({ "record_count": records.len(), "final_hash": final_hash }),
            signature: Some(manifest_signature),
        });
        Ok(ExportBundle { records, final_hash: Some(final_hash) })
    }

    /// Runs `query` bound to `run_id`, mapping each row to a JSON object
    /// keyed by `columns`, and appends one [`ExportRecord`] per row.
    fn export_table(
        &self,
        record_type: &str,
        query: &str,
        columns: &[&str],
        run_id: &str,
        records: &mut Vec<ExportRecord>,
    ) -> Result<(), ExportError> {
        let mut statement =
            self.connection.prepare(query).map_err(|err| ExportError::Query(err.to_string()))?;
        let mut rows =
            statement.query(params![run_id]).map_err(|err| ExportError::Query(err.to_string()))?;
        while let Some(row) = rows.next().map_err(|err| ExportError::Query(err.to_string()))? {
            let mut object = serde_json::Map::new();
            for (index, column) in columns.iter().enumerate() {
                let value: rusqlite::types::Value =
                    row.get(index).map_err(|err| ExportError::Query(err.to_string()))?;
                object.insert((*column).to_string(), sqlite_value_to_json(&value));
            }
            records.push(ExportRecord {
                record_type: record_type.to_string(),
                data: Value::Object(object),
                signature: None,
            });
        }
        Ok(())
    }
}

/// Converts a raw `SQLite` value into a JSON value, parsing columns that
/// store pre-serialized JSON text or blobs back into structured values.
fn sqlite_value_to_json(value: &rusqlite::types::Value) -> Value {
    match value {
        rusqlite::types::Value::Null => Value::Null,
        rusqlite::types::Value::Integer(number) => Value::from(*number),
        rusqlite::types::Value::Real(number) => {
            serde_json::Number::from_f64(*number).map_or(Value::Null, Value::Number)
        }
        rusqlite::types::Value::Text(text) => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
        }
        rusqlite::types::Value::Blob(bytes) => {
            serde_json::from_slice(bytes).unwrap_or_else(|_| Value::Null)
        }
    }
}

/// Computes the base16 HMAC-SHA256 signature for one record's canonical JSON.
fn sign_record(key: &[u8], record: &ExportRecord) -> Result<String, ExportError> {
    let canonical = elspeth_core::core::hashing::canonical_json_bytes(&record.data)
        .map_err(|err| ExportError::Canonicalization(err.to_string()))?;
    sign_bytes(key, &canonical)
}

/// Computes the base16 HMAC-SHA256 signature for raw bytes.
fn sign_bytes(key: &[u8], bytes: &[u8]) -> Result<String, ExportError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| ExportError::Canonicalization(format!("invalid signing key: {err}")))?;
    mac.update(bytes);
    Ok(base16_encode(&mac.finalize().into_bytes()))
}

/// Folds every record's signature into a running SHA-256 chain, returning
/// the final digest as lowercase hex.
fn fold_chain(key: &[u8], records: &[ExportRecord]) -> Result<String, ExportError> {
    let mut hasher = Sha256::new();
    hasher.update(key);
    for record in records {
        if let Some(signature) = &record.signature {
            hasher.update(record.record_type.as_bytes());
            hasher.update(signature.as_bytes());
        }
    }
    Ok(base16_encode(&hasher.finalize()))
}

/// Lowercase hex encoding without pulling in an extra dependency.
fn base16_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
