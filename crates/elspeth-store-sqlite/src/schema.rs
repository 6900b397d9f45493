// elspeth-store-sqlite/src/schema.rs
// ============================================================================
// Module: SQLite Schema
// Description: DDL and version migration for the audit recorder's tables.
// Purpose: Keep table shape changes in one place, away from query logic.
// Dependencies: rusqlite
// ============================================================================

//! ## Overview
//! The schema mirrors the relational audit trail directly: one table per
//! entity in `elspeth_core::core::model`, keyed by that entity's identifier.
//! `store_meta` tracks a single schema version row used to fail closed on an
//! unrecognized on-disk layout rather than attempt a blind migration.

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::store::SqliteStoreError;

/// Current on-disk schema version.
const SCHEMA_VERSION: i64 = 1;

/// Creates the schema if absent, or validates the stored version.
///
/// # Errors
///
/// Returns [`SqliteStoreError::VersionMismatch`] if an existing database
/// carries an unrecognized schema version, or [`SqliteStoreError::Db`] if a
/// statement fails.
pub fn initialize(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(DDL).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))
}

/// Full DDL for a fresh database.
const DDL: &str = "
CREATE TABLE runs (
    run_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    config_hash TEXT NOT NULL,
    settings_json BLOB NOT NULL,
    canonical_version TEXT NOT NULL
);

CREATE TABLE nodes (
    node_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
    plugin_name TEXT NOT NULL,
    node_type TEXT NOT NULL,
    plugin_version TEXT NOT NULL,
    determinism TEXT NOT NULL,
    config_hash TEXT NOT NULL,
    config_json BLOB NOT NULL,
    schema_hash TEXT,
    schema_mode TEXT,
    schema_fields_json TEXT NOT NULL,
    sequence_in_pipeline INTEGER NOT NULL
);
CREATE INDEX idx_nodes_run ON nodes (run_id);

CREATE TABLE edges (
    edge_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
    from_node_id TEXT NOT NULL,
    to_node_id TEXT NOT NULL,
    label TEXT NOT NULL,
    default_mode TEXT NOT NULL
);
CREATE INDEX idx_edges_run ON edges (run_id);

CREATE TABLE rows_ (
    row_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
    source_node_id TEXT NOT NULL,
    row_index INTEGER NOT NULL,
    source_data_hash TEXT NOT NULL,
    source_data_ref TEXT
);
CREATE INDEX idx_rows_run ON rows_ (run_id);

CREATE TABLE tokens (
    token_id TEXT PRIMARY KEY,
    row_id TEXT NOT NULL REFERENCES rows_(row_id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    fork_group_id TEXT,
    branch_name TEXT,
    join_group_id TEXT,
    expand_group_id TEXT,
    step_in_pipeline INTEGER
);
CREATE INDEX idx_tokens_row ON tokens (row_id);

CREATE TABLE token_parents (
    token_id TEXT NOT NULL REFERENCES tokens(token_id) ON DELETE CASCADE,
    parent_token_id TEXT NOT NULL REFERENCES tokens(token_id) ON DELETE CASCADE,
    ordinal INTEGER NOT NULL,
    PRIMARY KEY (token_id, parent_token_id)
);

CREATE TABLE node_states (
    state_id TEXT PRIMARY KEY,
    token_id TEXT NOT NULL REFERENCES tokens(token_id) ON DELETE CASCADE,
    node_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    step_index INTEGER NOT NULL,
    attempt INTEGER NOT NULL,
    input_hash TEXT NOT NULL,
    context_before_json BLOB,
    started_at TEXT NOT NULL,
    phase_json TEXT NOT NULL,
    UNIQUE (token_id, node_id, attempt)
);
CREATE INDEX idx_node_states_run ON node_states (run_id);

CREATE TABLE operations (
    operation_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
    node_id TEXT NOT NULL,
    operation_type TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    duration_ms INTEGER,
    error_message TEXT,
    input_data_ref TEXT,
    input_data_hash TEXT,
    output_data_ref TEXT,
    output_data_hash TEXT
);
CREATE INDEX idx_operations_run ON operations (run_id);

CREATE TABLE calls (
    call_id TEXT PRIMARY KEY,
    state_id TEXT REFERENCES node_states(state_id) ON DELETE CASCADE,
    operation_id TEXT REFERENCES operations(operation_id) ON DELETE CASCADE,
    call_index INTEGER NOT NULL,
    call_type TEXT NOT NULL,
    status TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    response_hash TEXT,
    request_ref TEXT,
    response_ref TEXT,
    latency_ms INTEGER,
    error_json TEXT,
    created_at TEXT NOT NULL,
    provider TEXT,
    CHECK ((state_id IS NOT NULL) <> (operation_id IS NOT NULL))
);

CREATE TABLE routing_events (
    event_id TEXT PRIMARY KEY,
    state_id TEXT NOT NULL REFERENCES node_states(state_id) ON DELETE CASCADE,
    edge_id TEXT NOT NULL,
    routing_group_id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    mode TEXT NOT NULL,
    reason_hash TEXT,
    reason_ref TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE token_outcomes (
    token_id TEXT PRIMARY KEY REFERENCES tokens(token_id) ON DELETE CASCADE,
    outcome_json TEXT NOT NULL
);

CREATE TABLE batches (
    batch_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
    aggregation_node_id TEXT NOT NULL,
    attempt INTEGER NOT NULL,
    status TEXT NOT NULL,
    trigger_type TEXT NOT NULL,
    trigger_reason TEXT,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE batch_members (
    batch_id TEXT NOT NULL REFERENCES batches(batch_id) ON DELETE CASCADE,
    token_id TEXT NOT NULL REFERENCES tokens(token_id) ON DELETE CASCADE,
    ordinal INTEGER NOT NULL,
    PRIMARY KEY (batch_id, token_id)
);

CREATE TABLE artifacts (
    artifact_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
    sink_node_id TEXT NOT NULL,
    produced_by_state_id TEXT NOT NULL,
    artifact_type TEXT NOT NULL,
    path_or_uri TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE checkpoints (
    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
    node_id TEXT NOT NULL,
    token_id TEXT NOT NULL,
    sequence_number INTEGER NOT NULL,
    payload_json BLOB NOT NULL,
    upstream_topology_hash TEXT NOT NULL,
    checkpoint_node_config_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (run_id, node_id, token_id)
);
";
