// elspeth-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Run Recorder
// Description: Durable RunRecorder backed by SQLite WAL.
// Purpose: Persist the full relational audit trail with deterministic
//          serialization and fail-closed integrity checks.
// Dependencies: elspeth-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`SqliteRunRecorder`] implements [`RunRecorder`] against the schema in
//! [`crate::schema`]. Every write happens inside its own transaction on a
//! single shared connection; SQLite's own locking serializes concurrent
//! writers, so the audit trail stays causally ordered without an
//! application-level lock beyond the connection mutex itself.
//!
//! Checkpoints (`persist_checkpoint`/`read_checkpoint`/`delete_checkpoint`)
//! are keyed by `(run_id, node_id, token_id)` with an `INSERT OR REPLACE`
//! upsert, so a re-persist for the same key simply supersedes the prior row
//! rather than needing a separate update path.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use elspeth_core::core::identifiers::NodeId;
use elspeth_core::core::identifiers::OperationId;
use elspeth_core::core::identifiers::RunId;
use elspeth_core::core::identifiers::StateId;
use elspeth_core::core::identifiers::TokenId;
use elspeth_core::core::model::Artifact;
use elspeth_core::core::model::BatchMember;
use elspeth_core::core::model::Call;
use elspeth_core::core::model::Checkpoint;
use elspeth_core::core::model::Edge;
use elspeth_core::core::model::Node;
use elspeth_core::core::model::NodeState;
use elspeth_core::core::model::NodeStatePhase;
use elspeth_core::core::model::Operation;
use elspeth_core::core::model::OperationStatus;
use elspeth_core::core::model::Row;
use elspeth_core::core::model::RoutingEvent;
use elspeth_core::core::model::Run;
use elspeth_core::core::model::RunStatus;
use elspeth_core::core::model::Token;
use elspeth_core::core::model::TokenOutcome;
use elspeth_core::core::model::TokenParent;
use elspeth_core::core::time::Timestamp;
use elspeth_core::interfaces::CallParent;
use elspeth_core::interfaces::RecorderError;
use elspeth_core::interfaces::RunRecorder;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

use crate::schema;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` audit recorder.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` recorder errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for RecorderError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Constraint(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Corrupt(message),
        }
    }
}

// ============================================================================
// SECTION: Recorder
// ============================================================================

/// `SQLite`-backed [`RunRecorder`] with WAL support.
#[derive(Clone)]
pub struct SqliteRunRecorder {
    connection: Arc<Mutex<Connection>>,
    call_index_counters: Arc<Mutex<std::collections::HashMap<String, Arc<std::sync::atomic::AtomicU32>>>>,
}

impl SqliteRunRecorder {
    /// Opens a `SQLite`-backed audit recorder, creating the schema on first use.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(config)?;
        schema::initialize(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            call_index_counters: Arc::new(Mutex::new(std::collections::HashMap::new())),
        })
    }

    /// Locks the shared connection, translating mutex poisoning into a
    /// recorder error instead of panicking.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, RecorderError> {
        self.connection.lock().map_err(|_| RecorderError::Io("connection mutex poisoned".to_string()))
    }

    /// Returns the shared atomic counter for a call parent, creating it on
    /// first use and seeding it from the highest index already persisted so
    /// a reopened recorder continues the sequence correctly.
    fn counter_for(&self, parent: &CallParent) -> Arc<std::sync::atomic::AtomicU32> {
        let key = match parent {
            CallParent::State(state_id) => format!("state:{}", state_id.as_str()),
            CallParent::Operation(operation_id) => format!("operation:{}", operation_id.as_str()),
        };
        let mut counters = match self.call_index_counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        counters
            .entry(key)
            .or_insert_with(|| Arc::new(std::sync::atomic::AtomicU32::new(self.seed_for(parent))))
            .clone()
    }

    /// Reads the persisted high-water mark for a call parent, used only to
    /// seed a fresh in-memory counter on recorder startup.
    fn seed_for(&self, parent: &CallParent) -> u32 {
        let (column, value) = match parent {
            CallParent::State(state_id) => ("state_id", state_id.as_str()),
            CallParent::Operation(operation_id) => ("operation_id", operation_id.as_str()),
        };
        let Ok(guard) = self.connection.lock() else {
            return 0;
        };
        let query = format!("SELECT COALESCE(MAX(call_index) + 1, 0) FROM calls WHERE {column} = ?1");
        guard
            .query_row(&query, params![value], |row| row.get::<_, i64>(0))
            .map(|value| u32::try_from(value).unwrap_or(u32::MAX))
            .unwrap_or(0)
    }
}

impl RunRecorder for SqliteRunRecorder {
    fn open_run(&self, run: &Run) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        let settings = serde_json::to_vec(&run.settings_json)
            .map_err(|err| RecorderError::Corrupt(err.to_string()))?;
        let started_at = format_timestamp(run.started_at)?;
        let completed_at = run.completed_at.map(format_timestamp).transpose()?;
        guard
            .execute(
                "INSERT INTO runs (run_id, status, started_at, completed_at, config_hash, \
                 settings_json, canonical_version) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    run.run_id.as_str(),
                    status_label(run.status),
                    started_at,
                    completed_at,
                    run.config_hash,
                    settings,
                    run.canonical_version,
                ],
            )
            .map_err(|err| constraint_or_db(&err, "run already open"))?;
        Ok(())
    }

    fn close_run(&self, run_id: &RunId, status: RunStatus) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        let completed_at = format_timestamp(Timestamp::now())?;
        let changed = guard
            .execute(
                "UPDATE runs SET status = ?1, completed_at = ?2 WHERE run_id = ?3",
                params![status_label(status), completed_at, run_id.as_str()],
            )
            .map_err(|err| RecorderError::Io(err.to_string()))?;
        if changed == 0 {
            return Err(RecorderError::Constraint(format!("unknown run: {}", run_id.as_str())));
        }
        Ok(())
    }

    fn register_node(&self, node: &Node) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        let config_json = serde_json::to_vec(&node.config_json)
            .map_err(|err| RecorderError::Corrupt(err.to_string()))?;
        let schema_fields = serde_json::to_string(&node.schema_fields)
            .map_err(|err| RecorderError::Corrupt(err.to_string()))?;
        let schema_mode = node.schema_mode.map(schema_mode_label);
        guard
            .execute(
                "INSERT INTO nodes (node_id, run_id, plugin_name, node_type, plugin_version, \
                 determinism, config_hash, config_json, schema_hash, schema_mode, \
                 schema_fields_json, sequence_in_pipeline) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, \
                 ?8, ?9, ?10, ?11, ?12)",
                params![
                    node.node_id.as_str(),
                    node.run_id.as_str(),
                    node.plugin_name,
                    node_type_label(node.node_type),
                    node.plugin_version,
                    determinism_label(node.determinism),
                    node.config_hash,
                    config_json,
                    node.schema_hash,
                    schema_mode,
                    schema_fields,
                    node.sequence_in_pipeline,
                ],
            )
            .map_err(|err| constraint_or_db(&err, "node already registered"))?;
        Ok(())
    }

    fn register_edge(&self, edge: &Edge) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO edges (edge_id, run_id, from_node_id, to_node_id, label, \
                 default_mode) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    edge.edge_id.as_str(),
                    edge.run_id.as_str(),
                    edge.from_node_id.as_str(),
                    edge.to_node_id.as_str(),
                    edge.label,
                    routing_mode_label(edge.default_mode),
                ],
            )
            .map_err(|err| constraint_or_db(&err, "edge already registered"))?;
        Ok(())
    }

    fn allocate_call_index(&self, parent: CallParent) -> u32 {
        let counter = self.counter_for(&parent);
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    fn open_state(&self, state: &NodeState) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        let context_before = state
            .context_before_json
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|err| RecorderError::Corrupt(err.to_string()))?;
        let started_at = format_timestamp(state.started_at)?;
        let phase_json = serde_json::to_string(&state.phase)
            .map_err(|err| RecorderError::Corrupt(err.to_string()))?;
        guard
            .execute(
                "INSERT INTO node_states (state_id, token_id, node_id, run_id, step_index, \
                 attempt, input_hash, context_before_json, started_at, phase_json) VALUES (?1, \
                 ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    state.state_id.as_str(),
                    state.token_id.as_str(),
                    state.node_id.as_str(),
                    state.run_id.as_str(),
                    state.step_index,
                    state.attempt,
                    state.input_hash,
                    context_before,
                    started_at,
                    phase_json,
                ],
            )
            .map_err(|err| constraint_or_db(&err, "state already open"))?;
        Ok(())
    }

    fn complete_state(&self, state_id: &StateId, phase: NodeStatePhase) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        let current: String = guard
            .query_row(
                "SELECT phase_json FROM node_states WHERE state_id = ?1",
                params![state_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| RecorderError::Io(err.to_string()))?
            .ok_or_else(|| RecorderError::Constraint(format!("unknown state: {}", state_id.as_str())))?;
        let current_phase: NodeStatePhase =
            serde_json::from_str(&current).map_err(|err| RecorderError::Corrupt(err.to_string()))?;
        if matches!(current_phase, NodeStatePhase::Completed { .. } | NodeStatePhase::Failed { .. }) {
            return Err(RecorderError::Constraint(format!(
                "state {} already terminal",
                state_id.as_str()
            )));
        }
        let phase_json =
            serde_json::to_string(&phase).map_err(|err| RecorderError::Corrupt(err.to_string()))?;
        guard
            .execute(
                "UPDATE node_states SET phase_json = ?1 WHERE state_id = ?2",
                params![phase_json, state_id.as_str()],
            )
            .map_err(|err| RecorderError::Io(err.to_string()))?;
        Ok(())
    }

    fn record_call(&self, call: &Call) -> Result<(), RecorderError> {
        if call.state_id.is_some() == call.operation_id.is_some() {
            return Err(RecorderError::Constraint(
                "call must have exactly one of state_id/operation_id set".to_string(),
            ));
        }
        let guard = self.lock()?;
        let created_at = format_timestamp(call.created_at)?;
        let error_json = call
            .error_json
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| RecorderError::Corrupt(err.to_string()))?;
        guard
            .execute(
                "INSERT INTO calls (call_id, state_id, operation_id, call_index, call_type, \
                 status, request_hash, response_hash, request_ref, response_ref, latency_ms, \
                 error_json, created_at, provider) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, \
                 ?10, ?11, ?12, ?13, ?14)",
                params![
                    call.call_id.as_str(),
                    call.state_id.as_ref().map(elspeth_core::core::identifiers::StateId::as_str),
                    call.operation_id
                        .as_ref()
                        .map(elspeth_core::core::identifiers::OperationId::as_str),
                    call.call_index,
                    call_type_label(call.call_type),
                    call_status_label(call.status),
                    call.request_hash,
                    call.response_hash,
                    call.request_ref,
                    call.response_ref,
                    call.latency_ms.map(|v| v as i64),
                    error_json,
                    created_at,
                    call.provider,
                ],
            )
            .map_err(|err| constraint_or_db(&err, "call already recorded"))?;
        Ok(())
    }

    fn record_routing_event(&self, event: &RoutingEvent) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        let created_at = format_timestamp(event.created_at)?;
        guard
            .execute(
                "INSERT INTO routing_events (event_id, state_id, edge_id, routing_group_id, \
                 ordinal, mode, reason_hash, reason_ref, created_at) VALUES (?1, ?2, ?3, ?4, ?5, \
                 ?6, ?7, ?8, ?9)",
                params![
                    event.event_id.as_str(),
                    event.state_id.as_str(),
                    event.edge_id.as_str(),
                    event.routing_group_id.as_str(),
                    event.ordinal,
                    routing_mode_label(event.mode),
                    event.reason_hash,
                    event.reason_ref,
                    created_at,
                ],
            )
            .map_err(|err| constraint_or_db(&err, "routing event already recorded"))?;
        Ok(())
    }

    fn record_token_outcome(
        &self,
        token_id: &TokenId,
        outcome: &TokenOutcome,
    ) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        let outcome_json =
            serde_json::to_string(outcome).map_err(|err| RecorderError::Corrupt(err.to_string()))?;
        guard
            .execute(
                "INSERT INTO token_outcomes (token_id, outcome_json) VALUES (?1, ?2)",
                params![token_id.as_str(), outcome_json],
            )
            .map_err(|err| constraint_or_db(&err, "token already has an outcome"))?;
        Ok(())
    }

    fn add_batch_member(&self, member: &BatchMember) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO batch_members (batch_id, token_id, ordinal) VALUES (?1, ?2, ?3)",
                params![member.batch_id.as_str(), member.token_id.as_str(), member.ordinal],
            )
            .map_err(|err| constraint_or_db(&err, "batch member already recorded"))?;
        Ok(())
    }

    fn record_artifact(&self, artifact: &Artifact) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        let created_at = format_timestamp(artifact.created_at)?;
        guard
            .execute(
                "INSERT INTO artifacts (artifact_id, run_id, sink_node_id, \
                 produced_by_state_id, artifact_type, path_or_uri, content_hash, size_bytes, \
                 created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    artifact.artifact_id.as_str(),
                    artifact.run_id.as_str(),
                    artifact.sink_node_id.as_str(),
                    artifact.produced_by_state_id.as_str(),
                    artifact.artifact_type,
                    artifact.path_or_uri,
                    artifact.content_hash,
                    artifact.size_bytes as i64,
                    created_at,
                ],
            )
            .map_err(|err| constraint_or_db(&err, "artifact already recorded"))?;
        Ok(())
    }

    fn record_row(&self, row: &Row) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO rows_ (row_id, run_id, source_node_id, row_index, \
                 source_data_hash, source_data_ref) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.row_id.as_str(),
                    row.run_id.as_str(),
                    row.source_node_id.as_str(),
                    row.row_index as i64,
                    row.source_data_hash,
                    row.source_data_ref,
                ],
            )
            .map_err(|err| constraint_or_db(&err, "row already recorded"))?;
        Ok(())
    }

    fn record_token(&self, token: &Token) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        let created_at = format_timestamp(token.created_at)?;
        guard
            .execute(
                "INSERT INTO tokens (token_id, row_id, created_at, fork_group_id, \
                 branch_name, join_group_id, expand_group_id, step_in_pipeline) VALUES (?1, \
                 ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    token.token_id.as_str(),
                    token.row_id.as_str(),
                    created_at,
                    token.fork_group_id.as_ref().map(elspeth_core::core::identifiers::ForkGroupId::as_str),
                    token.branch_name,
                    token.join_group_id.as_ref().map(elspeth_core::core::identifiers::JoinGroupId::as_str),
                    token
                        .expand_group_id
                        .as_ref()
                        .map(elspeth_core::core::identifiers::ExpandGroupId::as_str),
                    token.step_in_pipeline,
                ],
            )
            .map_err(|err| constraint_or_db(&err, "token already recorded"))?;
        Ok(())
    }

    fn record_token_parent(&self, link: &TokenParent) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO token_parents (token_id, parent_token_id, ordinal) VALUES (?1, \
                 ?2, ?3)",
                params![link.token_id.as_str(), link.parent_token_id.as_str(), link.ordinal],
            )
            .map_err(|err| constraint_or_db(&err, "token parent link already recorded"))?;
        Ok(())
    }

    fn begin_operation(&self, operation: &Operation) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        let started_at = format_timestamp(operation.started_at)?;
        guard
            .execute(
                "INSERT INTO operations (operation_id, run_id, node_id, operation_type, \
                 status, started_at, completed_at, duration_ms, error_message, \
                 input_data_ref, input_data_hash, output_data_ref, output_data_hash) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL, NULL, ?7, ?8, NULL, NULL)",
                params![
                    operation.operation_id.as_str(),
                    operation.run_id.as_str(),
                    operation.node_id.as_str(),
                    operation_type_label(operation.operation_type),
                    operation_status_label(operation.status),
                    started_at,
                    operation.input_data_ref,
                    operation.input_data_hash,
                ],
            )
            .map_err(|err| constraint_or_db(&err, "operation already open"))?;
        Ok(())
    }

    fn complete_operation(
        &self,
        operation_id: &OperationId,
        status: OperationStatus,
        completed_at: Timestamp,
        duration_ms: Option<u64>,
        error_message: Option<&str>,
        output_data_ref: Option<&str>,
        output_data_hash: Option<&str>,
    ) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        let current: String = guard
            .query_row(
                "SELECT status FROM operations WHERE operation_id = ?1",
                params![operation_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| RecorderError::Io(err.to_string()))?
            .ok_or_else(|| {
                RecorderError::Constraint(format!("unknown operation: {}", operation_id.as_str()))
            })?;
        if current != operation_status_label(OperationStatus::Open) {
            return Err(RecorderError::Constraint(format!(
                "operation {} already terminal",
                operation_id.as_str()
            )));
        }
        let completed_at = format_timestamp(completed_at)?;
        guard
            .execute(
                "UPDATE operations SET status = ?1, completed_at = ?2, duration_ms = ?3, \
                 error_message = ?4, output_data_ref = ?5, output_data_hash = ?6 WHERE \
                 operation_id = ?7",
                params![
                    operation_status_label(status),
                    completed_at,
                    duration_ms.map(|v| v as i64),
                    error_message,
                    output_data_ref,
                    output_data_hash,
                    operation_id.as_str(),
                ],
            )
            .map_err(|err| RecorderError::Io(err.to_string()))?;
        Ok(())
    }

    fn persist_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        let payload = serde_json::to_vec(&checkpoint.payload_json)
            .map_err(|err| RecorderError::Corrupt(err.to_string()))?;
        let created_at = format_timestamp(checkpoint.created_at)?;
        guard
            .execute(
                "INSERT OR REPLACE INTO checkpoints (run_id, node_id, token_id, \
                 sequence_number, payload_json, upstream_topology_hash, \
                 checkpoint_node_config_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, \
                 ?7, ?8)",
                params![
                    checkpoint.run_id.as_str(),
                    checkpoint.node_id.as_str(),
                    checkpoint.token_id.as_str(),
                    checkpoint.sequence_number,
                    payload,
                    checkpoint.upstream_topology_hash,
                    checkpoint.checkpoint_node_config_hash,
                    created_at,
                ],
            )
            .map_err(|err| RecorderError::Io(err.to_string()))?;
        Ok(())
    }

    fn read_checkpoint(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        token_id: &TokenId,
    ) -> Result<Option<Checkpoint>, RecorderError> {
        let guard = self.lock()?;
        guard
            .query_row(
                "SELECT sequence_number, payload_json, upstream_topology_hash, \
                 checkpoint_node_config_hash, created_at FROM checkpoints WHERE run_id = ?1 \
                 AND node_id = ?2 AND token_id = ?3",
                params![run_id.as_str(), node_id.as_str(), token_id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|err| RecorderError::Io(err.to_string()))?
            .map(|(sequence_number, payload, upstream_topology_hash, checkpoint_node_config_hash, created_at)| {
                let payload_json = serde_json::from_slice(&payload)
                    .map_err(|err| RecorderError::Corrupt(err.to_string()))?;
                Ok(Checkpoint {
                    run_id: run_id.clone(),
                    node_id: node_id.clone(),
                    token_id: token_id.clone(),
                    sequence_number,
                    payload_json,
                    upstream_topology_hash,
                    checkpoint_node_config_hash,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .transpose()
    }

    fn delete_checkpoint(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        token_id: &TokenId,
    ) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        guard
            .execute(
                "DELETE FROM checkpoints WHERE run_id = ?1 AND node_id = ?2 AND token_id = ?3",
                params![run_id.as_str(), node_id.as_str(), token_id.as_str()],
            )
            .map_err(|err| RecorderError::Io(err.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Row, Token, Operation Persistence
// ============================================================================
//
// Implemented as `RunRecorder` methods above; `run_status` and `export_run`
// below stay inherent since they are CLI conveniences, not part of the
// trait's contract.

impl SqliteRunRecorder {
    /// Returns the current status of `run_id`, or `None` if it has never
    /// been opened in this store.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the query fails.
    pub fn run_status(&self, run_id: &RunId) -> Result<Option<RunStatus>, RecorderError> {
        let guard = self.lock()?;
        let label: Option<String> = guard
            .query_row("SELECT status FROM runs WHERE run_id = ?1", params![run_id.as_str()], |row| row.get(0))
            .optional()
            .map_err(|err| RecorderError::Io(err.to_string()))?;
        label.map(|label| status_from_label(&label)).transpose()
    }

    /// Exports the run's full audit trail, optionally HMAC-signed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::exporter::ExportError`] if the run is unknown or a
    /// query fails.
    pub fn export_run(
        &self,
        run_id: &RunId,
        sign_key: Option<&[u8]>,
    ) -> Result<crate::exporter::ExportBundle, crate::exporter::ExportError> {
        let guard = self
            .connection
            .lock()
            .map_err(|_| crate::exporter::ExportError::Query("connection mutex poisoned".to_string()))?;
        crate::exporter::Exporter::new(&guard).export_run(run_id, sign_key)
    }
}

// ============================================================================
// SECTION: Connection Setup
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(connection: &Connection, config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

// ============================================================================
// SECTION: Label Mappings
// ============================================================================

/// Formats a [`Timestamp`] as RFC 3339 for storage.
fn format_timestamp(value: Timestamp) -> Result<String, RecorderError> {
    value.to_rfc3339().map_err(|err| RecorderError::Corrupt(err.to_string()))
}

/// Parses an RFC 3339 string column back into a [`Timestamp`].
fn parse_timestamp(text: &str) -> Result<Timestamp, RecorderError> {
    let parsed = time::OffsetDateTime::parse(text, &time::format_description::well_known::Rfc3339)
        .map_err(|err| RecorderError::Corrupt(err.to_string()))?;
    Ok(Timestamp::from_offset(parsed))
}

/// Returns the stored label for a [`RunStatus`].
const fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
    }
}

/// Parses a stored run status label back into [`RunStatus`].
fn status_from_label(label: &str) -> Result<RunStatus, RecorderError> {
    match label {
        "running" => Ok(RunStatus::Running),
        "completed" => Ok(RunStatus::Completed),
        "failed" => Ok(RunStatus::Failed),
        other => Err(RecorderError::Corrupt(format!("unknown run status label: {other}"))),
    }
}

/// Returns the stored label for a [`elspeth_core::core::model::NodeType`].
const fn node_type_label(node_type: elspeth_core::core::model::NodeType) -> &'static str {
    use elspeth_core::core::model::NodeType;
    match node_type {
        NodeType::Source => "source",
        NodeType::Transform => "transform",
        NodeType::Sink => "sink",
        NodeType::Gate => "gate",
        NodeType::Aggregation => "aggregation",
        NodeType::Coalesce => "coalesce",
    }
}

/// Returns the stored label for a [`elspeth_core::core::model::Determinism`].
const fn determinism_label(value: elspeth_core::core::model::Determinism) -> &'static str {
    use elspeth_core::core::model::Determinism;
    match value {
        Determinism::Deterministic => "deterministic",
        Determinism::NonDeterministic => "non_deterministic",
        Determinism::IoRead => "io_read",
        Determinism::IoWrite => "io_write",
        Determinism::ExternalCall => "external_call",
    }
}

/// Returns the stored label for a [`elspeth_core::core::contract::SchemaMode`].
const fn schema_mode_label(mode: elspeth_core::core::contract::SchemaMode) -> &'static str {
    use elspeth_core::core::contract::SchemaMode;
    match mode {
        SchemaMode::Fixed => "fixed",
        SchemaMode::Flexible => "flexible",
        SchemaMode::Observed => "observed",
    }
}

/// Returns the stored label for a [`elspeth_core::core::model::RoutingMode`].
const fn routing_mode_label(mode: elspeth_core::core::model::RoutingMode) -> &'static str {
    use elspeth_core::core::model::RoutingMode;
    match mode {
        RoutingMode::Move => "move",
        RoutingMode::Copy => "copy",
        RoutingMode::Divert => "divert",
    }
}

/// Returns the stored label for a [`elspeth_core::core::model::CallType`].
const fn call_type_label(value: elspeth_core::core::model::CallType) -> &'static str {
    use elspeth_core::core::model::CallType;
    match value {
        CallType::Llm => "llm",
        CallType::Http => "http",
        CallType::Sql => "sql",
        CallType::Filesystem => "filesystem",
    }
}

/// Returns the stored label for a [`elspeth_core::core::model::CallStatus`].
const fn call_status_label(value: elspeth_core::core::model::CallStatus) -> &'static str {
    use elspeth_core::core::model::CallStatus;
    match value {
        CallStatus::Success => "success",
        CallStatus::Error => "error",
    }
}

/// Returns the stored label for a [`elspeth_core::core::model::OperationType`].
const fn operation_type_label(value: elspeth_core::core::model::OperationType) -> &'static str {
    use elspeth_core::core::model::OperationType;
    match value {
        OperationType::SourceLoad => "source_load",
        OperationType::SinkWrite => "sink_write",
    }
}

/// Returns the stored label for an [`OperationStatus`].
const fn operation_status_label(value: OperationStatus) -> &'static str {
    match value {
        OperationStatus::Open => "open",
        OperationStatus::Completed => "completed",
        OperationStatus::Failed => "failed",
        OperationStatus::Pending => "pending",
    }
}

/// Maps a `SQLite` constraint violation to [`RecorderError::Constraint`],
/// and any other error to [`RecorderError::Io`].
fn constraint_or_db(err: &rusqlite::Error, constraint_message: &str) -> RecorderError {
    match err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            RecorderError::Constraint(constraint_message.to_string())
        }
        other => RecorderError::Io(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test assertions")]

    use super::*;

    fn seeded_recorder() -> (tempfile::TempDir, SqliteRunRecorder) {
        let dir = tempfile::tempdir().unwrap();
        let config = SqliteStoreConfig {
            path: dir.path().join("audit.db"),
            busy_timeout_ms: 1_000,
            journal_mode: SqliteStoreMode::Wal,
            sync_mode: SqliteSyncMode::Normal,
        };
        let recorder = SqliteRunRecorder::open(&config).unwrap();
        recorder
            .open_run(&Run {
                run_id: RunId::new("run-1"),
                status: RunStatus::Running,
                started_at: Timestamp::now(),
                completed_at: None,
                config_hash: "deadbeef".to_string(),
                settings_json: serde_json::json!({}),
                canonical_version: "elspeth-canon-v1".to_string(),
            })
            .unwrap();
        (dir, recorder)
    }

    #[test]
    fn a_persisted_checkpoint_round_trips() {
        let (_dir, recorder) = seeded_recorder();
        let run_id = RunId::new("run-1");
        let node_id = NodeId::new("node-1");
        let token_id = TokenId::new("token-1");
        let checkpoint = Checkpoint {
            run_id: run_id.clone(),
            node_id: node_id.clone(),
            token_id: token_id.clone(),
            sequence_number: 1,
            payload_json: serde_json::json!({"batch_id": "b-1"}),
            upstream_topology_hash: "topo-hash".to_string(),
            checkpoint_node_config_hash: "config-hash".to_string(),
            created_at: Timestamp::now(),
        };
        recorder.persist_checkpoint(&checkpoint).unwrap();
        let read_back = recorder.read_checkpoint(&run_id, &node_id, &token_id).unwrap().unwrap();
        assert_eq!(read_back.sequence_number, 1);
        assert_eq!(read_back.payload_json, checkpoint.payload_json);
    }

    #[test]
    fn re_persisting_a_checkpoint_replaces_it_in_place() {
        let (_dir, recorder) = seeded_recorder();
        let run_id = RunId::new("run-1");
        let node_id = NodeId::new("node-1");
        let token_id = TokenId::new("token-1");
        let mut checkpoint = Checkpoint {
            run_id: run_id.clone(),
            node_id: node_id.clone(),
            token_id: token_id.clone(),
            sequence_number: 1,
            payload_json: serde_json::json!({"status": "submitted"}),
            upstream_topology_hash: "topo-hash".to_string(),
            checkpoint_node_config_hash: "config-hash".to_string(),
            created_at: Timestamp::now(),
        };
        recorder.persist_checkpoint(&checkpoint).unwrap();
        checkpoint.sequence_number = 2;
        checkpoint.payload_json = serde_json::json!({"status": "completed"});
        recorder.persist_checkpoint(&checkpoint).unwrap();
        let read_back = recorder.read_checkpoint(&run_id, &node_id, &token_id).unwrap().unwrap();
        assert_eq!(read_back.sequence_number, 2);
        assert_eq!(read_back.payload_json, checkpoint.payload_json);
    }

    #[test]
    fn deleting_a_checkpoint_clears_it() {
        let (_dir, recorder) = seeded_recorder();
        let run_id = RunId::new("run-1");
        let node_id = NodeId::new("node-1");
        let token_id = TokenId::new("token-1");
        let checkpoint = Checkpoint {
            run_id: run_id.clone(),
            node_id: node_id.clone(),
            token_id: token_id.clone(),
            sequence_number: 1,
            payload_json: serde_json::json!({"status": "submitted"}),
            upstream_topology_hash: "topo-hash".to_string(),
            checkpoint_node_config_hash: "config-hash".to_string(),
            created_at: Timestamp::now(),
        };
        recorder.persist_checkpoint(&checkpoint).unwrap();
        recorder.delete_checkpoint(&run_id, &node_id, &token_id).unwrap();
        assert!(recorder.read_checkpoint(&run_id, &node_id, &token_id).unwrap().is_none());
    }
}
