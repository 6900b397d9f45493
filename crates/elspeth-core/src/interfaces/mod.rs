// elspeth-core/src/interfaces/mod.rs
// ============================================================================
// Module: Elspeth Plugin Interfaces
// Description: Capability traits plugins implement and the context the engine
//              hands them on invocation.
// Purpose: Define the contract surfaces between the engine and plugin code.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! A plugin is any of five capabilities: [`Source`], [`Transform`], [`Sink`],
//! [`Gate`], [`Aggregator`]. Every invocation receives a [`PluginContext`]
//! tying the call back to its run, node, and (if resumed) checkpoint state.
//! Implementations must be deterministic about what they declare (output
//! schema, `supports_resume`) and must never silently coerce row types.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use thiserror::Error;

use crate::core::contract::PipelineRow;
use crate::core::contract::SchemaContract;
use crate::core::contract::SchemaMode;
use crate::core::contract::Violation;
use crate::core::identifiers::BatchId;
use crate::core::identifiers::ExpandGroupId;
use crate::core::identifiers::ForkGroupId;
use crate::core::identifiers::JoinGroupId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::OperationId;
use crate::core::identifiers::RowId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::StateId;
use crate::core::identifiers::TokenId;
use crate::core::model::Call;
use crate::core::model::CallStatus;
use crate::core::model::CallType;
use crate::core::model::Checkpoint;
use crate::core::model::Operation;
use crate::core::model::OperationStatus;
use crate::core::model::Row;
use crate::core::model::Token;
use crate::core::model::TokenOutcome;
use crate::core::model::TokenParent;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Row Destinations & Validation Errors
// ============================================================================

/// Where a row goes when it cannot proceed through the graph normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowDestination {
    /// The row is dropped; no token is created for it.
    Discard,
    /// The row is routed to the named sink instead of its normal path.
    Sink(String),
}

/// A row that failed schema validation at ingress.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationErrorRecord {
    /// The raw row data that failed validation.
    pub row: Value,
    /// The specific violations observed.
    pub violations: Vec<Violation>,
    /// The schema mode in effect when the violation was raised.
    pub schema_mode: SchemaMode,
    /// Where the row was routed as a result.
    pub destination: RowDestination,
}

/// A row that failed inside a transform after ingress.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformErrorRecord {
    /// Token the row was attached to when the transform failed.
    pub token_id: TokenId,
    /// Identifier of the transform node that raised.
    pub transform_id: NodeId,
    /// The row data at the point of failure.
    pub row: Value,
    /// Structured detail describing the failure.
    pub error_details: Value,
    /// Where the row was routed as a result.
    pub destination: RowDestination,
}

// ============================================================================
// SECTION: TransformResult
// ============================================================================

/// Outcome of invoking a [`Transform`], [`Gate`], or [`Aggregator`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransformResult {
    /// The plugin produced zero or more output rows, with an optional
    /// success reason and a context snapshot to record alongside the state.
    Rows {
        /// Output rows produced by this invocation.
        rows: Vec<PipelineRow>,
        /// Plugin-supplied reason for success, if any.
        success_reason: Option<Value>,
        /// Context snapshot captured after invocation.
        context_after: Option<Value>,
    },
    /// The plugin failed in a way that is not eligible for retry.
    Error {
        /// Human-readable failure reason.
        reason: String,
        /// Always `false`; retryable failures are raised, not returned.
        retryable: bool,
    },
}

impl TransformResult {
    /// Builds a successful result carrying `rows` and no extra context.
    #[must_use]
    pub fn success(rows: Vec<PipelineRow>) -> Self {
        Self::Rows { rows, success_reason: None, context_after: None }
    }

    /// Builds a non-retryable error result.
    #[must_use]
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error { reason: reason.into(), retryable: false }
    }
}

// ============================================================================
// SECTION: BatchPendingError
// ============================================================================

/// Not an error in the ordinary sense: a control-flow signal a plugin raises
/// to suspend its current attempt pending external completion (e.g. an async
/// job, a human review queue). See the checkpoint-and-resume protocol.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("batch {batch_id} pending: {status} (recheck after {check_after_seconds}s)")]
pub struct BatchPendingError {
    /// Batch this suspension belongs to.
    pub batch_id: BatchId,
    /// Plugin-defined status string describing the wait.
    pub status: String,
    /// How long the engine should wait before invoking the plugin again.
    pub check_after_seconds: u64,
    /// Checkpoint payload to persist and return verbatim on resume.
    pub checkpoint: Value,
    /// Node that raised the suspension.
    pub node_id: NodeId,
}

// ============================================================================
// SECTION: Plugin Capability Traits
// ============================================================================

/// Produces rows into the graph.
pub trait Source {
    /// Declares the schema this source guarantees on its output rows.
    fn output_schema(&self) -> SchemaContract;

    /// Produces rows in order. Implementations must honor `output_schema`;
    /// a row that does not validate is reported via
    /// `ctx.record_validation_error` rather than silently coerced or dropped.
    ///
    /// # Errors
    ///
    /// Returns a [`PluginInvocationError`] if iteration cannot continue.
    fn iterate(
        &mut self,
        ctx: &dyn PluginContext,
    ) -> Result<Vec<PipelineRow>, PluginInvocationError>;
}

/// Maps rows to rows, one at a time or in batches.
pub trait Transform {
    /// Processes a single row.
    ///
    /// # Errors
    ///
    /// Returns a retryable [`PluginInvocationError`] for transient failures
    /// (capacity, network, 5xx); the engine retries these per
    /// [`crate::core::retry::RetryManager`]. Non-retryable failures should be
    /// returned as `Ok(TransformResult::Error { .. })` instead of an `Err`.
    fn process(
        &mut self,
        row: PipelineRow,
        ctx: &dyn PluginContext,
    ) -> Result<TransformResult, PluginInvocationError>;
}

/// Persists rows externally.
pub trait Sink {
    /// Whether this sink can resume a suspended write after a restart.
    fn supports_resume(&self) -> bool;

    /// Writes rows, returning a descriptor of what was written.
    ///
    /// # Errors
    ///
    /// Returns a [`PluginInvocationError`] on write failure.
    fn write(
        &mut self,
        rows: &[PipelineRow],
        ctx: &dyn PluginContext,
    ) -> Result<ArtifactDescriptor, PluginInvocationError>;

    /// Flushes any buffered output. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns a [`PluginInvocationError`] on flush failure.
    fn flush(&mut self) -> Result<(), PluginInvocationError>;

    /// Closes the sink. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns a [`PluginInvocationError`] on close failure.
    fn close(&mut self) -> Result<(), PluginInvocationError>;
}

/// Routes a token conditionally.
pub trait Gate {
    /// Evaluates the gate's condition against `row`, returning the edge
    /// label to follow (`"true"`, `"false"`, or a fork branch name).
    ///
    /// # Errors
    ///
    /// Returns a [`PluginInvocationError`] if evaluation fails.
    fn evaluate(
        &self,
        row: &PipelineRow,
        ctx: &dyn PluginContext,
    ) -> Result<String, PluginInvocationError>;
}

/// Reduces an accumulated batch of tokens into output rows.
pub trait Aggregator {
    /// Reduces the accumulated rows for one batch.
    ///
    /// # Errors
    ///
    /// Returns a [`PluginInvocationError`] if reduction fails, or raises
    /// [`BatchPendingError`] (via the `Err` variant wrapping it) if the
    /// reduction requires waiting on an external system.
    fn reduce(
        &mut self,
        batch_rows: &[PipelineRow],
        ctx: &dyn PluginContext,
    ) -> Result<TransformResult, PluginInvocationError>;
}

/// Errors a plugin invocation can surface to the engine.
#[derive(Debug, Error)]
pub enum PluginInvocationError {
    /// A transient failure the engine should retry (capacity, network,
    /// rate-limit, server 5xx).
    #[error("retryable plugin failure: {0}")]
    Retryable(String),
    /// A non-retryable failure not already converted to `TransformResult::Error`.
    #[error("plugin invocation failed: {0}")]
    NonRetryable(String),
    /// The plugin is suspending this attempt pending external completion.
    #[error(transparent)]
    Pending(#[from] BatchPendingError),
}

/// Descriptor of what a [`Sink::write`] call actually committed.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactDescriptor {
    /// Artifact kind, e.g. `"file"` or `"database"`.
    pub artifact_type: String,
    /// Path or URI identifying the artifact.
    pub path_or_uri: String,
    /// Full SHA-256 hex digest of the bytes actually written.
    pub content_hash: String,
    /// Size of the artifact in bytes.
    pub size_bytes: u64,
}

// ============================================================================
// SECTION: PluginContext
// ============================================================================

/// Everything a plugin invocation needs to report back to the engine.
///
/// Implementations are engine-internal; plugins only ever see `&dyn
/// PluginContext`. Exactly one of `state_id` / `operation_id` is set on any
/// given context (enforced by [`record_call`](PluginContext::record_call);
/// violating this is a framework bug).
pub trait PluginContext {
    /// Run this invocation belongs to.
    fn run_id(&self) -> &RunId;
    /// Node this invocation is executing.
    fn node_id(&self) -> &NodeId;
    /// Node-state attempt this invocation is attached to, if any.
    fn state_id(&self) -> Option<&StateId>;
    /// Source/sink operation this invocation is attached to, if any.
    fn operation_id(&self) -> Option<&OperationId>;
    /// Token being processed, for node invocations.
    fn token(&self) -> Option<&Token>;

    /// Reads a resolved configuration value for this node.
    fn get(&self, config_key: &str) -> Option<&Value>;

    /// Records an externally observable call, parented to whichever of
    /// `state_id` / `operation_id` is set on this context.
    ///
    /// # Errors
    ///
    /// Returns [`crate::core::ElspethError`] if both or neither of
    /// `state_id` / `operation_id` are set (a framework bug), or if the
    /// recorder fails to persist the call.
    fn record_call(
        &self,
        call_type: CallType,
        status: CallStatus,
        request_data: &Value,
        response_data: Option<&Value>,
        error: Option<&Value>,
        latency_ms: Option<u64>,
        provider: Option<&str>,
    ) -> Result<Call, crate::core::ElspethError>;

    /// Reports a row that failed schema validation at ingress.
    ///
    /// # Errors
    ///
    /// Returns [`crate::core::ElspethError`] if the recorder fails to
    /// persist the validation error.
    fn record_validation_error(
        &self,
        row: &Value,
        violations: Vec<Violation>,
        schema_mode: SchemaMode,
        destination: RowDestination,
    ) -> Result<TokenId, crate::core::ElspethError>;

    /// Reports a row that failed inside a transform after ingress.
    ///
    /// # Errors
    ///
    /// Returns [`crate::core::ElspethError`] if the recorder fails to
    /// persist the transform error.
    fn record_transform_error(
        &self,
        token_id: TokenId,
        transform_id: NodeId,
        row: &Value,
        error_details: Value,
        destination: RowDestination,
    ) -> Result<(), crate::core::ElspethError>;

    /// Routes `row` to a named sink outside the row's normal edge path.
    ///
    /// # Errors
    ///
    /// Returns [`crate::core::ElspethError`] if the named sink is unknown or
    /// the recorder fails to persist the routing event.
    fn route_to_sink(
        &self,
        sink_name: &str,
        row: PipelineRow,
        metadata: Option<&Value>,
    ) -> Result<(), crate::core::ElspethError>;

    /// Reads back a previously persisted checkpoint for this node/token,
    /// verifying its topology and node-config hashes against the graph as it
    /// exists now.
    ///
    /// # Errors
    ///
    /// Returns [`crate::core::ElspethError::DataIntegrity`] if a checkpoint
    /// exists but either hash no longer matches.
    fn get_checkpoint(&self) -> Result<Option<Value>, crate::core::ElspethError>;

    /// Persists a checkpoint for this node/token with a monotonic sequence
    /// number.
    ///
    /// # Errors
    ///
    /// Returns [`crate::core::ElspethError`] if the recorder fails to
    /// persist the checkpoint.
    fn update_checkpoint(&self, checkpoint: Value) -> Result<(), crate::core::ElspethError>;

    /// Removes the checkpoint for this node/token on terminal completion.
    ///
    /// # Errors
    ///
    /// Returns [`crate::core::ElspethError`] if the recorder fails to clear
    /// the checkpoint.
    fn clear_checkpoint(&self) -> Result<(), crate::core::ElspethError>;

    /// Emits a telemetry event. Never fails; telemetry is best-effort.
    fn telemetry_emit(&self, event: &str, fields: &Value);

    /// Access to the content-addressed payload store.
    fn payload_store(&self) -> &dyn crate::core::PayloadStore;
}

// ============================================================================
// SECTION: Run Recorder
// ============================================================================

/// Errors raised by a [`RunRecorder`] implementation.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Recorder I/O error.
    #[error("recorder io error: {0}")]
    Io(String),
    /// Recorder data is corrupted or fails integrity checks.
    #[error("recorder data corruption: {0}")]
    Corrupt(String),
    /// Recorder data version is incompatible.
    #[error("recorder version mismatch: {0}")]
    VersionMismatch(String),
    /// A write violated a uniqueness or referential invariant.
    #[error("recorder constraint violation: {0}")]
    Constraint(String),
}

/// The audit recorder ("landscape"): the single source of truth for the
/// relational audit trail described in the data model. Every write must be
/// causally ordered within a token and safe under concurrent tokens.
pub trait RunRecorder {
    /// Opens a new run, persisting its resolved configuration hash.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the run cannot be opened.
    fn open_run(&self, run: &crate::core::model::Run) -> Result<(), RecorderError>;

    /// Marks a run as completed or failed.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the status transition cannot be persisted.
    fn close_run(
        &self,
        run_id: &RunId,
        status: crate::core::model::RunStatus,
    ) -> Result<(), RecorderError>;

    /// Registers a node from the execution graph.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the node already exists for this run.
    fn register_node(&self, node: &crate::core::model::Node) -> Result<(), RecorderError>;

    /// Registers an edge from the execution graph.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the edge already exists for this run.
    fn register_edge(&self, edge: &crate::core::model::Edge) -> Result<(), RecorderError>;

    /// Allocates the next call index for a state or operation parent,
    /// atomically, so indices are unique and contiguous under contention.
    fn allocate_call_index(&self, parent: CallParent) -> u32;

    /// Opens a new node-state attempt.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the `(token_id, node_id, attempt)`
    /// uniqueness invariant is violated.
    fn open_state(
        &self,
        state: &crate::core::model::NodeState,
    ) -> Result<(), RecorderError>;

    /// Transitions a node-state attempt to a terminal or pending phase.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the state was already terminal
    /// (double-completion is a framework bug, surfaced here as a
    /// constraint violation for the caller to escalate).
    fn complete_state(
        &self,
        state_id: &StateId,
        phase: crate::core::model::NodeStatePhase,
    ) -> Result<(), RecorderError>;

    /// Records one externally observable call.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if neither or both of the call's
    /// `state_id` / `operation_id` are set.
    fn record_call(&self, call: &Call) -> Result<(), RecorderError>;

    /// Records a routing decision.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the referenced edge or state is unknown.
    fn record_routing_event(
        &self,
        event: &crate::core::model::RoutingEvent,
    ) -> Result<(), RecorderError>;

    /// Records the terminal outcome of a token. Exactly one per token.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the token already has a recorded
    /// outcome.
    fn record_token_outcome(
        &self,
        token_id: &TokenId,
        outcome: &crate::core::model::TokenOutcome,
    ) -> Result<(), RecorderError>;

    /// Appends a member to a batch with a strictly increasing ordinal.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the batch is not in `Draft` status.
    fn add_batch_member(
        &self,
        member: &crate::core::model::BatchMember,
    ) -> Result<(), RecorderError>;

    /// Records an artifact produced by a sink write.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the producing state is unknown.
    fn record_artifact(
        &self,
        artifact: &crate::core::model::Artifact,
    ) -> Result<(), RecorderError>;

    /// Persists a row produced by a source.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the row already exists.
    fn record_row(&self, row: &Row) -> Result<(), RecorderError>;

    /// Persists a token.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the token already exists.
    fn record_token(&self, token: &Token) -> Result<(), RecorderError>;

    /// Records one lineage edge from a child token to a parent token.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the pair is already recorded.
    fn record_token_parent(&self, link: &TokenParent) -> Result<(), RecorderError>;

    /// Opens a source-load or sink-write operation.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the operation already exists.
    fn begin_operation(&self, operation: &Operation) -> Result<(), RecorderError>;

    /// Persists `checkpoint`, superseding any prior checkpoint recorded
    /// under the same (run, node, token).
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the write fails.
    fn persist_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), RecorderError>;

    /// Reads back the checkpoint recorded for (`run_id`, `node_id`,
    /// `token_id`), if any.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the read fails.
    fn read_checkpoint(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        token_id: &TokenId,
    ) -> Result<Option<Checkpoint>, RecorderError>;

    /// Removes the checkpoint recorded for (`run_id`, `node_id`,
    /// `token_id`), if any. Not an error if none exists.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the delete fails.
    fn delete_checkpoint(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        token_id: &TokenId,
    ) -> Result<(), RecorderError>;

    /// Transitions an operation to a terminal status exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if the operation is unknown or already
    /// terminal.
    fn complete_operation(
        &self,
        operation_id: &OperationId,
        status: OperationStatus,
        completed_at: Timestamp,
        duration_ms: Option<u64>,
        error_message: Option<&str>,
        output_data_ref: Option<&str>,
        output_data_hash: Option<&str>,
    ) -> Result<(), RecorderError>;

    /// Forks `parent` into one child token per branch, persisting each
    /// child, its lineage link back to `parent`, and `parent`'s `Forked`
    /// outcome. Not transactional across backends; see the engine's fork
    /// documentation for the consistency trade-off this accepts.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if any child, lineage link, or the parent's
    /// outcome cannot be persisted.
    fn fork_token(
        &self,
        parent: &Token,
        row_id: &RowId,
        branches: &[String],
        step_in_pipeline: Option<u32>,
    ) -> Result<(Vec<Token>, ForkGroupId), RecorderError> {
        let fork_group_id = ForkGroupId::new(format!("{}-fork", parent.token_id.as_str()));
        let mut children = Vec::with_capacity(branches.len());
        for branch in branches {
            let child = Token {
                token_id: TokenId::new(format!("{}-{branch}", fork_group_id.as_str())),
                row_id: row_id.clone(),
                created_at: Timestamp::now(),
                fork_group_id: Some(fork_group_id.clone()),
                branch_name: Some(branch.clone()),
                join_group_id: None,
                expand_group_id: None,
                step_in_pipeline,
            };
            self.record_token(&child)?;
            self.record_token_parent(&TokenParent {
                token_id: child.token_id.clone(),
                parent_token_id: parent.token_id.clone(),
                ordinal: 0,
            })?;
            children.push(child);
        }
        let expected_branches_json = serde_json::to_value(branches)
            .map_err(|err| RecorderError::Corrupt(err.to_string()))?;
        self.record_token_outcome(&parent.token_id, &TokenOutcome::Forked { expected_branches_json })?;
        Ok((children, fork_group_id))
    }

    /// Expands `parent` into `count` children for row deaggregation,
    /// persisting each child, its lineage link, and `parent`'s `Expanded`
    /// outcome. Same consistency trade-off as [`Self::fork_token`].
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if any child, lineage link, or the parent's
    /// outcome cannot be persisted.
    fn expand_token(
        &self,
        parent: &Token,
        row_id: &RowId,
        count: usize,
        step_in_pipeline: Option<u32>,
    ) -> Result<(Vec<Token>, ExpandGroupId), RecorderError> {
        let expand_group_id = ExpandGroupId::new(format!("{}-expand", parent.token_id.as_str()));
        let mut children = Vec::with_capacity(count);
        for index in 0 .. count {
            let child = Token {
                token_id: TokenId::new(format!("{}-{index}", expand_group_id.as_str())),
                row_id: row_id.clone(),
                created_at: Timestamp::now(),
                fork_group_id: None,
                branch_name: None,
                join_group_id: None,
                expand_group_id: Some(expand_group_id.clone()),
                step_in_pipeline,
            };
            self.record_token(&child)?;
            self.record_token_parent(&TokenParent {
                token_id: child.token_id.clone(),
                parent_token_id: parent.token_id.clone(),
                ordinal: 0,
            })?;
            children.push(child);
        }
        let expected_branches_json = serde_json::Value::from(count);
        self.record_token_outcome(&parent.token_id, &TokenOutcome::Expanded { expected_branches_json })?;
        Ok((children, expand_group_id))
    }

    /// Merges `parents` (the complete, ordered branch set a coalesce node is
    /// waiting on) into one joined token sharing a `join_group_id`,
    /// persisting each parent's `Joined` outcome and a lineage link per
    /// parent.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] if any lineage link or outcome cannot be
    /// persisted.
    fn coalesce_tokens(
        &self,
        parents: &[Token],
        row_id: &RowId,
        step_in_pipeline: Option<u32>,
    ) -> Result<Token, RecorderError> {
        let join_group_id = JoinGroupId::new(
            parents.first().map_or_else(|| "coalesce".to_string(), |first| format!("{}-join", first.token_id.as_str())),
        );
        let joined = Token {
            token_id: TokenId::new(format!("{}-joined", join_group_id.as_str())),
            row_id: row_id.clone(),
            created_at: Timestamp::now(),
            fork_group_id: None,
            branch_name: None,
            join_group_id: Some(join_group_id.clone()),
            expand_group_id: None,
            step_in_pipeline,
        };
        self.record_token(&joined)?;
        for (ordinal, parent) in parents.iter().enumerate() {
            self.record_token_parent(&TokenParent {
                token_id: joined.token_id.clone(),
                parent_token_id: parent.token_id.clone(),
                ordinal: u32::try_from(ordinal).unwrap_or(u32::MAX),
            })?;
            self.record_token_outcome(&parent.token_id, &TokenOutcome::Joined)?;
        }
        Ok(joined)
    }
}

/// Which parent a call index is allocated under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallParent {
    /// Parented to a node-state attempt.
    State(StateId),
    /// Parented to a source/sink operation.
    Operation(OperationId),
}

// ============================================================================
// SECTION: Artifact Sink / Reader (runpack export & verification)
// ============================================================================

/// Errors raised by an [`ArtifactSink`] or [`ArtifactReader`].
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The underlying storage reported an error.
    #[error("artifact storage error: {0}")]
    Storage(String),
    /// The requested artifact was not found.
    #[error("artifact not found: {0}")]
    NotFound(String),
}

/// A runpack-bound artifact sink used during audit bundle export.
pub trait ArtifactSink {
    /// Writes one record's worth of bytes into the bundle.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] when writing fails.
    fn write(&mut self, path: &str, bytes: &[u8]) -> Result<(), ArtifactError>;

    /// Finalizes the bundle, returning its manifest bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] when finalization fails.
    fn finalize(&mut self) -> Result<Vec<u8>, ArtifactError>;
}

/// A runpack-bound artifact reader used during audit bundle verification.
pub trait ArtifactReader {
    /// Reads the bytes stored at `path` within the bundle.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] when the path does not exist or cannot be
    /// read.
    fn read(&self, path: &str) -> Result<Vec<u8>, ArtifactError>;
}
