// elspeth-core/src/core/model.rs
// ============================================================================
// Module: Elspeth Data Model
// Description: Canonical audit entities for runs, graphs, rows, and tokens.
// Purpose: Provide stable, serializable types shared by the engine and the recorder.
// Dependencies: crate::core::{identifiers, time}, serde
// ============================================================================

//! ## Overview
//! These types are the canonical source of truth for the audit trail. They
//! carry no behavior beyond simple accessors; persistence and mutation rules
//! live in the recorder trait (`crate::interfaces::RunRecorder`) and its
//! concrete implementations.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::BatchId;
use crate::core::identifiers::CallId;
use crate::core::identifiers::EdgeId;
use crate::core::identifiers::EventId;
use crate::core::identifiers::ExpandGroupId;
use crate::core::identifiers::ForkGroupId;
use crate::core::identifiers::JoinGroupId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::OperationId;
use crate::core::identifiers::RoutingGroupId;
use crate::core::identifiers::RowId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::StateId;
use crate::core::identifiers::TokenId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Run
// ============================================================================

/// Status of a process-level execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Still accepting rows.
    Running,
    /// Finished without a framework-fatal error.
    Completed,
    /// Finished because of a framework-fatal error.
    Failed,
}

/// One process-level execution of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Run identifier.
    pub run_id: RunId,
    /// Current status; transitions only forward.
    pub status: RunStatus,
    /// Timestamp the run began.
    pub started_at: Timestamp,
    /// Timestamp the run reached a terminal status.
    pub completed_at: Option<Timestamp>,
    /// Stable hash of the resolved configuration.
    pub config_hash: String,
    /// Full resolved configuration, canonical JSON value.
    pub settings_json: Value,
    /// Canonicalization-and-hashing contract version used by this run.
    pub canonical_version: String,
}

// ============================================================================
// SECTION: Node
// ============================================================================

/// Capability category of a node in the execution graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Produces rows.
    Source,
    /// Maps rows to rows.
    Transform,
    /// Persists rows externally.
    Sink,
    /// Routes tokens conditionally.
    Gate,
    /// Reduces a batch of tokens to output rows.
    Aggregation,
    /// Merges branches produced by a fork or expand.
    Coalesce,
}

/// Declared determinism class of a node, used for audit and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Determinism {
    /// Pure function of its input.
    Deterministic,
    /// Not guaranteed to be pure (e.g. randomness, wall-clock reads).
    NonDeterministic,
    /// Performs a read against external state.
    IoRead,
    /// Performs a write against external state.
    IoWrite,
    /// Invokes an external service (LLM, HTTP, etc).
    ExternalCall,
}

/// A plugin instance in the execution graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node identifier, unique within the run.
    pub node_id: NodeId,
    /// Owning run.
    pub run_id: RunId,
    /// Plugin name as declared in configuration.
    pub plugin_name: String,
    /// Capability category.
    pub node_type: NodeType,
    /// Plugin version string.
    pub plugin_version: String,
    /// Declared determinism class.
    pub determinism: Determinism,
    /// Stable hash of the node's resolved configuration.
    pub config_hash: String,
    /// Resolved configuration, canonical JSON value.
    pub config_json: Value,
    /// Hash of the node's output schema contract, if established.
    pub schema_hash: Option<String>,
    /// Schema mode in effect for this node's output.
    pub schema_mode: Option<crate::core::contract::SchemaMode>,
    /// Field names the node guarantees on output, in contract order.
    pub schema_fields: Vec<String>,
    /// Position of this node in a deterministic topological ordering.
    pub sequence_in_pipeline: u32,
}

// ============================================================================
// SECTION: Edge
// ============================================================================

/// Default routing behavior an edge applies to a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// The token advances; it is consumed at the source end.
    Move,
    /// The token is duplicated; the source retains its copy.
    Copy,
    /// Like `Move`, but semantically signals an off-happy-path route.
    Divert,
}

/// A labeled directed connection between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Edge identifier, unique within the run.
    pub edge_id: EdgeId,
    /// Owning run.
    pub run_id: RunId,
    /// Source node.
    pub from_node_id: NodeId,
    /// Destination node.
    pub to_node_id: NodeId,
    /// Label distinguishing this edge among parallel edges between the same
    /// endpoints (e.g. `"continue"`, `"on_success"`, `"on_error"`, a branch name).
    pub label: String,
    /// Default routing mode applied when this edge is selected.
    pub default_mode: RoutingMode,
}

// ============================================================================
// SECTION: Row
// ============================================================================

/// One record emitted by a source. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Row identifier.
    pub row_id: RowId,
    /// Owning run.
    pub run_id: RunId,
    /// Node that produced the row.
    pub source_node_id: NodeId,
    /// Zero-based index within the source's output.
    pub row_index: u64,
    /// `stable_hash` of the row's data, computed at ingress.
    pub source_data_hash: String,
    /// Optional payload-store reference to the full row data.
    pub source_data_ref: Option<String>,
}

// ============================================================================
// SECTION: Token
// ============================================================================

/// One addressable unit of work flowing through the graph. Never mutated or
/// reused once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Token identifier.
    pub token_id: TokenId,
    /// Row this token (transitively) descends from.
    pub row_id: RowId,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Set when this token was produced by a fork.
    pub fork_group_id: Option<ForkGroupId>,
    /// Branch name, set for tokens produced by a fork.
    pub branch_name: Option<String>,
    /// Set when this token was produced by a coalesce.
    pub join_group_id: Option<JoinGroupId>,
    /// Set when this token was produced by an expand.
    pub expand_group_id: Option<ExpandGroupId>,
    /// Position of this token in the pipeline, when tracked.
    pub step_in_pipeline: Option<u32>,
}

/// A lineage edge recording one parent of a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenParent {
    /// Child token.
    pub token_id: TokenId,
    /// Parent token.
    pub parent_token_id: TokenId,
    /// Order among the child's parents (meaningful for joins).
    pub ordinal: u32,
}

// ============================================================================
// SECTION: NodeState
// ============================================================================

/// A single attempt at a node for a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    /// State identifier.
    pub state_id: StateId,
    /// Token this attempt belongs to.
    pub token_id: TokenId,
    /// Node this attempt ran against.
    pub node_id: NodeId,
    /// Owning run.
    pub run_id: RunId,
    /// Position of the node in the pipeline.
    pub step_index: u32,
    /// Zero-based attempt number; unique per (token_id, node_id).
    pub attempt: u32,
    /// `stable_hash` of the input payload.
    pub input_hash: String,
    /// Context snapshot captured before invocation.
    pub context_before_json: Option<Value>,
    /// Timestamp the attempt opened.
    pub started_at: Timestamp,
    /// Discriminated outcome of the attempt.
    pub phase: NodeStatePhase,
}

/// The outcome discriminant of a [`NodeState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum NodeStatePhase {
    /// In flight; no output yet.
    Open,
    /// Suspended awaiting external completion.
    Pending {
        /// Context snapshot captured at suspension.
        context_after_json: Value,
        /// Wall-clock duration of this attempt so far, in milliseconds.
        duration_ms: u64,
        /// Timestamp of the suspension.
        completed_at: Timestamp,
    },
    /// Terminal success.
    Completed {
        /// `stable_hash` of the output payload.
        output_hash: String,
        /// Wall-clock duration of this attempt, in milliseconds.
        duration_ms: u64,
        /// Context snapshot captured after invocation.
        context_after_json: Option<Value>,
        /// Plugin-supplied reason for success, if any.
        success_reason_json: Option<Value>,
        /// Timestamp of completion.
        completed_at: Timestamp,
    },
    /// Terminal failure.
    Failed {
        /// Structured error detail.
        error_json: Value,
        /// Wall-clock duration of this attempt, in milliseconds.
        duration_ms: u64,
        /// Context snapshot captured after invocation, if available.
        context_after_json: Option<Value>,
        /// Timestamp of the failure.
        completed_at: Timestamp,
    },
}

// ============================================================================
// SECTION: Call & Operation
// ============================================================================

/// Category of an externally observable call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    /// Call to a language model provider.
    Llm,
    /// Generic HTTP call.
    Http,
    /// SQL query or statement.
    Sql,
    /// Filesystem read or write.
    Filesystem,
}

/// Outcome of an externally observable call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// The call completed successfully.
    Success,
    /// The call failed.
    Error,
}

/// An external side-effect attributable to exactly one of a state or an
/// operation (enforced by the recorder, never both).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Call identifier.
    pub call_id: CallId,
    /// Parent state, if this call was made from a node-state attempt.
    pub state_id: Option<StateId>,
    /// Parent operation, if this call was made from a source/sink operation.
    pub operation_id: Option<OperationId>,
    /// Sequential index within the parent, allocated atomically.
    pub call_index: u32,
    /// Call category.
    pub call_type: CallType,
    /// Call outcome.
    pub status: CallStatus,
    /// `stable_hash` of the canonical request payload.
    pub request_hash: String,
    /// `stable_hash` of the canonical response payload, if any.
    pub response_hash: Option<String>,
    /// Payload-store reference to the request body.
    pub request_ref: Option<String>,
    /// Payload-store reference to the response body.
    pub response_ref: Option<String>,
    /// Observed latency, in milliseconds.
    pub latency_ms: Option<u64>,
    /// Structured error detail, when `status == Error`.
    pub error_json: Option<Value>,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Provider name, when applicable (e.g. an LLM vendor).
    pub provider: Option<String>,
}

/// Category of a source/sink operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Loading rows from a source.
    SourceLoad,
    /// Writing rows to a sink.
    SinkWrite,
}

/// Status of an operation. An `Open` operation transitions exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// In flight.
    Open,
    /// Completed successfully.
    Completed,
    /// Failed.
    Failed,
    /// Suspended awaiting external completion.
    Pending,
}

/// A source load or sink write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Operation identifier.
    pub operation_id: OperationId,
    /// Owning run.
    pub run_id: RunId,
    /// Node performing the operation.
    pub node_id: NodeId,
    /// Operation category.
    pub operation_type: OperationType,
    /// Current status.
    pub status: OperationStatus,
    /// Start timestamp.
    pub started_at: Timestamp,
    /// Completion timestamp, once terminal.
    pub completed_at: Option<Timestamp>,
    /// Duration, once terminal, in milliseconds.
    pub duration_ms: Option<u64>,
    /// Human-readable error message, when failed.
    pub error_message: Option<String>,
    /// Payload-store reference to the input data.
    pub input_data_ref: Option<String>,
    /// `stable_hash` of the input data.
    pub input_data_hash: Option<String>,
    /// Payload-store reference to the output data.
    pub output_data_ref: Option<String>,
    /// `stable_hash` of the output data.
    pub output_data_hash: Option<String>,
}

// ============================================================================
// SECTION: Checkpoint
// ============================================================================

/// A durable snapshot of one plugin's external-completion wait state,
/// keyed by the (run, node, token) triple that raised the pending signal.
///
/// `sequence_number` increments on every re-persist for the same key, so a
/// stale read racing a concurrent update is detectable. The two hashes are
/// recomputed and compared at restore time: `upstream_topology_hash` guards
/// against resuming after the graph feeding this node changed shape, and
/// `checkpoint_node_config_hash` guards against resuming after the node's
/// own configuration changed. Either mismatch is a
/// [`crate::core::ElspethError::DataIntegrity`], not a retryable condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Owning run.
    pub run_id: RunId,
    /// Node holding the pending invocation.
    pub node_id: NodeId,
    /// Token whose traversal is suspended.
    pub token_id: TokenId,
    /// Monotonically increasing per (run_id, node_id, token_id).
    pub sequence_number: u32,
    /// The plugin-supplied checkpoint payload.
    pub payload_json: Value,
    /// `stable_hash` of the edges feeding `node_id` at persist time.
    pub upstream_topology_hash: String,
    /// `stable_hash` of `node_id`'s `config_json` at persist time.
    pub checkpoint_node_config_hash: String,
    /// Persist timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: RoutingEvent
// ============================================================================

/// A decision to forward a token along an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingEvent {
    /// Event identifier.
    pub event_id: EventId,
    /// State that produced this routing decision.
    pub state_id: StateId,
    /// Edge selected.
    pub edge_id: EdgeId,
    /// Groups simultaneous emissions from the same state.
    pub routing_group_id: RoutingGroupId,
    /// Order of this emission within its routing group.
    pub ordinal: u32,
    /// Routing mode applied.
    pub mode: RoutingMode,
    /// `stable_hash` of a structured routing reason, if recorded.
    pub reason_hash: Option<String>,
    /// Payload-store reference to the full routing reason.
    pub reason_ref: Option<String>,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: TokenOutcome
// ============================================================================

/// Terminal classification of a token. One per token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TokenOutcome {
    /// Reached a sink and was written.
    CompletedAtSink,
    /// Produced children via a fork.
    Forked {
        /// Branch names the engine expects to observe completing.
        expected_branches_json: Value,
    },
    /// Produced children via an expand.
    Expanded {
        /// Expected child count, recorded for recovery validation.
        expected_branches_json: Value,
    },
    /// Consumed as a parent in a coalesce.
    Joined,
    /// Consumed as a member of a batch.
    ConsumedInBatch,
    /// Reached a terminal failure.
    Failed,
    /// Deliberately dropped (e.g. routed to a discard destination).
    Discarded,
    /// Held back pending manual review.
    Quarantined,
}

// ============================================================================
// SECTION: Batch
// ============================================================================

/// Status of an aggregation batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Accumulating members.
    Draft,
    /// Aggregator invocation in flight.
    Executing,
    /// Aggregator invocation succeeded.
    Completed,
    /// Aggregator invocation failed.
    Failed,
}

/// What caused a batch to begin executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchTriggerType {
    /// Member count reached a threshold.
    Count,
    /// A time window elapsed.
    Time,
    /// Triggered explicitly by an operator or plugin.
    Manual,
}

/// An aggregation grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Batch identifier.
    pub batch_id: BatchId,
    /// Owning run.
    pub run_id: RunId,
    /// Aggregation node accumulating this batch.
    pub aggregation_node_id: NodeId,
    /// Zero-based attempt number for this batch's aggregator invocation.
    pub attempt: u32,
    /// Current status.
    pub status: BatchStatus,
    /// What will, or did, trigger execution.
    pub trigger_type: BatchTriggerType,
    /// Human-readable trigger detail.
    pub trigger_reason: Option<String>,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Completion timestamp, once terminal.
    pub completed_at: Option<Timestamp>,
}

/// Membership of one token in one batch, in FIFO submission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMember {
    /// Batch identifier.
    pub batch_id: BatchId,
    /// Member token.
    pub token_id: TokenId,
    /// Strictly increasing submission order within the batch.
    pub ordinal: u32,
}

// ============================================================================
// SECTION: Artifact
// ============================================================================

/// Sink output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact identifier.
    pub artifact_id: ArtifactId,
    /// Owning run.
    pub run_id: RunId,
    /// Sink node that produced the artifact.
    pub sink_node_id: NodeId,
    /// State whose completion produced the artifact.
    pub produced_by_state_id: StateId,
    /// Artifact kind, e.g. `"file"` or `"database"`.
    pub artifact_type: String,
    /// Path or URI identifying the artifact.
    pub path_or_uri: String,
    /// Full SHA-256 hex digest of the bytes actually written.
    pub content_hash: String,
    /// Size of the artifact in bytes.
    pub size_bytes: u64,
    /// Creation timestamp.
    pub created_at: Timestamp,
}
