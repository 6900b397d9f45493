// elspeth-core/src/runtime/engine.rs
// ============================================================================
// Module: Elspeth Engine
// Description: Drives rows through the execution graph, recording every step.
// Purpose: Implement the single logical engine loop described in the design.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The engine owns one [`ExecutionGraph`] and one plugin instance per node.
//! For each row the source produces it opens a [`Token`] and walks edges,
//! opening a [`NodeState`] per attempt, retrying transient transform
//! failures, and recording routing decisions, artifacts, and terminal token
//! outcomes along the way. A suspended ([`BatchPendingError`]) attempt stops
//! advancement for that token without failing the run.
//!
//! Scope note: a single token's traversal runs serially (the permitted
//! single-worker mode for determinism). MOVE, COPY, DIVERT, and gate
//! branching are implemented directly in [`Self::advance`]; FORK (a gate
//! whose selected label carries a `fork_branches` config array), EXPAND (a
//! transform that returns more than one row), and COALESCE (a node that
//! waits for every branch named in its `branches` config) are implemented
//! by pushing each child token onto an explicit work queue rather than
//! recursing, so one row can still produce many terminal outcomes without
//! deep call stacks. A separate `Operation` ledger for source loads and
//! sink writes is opened/closed around [`Self::run_source`] and each
//! sink write.
//!
//! [`EngineContext`] backs `get_checkpoint`/`update_checkpoint`/
//! `clear_checkpoint` with the recorder's durable checkpoint store rather
//! than in-memory state, keyed by `(run_id, node_id, token_id)`. Every read
//! re-verifies the checkpoint's topology and node-config hashes against the
//! graph as it exists right now, failing with
//! [`crate::core::ElspethError::DataIntegrity`] on a mismatch rather than
//! resuming a plugin against a checkpoint that no longer matches the run
//! it was written for.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value;
use thiserror::Error;

use crate::core::contract::ContractMergeError;
use crate::core::contract::PipelineRow;
use crate::core::contract::SchemaMode;
use crate::core::contract::Violation;
use crate::core::graph::ExecutionGraph;
use crate::core::graph::GraphError;
use crate::core::hashing::HashError;
use crate::core::hashing::stable_hash;
use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::BatchId;
use crate::core::identifiers::EdgeId;
use crate::core::identifiers::EventId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::OperationId;
use crate::core::identifiers::RoutingGroupId;
use crate::core::identifiers::RowId;
use crate::core::identifiers::StateId;
use crate::core::identifiers::TokenId;
use crate::core::model::Artifact;
use crate::core::model::BatchMember;
use crate::core::model::Call;
use crate::core::model::CallStatus;
use crate::core::model::CallType;
use crate::core::model::Checkpoint;
use crate::core::model::Edge as ModelEdge;
use crate::core::model::NodeState;
use crate::core::model::NodeStatePhase;
use crate::core::model::NodeType;
use crate::core::model::Operation;
use crate::core::model::OperationStatus;
use crate::core::model::OperationType;
use crate::core::model::Row;
use crate::core::model::RoutingEvent;
use crate::core::model::RoutingMode;
use crate::core::model::Run;
use crate::core::model::RunStatus;
use crate::core::model::Token;
use crate::core::model::TokenOutcome;
use crate::core::payload::PayloadStore;
use crate::core::retry::MaxRetriesExceeded;
use crate::core::retry::RetryManager;
use crate::core::retry::RetryOutcome;
use crate::core::retry::RuntimeRetryConfig;
use crate::core::time::Timestamp;
use crate::interfaces::ArtifactDescriptor;
use crate::interfaces::CallParent;
use crate::interfaces::PluginContext;
use crate::interfaces::PluginInvocationError;
use crate::interfaces::RecorderError;
use crate::interfaces::RowDestination;
use crate::interfaces::RunRecorder;
use crate::interfaces::TransformResult;
use crate::interfaces::ValidationErrorRecord;
use crate::interfaces::{Aggregator, Gate, Sink, Source, Transform};

// ============================================================================
// SECTION: Engine Errors
// ============================================================================

/// Errors the engine loop can surface to a caller (`run`/`resume` in the CLI).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The execution graph failed edge-compatibility validation.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// The recorder rejected a write (a constraint or I/O failure).
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    /// Canonical hashing of a row or payload failed.
    #[error(transparent)]
    Hash(#[from] HashError),
    /// A node in the graph has no registered plugin instance, or the
    /// registered plugin's capability does not match its declared node type.
    #[error("node {0} has no matching registered plugin")]
    MissingPlugin(String),
    /// A gate selected an edge label with no matching outgoing edge.
    #[error("gate {node} selected unknown edge label {label:?}")]
    UnknownEdgeLabel {
        /// Gate node that made the selection.
        node: String,
        /// The label it selected.
        label: String,
    },
    /// Retries were exhausted for a retryable plugin invocation.
    #[error(transparent)]
    MaxRetriesExceeded(#[from] MaxRetriesExceeded),
    /// A plugin invocation failed in a way that was not retryable and not
    /// already converted to `TransformResult::Error`.
    #[error(transparent)]
    PluginInvocation(#[from] PluginInvocationError),
    /// Two branches feeding a coalesce node carried incompatible field kinds.
    #[error(transparent)]
    ContractMerge(#[from] ContractMergeError),
    /// A checkpoint read or write failed, including a hash-integrity
    /// mismatch on resume.
    #[error(transparent)]
    Checkpoint(#[from] crate::core::ElspethError),
}

// ============================================================================
// SECTION: Plugin Registry
// ============================================================================

/// One node's plugin instance, tagged by capability.
pub enum PluginHandle {
    /// Produces rows.
    Source(Box<dyn Source + Send>),
    /// Maps rows to rows.
    Transform(Box<dyn Transform + Send>),
    /// Persists rows externally.
    Sink(Box<dyn Sink + Send>),
    /// Routes tokens conditionally.
    Gate(Box<dyn Gate + Send>),
    /// Reduces an accumulated batch.
    Aggregator(Box<dyn Aggregator + Send>),
}

// ============================================================================
// SECTION: Engine Configuration
// ============================================================================

/// Tunables that apply uniformly across every node's plugin invocations.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Backoff parameters for retryable transform invocations.
    pub retry: RuntimeRetryConfig,
    /// Default aggregation batch size for COUNT-triggered aggregators absent
    /// a node-specific override in `config_json["batch_size"]`.
    pub default_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { retry: RuntimeRetryConfig::default(), default_batch_size: 16 }
    }
}

// ============================================================================
// SECTION: Plugin Context
// ============================================================================

/// The concrete [`PluginContext`] the engine hands to every plugin invocation.
///
/// Uses interior mutability (mirroring [`crate::runtime::store::InMemoryRunRecorder`]'s
/// lock-per-table shape) so the same context can be shared, unchanged,
/// across every retry attempt of a single node-state without fighting the
/// borrow checker over repeated plugin calls.
pub struct EngineContext {
    run_id: crate::core::identifiers::RunId,
    node_id: NodeId,
    state_id: Option<StateId>,
    operation_id: Option<OperationId>,
    token: Option<Token>,
    config: Value,
    recorder: Arc<dyn RunRecorder + Send + Sync>,
    payload_store: Arc<dyn PayloadStore + Send + Sync>,
    /// Stable hash of the edges feeding this node, computed once per
    /// invocation from the graph as it exists right now. A checkpoint read
    /// back with a different value means the graph shape changed underneath
    /// a suspended token.
    upstream_topology_hash: String,
    /// Stable hash of this node's own `config_json`, for the same reason.
    node_config_hash: String,
    pending_sink_routes: Mutex<Vec<(String, PipelineRow, Option<Value>)>>,
    validation_errors: Mutex<Vec<ValidationErrorRecord>>,
}

impl EngineContext {
    /// Drains rows the plugin routed to a named sink outside the edge graph.
    #[must_use]
    pub fn take_sink_routes(&self) -> Vec<(String, PipelineRow, Option<Value>)> {
        self.pending_sink_routes.lock().map(|mut guard| std::mem::take(&mut *guard)).unwrap_or_default()
    }

    /// Drains validation errors recorded during this invocation.
    #[must_use]
    pub fn take_validation_errors(&self) -> Vec<ValidationErrorRecord> {
        self.validation_errors.lock().map(|mut guard| std::mem::take(&mut *guard)).unwrap_or_default()
    }
}

impl PluginContext for EngineContext {
    fn run_id(&self) -> &crate::core::identifiers::RunId {
        &self.run_id
    }

    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn state_id(&self) -> Option<&StateId> {
        self.state_id.as_ref()
    }

    fn operation_id(&self) -> Option<&OperationId> {
        self.operation_id.as_ref()
    }

    fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    fn get(&self, config_key: &str) -> Option<&Value> {
        self.config.get(config_key)
    }

    fn record_call(
        &self,
        call_type: CallType,
        status: CallStatus,
        request_data: &Value,
        response_data: Option<&Value>,
        error: Option<&Value>,
        latency_ms: Option<u64>,
        provider: Option<&str>,
    ) -> Result<Call, crate::core::ElspethError> {
        let parent = match (&self.state_id, &self.operation_id) {
            (Some(state_id), None) => CallParent::State(state_id.clone()),
            (None, Some(operation_id)) => CallParent::Operation(operation_id.clone()),
            _ => crate::core::error::framework_bug(
                "record_call requires exactly one of state_id/operation_id",
            ),
        };
        let call_index = self.recorder.allocate_call_index(parent);
        let request_hash = stable_hash(request_data)?;
        let response_hash = response_data.map(stable_hash).transpose()?;
        let request_ref =
            serde_json::to_vec(request_data).ok().and_then(|bytes| self.payload_store.put(&bytes).ok());
        let response_ref = response_data
            .and_then(|value| serde_json::to_vec(value).ok())
            .and_then(|bytes| self.payload_store.put(&bytes).ok());
        let parent_tag = if self.state_id.is_some() { "state" } else { "op" };
        let call = Call {
            call_id: crate::core::identifiers::CallId::new(format!(
                "{}-{parent_tag}-{call_index}",
                self.node_id.as_str()
            )),
            state_id: self.state_id.clone(),
            operation_id: self.operation_id.clone(),
            call_index,
            call_type,
            status,
            request_hash,
            response_hash,
            request_ref,
            response_ref,
            latency_ms,
            error_json: error.cloned(),
            created_at: Timestamp::now(),
            provider: provider.map(str::to_string),
        };
        self.recorder
            .record_call(&call)
            .map_err(|err| crate::core::ElspethError::PluginInvocation(err.to_string()))?;
        Ok(call)
    }

    fn record_validation_error(
        &self,
        row: &Value,
        violations: Vec<Violation>,
        schema_mode: SchemaMode,
        destination: RowDestination,
    ) -> Result<TokenId, crate::core::ElspethError> {
        let token_id = TokenId::new(format!("discarded-{}", self.node_id.as_str()));
        if let Ok(mut guard) = self.validation_errors.lock() {
            guard.push(ValidationErrorRecord { row: row.clone(), violations, schema_mode, destination });
        }
        Ok(token_id)
    }

    fn record_transform_error(
        &self,
        _token_id: TokenId,
        _transform_id: NodeId,
        _row: &Value,
        _error_details: Value,
        _destination: RowDestination,
    ) -> Result<(), crate::core::ElspethError> {
        Ok(())
    }

    fn route_to_sink(
        &self,
        sink_name: &str,
        row: PipelineRow,
        metadata: Option<&Value>,
    ) -> Result<(), crate::core::ElspethError> {
        if let Ok(mut guard) = self.pending_sink_routes.lock() {
            guard.push((sink_name.to_string(), row, metadata.cloned()));
        }
        Ok(())
    }

    fn get_checkpoint(&self) -> Result<Option<Value>, crate::core::ElspethError> {
        let Some(token) = self.token.as_ref() else {
            return Ok(None);
        };
        let Some(checkpoint) = self
            .recorder
            .read_checkpoint(&self.run_id, &self.node_id, &token.token_id)
            .map_err(|err| crate::core::ElspethError::PluginInvocation(err.to_string()))?
        else {
            return Ok(None);
        };
        if checkpoint.upstream_topology_hash != self.upstream_topology_hash {
            return Err(crate::core::ElspethError::DataIntegrity(format!(
                "checkpoint upstream topology changed for node {}",
                self.node_id.as_str()
            )));
        }
        if checkpoint.checkpoint_node_config_hash != self.node_config_hash {
            return Err(crate::core::ElspethError::DataIntegrity(format!(
                "checkpoint node config changed for node {}",
                self.node_id.as_str()
            )));
        }
        Ok(Some(checkpoint.payload_json))
    }

    fn update_checkpoint(&self, checkpoint: Value) -> Result<(), crate::core::ElspethError> {
        let Some(token) = self.token.as_ref() else {
            return Ok(());
        };
        let prior = self
            .recorder
            .read_checkpoint(&self.run_id, &self.node_id, &token.token_id)
            .map_err(|err| crate::core::ElspethError::PluginInvocation(err.to_string()))?;
        let sequence_number = prior.map_or(1, |checkpoint| checkpoint.sequence_number.saturating_add(1));
        let record = Checkpoint {
            run_id: self.run_id.clone(),
            node_id: self.node_id.clone(),
            token_id: token.token_id.clone(),
            sequence_number,
            payload_json: checkpoint,
            upstream_topology_hash: self.upstream_topology_hash.clone(),
            checkpoint_node_config_hash: self.node_config_hash.clone(),
            created_at: Timestamp::now(),
        };
        self.recorder
            .persist_checkpoint(&record)
            .map_err(|err| crate::core::ElspethError::PluginInvocation(err.to_string()))
    }

    fn clear_checkpoint(&self) -> Result<(), crate::core::ElspethError> {
        let Some(token) = self.token.as_ref() else {
            return Ok(());
        };
        self.recorder
            .delete_checkpoint(&self.run_id, &self.node_id, &token.token_id)
            .map_err(|err| crate::core::ElspethError::PluginInvocation(err.to_string()))
    }

    fn telemetry_emit(&self, event: &str, fields: &Value) {
        tracing::info!(event, %fields, "telemetry");
    }

    fn payload_store(&self) -> &dyn PayloadStore {
        self.payload_store.as_ref()
    }
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Coarse classification of how a token's traversal ended, used only to
/// tally a [`RunSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenOutcomeKind {
    CompletedAtSink,
    Failed,
    Pending,
    Discarded,
    Batched,
}

/// Summary of one completed or partially-suspended run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    /// Rows that reached a sink.
    pub completed: u64,
    /// Rows that reached a terminal failure.
    pub failed: u64,
    /// Rows suspended pending external completion.
    pub pending: u64,
    /// Rows discarded at ingress or after a gate/transform rejection.
    pub discarded: u64,
    /// Rows currently absorbed into an open aggregation batch.
    pub batched: u64,
    /// Rows a source or transform rejected at schema validation, never
    /// becoming a token.
    pub validation_errors: u64,
}

/// Intermediate result of running one node's plugin against a token.
enum StepOutcome {
    /// Continue traversal with this row as the token's new payload.
    Advance(PipelineRow),
    /// A transform deaggregated its input into more than one output row;
    /// each becomes its own child token via [`RunRecorder::expand_token`].
    Expand(Vec<PipelineRow>),
    /// The token's traversal has ended; no further nodes are visited.
    Terminal(TokenOutcomeKind),
}

/// One token still waiting to be walked through the graph, queued instead
/// of recursed into so a single row can fan out to FORK/EXPAND children
/// without growing the call stack.
type QueuedToken = (Token, NodeId, PipelineRow);

/// Reserved gate label meaning "fork to the branches named in this node's
/// `fork_branches` config array" rather than "follow the edge labeled
/// literally `fork`".
const FORK_LABEL: &str = "fork";

/// Drives rows through an [`ExecutionGraph`], one token at a time.
pub struct Engine {
    run_id: crate::core::identifiers::RunId,
    graph: ExecutionGraph,
    plugins: HashMap<NodeId, PluginHandle>,
    recorder: Arc<dyn RunRecorder + Send + Sync>,
    payload_store: Arc<dyn PayloadStore + Send + Sync>,
    retry: RetryManager,
    config: EngineConfig,
    batches: HashMap<NodeId, (BatchId, Vec<(Token, PipelineRow)>)>,
    /// Tokens parked at a coalesce node, keyed by node then by the
    /// fork/expand group they descend from, awaiting the rest of their
    /// branch set.
    coalescing: HashMap<NodeId, HashMap<String, Vec<(Token, PipelineRow)>>>,
}

impl Engine {
    /// Builds an engine bound to `graph`, with one plugin per node.
    #[must_use]
    pub fn new(
        run_id: crate::core::identifiers::RunId,
        graph: ExecutionGraph,
        plugins: HashMap<NodeId, PluginHandle>,
        recorder: Arc<dyn RunRecorder + Send + Sync>,
        payload_store: Arc<dyn PayloadStore + Send + Sync>,
        config: EngineConfig,
    ) -> Self {
        let retry = RetryManager::new(config.retry);
        Self {
            run_id,
            graph,
            plugins,
            recorder,
            payload_store,
            retry,
            config,
            batches: HashMap::new(),
            coalescing: HashMap::new(),
        }
    }

    fn context_for(
        &self,
        node_id: &NodeId,
        state_id: Option<StateId>,
        token: Option<Token>,
    ) -> EngineContext {
        let config = self.graph.node(node_id).map_or(Value::Null, |info| info.node.config_json.clone());
        let upstream_topology_hash = upstream_topology_hash(&self.graph, node_id);
        let node_config_hash = stable_hash(&config).unwrap_or_default();
        EngineContext {
            run_id: self.run_id.clone(),
            node_id: node_id.clone(),
            state_id,
            operation_id: None,
            token,
            config,
            recorder: self.recorder.clone(),
            payload_store: self.payload_store.clone(),
            upstream_topology_hash,
            node_config_hash,
            pending_sink_routes: Mutex::new(Vec::new()),
            validation_errors: Mutex::new(Vec::new()),
        }
    }

    /// Registers every node and edge, validates compatibility, and opens the
    /// run record. Must be called once before [`Self::run_source`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Graph`] if edge validation fails, or
    /// [`EngineError::Recorder`] if the run/node/edge rows cannot be opened.
    pub fn open(&self, run: &Run) -> Result<(), EngineError> {
        self.graph.validate_edge_compatibility()?;
        self.recorder.open_run(run)?;
        for node_id in self.graph.declaration_order() {
            if let Some(info) = self.graph.node(node_id) {
                self.recorder.register_node(&info.node)?;
            }
        }
        for node_id in self.graph.declaration_order() {
            for edge in self.graph.outgoing_edges(node_id) {
                self.recorder.register_edge(&ModelEdge {
                    edge_id: edge.edge_id.clone(),
                    run_id: self.run_id.clone(),
                    from_node_id: edge.from.clone(),
                    to_node_id: edge.to.clone(),
                    label: edge.label.clone().unwrap_or_default(),
                    default_mode: edge.mode,
                })?;
            }
        }
        Ok(())
    }

    /// Drives every row the source produces through the graph, then closes
    /// the run with [`RunStatus::Completed`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the source node is missing or mis-typed,
    /// or if a write to the recorder fails.
    pub async fn run_source(&mut self, source_node: &NodeId) -> Result<RunSummary, EngineError> {
        let mut summary = RunSummary::default();
        let operation_id = OperationId::new(format!("{}-load", source_node.as_str()));
        self.recorder.begin_operation(&Operation {
            operation_id: operation_id.clone(),
            run_id: self.run_id.clone(),
            node_id: source_node.clone(),
            operation_type: OperationType::SourceLoad,
            status: OperationStatus::Open,
            started_at: Timestamp::now(),
            completed_at: None,
            duration_ms: None,
            error_message: None,
            input_data_ref: None,
            input_data_hash: None,
            output_data_ref: None,
            output_data_hash: None,
        })?;
        let ctx = self.context_for(source_node, None, None);
        let rows = {
            let Some(PluginHandle::Source(source)) = self.plugins.get_mut(source_node) else {
                return Err(EngineError::MissingPlugin(source_node.to_string()));
            };
            source.iterate(&ctx)?
        };
        summary.validation_errors += u64::try_from(ctx.take_validation_errors().len()).unwrap_or(u64::MAX);
        self.recorder.complete_operation(
            &operation_id,
            OperationStatus::Completed,
            Timestamp::now(),
            None,
            None,
            None,
            None,
        )?;

        let mut work: Vec<QueuedToken> = Vec::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            let row_id = RowId::new(format!("{}-{index}", source_node.as_str()));
            self.recorder.record_row(&Row {
                row_id: row_id.clone(),
                run_id: self.run_id.clone(),
                source_node_id: source_node.clone(),
                row_index: u64::try_from(index).unwrap_or(u64::MAX),
                source_data_hash: stable_hash(row.to_dict())?,
                source_data_ref: None,
            })?;
            let token = Token {
                token_id: TokenId::new(format!("{}-tok", row_id.as_str())),
                row_id,
                created_at: Timestamp::now(),
                fork_group_id: None,
                branch_name: None,
                join_group_id: None,
                expand_group_id: None,
                step_in_pipeline: Some(0),
            };
            work.push((token, source_node.clone(), row));
        }

        while let Some((token, node_id, row)) = work.pop() {
            if let Some(kind) = self.advance(token, node_id, row, &mut work).await? {
                match kind {
                    TokenOutcomeKind::CompletedAtSink => summary.completed += 1,
                    TokenOutcomeKind::Failed => summary.failed += 1,
                    TokenOutcomeKind::Pending => summary.pending += 1,
                    TokenOutcomeKind::Discarded => summary.discarded += 1,
                    TokenOutcomeKind::Batched => summary.batched += 1,
                }
            }
        }
        self.recorder.close_run(&self.run_id, RunStatus::Completed)?;
        Ok(summary)
    }

    /// Advances a single token starting at `node_id`, following edges until
    /// it reaches a sink, a terminal failure, a suspension point, or a
    /// FORK/EXPAND/COALESCE point. FORK and EXPAND push each child onto
    /// `work` and return `Ok(None)`; a COALESCE that is still waiting on
    /// sibling branches also returns `Ok(None)` without queuing anything.
    async fn advance(
        &mut self,
        token: Token,
        node_id: NodeId,
        row: PipelineRow,
        work: &mut Vec<QueuedToken>,
    ) -> Result<Option<TokenOutcomeKind>, EngineError> {
        let mut current_node = node_id;
        let mut current_row = row;
        let mut current_token = token;
        loop {
            let node_type = self
                .graph
                .node(&current_node)
                .map(|info| info.node.node_type)
                .ok_or_else(|| EngineError::MissingPlugin(current_node.to_string()))?;
            let state_id =
                StateId::new(format!("{}-{}-0", current_token.token_id.as_str(), current_node.as_str()));
            let started_at = Timestamp::now();
            let input_hash = stable_hash(current_row.to_dict())?;
            self.recorder.open_state(&NodeState {
                state_id: state_id.clone(),
                token_id: current_token.token_id.clone(),
                node_id: current_node.clone(),
                run_id: self.run_id.clone(),
                step_index: current_token.step_in_pipeline.unwrap_or_default(),
                attempt: 0,
                input_hash,
                context_before_json: None,
                started_at,
                phase: NodeStatePhase::Open,
            })?;

            match node_type {
                NodeType::Transform => {
                    match self.run_transform(&current_node, &state_id, &current_token, current_row.clone()).await? {
                        StepOutcome::Advance(next_row) => {
                            let Some((edge_id, mode, to)) = self.first_outgoing(&current_node) else {
                                self.recorder
                                    .record_token_outcome(&current_token.token_id, &TokenOutcome::CompletedAtSink)?;
                                return Ok(Some(TokenOutcomeKind::CompletedAtSink));
                            };
                            self.record_routing(&state_id, edge_id, 0, mode)?;
                            current_row = next_row;
                            current_node = to;
                            current_token.step_in_pipeline =
                                Some(current_token.step_in_pipeline.unwrap_or_default() + 1);
                        }
                        StepOutcome::Expand(rows) => {
                            let Some((edge_id, mode, to)) = self.first_outgoing(&current_node) else {
                                self.recorder
                                    .record_token_outcome(&current_token.token_id, &TokenOutcome::CompletedAtSink)?;
                                return Ok(Some(TokenOutcomeKind::CompletedAtSink));
                            };
                            let next_step = Some(current_token.step_in_pipeline.unwrap_or_default() + 1);
                            let (children, _expand_group_id) =
                                self.recorder.expand_token(&current_token, &current_token.row_id, rows.len(), next_step)?;
                            for (ordinal, (child, child_row)) in
                                children.into_iter().zip(rows).enumerate()
                            {
                                self.record_routing(&state_id, edge_id.clone(), u32::try_from(ordinal).unwrap_or(u32::MAX), mode)?;
                                work.push((child, to.clone(), child_row));
                            }
                            return Ok(None);
                        }
                        StepOutcome::Terminal(kind) => return Ok(Some(kind)),
                    }
                }
                NodeType::Aggregation => {
                    match self.run_aggregation(&current_node, current_token.clone(), current_row.clone())? {
                        StepOutcome::Advance(next_row) => {
                            let Some((edge_id, mode, to)) = self.first_outgoing(&current_node) else {
                                self.recorder
                                    .record_token_outcome(&current_token.token_id, &TokenOutcome::CompletedAtSink)?;
                                return Ok(Some(TokenOutcomeKind::CompletedAtSink));
                            };
                            self.record_routing(&state_id, edge_id, 0, mode)?;
                            current_row = next_row;
                            current_node = to;
                        }
                        StepOutcome::Expand(_) => {
                            crate::core::error::framework_bug("aggregation cannot itself expand")
                        }
                        StepOutcome::Terminal(kind) => return Ok(Some(kind)),
                    }
                }
                NodeType::Gate => {
                    let ctx = self.context_for(&current_node, Some(state_id.clone()), Some(current_token.clone()));
                    let label = {
                        let Some(PluginHandle::Gate(gate)) = self.plugins.get(&current_node) else {
                            return Err(EngineError::MissingPlugin(current_node.to_string()));
                        };
                        gate.evaluate(&current_row, &ctx)?
                    };
                    self.recorder.complete_state(
                        &state_id,
                        NodeStatePhase::Completed {
                            output_hash: stable_hash(&label)?,
                            duration_ms: 0,
                            context_after_json: None,
                            success_reason_json: None,
                            completed_at: Timestamp::now(),
                        },
                    )?;

                    if label == FORK_LABEL {
                        let branches: Vec<String> = self
                            .graph
                            .node(&current_node)
                            .and_then(|info| info.node.config_json.get("fork_branches"))
                            .and_then(Value::as_array)
                            .map(|values| values.iter().filter_map(|value| value.as_str().map(str::to_string)).collect())
                            .unwrap_or_default();
                        let next_step = Some(current_token.step_in_pipeline.unwrap_or_default() + 1);
                        let (children, _fork_group_id) =
                            self.recorder.fork_token(&current_token, &current_token.row_id, &branches, next_step)?;
                        for child in children {
                            let Some(branch_name) = child.branch_name.as_deref() else {
                                continue;
                            };
                            let Some((edge_id, mode, to)) = self
                                .graph
                                .outgoing_edges(&current_node)
                                .into_iter()
                                .find(|edge| edge.label.as_deref() == Some(branch_name))
                                .map(|edge| (edge.edge_id.clone(), edge.mode, edge.to.clone()))
                            else {
                                return Err(EngineError::UnknownEdgeLabel {
                                    node: current_node.to_string(),
                                    label: branch_name.to_string(),
                                });
                            };
                            self.record_routing(&state_id, edge_id, 0, mode)?;
                            work.push((child, to, current_row.clone()));
                        }
                        return Ok(None);
                    }

                    let Some((edge_id, mode, to)) = self
                        .graph
                        .outgoing_edges(&current_node)
                        .into_iter()
                        .find(|edge| edge.label.as_deref() == Some(label.as_str()))
                        .map(|edge| (edge.edge_id.clone(), edge.mode, edge.to.clone()))
                    else {
                        return Err(EngineError::UnknownEdgeLabel { node: current_node.to_string(), label });
                    };
                    self.record_routing(&state_id, edge_id, 0, mode)?;
                    current_node = to;
                }
                NodeType::Coalesce => {
                    self.recorder.complete_state(
                        &state_id,
                        NodeStatePhase::Completed {
                            output_hash: stable_hash(current_row.to_dict())?,
                            duration_ms: 0,
                            context_after_json: None,
                            success_reason_json: None,
                            completed_at: Timestamp::now(),
                        },
                    )?;

                    let expected = self
                        .graph
                        .node(&current_node)
                        .and_then(|info| info.node.config_json.get("branches"))
                        .and_then(Value::as_array)
                        .map_or(1, Vec::len)
                        .max(1);
                    let group_key = current_token
                        .fork_group_id
                        .as_ref()
                        .map(|id| id.as_str().to_string())
                        .or_else(|| current_token.expand_group_id.as_ref().map(|id| id.as_str().to_string()))
                        .unwrap_or_else(|| current_token.token_id.as_str().to_string());
                    let bucket = self
                        .coalescing
                        .entry(current_node.clone())
                        .or_default()
                        .entry(group_key.clone())
                        .or_default();
                    bucket.push((current_token.clone(), current_row.clone()));

                    if bucket.len() < expected {
                        return Ok(None);
                    }

                    let members = self
                        .coalescing
                        .get_mut(&current_node)
                        .and_then(|by_group| by_group.remove(&group_key))
                        .unwrap_or_default();
                    let parents: Vec<Token> = members.iter().map(|(member_token, _)| member_token.clone()).collect();
                    let joined = self.recorder.coalesce_tokens(
                        &parents,
                        &current_token.row_id,
                        current_token.step_in_pipeline,
                    )?;
                    let mut rows_iter = members.into_iter().map(|(_, member_row)| member_row);
                    let merged_row = match rows_iter.next() {
                        Some(first) => rows_iter.try_fold(first, merge_rows)?,
                        None => current_row,
                    };

                    let Some((edge_id, mode, to)) = self.first_outgoing(&current_node) else {
                        self.recorder.record_token_outcome(&joined.token_id, &TokenOutcome::CompletedAtSink)?;
                        return Ok(Some(TokenOutcomeKind::CompletedAtSink));
                    };
                    self.record_routing(&state_id, edge_id, 0, mode)?;
                    current_token = joined;
                    current_row = merged_row;
                    current_node = to;
                }
                NodeType::Sink => {
                    let ctx = self.context_for(&current_node, Some(state_id.clone()), Some(current_token.clone()));
                    let operation_id = OperationId::new(format!("{}-write", state_id.as_str()));
                    self.recorder.begin_operation(&Operation {
                        operation_id: operation_id.clone(),
                        run_id: self.run_id.clone(),
                        node_id: current_node.clone(),
                        operation_type: OperationType::SinkWrite,
                        status: OperationStatus::Open,
                        started_at: Timestamp::now(),
                        completed_at: None,
                        duration_ms: None,
                        error_message: None,
                        input_data_ref: None,
                        input_data_hash: None,
                        output_data_ref: None,
                        output_data_hash: None,
                    })?;
                    let artifact = {
                        let Some(PluginHandle::Sink(sink)) = self.plugins.get_mut(&current_node) else {
                            return Err(EngineError::MissingPlugin(current_node.to_string()));
                        };
                        sink.write(std::slice::from_ref(&current_row), &ctx)?
                    };
                    self.recorder.complete_operation(
                        &operation_id,
                        OperationStatus::Completed,
                        Timestamp::now(),
                        None,
                        None,
                        Some(&artifact.path_or_uri),
                        Some(&artifact.content_hash),
                    )?;
                    self.record_artifact(&current_node, &state_id, artifact)?;
                    self.recorder.complete_state(
                        &state_id,
                        NodeStatePhase::Completed {
                            output_hash: stable_hash(current_row.to_dict())?,
                            duration_ms: 0,
                            context_after_json: None,
                            success_reason_json: None,
                            completed_at: Timestamp::now(),
                        },
                    )?;
                    self.recorder.record_token_outcome(&current_token.token_id, &TokenOutcome::CompletedAtSink)?;
                    return Ok(Some(TokenOutcomeKind::CompletedAtSink));
                }
                NodeType::Source => return Err(EngineError::MissingPlugin(current_node.to_string())),
            }
        }
    }

    fn first_outgoing(&self, node_id: &NodeId) -> Option<(EdgeId, RoutingMode, NodeId)> {
        self.graph.outgoing_edges(node_id).into_iter().next().map(|edge| (edge.edge_id.clone(), edge.mode, edge.to.clone()))
    }

    async fn run_transform(
        &mut self,
        node_id: &NodeId,
        state_id: &StateId,
        token: &Token,
        row: PipelineRow,
    ) -> Result<StepOutcome, EngineError> {
        let ctx = self.context_for(node_id, Some(state_id.clone()), Some(token.clone()));
        let retry = self.retry;
        let Some(PluginHandle::Transform(transform)) = self.plugins.get_mut(node_id) else {
            return Err(EngineError::MissingPlugin(node_id.to_string()));
        };
        let result = retry
            .execute_with_retry(
                |_attempt| {
                    let outcome = transform.process(row.clone(), &ctx);
                    async move { outcome }
                },
                |err: &PluginInvocationError| matches!(err, PluginInvocationError::Retryable(_)),
            )
            .await;
        match result {
            Ok(TransformResult::Rows { rows, .. }) => {
                ctx.clear_checkpoint()?;
                let output_hash = stable_hash(&rows.iter().map(PipelineRow::to_dict).collect::<Vec<_>>())?;
                self.recorder.complete_state(
                    state_id,
                    NodeStatePhase::Completed {
                        output_hash,
                        duration_ms: 0,
                        context_after_json: None,
                        success_reason_json: None,
                        completed_at: Timestamp::now(),
                    },
                )?;
                let mut rows = rows;
                match rows.len() {
                    0 => {
                        self.recorder.record_token_outcome(&token.token_id, &TokenOutcome::Discarded)?;
                        Ok(StepOutcome::Terminal(TokenOutcomeKind::Discarded))
                    }
                    1 => Ok(StepOutcome::Advance(rows.remove(0))),
                    _ => Ok(StepOutcome::Expand(rows)),
                }
            }
            Ok(TransformResult::Error { reason, .. }) => {
                ctx.clear_checkpoint()?;
                self.recorder.complete_state(
                    state_id,
                    NodeStatePhase::Failed {
                        error_json: Value::String(reason),
                        duration_ms: 0,
                        context_after_json: None,
                        completed_at: Timestamp::now(),
                    },
                )?;
                self.recorder.record_token_outcome(&token.token_id, &TokenOutcome::Failed)?;
                Ok(StepOutcome::Terminal(TokenOutcomeKind::Failed))
            }
            Err(RetryOutcome::NonRetryable(PluginInvocationError::Pending(pending))) => {
                ctx.update_checkpoint(pending.checkpoint.clone())?;
                self.recorder.complete_state(
                    state_id,
                    NodeStatePhase::Pending {
                        context_after_json: pending.checkpoint,
                        duration_ms: 0,
                        completed_at: Timestamp::now(),
                    },
                )?;
                Ok(StepOutcome::Terminal(TokenOutcomeKind::Pending))
            }
            Err(RetryOutcome::NonRetryable(err)) => {
                ctx.clear_checkpoint()?;
                self.recorder.complete_state(
                    state_id,
                    NodeStatePhase::Failed {
                        error_json: Value::String(err.to_string()),
                        duration_ms: 0,
                        context_after_json: None,
                        completed_at: Timestamp::now(),
                    },
                )?;
                self.recorder.record_token_outcome(&token.token_id, &TokenOutcome::Failed)?;
                Ok(StepOutcome::Terminal(TokenOutcomeKind::Failed))
            }
            Err(RetryOutcome::Exhausted(exceeded)) => {
                self.recorder.complete_state(
                    state_id,
                    NodeStatePhase::Failed {
                        error_json: Value::String(exceeded.to_string()),
                        duration_ms: 0,
                        context_after_json: None,
                        completed_at: Timestamp::now(),
                    },
                )?;
                self.recorder.record_token_outcome(&token.token_id, &TokenOutcome::Failed)?;
                Err(EngineError::MaxRetriesExceeded(exceeded))
            }
        }
    }

    fn run_aggregation(
        &mut self,
        node_id: &NodeId,
        token: Token,
        row: PipelineRow,
    ) -> Result<StepOutcome, EngineError> {
        let batch_size = self
            .graph
            .node(node_id)
            .and_then(|info| info.node.config_json.get("batch_size"))
            .and_then(serde_json::Value::as_u64)
            .map_or(self.config.default_batch_size, |value| usize::try_from(value).unwrap_or(usize::MAX));

        let entry = self
            .batches
            .entry(node_id.clone())
            .or_insert_with(|| (BatchId::new(format!("{}-batch-0", node_id.as_str())), Vec::new()));
        let ordinal = u32::try_from(entry.1.len()).unwrap_or(u32::MAX);
        self.recorder.add_batch_member(&BatchMember {
            batch_id: entry.0.clone(),
            token_id: token.token_id.clone(),
            ordinal,
        })?;
        entry.1.push((token.clone(), row));

        if entry.1.len() < batch_size {
            self.recorder.record_token_outcome(&token.token_id, &TokenOutcome::ConsumedInBatch)?;
            return Ok(StepOutcome::Terminal(TokenOutcomeKind::Batched));
        }

        let (_batch_id, members) = self
            .batches
            .remove(node_id)
            .unwrap_or_else(|| (BatchId::new(format!("{}-batch-0", node_id.as_str())), Vec::new()));
        for (member_token, _) in &members[.. members.len().saturating_sub(1)] {
            self.recorder.record_token_outcome(&member_token.token_id, &TokenOutcome::ConsumedInBatch)?;
        }
        let batch_rows: Vec<PipelineRow> = members.iter().map(|(_, row)| row.clone()).collect();
        let final_token = members.last().map_or_else(|| token.clone(), |(tok, _)| tok.clone());
        let ctx = self.context_for(node_id, None, Some(final_token.clone()));

        let Some(PluginHandle::Aggregator(aggregator)) = self.plugins.get_mut(node_id) else {
            return Err(EngineError::MissingPlugin(node_id.to_string()));
        };
        match aggregator.reduce(&batch_rows, &ctx)? {
            TransformResult::Rows { rows, .. } => match rows.into_iter().next() {
                Some(next_row) => Ok(StepOutcome::Advance(next_row)),
                None => {
                    self.recorder.record_token_outcome(&final_token.token_id, &TokenOutcome::Discarded)?;
                    Ok(StepOutcome::Terminal(TokenOutcomeKind::Discarded))
                }
            },
            TransformResult::Error { .. } => {
                self.recorder.record_token_outcome(&final_token.token_id, &TokenOutcome::Failed)?;
                Ok(StepOutcome::Terminal(TokenOutcomeKind::Failed))
            }
        }
    }

    fn record_routing(
        &self,
        state_id: &StateId,
        edge_id: EdgeId,
        ordinal: u32,
        mode: RoutingMode,
    ) -> Result<(), EngineError> {
        self.recorder.record_routing_event(&RoutingEvent {
            event_id: EventId::new(format!("{}-route-{ordinal}", state_id.as_str())),
            state_id: state_id.clone(),
            edge_id,
            routing_group_id: RoutingGroupId::new(format!("{}-group", state_id.as_str())),
            ordinal,
            mode,
            reason_hash: None,
            reason_ref: None,
            created_at: Timestamp::now(),
        })?;
        Ok(())
    }

    fn record_artifact(
        &self,
        node_id: &NodeId,
        state_id: &StateId,
        descriptor: ArtifactDescriptor,
    ) -> Result<(), EngineError> {
        self.recorder.record_artifact(&Artifact {
            artifact_id: ArtifactId::new(format!("{}-artifact", state_id.as_str())),
            run_id: self.run_id.clone(),
            sink_node_id: node_id.clone(),
            produced_by_state_id: state_id.clone(),
            artifact_type: descriptor.artifact_type,
            path_or_uri: descriptor.path_or_uri,
            content_hash: descriptor.content_hash,
            size_bytes: descriptor.size_bytes,
            created_at: Timestamp::now(),
        })?;
        Ok(())
    }
}

/// Merges two coalescing branches' rows into one: fields union, with `next`
/// winning any key collision, and the contracts merge per
/// [`SchemaContract::merge`] so a field required on only one branch becomes
/// optional in the joined row.
fn merge_rows(acc: PipelineRow, next: PipelineRow) -> Result<PipelineRow, EngineError> {
    let merged_contract = acc.contract().merge(next.contract())?;
    let mut data = acc.to_dict().clone();
    data.extend(next.to_dict().clone());
    Ok(PipelineRow::new(data, merged_contract))
}

/// Stable hash of the edges feeding `node_id`, sorted so edge declaration
/// order never perturbs the hash. Used to detect a checkpointed token
/// resuming against a graph whose upstream shape has since changed.
fn upstream_topology_hash(graph: &ExecutionGraph, node_id: &NodeId) -> String {
    let mut edges: Vec<(String, String, Option<String>)> = graph
        .incoming_edges(node_id)
        .into_iter()
        .map(|edge| (edge.from.as_str().to_string(), edge.to.as_str().to_string(), edge.label.clone()))
        .collect();
    edges.sort();
    stable_hash(&edges).unwrap_or_default()
}
