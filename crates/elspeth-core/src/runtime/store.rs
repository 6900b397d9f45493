// elspeth-core/src/runtime/store.rs
// ============================================================================
// Module: Elspeth In-Memory Recorder
// Description: Simple in-memory RunRecorder for tests and local demos.
// Purpose: Provide a deterministic recorder implementation without external deps.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! This module provides a simple in-memory implementation of
//! [`RunRecorder`] for tests and local demos. Durable deployments use a
//! relational implementation against the schema in the data model instead.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use crate::core::identifiers::NodeId;
use crate::core::identifiers::OperationId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::StateId;
use crate::core::identifiers::TokenId;
use crate::core::model::Artifact;
use crate::core::model::BatchMember;
use crate::core::model::Call;
use crate::core::model::Checkpoint;
use crate::core::model::Edge;
use crate::core::model::Node;
use crate::core::model::NodeState;
use crate::core::model::NodeStatePhase;
use crate::core::model::Operation;
use crate::core::model::OperationStatus;
use crate::core::model::Row;
use crate::core::model::Run;
use crate::core::model::RunStatus;
use crate::core::model::RoutingEvent;
use crate::core::model::Token;
use crate::core::model::TokenOutcome;
use crate::core::model::TokenParent;
use crate::core::time::Timestamp;
use crate::interfaces::CallParent;
use crate::interfaces::RecorderError;
use crate::interfaces::RunRecorder;

// ============================================================================
// SECTION: In-Memory Recorder
// ============================================================================

/// In-memory audit recorder for tests and local demos.
///
/// Grounded on the reference crate's `Arc<Mutex<BTreeMap<...>>>` in-memory
/// store shape, generalized to the full relational audit trail: runs,
/// nodes, edges, node-states, calls, routing events, token outcomes, batch
/// members, and artifacts, each behind its own lock so unrelated tables
/// never contend.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRunRecorder {
    runs: Arc<Mutex<BTreeMap<String, Run>>>,
    nodes: Arc<Mutex<BTreeMap<String, Node>>>,
    edges: Arc<Mutex<Vec<Edge>>>,
    states: Arc<Mutex<BTreeMap<String, NodeState>>>,
    calls: Arc<Mutex<Vec<Call>>>,
    routing_events: Arc<Mutex<Vec<RoutingEvent>>>,
    token_outcomes: Arc<Mutex<HashMap<String, TokenOutcome>>>,
    batch_members: Arc<Mutex<Vec<BatchMember>>>,
    artifacts: Arc<Mutex<Vec<Artifact>>>,
    call_indices: Arc<Mutex<HashMap<String, Arc<AtomicU32>>>>,
    rows: Arc<Mutex<BTreeMap<String, Row>>>,
    tokens: Arc<Mutex<BTreeMap<String, Token>>>,
    token_parents: Arc<Mutex<Vec<TokenParent>>>,
    operations: Arc<Mutex<BTreeMap<String, Operation>>>,
    checkpoints: Arc<Mutex<BTreeMap<(String, String, String), Checkpoint>>>,
}

impl InMemoryRunRecorder {
    /// Creates a new, empty in-memory recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all recorded node-states, for test assertions.
    #[must_use]
    pub fn states_snapshot(&self) -> Vec<NodeState> {
        self.states.lock().map(|g| g.values().cloned().collect()).unwrap_or_default()
    }

    /// Returns a snapshot of all recorded routing events, for test assertions.
    #[must_use]
    pub fn routing_events_snapshot(&self) -> Vec<RoutingEvent> {
        self.routing_events.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Returns the recorded outcome for `token_id`, if any.
    #[must_use]
    pub fn token_outcome(&self, token_id: &TokenId) -> Option<TokenOutcome> {
        self.token_outcomes.lock().ok()?.get(token_id.as_str()).cloned()
    }

    /// Returns a snapshot of all recorded tokens, for test assertions.
    #[must_use]
    pub fn tokens_snapshot(&self) -> Vec<Token> {
        self.tokens.lock().map(|g| g.values().cloned().collect()).unwrap_or_default()
    }

    /// Returns a snapshot of all recorded token-parent links, for test
    /// assertions.
    #[must_use]
    pub fn token_parents_snapshot(&self) -> Vec<TokenParent> {
        self.token_parents.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Returns the recorded operation for `operation_id`, if any.
    #[must_use]
    pub fn operation(&self, operation_id: &OperationId) -> Option<Operation> {
        self.operations.lock().ok()?.get(operation_id.as_str()).cloned()
    }

    /// Returns a snapshot of all recorded artifacts, for test assertions.
    #[must_use]
    pub fn artifacts_snapshot(&self) -> Vec<Artifact> {
        self.artifacts.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Returns a snapshot of all recorded calls, for test assertions.
    #[must_use]
    pub fn calls_snapshot(&self) -> Vec<Call> {
        self.calls.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Returns a snapshot of all recorded rows, for test assertions.
    #[must_use]
    pub fn rows_snapshot(&self) -> Vec<Row> {
        self.rows.lock().map(|g| g.values().cloned().collect()).unwrap_or_default()
    }

    /// Returns the recorded status of `run_id`, if it has been opened.
    #[must_use]
    pub fn run_status_snapshot(&self, run_id: &RunId) -> Option<RunStatus> {
        self.runs.lock().ok()?.get(run_id.as_str()).map(|run| run.status)
    }

    fn poisoned(what: &str) -> RecorderError {
        RecorderError::Io(format!("{what} lock poisoned"))
    }

    fn parent_key(parent: CallParent) -> String {
        match parent {
            CallParent::State(state_id) => format!("state:{}", state_id.as_str()),
            CallParent::Operation(operation_id) => format!("operation:{}", operation_id.as_str()),
        }
    }
}

impl RunRecorder for InMemoryRunRecorder {
    fn open_run(&self, run: &Run) -> Result<(), RecorderError> {
        let mut guard = self.runs.lock().map_err(|_| Self::poisoned("runs"))?;
        if guard.contains_key(run.run_id.as_str()) {
            return Err(RecorderError::Constraint(format!(
                "run {} already open",
                run.run_id.as_str()
            )));
        }
        guard.insert(run.run_id.as_str().to_string(), run.clone());
        Ok(())
    }

    fn close_run(&self, run_id: &RunId, status: RunStatus) -> Result<(), RecorderError> {
        let mut guard = self.runs.lock().map_err(|_| Self::poisoned("runs"))?;
        let run = guard
            .get_mut(run_id.as_str())
            .ok_or_else(|| RecorderError::Constraint(format!("unknown run: {}", run_id.as_str())))?;
        run.status = status;
        Ok(())
    }

    fn register_node(&self, node: &Node) -> Result<(), RecorderError> {
        let mut guard = self.nodes.lock().map_err(|_| Self::poisoned("nodes"))?;
        if guard.contains_key(node.node_id.as_str()) {
            return Err(RecorderError::Constraint(format!(
                "node {} already registered",
                node.node_id.as_str()
            )));
        }
        guard.insert(node.node_id.as_str().to_string(), node.clone());
        Ok(())
    }

    fn register_edge(&self, edge: &Edge) -> Result<(), RecorderError> {
        self.edges.lock().map_err(|_| Self::poisoned("edges"))?.push(edge.clone());
        Ok(())
    }

    fn allocate_call_index(&self, parent: CallParent) -> u32 {
        let key = Self::parent_key(parent);
        let counter = {
            let mut guard = match self.call_indices.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.entry(key).or_insert_with(|| Arc::new(AtomicU32::new(0))).clone()
        };
        counter.fetch_add(1, Ordering::SeqCst)
    }

    fn open_state(&self, state: &NodeState) -> Result<(), RecorderError> {
        let mut guard = self.states.lock().map_err(|_| Self::poisoned("states"))?;
        if guard.contains_key(state.state_id.as_str()) {
            return Err(RecorderError::Constraint(format!(
                "state {} already open",
                state.state_id.as_str()
            )));
        }
        guard.insert(state.state_id.as_str().to_string(), state.clone());
        Ok(())
    }

    fn complete_state(&self, state_id: &StateId, phase: NodeStatePhase) -> Result<(), RecorderError> {
        let mut guard = self.states.lock().map_err(|_| Self::poisoned("states"))?;
        let state = guard.get_mut(state_id.as_str()).ok_or_else(|| {
            RecorderError::Constraint(format!("unknown state: {}", state_id.as_str()))
        })?;
        if matches!(state.phase, NodeStatePhase::Completed { .. } | NodeStatePhase::Failed { .. }) {
            return Err(RecorderError::Constraint(format!(
                "state {} already terminal",
                state_id.as_str()
            )));
        }
        state.phase = phase;
        Ok(())
    }

    fn record_call(&self, call: &Call) -> Result<(), RecorderError> {
        if call.state_id.is_some() == call.operation_id.is_some() {
            return Err(RecorderError::Constraint(
                "call must have exactly one of state_id/operation_id set".to_string(),
            ));
        }
        self.calls.lock().map_err(|_| Self::poisoned("calls"))?.push(call.clone());
        Ok(())
    }

    fn record_routing_event(&self, event: &RoutingEvent) -> Result<(), RecorderError> {
        self.routing_events
            .lock()
            .map_err(|_| Self::poisoned("routing_events"))?
            .push(event.clone());
        Ok(())
    }

    fn record_token_outcome(
        &self,
        token_id: &TokenId,
        outcome: &TokenOutcome,
    ) -> Result<(), RecorderError> {
        let mut guard =
            self.token_outcomes.lock().map_err(|_| Self::poisoned("token_outcomes"))?;
        if guard.contains_key(token_id.as_str()) {
            return Err(RecorderError::Constraint(format!(
                "token {} already has an outcome",
                token_id.as_str()
            )));
        }
        guard.insert(token_id.as_str().to_string(), outcome.clone());
        Ok(())
    }

    fn add_batch_member(&self, member: &BatchMember) -> Result<(), RecorderError> {
        self.batch_members
            .lock()
            .map_err(|_| Self::poisoned("batch_members"))?
            .push(member.clone());
        Ok(())
    }

    fn record_artifact(&self, artifact: &Artifact) -> Result<(), RecorderError> {
        self.artifacts.lock().map_err(|_| Self::poisoned("artifacts"))?.push(artifact.clone());
        Ok(())
    }

    fn record_row(&self, row: &Row) -> Result<(), RecorderError> {
        let mut guard = self.rows.lock().map_err(|_| Self::poisoned("rows"))?;
        if guard.contains_key(row.row_id.as_str()) {
            return Err(RecorderError::Constraint(format!(
                "row {} already recorded",
                row.row_id.as_str()
            )));
        }
        guard.insert(row.row_id.as_str().to_string(), row.clone());
        Ok(())
    }

    fn record_token(&self, token: &Token) -> Result<(), RecorderError> {
        let mut guard = self.tokens.lock().map_err(|_| Self::poisoned("tokens"))?;
        if guard.contains_key(token.token_id.as_str()) {
            return Err(RecorderError::Constraint(format!(
                "token {} already recorded",
                token.token_id.as_str()
            )));
        }
        guard.insert(token.token_id.as_str().to_string(), token.clone());
        Ok(())
    }

    fn record_token_parent(&self, link: &TokenParent) -> Result<(), RecorderError> {
        let mut guard = self.token_parents.lock().map_err(|_| Self::poisoned("token_parents"))?;
        if guard.iter().any(|existing| {
            existing.token_id == link.token_id && existing.parent_token_id == link.parent_token_id
        }) {
            return Err(RecorderError::Constraint(format!(
                "token parent link {} <- {} already recorded",
                link.token_id.as_str(),
                link.parent_token_id.as_str()
            )));
        }
        guard.push(link.clone());
        Ok(())
    }

    fn begin_operation(&self, operation: &Operation) -> Result<(), RecorderError> {
        let mut guard = self.operations.lock().map_err(|_| Self::poisoned("operations"))?;
        if guard.contains_key(operation.operation_id.as_str()) {
            return Err(RecorderError::Constraint(format!(
                "operation {} already open",
                operation.operation_id.as_str()
            )));
        }
        guard.insert(operation.operation_id.as_str().to_string(), operation.clone());
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
        let mut guard = self.operations.lock().map_err(|_| Self::poisoned("operations"))?;
        let operation = guard.get_mut(operation_id.as_str()).ok_or_else(|| {
            RecorderError::Constraint(format!("unknown operation: {}", operation_id.as_str()))
        })?;
        if !matches!(operation.status, OperationStatus::Open) {
            return Err(RecorderError::Constraint(format!(
                "operation {} already terminal",
                operation_id.as_str()
            )));
        }
        operation.status = status;
        operation.completed_at = Some(completed_at);
        operation.duration_ms = duration_ms;
        operation.error_message = error_message.map(str::to_string);
        operation.output_data_ref = output_data_ref.map(str::to_string);
        operation.output_data_hash = output_data_hash.map(str::to_string);
        Ok(())
    }

    fn persist_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), RecorderError> {
        let key = checkpoint_key(&checkpoint.run_id, &checkpoint.node_id, &checkpoint.token_id);
        let mut guard = self.checkpoints.lock().map_err(|_| Self::poisoned("checkpoints"))?;
        guard.insert(key, checkpoint.clone());
        Ok(())
    }

    fn read_checkpoint(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        token_id: &TokenId,
    ) -> Result<Option<Checkpoint>, RecorderError> {
        let key = checkpoint_key(run_id, node_id, token_id);
        let guard = self.checkpoints.lock().map_err(|_| Self::poisoned("checkpoints"))?;
        Ok(guard.get(&key).cloned())
    }

    fn delete_checkpoint(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        token_id: &TokenId,
    ) -> Result<(), RecorderError> {
        let key = checkpoint_key(run_id, node_id, token_id);
        let mut guard = self.checkpoints.lock().map_err(|_| Self::poisoned("checkpoints"))?;
        guard.remove(&key);
        Ok(())
    }
}

/// Composite key identifying one checkpoint slot.
fn checkpoint_key(run_id: &RunId, node_id: &NodeId, token_id: &TokenId) -> (String, String, String) {
    (run_id.as_str().to_string(), node_id.as_str().to_string(), token_id.as_str().to_string())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test assertions")]

    use serde_json::json;

    use super::*;
    use crate::core::identifiers::OperationId;
    use crate::core::time::Timestamp;

    fn sample_run() -> Run {
        Run {
            run_id: RunId::new("run-1"),
            status: RunStatus::Running,
            started_at: Timestamp::now(),
            completed_at: None,
            config_hash: "abc123".to_string(),
            settings_json: json!({}),
            canonical_version: "1".to_string(),
        }
    }

    #[test]
    fn opening_the_same_run_twice_is_rejected() {
        let recorder = InMemoryRunRecorder::new();
        recorder.open_run(&sample_run()).unwrap();
        assert!(recorder.open_run(&sample_run()).is_err());
    }

    #[test]
    fn call_indices_are_contiguous_per_parent() {
        let recorder = InMemoryRunRecorder::new();
        let parent = CallParent::Operation(OperationId::new("op-1"));
        assert_eq!(recorder.allocate_call_index(parent.clone()), 0);
        assert_eq!(recorder.allocate_call_index(parent.clone()), 1);
        assert_eq!(recorder.allocate_call_index(parent), 2);
    }

    #[test]
    fn completing_a_terminal_state_twice_is_rejected() {
        let recorder = InMemoryRunRecorder::new();
        let state = NodeState {
            state_id: StateId::new("state-1"),
            token_id: TokenId::new("token-1"),
            node_id: NodeId::new("node-1"),
            run_id: RunId::new("run-1"),
            step_index: 0,
            attempt: 0,
            input_hash: "hash".to_string(),
            context_before_json: None,
            started_at: Timestamp::now(),
            phase: NodeStatePhase::Open,
        };
        recorder.open_state(&state).unwrap();
        let done = NodeStatePhase::Completed {
            output_hash: "out".to_string(),
            duration_ms: 1,
            context_after_json: None,
            success_reason_json: None,
            completed_at: Timestamp::now(),
        };
        recorder.complete_state(&state.state_id, done.clone()).unwrap();
        assert!(recorder.complete_state(&state.state_id, done).is_err());
    }

    #[test]
    fn a_call_with_both_parents_set_is_rejected() {
        let recorder = InMemoryRunRecorder::new();
        let call = Call {
            call_id: crate::core::identifiers::CallId::new("call-1"),
            state_id: Some(StateId::new("state-1")),
            operation_id: Some(OperationId::new("op-1")),
            call_index: 0,
            call_type: crate::core::model::CallType::Http,
            status: crate::core::model::CallStatus::Success,
            request_hash: "req".to_string(),
            response_hash: None,
            request_ref: None,
            response_ref: None,
            latency_ms: None,
            error_json: None,
            created_at: Timestamp::now(),
            provider: None,
        };
        assert!(recorder.record_call(&call).is_err());
    }

    #[test]
    fn recording_the_same_row_twice_is_rejected() {
        let recorder = InMemoryRunRecorder::new();
        let row = Row {
            row_id: crate::core::identifiers::RowId::new("row-1"),
            run_id: RunId::new("run-1"),
            source_node_id: NodeId::new("node-1"),
            row_index: 0,
            source_data_hash: "hash".to_string(),
            source_data_ref: None,
        };
        recorder.record_row(&row).unwrap();
        assert!(recorder.record_row(&row).is_err());
    }

    #[test]
    fn forking_a_token_records_children_and_a_forked_outcome() {
        let recorder = InMemoryRunRecorder::new();
        let row_id = crate::core::identifiers::RowId::new("row-1");
        let parent = Token {
            token_id: TokenId::new("token-1"),
            row_id: row_id.clone(),
            created_at: Timestamp::now(),
            fork_group_id: None,
            branch_name: None,
            join_group_id: None,
            expand_group_id: None,
            step_in_pipeline: Some(0),
        };
        recorder.record_token(&parent).unwrap();
        let branches = vec!["left".to_string(), "right".to_string()];
        let (children, fork_group_id) = recorder.fork_token(&parent, &row_id, &branches, Some(1)).unwrap();
        assert_eq!(children.len(), 2);
        for child in &children {
            assert_eq!(child.fork_group_id.as_ref(), Some(&fork_group_id));
        }
        let parents = recorder.token_parents_snapshot();
        assert!(parents.iter().all(|link| link.parent_token_id == parent.token_id));
        assert!(matches!(
            recorder.token_outcome(&parent.token_id),
            Some(TokenOutcome::Forked { .. })
        ));
    }

    #[test]
    fn coalescing_tokens_joins_every_parent() {
        let recorder = InMemoryRunRecorder::new();
        let row_id = crate::core::identifiers::RowId::new("row-1");
        let parents: Vec<Token> = ["a", "b"]
            .into_iter()
            .map(|name| Token {
                token_id: TokenId::new(format!("token-{name}")),
                row_id: row_id.clone(),
                created_at: Timestamp::now(),
                fork_group_id: None,
                branch_name: Some(name.to_string()),
                join_group_id: None,
                expand_group_id: None,
                step_in_pipeline: Some(1),
            })
            .collect();
        for parent in &parents {
            recorder.record_token(parent).unwrap();
        }
        let joined = recorder.coalesce_tokens(&parents, &row_id, Some(2)).unwrap();
        assert!(joined.join_group_id.is_some());
        for parent in &parents {
            assert!(matches!(recorder.token_outcome(&parent.token_id), Some(TokenOutcome::Joined)));
        }
    }

    #[test]
    fn completing_an_operation_twice_is_rejected() {
        let recorder = InMemoryRunRecorder::new();
        let operation = Operation {
            operation_id: OperationId::new("op-1"),
            run_id: RunId::new("run-1"),
            node_id: NodeId::new("node-1"),
            operation_type: crate::core::model::OperationType::SourceLoad,
            status: OperationStatus::Open,
            started_at: Timestamp::now(),
            completed_at: None,
            duration_ms: None,
            error_message: None,
            input_data_ref: None,
            input_data_hash: None,
            output_data_ref: None,
            output_data_hash: None,
        };
        recorder.begin_operation(&operation).unwrap();
        recorder
            .complete_operation(&operation.operation_id, OperationStatus::Completed, Timestamp::now(), Some(5), None, None, None)
            .unwrap();
        assert!(
            recorder
                .complete_operation(&operation.operation_id, OperationStatus::Completed, Timestamp::now(), Some(5), None, None, None)
                .is_err()
        );
    }

    #[test]
    fn a_persisted_checkpoint_round_trips_by_key() {
        let recorder = InMemoryRunRecorder::new();
        let run_id = RunId::new("run-1");
        let node_id = NodeId::new("node-1");
        let token_id = TokenId::new("token-1");
        let checkpoint = Checkpoint {
            run_id: run_id.clone(),
            node_id: node_id.clone(),
            token_id: token_id.clone(),
            sequence_number: 1,
            payload_json: json!({"batch_id": "b-1", "status": "submitted"}),
            upstream_topology_hash: "topo-hash".to_string(),
            checkpoint_node_config_hash: "config-hash".to_string(),
            created_at: Timestamp::now(),
        };
        recorder.persist_checkpoint(&checkpoint).unwrap();
        let read_back = recorder.read_checkpoint(&run_id, &node_id, &token_id).unwrap();
        assert_eq!(read_back, Some(checkpoint));
    }

    #[test]
    fn re_persisting_a_checkpoint_supersedes_the_prior_sequence_number() {
        let recorder = InMemoryRunRecorder::new();
        let run_id = RunId::new("run-1");
        let node_id = NodeId::new("node-1");
        let token_id = TokenId::new("token-1");
        let mut checkpoint = Checkpoint {
            run_id: run_id.clone(),
            node_id: node_id.clone(),
            token_id: token_id.clone(),
            sequence_number: 1,
            payload_json: json!({"status": "submitted"}),
            upstream_topology_hash: "topo-hash".to_string(),
            checkpoint_node_config_hash: "config-hash".to_string(),
            created_at: Timestamp::now(),
        };
        recorder.persist_checkpoint(&checkpoint).unwrap();
        checkpoint.sequence_number = 2;
        checkpoint.payload_json = json!({"status": "in_progress"});
        recorder.persist_checkpoint(&checkpoint).unwrap();
        let read_back = recorder.read_checkpoint(&run_id, &node_id, &token_id).unwrap().unwrap();
        assert_eq!(read_back.sequence_number, 2);
    }

    #[test]
    fn clearing_a_checkpoint_removes_it() {
        let recorder = InMemoryRunRecorder::new();
        let run_id = RunId::new("run-1");
        let node_id = NodeId::new("node-1");
        let token_id = TokenId::new("token-1");
        let checkpoint = Checkpoint {
            run_id: run_id.clone(),
            node_id: node_id.clone(),
            token_id: token_id.clone(),
            sequence_number: 1,
            payload_json: json!({"status": "submitted"}),
            upstream_topology_hash: "topo-hash".to_string(),
            checkpoint_node_config_hash: "config-hash".to_string(),
            created_at: Timestamp::now(),
        };
        recorder.persist_checkpoint(&checkpoint).unwrap();
        recorder.delete_checkpoint(&run_id, &node_id, &token_id).unwrap();
        assert_eq!(recorder.read_checkpoint(&run_id, &node_id, &token_id).unwrap(), None);
    }
}
