// elspeth-store-sqlite/tests/sqlite_recorder.rs
// ============================================================================
// Module: SQLite Recorder Integration Tests
// Description: Exercises SqliteRunRecorder against a real file-backed database.
// Purpose: Confirm durability, constraint enforcement, and schema shape.
// Dependencies: elspeth-core, elspeth-store-sqlite, tempfile
// ============================================================================

//! Integration tests exercising `SqliteRunRecorder` against a real
//! file-backed database.
#![allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]

use elspeth_core::core::identifiers::BatchId;
use elspeth_core::core::identifiers::EdgeId;
use elspeth_core::core::identifiers::NodeId;
use elspeth_core::core::identifiers::RunId;
use elspeth_core::core::identifiers::StateId;
use elspeth_core::core::identifiers::TokenId;
use elspeth_core::core::model::BatchMember;
use elspeth_core::core::model::Call;
use elspeth_core::core::model::CallStatus;
use elspeth_core::core::model::CallType;
use elspeth_core::core::model::Determinism;
use elspeth_core::core::model::Edge;
use elspeth_core::core::model::Node;
use elspeth_core::core::model::NodeState;
use elspeth_core::core::model::NodeStatePhase;
use elspeth_core::core::model::NodeType;
use elspeth_core::core::model::RoutingMode;
use elspeth_core::core::model::Run;
use elspeth_core::core::model::RunStatus;
use elspeth_core::core::model::TokenOutcome;
use elspeth_core::core::time::Timestamp;
use elspeth_core::interfaces::CallParent;
use elspeth_core::interfaces::RecorderError;
use elspeth_core::interfaces::RunRecorder;
use elspeth_store_sqlite::SqliteRunRecorder;
use elspeth_store_sqlite::SqliteStoreConfig;
use elspeth_store_sqlite::SqliteStoreMode;
use elspeth_store_sqlite::SqliteSyncMode;

fn open_recorder(dir: &std::path::Path) -> SqliteRunRecorder {
    let config = SqliteStoreConfig {
        path: dir.join("audit.db"),
        busy_timeout_ms: 2_000,
        journal_mode: SqliteStoreMode::Wal,
        sync_mode: SqliteSyncMode::Normal,
    };
    SqliteRunRecorder::open(&config).expect("recorder opens")
}

fn sample_run(run_id: &str) -> Run {
    Run {
        run_id: RunId::new(run_id),
        status: RunStatus::Running,
        started_at: Timestamp::now(),
        completed_at: None,
        config_hash: "config-hash".to_string(),
        settings_json: serde_json::json!({ "pipeline": "demo" }),
        canonical_version: "elspeth-canon-v1".to_string(),
    }
}

#[test]
fn a_run_persists_across_recorder_instances() {
    let dir = tempfile::tempdir().unwrap();
    {
        let recorder = open_recorder(dir.path());
        recorder.open_run(&sample_run("run-persist")).unwrap();
        recorder.close_run(&RunId::new("run-persist"), RunStatus::Completed).unwrap();
    }
    let reopened = open_recorder(dir.path());
    let result = reopened.open_run(&sample_run("run-persist"));
    assert!(matches!(result, Err(RecorderError::Constraint(_))));
}

#[test]
fn opening_the_same_run_twice_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = open_recorder(dir.path());
    recorder.open_run(&sample_run("run-dup")).unwrap();
    let result = recorder.open_run(&sample_run("run-dup"));
    assert!(matches!(result, Err(RecorderError::Constraint(_))));
}

#[test]
fn closing_an_unknown_run_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = open_recorder(dir.path());
    let result = recorder.close_run(&RunId::new("ghost"), RunStatus::Failed);
    assert!(matches!(result, Err(RecorderError::Constraint(_))));
}

#[test]
fn call_indices_are_contiguous_per_state_parent() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = open_recorder(dir.path());
    recorder.open_run(&sample_run("run-calls")).unwrap();
    recorder
        .register_node(&Node {
            node_id: NodeId::new("node-1"),
            run_id: RunId::new("run-calls"),
            plugin_name: "llm_gate".to_string(),
            node_type: NodeType::Gate,
            plugin_version: "1.0.0".to_string(),
            determinism: Determinism::ExternalCall,
            config_hash: "hash".to_string(),
            config_json: serde_json::json!({}),
            schema_hash: None,
            schema_mode: None,
            schema_fields: vec![],
            sequence_in_pipeline: 0,
        })
        .unwrap();
    let state = NodeState {
        state_id: StateId::new("state-1"),
        token_id: TokenId::new("token-1"),
        node_id: NodeId::new("node-1"),
        run_id: RunId::new("run-calls"),
        step_index: 0,
        attempt: 0,
        input_hash: "input-hash".to_string(),
        context_before_json: None,
        started_at: Timestamp::now(),
        phase: NodeStatePhase::Open,
    };
    recorder.open_state(&state).unwrap();

    let parent = CallParent::State(StateId::new("state-1"));
    let first_index = recorder.allocate_call_index(parent.clone());
    let second_index = recorder.allocate_call_index(parent.clone());
    assert_eq!(first_index, 0);
    assert_eq!(second_index, 1, "allocation is atomic and contiguous under contention");

    recorder
        .record_call(&Call {
            call_id: elspeth_core::core::identifiers::CallId::new("call-1"),
            state_id: Some(StateId::new("state-1")),
            operation_id: None,
            call_index: first_index,
            call_type: CallType::Llm,
            status: CallStatus::Success,
            request_hash: "req-hash".to_string(),
            response_hash: Some("resp-hash".to_string()),
            request_ref: None,
            response_ref: None,
            latency_ms: Some(120),
            error_json: None,
            created_at: Timestamp::now(),
            provider: Some("test-provider".to_string()),
        })
        .unwrap();

    let next_index = recorder.allocate_call_index(parent);
    assert_eq!(next_index, 2, "allocation continues from the in-memory counter");
}

#[test]
fn a_call_with_both_parents_set_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = open_recorder(dir.path());
    let result = recorder.record_call(&Call {
        call_id: elspeth_core::core::identifiers::CallId::new("call-bad"),
        state_id: Some(StateId::new("state-x")),
        operation_id: Some(elspeth_core::core::identifiers::OperationId::new("op-x")),
        call_index: 0,
        call_type: CallType::Http,
        status: CallStatus::Success,
        request_hash: "req".to_string(),
        response_hash: None,
        request_ref: None,
        response_ref: None,
        latency_ms: None,
        error_json: None,
        created_at: Timestamp::now(),
        provider: None,
    });
    assert!(matches!(result, Err(RecorderError::Constraint(_))));
}

#[test]
fn completing_a_terminal_state_twice_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = open_recorder(dir.path());
    recorder.open_run(&sample_run("run-states")).unwrap();
    recorder
        .register_node(&Node {
            node_id: NodeId::new("node-1"),
            run_id: RunId::new("run-states"),
            plugin_name: "identity".to_string(),
            node_type: NodeType::Transform,
            plugin_version: "1.0.0".to_string(),
            determinism: Determinism::Deterministic,
            config_hash: "hash".to_string(),
            config_json: serde_json::json!({}),
            schema_hash: None,
            schema_mode: None,
            schema_fields: vec![],
            sequence_in_pipeline: 0,
        })
        .unwrap();
    let state = NodeState {
        state_id: StateId::new("state-1"),
        token_id: TokenId::new("token-1"),
        node_id: NodeId::new("node-1"),
        run_id: RunId::new("run-states"),
        step_index: 0,
        attempt: 0,
        input_hash: "input-hash".to_string(),
        context_before_json: None,
        started_at: Timestamp::now(),
        phase: NodeStatePhase::Open,
    };
    recorder.open_state(&state).unwrap();
    recorder
        .complete_state(
            &StateId::new("state-1"),
            NodeStatePhase::Completed {
                output_hash: "output-hash".to_string(),
                duration_ms: 5,
                context_after_json: None,
                success_reason_json: None,
                completed_at: Timestamp::now(),
            },
        )
        .unwrap();
    let result = recorder.complete_state(
        &StateId::new("state-1"),
        NodeStatePhase::Failed {
            error_json: serde_json::json!({ "message": "too late" }),
            duration_ms: 1,
            context_after_json: None,
            completed_at: Timestamp::now(),
        },
    );
    assert!(matches!(result, Err(RecorderError::Constraint(_))));
}

#[test]
fn a_token_gets_at_most_one_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = open_recorder(dir.path());
    let token_id = TokenId::new("token-once");
    recorder.record_token_outcome(&token_id, &TokenOutcome::CompletedAtSink).unwrap();
    let result = recorder.record_token_outcome(&token_id, &TokenOutcome::Discarded);
    assert!(matches!(result, Err(RecorderError::Constraint(_))));
}

#[test]
fn registering_the_same_edge_twice_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = open_recorder(dir.path());
    recorder.open_run(&sample_run("run-edges")).unwrap();
    recorder
        .register_edge(&Edge {
            edge_id: EdgeId::new("edge-1"),
            run_id: RunId::new("run-edges"),
            from_node_id: NodeId::new("node-a"),
            to_node_id: NodeId::new("node-b"),
            label: "continue".to_string(),
            default_mode: RoutingMode::Move,
        })
        .unwrap();
    let result = recorder.register_edge(&Edge {
        edge_id: EdgeId::new("edge-1"),
        run_id: RunId::new("run-edges"),
        from_node_id: NodeId::new("node-a"),
        to_node_id: NodeId::new("node-b"),
        label: "continue".to_string(),
        default_mode: RoutingMode::Move,
    });
    assert!(matches!(result, Err(RecorderError::Constraint(_))));
}

#[test]
fn run_status_reflects_open_and_closed_runs() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = open_recorder(dir.path());
    assert_eq!(recorder.run_status(&RunId::new("run-status")).unwrap(), None);
    recorder.open_run(&sample_run("run-status")).unwrap();
    assert_eq!(recorder.run_status(&RunId::new("run-status")).unwrap(), Some(RunStatus::Running));
    recorder.close_run(&RunId::new("run-status"), RunStatus::Completed).unwrap();
    assert_eq!(recorder.run_status(&RunId::new("run-status")).unwrap(), Some(RunStatus::Completed));
}

#[test]
fn batch_members_require_a_known_batch() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = open_recorder(dir.path());
    let result = recorder.add_batch_member(&BatchMember {
        batch_id: BatchId::new("missing-batch"),
        token_id: TokenId::new("token-1"),
        ordinal: 0,
    });
    assert!(matches!(result, Err(RecorderError::Io(_) | RecorderError::Constraint(_))));
}
