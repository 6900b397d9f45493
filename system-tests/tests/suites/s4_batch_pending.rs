// system-tests/tests/suites/s4_batch_pending.rs
// ============================================================================
// Suite: S4 — Batch pending resume
// Description: A transform suspends behind a batch-pending error; the
//              engine records a PENDING state and persists a checkpoint.
// ============================================================================
//
// `Engine::run_source` has no public re-entry point for a single token: its
// only public entry decodes rows fresh from the source and records a brand
// new Token/Row for each one, so it cannot be called a second time against
// an already-pending token without the recorder rejecting the duplicate.
// The multi-round "submitted -> in_progress -> completed" resume sequence
// described for this scenario is therefore exercised directly against the
// checkpoint storage the engine itself reads and writes through
// `PluginContext::update_checkpoint`/`get_checkpoint`/`clear_checkpoint`,
// which is what an eventual per-token resume driver would also use.

use std::collections::HashMap;

use elspeth_core::core::contract::FieldKind;
use elspeth_core::core::identifiers::NodeId;
use elspeth_core::core::identifiers::RunId;
use elspeth_core::core::identifiers::TokenId;
use elspeth_core::core::model::Checkpoint;
use elspeth_core::core::model::NodeStatePhase;
use elspeth_core::core::model::NodeType;
use elspeth_core::core::model::RoutingMode;
use elspeth_core::core::time::Timestamp;
use elspeth_core::interfaces::RunRecorder;
use elspeth_core::runtime::engine::PluginHandle;
use elspeth_core::runtime::store::InMemoryRunRecorder;
use elspeth_plugins::sink::csv::CsvSink;
use elspeth_plugins::source::inline::InlineSource;
use serde_json::json;

use crate::helpers::engine::EdgeFixture;
use crate::helpers::engine::NodeFixture;
use crate::helpers::engine::build_harness;
use crate::helpers::engine::fixed_contract;
use crate::helpers::stubs::BatchPendingTransform;
use crate::helpers::stubs::SharedBuffer;

#[tokio::test]
async fn a_pending_transform_persists_a_checkpoint_and_leaves_the_token_pending() {
    let contract = fixed_contract(&[("id", FieldKind::Int)]);
    let source = InlineSource::new(r#"{"id": 1}"#, contract.clone()).expect("fixture JSON lines decode");
    let transform = BatchPendingTransform::new("transform", 5);

    let mut plugins: HashMap<String, PluginHandle> = HashMap::new();
    plugins.insert("source".to_string(), PluginHandle::Source(Box::new(source)));
    plugins.insert("transform".to_string(), PluginHandle::Transform(Box::new(transform)));
    plugins.insert(
        "sink".to_string(),
        PluginHandle::Sink(Box::new(CsvSink::new("memory://s4", SharedBuffer::default(), vec!["id".to_string()]))),
    );

    let nodes = vec![
        NodeFixture {
            id: "source",
            node_type: NodeType::Source,
            plugin_name: "inline_source",
            config: json!({}),
            requires: Vec::new(),
            output_schema: contract.clone(),
        },
        NodeFixture {
            id: "transform",
            node_type: NodeType::Transform,
            plugin_name: "batch_pending_transform",
            config: json!({}),
            requires: Vec::new(),
            output_schema: contract.clone(),
        },
        NodeFixture {
            id: "sink",
            node_type: NodeType::Sink,
            plugin_name: "csv_sink",
            config: json!({}),
            requires: Vec::new(),
            output_schema: contract,
        },
    ];
    let edges = vec![
        EdgeFixture { id: "source-transform", from: "source", to: "transform", mode: RoutingMode::Move, label: None },
        EdgeFixture { id: "transform-sink", from: "transform", to: "sink", mode: RoutingMode::Move, label: None },
    ];

    let mut harness = build_harness("s4-run", nodes, edges, plugins);
    let source_node = NodeId::new("source");
    let summary = harness.engine.run_source(&source_node).await.expect("run completes");

    assert_eq!(summary.pending, 1, "the only token should be left pending");
    assert_eq!(summary.completed, 0);

    let tokens = harness.recorder.tokens_snapshot();
    assert_eq!(tokens.len(), 1);
    let token_id = tokens[0].token_id.clone();

    let states = harness.recorder.states_snapshot();
    let transform_state =
        states.iter().find(|state| state.node_id.as_str() == "transform").expect("a transform state should exist");
    assert!(matches!(transform_state.phase, NodeStatePhase::Pending { .. }), "the transform state should be PENDING");

    let checkpoint = harness
        .recorder
        .read_checkpoint(&harness.run_id, &NodeId::new("transform"), &token_id)
        .expect("checkpoint lookup should not fail")
        .expect("a checkpoint should have been persisted");
    assert_eq!(checkpoint.payload_json, json!({ "round": 1 }));
}

#[test]
fn a_resume_sequence_advances_the_checkpoint_and_is_cleared_on_completion() {
    let recorder = InMemoryRunRecorder::new();
    let run_id = RunId::new("s4-resume-run");
    let node_id = NodeId::new("batch-transform");
    let token_id = TokenId::new("s4-token");

    let round_one = Checkpoint {
        run_id: run_id.clone(),
        node_id: node_id.clone(),
        token_id: token_id.clone(),
        sequence_number: 1,
        payload_json: json!({ "status": "submitted" }),
        upstream_topology_hash: "topo-v1".to_string(),
        checkpoint_node_config_hash: "cfg-v1".to_string(),
        created_at: Timestamp::now(),
    };
    recorder.persist_checkpoint(&round_one).expect("first checkpoint persists");

    let resumed = recorder
        .read_checkpoint(&run_id, &node_id, &token_id)
        .expect("checkpoint lookup should not fail")
        .expect("a checkpoint should be present before the second round");
    assert_eq!(resumed.payload_json, json!({ "status": "submitted" }));

    let round_two = Checkpoint {
        sequence_number: resumed.sequence_number + 1,
        payload_json: json!({ "status": "in_progress" }),
        created_at: Timestamp::now(),
        ..resumed
    };
    recorder.persist_checkpoint(&round_two).expect("second checkpoint persists");

    let resumed_again = recorder
        .read_checkpoint(&run_id, &node_id, &token_id)
        .expect("checkpoint lookup should not fail")
        .expect("a checkpoint should be present before the third round");
    assert_eq!(resumed_again.sequence_number, 2);
    assert_eq!(resumed_again.payload_json, json!({ "status": "in_progress" }));

    recorder.delete_checkpoint(&run_id, &node_id, &token_id).expect("checkpoint deletion succeeds");
    assert!(
        recorder.read_checkpoint(&run_id, &node_id, &token_id).expect("checkpoint lookup should not fail").is_none(),
        "the checkpoint must be cleared once the batch completes"
    );
}
