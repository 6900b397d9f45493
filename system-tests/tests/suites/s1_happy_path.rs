// system-tests/tests/suites/s1_happy_path.rs
// ============================================================================
// Suite: S1 — Single row happy path
// Description: One row through source, transform, sink with no retries,
//              forks, or rejections.
// ============================================================================

use std::collections::HashMap;

use elspeth_core::core::contract::FieldKind;
use elspeth_core::core::hashing::DEFAULT_HASH_ALGORITHM;
use elspeth_core::core::hashing::hash_bytes;
use elspeth_core::core::model::NodeType;
use elspeth_core::core::model::RoutingMode;
use elspeth_core::core::model::TokenOutcome;
use elspeth_core::runtime::engine::PluginHandle;
use elspeth_plugins::sink::csv::CsvSink;
use elspeth_plugins::source::inline::InlineSource;
use elspeth_plugins::transform::field_mutation::FieldMutationTransform;
use serde_json::json;

use crate::helpers::engine::EdgeFixture;
use crate::helpers::engine::NodeFixture;
use crate::helpers::engine::build_harness;
use crate::helpers::engine::fixed_contract;
use crate::helpers::stubs::SharedBuffer;

#[tokio::test]
async fn one_row_reaches_the_sink_with_a_matching_content_hash() {
    let source_contract = fixed_contract(&[("id", FieldKind::Int), ("name", FieldKind::Str)]);
    let source = InlineSource::new(r#"{"id": 1, "name": "Alice"}"#, source_contract.clone())
        .expect("fixture JSON lines decode");

    let transform = FieldMutationTransform::new(vec![("processed".to_string(), json!(true)), ("score".to_string(), json!(0.5))]);

    let buffer = SharedBuffer::default();

    let mut plugins: HashMap<String, PluginHandle> = HashMap::new();
    plugins.insert("source".to_string(), PluginHandle::Source(Box::new(source)));
    plugins.insert("transform".to_string(), PluginHandle::Transform(Box::new(transform)));
    plugins.insert(
        "sink".to_string(),
        PluginHandle::Sink(Box::new(CsvSink::new(
            "memory://s1",
            buffer.clone(),
            vec!["id".to_string(), "name".to_string(), "processed".to_string(), "score".to_string()],
        ))),
    );

    let nodes = vec![
        NodeFixture {
            id: "source",
            node_type: NodeType::Source,
            plugin_name: "inline_source",
            config: json!({}),
            requires: Vec::new(),
            output_schema: source_contract,
        },
        NodeFixture {
            id: "transform",
            node_type: NodeType::Transform,
            plugin_name: "field_mutation",
            config: json!({}),
            requires: Vec::new(),
            output_schema: fixed_contract(&[
                ("id", FieldKind::Int),
                ("name", FieldKind::Str),
                ("processed", FieldKind::Bool),
                ("score", FieldKind::Float),
            ]),
        },
        NodeFixture {
            id: "sink",
            node_type: NodeType::Sink,
            plugin_name: "csv_sink",
            config: json!({}),
            requires: Vec::new(),
            output_schema: fixed_contract(&[
                ("id", FieldKind::Int),
                ("name", FieldKind::Str),
                ("processed", FieldKind::Bool),
                ("score", FieldKind::Float),
            ]),
        },
    ];
    let edges = vec![
        EdgeFixture { id: "source-transform", from: "source", to: "transform", mode: RoutingMode::Move, label: None },
        EdgeFixture { id: "transform-sink", from: "transform", to: "sink", mode: RoutingMode::Move, label: None },
    ];

    let mut harness = build_harness("s1-run", nodes, edges, plugins);
    let source_node = elspeth_core::core::identifiers::NodeId::new("source");
    let summary = harness.engine.run_source(&source_node).await.expect("run completes");

    assert_eq!(summary.completed, 1, "exactly one token should reach the sink");

    let rows = harness.recorder.rows_snapshot();
    assert_eq!(rows.len(), 1, "exactly one Row should be recorded");

    let tokens = harness.recorder.tokens_snapshot();
    assert_eq!(tokens.len(), 1, "exactly one Token should be recorded");

    let states = harness.recorder.states_snapshot();
    let completed_nodes: Vec<_> = states
        .iter()
        .filter(|state| matches!(state.phase, elspeth_core::core::model::NodeStatePhase::Completed { .. }))
        .map(|state| state.node_id.as_str().to_string())
        .collect();
    for expected in ["source", "transform", "sink"] {
        assert!(completed_nodes.iter().any(|node| node == expected), "{expected} should have a COMPLETED state");
    }

    let artifacts = harness.recorder.artifacts_snapshot();
    assert_eq!(artifacts.len(), 1, "exactly one Artifact should be recorded");
    let expected_hash = hash_bytes(DEFAULT_HASH_ALGORITHM, &buffer.snapshot());
    assert_eq!(artifacts[0].content_hash, expected_hash.value, "content_hash must equal SHA-256 of the CSV bytes");

    let outcome = harness
        .recorder
        .token_outcome(&tokens[0].token_id)
        .expect("the token should have a recorded outcome");
    assert!(matches!(outcome, TokenOutcome::CompletedAtSink));

    assert_eq!(harness.run_id.as_str(), "s1-run");
}
