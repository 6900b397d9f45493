// system-tests/tests/suites/s3_fork_coalesce.rs
// ============================================================================
// Suite: S3 — Fork and coalesce
// Description: A gate forks one row into branches "a" and "b", each branch
//              adds a distinct field, and a coalesce node merges them back
//              into one row carrying both fields.
// ============================================================================

use std::collections::HashMap;

use elspeth_core::core::contract::FieldKind;
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
use crate::helpers::stubs::FixedLabelGate;
use crate::helpers::stubs::SharedBuffer;

#[tokio::test]
async fn branches_merge_back_into_a_row_carrying_both_added_fields() {
    let source_contract = fixed_contract(&[("x", FieldKind::Int)]);
    let source = InlineSource::new(r#"{"x": 1}"#, source_contract.clone()).expect("fixture JSON lines decode");
    let gate = FixedLabelGate::new("fork");
    let branch_a = FieldMutationTransform::new(vec![("a_field".to_string(), json!("from-a"))]);
    let branch_b = FieldMutationTransform::new(vec![("b_field".to_string(), json!("from-b"))]);

    let buffer = SharedBuffer::default();

    let mut plugins: HashMap<String, PluginHandle> = HashMap::new();
    plugins.insert("source".to_string(), PluginHandle::Source(Box::new(source)));
    plugins.insert("gate".to_string(), PluginHandle::Gate(Box::new(gate)));
    plugins.insert("branch_a".to_string(), PluginHandle::Transform(Box::new(branch_a)));
    plugins.insert("branch_b".to_string(), PluginHandle::Transform(Box::new(branch_b)));
    plugins.insert(
        "sink".to_string(),
        PluginHandle::Sink(Box::new(CsvSink::new(
            "memory://s3",
            buffer.clone(),
            vec!["x".to_string(), "a_field".to_string(), "b_field".to_string()],
        ))),
    );

    let merged_contract =
        fixed_contract(&[("x", FieldKind::Int), ("a_field", FieldKind::Str), ("b_field", FieldKind::Str)]);

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
            id: "gate",
            node_type: NodeType::Gate,
            plugin_name: "fixed_label_gate",
            config: json!({ "fork_branches": ["a", "b"] }),
            requires: Vec::new(),
            output_schema: merged_contract.clone(),
        },
        NodeFixture {
            id: "branch_a",
            node_type: NodeType::Transform,
            plugin_name: "field_mutation",
            config: json!({}),
            requires: Vec::new(),
            output_schema: merged_contract.clone(),
        },
        NodeFixture {
            id: "branch_b",
            node_type: NodeType::Transform,
            plugin_name: "field_mutation",
            config: json!({}),
            requires: Vec::new(),
            output_schema: merged_contract.clone(),
        },
        NodeFixture {
            id: "join",
            node_type: NodeType::Coalesce,
            plugin_name: "coalesce",
            config: json!({ "branches": ["a", "b"] }),
            requires: Vec::new(),
            output_schema: merged_contract.clone(),
        },
        NodeFixture {
            id: "sink",
            node_type: NodeType::Sink,
            plugin_name: "csv_sink",
            config: json!({}),
            requires: Vec::new(),
            output_schema: merged_contract,
        },
    ];
    let edges = vec![
        EdgeFixture { id: "source-gate", from: "source", to: "gate", mode: RoutingMode::Move, label: None },
        EdgeFixture { id: "gate-a", from: "gate", to: "branch_a", mode: RoutingMode::Move, label: Some("a") },
        EdgeFixture { id: "gate-b", from: "gate", to: "branch_b", mode: RoutingMode::Move, label: Some("b") },
        EdgeFixture { id: "a-join", from: "branch_a", to: "join", mode: RoutingMode::Move, label: None },
        EdgeFixture { id: "b-join", from: "branch_b", to: "join", mode: RoutingMode::Move, label: None },
        EdgeFixture { id: "join-sink", from: "join", to: "sink", mode: RoutingMode::Move, label: None },
    ];

    let mut harness = build_harness("s3-run", nodes, edges, plugins);
    let source_node = elspeth_core::core::identifiers::NodeId::new("source");
    let summary = harness.engine.run_source(&source_node).await.expect("run completes");

    assert_eq!(summary.completed, 1, "the merged row should reach the sink exactly once");

    let tokens = harness.recorder.tokens_snapshot();
    let parent = tokens
        .iter()
        .find(|token| token.fork_group_id.is_none() && token.join_group_id.is_none() && token.branch_name.is_none())
        .expect("the original token should still be present");
    let parent_outcome = harness.recorder.token_outcome(&parent.token_id).expect("parent outcome recorded");
    let expected_branches = match parent_outcome {
        TokenOutcome::Forked { expected_branches_json } => expected_branches_json,
        TokenOutcome::CompletedAtSink
        | TokenOutcome::Expanded { .. }
        | TokenOutcome::Joined
        | TokenOutcome::ConsumedInBatch
        | TokenOutcome::Failed
        | TokenOutcome::Discarded
        | TokenOutcome::Quarantined => panic!("expected a Forked outcome on the parent token"),
    };
    assert_eq!(expected_branches, json!(["a", "b"]));

    let children: Vec<_> = tokens.iter().filter(|token| token.branch_name.is_some()).collect();
    assert_eq!(children.len(), 2, "exactly one child token per branch");
    let branch_names: Vec<_> = children.iter().filter_map(|token| token.branch_name.as_deref()).collect();
    assert!(branch_names.contains(&"a") && branch_names.contains(&"b"));

    let joined = tokens.iter().find(|token| token.join_group_id.is_some()).expect("a coalesced token should exist");
    for child in &children {
        let child_outcome = harness.recorder.token_outcome(&child.token_id).expect("child outcome recorded");
        assert_eq!(child_outcome, TokenOutcome::Joined, "every branch's token should be consumed into the coalesce");
    }
    assert!(joined.join_group_id.is_some());

    let csv = String::from_utf8(buffer.snapshot()).expect("CSV output is valid UTF-8");
    let data_line = csv.lines().nth(1).expect("one data row should follow the header");
    assert_eq!(data_line, "1,from-a,from-b", "the merged row should carry both branch fields alongside the original");
}
