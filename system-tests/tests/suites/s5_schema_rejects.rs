// system-tests/tests/suites/s5_schema_rejects.rs
// ============================================================================
// Suite: S5 — Schema FIXED rejects extras
// Description: A row with a field the FIXED contract doesn't declare never
//              becomes a token; the run still completes, with the rejection
//              visible only in the summary's validation-error tally.
// ============================================================================

use std::collections::HashMap;

use elspeth_core::core::contract::FieldKind;
use elspeth_core::core::model::NodeType;
use elspeth_core::core::model::RoutingMode;
use elspeth_core::runtime::engine::PluginHandle;
use elspeth_plugins::sink::csv::CsvSink;
use elspeth_plugins::source::inline::InlineSource;
use serde_json::json;

use crate::helpers::engine::EdgeFixture;
use crate::helpers::engine::NodeFixture;
use crate::helpers::engine::build_harness;
use crate::helpers::engine::fixed_contract;
use crate::helpers::stubs::SharedBuffer;

#[tokio::test]
async fn an_extra_field_under_a_fixed_contract_is_discarded_before_becoming_a_token() {
    let contract = fixed_contract(&[("id", FieldKind::Int)]);
    let source = InlineSource::new(r#"{"id": 1, "extra": "x"}"#, contract.clone()).expect("fixture JSON lines decode");

    let mut plugins: HashMap<String, PluginHandle> = HashMap::new();
    plugins.insert("source".to_string(), PluginHandle::Source(Box::new(source)));
    plugins.insert(
        "sink".to_string(),
        PluginHandle::Sink(Box::new(CsvSink::new("memory://s5", SharedBuffer::default(), vec!["id".to_string()]))),
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
            id: "sink",
            node_type: NodeType::Sink,
            plugin_name: "csv_sink",
            config: json!({}),
            requires: Vec::new(),
            output_schema: contract,
        },
    ];
    let edges =
        vec![EdgeFixture { id: "source-sink", from: "source", to: "sink", mode: RoutingMode::Move, label: None }];

    let mut harness = build_harness("s5-run", nodes, edges, plugins);
    let source_node = elspeth_core::core::identifiers::NodeId::new("source");
    let summary = harness.engine.run_source(&source_node).await.expect("run completes despite the rejected row");

    assert!(summary.validation_errors > 0, "the rejected row should be tallied as a validation error");
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.discarded, 0, "rejection at ingress never becomes a token, so it is not a Discarded outcome");

    assert!(harness.recorder.rows_snapshot().is_empty(), "a row that never validated should never be recorded");
    assert!(harness.recorder.tokens_snapshot().is_empty(), "no token should exist for the rejected row");
    assert!(harness.recorder.artifacts_snapshot().is_empty(), "the sink should never have been written to");

    let run_status = harness
        .recorder
        .run_status_snapshot(&harness.run_id)
        .expect("the run should have a recorded status");
    assert_eq!(run_status, elspeth_core::core::model::RunStatus::Completed);
}
