// system-tests/tests/suites/s2_retry.rs
// ============================================================================
// Suite: S2 — Retryable transient then success
// Description: A transform fails twice with a retryable error, then
//              succeeds on its third attempt, inside one retry loop.
// ============================================================================
//
// The engine's retry manager retries entirely within a single
// `run_transform` call: one token visiting one node always opens exactly
// one NodeState, regardless of how many attempts the retry loop made
// internally. This suite asserts against that behavior (one COMPLETED
// state, three calls into the transform) rather than one state row per
// attempt.

use std::collections::HashMap;

use elspeth_core::core::contract::FieldKind;
use elspeth_core::core::model::NodeStatePhase;
use elspeth_core::core::model::NodeType;
use elspeth_core::core::model::RoutingMode;
use elspeth_core::core::retry::RuntimeRetryConfig;
use elspeth_core::runtime::engine::EngineConfig;
use elspeth_core::runtime::engine::PluginHandle;
use elspeth_plugins::sink::csv::CsvSink;
use elspeth_plugins::source::inline::InlineSource;
use serde_json::json;

use crate::helpers::engine::EdgeFixture;
use crate::helpers::engine::NodeFixture;
use crate::helpers::engine::build_harness_with_config;
use crate::helpers::engine::fixed_contract;
use crate::helpers::stubs::FlakyTransform;

#[tokio::test]
async fn a_twice_failing_transform_still_completes_once_retries_are_exhausted() {
    let contract = fixed_contract(&[("id", FieldKind::Int)]);
    let source =
        InlineSource::new(r#"{"id": 1}"#, contract.clone()).expect("fixture JSON lines decode");
    let (transform, attempts) = FlakyTransform::new(2);

    let mut plugins: HashMap<String, PluginHandle> = HashMap::new();
    plugins.insert("source".to_string(), PluginHandle::Source(Box::new(source)));
    plugins.insert("transform".to_string(), PluginHandle::Transform(Box::new(transform)));
    plugins.insert(
        "sink".to_string(),
        PluginHandle::Sink(Box::new(CsvSink::new("memory://s2", Vec::<u8>::new(), vec!["id".to_string()]))),
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
            plugin_name: "flaky_transform",
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

    let config = EngineConfig {
        retry: RuntimeRetryConfig {
            max_attempts: 3,
            base_delay: std::time::Duration::from_millis(1),
            ..RuntimeRetryConfig::default()
        },
        ..EngineConfig::default()
    };

    let mut harness = build_harness_with_config("s2-run", nodes, edges, plugins, config);
    let source_node = elspeth_core::core::identifiers::NodeId::new("source");
    let summary = harness.engine.run_source(&source_node).await.expect("retries should be exhausted before max_attempts");

    assert_eq!(summary.completed, 1, "the row should complete after the transform finally succeeds");
    assert_eq!(*attempts.lock().expect("attempts mutex"), 3, "the transform should have been called three times");

    let states = harness.recorder.states_snapshot();
    let transform_states: Vec<_> =
        states.iter().filter(|state| state.node_id.as_str() == "transform").collect();
    assert_eq!(transform_states.len(), 1, "one token-visit opens exactly one NodeState regardless of retry attempts");
    assert!(
        matches!(transform_states[0].phase, NodeStatePhase::Completed { .. }),
        "the single transform state should land COMPLETED once the retry loop succeeds"
    );
}
