// system-tests/tests/helpers/engine.rs
// ============================================================================
// Module: Engine Harness
// Description: Builds a minimal ExecutionGraph and Engine pair for a test
//              scenario without going through a Profile or the CLI.
// Purpose: Let each scenario describe only its nodes and edges, not the
//          run/recorder/payload-store plumbing every scenario shares.
// Dependencies: elspeth-core
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use elspeth_core::core::contract::FieldKind;
use elspeth_core::core::contract::FieldSource;
use elspeth_core::core::contract::SchemaContract;
use elspeth_core::core::contract::SchemaMode;
use elspeth_core::core::graph::ExecutionGraph;
use elspeth_core::core::graph::GraphEdge;
use elspeth_core::core::hashing::stable_hash;
use elspeth_core::core::identifiers::EdgeId;
use elspeth_core::core::identifiers::NodeId;
use elspeth_core::core::identifiers::RunId;
use elspeth_core::core::model::Determinism;
use elspeth_core::core::model::Node;
use elspeth_core::core::model::NodeType;
use elspeth_core::core::model::RoutingMode;
use elspeth_core::core::model::Run;
use elspeth_core::core::model::RunStatus;
use elspeth_core::core::payload::InMemoryPayloadStore;
use elspeth_core::core::time::Timestamp;
use elspeth_core::runtime::engine::Engine;
use elspeth_core::runtime::engine::EngineConfig;
use elspeth_core::runtime::engine::PluginHandle;
use elspeth_core::runtime::store::InMemoryRunRecorder;
use serde_json::Value;

/// Describes one node before it is compiled into the graph: its identity,
/// the contract it guarantees on output, and the fields it requires on
/// input.
pub struct NodeFixture {
    pub id: &'static str,
    pub node_type: NodeType,
    pub plugin_name: &'static str,
    pub config: Value,
    pub requires: Vec<String>,
    pub output_schema: SchemaContract,
}

/// One routing edge between two [`NodeFixture`]s.
pub struct EdgeFixture {
    pub id: &'static str,
    pub from: &'static str,
    pub to: &'static str,
    pub mode: RoutingMode,
    pub label: Option<&'static str>,
}

/// An [`Engine`] wired to an in-memory recorder, plus the recorder kept
/// around so a test can inspect what was written after the run finishes.
pub struct Harness {
    pub run_id: RunId,
    pub engine: Engine,
    pub recorder: InMemoryRunRecorder,
}

/// Builds a [`Harness`] from a flat list of node and edge fixtures plus one
/// plugin instance per node, opening the run record before returning.
///
/// Node sequence numbers follow fixture declaration order.
#[must_use]
pub fn build_harness(
    run_id: &str,
    nodes: Vec<NodeFixture>,
    edges: Vec<EdgeFixture>,
    plugins: HashMap<String, PluginHandle>,
) -> Harness {
    build_harness_with_config(run_id, nodes, edges, plugins, EngineConfig::default())
}

/// Same as [`build_harness`], with an explicit [`EngineConfig`] instead of
/// the default (used by scenarios that exercise retry or batch sizing).
#[must_use]
pub fn build_harness_with_config(
    run_id: &str,
    nodes: Vec<NodeFixture>,
    edges: Vec<EdgeFixture>,
    mut plugins: HashMap<String, PluginHandle>,
    config: EngineConfig,
) -> Harness {
    let run_id = RunId::new(run_id);
    let recorder = InMemoryRunRecorder::new();
    let payload_store = Arc::new(InMemoryPayloadStore::new());

    let mut graph_nodes = Vec::with_capacity(nodes.len());
    let mut plugin_map = HashMap::with_capacity(nodes.len());
    for (index, fixture) in nodes.into_iter().enumerate() {
        let node_id = NodeId::new(fixture.id);
        let config_hash = stable_hash(&fixture.config).unwrap_or_default();
        let node = Node {
            node_id: node_id.clone(),
            run_id: run_id.clone(),
            plugin_name: fixture.plugin_name.to_string(),
            node_type: fixture.node_type,
            plugin_version: "0.1.0".to_string(),
            determinism: default_determinism(fixture.node_type),
            config_hash,
            config_json: fixture.config,
            schema_hash: None,
            schema_mode: Some(fixture.output_schema.mode()),
            schema_fields: Vec::new(),
            sequence_in_pipeline: u32::try_from(index).unwrap_or(u32::MAX),
        };
        // Coalesce nodes are handled entirely by the engine and never look
        // themselves up in the plugin map.
        if fixture.node_type != NodeType::Coalesce {
            let handle = plugins
                .remove(fixture.id)
                .unwrap_or_else(|| panic!("no plugin registered for node {}", fixture.id));
            plugin_map.insert(node_id.clone(), handle);
        }
        graph_nodes.push((node, fixture.output_schema, fixture.requires));
    }

    let graph_edges: Vec<GraphEdge> = edges
        .into_iter()
        .map(|fixture| GraphEdge {
            edge_id: EdgeId::new(fixture.id),
            from: NodeId::new(fixture.from),
            to: NodeId::new(fixture.to),
            mode: fixture.mode,
            label: fixture.label.map(str::to_string),
        })
        .collect();

    let graph = ExecutionGraph::from_plugin_instances(graph_nodes, graph_edges)
        .unwrap_or_else(|err| panic!("fixture graph failed to compile: {err}"));

    let recorder_handle: Arc<dyn elspeth_core::interfaces::RunRecorder + Send + Sync> =
        Arc::new(recorder.clone());
    let engine = Engine::new(run_id.clone(), graph, plugin_map, recorder_handle, payload_store, config);

    let run = Run {
        run_id: run_id.clone(),
        status: RunStatus::Running,
        started_at: Timestamp::now(),
        completed_at: None,
        config_hash: String::new(),
        settings_json: Value::Null,
        canonical_version: "elspeth-canon-v1".to_string(),
    };
    engine.open(&run).unwrap_or_else(|err| panic!("opening the fixture run failed: {err}"));

    Harness { run_id, engine, recorder }
}

/// Builds a locked, fixed-mode contract declaring exactly `fields`, in
/// declaration order.
#[must_use]
pub fn fixed_contract(fields: &[(&str, FieldKind)]) -> SchemaContract {
    let mut contract = SchemaContract::new(SchemaMode::Fixed);
    for (name, kind) in fields {
        contract = contract
            .with_field(*name, *name, *kind, FieldSource::Declared)
            .unwrap_or_else(|err| panic!("fixture contract field {name} rejected: {err}"));
    }
    contract.with_locked()
}

/// Default determinism class assumed for a fixture's node type. Mirrors the
/// CLI profile compiler's default.
const fn default_determinism(node_type: NodeType) -> Determinism {
    match node_type {
        NodeType::Source => Determinism::IoRead,
        NodeType::Sink => Determinism::IoWrite,
        NodeType::Transform | NodeType::Gate | NodeType::Aggregation | NodeType::Coalesce => {
            Determinism::Deterministic
        }
    }
}
