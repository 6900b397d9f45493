// elspeth-cli/src/profile.rs
// ============================================================================
// Module: Run Profile
// Description: The typed, programmatically-built description of a pipeline
//              the CLI drives, optionally loaded from a JSON file.
// Purpose: Compile a profile into an ExecutionGraph plus one plugin instance
//          per node, without any YAML parsing or admin surface.
// Dependencies: elspeth-core, elspeth-plugins, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A [`Profile`] is a plain Rust struct with [`Default`] and builder
//! setters; [`Profile::from_json_file`] is a convenience loader for callers
//! who would rather hand the CLI a file than construct one in code. Either
//! way, [`Profile::compile`] is the only thing that turns it into the
//! [`elspeth_core::core::graph::ExecutionGraph`] and plugin registry the
//! engine needs — the profile format is not itself part of the engine's
//! contract.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::path::PathBuf;

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
use elspeth_core::runtime::engine::PluginHandle;
use elspeth_plugins::FieldMutationTransform;
use elspeth_plugins::FileSource;
use elspeth_plugins::IdentityTransform;
use elspeth_plugins::InlineSource;
use elspeth_plugins::CsvSink;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised loading or compiling a [`Profile`].
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The profile file could not be read.
    #[error("could not read profile file {path}: {detail}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying I/O failure.
        detail: String,
    },
    /// The profile file was not valid JSON for this schema.
    #[error("could not parse profile: {0}")]
    Parse(String),
    /// A node named an unknown plugin, or one whose shape doesn't match its
    /// declared node type.
    #[error("node {node} references unknown plugin {plugin:?} for node type {node_type:?}")]
    UnknownPlugin {
        /// Offending node id.
        node: String,
        /// Plugin name as configured.
        plugin: String,
        /// Declared node type.
        node_type: NodeType,
    },
    /// A sink node's output path could not be created.
    #[error("could not open sink path {path}: {detail}")]
    SinkPath {
        /// Offending path.
        path: String,
        /// Underlying I/O failure.
        detail: String,
    },
    /// A source node's inline rows were not valid JSON-lines.
    #[error("node {node} has malformed inline rows: {detail}")]
    MalformedInlineRows {
        /// Offending node id.
        node: String,
        /// Underlying decode failure.
        detail: String,
    },
    /// Hashing a node or edge's canonical configuration failed.
    #[error(transparent)]
    Hash(#[from] elspeth_core::core::hashing::HashError),
    /// The compiled graph rejected an edge.
    #[error(transparent)]
    Graph(#[from] elspeth_core::core::graph::GraphError),
}

// ============================================================================
// SECTION: Profile
// ============================================================================

/// The full description of one run: where the audit trail lives, and the
/// nodes/edges that make up the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Stable id assigned to this run.
    pub run_id: String,
    /// Path to the `SQLite` audit database this run is recorded into.
    pub store_path: PathBuf,
    /// Id of the node `run_source` starts from.
    pub source_node: String,
    /// Every node in the pipeline, in declaration order.
    pub nodes: Vec<NodeSpec>,
    /// Every edge connecting those nodes.
    pub edges: Vec<EdgeSpec>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            run_id: "run-local".to_string(),
            store_path: PathBuf::from("./elspeth-audit.db"),
            source_node: "source".to_string(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }
}

impl Profile {
    /// Sets the run id, builder-style.
    #[must_use]
    #[allow(dead_code, reason = "builder method only exercised by unit tests")]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Sets the audit store path, builder-style.
    #[must_use]
    #[allow(dead_code, reason = "builder method only exercised by unit tests")]
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    /// Appends a node, builder-style.
    #[must_use]
    #[allow(dead_code, reason = "builder method only exercised by unit tests")]
    pub fn with_node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    /// Appends an edge, builder-style.
    #[must_use]
    #[allow(dead_code, reason = "builder method only exercised by unit tests")]
    pub fn with_edge(mut self, edge: EdgeSpec) -> Self {
        self.edges.push(edge);
        self
    }

    /// Loads a profile from a JSON file, for callers who would rather
    /// configure a run on disk than build a [`Profile`] in code.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::Io`] if the file cannot be read, or
    /// [`ProfileError::Parse`] if it is not valid JSON for this schema.
    pub fn from_json_file(path: &Path) -> Result<Self, ProfileError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| ProfileError::Io { path: path.display().to_string(), detail: err.to_string() })?;
        serde_json::from_str(&text).map_err(|err| ProfileError::Parse(err.to_string()))
    }

    /// Compiles this profile into an [`ExecutionGraph`] and one
    /// [`PluginHandle`] per node.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] if a node names an unsupported plugin, a
    /// sink's output path cannot be opened, or the resulting graph fails
    /// edge-compatibility validation.
    pub fn compile(&self) -> Result<(ExecutionGraph, HashMap<NodeId, PluginHandle>), ProfileError> {
        let run_id = RunId::new(self.run_id.clone());
        let mut graph_nodes = Vec::with_capacity(self.nodes.len());
        let mut plugins = HashMap::with_capacity(self.nodes.len());

        for (index, spec) in self.nodes.iter().enumerate() {
            let node_id = NodeId::new(spec.id.clone());
            let contract = build_contract(&spec.config);
            let config_hash = stable_hash(&spec.config)?;
            let node = Node {
                node_id: node_id.clone(),
                run_id: run_id.clone(),
                plugin_name: spec.plugin.clone(),
                node_type: spec.node_type,
                plugin_version: "0.1.0".to_string(),
                determinism: default_determinism(spec.node_type),
                config_hash,
                config_json: spec.config.clone(),
                schema_hash: None,
                schema_mode: Some(SchemaMode::Flexible),
                schema_fields: Vec::new(),
                sequence_in_pipeline: u32::try_from(index).unwrap_or(u32::MAX),
            };
            let required_fields = spec.requires.clone();
            let handle = build_plugin(spec, contract.clone())?;
            plugins.insert(node_id.clone(), handle);
            graph_nodes.push((node, contract, required_fields));
        }

        let edges = self
            .edges
            .iter()
            .map(|spec| GraphEdge {
                edge_id: EdgeId::new(spec.id.clone()),
                from: NodeId::new(spec.from.clone()),
                to: NodeId::new(spec.to.clone()),
                mode: spec.mode,
                label: spec.label.clone(),
            })
            .collect();

        let graph = ExecutionGraph::from_plugin_instances(graph_nodes, edges)?;
        graph.validate_edge_compatibility()?;
        Ok((graph, plugins))
    }
}

/// Default determinism class assumed for a node absent an explicit override
/// in its config (`config["determinism"]`).
const fn default_determinism(node_type: NodeType) -> Determinism {
    match node_type {
        NodeType::Source => Determinism::IoRead,
        NodeType::Sink => Determinism::IoWrite,
        NodeType::Transform | NodeType::Gate | NodeType::Aggregation | NodeType::Coalesce => {
            Determinism::Deterministic
        }
    }
}

/// Builds a flexible schema contract declaring `config["columns"]` (if
/// present) as required string fields. Good enough for the reference plugin
/// set; a node that needs a richer contract configures its own plugin.
fn build_contract(config: &Value) -> SchemaContract {
    let mut contract = SchemaContract::new(SchemaMode::Flexible);
    let Some(columns) = config.get("columns").and_then(Value::as_array) else {
        return contract;
    };
    for column in columns {
        let Some(name) = column.as_str() else { continue };
        contract = contract
            .with_field(name, name, FieldKind::Any, FieldSource::Declared)
            .unwrap_or(contract.clone());
    }
    contract
}

/// Instantiates the plugin named by `spec.plugin` against `spec.config`.
fn build_plugin(spec: &NodeSpec, contract: SchemaContract) -> Result<PluginHandle, ProfileError> {
    match (spec.node_type, spec.plugin.as_str()) {
        (NodeType::Source, "inline_source") => {
            let jsonl = spec.config.get("jsonl").and_then(Value::as_str).unwrap_or_default();
            let source = InlineSource::new(jsonl, contract).map_err(|err| ProfileError::MalformedInlineRows {
                node: spec.id.clone(),
                detail: err.to_string(),
            })?;
            Ok(PluginHandle::Source(Box::new(source)))
        }
        (NodeType::Source, "file_source") => {
            let path = spec.config.get("path").and_then(Value::as_str).unwrap_or_default();
            Ok(PluginHandle::Source(Box::new(FileSource::new(path, contract))))
        }
        (NodeType::Transform, "identity_transform") => Ok(PluginHandle::Transform(Box::new(IdentityTransform))),
        (NodeType::Transform, "field_mutation_transform") => {
            let assignments = spec
                .config
                .get("assignments")
                .and_then(Value::as_array)
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(Value::as_array)
                        .filter_map(|pair| {
                            let field = pair.first()?.as_str()?.to_string();
                            let value = pair.get(1)?.clone();
                            Some((field, value))
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(PluginHandle::Transform(Box::new(FieldMutationTransform::new(assignments))))
        }
        (NodeType::Sink, "csv_sink") => {
            let path = spec.config.get("path").and_then(Value::as_str).unwrap_or("output.csv");
            let columns = spec
                .config
                .get("columns")
                .and_then(Value::as_array)
                .map(|entries| entries.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            let file = File::create(path)
                .map_err(|err| ProfileError::SinkPath { path: path.to_string(), detail: err.to_string() })?;
            Ok(PluginHandle::Sink(Box::new(CsvSink::new(path, file, columns))))
        }
        _ => Err(ProfileError::UnknownPlugin {
            node: spec.id.clone(),
            plugin: spec.plugin.clone(),
            node_type: spec.node_type,
        }),
    }
}

// ============================================================================
// SECTION: Node / Edge Specs
// ============================================================================

/// One node in a [`Profile`]: which plugin backs it, and its configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Stable id for this node within the profile.
    pub id: String,
    /// Declared node type, used to pick the engine's plugin capability.
    pub node_type: NodeType,
    /// Which concrete plugin in [`elspeth_plugins`] backs this node.
    pub plugin: String,
    /// Field names this node requires present on its input rows.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Plugin-specific configuration.
    #[serde(default)]
    pub config: Value,
}

/// One routing edge in a [`Profile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// Stable id for this edge.
    pub id: String,
    /// Upstream node id.
    pub from: String,
    /// Downstream node id.
    pub to: String,
    /// Routing semantics.
    pub mode: RoutingMode,
    /// Optional label distinguishing multiple edges from the same node.
    #[serde(default)]
    pub label: Option<String>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test assertions")]

    use super::*;

    fn demo_profile() -> Profile {
        Profile::default()
            .with_run_id("run-demo")
            .with_node(NodeSpec {
                id: "source".to_string(),
                node_type: NodeType::Source,
                plugin: "inline_source".to_string(),
                requires: Vec::new(),
                config: serde_json::json!({ "jsonl": "{\"a\":1}\n{\"a\":2}\n", "columns": ["a"] }),
            })
            .with_node(NodeSpec {
                id: "mutate".to_string(),
                node_type: NodeType::Transform,
                plugin: "field_mutation_transform".to_string(),
                requires: vec!["a".to_string()],
                config: serde_json::json!({ "assignments": [["seen", true]] }),
            })
            .with_edge(EdgeSpec {
                id: "e1".to_string(),
                from: "source".to_string(),
                to: "mutate".to_string(),
                mode: RoutingMode::Move,
                label: None,
            })
    }

    #[test]
    fn compiles_a_minimal_profile() {
        let profile = demo_profile();
        let (graph, plugins) = profile.compile().unwrap();
        assert_eq!(graph.declaration_order().len(), 2);
        assert_eq!(plugins.len(), 2);
    }

    #[test]
    fn unknown_plugin_is_rejected() {
        let mut profile = demo_profile();
        profile.nodes[0].plugin = "not_a_real_plugin".to_string();
        let result = profile.compile();
        assert!(matches!(result, Err(ProfileError::UnknownPlugin { .. })));
    }

    #[test]
    fn round_trips_through_json() {
        let profile = demo_profile();
        let text = serde_json::to_string(&profile).unwrap();
        let reloaded: Profile = serde_json::from_str(&text).unwrap();
        assert_eq!(reloaded.run_id, profile.run_id);
        assert_eq!(reloaded.nodes.len(), profile.nodes.len());
    }
}
