// elspeth-core/src/core/graph.rs
// ============================================================================
// Module: Elspeth Execution Graph
// Description: Nodes, edges, and per-node schema state for a compiled pipeline.
// Purpose: Validate routing compatibility before a run ever reads a row.
// Dependencies: crate::core::{contract, identifiers, model}
// ============================================================================

//! ## Overview
//! An [`ExecutionGraph`] is the compiled form of a pipeline's declared
//! source, transforms, sinks, aggregations, gates, and coalesce settings.
//! Edges encode routing (`on_success`, `on_error`, fork branches); each node
//! carries a [`NodeInfo`] with the schema contract observed or computed for
//! its outputs. Pass-through nodes (gates, coalesce) never declare their own
//! output contract — they inherit the nearest upstream producer's.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;

use thiserror::Error;

use crate::core::contract::SchemaContract;
use crate::core::identifiers::EdgeId;
use crate::core::identifiers::NodeId;
use crate::core::model::Node;
use crate::core::model::NodeType;
use crate::core::model::RoutingMode;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while constructing or validating an [`ExecutionGraph`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// An edge referenced a node not present in the graph.
    #[error("edge {edge} references unknown node {node}")]
    UnknownNode {
        /// Offending edge.
        edge: String,
        /// Missing node id.
        node: String,
    },
    /// A downstream node required a field its upstream neighbor does not
    /// guarantee.
    #[error("edge {from} -> {to} is incompatible: missing guaranteed field `{field}`")]
    IncompatibleEdge {
        /// Upstream node.
        from: String,
        /// Downstream node.
        to: String,
        /// The field `to` requires but `from` does not guarantee.
        field: String,
    },
    /// A pass-through node has no upstream producer to inherit a contract
    /// from.
    #[error("node {0} is pass-through but has no upstream producer")]
    NoUpstreamProducer(String),
}

// ============================================================================
// SECTION: NodeInfo
// ============================================================================

/// Per-node graph state: the node itself plus the contract observed or
/// computed for its outputs, and the set of fields it requires on input.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    /// The underlying node.
    pub node: Node,
    /// Contract observed or computed for this node's outputs.
    pub output_schema_config: SchemaContract,
    /// Field names this node requires to be present on its input rows.
    pub required_fields: Vec<String>,
}

impl NodeInfo {
    /// Returns the guaranteed (required, declared-or-inferred) field names
    /// of this node's output contract.
    #[must_use]
    pub fn guaranteed_fields(&self) -> Vec<&str> {
        self.output_schema_config
            .fields()
            .iter()
            .filter(|field| field.required)
            .map(|field| field.normalized_name.as_str())
            .collect()
    }

    fn is_pass_through(&self) -> bool {
        matches!(self.node.node_type, NodeType::Gate | NodeType::Coalesce)
    }
}

// ============================================================================
// SECTION: ExecutionGraph
// ============================================================================

/// A compiled, edge-validated pipeline graph.
#[derive(Debug, Clone, Default)]
pub struct ExecutionGraph {
    nodes: HashMap<NodeId, NodeInfo>,
    edges: Vec<GraphEdge>,
    order: Vec<NodeId>,
}

/// A routing edge between two nodes.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    /// Stable id for this edge.
    pub edge_id: EdgeId,
    /// Upstream node.
    pub from: NodeId,
    /// Downstream node.
    pub to: NodeId,
    /// Routing semantics this edge carries.
    pub mode: RoutingMode,
    /// Optional label distinguishing multiple edges from the same node
    /// (`on_success`, `on_error`, a fork branch name).
    pub label: Option<String>,
}

impl ExecutionGraph {
    /// Builds a graph from a flattened set of nodes and edges.
    ///
    /// Mirrors the engine-facing constructor the spec names
    /// `from_plugin_instances`: callers compile their source, transforms,
    /// sinks, aggregations, gates, and coalesce settings down to plain
    /// `(Node, NodeInfo-seed)` pairs and declared edges before calling this.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if any edge references a node id
    /// absent from `nodes`.
    pub fn from_plugin_instances(
        nodes: Vec<(Node, SchemaContract, Vec<String>)>,
        edges: Vec<GraphEdge>,
    ) -> Result<Self, GraphError> {
        let order: Vec<NodeId> = nodes.iter().map(|(node, ..)| node.node_id.clone()).collect();
        let mut map = HashMap::with_capacity(nodes.len());
        for (node, output_schema_config, required_fields) in nodes {
            map.insert(
                node.node_id.clone(),
                NodeInfo {
                    node,
                    output_schema_config,
                    required_fields,
                },
            );
        }
        for edge in &edges {
            if !map.contains_key(&edge.from) {
                return Err(GraphError::UnknownNode {
                    edge: edge.edge_id.to_string(),
                    node: edge.from.to_string(),
                });
            }
            if !map.contains_key(&edge.to) {
                return Err(GraphError::UnknownNode {
                    edge: edge.edge_id.to_string(),
                    node: edge.to.to_string(),
                });
            }
        }
        Ok(Self {
            nodes: map,
            edges,
            order,
        })
    }

    /// Returns the node info for `node_id`, if present.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&NodeInfo> {
        self.nodes.get(node_id)
    }

    /// Returns outgoing edges from `node_id` in declaration order.
    #[must_use]
    pub fn outgoing_edges(&self, node_id: &NodeId) -> Vec<&GraphEdge> {
        self.edges.iter().filter(|edge| &edge.from == node_id).collect()
    }

    /// Returns incoming edges into `node_id` in declaration order.
    #[must_use]
    pub fn incoming_edges(&self, node_id: &NodeId) -> Vec<&GraphEdge> {
        self.edges.iter().filter(|edge| &edge.to == node_id).collect()
    }

    /// Returns the single upstream edge into `node_id`, if any.
    fn upstream_of(&self, node_id: &NodeId) -> Option<&GraphEdge> {
        self.edges.iter().find(|edge| &edge.to == node_id)
    }

    /// Computes the effective guaranteed fields of `node_id`, walking
    /// upstream through pass-through nodes (gates, coalesce) until a real
    /// producer is found.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NoUpstreamProducer`] if a pass-through node has
    /// no upstream edge to inherit from.
    pub fn effective_guaranteed_fields(&self, node_id: &NodeId) -> Result<Vec<String>, GraphError> {
        let Some(info) = self.nodes.get(node_id) else {
            return Err(GraphError::NoUpstreamProducer(node_id.to_string()));
        };
        if !info.is_pass_through() {
            return Ok(info.guaranteed_fields().into_iter().map(str::to_string).collect());
        }
        let Some(upstream_edge) = self.upstream_of(node_id) else {
            return Err(GraphError::NoUpstreamProducer(node_id.to_string()));
        };
        self.effective_guaranteed_fields(&upstream_edge.from)
    }

    /// Validates that every edge's downstream required fields are covered
    /// by the upstream node's effective guaranteed fields.
    ///
    /// Pass-through nodes (gates, coalesce) inherit their guaranteed fields
    /// from the nearest upstream producer rather than declaring their own;
    /// dropping that inheritance is a defect this check would not catch on
    /// its own, so callers constructing [`NodeInfo`] for pass-through nodes
    /// MUST leave `output_schema_config` empty and rely on
    /// [`Self::effective_guaranteed_fields`].
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::IncompatibleEdge`] for the first edge whose
    /// downstream required field is not guaranteed upstream.
    pub fn validate_edge_compatibility(&self) -> Result<(), GraphError> {
        for edge in &self.edges {
            let guaranteed = self.effective_guaranteed_fields(&edge.from)?;
            let Some(downstream) = self.nodes.get(&edge.to) else {
                return Err(GraphError::UnknownNode {
                    edge: edge.edge_id.to_string(),
                    node: edge.to.to_string(),
                });
            };
            for required in &downstream.required_fields {
                if !guaranteed.iter().any(|field| field == required) {
                    return Err(GraphError::IncompatibleEdge {
                        from: edge.from.to_string(),
                        to: edge.to.to_string(),
                        field: required.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Returns node ids in declaration order.
    #[must_use]
    pub fn declaration_order(&self) -> &[NodeId] {
        &self.order
    }
}
