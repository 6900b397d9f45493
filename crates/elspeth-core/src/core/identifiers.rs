// elspeth-core/src/core/identifiers.rs
// ============================================================================
// Module: Elspeth Identifiers
// Description: Canonical opaque identifiers for runs, graphs, and audit entities.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the string-based identifiers used throughout the
//! engine. Identifiers are opaque and serialize as plain strings; validation
//! of their contents is handled at the boundary that mints them (the
//! recorder), not within these wrapper types.

// ============================================================================
// SECTION: Identifier Macro
// ============================================================================

/// Generates an opaque, serde-transparent identifier newtype.
macro_rules! elspeth_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from any stringlike value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

elspeth_id!(
    /// Identifies one process-level execution of a pipeline.
    RunId
);
elspeth_id!(
    /// Identifies a plugin instance in the execution graph.
    NodeId
);
elspeth_id!(
    /// Identifies a labeled directed connection between two nodes.
    EdgeId
);
elspeth_id!(
    /// Identifies one record emitted by a source.
    RowId
);
elspeth_id!(
    /// Identifies one addressable unit of work flowing through the graph.
    TokenId
);
elspeth_id!(
    /// Identifies a single attempt at a node for a token.
    StateId
);
elspeth_id!(
    /// Identifies an external side-effect attributable to a state or operation.
    CallId
);
elspeth_id!(
    /// Identifies a source load or sink write.
    OperationId
);
elspeth_id!(
    /// Identifies a single routing decision.
    EventId
);
elspeth_id!(
    /// Identifies an aggregation grouping.
    BatchId
);
elspeth_id!(
    /// Identifies a sink output.
    ArtifactId
);
elspeth_id!(
    /// Groups the children produced by a single fork.
    ForkGroupId
);
elspeth_id!(
    /// Groups the parents consumed by a single coalesce.
    JoinGroupId
);
elspeth_id!(
    /// Groups the children produced by a single expand.
    ExpandGroupId
);
elspeth_id!(
    /// Groups routing events emitted simultaneously from one state.
    RoutingGroupId
);
