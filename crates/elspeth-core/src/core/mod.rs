// elspeth-core/src/core/mod.rs
// ============================================================================
// Module: Elspeth Core Types
// Description: Canonical data model, contracts, hashing, and payload storage.
// Purpose: Provide stable, serializable types for the engine and the recorder.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Core types define the audit data model, schema contracts, canonical
//! hashing, and payload storage. These types are the canonical source of
//! truth for any derived API surface (engine, recorder, CLI).

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod contract;
pub mod error;
pub mod gate;
pub mod graph;
pub mod hashing;
pub mod identifiers;
pub mod model;
pub mod payload;
pub mod retry;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use contract::ContractCheckpoint;
pub use contract::ContractError;
pub use contract::ContractIntegrityError;
pub use contract::ContractMergeError;
pub use contract::FieldContract;
pub use contract::FieldKind;
pub use contract::FieldSource;
pub use contract::PipelineRow;
pub use contract::SchemaContract;
pub use contract::SchemaMode;
pub use contract::Violation;
pub use error::ElspethError;
pub use gate::GateAtom;
pub use gate::GateCondition;
pub use gate::GateExpressionError;
pub use graph::ExecutionGraph;
pub use graph::GraphError;
pub use graph::NodeInfo;
pub use hashing::CANONICAL_VERSION;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::HashError;
pub use hashing::stable_hash;
pub use identifiers::ArtifactId;
pub use identifiers::BatchId;
pub use identifiers::CallId;
pub use identifiers::EdgeId;
pub use identifiers::EventId;
pub use identifiers::ExpandGroupId;
pub use identifiers::ForkGroupId;
pub use identifiers::JoinGroupId;
pub use identifiers::NodeId;
pub use identifiers::OperationId;
pub use identifiers::RoutingGroupId;
pub use identifiers::RowId;
pub use identifiers::RunId;
pub use identifiers::StateId;
pub use identifiers::TokenId;
pub use model::Artifact;
pub use model::Batch;
pub use model::BatchMember;
pub use model::BatchStatus;
pub use model::BatchTriggerType;
pub use model::Call;
pub use model::CallStatus;
pub use model::CallType;
pub use model::Determinism;
pub use model::Edge;
pub use model::Node;
pub use model::NodeState;
pub use model::NodeStatePhase;
pub use model::NodeType;
pub use model::Operation;
pub use model::OperationStatus;
pub use model::OperationType;
pub use model::RoutingEvent;
pub use model::RoutingMode;
pub use model::Row;
pub use model::Run;
pub use model::RunStatus;
pub use model::Token;
pub use model::TokenOutcome;
pub use model::TokenParent;
pub use payload::InMemoryPayloadStore;
pub use payload::PayloadError;
pub use payload::PayloadStore;
pub use retry::AimdConfig;
pub use retry::AimdPool;
pub use retry::MaxRetriesExceeded;
pub use retry::RetryManager;
pub use retry::RuntimeRetryConfig;
pub use time::Timestamp;
