// elspeth-plugins/src/test_support.rs
// ============================================================================
// Module: Plugin Test Support
// Description: A minimal in-memory PluginContext for exercising plugins in
//              isolation from the engine.
// Purpose: Give every plugin's unit tests the same small test double instead
//          of each reimplementing one.
// Dependencies: elspeth-core
// ============================================================================

//! ## Overview
//! `RecordingCtx` is not a stand-in for the engine's real context: it records
//! what was reported (validation errors, transform errors) so a test can
//! assert on it, and treats checkpoints as an in-memory slot good for one
//! test run.

#![allow(clippy::unwrap_used, reason = "test-only double")]

use std::cell::RefCell;

use elspeth_core::core::ElspethError;
use elspeth_core::core::contract::PipelineRow;
use elspeth_core::core::contract::SchemaMode;
use elspeth_core::core::contract::Violation;
use elspeth_core::core::identifiers::NodeId;
use elspeth_core::core::identifiers::OperationId;
use elspeth_core::core::identifiers::RunId;
use elspeth_core::core::identifiers::StateId;
use elspeth_core::core::identifiers::TokenId;
use elspeth_core::core::model::Call;
use elspeth_core::core::model::CallStatus;
use elspeth_core::core::model::CallType;
use elspeth_core::core::model::Token;
use elspeth_core::core::payload::InMemoryPayloadStore;
use elspeth_core::core::PayloadStore;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::RowDestination;
use serde_json::Value;

/// A [`PluginContext`] double that records what a plugin reported.
pub(crate) struct RecordingCtx {
    run_id: RunId,
    node_id: NodeId,
    pub(crate) discarded: RefCell<Vec<Vec<Violation>>>,
    pub(crate) transform_errors: RefCell<Vec<Value>>,
    checkpoint: RefCell<Option<Value>>,
    payload_store: InMemoryPayloadStore,
}

impl RecordingCtx {
    pub(crate) fn new() -> Self {
        Self {
            run_id: RunId::new("test-run"),
            node_id: NodeId::new("test-node"),
            discarded: RefCell::new(Vec::new()),
            transform_errors: RefCell::new(Vec::new()),
            checkpoint: RefCell::new(None),
            payload_store: InMemoryPayloadStore::default(),
        }
    }
}

/// Builds a fresh [`RecordingCtx`] for a single test.
pub(crate) fn noop_ctx() -> RecordingCtx {
    RecordingCtx::new()
}

impl PluginContext for RecordingCtx {
    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn state_id(&self) -> Option<&StateId> {
        None
    }

    fn operation_id(&self) -> Option<&OperationId> {
        None
    }

    fn token(&self) -> Option<&Token> {
        None
    }

    fn get(&self, _config_key: &str) -> Option<&Value> {
        None
    }

    fn record_call(
        &self,
        _call_type: CallType,
        _status: CallStatus,
        _request_data: &Value,
        _response_data: Option<&Value>,
        _error: Option<&Value>,
        _latency_ms: Option<u64>,
        _provider: Option<&str>,
    ) -> Result<Call, ElspethError> {
        unreachable!("not exercised by plugin unit tests")
    }

    fn record_validation_error(
        &self,
        _row: &Value,
        violations: Vec<Violation>,
        _schema_mode: SchemaMode,
        _destination: RowDestination,
    ) -> Result<TokenId, ElspethError> {
        self.discarded.borrow_mut().push(violations);
        Ok(TokenId::new("discarded"))
    }

    fn record_transform_error(
        &self,
        _token_id: TokenId,
        _transform_id: NodeId,
        _row: &Value,
        error_details: Value,
        _destination: RowDestination,
    ) -> Result<(), ElspethError> {
        self.transform_errors.borrow_mut().push(error_details);
        Ok(())
    }

    fn route_to_sink(
        &self,
        _sink_name: &str,
        _row: PipelineRow,
        _metadata: Option<&Value>,
    ) -> Result<(), ElspethError> {
        unreachable!("not exercised by plugin unit tests")
    }

    fn get_checkpoint(&self) -> Result<Option<Value>, ElspethError> {
        Ok(self.checkpoint.borrow().clone())
    }

    fn update_checkpoint(&self, checkpoint: Value) -> Result<(), ElspethError> {
        *self.checkpoint.borrow_mut() = Some(checkpoint);
        Ok(())
    }

    fn clear_checkpoint(&self) -> Result<(), ElspethError> {
        *self.checkpoint.borrow_mut() = None;
        Ok(())
    }

    fn telemetry_emit(&self, _event: &str, _fields: &Value) {}

    fn payload_store(&self) -> &dyn PayloadStore {
        &self.payload_store
    }
}
