// system-tests/tests/helpers/stubs.rs
// ============================================================================
// Module: Plugin Stubs
// Description: Test-only Gate and Transform implementations for scenarios
//              that need a capability no production plugin exercises yet.
// Purpose: Drive the engine's retry, batch-pending and fork-routing paths
//          without adding speculative plugins to the production crate.
// Dependencies: elspeth-core
// ============================================================================

use std::io;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;

use elspeth_core::core::contract::PipelineRow;
use elspeth_core::core::contract::SchemaMode;
use elspeth_core::core::contract::Violation;
use elspeth_core::core::identifiers::BatchId;
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
use elspeth_core::core::ElspethError;
use elspeth_core::core::PayloadStore;
use elspeth_core::interfaces::BatchPendingError;
use elspeth_core::interfaces::Gate;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::PluginInvocationError;
use elspeth_core::interfaces::RowDestination;
use elspeth_core::interfaces::Transform;
use elspeth_core::interfaces::TransformResult;
use serde_json::Value;
use serde_json::json;

/// An owned, clonable byte sink a sink plugin can write into while the test
/// keeps a handle to read the bytes back after the run completes.
///
/// [`CsvSink`](elspeth_plugins::sink::csv::CsvSink) is generic over any
/// [`Write`]; production call sites pass a file handle, tests pass this.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Returns the bytes written so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(|poison| poison.into_inner()).clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(|poison| poison.into_inner()).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A [`Gate`] that always routes to the same label, regardless of the row.
///
/// Used wherever a scenario needs a gate node but cares only about the
/// routing that follows it, not the evaluation itself.
pub struct FixedLabelGate {
    label: String,
}

impl FixedLabelGate {
    /// Builds a gate that always returns `label`.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl Gate for FixedLabelGate {
    fn evaluate(&self, _row: &PipelineRow, _ctx: &dyn PluginContext) -> Result<String, PluginInvocationError> {
        Ok(self.label.clone())
    }
}

/// A [`Transform`] that fails with a retryable error on its first
/// `failures_before_success` invocations, then succeeds.
///
/// Every invocation sees a fresh `attempt` value through the shared
/// counter, letting a test assert exactly how many attempts the engine's
/// retry manager made before a row clears the node.
pub struct FlakyTransform {
    failures_before_success: u32,
    attempts: Arc<Mutex<u32>>,
}

impl FlakyTransform {
    /// Builds a transform that fails `failures_before_success` times
    /// before letting a row through unchanged.
    #[must_use]
    pub fn new(failures_before_success: u32) -> (Self, Arc<Mutex<u32>>) {
        let attempts = Arc::new(Mutex::new(0));
        (Self { failures_before_success, attempts: Arc::clone(&attempts) }, attempts)
    }
}

impl Transform for FlakyTransform {
    fn process(&mut self, row: PipelineRow, _ctx: &dyn PluginContext) -> Result<TransformResult, PluginInvocationError> {
        let mut attempts = self.attempts.lock().unwrap_or_else(|poison| poison.into_inner());
        *attempts += 1;
        if *attempts <= self.failures_before_success {
            return Err(PluginInvocationError::Retryable(format!("transient failure on attempt {attempts}")));
        }
        Ok(TransformResult::success(vec![row]))
    }
}

/// A [`Transform`] that suspends a token behind a batch-pending error for
/// its first `pending_rounds` invocations of a given checkpoint, then
/// completes on the round after.
///
/// Checkpoint state is read from `ctx.get_checkpoint()` rather than kept in
/// the struct, so the stub behaves correctly whether the engine calls it
/// once per round within the same process or across a second, independent
/// invocation of the same token after a resume.
pub struct BatchPendingTransform {
    node_id: NodeId,
    pending_rounds: u64,
}

impl BatchPendingTransform {
    /// Builds a transform that reports pending for `pending_rounds` rounds
    /// before completing.
    #[must_use]
    pub fn new(node_id: &str, pending_rounds: u64) -> Self {
        Self { node_id: NodeId::new(node_id), pending_rounds }
    }
}

impl Transform for BatchPendingTransform {
    fn process(&mut self, row: PipelineRow, ctx: &dyn PluginContext) -> Result<TransformResult, PluginInvocationError> {
        let round = match ctx.get_checkpoint().map_err(|err| PluginInvocationError::NonRetryable(err.to_string()))? {
            Some(Value::Object(map)) => map.get("round").and_then(Value::as_u64).unwrap_or(0),
            _ => 0,
        };
        if round < self.pending_rounds {
            return Err(PluginInvocationError::Pending(BatchPendingError {
                batch_id: BatchId::new(format!("{}-batch", self.node_id.as_str())),
                status: format!("waiting-round-{round}"),
                check_after_seconds: 1,
                checkpoint: json!({ "round": round + 1 }),
                node_id: self.node_id.clone(),
            }));
        }
        Ok(TransformResult::success(vec![row]))
    }
}

/// A [`PluginContext`] with nowhere to record anything, for exercising a
/// sink or transform directly without going through the full engine
/// harness.
///
/// Every reporting method is a no-op; `get_checkpoint`/`update_checkpoint`
/// are backed by a single in-memory slot, good for one test.
pub struct InertCtx {
    run_id: RunId,
    node_id: NodeId,
    checkpoint: Mutex<Option<Value>>,
    payload_store: InMemoryPayloadStore,
}

impl Default for InertCtx {
    fn default() -> Self {
        Self {
            run_id: RunId::new("inert-run"),
            node_id: NodeId::new("inert-node"),
            checkpoint: Mutex::new(None),
            payload_store: InMemoryPayloadStore::new(),
        }
    }
}

impl PluginContext for InertCtx {
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
        Err(ElspethError::PluginInvocation("InertCtx does not record calls".to_string()))
    }

    fn record_validation_error(
        &self,
        _row: &Value,
        _violations: Vec<Violation>,
        _schema_mode: SchemaMode,
        _destination: RowDestination,
    ) -> Result<TokenId, ElspethError> {
        Ok(TokenId::new("inert-discarded"))
    }

    fn record_transform_error(
        &self,
        _token_id: TokenId,
        _transform_id: NodeId,
        _row: &Value,
        _error_details: Value,
        _destination: RowDestination,
    ) -> Result<(), ElspethError> {
        Ok(())
    }

    fn route_to_sink(&self, _sink_name: &str, _row: PipelineRow, _metadata: Option<&Value>) -> Result<(), ElspethError> {
        Ok(())
    }

    fn get_checkpoint(&self) -> Result<Option<Value>, ElspethError> {
        Ok(self.checkpoint.lock().unwrap_or_else(|poison| poison.into_inner()).clone())
    }

    fn update_checkpoint(&self, checkpoint: Value) -> Result<(), ElspethError> {
        *self.checkpoint.lock().unwrap_or_else(|poison| poison.into_inner()) = Some(checkpoint);
        Ok(())
    }

    fn clear_checkpoint(&self) -> Result<(), ElspethError> {
        *self.checkpoint.lock().unwrap_or_else(|poison| poison.into_inner()) = None;
        Ok(())
    }

    fn telemetry_emit(&self, _event: &str, _fields: &Value) {}

    fn payload_store(&self) -> &dyn PayloadStore {
        &self.payload_store
    }
}
