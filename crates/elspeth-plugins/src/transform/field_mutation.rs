// elspeth-plugins/src/transform/field_mutation.rs
// ============================================================================
// Module: Field Mutation Transform
// Description: Transform that sets a fixed list of fields on every row.
// Purpose: Give the seed scenarios a minimal, deterministic way to grow a
//          row's shape (e.g. adding a `processed` flag and a `score`).
// Dependencies: elspeth-core
// ============================================================================

//! ## Overview
//! `FieldMutationTransform` is configured with a list of `(field, value)`
//! assignments applied to every row it processes. A field already present in
//! the row's contract is overwritten in place; a new field is appended to a
//! fresh, unlocked contract derived from the row's own (existing required
//! fields stay required, the new ones are inferred and therefore optional).

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::core::contract::FieldKind;
use elspeth_core::core::contract::FieldSource;
use elspeth_core::core::contract::PipelineRow;
use elspeth_core::core::contract::SchemaContract;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::PluginInvocationError;
use elspeth_core::interfaces::Transform;
use elspeth_core::interfaces::TransformResult;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised extending a row's contract with new fields.
#[derive(Debug, Error)]
pub enum FieldMutationError {
    /// The row's contract is locked and rejects the new field outright.
    #[error("cannot add field {0} to a locked contract")]
    Locked(String),
}

impl From<FieldMutationError> for PluginInvocationError {
    fn from(err: FieldMutationError) -> Self {
        Self::NonRetryable(err.to_string())
    }
}

// ============================================================================
// SECTION: Field Mutation Transform
// ============================================================================

/// Transform that applies a fixed list of field assignments to every row.
#[derive(Debug, Clone)]
pub struct FieldMutationTransform {
    assignments: Vec<(String, Value)>,
}

impl FieldMutationTransform {
    /// Creates a transform that applies `assignments`, in order, to every row.
    #[must_use]
    pub const fn new(assignments: Vec<(String, Value)>) -> Self {
        Self { assignments }
    }

    fn extend_contract(contract: &SchemaContract) -> Result<SchemaContract, FieldMutationError> {
        if !contract.locked() {
            return Ok(contract.clone());
        }
        let mut rebuilt = SchemaContract::new(contract.mode());
        for field in contract.fields() {
            let source = if field.required { FieldSource::Declared } else { FieldSource::Inferred };
            rebuilt = rebuilt
                .with_field(field.normalized_name.clone(), field.original_name.clone(), field.kind, source)
                .map_err(|_| FieldMutationError::Locked(field.normalized_name.clone()))?;
        }
        Ok(rebuilt)
    }
}

impl Transform for FieldMutationTransform {
    fn process(
        &mut self,
        row: PipelineRow,
        _ctx: &dyn PluginContext,
    ) -> Result<TransformResult, PluginInvocationError> {
        let mut data = row.to_dict().clone();
        let mut contract = Self::extend_contract(row.contract())?;
        for (field, value) in &self.assignments {
            if contract.find_field(field).is_none() {
                contract = contract
                    .with_field(field.clone(), field.clone(), kind_of(value), FieldSource::Inferred)
                    .map_err(|_| FieldMutationError::Locked(field.clone()))?;
            }
            data.insert(field.clone(), value.clone());
        }
        let row = PipelineRow::new(data, contract);
        Ok(TransformResult::success(vec![row]))
    }
}

/// Infers the [`FieldKind`] a literal assignment value would carry.
fn kind_of(value: &Value) -> FieldKind {
    match value {
        Value::Null => FieldKind::NoneType,
        Value::Bool(_) => FieldKind::Bool,
        Value::Number(number) if number.is_i64() || number.is_u64() => FieldKind::Int,
        Value::Number(_) => FieldKind::Float,
        Value::String(_) => FieldKind::Str,
        Value::Array(_) | Value::Object(_) => FieldKind::Any,
    }
}
