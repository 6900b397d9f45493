// elspeth-plugins/src/transform/identity.rs
// ============================================================================
// Module: Identity Transform
// Description: Transform that returns its input row unchanged.
// Purpose: Exercise a pipeline's routing and recording without any row-shape
//          change in the way.
// Dependencies: elspeth-core
// ============================================================================

use elspeth_core::core::contract::PipelineRow;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::PluginInvocationError;
use elspeth_core::interfaces::Transform;
use elspeth_core::interfaces::TransformResult;

/// Transform that passes every row through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransform;

impl IdentityTransform {
    /// Creates a new identity transform.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Transform for IdentityTransform {
    fn process(
        &mut self,
        row: PipelineRow,
        _ctx: &dyn PluginContext,
    ) -> Result<TransformResult, PluginInvocationError> {
        Ok(TransformResult::success(vec![row]))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test assertions")]

    use std::collections::BTreeMap;

    use elspeth_core::core::contract::SchemaContract;
    use elspeth_core::core::contract::SchemaMode;
    use elspeth_core::interfaces::TransformResult;
    use serde_json::Value;

    use super::*;
    use crate::test_support::noop_ctx;

    #[test]
    fn returns_the_row_unchanged() {
        let mut data = BTreeMap::new();
        data.insert("x".to_string(), Value::from(1));
        let row = PipelineRow::new(data, SchemaContract::new(SchemaMode::Observed));
        let mut transform = IdentityTransform::new();
        let ctx = noop_ctx();
        let result = transform.process(row.clone(), &ctx).unwrap();
        match result {
            TransformResult::Rows { rows, .. } => assert_eq!(rows, vec![row]),
            TransformResult::Error { .. } => unreachable!("identity transform never errors"),
        }
    }
}
