// elspeth-plugins/src/source/inline.rs
// ============================================================================
// Module: Inline Source
// Description: Source backed by JSON-lines text embedded at construction.
// Purpose: Let tests and small runs supply rows without touching a filesystem.
// Dependencies: elspeth-core
// ============================================================================

//! ## Overview
//! [`InlineSource`] decodes its rows once, at construction, from a
//! newline-delimited JSON string. `iterate` is called exactly once per run
//! and returns every row that passes the declared contract; rows that fail
//! are reported through [`elspeth_core::interfaces::PluginContext::record_validation_error`]
//! instead of being returned.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::core::contract::PipelineRow;
use elspeth_core::core::contract::SchemaContract;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::PluginInvocationError;
use elspeth_core::interfaces::Source;

use crate::source::SourceLoadError;
use crate::source::decode_json_lines;
use crate::source::validate_and_build;

// ============================================================================
// SECTION: Inline Source
// ============================================================================

/// Source whose rows were decoded from an in-memory JSON-lines string.
#[derive(Debug, Clone)]
pub struct InlineSource {
    contract: SchemaContract,
    rows: Vec<serde_json::Value>,
    exhausted: bool,
}

impl InlineSource {
    /// Decodes `jsonl` into rows described by `contract`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceLoadError`] if `jsonl` contains malformed JSON or a
    /// line that is not a JSON object.
    pub fn new(jsonl: &str, contract: SchemaContract) -> Result<Self, SourceLoadError> {
        let rows = decode_json_lines(jsonl)?;
        Ok(Self { contract, rows, exhausted: false })
    }
}

impl Source for InlineSource {
    fn output_schema(&self) -> SchemaContract {
        self.contract.clone()
    }

    fn iterate(
        &mut self,
        ctx: &dyn PluginContext,
    ) -> Result<Vec<PipelineRow>, PluginInvocationError> {
        if self.exhausted {
            return Ok(Vec::new());
        }
        self.exhausted = true;
        let mut rows = Vec::with_capacity(self.rows.len());
        for value in std::mem::take(&mut self.rows) {
            if let Some(row) = validate_and_build(&self.contract, value, ctx)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}
