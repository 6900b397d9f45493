// elspeth-plugins/src/source/mod.rs
// ============================================================================
// Module: Reference Sources
// Description: Shared JSON-lines decoding and contract validation used by
//              every concrete source in this crate.
// Purpose: Turn raw JSON objects into PipelineRows, routing anything that
//          fails the declared contract to validation-error reporting instead
//          of silently coercing or dropping it.
// Dependencies: elspeth-core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Sources in this crate all speak the same wire format: one JSON object per
//! line. What differs is where the bytes come from ([`inline::InlineSource`]
//! holds them in memory, [`file::FileSource`] reads them off disk). Both
//! funnel every decoded row through [`validate_and_build`], which is the only
//! place a row is allowed to become a [`PipelineRow`] or be discarded as a
//! [`ValidationErrorRecord`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use elspeth_core::core::contract::PipelineRow;
use elspeth_core::core::contract::SchemaContract;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::PluginInvocationError;
use elspeth_core::interfaces::RowDestination;
use serde_json::Value;
use thiserror::Error;

pub mod file;
pub mod inline;

pub use file::FileSource;
pub use inline::InlineSource;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised decoding a source's backing bytes into rows.
#[derive(Debug, Error)]
pub enum SourceLoadError {
    /// The backing store could not be read.
    #[error("source io failure: {0}")]
    Io(String),
    /// A line was not valid JSON.
    #[error("malformed json on line {line}: {detail}")]
    MalformedJson {
        /// One-based line number of the offending row.
        line: usize,
        /// Parser error detail.
        detail: String,
    },
    /// A decoded JSON value was not an object and cannot become a row.
    #[error("row on line {line} is not a json object")]
    NotAnObject {
        /// One-based line number of the offending row.
        line: usize,
    },
    /// The configured root directory rejected the requested path.
    #[error("path traversal rejected: {0}")]
    PathTraversal(String),
}

impl From<SourceLoadError> for PluginInvocationError {
    fn from(err: SourceLoadError) -> Self {
        Self::NonRetryable(err.to_string())
    }
}

// ============================================================================
// SECTION: Shared Decoding
// ============================================================================

/// Decodes newline-delimited JSON objects, skipping blank lines.
///
/// # Errors
///
/// Returns [`SourceLoadError::MalformedJson`] or [`SourceLoadError::NotAnObject`]
/// for the first line that cannot become a row.
pub(crate) fn decode_json_lines(contents: &str) -> Result<Vec<Value>, SourceLoadError> {
    let mut rows = Vec::new();
    for (zero_based, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let line_number = zero_based + 1;
        let value: Value = serde_json::from_str(line)
            .map_err(|err| SourceLoadError::MalformedJson { line: line_number, detail: err.to_string() })?;
        if !value.is_object() {
            return Err(SourceLoadError::NotAnObject { line: line_number });
        }
        rows.push(value);
    }
    Ok(rows)
}

/// Validates one decoded JSON object against `contract`, either returning the
/// resulting [`PipelineRow`] or reporting a validation error through `ctx`
/// and returning `None`.
///
/// # Errors
///
/// Returns [`PluginInvocationError`] if `ctx.record_validation_error` fails.
pub(crate) fn validate_and_build(
    contract: &SchemaContract,
    value: Value,
    ctx: &dyn PluginContext,
) -> Result<Option<PipelineRow>, PluginInvocationError> {
    let object = value.as_object().cloned().unwrap_or_default();
    let map: BTreeMap<String, Value> = object.into_iter().collect();
    let violations = contract.validate(&map);
    if violations.is_empty() {
        return Ok(Some(PipelineRow::new(map, contract.clone())));
    }
    ctx.record_validation_error(&value, violations, contract.mode(), RowDestination::Discard)
        .map_err(|err| PluginInvocationError::NonRetryable(err.to_string()))?;
    Ok(None)
}
