// elspeth-core/src/core/error.rs
// ============================================================================
// Module: Elspeth Error Taxonomy
// Description: Aggregate error type for engine, contract, and recorder failures.
// Purpose: Give every caller a single enum to match on at the process boundary.
// Dependencies: crate::core::{contract, hashing, retry}, thiserror
// ============================================================================

//! ## Overview
//! Every abstract error kind the engine can surface is a variant (or a
//! `#[from]`-wrapped nested error) of [`ElspethError`]. Plugin-level errors
//! are converted to a `TransformResult::Error` inside the engine loop unless
//! they are retryable (re-raised for `RetryManager`) or a framework bug
//! (propagated and, for invariant violations that must never be silently
//! continued, turned into a panic at the violation site).

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::contract::ContractError;
use crate::core::contract::ContractIntegrityError;
use crate::core::contract::ContractMergeError;
use crate::core::contract::Violation;
use crate::core::hashing::HashError;
use crate::core::retry::MaxRetriesExceeded;

// ============================================================================
// SECTION: ElspethError
// ============================================================================

/// Top-level error taxonomy for the engine.
#[derive(Debug, Error)]
pub enum ElspethError {
    /// Bad configuration discovered before a run begins.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A row failed schema validation at ingress.
    #[error("contract violation on field {field}: {violations:?}")]
    ContractViolation {
        /// The offending node's declared field, or the row's source node.
        field: String,
        /// The specific violations observed.
        violations: Vec<Violation>,
    },

    /// Two branches carried incompatible types into a coalesce.
    #[error(transparent)]
    ContractMerge(#[from] ContractMergeError),

    /// A plugin invocation failed and was not retryable.
    #[error("plugin invocation failed: {0}")]
    PluginInvocation(String),

    /// Retries were exhausted for a retryable operation.
    #[error(transparent)]
    MaxRetriesExceeded(#[from] MaxRetriesExceeded),

    /// A hash mismatch was found restoring a checkpoint or an audit record.
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// Generic contract lookup/mutation error.
    #[error(transparent)]
    Contract(#[from] ContractError),

    /// Checkpoint integrity failure for a schema contract.
    #[error(transparent)]
    ContractIntegrity(#[from] ContractIntegrityError),

    /// Canonical hashing failed.
    #[error(transparent)]
    Hash(#[from] HashError),
}

/// Raises a framework-bug invariant violation.
///
/// Per the error taxonomy, framework bugs MUST crash rather than be silently
/// continued; this is the one place the otherwise deny-by-default panic
/// lint is deliberately overridden.
#[allow(clippy::panic, reason = "framework-bug invariants must crash, never continue silently")]
pub fn framework_bug(invariant: &str) -> ! {
    panic!("framework bug: invariant violated: {invariant}");
}
