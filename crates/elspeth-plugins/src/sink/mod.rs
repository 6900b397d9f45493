// elspeth-plugins/src/sink/mod.rs
// ============================================================================
// Module: Reference Sinks
// Description: Shared error type for the concrete sinks in this crate.
// Purpose: Give every sink a common failure mode to surface construction and
//          write errors through.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! [`csv::CsvSink`] commits rows to a deterministic CSV byte stream;
//! [`channel::ChannelSink`] forwards them into an in-process `tokio` channel.
//! Both implement `elspeth_core::interfaces::Sink`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::interfaces::PluginInvocationError;
use thiserror::Error;

pub mod channel;
pub mod csv;

pub use channel::ChannelSink;
pub use csv::CsvSink;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised constructing or writing to a sink.
#[derive(Debug, Error)]
pub enum SinkBuildError {
    /// The sink's backing store could not be written.
    #[error("sink io failure: {0}")]
    Io(String),
    /// A row was missing a field the sink's column list required.
    #[error("row is missing column {0}")]
    MissingColumn(String),
    /// Delivery into a bounded channel failed because it was full or closed.
    #[error("channel delivery failed: {0}")]
    ChannelDelivery(String),
}

impl From<SinkBuildError> for PluginInvocationError {
    fn from(err: SinkBuildError) -> Self {
        Self::NonRetryable(err.to_string())
    }
}
