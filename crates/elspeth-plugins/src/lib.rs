// elspeth-plugins/src/lib.rs
// ============================================================================
// Module: Elspeth Reference Plugins
// Description: Concrete sources, sinks, and transforms that make a run
//              observable end-to-end without any external service.
// Purpose: Give the CLI and the system tests something runnable.
// Dependencies: elspeth-core, serde_json, thiserror, tokio
// ============================================================================

//! ## Overview
//! This crate ships the plugin set referenced by the seed scenarios:
//! [`source::InlineSource`] and [`source::FileSource`] for ingesting
//! JSON-lines rows, [`sink::CsvSink`] and [`sink::ChannelSink`] for
//! committing them somewhere observable, and [`transform::IdentityTransform`]
//! / [`transform::FieldMutationTransform`] for the handful of row-shape
//! changes the scenarios exercise. None of these plugins know anything about
//! the engine beyond the capability traits in `elspeth_core::interfaces`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod sink;
pub mod source;
pub mod transform;

#[cfg(test)]
mod test_support;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use sink::ChannelSink;
pub use sink::CsvSink;
pub use sink::SinkBuildError;
pub use source::FileSource;
pub use source::InlineSource;
pub use source::SourceLoadError;
pub use transform::FieldMutationError;
pub use transform::FieldMutationTransform;
pub use transform::IdentityTransform;
