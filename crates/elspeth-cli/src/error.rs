// elspeth-cli/src/error.rs
// ============================================================================
// Module: CLI Errors
// Description: Top-level error type unifying profile, engine, and store
//              failures under one exit path.
// Purpose: Give `main` a single `Display` to print and a single exit code.
// Dependencies: elspeth-core, elspeth-store-sqlite, thiserror
// ============================================================================

use thiserror::Error;

use crate::profile::ProfileError;
use crate::runpack::RunpackError;

/// Errors surfaced to the CLI's entry point.
#[derive(Debug, Error)]
pub enum CliError {
    /// The profile file could not be read or parsed.
    #[error(transparent)]
    Profile(#[from] ProfileError),
    /// The execution graph rejected the profile's nodes or edges.
    #[error(transparent)]
    Graph(#[from] elspeth_core::core::graph::GraphError),
    /// The engine failed while opening or driving a run.
    #[error(transparent)]
    Engine(#[from] elspeth_core::runtime::engine::EngineError),
    /// The audit store could not be opened.
    #[error(transparent)]
    Store(#[from] elspeth_store_sqlite::SqliteStoreError),
    /// The recorder rejected a read or write outside the engine loop.
    #[error(transparent)]
    Recorder(#[from] elspeth_core::interfaces::RecorderError),
    /// A `runpack export`/`runpack verify` operation failed.
    #[error(transparent)]
    Runpack(#[from] RunpackError),
    /// Exporting a run's audit trail off the database failed.
    #[error(transparent)]
    Export(#[from] elspeth_store_sqlite::ExportError),
    /// An I/O failure occurred reading or writing a CLI-level file.
    #[error("io error: {0}")]
    Io(String),
}
