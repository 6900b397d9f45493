// elspeth-store-sqlite/src/lib.rs
// ============================================================================
// Module: Elspeth SQLite Store
// Description: Durable RunRecorder and audit bundle exporter over SQLite.
// Purpose: Give a single-process run a crash-safe audit trail and a portable
//          export format for third-party verification.
// Dependencies: elspeth-core, rusqlite, serde, serde_json, hmac, sha2, thiserror
// ============================================================================

//! ## Overview
//! This crate is the reference [`elspeth_core::interfaces::RunRecorder`]
//! implementation: a single `SQLite` file under WAL, one table per audit
//! entity (see [`schema`]), written through [`store::SqliteRunRecorder`].
//! [`exporter::Exporter`] flattens a completed run into the signed,
//! self-contained bundle format the CLI's `runpack export`/`runpack verify`
//! commands operate on.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod exporter;
pub mod schema;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use exporter::ExportBundle;
pub use exporter::ExportError;
pub use exporter::ExportRecord;
pub use exporter::Exporter;
pub use store::SqliteRunRecorder;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
