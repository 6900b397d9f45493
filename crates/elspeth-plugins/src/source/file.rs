// elspeth-plugins/src/source/file.rs
// ============================================================================
// Module: File Source
// Description: Source backed by a JSON-lines file on disk.
// Purpose: Read payload rows from local files, optionally confined to a root
//          directory.
// Dependencies: elspeth-core, std
// ============================================================================

//! ## Overview
//! [`FileSource`] reads a single newline-delimited JSON file into rows.
//! Security posture: treats the configured path as untrusted input. When a
//! root directory is configured, the resolved path must canonicalize to
//! somewhere underneath it; anything that escapes is rejected rather than
//! silently clamped.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use elspeth_core::core::contract::PipelineRow;
use elspeth_core::core::contract::SchemaContract;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::PluginInvocationError;
use elspeth_core::interfaces::Source;

use crate::source::SourceLoadError;
use crate::source::decode_json_lines;
use crate::source::validate_and_build;

// ============================================================================
// SECTION: File Source
// ============================================================================

/// Source that reads JSON-lines rows from a file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    root: Option<PathBuf>,
    contract: SchemaContract,
    exhausted: bool,
}

impl FileSource {
    /// Creates a file source for `path`, described by `contract`, with no
    /// root restriction.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, contract: SchemaContract) -> Self {
        Self { path: path.into(), root: None, contract, exhausted: false }
    }

    /// Creates a file source confined to `root`: `path` must resolve to a
    /// location underneath it.
    #[must_use]
    pub fn rooted(root: impl Into<PathBuf>, path: impl Into<PathBuf>, contract: SchemaContract) -> Self {
        Self { path: path.into(), root: Some(root.into()), contract, exhausted: false }
    }

    /// Resolves and validates the configured path, returning its canonical form.
    fn resolve_path(&self) -> Result<PathBuf, SourceLoadError> {
        let canonical = std::fs::canonicalize(&self.path)
            .map_err(|err| SourceLoadError::Io(err.to_string()))?;
        if let Some(root) = &self.root {
            let canonical_root = std::fs::canonicalize(root)
                .map_err(|err| SourceLoadError::Io(err.to_string()))?;
            if !Self::is_within(&canonical_root, &canonical) {
                return Err(SourceLoadError::PathTraversal(canonical.display().to_string()));
            }
        }
        Ok(canonical)
    }

    /// Returns whether `candidate` is `root` or a descendant of it.
    fn is_within(root: &Path, candidate: &Path) -> bool {
        candidate == root || candidate.starts_with(root)
    }
}

impl Source for FileSource {
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
        let path = self.resolve_path()?;
        let contents =
            std::fs::read_to_string(&path).map_err(|err| SourceLoadError::Io(err.to_string()))?;
        let values = decode_json_lines(&contents)?;
        let mut rows = Vec::with_capacity(values.len());
        for value in values {
            if let Some(row) = validate_and_build(&self.contract, value, ctx)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}
