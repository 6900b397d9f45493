// elspeth-plugins/src/sink/csv.rs
// ============================================================================
// Module: CSV Sink
// Description: Deterministic RFC 4180 CSV writer producing a content-hashed
//              artifact descriptor.
// Purpose: Commit rows to a CSV byte stream whose hash is reproducible given
//          the same rows and column order.
// Dependencies: elspeth-core, std
// ============================================================================

//! ## Overview
//! `CsvSink` writes a header row on its first write, then one row per input
//! record, buffering every byte it has ever written so that
//! [`ArtifactDescriptor::content_hash`] is always the SHA-256 of the whole
//! file, not just the most recent call. Field quoting follows RFC 4180:
//! values containing a comma, double quote, or newline are quoted, with
//! internal quotes doubled.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;

use elspeth_core::core::contract::PipelineRow;
use elspeth_core::core::hashing::DEFAULT_HASH_ALGORITHM;
use elspeth_core::core::hashing::hash_bytes;
use elspeth_core::interfaces::ArtifactDescriptor;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::PluginInvocationError;
use elspeth_core::interfaces::Sink;
use serde_json::Value;

use crate::sink::SinkBuildError;

// ============================================================================
// SECTION: CSV Sink
// ============================================================================

/// CSV sink writing rows in a fixed column order.
pub struct CsvSink<W: Write> {
    writer: W,
    path_or_uri: String,
    columns: Vec<String>,
    header_written: bool,
    buffer: Vec<u8>,
}

impl<W: Write> CsvSink<W> {
    /// Creates a CSV sink that writes `columns`, in order, to `writer`.
    /// `path_or_uri` is the artifact identifier reported on every write.
    #[must_use]
    pub fn new(path_or_uri: impl Into<String>, writer: W, columns: Vec<String>) -> Self {
        Self {
            writer,
            path_or_uri: path_or_uri.into(),
            columns,
            header_written: false,
            buffer: Vec::new(),
        }
    }

    fn render_row<'a>(cells: impl Iterator<Item = &'a str>) -> Vec<u8> {
        let mut line = cells.map(escape_field).collect::<Vec<_>>().join(",");
        line.push('\n');
        line.into_bytes()
    }
}

impl<W: Write> Sink for CsvSink<W> {
    fn supports_resume(&self) -> bool {
        false
    }

    fn write(
        &mut self,
        rows: &[PipelineRow],
        _ctx: &dyn PluginContext,
    ) -> Result<ArtifactDescriptor, PluginInvocationError> {
        let mut bytes = Vec::new();
        if !self.header_written {
            bytes.extend(Self::render_row(self.columns.iter().map(String::as_str)));
            self.header_written = true;
        }
        for row in rows {
            let cells: Vec<String> = self
                .columns
                .iter()
                .map(|column| format_cell(row.get(column).unwrap_or(&Value::Null)))
                .collect();
            bytes.extend(Self::render_row(cells.iter().map(String::as_str)));
        }
        self.writer
            .write_all(&bytes)
            .map_err(|err| SinkBuildError::Io(err.to_string()))?;
        self.buffer.extend_from_slice(&bytes);
        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, &self.buffer);
        Ok(ArtifactDescriptor {
            artifact_type: "file".to_string(),
            path_or_uri: self.path_or_uri.clone(),
            content_hash: digest.value,
            size_bytes: self.buffer.len() as u64,
        })
    }

    fn flush(&mut self) -> Result<(), PluginInvocationError> {
        self.writer.flush().map_err(|err| SinkBuildError::Io(err.to_string()).into())
    }

    fn close(&mut self) -> Result<(), PluginInvocationError> {
        self.flush()
    }
}

// ============================================================================
// SECTION: Cell Formatting
// ============================================================================

/// Renders a JSON value as a CSV cell's raw (unescaped) text.
fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Quotes `field` per RFC 4180 if it contains a comma, quote, or newline.
fn escape_field(field: &str) -> String {
    if field.contains(['"', ',', '\n', '\r']) {
        let mut escaped = String::with_capacity(field.len() + 2);
        escaped.push('"');
        for ch in field.chars() {
            if ch == '"' {
                escaped.push('"');
            }
            escaped.push(ch);
        }
        escaped.push('"');
        escaped
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test assertions")]

    use std::collections::BTreeMap;

    use elspeth_core::core::contract::FieldKind;
    use elspeth_core::core::contract::FieldSource;
    use elspeth_core::core::contract::SchemaContract;
    use elspeth_core::core::contract::SchemaMode;

    use super::*;
    use crate::test_support::noop_ctx;

    fn row(id: i64, name: &str) -> PipelineRow {
        let contract = SchemaContract::new(SchemaMode::Flexible)
            .with_field("id", "id", FieldKind::Int, FieldSource::Declared)
            .unwrap()
            .with_field("name", "name", FieldKind::Str, FieldSource::Declared)
            .unwrap();
        let mut data = BTreeMap::new();
        data.insert("id".to_string(), Value::from(id));
        data.insert("name".to_string(), Value::from(name));
        PipelineRow::new(data, contract)
    }

    #[test]
    fn quotes_commas_and_doubles_embedded_quotes() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn content_hash_is_deterministic_for_identical_rows() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let mut buffer_a = Vec::new();
        let mut sink_a = CsvSink::new("rows.csv", &mut buffer_a, columns.clone());
        let ctx = noop_ctx();
        let descriptor_a = sink_a.write(&[row(1, "Alice"), row(2, "Bob")], &ctx).unwrap();

        let mut buffer_b = Vec::new();
        let mut sink_b = CsvSink::new("rows.csv", &mut buffer_b, columns);
        let descriptor_b = sink_b.write(&[row(1, "Alice"), row(2, "Bob")], &ctx).unwrap();

        assert_eq!(descriptor_a.content_hash, descriptor_b.content_hash);
        assert_eq!(buffer_a, buffer_b);
        assert_eq!(buffer_a, b"id,name\n1,Alice\n2,Bob\n");
    }

    #[test]
    fn content_hash_changes_when_a_field_changes() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let mut buffer = Vec::new();
        let mut sink = CsvSink::new("rows.csv", &mut buffer, columns.clone());
        let ctx = noop_ctx();
        let original = sink.write(&[row(1, "Alice")], &ctx).unwrap();

        let mut other_buffer = Vec::new();
        let mut other_sink = CsvSink::new("rows.csv", &mut other_buffer, columns);
        let changed = other_sink.write(&[row(1, "Alicia")], &ctx).unwrap();

        assert_ne!(original.content_hash, changed.content_hash);
    }
}
