// system-tests/tests/suites/s6_content_hash.rs
// ============================================================================
// Suite: S6 — Blob-like sink with content hash
// Description: Two sink instances writing identical rows under identical
//              configuration produce identical content hashes; changing one
//              field flips the hash.
// ============================================================================

use std::collections::BTreeMap;

use elspeth_core::core::contract::FieldKind;
use elspeth_core::core::contract::PipelineRow;
use elspeth_core::interfaces::Sink;
use elspeth_plugins::sink::csv::CsvSink;
use serde_json::Value;

use crate::helpers::engine::fixed_contract;
use crate::helpers::stubs::InertCtx;
use crate::helpers::stubs::SharedBuffer;

fn row(id: i64, name: &str) -> PipelineRow {
    let contract = fixed_contract(&[("id", FieldKind::Int), ("name", FieldKind::Str)]);
    let mut data = BTreeMap::new();
    data.insert("id".to_string(), Value::from(id));
    data.insert("name".to_string(), Value::from(name));
    PipelineRow::new(data, contract)
}

#[test]
fn two_sink_instances_produce_identical_hashes_for_identical_rows() {
    let columns = vec!["id".to_string(), "name".to_string()];

    let buffer_a = SharedBuffer::default();
    let mut sink_a = CsvSink::new("rows.csv", buffer_a.clone(), columns.clone());
    let ctx = InertCtx::default();
    let descriptor_a = sink_a.write(&[row(1, "Alice"), row(2, "Bob")], &ctx).expect("write succeeds");

    let buffer_b = SharedBuffer::default();
    let mut sink_b = CsvSink::new("rows.csv", buffer_b.clone(), columns);
    let descriptor_b = sink_b.write(&[row(1, "Alice"), row(2, "Bob")], &ctx).expect("write succeeds");

    assert_eq!(descriptor_a.content_hash, descriptor_b.content_hash);
    assert_eq!(buffer_a.snapshot(), buffer_b.snapshot());
}

#[test]
fn changing_one_field_flips_the_hash() {
    let columns = vec!["id".to_string(), "name".to_string()];
    let ctx = InertCtx::default();

    let mut sink_a = CsvSink::new("rows.csv", SharedBuffer::default(), columns.clone());
    let descriptor_a = sink_a.write(&[row(1, "Alice")], &ctx).expect("write succeeds");

    let mut sink_b = CsvSink::new("rows.csv", SharedBuffer::default(), columns);
    let descriptor_b = sink_b.write(&[row(1, "Alicia")], &ctx).expect("write succeeds");

    assert_ne!(descriptor_a.content_hash, descriptor_b.content_hash);
}
