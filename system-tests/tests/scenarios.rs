// system-tests/tests/scenarios.rs
// ============================================================================
// Module: Scenario Suite
// Description: Aggregates the end-to-end dataflow scenarios that drive an
//              Engine directly, one per seed scenario.
// Purpose: Keep each scenario's wiring isolated in its own file while
//          running them all under one binary.
// Dependencies: suites/*, helpers
// ============================================================================

//! ## Overview
//! Each suite builds one small graph through the shared harness in
//! `helpers::engine` and drives it through exactly one `run_source` call,
//! then asserts on the resulting recorder state and summary counters.
//! Invariants:
//! - Every scenario opens its own run id; none share state with another.
//! - Plugin stubs live in `helpers::stubs` and are test-only.

mod helpers;

#[path = "suites/s1_happy_path.rs"]
mod s1_happy_path;
#[path = "suites/s2_retry.rs"]
mod s2_retry;
#[path = "suites/s3_fork_coalesce.rs"]
mod s3_fork_coalesce;
#[path = "suites/s4_batch_pending.rs"]
mod s4_batch_pending;
#[path = "suites/s5_schema_rejects.rs"]
mod s5_schema_rejects;
#[path = "suites/s6_content_hash.rs"]
mod s6_content_hash;
