// elspeth-gate-expr/src/lib.rs
// ============================================================================
// Module: Gate Predicate Algebra
// Description: Tri-state Boolean combinator tree used by gate-node routing.
// Purpose: Give `elspeth-core`'s gate expression compiler a reusable
//          and/or/not/require_group tree over a single leaf predicate type.
// Dependencies: crate::{requirement, traits, tristate}
// ============================================================================

//! ## Overview
//! This crate carries only the domain-agnostic half of gate evaluation: the
//! [`Requirement`] combinator tree and the tri-state logic it evaluates
//! under. The parser that turns gate condition source text into a
//! `Requirement<GateAtom>` tree, and `GateAtom` itself, live in
//! `elspeth-core::core::gate` — this crate has no notion of rows, columns, or
//! pipeline configuration, only of combining leaf results.

pub mod requirement;
pub mod traits;
pub mod tristate;

pub use requirement::Requirement;
pub use traits::Row;
pub use traits::TriStatePredicateEval;
pub use tristate::GroupCounts;
pub use tristate::KleeneLogic;
pub use tristate::NoopTrace;
pub use tristate::RequirementTrace;
pub use tristate::TriLogic;
pub use tristate::TriState;
