// elspeth-gate-expr/src/requirement.rs
// ============================================================================
// Module: Requirement Tree
// Description: Tri-state Boolean algebra over a domain-specific leaf predicate.
// Purpose: Compose gate leaf predicates with and/or/not/require_group, with
//          short-circuiting tri-state evaluation.
// Dependencies: crate::{traits, tristate}, smallvec::SmallVec
// ============================================================================

//! ## Overview
//! `Requirement<P>` is a boolean combinator tree whose leaves are an
//! arbitrary predicate type `P`. The combinators (`And`, `Or`, `Not`,
//! `RequireGroup`) are domain-agnostic; only [`Requirement::Predicate`]
//! carries domain semantics, which for a gate condition is one parsed
//! comparison/membership/ternary expression evaluated against a row.

use smallvec::SmallVec;

use crate::traits::Row;
use crate::traits::TriStatePredicateEval;
use crate::tristate::GroupCounts;
use crate::tristate::NoopTrace;
use crate::tristate::RequirementTrace;
use crate::tristate::TriLogic;
use crate::tristate::TriState;

// ============================================================================
// SECTION: Requirement Definition
// ============================================================================

/// A Boolean combinator tree over a domain-specific leaf predicate `P`.
#[derive(Debug, Clone, PartialEq)]
pub enum Requirement<P> {
    /// Logical AND: every sub-requirement must be satisfied. Empty `And` is
    /// trivially satisfied.
    And(SmallVec<[Box<Self>; 4]>),
    /// Logical OR: at least one sub-requirement must be satisfied. Empty
    /// `Or` is trivially unsatisfiable.
    Or(SmallVec<[Box<Self>; 4]>),
    /// Logical NOT of a sub-requirement.
    Not(Box<Self>),
    /// At least `min` of the listed sub-requirements must be satisfied.
    RequireGroup {
        /// Minimum number of sub-requirements that must be satisfied.
        min: u8,
        /// The sub-requirements to choose from.
        reqs: SmallVec<[Box<Self>; 8]>,
    },
    /// A leaf predicate: the boundary where domain semantics are injected.
    Predicate(P),
}

impl<P> Requirement<P> {
    /// Evaluates this requirement with tri-state semantics against `reader`
    /// at `row`, combining leaf results with `logic`.
    pub fn eval_tristate<L>(&self, reader: &P::Reader<'_>, row: Row, logic: &L) -> TriState
    where
        P: TriStatePredicateEval,
        L: TriLogic,
    {
        let mut trace = NoopTrace;
        self.eval_tristate_with_trace(reader, row, logic, &mut trace)
    }

    /// Evaluates this requirement with tri-state semantics, invoking `trace`
    /// at every leaf.
    pub fn eval_tristate_with_trace<L, T>(
        &self,
        reader: &P::Reader<'_>,
        row: Row,
        logic: &L,
        trace: &mut T,
    ) -> TriState
    where
        P: TriStatePredicateEval,
        L: TriLogic,
        T: RequirementTrace<P>,
    {
        match self {
            Self::Predicate(predicate) => {
                let result = predicate.eval_row_tristate(reader, row);
                trace.on_predicate_evaluated(predicate, result);
                result
            }
            Self::Not(requirement) => {
                logic.not(requirement.eval_tristate_with_trace(reader, row, logic, trace))
            }
            Self::And(requirements) => {
                let mut acc = TriState::True;
                for req in requirements {
                    acc = logic.and(acc, req.eval_tristate_with_trace(reader, row, logic, trace));
                }
                acc
            }
            Self::Or(requirements) => {
                let mut acc = TriState::False;
                for req in requirements {
                    acc = logic.or(acc, req.eval_tristate_with_trace(reader, row, logic, trace));
                }
                acc
            }
            Self::RequireGroup { min, reqs } => {
                let mut satisfied = 0usize;
                let mut unknown = 0usize;
                for req in reqs {
                    match req.eval_tristate_with_trace(reader, row, logic, trace) {
                        TriState::True => satisfied += 1,
                        TriState::Unknown => unknown += 1,
                        TriState::False => {}
                    }
                }
                logic.require_group(*min, GroupCounts { satisfied, unknown, total: reqs.len() })
            }
        }
    }
}

// ============================================================================
// SECTION: Constructor Helpers
// ============================================================================

impl<P> Requirement<P> {
    /// Creates a logical AND of the given requirements.
    pub fn and(requirements: Vec<Self>) -> Self {
        Self::And(requirements.into_iter().map(Box::new).collect())
    }

    /// Creates a logical OR of the given requirements.
    pub fn or(requirements: Vec<Self>) -> Self {
        Self::Or(requirements.into_iter().map(Box::new).collect())
    }

    /// Creates a logical NOT of the given requirement.
    pub fn negate(requirement: Self) -> Self {
        Self::Not(Box::new(requirement))
    }

    /// Creates a group requirement with a minimum satisfaction count.
    pub fn require_group(min: u8, requirements: Vec<Self>) -> Self {
        Self::RequireGroup { min, reqs: requirements.into_iter().map(Box::new).collect() }
    }

    /// Creates a requirement from a single leaf predicate.
    pub const fn predicate(predicate: P) -> Self {
        Self::Predicate(predicate)
    }
}

impl<P> Default for Requirement<P> {
    /// An empty `And`, trivially satisfied.
    fn default() -> Self {
        Self::And(SmallVec::new())
    }
}
