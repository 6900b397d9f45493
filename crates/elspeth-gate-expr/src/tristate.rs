// elspeth-gate-expr/src/tristate.rs
// ============================================================================
// Module: Tri-State Logic
// Description: Tri-state truth values and the logic table used to combine them.
// Purpose: Give gate expressions fail-closed semantics when a row is missing
//          the data a predicate needs.
// Dependencies: serde::{Deserialize, Serialize}
// ============================================================================

//! ## Overview
//! A gate predicate never silently coerces a missing field to `false`: it
//! reports [`TriState::Unknown`], and the logic table decides how `Unknown`
//! propagates through `and`/`or`/`not`/group combinators. The only table
//! ELSPETH ships is strong Kleene logic, which keeps an `Unknown` anywhere in
//! an `and` or `or` chain from silently resolving to `True`.

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Tri-State Value
// ============================================================================

/// Tri-state truth value for row-conditioned gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriState {
    /// Definitively true.
    True,
    /// Definitively false.
    False,
    /// Indeterminate: the row lacked the data the predicate needed.
    Unknown,
}

impl TriState {
    /// Returns true if the value is `True`.
    #[must_use]
    pub const fn is_true(self) -> bool {
        matches!(self, Self::True)
    }

    /// Returns true if the value is `False`.
    #[must_use]
    pub const fn is_false(self) -> bool {
        matches!(self, Self::False)
    }

    /// Returns true if the value is `Unknown`.
    #[must_use]
    pub const fn is_unknown(self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl From<bool> for TriState {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

// ============================================================================
// SECTION: Group Semantics
// ============================================================================

/// Aggregated counts for `RequireGroup` evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupCounts {
    /// Number of satisfied requirements.
    pub satisfied: usize,
    /// Number of unknown requirements.
    pub unknown: usize,
    /// Total number of requirements in the group.
    pub total: usize,
}

impl GroupCounts {
    /// Returns the number of definitively failed requirements.
    #[must_use]
    pub const fn failed(self) -> usize {
        self.total.saturating_sub(self.satisfied + self.unknown)
    }
}

// ============================================================================
// SECTION: Logic Table
// ============================================================================

/// Tri-state logic table for combining predicate results.
pub trait TriLogic {
    /// Logical AND for tri-state values.
    fn and(&self, lhs: TriState, rhs: TriState) -> TriState;

    /// Logical OR for tri-state values.
    fn or(&self, lhs: TriState, rhs: TriState) -> TriState;

    /// Logical NOT for tri-state values.
    fn not(&self, value: TriState) -> TriState;

    /// Group evaluation: at least `min` of `counts.total` must be satisfied.
    fn require_group(&self, min: u8, counts: GroupCounts) -> TriState {
        let min_required = usize::from(min);
        if min_required == 0 {
            return TriState::True;
        }
        if counts.satisfied >= min_required {
            return TriState::True;
        }
        if counts.satisfied + counts.unknown < min_required {
            return TriState::False;
        }
        TriState::Unknown
    }
}

/// Strong Kleene logic: an `Unknown` operand makes `and`/`or` indeterminate
/// unless the other operand already forces the result (`False` in an `and`,
/// `True` in an `or`).
#[derive(Debug, Clone, Copy)]
pub struct KleeneLogic;

impl TriLogic for KleeneLogic {
    fn and(&self, lhs: TriState, rhs: TriState) -> TriState {
        match (lhs, rhs) {
            (TriState::False, _) | (_, TriState::False) => TriState::False,
            (TriState::True, TriState::True) => TriState::True,
            _ => TriState::Unknown,
        }
    }

    fn or(&self, lhs: TriState, rhs: TriState) -> TriState {
        match (lhs, rhs) {
            (TriState::True, _) | (_, TriState::True) => TriState::True,
            (TriState::False, TriState::False) => TriState::False,
            _ => TriState::Unknown,
        }
    }

    fn not(&self, value: TriState) -> TriState {
        match value {
            TriState::True => TriState::False,
            TriState::False => TriState::True,
            TriState::Unknown => TriState::Unknown,
        }
    }
}

// ============================================================================
// SECTION: Trace Hooks
// ============================================================================

/// Trace hook invoked each time a leaf predicate is evaluated.
pub trait RequirementTrace<P> {
    /// Called whenever a predicate is evaluated.
    fn on_predicate_evaluated(&mut self, predicate: &P, result: TriState);
}

/// No-op trace hook used on the hot path.
#[derive(Debug, Default)]
pub struct NoopTrace;

impl<P> RequirementTrace<P> for NoopTrace {
    fn on_predicate_evaluated(&mut self, _predicate: &P, _result: TriState) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kleene_and_is_false_if_either_side_false() {
        assert_eq!(KleeneLogic.and(TriState::False, TriState::Unknown), TriState::False);
        assert_eq!(KleeneLogic.and(TriState::Unknown, TriState::False), TriState::False);
    }

    #[test]
    fn kleene_and_is_unknown_if_no_side_is_false() {
        assert_eq!(KleeneLogic.and(TriState::True, TriState::Unknown), TriState::Unknown);
    }

    #[test]
    fn kleene_or_is_true_if_either_side_true() {
        assert_eq!(KleeneLogic.or(TriState::True, TriState::Unknown), TriState::True);
    }

    #[test]
    fn kleene_or_is_unknown_if_no_side_is_true() {
        assert_eq!(KleeneLogic.or(TriState::False, TriState::Unknown), TriState::Unknown);
    }

    #[test]
    fn require_group_is_unknown_when_outcome_still_depends_on_unknowns() {
        let counts = GroupCounts { satisfied: 1, unknown: 1, total: 3 };
        assert_eq!(KleeneLogic.require_group(2, counts), TriState::Unknown);
    }

    #[test]
    fn require_group_fails_when_not_enough_remain_possible() {
        let counts = GroupCounts { satisfied: 0, unknown: 1, total: 3 };
        assert_eq!(KleeneLogic.require_group(2, counts), TriState::False);
    }
}
