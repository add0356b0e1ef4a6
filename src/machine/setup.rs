//! Portfolio Setup wizard.
//!
//! Per-problem states carry a cursor so the loop over 3-5 problems stays a
//! pure function of the state tag. The successor of `ProblemsIdentify` is
//! sized for the minimum portfolio; the controller resizes the cursor once
//! the actual problem list is known.

use serde::{Deserialize, Serialize};

use super::FlowState;
use crate::models::FlowKind;

pub const MIN_PROBLEMS: u8 = 3;
pub const MAX_PROBLEMS: u8 = 5;
const STEPS_PER_PROBLEM: u32 = 6;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ProblemCursor {
    pub index: u8,
    pub count: u8,
}

impl ProblemCursor {
    pub fn first(count: u8) -> Self {
        Self {
            index: 0,
            count: count.clamp(MIN_PROBLEMS, MAX_PROBLEMS),
        }
    }

    fn following(self) -> Option<Self> {
        if self.index + 1 < self.count {
            Some(Self {
                index: self.index + 1,
                count: self.count,
            })
        } else {
            None
        }
    }

    fn weight(self, step: u32) -> u8 {
        let done = u32::from(self.index) * STEPS_PER_PROBLEM + step;
        let total = u32::from(self.count.max(1)) * STEPS_PER_PROBLEM;
        (15 + (60 * done) / total) as u8
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SetupState {
    Initial,
    SensitivityGate,
    ProblemsIdentify,
    ProblemsIdentifyClarify,
    ProblemBreaks(ProblemCursor),
    ProblemBreaksClarify(ProblemCursor),
    ProblemScarcity(ProblemCursor),
    ProblemScarcityClarify(ProblemCursor),
    ProblemAiSubstitutability(ProblemCursor),
    ProblemAiSubstitutabilityClarify(ProblemCursor),
    ProblemErrorCost(ProblemCursor),
    ProblemErrorCostClarify(ProblemCursor),
    ProblemTrustAccess(ProblemCursor),
    ProblemTrustAccessClarify(ProblemCursor),
    ProblemDirection(ProblemCursor),
    TimeAllocation,
    BoardAssembly,
    PortfolioReview,
    Finalized,
    Abandoned,
}

impl SetupState {
    /// Every reachable state for every legal portfolio size.
    pub fn all() -> Vec<SetupState> {
        use SetupState::*;

        let mut states = vec![
            Initial,
            SensitivityGate,
            ProblemsIdentify,
            ProblemsIdentifyClarify,
            TimeAllocation,
            BoardAssembly,
            PortfolioReview,
            Finalized,
            Abandoned,
        ];
        for count in MIN_PROBLEMS..=MAX_PROBLEMS {
            for index in 0..count {
                let c = ProblemCursor { index, count };
                states.extend([
                    ProblemBreaks(c),
                    ProblemBreaksClarify(c),
                    ProblemScarcity(c),
                    ProblemScarcityClarify(c),
                    ProblemAiSubstitutability(c),
                    ProblemAiSubstitutabilityClarify(c),
                    ProblemErrorCost(c),
                    ProblemErrorCostClarify(c),
                    ProblemTrustAccess(c),
                    ProblemTrustAccessClarify(c),
                    ProblemDirection(c),
                ]);
            }
        }
        states
    }

    pub fn cursor(self) -> Option<ProblemCursor> {
        use SetupState::*;

        match self {
            ProblemBreaks(c)
            | ProblemBreaksClarify(c)
            | ProblemScarcity(c)
            | ProblemScarcityClarify(c)
            | ProblemAiSubstitutability(c)
            | ProblemAiSubstitutabilityClarify(c)
            | ProblemErrorCost(c)
            | ProblemErrorCostClarify(c)
            | ProblemTrustAccess(c)
            | ProblemTrustAccessClarify(c)
            | ProblemDirection(c) => Some(c),
            _ => None,
        }
    }

    pub fn problem_index(self) -> Option<usize> {
        self.cursor().map(|c| usize::from(c.index))
    }

    /// Same state with the portfolio size replaced (clamped to 3-5).
    pub fn resized(self, count: usize) -> Self {
        use SetupState::*;

        let count = count.clamp(usize::from(MIN_PROBLEMS), usize::from(MAX_PROBLEMS)) as u8;
        let fit = |c: ProblemCursor| ProblemCursor {
            index: c.index.min(count - 1),
            count,
        };

        match self {
            ProblemBreaks(c) => ProblemBreaks(fit(c)),
            ProblemBreaksClarify(c) => ProblemBreaksClarify(fit(c)),
            ProblemScarcity(c) => ProblemScarcity(fit(c)),
            ProblemScarcityClarify(c) => ProblemScarcityClarify(fit(c)),
            ProblemAiSubstitutability(c) => ProblemAiSubstitutability(fit(c)),
            ProblemAiSubstitutabilityClarify(c) => ProblemAiSubstitutabilityClarify(fit(c)),
            ProblemErrorCost(c) => ProblemErrorCost(fit(c)),
            ProblemErrorCostClarify(c) => ProblemErrorCostClarify(fit(c)),
            ProblemTrustAccess(c) => ProblemTrustAccess(fit(c)),
            ProblemTrustAccessClarify(c) => ProblemTrustAccessClarify(fit(c)),
            ProblemDirection(c) => ProblemDirection(fit(c)),
            other => other,
        }
    }
}

impl FlowState for SetupState {
    const FLOW: FlowKind = FlowKind::Setup;

    fn initial() -> Self {
        SetupState::Initial
    }

    fn finalized() -> Self {
        SetupState::Finalized
    }

    fn abandoned() -> Self {
        SetupState::Abandoned
    }

    fn next(self) -> Self {
        use SetupState::*;

        match self {
            Initial => SensitivityGate,
            SensitivityGate => ProblemsIdentify,
            ProblemsIdentify | ProblemsIdentifyClarify => {
                ProblemBreaks(ProblemCursor::first(MIN_PROBLEMS))
            }
            ProblemBreaks(c) | ProblemBreaksClarify(c) => ProblemScarcity(c),
            ProblemScarcity(c) | ProblemScarcityClarify(c) => ProblemAiSubstitutability(c),
            ProblemAiSubstitutability(c) | ProblemAiSubstitutabilityClarify(c) => {
                ProblemErrorCost(c)
            }
            ProblemErrorCost(c) | ProblemErrorCostClarify(c) => ProblemTrustAccess(c),
            ProblemTrustAccess(c) | ProblemTrustAccessClarify(c) => ProblemDirection(c),
            ProblemDirection(c) => match c.following() {
                Some(next) => ProblemBreaks(next),
                None => TimeAllocation,
            },
            TimeAllocation => BoardAssembly,
            BoardAssembly => PortfolioReview,
            PortfolioReview => Finalized,
            Finalized => Finalized,
            Abandoned => Abandoned,
        }
    }

    fn is_question(self) -> bool {
        use SetupState::*;

        matches!(
            self,
            ProblemsIdentify
                | ProblemBreaks(_)
                | ProblemScarcity(_)
                | ProblemAiSubstitutability(_)
                | ProblemErrorCost(_)
                | ProblemTrustAccess(_)
                | ProblemDirection(_)
                | TimeAllocation
        )
    }

    fn is_clarify(self) -> bool {
        self.parent_of().is_some()
    }

    fn clarify_of(self) -> Option<Self> {
        use SetupState::*;

        match self {
            ProblemsIdentify => Some(ProblemsIdentifyClarify),
            ProblemBreaks(c) => Some(ProblemBreaksClarify(c)),
            ProblemScarcity(c) => Some(ProblemScarcityClarify(c)),
            ProblemAiSubstitutability(c) => Some(ProblemAiSubstitutabilityClarify(c)),
            ProblemErrorCost(c) => Some(ProblemErrorCostClarify(c)),
            ProblemTrustAccess(c) => Some(ProblemTrustAccessClarify(c)),
            _ => None,
        }
    }

    fn parent_of(self) -> Option<Self> {
        use SetupState::*;

        match self {
            ProblemsIdentifyClarify => Some(ProblemsIdentify),
            ProblemBreaksClarify(c) => Some(ProblemBreaks(c)),
            ProblemScarcityClarify(c) => Some(ProblemScarcity(c)),
            ProblemAiSubstitutabilityClarify(c) => Some(ProblemAiSubstitutability(c)),
            ProblemErrorCostClarify(c) => Some(ProblemErrorCost(c)),
            ProblemTrustAccessClarify(c) => Some(ProblemTrustAccess(c)),
            _ => None,
        }
    }

    fn progress_weight(self) -> u8 {
        use SetupState::*;

        match self {
            Initial => 0,
            SensitivityGate => 5,
            ProblemsIdentify | ProblemsIdentifyClarify => 10,
            ProblemBreaks(c) | ProblemBreaksClarify(c) => c.weight(0),
            ProblemScarcity(c) | ProblemScarcityClarify(c) => c.weight(1),
            ProblemAiSubstitutability(c) | ProblemAiSubstitutabilityClarify(c) => c.weight(2),
            ProblemErrorCost(c) | ProblemErrorCostClarify(c) => c.weight(3),
            ProblemTrustAccess(c) | ProblemTrustAccessClarify(c) => c.weight(4),
            ProblemDirection(c) => c.weight(5),
            TimeAllocation => 80,
            BoardAssembly => 88,
            PortfolioReview => 95,
            Finalized | Abandoned => 100,
        }
    }

    fn is_derived(self) -> bool {
        matches!(self, SetupState::BoardAssembly)
    }

    fn label(self) -> &'static str {
        use SetupState::*;

        match self {
            Initial => "initial",
            SensitivityGate => "sensitivity_gate",
            ProblemsIdentify => "problems_identify",
            ProblemsIdentifyClarify => "problems_identify_clarify",
            ProblemBreaks(_) => "problem_breaks",
            ProblemBreaksClarify(_) => "problem_breaks_clarify",
            ProblemScarcity(_) => "problem_scarcity",
            ProblemScarcityClarify(_) => "problem_scarcity_clarify",
            ProblemAiSubstitutability(_) => "problem_ai_substitutability",
            ProblemAiSubstitutabilityClarify(_) => "problem_ai_substitutability_clarify",
            ProblemErrorCost(_) => "problem_error_cost",
            ProblemErrorCostClarify(_) => "problem_error_cost_clarify",
            ProblemTrustAccess(_) => "problem_trust_access",
            ProblemTrustAccessClarify(_) => "problem_trust_access_clarify",
            ProblemDirection(_) => "problem_direction",
            TimeAllocation => "time_allocation",
            BoardAssembly => "board_assembly",
            PortfolioReview => "portfolio_review",
            Finalized => "finalized",
            Abandoned => "abandoned",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::laws::assert_machine_laws;
    use crate::machine::path_to_terminal;

    #[test]
    fn test_setup_machine_laws() {
        assert_machine_laws(&SetupState::all());
    }

    #[test]
    fn test_loop_visits_every_problem() {
        for count in MIN_PROBLEMS..=MAX_PROBLEMS {
            let start = SetupState::ProblemBreaks(ProblemCursor::first(count));
            let path = path_to_terminal(start).unwrap();
            let directions = path
                .iter()
                .filter(|s| matches!(s, SetupState::ProblemDirection(_)))
                .count();
            assert_eq!(directions, usize::from(count));

            for pair in path.windows(2) {
                assert!(pair[0].progress_weight() <= pair[1].progress_weight());
            }
        }
    }

    #[test]
    fn test_resize_keeps_variant() {
        let state = SetupState::ProblemsIdentify.next().resized(5);
        assert_eq!(state, SetupState::ProblemBreaks(ProblemCursor { index: 0, count: 5 }));
        assert_eq!(SetupState::TimeAllocation.resized(4), SetupState::TimeAllocation);
        assert_eq!(
            SetupState::ProblemDirection(ProblemCursor { index: 4, count: 5 }).resized(9),
            SetupState::ProblemDirection(ProblemCursor { index: 4, count: 5 })
        );
    }

    #[test]
    fn test_direction_and_allocation_are_unchecked() {
        let c = ProblemCursor::first(3);
        assert!(!SetupState::ProblemDirection(c).requires_vagueness_check());
        assert!(!SetupState::TimeAllocation.requires_vagueness_check());
        assert!(SetupState::ProblemScarcity(c).requires_vagueness_check());
        assert!(SetupState::BoardAssembly.is_derived());
    }

    #[test]
    fn test_cursor_state_serialization() {
        let state = SetupState::ProblemErrorCostClarify(ProblemCursor { index: 2, count: 4 });
        let json = serde_json::to_string(&state).unwrap();
        let back: SetupState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }
}
