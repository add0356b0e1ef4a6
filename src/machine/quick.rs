//! Quick Audit: five questions, one bet, one report.

use serde::{Deserialize, Serialize};

use super::FlowState;
use crate::models::FlowKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuickState {
    Initial,
    SensitivityGate,
    RoleContext,
    PaidProblems,
    PaidProblemsClarify,
    AvoidedDecision,
    AvoidedDecisionClarify,
    ComfortWork,
    ComfortWorkClarify,
    NinetyDayBet,
    NinetyDayBetClarify,
    GeneratingOutput,
    Finalized,
    Abandoned,
}

impl QuickState {
    pub const ALL: [QuickState; 14] = [
        QuickState::Initial,
        QuickState::SensitivityGate,
        QuickState::RoleContext,
        QuickState::PaidProblems,
        QuickState::PaidProblemsClarify,
        QuickState::AvoidedDecision,
        QuickState::AvoidedDecisionClarify,
        QuickState::ComfortWork,
        QuickState::ComfortWorkClarify,
        QuickState::NinetyDayBet,
        QuickState::NinetyDayBetClarify,
        QuickState::GeneratingOutput,
        QuickState::Finalized,
        QuickState::Abandoned,
    ];

    /// 1-based position among the five audit questions.
    pub fn question_number(self) -> Option<u8> {
        match self.parent_of().unwrap_or(self) {
            QuickState::RoleContext => Some(1),
            QuickState::PaidProblems => Some(2),
            QuickState::AvoidedDecision => Some(3),
            QuickState::ComfortWork => Some(4),
            QuickState::NinetyDayBet => Some(5),
            _ => None,
        }
    }
}

impl FlowState for QuickState {
    const FLOW: FlowKind = FlowKind::Quick;

    fn initial() -> Self {
        QuickState::Initial
    }

    fn finalized() -> Self {
        QuickState::Finalized
    }

    fn abandoned() -> Self {
        QuickState::Abandoned
    }

    fn next(self) -> Self {
        use QuickState::*;

        match self {
            Initial => SensitivityGate,
            SensitivityGate => RoleContext,
            RoleContext => PaidProblems,
            PaidProblems | PaidProblemsClarify => AvoidedDecision,
            AvoidedDecision | AvoidedDecisionClarify => ComfortWork,
            ComfortWork | ComfortWorkClarify => NinetyDayBet,
            NinetyDayBet | NinetyDayBetClarify => GeneratingOutput,
            GeneratingOutput => Finalized,
            Finalized => Finalized,
            Abandoned => Abandoned,
        }
    }

    fn is_question(self) -> bool {
        matches!(
            self,
            QuickState::RoleContext
                | QuickState::PaidProblems
                | QuickState::AvoidedDecision
                | QuickState::ComfortWork
                | QuickState::NinetyDayBet
        )
    }

    fn is_clarify(self) -> bool {
        self.parent_of().is_some()
    }

    fn clarify_of(self) -> Option<Self> {
        match self {
            QuickState::PaidProblems => Some(QuickState::PaidProblemsClarify),
            QuickState::AvoidedDecision => Some(QuickState::AvoidedDecisionClarify),
            QuickState::ComfortWork => Some(QuickState::ComfortWorkClarify),
            QuickState::NinetyDayBet => Some(QuickState::NinetyDayBetClarify),
            _ => None,
        }
    }

    fn parent_of(self) -> Option<Self> {
        match self {
            QuickState::PaidProblemsClarify => Some(QuickState::PaidProblems),
            QuickState::AvoidedDecisionClarify => Some(QuickState::AvoidedDecision),
            QuickState::ComfortWorkClarify => Some(QuickState::ComfortWork),
            QuickState::NinetyDayBetClarify => Some(QuickState::NinetyDayBet),
            _ => None,
        }
    }

    fn progress_weight(self) -> u8 {
        use QuickState::*;

        match self {
            Initial => 0,
            SensitivityGate => 5,
            RoleContext => 15,
            PaidProblems | PaidProblemsClarify => 30,
            AvoidedDecision | AvoidedDecisionClarify => 45,
            ComfortWork | ComfortWorkClarify => 60,
            NinetyDayBet | NinetyDayBetClarify => 75,
            GeneratingOutput => 90,
            Finalized | Abandoned => 100,
        }
    }

    fn label(self) -> &'static str {
        use QuickState::*;

        match self {
            Initial => "initial",
            SensitivityGate => "sensitivity_gate",
            RoleContext => "role_context",
            PaidProblems => "paid_problems",
            PaidProblemsClarify => "paid_problems_clarify",
            AvoidedDecision => "avoided_decision",
            AvoidedDecisionClarify => "avoided_decision_clarify",
            ComfortWork => "comfort_work",
            ComfortWorkClarify => "comfort_work_clarify",
            NinetyDayBet => "ninety_day_bet",
            NinetyDayBetClarify => "ninety_day_bet_clarify",
            GeneratingOutput => "generating_output",
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
    fn test_quick_machine_laws() {
        assert_machine_laws(&QuickState::ALL);
    }

    #[test]
    fn test_main_path_asks_five_questions() {
        let path = path_to_terminal(QuickState::Initial).unwrap();
        let questions = path.iter().filter(|s| s.is_question()).count();
        assert_eq!(questions, 5);
        assert!(path.iter().all(|s| !s.is_clarify()));
    }

    #[test]
    fn test_role_context_skips_gate() {
        assert!(!QuickState::RoleContext.requires_vagueness_check());
        assert!(QuickState::PaidProblems.requires_vagueness_check());
        assert!(!QuickState::PaidProblemsClarify.requires_vagueness_check());
    }

    #[test]
    fn test_clarify_advances_like_parent() {
        assert_eq!(QuickState::ComfortWorkClarify.next(), QuickState::ComfortWork.next());
        assert_eq!(QuickState::NinetyDayBetClarify.question_number(), Some(5));
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&QuickState::AvoidedDecisionClarify).unwrap();
        assert_eq!(json, "\"avoided_decision_clarify\"");
        let back: QuickState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, QuickState::AvoidedDecisionClarify);
    }
}
