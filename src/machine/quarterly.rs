//! Quarterly Review: ten questions, two analytic steps and the board.
//!
//! Both board phases share one clarify state. Its parent depends on which
//! phase is running, so `parent_of` leaves it unmapped and the controller
//! resolves it from the session's board cursor.

use serde::{Deserialize, Serialize};

use super::FlowState;
use crate::models::FlowKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuarterlyState {
    Initial,
    SensitivityGate,
    LastBetReview,
    CommitmentsVsActual,
    CommitmentsVsActualClarify,
    AvoidedDecision,
    AvoidedDecisionClarify,
    ComfortWork,
    ComfortWorkClarify,
    PortfolioCheck,
    PortfolioCheckClarify,
    PortfolioHealthUpdate,
    AppreciatingEvidence,
    AppreciatingEvidenceClarify,
    CoreBoardInterrogation,
    GrowthBoardInterrogation,
    BoardInterrogationClarify,
    TriggerCheck,
    NextQuarterCommitments,
    NextQuarterCommitmentsClarify,
    NewBet,
    NewBetClarify,
    GeneratingReport,
    Finalized,
    Abandoned,
}

impl QuarterlyState {
    pub const ALL: [QuarterlyState; 25] = [
        QuarterlyState::Initial,
        QuarterlyState::SensitivityGate,
        QuarterlyState::LastBetReview,
        QuarterlyState::CommitmentsVsActual,
        QuarterlyState::CommitmentsVsActualClarify,
        QuarterlyState::AvoidedDecision,
        QuarterlyState::AvoidedDecisionClarify,
        QuarterlyState::ComfortWork,
        QuarterlyState::ComfortWorkClarify,
        QuarterlyState::PortfolioCheck,
        QuarterlyState::PortfolioCheckClarify,
        QuarterlyState::PortfolioHealthUpdate,
        QuarterlyState::AppreciatingEvidence,
        QuarterlyState::AppreciatingEvidenceClarify,
        QuarterlyState::CoreBoardInterrogation,
        QuarterlyState::GrowthBoardInterrogation,
        QuarterlyState::BoardInterrogationClarify,
        QuarterlyState::TriggerCheck,
        QuarterlyState::NextQuarterCommitments,
        QuarterlyState::NextQuarterCommitmentsClarify,
        QuarterlyState::NewBet,
        QuarterlyState::NewBetClarify,
        QuarterlyState::GeneratingReport,
        QuarterlyState::Finalized,
        QuarterlyState::Abandoned,
    ];

    /// 1-based position among the ten review questions.
    pub fn question_number(self) -> Option<u8> {
        use QuarterlyState::*;

        match self.parent_of().unwrap_or(self) {
            LastBetReview => Some(1),
            CommitmentsVsActual => Some(2),
            AvoidedDecision => Some(3),
            ComfortWork => Some(4),
            PortfolioCheck => Some(5),
            AppreciatingEvidence => Some(6),
            CoreBoardInterrogation => Some(7),
            GrowthBoardInterrogation => Some(8),
            NextQuarterCommitments => Some(9),
            NewBet => Some(10),
            _ => None,
        }
    }

    pub fn is_board(self) -> bool {
        matches!(
            self,
            QuarterlyState::CoreBoardInterrogation
                | QuarterlyState::GrowthBoardInterrogation
                | QuarterlyState::BoardInterrogationClarify
        )
    }
}

impl FlowState for QuarterlyState {
    const FLOW: FlowKind = FlowKind::Quarterly;

    fn initial() -> Self {
        QuarterlyState::Initial
    }

    fn finalized() -> Self {
        QuarterlyState::Finalized
    }

    fn abandoned() -> Self {
        QuarterlyState::Abandoned
    }

    fn next(self) -> Self {
        use QuarterlyState::*;

        match self {
            Initial => SensitivityGate,
            SensitivityGate => LastBetReview,
            LastBetReview => CommitmentsVsActual,
            CommitmentsVsActual | CommitmentsVsActualClarify => AvoidedDecision,
            AvoidedDecision | AvoidedDecisionClarify => ComfortWork,
            ComfortWork | ComfortWorkClarify => PortfolioCheck,
            PortfolioCheck | PortfolioCheckClarify => PortfolioHealthUpdate,
            PortfolioHealthUpdate => AppreciatingEvidence,
            AppreciatingEvidence | AppreciatingEvidenceClarify => CoreBoardInterrogation,
            CoreBoardInterrogation => GrowthBoardInterrogation,
            // Static fallback only; the controller resolves the real target.
            BoardInterrogationClarify => GrowthBoardInterrogation,
            GrowthBoardInterrogation => TriggerCheck,
            TriggerCheck => NextQuarterCommitments,
            NextQuarterCommitments | NextQuarterCommitmentsClarify => NewBet,
            NewBet | NewBetClarify => GeneratingReport,
            GeneratingReport => Finalized,
            Finalized => Finalized,
            Abandoned => Abandoned,
        }
    }

    fn is_question(self) -> bool {
        use QuarterlyState::*;

        matches!(
            self,
            LastBetReview
                | CommitmentsVsActual
                | AvoidedDecision
                | ComfortWork
                | PortfolioCheck
                | AppreciatingEvidence
                | CoreBoardInterrogation
                | GrowthBoardInterrogation
                | NextQuarterCommitments
                | NewBet
        )
    }

    fn is_clarify(self) -> bool {
        self == QuarterlyState::BoardInterrogationClarify || self.parent_of().is_some()
    }

    fn clarify_of(self) -> Option<Self> {
        use QuarterlyState::*;

        match self {
            CommitmentsVsActual => Some(CommitmentsVsActualClarify),
            AvoidedDecision => Some(AvoidedDecisionClarify),
            ComfortWork => Some(ComfortWorkClarify),
            PortfolioCheck => Some(PortfolioCheckClarify),
            AppreciatingEvidence => Some(AppreciatingEvidenceClarify),
            CoreBoardInterrogation | GrowthBoardInterrogation => Some(BoardInterrogationClarify),
            NextQuarterCommitments => Some(NextQuarterCommitmentsClarify),
            NewBet => Some(NewBetClarify),
            _ => None,
        }
    }

    fn parent_of(self) -> Option<Self> {
        use QuarterlyState::*;

        match self {
            CommitmentsVsActualClarify => Some(CommitmentsVsActual),
            AvoidedDecisionClarify => Some(AvoidedDecision),
            ComfortWorkClarify => Some(ComfortWork),
            PortfolioCheckClarify => Some(PortfolioCheck),
            AppreciatingEvidenceClarify => Some(AppreciatingEvidence),
            NextQuarterCommitmentsClarify => Some(NextQuarterCommitments),
            NewBetClarify => Some(NewBet),
            _ => None,
        }
    }

    fn progress_weight(self) -> u8 {
        use QuarterlyState::*;

        match self {
            Initial => 0,
            SensitivityGate => 4,
            LastBetReview => 8,
            CommitmentsVsActual | CommitmentsVsActualClarify => 16,
            AvoidedDecision | AvoidedDecisionClarify => 24,
            ComfortWork | ComfortWorkClarify => 32,
            PortfolioCheck | PortfolioCheckClarify => 40,
            PortfolioHealthUpdate => 46,
            AppreciatingEvidence | AppreciatingEvidenceClarify => 52,
            // One weight for the whole board loop; the shared clarify
            // state serves both phases.
            CoreBoardInterrogation | GrowthBoardInterrogation | BoardInterrogationClarify => 64,
            TriggerCheck => 74,
            NextQuarterCommitments | NextQuarterCommitmentsClarify => 80,
            NewBet | NewBetClarify => 88,
            GeneratingReport => 95,
            Finalized | Abandoned => 100,
        }
    }

    fn is_derived(self) -> bool {
        matches!(
            self,
            QuarterlyState::PortfolioHealthUpdate | QuarterlyState::TriggerCheck
        )
    }

    fn label(self) -> &'static str {
        use QuarterlyState::*;

        match self {
            Initial => "initial",
            SensitivityGate => "sensitivity_gate",
            LastBetReview => "last_bet_review",
            CommitmentsVsActual => "commitments_vs_actual",
            CommitmentsVsActualClarify => "commitments_vs_actual_clarify",
            AvoidedDecision => "avoided_decision",
            AvoidedDecisionClarify => "avoided_decision_clarify",
            ComfortWork => "comfort_work",
            ComfortWorkClarify => "comfort_work_clarify",
            PortfolioCheck => "portfolio_check",
            PortfolioCheckClarify => "portfolio_check_clarify",
            PortfolioHealthUpdate => "portfolio_health_update",
            AppreciatingEvidence => "appreciating_evidence",
            AppreciatingEvidenceClarify => "appreciating_evidence_clarify",
            CoreBoardInterrogation => "core_board_interrogation",
            GrowthBoardInterrogation => "growth_board_interrogation",
            BoardInterrogationClarify => "board_interrogation_clarify",
            TriggerCheck => "trigger_check",
            NextQuarterCommitments => "next_quarter_commitments",
            NextQuarterCommitmentsClarify => "next_quarter_commitments_clarify",
            NewBet => "new_bet",
            NewBetClarify => "new_bet_clarify",
            GeneratingReport => "generating_report",
            Finalized => "finalized",
            Abandoned => "abandoned",
        }
    }
}
