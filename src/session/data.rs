//! Per-flow accumulators
//!
//! Plain data mirroring what each flow collects. Builders consume and
//! return a new value; nothing mutates a persisted snapshot in place.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use uuid::Uuid;

use crate::analysis::{AllocationCheck, FiredTrigger, HealthComposition, HealthTrend};
use crate::models::{Bet, BetStatus, BoardMember, BoardRole, Direction, Problem};

pub trait SessionData:
    Clone + Debug + Default + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> SessionData for T where
    T: Clone + Debug + Default + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConcreteExample {
    /// Label of the question the example backs up.
    pub question: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvoidedDecision {
    pub decision: String,
    pub cost: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BetDraft {
    pub prediction: String,
    pub wrong_if: String,
    pub duration_days: u32,
}

//
// ================= Quick Audit =================
//

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QuickData {
    pub role_context: Option<String>,
    pub problems: Vec<String>,
    pub avoided_decision: Option<AvoidedDecision>,
    pub comfort_work: Option<String>,
    pub bet: Option<BetDraft>,
    pub examples: Vec<ConcreteExample>,
}

impl QuickData {
    pub fn with_role_context(mut self, text: impl Into<String>) -> Self {
        self.role_context = Some(text.into());
        self
    }

    pub fn with_problems(mut self, problems: Vec<String>) -> Self {
        self.problems = problems;
        self
    }

    pub fn with_avoided_decision(mut self, decision: AvoidedDecision) -> Self {
        self.avoided_decision = Some(decision);
        self
    }

    pub fn with_comfort_work(mut self, text: impl Into<String>) -> Self {
        self.comfort_work = Some(text.into());
        self
    }

    pub fn with_bet(mut self, bet: BetDraft) -> Self {
        self.bet = Some(bet);
        self
    }

    pub fn with_example(mut self, question: &str, text: impl Into<String>) -> Self {
        self.examples.push(ConcreteExample {
            question: question.to_string(),
            text: text.into(),
        });
        self
    }
}

//
// ================= Portfolio Setup =================
//

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SetupData {
    pub problems: Vec<Problem>,
    pub allocation: Option<AllocationCheck>,
    pub board: Vec<BoardMember>,
    pub health: Option<HealthComposition>,
    pub examples: Vec<ConcreteExample>,
}

impl SetupData {
    pub fn with_problems(mut self, problems: Vec<Problem>) -> Self {
        self.problems = problems;
        self
    }

    /// Apply `edit` to the problem at `index`; out-of-range is a no-op.
    pub fn with_problem_edit(mut self, index: usize, edit: impl FnOnce(&mut Problem)) -> Self {
        if let Some(problem) = self.problems.get_mut(index) {
            edit(problem);
        }
        self
    }

    pub fn with_allocations(mut self, allocations: &[u32], check: AllocationCheck) -> Self {
        for (problem, percent) in self.problems.iter_mut().zip(allocations) {
            problem.time_allocation_percent = Some(*percent);
        }
        self.health = Some(HealthComposition::from_problems(&self.problems));
        self.allocation = Some(check);
        self
    }

    pub fn with_board(mut self, board: Vec<BoardMember>) -> Self {
        self.board = board;
        self
    }

    pub fn with_example(mut self, question: &str, text: impl Into<String>) -> Self {
        self.examples.push(ConcreteExample {
            question: question.to_string(),
            text: text.into(),
        });
        self
    }

    pub fn has_appreciating(&self) -> bool {
        self.problems
            .iter()
            .any(|p| p.direction == Some(Direction::Appreciating))
    }
}

//
// ================= Quarterly Review =================
//

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BoardPhase {
    #[default]
    Core,
    Growth,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardQuestion {
    pub member_id: Uuid,
    pub role: BoardRole,
    pub persona_name: String,
    pub problem_name: String,
    pub question: String,
}

/// Which persona is waiting for an answer. Kept beside the state tag
/// because the shared board clarify state cannot say which phase it
/// belongs to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BoardCursor {
    pub phase: BoardPhase,
    pub pending_index: usize,
    pub pending: Option<BoardQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardResponse {
    pub member_id: Uuid,
    pub role: BoardRole,
    pub persona_name: String,
    pub problem_name: String,
    pub question: String,
    pub answer: String,
    pub vague: bool,
    pub concrete_example: Option<String>,
    pub skipped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectionShift {
    pub problem_id: Uuid,
    pub problem_name: String,
    pub from: Option<Direction>,
    pub to: Direction,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QuarterlyData {
    /// Baseline portfolio the review is run against.
    pub portfolio_version_id: Option<Uuid>,
    pub problems: Vec<Problem>,
    pub board: Vec<BoardMember>,
    pub reviewed_bet: Option<Bet>,
    pub bet_outcome: Option<BetStatus>,
    pub bet_reflection: Option<String>,
    pub commitments_review: Option<String>,
    pub avoided_decision: Option<AvoidedDecision>,
    pub comfort_work: Option<String>,
    pub portfolio_check: Option<String>,
    pub direction_shifts: Vec<DirectionShift>,
    pub previous_health: Option<HealthComposition>,
    pub current_health: Option<HealthComposition>,
    pub health_trend: Option<HealthTrend>,
    pub evidence_ids: Vec<Uuid>,
    pub board_cursor: BoardCursor,
    pub growth_active: bool,
    pub core_responses: Vec<BoardResponse>,
    pub growth_responses: Vec<BoardResponse>,
    pub triggers: Vec<FiredTrigger>,
    pub triggers_evaluated: bool,
    pub next_quarter_commitments: Option<String>,
    pub new_bet: Option<BetDraft>,
    pub examples: Vec<ConcreteExample>,
}

impl QuarterlyData {
    pub fn core_roster_size(&self) -> usize {
        BoardRole::CORE.len()
    }

    pub fn growth_roster_size(&self) -> usize {
        if self.growth_active {
            BoardRole::GROWTH.len()
        } else {
            0
        }
    }

    pub fn roster_size(&self, phase: BoardPhase) -> usize {
        match phase {
            BoardPhase::Core => self.core_roster_size(),
            BoardPhase::Growth => self.growth_roster_size(),
        }
    }

    pub fn responses(&self, phase: BoardPhase) -> &[BoardResponse] {
        match phase {
            BoardPhase::Core => &self.core_responses,
            BoardPhase::Growth => &self.growth_responses,
        }
    }

    pub fn all_core_board_responded(&self) -> bool {
        self.core_responses.len() == self.core_roster_size()
    }

    pub fn all_growth_board_responded(&self) -> bool {
        self.growth_responses.len() == self.growth_roster_size()
    }

    pub fn with_board_response(mut self, phase: BoardPhase, response: BoardResponse) -> Self {
        match phase {
            BoardPhase::Core => self.core_responses.push(response),
            BoardPhase::Growth => self.growth_responses.push(response),
        }
        self
    }

    pub fn with_board_cursor(mut self, cursor: BoardCursor) -> Self {
        self.board_cursor = cursor;
        self
    }

    /// Problems with this quarter's direction shifts applied.
    pub fn current_problems(&self) -> Vec<Problem> {
        let mut problems = self.problems.clone();
        for shift in &self.direction_shifts {
            if let Some(p) = problems.iter_mut().find(|p| p.problem_id == shift.problem_id) {
                p.direction = Some(shift.to);
            }
        }
        problems
    }

    pub fn with_example(mut self, question: &str, text: impl Into<String>) -> Self {
        self.examples.push(ConcreteExample {
            question: question.to_string(),
            text: text.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(role: BoardRole) -> BoardResponse {
        BoardResponse {
            member_id: Uuid::new_v4(),
            role,
            persona_name: role.default_persona().name,
            problem_name: "Hiring".to_string(),
            question: "What did you decide?".to_string(),
            answer: "Closed the Berlin req on Monday".to_string(),
            vague: false,
            concrete_example: None,
            skipped: false,
        }
    }

    #[test]
    fn test_core_completion_requires_five() {
        let mut data = QuarterlyData::default();
        for (i, role) in BoardRole::CORE.iter().enumerate() {
            assert!(!data.all_core_board_responded(), "complete after {}", i);
            data = data.with_board_response(BoardPhase::Core, response(*role));
        }
        assert!(data.all_core_board_responded());
    }

    #[test]
    fn test_growth_completion() {
        let inactive = QuarterlyData::default();
        assert!(inactive.all_growth_board_responded());

        let mut active = QuarterlyData {
            growth_active: true,
            ..QuarterlyData::default()
        };
        assert!(!active.all_growth_board_responded());
        active = active.with_board_response(BoardPhase::Growth, response(BoardRole::OpportunityScout));
        assert!(!active.all_growth_board_responded());
        active = active.with_board_response(BoardPhase::Growth, response(BoardRole::NetworkBuilder));
        assert!(active.all_growth_board_responded());
    }

    #[test]
    fn test_direction_shifts_apply_to_current_problems() {
        let mut problem = Problem::named(Uuid::new_v4(), Uuid::new_v4(), "Reporting");
        problem.direction = Some(Direction::Stable);
        let data = QuarterlyData {
            direction_shifts: vec![DirectionShift {
                problem_id: problem.problem_id,
                problem_name: problem.name.clone(),
                from: Some(Direction::Stable),
                to: Direction::Depreciating,
            }],
            problems: vec![problem],
            ..QuarterlyData::default()
        };

        let current = data.current_problems();
        assert_eq!(current[0].direction, Some(Direction::Depreciating));
        assert_eq!(data.problems[0].direction, Some(Direction::Stable));
    }

    #[test]
    fn test_quarterly_data_round_trip() {
        let data = QuarterlyData {
            growth_active: true,
            board_cursor: BoardCursor {
                phase: BoardPhase::Growth,
                pending_index: 1,
                pending: None,
            },
            ..QuarterlyData::default()
        }
        .with_board_response(BoardPhase::Core, response(BoardRole::Accountability));

        let json = serde_json::to_string(&data).unwrap();
        let back: QuarterlyData = serde_json::from_str(&json).unwrap();
        assert_eq!(data, back);
    }

    #[test]
    fn test_setup_data_round_trip() {
        let (user, session) = (Uuid::new_v4(), Uuid::new_v4());
        let data = SetupData::default()
            .with_problems(vec![
                crate::models::Problem::named(user, session, "Vendor renewals"),
                crate::models::Problem::named(user, session, "Hiring"),
            ])
            .with_problem_edit(0, |p| {
                p.scarcity = Some(crate::models::Scarcity::Signals {
                    signals: vec!["Only two people can do it".to_string(), "Recruiters fail".to_string()],
                });
                p.direction = Some(Direction::Appreciating);
            })
            .with_problem_edit(1, |p| {
                p.scarcity = Some(crate::models::Scarcity::Unknown { reason: "New market".to_string() });
            });

        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains(r#""type":"unknown""#));
        let back: SetupData = serde_json::from_str(&json).unwrap();
        assert_eq!(data, back);
    }
}
