//! Session snapshots
//!
//! A session is an immutable value: every accepted answer produces a new
//! snapshot which the controller persists before taking the next input.
//! Re-hydrating the last persisted snapshot resumes the flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::machine::FlowState;
use crate::models::{BoardRole, FlowKind};

pub mod data;

pub use data::{
    AvoidedDecision, BetDraft, BoardCursor, BoardPhase, BoardQuestion, BoardResponse,
    ConcreteExample, DirectionShift, QuarterlyData, QuickData, SessionData, SetupData,
};

/// Clarify steps a user may decline per session.
pub const SKIP_BUDGET: u8 = 2;

/// Answer recorded for a declined clarify step.
pub const REFUSED_EXAMPLE: &str = "[example refused]";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QaEntry {
    pub question: String,
    pub answer: String,
    pub vague: bool,
    pub concrete_example: Option<String>,
    pub skipped: bool,
    /// Label of the state the answer was given in.
    pub state: String,
    #[serde(default)]
    pub problem_index: Option<usize>,
    #[serde(default)]
    pub persona_name: Option<String>,
    #[serde(default)]
    pub persona_role: Option<BoardRole>,
    pub answered_at: DateTime<Utc>,
}

impl QaEntry {
    pub fn answered(state: &str, question: impl Into<String>, answer: impl Into<String>, vague: bool) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            vague,
            concrete_example: None,
            skipped: false,
            state: state.to_string(),
            problem_index: None,
            persona_name: None,
            persona_role: None,
            answered_at: Utc::now(),
        }
    }

    /// Concrete example supplied in a clarify step.
    pub fn clarified(state: &str, question: impl Into<String>, example: impl Into<String>) -> Self {
        let example = example.into();
        let mut entry = Self::answered(state, question, example.clone(), false);
        entry.concrete_example = Some(example);
        entry
    }

    /// A declined clarify step. Always vague, always the refusal marker.
    pub fn skipped(state: &str, question: impl Into<String>) -> Self {
        let mut entry = Self::answered(state, question, REFUSED_EXAMPLE, true);
        entry.skipped = true;
        entry
    }

    pub fn for_problem(mut self, index: Option<usize>) -> Self {
        self.problem_index = index;
        self
    }

    pub fn asked_by(mut self, role: BoardRole, persona_name: impl Into<String>) -> Self {
        self.persona_role = Some(role);
        self.persona_name = Some(persona_name.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session<S, D> {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub flow: FlowKind,
    pub state: S,
    pub abstraction_mode: bool,
    pub skip_count: u8,
    pub transcript: Vec<QaEntry>,
    pub data: D,
    pub completed: bool,
    pub output: Option<String>,
    pub bet_id: Option<Uuid>,
    pub portfolio_version_id: Option<Uuid>,
    /// Fail-open vagueness checks in this session.
    #[serde(default)]
    pub provider_failures: u32,
    /// Bumped by the store on every successful save.
    pub revision: u64,
    #[serde(default)]
    pub snapshot_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<S: FlowState, D: SessionData> Session<S, D> {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            flow: S::FLOW,
            state: S::initial(),
            abstraction_mode: false,
            skip_count: 0,
            transcript: Vec::new(),
            data: D::default(),
            completed: false,
            output: None,
            bet_id: None,
            portfolio_version_id: None,
            provider_failures: 0,
            revision: 0,
            snapshot_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_skip(&self) -> bool {
        self.skip_count < SKIP_BUDGET
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_abandoned(&self) -> bool {
        self.state == S::abandoned()
    }

    pub fn progress(&self) -> u8 {
        self.state.progress_weight()
    }

    pub fn with_state(&self, state: S) -> Self {
        let mut next = self.clone();
        next.state = state;
        next.updated_at = Utc::now();
        next
    }

    pub fn with_entry(&self, entry: QaEntry) -> Self {
        let mut next = self.clone();
        next.transcript.push(entry);
        next.updated_at = Utc::now();
        next
    }

    pub fn with_data(&self, data: D) -> Self {
        let mut next = self.clone();
        next.data = data;
        next.updated_at = Utc::now();
        next
    }

    pub fn with_abstraction_mode(&self, enabled: bool) -> Self {
        let mut next = self.clone();
        next.abstraction_mode = enabled;
        next.updated_at = Utc::now();
        next
    }

    pub fn with_skip(&self) -> Self {
        let mut next = self.clone();
        next.skip_count = next.skip_count.saturating_add(1);
        next.updated_at = Utc::now();
        next
    }

    pub fn with_provider_failure(&self) -> Self {
        let mut next = self.clone();
        next.provider_failures += 1;
        next
    }

    pub fn completed_with(&self, output: Option<String>) -> Self {
        let mut next = self.with_state(S::finalized());
        next.completed = true;
        if output.is_some() {
            next.output = output;
        }
        next
    }

    pub fn abandoned(&self) -> Self {
        self.with_state(S::abandoned())
    }

    /// Last transcript entry recorded in `state`.
    pub fn last_answer_in(&self, state: S) -> Option<&QaEntry> {
        let label = state.label();
        self.transcript.iter().rev().find(|e| e.state == label)
    }
}
