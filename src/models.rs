//! Core data models shared by every flow

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::analysis::HealthComposition;
use crate::error::GovernanceError;
use crate::Result;

//
// ================= Flow =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FlowKind {
    Quick,
    Setup,
    Quarterly,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKind::Quick => "quick",
            FlowKind::Setup => "setup",
            FlowKind::Quarterly => "quarterly",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ================= Evidence & Direction =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Appreciating,
    Depreciating,
    Stable,
}

impl Direction {
    pub const ALL: [Direction; 3] = [
        Direction::Appreciating,
        Direction::Depreciating,
        Direction::Stable,
    ];
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Appreciating => "appreciating",
            Direction::Depreciating => "depreciating",
            Direction::Stable => "stable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceKind {
    Decision,
    Artifact,
    Calendar,
    Proxy,
    None,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceStrength {
    None,
    Weak,
    Medium,
    Strong,
}

impl EvidenceKind {
    /// Strength implied by the kind alone.
    pub fn default_strength(&self) -> EvidenceStrength {
        match self {
            EvidenceKind::Decision | EvidenceKind::Artifact => EvidenceStrength::Strong,
            EvidenceKind::Calendar | EvidenceKind::Proxy => EvidenceStrength::Medium,
            EvidenceKind::None => EvidenceStrength::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    pub evidence_id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub problem_id: Option<Uuid>,
    pub description: String,
    pub kind: EvidenceKind,
    pub strength: EvidenceStrength,
    pub context: Option<String>,
    /// Set whenever `strength` departs from the kind's default.
    #[serde(default)]
    pub strength_override: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EvidenceItem {
    pub fn new(
        user_id: Uuid,
        session_id: Uuid,
        description: impl Into<String>,
        kind: EvidenceKind,
    ) -> Self {
        Self {
            evidence_id: Uuid::new_v4(),
            user_id,
            session_id,
            problem_id: None,
            description: description.into(),
            kind,
            strength: kind.default_strength(),
            context: None,
            strength_override: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_problem(mut self, problem_id: Option<Uuid>) -> Self {
        self.problem_id = problem_id;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Replace the default strength. The reason is kept on the record.
    pub fn override_strength(mut self, strength: EvidenceStrength, reason: impl Into<String>) -> Self {
        if strength != self.kind.default_strength() {
            self.strength = strength;
            self.strength_override = Some(reason.into());
        }
        self
    }
}

//
// ================= Problem =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Scarcity {
    Signals { signals: Vec<String> },
    Unknown { reason: String },
}

impl Scarcity {
    pub fn is_complete(&self) -> bool {
        match self {
            Scarcity::Signals { signals } => {
                signals.len() >= 2 && signals.iter().all(|s| !s.trim().is_empty())
            }
            Scarcity::Unknown { reason } => !reason.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Problem {
    pub problem_id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub name: String,
    pub what_breaks: String,
    pub scarcity: Option<Scarcity>,
    pub ai_substitutability: String,
    pub error_cost: String,
    pub trust_required: String,
    pub direction: Option<Direction>,
    pub direction_rationale: String,
    /// Only meaningful once the portfolio is published.
    pub time_allocation_percent: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Problem {
    pub fn named(user_id: Uuid, session_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            problem_id: Uuid::new_v4(),
            user_id,
            session_id,
            name: name.into(),
            what_breaks: String::new(),
            scarcity: None,
            ai_substitutability: String::new(),
            error_cost: String::new(),
            trust_required: String::new(),
            direction: None,
            direction_rationale: String::new(),
            time_allocation_percent: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        let filled = |s: &str| !s.trim().is_empty();

        filled(&self.name)
            && filled(&self.what_breaks)
            && self.scarcity.as_ref().map(Scarcity::is_complete).unwrap_or(false)
            && filled(&self.ai_substitutability)
            && filled(&self.error_cost)
            && filled(&self.trust_required)
            && self.direction.is_some()
            && filled(&self.direction_rationale)
    }

    /// Names of the fields still empty, for validation messages.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let empty = |s: &str| s.trim().is_empty();

        if empty(&self.name) {
            missing.push("name");
        }
        if empty(&self.what_breaks) {
            missing.push("what_breaks");
        }
        if !self.scarcity.as_ref().map(Scarcity::is_complete).unwrap_or(false) {
            missing.push("scarcity");
        }
        if empty(&self.ai_substitutability) {
            missing.push("ai_substitutability");
        }
        if empty(&self.error_cost) {
            missing.push("error_cost");
        }
        if empty(&self.trust_required) {
            missing.push("trust_required");
        }
        if self.direction.is_none() {
            missing.push("direction");
        }
        if empty(&self.direction_rationale) {
            missing.push("direction_rationale");
        }
        missing
    }
}

//
// ================= Board =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BoardRole {
    Accountability,
    MarketReality,
    Avoidance,
    LongTermPositioning,
    DevilsAdvocate,
    OpportunityScout,
    NetworkBuilder,
}

impl BoardRole {
    /// Roster order for the core interrogation phase.
    pub const CORE: [BoardRole; 5] = [
        BoardRole::Accountability,
        BoardRole::MarketReality,
        BoardRole::Avoidance,
        BoardRole::LongTermPositioning,
        BoardRole::DevilsAdvocate,
    ];

    /// Roster order for the growth phase.
    pub const GROWTH: [BoardRole; 2] = [BoardRole::OpportunityScout, BoardRole::NetworkBuilder];

    pub fn is_growth(&self) -> bool {
        matches!(self, BoardRole::OpportunityScout | BoardRole::NetworkBuilder)
    }

    pub fn title(&self) -> &'static str {
        match self {
            BoardRole::Accountability => "Accountability Partner",
            BoardRole::MarketReality => "Market Reality Check",
            BoardRole::Avoidance => "Avoidance Hunter",
            BoardRole::LongTermPositioning => "Long-term Positioning",
            BoardRole::DevilsAdvocate => "Devil's Advocate",
            BoardRole::OpportunityScout => "Opportunity Scout",
            BoardRole::NetworkBuilder => "Network Builder",
        }
    }

    /// What this seat exists to press on.
    pub fn mandate(&self) -> &'static str {
        match self {
            BoardRole::Accountability => "holds you to what you said you would do",
            BoardRole::MarketReality => "tests whether the market still pays for this work",
            BoardRole::Avoidance => "finds the decision you keep postponing",
            BoardRole::LongTermPositioning => "asks where this leaves you in five years",
            BoardRole::DevilsAdvocate => "argues the opposite of your current story",
            BoardRole::OpportunityScout => "pushes you to compound an appreciating skill",
            BoardRole::NetworkBuilder => "asks who needs to know about your best work",
        }
    }

    /// Persona used when the collaborator cannot produce one.
    pub fn default_persona(&self) -> PersonaProfile {
        let (name, background, style, phrase) = match self {
            BoardRole::Accountability => (
                "Maya Chen",
                "Former operations lead who ran weekly commitment reviews",
                "Direct and brief; quotes your own words back to you",
                Some("You said you would. Did you?"),
            ),
            BoardRole::MarketReality => (
                "Marcus Webb",
                "Recruiter turned labor-market analyst",
                "Data first; asks what someone would pay for this today",
                Some("Who is paying for this next year?"),
            ),
            BoardRole::Avoidance => (
                "Dr. Elena Vasquez",
                "Organizational psychologist focused on decision paralysis",
                "Calm, patient, relentless about the uncomfortable question",
                Some("What are you not saying?"),
            ),
            BoardRole::LongTermPositioning => (
                "James Okafor",
                "Career strategist who tracks ten-year skill curves",
                "Zooms out; frames everything as a compounding bet",
                Some("Where does this leave you in five years?"),
            ),
            BoardRole::DevilsAdvocate => (
                "Sam Rivera",
                "Former debate coach and startup board member",
                "Contrarian by design; steelmans the opposite view",
                Some("Convince me you're wrong."),
            ),
            BoardRole::OpportunityScout => (
                "Priya Sharma",
                "Venture scout who spots emerging roles early",
                "Energetic; looks for leverage and adjacent bets",
                Some("How do you double down?"),
            ),
            BoardRole::NetworkBuilder => (
                "Daniel Kim",
                "Community builder and former developer advocate",
                "Warm but specific about names and introductions",
                Some("Who should know about this?"),
            ),
        };

        PersonaProfile {
            name: name.to_string(),
            background: background.to_string(),
            communication_style: style.to_string(),
            signature_phrase: phrase.map(str::to_string),
        }
    }
}

impl fmt::Display for BoardRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonaProfile {
    pub name: String,
    pub background: String,
    pub communication_style: String,
    pub signature_phrase: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardMember {
    pub member_id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub role: BoardRole,
    pub is_growth: bool,
    pub active: bool,
    pub anchored_problem_id: Option<Uuid>,
    pub anchored_problem_name: String,
    pub anchored_demand: String,
    pub persona: PersonaProfile,
    pub created_at: DateTime<Utc>,
}

/// Check the roster invariants: exactly the five core roles active, and
/// growth seats only when something in the portfolio is appreciating.
pub fn validate_board(members: &[BoardMember], problems: &[Problem]) -> Result<()> {
    for role in BoardRole::CORE {
        let active = members
            .iter()
            .filter(|m| m.active && m.role == role)
            .count();
        if active != 1 {
            return Err(GovernanceError::Validation(format!(
                "Board must have exactly one active {} seat, found {}",
                role, active
            )));
        }
    }

    let growth = members.iter().filter(|m| m.active && m.is_growth).count();
    let has_appreciating = problems
        .iter()
        .any(|p| p.direction == Some(Direction::Appreciating));

    if growth > BoardRole::GROWTH.len() {
        return Err(GovernanceError::Validation(format!(
            "At most {} growth seats allowed, found {}",
            BoardRole::GROWTH.len(),
            growth
        )));
    }
    if growth > 0 && !has_appreciating {
        return Err(GovernanceError::Validation(
            "Growth seats require at least one appreciating problem".to_string(),
        ));
    }

    Ok(())
}

//
// ================= Bet =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    Open,
    Correct,
    Wrong,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bet {
    pub bet_id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub prediction: String,
    pub wrong_if: String,
    pub duration_days: u32,
    pub status: BetStatus,
    pub created_at: DateTime<Utc>,
    pub evaluated_at: Option<DateTime<Utc>>,
    pub evaluation_session_id: Option<Uuid>,
}

impl Bet {
    pub fn new(
        user_id: Uuid,
        session_id: Uuid,
        prediction: impl Into<String>,
        wrong_if: impl Into<String>,
        duration_days: u32,
    ) -> Self {
        Self {
            bet_id: Uuid::new_v4(),
            user_id,
            session_id,
            prediction: prediction.into(),
            wrong_if: wrong_if.into(),
            duration_days,
            status: BetStatus::Open,
            created_at: Utc::now(),
            evaluated_at: None,
            evaluation_session_id: None,
        }
    }

    pub fn due_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::days(i64::from(self.duration_days))
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.due_at()
    }

    /// Close an open bet. A bet still before its due date can only be
    /// judged correct or wrong; `expired` needs the due date to have passed.
    pub fn evaluate(
        &self,
        status: BetStatus,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Bet> {
        if self.status != BetStatus::Open {
            return Err(GovernanceError::Validation(format!(
                "Bet {} was already evaluated as {:?}",
                self.bet_id, self.status
            )));
        }

        match status {
            BetStatus::Open => {
                return Err(GovernanceError::Validation(
                    "An evaluation must move the bet out of open".to_string(),
                ))
            }
            BetStatus::Expired if !self.is_due(now) => {
                return Err(GovernanceError::Validation(format!(
                    "Bet {} is not due until {}; only correct or wrong are allowed",
                    self.bet_id,
                    self.due_at().format("%Y-%m-%d")
                )))
            }
            _ => {}
        }

        let mut evaluated = self.clone();
        evaluated.status = status;
        evaluated.evaluated_at = Some(now);
        evaluated.evaluation_session_id = Some(session_id);
        Ok(evaluated)
    }
}

//
// ================= Portfolio Version & Triggers =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioVersion {
    pub version_id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub version: u32,
    pub problem_ids: Vec<Uuid>,
    pub health: HealthComposition,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    DepreciatingMajority,
    DepreciatingTrend,
    NoAppreciating,
    StalePortfolio,
    RepeatedBetMiss,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerRecord {
    pub trigger_id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub kind: TriggerKind,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}
