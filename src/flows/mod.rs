//! Flow controllers
//!
//! One controller per flow. Each accepted answer is resolved into a new
//! session snapshot and persisted before the call returns; derived steps
//! run inside the same call. The helpers here are shared by all three.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit;
use crate::error::GovernanceError;
use crate::generation::TextGenerator;
use crate::machine::{FlowState, QuarterlyState, QuickState, SetupState};
use crate::models::{Bet, BoardMember, EvidenceItem, PortfolioVersion, Problem, TriggerRecord};
use crate::session::{QaEntry, QuarterlyData, QuickData, Session, SessionData, SetupData, SKIP_BUDGET};
use crate::state::{
    AbstractionPreference, InMemoryPreferencesStore, InMemoryRepository, InMemorySessionStore,
    PgRepository, PreferencesStore, Repository, SessionStore,
};
use crate::vagueness::{VaguenessGate, VerdictSource};
use crate::Result;

pub mod board;
pub mod extract;
pub mod quarterly;
pub mod quick;
pub mod setup;

pub use quarterly::QuarterlyReviewController;
pub use quick::QuickAuditController;
pub use setup::PortfolioSetupController;

pub const SENSITIVITY_QUESTION: &str = "Some answers may name people, clients or employers. \
Do you want abstraction mode, where reports refer to them generically? \
Say \"remember\" to keep this choice for next time.";

pub struct Repositories {
    pub problems: Arc<dyn Repository<Problem>>,
    pub board_members: Arc<dyn Repository<BoardMember>>,
    pub bets: Arc<dyn Repository<Bet>>,
    pub evidence: Arc<dyn Repository<EvidenceItem>>,
    pub triggers: Arc<dyn Repository<TriggerRecord>>,
    pub portfolio_versions: Arc<dyn Repository<PortfolioVersion>>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            problems: Arc::new(InMemoryRepository::new()),
            board_members: Arc::new(InMemoryRepository::new()),
            bets: Arc::new(InMemoryRepository::new()),
            evidence: Arc::new(InMemoryRepository::new()),
            triggers: Arc::new(InMemoryRepository::new()),
            portfolio_versions: Arc::new(InMemoryRepository::new()),
        }
    }

    /// Artifacts kept in Postgres, sharing one pool.
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            problems: Arc::new(PgRepository::<Problem>::new(pool.clone())),
            board_members: Arc::new(PgRepository::<BoardMember>::new(pool.clone())),
            bets: Arc::new(PgRepository::<Bet>::new(pool.clone())),
            evidence: Arc::new(PgRepository::<EvidenceItem>::new(pool.clone())),
            triggers: Arc::new(PgRepository::<TriggerRecord>::new(pool.clone())),
            portfolio_versions: Arc::new(PgRepository::<PortfolioVersion>::new(pool)),
        }
    }

    /// Most recent portfolio version for a user.
    pub async fn latest_portfolio(&self, user_id: Uuid) -> Result<Option<PortfolioVersion>> {
        let versions = self.portfolio_versions.list_for_user(user_id).await?;
        Ok(versions.into_iter().max_by_key(|v| v.version))
    }
}

/// Collaborators shared by every controller.
pub struct EngineContext {
    pub generator: Arc<dyn TextGenerator>,
    pub gate: VaguenessGate,
    pub repositories: Repositories,
    pub preferences: Arc<dyn PreferencesStore>,
}

impl EngineContext {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        repositories: Repositories,
        preferences: Arc<dyn PreferencesStore>,
    ) -> Self {
        Self {
            gate: VaguenessGate::new(generator.clone()),
            generator,
            repositories,
            preferences,
        }
    }

    pub fn in_memory(generator: Arc<dyn TextGenerator>) -> Self {
        Self::new(
            generator,
            Repositories::in_memory(),
            Arc::new(InMemoryPreferencesStore::new()),
        )
    }
}

/// The three controllers over one shared context.
pub struct Engine {
    pub quick: Arc<QuickAuditController>,
    pub setup: Arc<PortfolioSetupController>,
    pub quarterly: Arc<QuarterlyReviewController>,
}

impl Engine {
    pub fn new(
        ctx: Arc<EngineContext>,
        quick_sessions: Arc<dyn SessionStore<QuickState, QuickData>>,
        setup_sessions: Arc<dyn SessionStore<SetupState, SetupData>>,
        quarterly_sessions: Arc<dyn SessionStore<QuarterlyState, QuarterlyData>>,
    ) -> Self {
        Self {
            quick: Arc::new(QuickAuditController::new(ctx.clone(), quick_sessions)),
            setup: Arc::new(PortfolioSetupController::new(ctx.clone(), setup_sessions)),
            quarterly: Arc::new(QuarterlyReviewController::new(ctx, quarterly_sessions)),
        }
    }

    /// Everything in memory. Used by tests and when no database is set.
    pub fn in_memory(generator: Arc<dyn TextGenerator>) -> Self {
        Self::new(
            Arc::new(EngineContext::in_memory(generator)),
            Arc::new(InMemorySessionStore::<QuickState, QuickData>::new()),
            Arc::new(InMemorySessionStore::<SetupState, SetupData>::new()),
            Arc::new(InMemorySessionStore::<QuarterlyState, QuarterlyData>::new()),
        )
    }
}

/// Operations every flow exposes. Terminal actions are inherent methods
/// on each controller.
#[async_trait]
pub trait FlowController: Send + Sync + 'static {
    type State: FlowState;
    type Data: SessionData;

    async fn start_session(&self, user_id: Uuid) -> Result<Session<Self::State, Self::Data>>;
    async fn load_session(&self, session_id: Uuid) -> Result<Session<Self::State, Self::Data>>;
    async fn process_answer(
        &self,
        session_id: Uuid,
        answer: &str,
    ) -> Result<Session<Self::State, Self::Data>>;
    async fn skip_vagueness_gate(&self, session_id: Uuid) -> Result<Session<Self::State, Self::Data>>;
    async fn abandon(&self, session_id: Uuid) -> Result<Session<Self::State, Self::Data>>;

    /// Text of whatever the session is waiting on, if anything.
    fn current_question(&self, session: &Session<Self::State, Self::Data>) -> Option<String>;
}

pub fn clarify_prompt(question: &str) -> String {
    format!(
        "That answer is hard to verify. Give one concrete example (who, what, when) for: {}",
        question
    )
}

pub(crate) fn ensure_open<S: FlowState, D: SessionData>(session: &Session<S, D>) -> Result<()> {
    if session.is_closed() {
        return Err(GovernanceError::SessionClosed(session.session_id));
    }
    Ok(())
}

pub(crate) fn non_empty(answer: &str) -> Result<&str> {
    let trimmed = answer.trim();
    if trimmed.is_empty() {
        return Err(GovernanceError::Validation("Answer cannot be empty".to_string()));
    }
    Ok(trimmed)
}

/// Create a session at its sensitivity gate, or past it when the user
/// asked for their choice to be remembered.
pub(crate) async fn open_session<S: FlowState, D: SessionData>(
    ctx: &EngineContext,
    store: &dyn SessionStore<S, D>,
    user_id: Uuid,
    data: D,
) -> Result<Session<S, D>> {
    let fresh = Session::<S, D>::new(user_id);
    let gate = S::initial().next();
    let mut session = fresh.with_data(data).with_state(gate);

    if let Some(mode) = ctx.preferences.remembered(user_id, S::FLOW).await? {
        debug!(flow = %S::FLOW, abstraction_mode = mode, "Remembered sensitivity choice applied");
        session = session.with_abstraction_mode(mode).with_state(gate.next());
    }

    let created = store.create(session).await?;
    info!(
        session_id = %created.session_id,
        flow = %S::FLOW,
        state = created.state.label(),
        "Session started"
    );
    Ok(created)
}

/// Record the abstraction choice and move past the gate.
pub(crate) async fn pass_sensitivity_gate<S: FlowState, D: SessionData>(
    ctx: &EngineContext,
    session: &Session<S, D>,
    answer: &str,
) -> Result<Session<S, D>> {
    let choice = extract::parse_abstraction_choice(answer);
    if choice.remember {
        ctx.preferences
            .set(
                session.user_id,
                S::FLOW,
                AbstractionPreference {
                    abstraction_mode: choice.abstraction_mode,
                    remember: true,
                },
            )
            .await?;
    }

    Ok(session
        .with_entry(QaEntry::answered(
            session.state.label(),
            SENSITIVITY_QUESTION,
            answer,
            false,
        ))
        .with_abstraction_mode(choice.abstraction_mode)
        .with_state(session.state.next()))
}

/// Run the vagueness gate when the state asks for it. Returns whether the
/// answer was vague and the session, with a provider failure counted when
/// the gate failed open.
pub(crate) async fn judge<S: FlowState, D: SessionData>(
    ctx: &EngineContext,
    session: &Session<S, D>,
    question: &str,
    answer: &str,
) -> (bool, Session<S, D>) {
    if !session.state.requires_vagueness_check() {
        return (false, session.clone());
    }

    let verdict = ctx.gate.classify(question, answer).await;
    debug!(
        session_id = %session.session_id,
        state = session.state.label(),
        is_vague = verdict.is_vague,
        source = ?verdict.source,
        reason = %verdict.reason,
        "Vagueness verdict"
    );

    if verdict.source == VerdictSource::FailOpen {
        warn!(session_id = %session.session_id, "Vagueness gate failed open");
        (false, session.with_provider_failure())
    } else {
        (verdict.is_vague, session.clone())
    }
}

/// Successor of a main question: its clarify when vague, else `next`.
pub(crate) fn route<S: FlowState>(state: S, vague: bool) -> S {
    match state.clarify_of() {
        Some(clarify) if vague => clarify,
        _ => state.next(),
    }
}

/// Decline a clarify step. Fails without touching the session once the
/// budget is spent.
pub(crate) fn skip_clarify<S: FlowState, D: SessionData>(
    session: &Session<S, D>,
    question: &str,
    next: S,
    decorate: impl FnOnce(QaEntry) -> QaEntry,
) -> Result<Session<S, D>> {
    ensure_open(session)?;
    if !session.state.is_clarify() {
        return Err(GovernanceError::invalid_transition("skip", session.state));
    }
    if !session.can_skip() {
        return Err(GovernanceError::SkipBudgetExhausted {
            used: session.skip_count,
            budget: SKIP_BUDGET,
        });
    }

    Ok(session
        .with_entry(decorate(QaEntry::skipped(session.state.label(), question)))
        .with_skip()
        .with_state(next))
}

/// One-way exit. Already-closed sessions come back unchanged.
pub(crate) async fn abandon_session<S: FlowState, D: SessionData>(
    store: &dyn SessionStore<S, D>,
    session_id: Uuid,
) -> Result<Session<S, D>> {
    let session = store.require(session_id).await?;
    if session.is_closed() {
        return Ok(session);
    }

    let saved = store.save(audit::seal(session.abandoned())).await?;
    info!(session_id = %session_id, flow = %S::FLOW, "Session abandoned");
    Ok(saved)
}

/// Close the session with its output and digest.
pub(crate) fn finalize<S: FlowState, D: SessionData>(
    session: &Session<S, D>,
    output: Option<String>,
) -> Session<S, D> {
    audit::seal(session.completed_with(output))
}

/// Note to prepend to generation prompts in abstraction mode.
pub(crate) fn abstraction_note(enabled: bool) -> &'static str {
    if enabled {
        "The user chose abstraction mode: never repeat names of people, clients or employers; refer to them by role.\n\n"
    } else {
        ""
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::generation::testing::ScriptedGenerator;

    pub fn context(generator: ScriptedGenerator) -> (Arc<EngineContext>, Arc<ScriptedGenerator>) {
        let generator = Arc::new(generator);
        let ctx = EngineContext::in_memory(generator.clone());
        (Arc::new(ctx), generator)
    }
}
