//! Portfolio Setup controller
//!
//! Collects 3-5 problems, walks each through six evidence questions,
//! checks time allocation, seats the board and publishes a versioned
//! portfolio.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    abandon_session, board, clarify_prompt, ensure_open, extract, finalize, judge, non_empty,
    open_session, pass_sensitivity_gate, route, skip_clarify, EngineContext, FlowController,
    SENSITIVITY_QUESTION,
};
use crate::analysis::{check_allocation, HealthComposition};
use crate::error::GovernanceError;
use crate::machine::setup::{MAX_PROBLEMS, MIN_PROBLEMS};
use crate::machine::{FlowState, SetupState};
use crate::models::{validate_board, PortfolioVersion, Problem};
use crate::session::{QaEntry, Session, SetupData};
use crate::state::SessionStore;
use crate::Result;

pub type SetupSession = Session<SetupState, SetupData>;

pub fn question_text(state: SetupState, data: &SetupData) -> Option<String> {
    use SetupState::*;

    let name = state
        .problem_index()
        .and_then(|i| data.problems.get(i))
        .map(|p| p.name.as_str())
        .unwrap_or("this problem");

    let text = match state {
        SensitivityGate => SENSITIVITY_QUESTION.to_string(),
        ProblemsIdentify => {
            "Name the 3 to 5 problems you are paid to solve, one per line.".to_string()
        }
        ProblemBreaks(_) => format!("What breaks if \"{}\" goes unsolved for a quarter?", name),
        ProblemScarcity(_) => format!(
            "Give two signals that the ability to solve \"{}\" is scarce, or say it is unknown and why.",
            name
        ),
        ProblemAiSubstitutability(_) => format!(
            "How much of \"{}\" could AI do today, and which part could it not?",
            name
        ),
        ProblemErrorCost(_) => format!("What does a mistake on \"{}\" cost, and who pays for it?", name),
        ProblemTrustAccess(_) => format!(
            "What trust or access does solving \"{}\" require that others lack?",
            name
        ),
        ProblemDirection(_) => format!(
            "Is \"{}\" appreciating, depreciating or stable in value? One sentence on why.",
            name
        ),
        TimeAllocation => {
            let names: Vec<&str> = data.problems.iter().map(|p| p.name.as_str()).collect();
            format!(
                "What percentage of your time goes to each problem, in this order: {}?",
                names.join(", ")
            )
        }
        PortfolioReview => "Review the portfolio and board, then publish.".to_string(),
        _ => return None,
    };
    Some(text)
}

/// Plain-text portfolio summary stored as the session output.
pub fn portfolio_summary(data: &SetupData, version: u32) -> String {
    let mut out = format!("Portfolio v{}\n\n", version);

    for problem in &data.problems {
        let direction = problem
            .direction
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unclassified".to_string());
        out.push_str(&format!(
            "- {} [{}] {}%: {}\n",
            problem.name,
            direction,
            problem.time_allocation_percent.unwrap_or(0),
            problem.direction_rationale
        ));
    }

    if let Some(health) = &data.health {
        out.push_str(&format!(
            "\nHealth: {} appreciating, {} depreciating, {} stable\n",
            health.appreciating, health.depreciating, health.stable
        ));
    }
    if let Some(message) = data.allocation.as_ref().and_then(|a| a.message.as_ref()) {
        out.push_str(&format!("Note: {}\n", message));
    }

    out.push_str("\nBoard:\n");
    for member in &data.board {
        out.push_str(&format!(
            "- {} ({}) on {}\n",
            member.persona.name,
            member.role.title(),
            member.anchored_problem_name
        ));
    }
    out
}

pub struct PortfolioSetupController {
    ctx: Arc<EngineContext>,
    sessions: Arc<dyn SessionStore<SetupState, SetupData>>,
}

impl PortfolioSetupController {
    pub fn new(ctx: Arc<EngineContext>, sessions: Arc<dyn SessionStore<SetupState, SetupData>>) -> Self {
        Self { ctx, sessions }
    }

    fn question_for(state: SetupState, data: &SetupData) -> String {
        match state.parent_of() {
            Some(parent) => clarify_prompt(&question_text(parent, data).unwrap_or_default()),
            None => question_text(state, data).unwrap_or_default(),
        }
    }

    /// Field updates for a main answer. Fails before anything is recorded.
    async fn apply_answer(&self, session: &SetupSession, answer: &str) -> Result<SetupData> {
        use SetupState::*;

        let data = session.data.clone();
        let state = session.state;
        let index = state.problem_index().unwrap_or(0);
        let text = answer.to_string();

        Ok(match state {
            ProblemsIdentify => {
                let names = extract::extract_problem_names(
                    self.ctx.generator.as_ref(),
                    answer,
                    usize::from(MIN_PROBLEMS),
                    usize::from(MAX_PROBLEMS),
                )
                .await?;
                let problems = names
                    .into_iter()
                    .map(|name| Problem::named(session.user_id, session.session_id, name))
                    .collect();
                data.with_problems(problems)
            }
            ProblemBreaks(_) => data.with_problem_edit(index, |p| p.what_breaks = text),
            ProblemScarcity(_) => {
                let scarcity = extract::parse_scarcity(answer)?;
                data.with_problem_edit(index, |p| p.scarcity = Some(scarcity))
            }
            ProblemAiSubstitutability(_) => {
                data.with_problem_edit(index, |p| p.ai_substitutability = text)
            }
            ProblemErrorCost(_) => data.with_problem_edit(index, |p| p.error_cost = text),
            ProblemTrustAccess(_) => data.with_problem_edit(index, |p| p.trust_required = text),
            ProblemDirection(_) => {
                let (direction, rationale) = extract::parse_direction(answer).ok_or_else(|| {
                    GovernanceError::Validation(
                        "Say whether the problem is appreciating, depreciating or stable".to_string(),
                    )
                })?;
                data.with_problem_edit(index, |p| {
                    p.direction = Some(direction);
                    p.direction_rationale = rationale;
                })
            }
            TimeAllocation => {
                let allocations = extract::parse_allocations(answer);
                if allocations.len() != data.problems.len() {
                    return Err(GovernanceError::Validation(format!(
                        "Give one percentage per problem ({} expected, {} found)",
                        data.problems.len(),
                        allocations.len()
                    )));
                }
                let check = check_allocation(&allocations);
                if !check.band.permits_proceed() {
                    return Err(GovernanceError::AllocationOutOfBand { total: check.total });
                }
                data.with_allocations(&allocations, check)
            }
            other => return Err(GovernanceError::invalid_transition("answer", other)),
        })
    }

    /// Derived step: seat the board and move on to review.
    async fn assemble_board(&self, session: SetupSession) -> SetupSession {
        let personas = board::generate_personas(
            self.ctx.generator.as_ref(),
            &session.data.problems,
            session.abstraction_mode,
        )
        .await;
        let members = board::assemble_board(
            session.user_id,
            session.session_id,
            &session.data.problems,
            &personas,
        );
        info!(
            session_id = %session.session_id,
            seats = members.len(),
            generated_personas = personas.len(),
            "Board assembled"
        );

        let data = session.data.clone().with_board(members);
        session.with_data(data).with_state(session.state.next())
    }

    /// Validate and persist the portfolio, board and a new version.
    pub async fn publish_portfolio(&self, session_id: Uuid) -> Result<SetupSession> {
        let session = self.sessions.require(session_id).await?;
        ensure_open(&session)?;
        if session.state != SetupState::PortfolioReview {
            return Err(GovernanceError::invalid_transition("publish_portfolio", session.state));
        }

        let data = &session.data;
        if let Some(problem) = data.problems.iter().find(|p| !p.is_complete()) {
            return Err(GovernanceError::Validation(format!(
                "Problem \"{}\" is missing: {}",
                problem.name,
                problem.missing_fields().join(", ")
            )));
        }
        let allocations: Vec<u32> = data
            .problems
            .iter()
            .map(|p| p.time_allocation_percent.unwrap_or(0))
            .collect();
        let check = check_allocation(&allocations);
        if !check.band.permits_proceed() {
            return Err(GovernanceError::AllocationOutOfBand { total: check.total });
        }
        validate_board(&data.board, &data.problems)?;

        let repos = &self.ctx.repositories;
        for problem in &data.problems {
            repos.problems.create(problem.clone()).await?;
        }
        for member in &data.board {
            repos.board_members.create(member.clone()).await?;
        }

        let version = repos
            .latest_portfolio(session.user_id)
            .await?
            .map(|v| v.version + 1)
            .unwrap_or(1);
        let portfolio = repos
            .portfolio_versions
            .create(PortfolioVersion {
                version_id: Uuid::new_v4(),
                user_id: session.user_id,
                session_id: session.session_id,
                version,
                problem_ids: data.problems.iter().map(|p| p.problem_id).collect(),
                health: HealthComposition::from_problems(&data.problems),
                created_at: Utc::now(),
            })
            .await?;

        let mut closing = session.clone();
        closing.portfolio_version_id = Some(portfolio.version_id);
        let summary = portfolio_summary(data, version);

        let saved = self.sessions.save(finalize(&closing, Some(summary))).await?;
        info!(
            session_id = %session_id,
            version,
            problems = data.problems.len(),
            board = data.board.len(),
            "Portfolio published"
        );
        Ok(saved)
    }
}

#[async_trait]
impl FlowController for PortfolioSetupController {
    type State = SetupState;
    type Data = SetupData;

    async fn start_session(&self, user_id: Uuid) -> Result<SetupSession> {
        open_session(&self.ctx, self.sessions.as_ref(), user_id, SetupData::default()).await
    }

    async fn load_session(&self, session_id: Uuid) -> Result<SetupSession> {
        self.sessions.require(session_id).await
    }

    async fn process_answer(&self, session_id: Uuid, answer: &str) -> Result<SetupSession> {
        let session = self.sessions.require(session_id).await?;
        ensure_open(&session)?;
        let answer = non_empty(answer)?;
        let state = session.state;
        let question = Self::question_for(state, &session.data);

        let mut next = if state == SetupState::SensitivityGate {
            pass_sensitivity_gate(&self.ctx, &session, answer).await?
        } else if let Some(parent) = state.parent_of() {
            let data = session.data.clone().with_example(parent.label(), answer);
            session
                .with_entry(QaEntry::clarified(state.label(), question, answer).for_problem(state.problem_index()))
                .with_data(data)
                .with_state(state.next())
        } else if state.is_question() {
            let data = self.apply_answer(&session, answer).await?;
            let (vague, judged) = judge(&self.ctx, &session, &question, answer).await;
            judged
                .with_entry(
                    QaEntry::answered(state.label(), question, answer, vague)
                        .for_problem(state.problem_index()),
                )
                .with_data(data)
                .with_state(route(state, vague))
        } else {
            return Err(GovernanceError::invalid_transition("answer", state));
        };

        next = next.with_state(next.state.resized(next.data.problems.len()));
        if state == SetupState::TimeAllocation {
            if let Some(message) = next.data.allocation.as_ref().and_then(|a| a.message.as_ref()) {
                warn!(session_id = %session_id, %message, "Allocation accepted with warning");
            }
        }
        if next.state.is_derived() {
            next = self.assemble_board(next).await;
        }

        let saved = self.sessions.save(next).await?;
        info!(
            session_id = %session_id,
            from = state.label(),
            to = saved.state.label(),
            progress = saved.progress(),
            "Setup answer accepted"
        );
        Ok(saved)
    }

    async fn skip_vagueness_gate(&self, session_id: Uuid) -> Result<SetupSession> {
        let session = self.sessions.require(session_id).await?;
        let question = Self::question_for(session.state, &session.data);
        let next = session.state.next().resized(session.data.problems.len());
        let index = session.state.problem_index();

        let skipped = skip_clarify(&session, &question, next, |e| e.for_problem(index))?;
        let saved = self.sessions.save(skipped).await?;
        info!(session_id = %session_id, skip_count = saved.skip_count, "Clarify step skipped");
        Ok(saved)
    }

    async fn abandon(&self, session_id: Uuid) -> Result<SetupSession> {
        abandon_session(self.sessions.as_ref(), session_id).await
    }

    fn current_question(&self, session: &SetupSession) -> Option<String> {
        let state = session.state;
        if state.is_terminal() || state == SetupState::Initial || state.is_derived() {
            return None;
        }
        Some(Self::question_for(state, &session.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::testing::context;
    use crate::generation::testing::ScriptedGenerator;
    use crate::machine::ProblemCursor;
    use crate::models::{Direction, Scarcity};
    use crate::state::{InMemorySessionStore, Repository};

    fn controller(generator: ScriptedGenerator) -> (PortfolioSetupController, Arc<EngineContext>) {
        let (ctx, _) = context(generator);
        let store = Arc::new(InMemorySessionStore::<SetupState, SetupData>::new());
        (PortfolioSetupController::new(ctx.clone(), store), ctx)
    }

    const DIRECTIONS: [&str; 3] = [
        "Appreciating because renewals moved to annual contracts in 2024",
        "Depreciating since the new BI tool automates 80% of it",
        "Stable: the audit calendar has not changed in 3 years",
    ];

    /// Drive a session through every per-problem question.
    async fn answer_problems(controller: &PortfolioSetupController, mut s: SetupSession) -> SetupSession {
        for direction in DIRECTIONS {
            let answers = [
                "Renewals slip and we lose 12% of revenue by Q3",
                "Only 2 people in the company can do it; recruiters call me weekly",
                "About 30% of it, the Acme negotiation itself needs a human",
                "A bad term sheet cost us $200k in 2023",
                "Signing authority from the CFO and access to Salesforce",
                direction,
            ];
            for answer in answers {
                s = controller.process_answer(s.session_id, answer).await.unwrap();
            }
        }
        s
    }

    #[tokio::test]
    async fn test_full_setup_publishes_portfolio() {
        let (controller, ctx) = controller(
            ScriptedGenerator::new().reply(r#"["Vendor renewals", "Weekly reporting", "Compliance audits"]"#),
        );
        let user = Uuid::new_v4();

        let s = controller.start_session(user).await.unwrap();
        let s = controller.process_answer(s.session_id, "yes, abstract please").await.unwrap();
        assert!(s.abstraction_mode);
        assert_eq!(s.state, SetupState::ProblemsIdentify);

        let s = controller
            .process_answer(s.session_id, "Vendor renewals with Acme\nWeekly reporting for the CFO\nCompliance audits in March")
            .await
            .unwrap();
        assert_eq!(s.data.problems.len(), 3);
        assert_eq!(s.state, SetupState::ProblemBreaks(ProblemCursor { index: 0, count: 3 }));
        assert!(controller.current_question(&s).unwrap().contains("Vendor renewals"));

        let s = answer_problems(&controller, s).await;
        assert_eq!(s.state, SetupState::TimeAllocation);
        assert!(s.data.problems.iter().all(|p| p.is_complete()));
        assert_eq!(s.data.problems[1].direction, Some(Direction::Depreciating));
        assert!(matches!(s.data.problems[0].scarcity, Some(Scarcity::Signals { .. })));

        // 120% is outside every band: rejected, nothing changes
        let before = controller.load_session(s.session_id).await.unwrap();
        let err = controller
            .process_answer(s.session_id, "60%, 40%, 20%")
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::AllocationOutOfBand { total: 120 }));
        assert_eq!(controller.load_session(s.session_id).await.unwrap(), before);

        // Board assembly runs inside the same call
        let s = controller
            .process_answer(s.session_id, "50%, 30%, 12%")
            .await
            .unwrap();
        assert_eq!(s.state, SetupState::PortfolioReview);
        assert_eq!(s.data.board.len(), 7);
        assert_eq!(s.data.health.unwrap().appreciating, 50);

        let done = controller.publish_portfolio(s.session_id).await.unwrap();
        assert!(done.completed);
        assert!(done.output.as_deref().unwrap().starts_with("Portfolio v1"));

        let latest = ctx.repositories.latest_portfolio(user).await.unwrap().unwrap();
        assert_eq!(Some(latest.version_id), done.portfolio_version_id);
        assert_eq!(latest.problem_ids.len(), 3);
        assert_eq!(
            ctx.repositories.board_members.list_for_session(done.session_id).await.unwrap().len(),
            7
        );
    }

    #[tokio::test]
    async fn test_too_few_problems_is_rejected() {
        let (controller, _) = controller(ScriptedGenerator::new().reply(r#"["Hiring"]"#));
        let s = controller.start_session(Uuid::new_v4()).await.unwrap();
        let s = controller.process_answer(s.session_id, "no").await.unwrap();

        let err = controller.process_answer(s.session_id, "Hiring").await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(
            controller.load_session(s.session_id).await.unwrap().state,
            SetupState::ProblemsIdentify
        );
    }

    #[tokio::test]
    async fn test_cursor_sized_to_extracted_problems() {
        let (controller, _) = controller(ScriptedGenerator::new().reply(
            r#"["Hiring", "Pricing", "Forecasting", "Vendor renewals", "Audits", "Roadmap"]"#,
        ));
        let s = controller.start_session(Uuid::new_v4()).await.unwrap();
        let s = controller.process_answer(s.session_id, "no").await.unwrap();
        let s = controller
            .process_answer(s.session_id, "Hiring, pricing, forecasting, renewals, audits and the 2025 roadmap")
            .await
            .unwrap();

        assert_eq!(s.data.problems.len(), 5);
        assert_eq!(s.state, SetupState::ProblemBreaks(ProblemCursor { index: 0, count: 5 }));
    }

    #[tokio::test]
    async fn test_publish_requires_review_state() {
        let (controller, _) = controller(ScriptedGenerator::new());
        let s = controller.start_session(Uuid::new_v4()).await.unwrap();
        let err = controller.publish_portfolio(s.session_id).await.unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidTransition { .. }));
    }
}
