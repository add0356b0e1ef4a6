//! Quick Audit controller
//!
//! Five questions, one bet, one report.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::{
    abandon_session, abstraction_note, clarify_prompt, ensure_open, extract, finalize, judge,
    non_empty, open_session, pass_sensitivity_gate, route, skip_clarify, EngineContext,
    FlowController, SENSITIVITY_QUESTION,
};
use crate::error::GovernanceError;
use crate::generation::GenerationRequest;
use crate::machine::{FlowState, QuickState};
use crate::models::Bet;
use crate::session::{QaEntry, QuickData, Session};
use crate::state::SessionStore;
use crate::Result;

pub type QuickSession = Session<QuickState, QuickData>;

const MAX_QUICK_PROBLEMS: usize = 3;

const REPORT_PROMPT: &str = r#"You write a blunt, one-page career audit from a short interview.
Sections, in order: Role, Problems You're Paid To Solve, The Avoided Decision, Comfort Work, Your 90-Day Bet, Next Step.
Quote the user's concrete examples where they exist. Flag answers marked vague or refused.
Plain text, no markdown tables."#;

pub fn question_text(state: QuickState) -> Option<&'static str> {
    use QuickState::*;

    match state {
        SensitivityGate => Some(SENSITIVITY_QUESTION),
        RoleContext => Some("What is your current role, and who do you answer to?"),
        PaidProblems => Some("What are the three problems you are actually paid to solve?"),
        AvoidedDecision => Some("What decision have you been avoiding, and what is it costing you?"),
        ComfortWork => Some("What work do you keep doing because it feels productive, not because it matters?"),
        NinetyDayBet => Some(
            "Make a 90-day bet: what will be true in 90 days, and what result would prove you wrong?",
        ),
        _ => None,
    }
}

pub struct QuickAuditController {
    ctx: Arc<EngineContext>,
    sessions: Arc<dyn SessionStore<QuickState, QuickData>>,
}

impl QuickAuditController {
    pub fn new(ctx: Arc<EngineContext>, sessions: Arc<dyn SessionStore<QuickState, QuickData>>) -> Self {
        Self { ctx, sessions }
    }

    fn question_for(state: QuickState) -> String {
        match state.parent_of() {
            Some(parent) => clarify_prompt(question_text(parent).unwrap_or_default()),
            None => question_text(state).unwrap_or_default().to_string(),
        }
    }

    /// Field updates for a main answer. Runs before anything is recorded.
    async fn apply_answer(&self, state: QuickState, data: &QuickData, answer: &str) -> Result<QuickData> {
        let data = data.clone();
        Ok(match state {
            QuickState::RoleContext => data.with_role_context(answer),
            QuickState::PaidProblems => {
                let names = extract::extract_problem_names(
                    self.ctx.generator.as_ref(),
                    answer,
                    1,
                    MAX_QUICK_PROBLEMS,
                )
                .await?;
                data.with_problems(names)
            }
            QuickState::AvoidedDecision => data.with_avoided_decision(extract::split_avoided_decision(answer)),
            QuickState::ComfortWork => data.with_comfort_work(answer),
            QuickState::NinetyDayBet => data.with_bet(extract::parse_bet(answer)?),
            other => return Err(GovernanceError::invalid_transition("answer", other)),
        })
    }

    fn report_input(session: &QuickSession) -> String {
        let data = &session.data;
        let mut input = String::from(abstraction_note(session.abstraction_mode));

        if let Some(role) = &data.role_context {
            input.push_str(&format!("ROLE: {}\n", role));
        }
        input.push_str(&format!("PROBLEMS: {}\n", data.problems.join("; ")));
        if let Some(avoided) = &data.avoided_decision {
            input.push_str(&format!(
                "AVOIDED DECISION: {}\nCOST: {}\n",
                avoided.decision, avoided.cost
            ));
        }
        if let Some(comfort) = &data.comfort_work {
            input.push_str(&format!("COMFORT WORK: {}\n", comfort));
        }
        if let Some(bet) = &data.bet {
            input.push_str(&format!(
                "BET ({} days): {}\nWRONG IF: {}\n",
                bet.duration_days, bet.prediction, bet.wrong_if
            ));
        }

        input.push_str("\nTRANSCRIPT:\n");
        for entry in &session.transcript {
            let flag = if entry.skipped {
                " [refused]"
            } else if entry.vague {
                " [vague]"
            } else {
                ""
            };
            input.push_str(&format!("Q: {}\nA: {}{}\n", entry.question, entry.answer, flag));
        }
        input
    }

    /// Write the report, commit the bet, close the session.
    pub async fn generate_output(&self, session_id: Uuid) -> Result<QuickSession> {
        let session = self.sessions.require(session_id).await?;
        ensure_open(&session)?;
        if session.state != QuickState::GeneratingOutput {
            return Err(GovernanceError::invalid_transition("generate_output", session.state));
        }

        let request = GenerationRequest::new(REPORT_PROMPT, Self::report_input(&session), 1500);
        let report = self.ctx.generator.generate(request).await.map_err(|e| {
            error!(session_id = %session_id, error = %e, "Quick Audit report generation failed");
            e
        })?;

        let mut closing = session.clone();
        if let Some(draft) = &session.data.bet {
            let bet = Bet::new(
                session.user_id,
                session.session_id,
                &draft.prediction,
                &draft.wrong_if,
                draft.duration_days,
            );
            let bet = self.ctx.repositories.bets.create(bet).await?;
            closing.bet_id = Some(bet.bet_id);
        }

        let saved = self.sessions.save(finalize(&closing, Some(report.text))).await?;
        info!(
            session_id = %session_id,
            bet_id = ?saved.bet_id,
            tokens_used = report.tokens_used,
            "Quick Audit finalized"
        );
        Ok(saved)
    }
}

#[async_trait]
impl FlowController for QuickAuditController {
    type State = QuickState;
    type Data = QuickData;

    async fn start_session(&self, user_id: Uuid) -> Result<QuickSession> {
        open_session(&self.ctx, self.sessions.as_ref(), user_id, QuickData::default()).await
    }

    async fn load_session(&self, session_id: Uuid) -> Result<QuickSession> {
        self.sessions.require(session_id).await
    }

    async fn process_answer(&self, session_id: Uuid, answer: &str) -> Result<QuickSession> {
        let session = self.sessions.require(session_id).await?;
        ensure_open(&session)?;
        let answer = non_empty(answer)?;
        let state = session.state;
        let question = Self::question_for(state);

        let next = if state == QuickState::SensitivityGate {
            pass_sensitivity_gate(&self.ctx, &session, answer).await?
        } else if let Some(parent) = state.parent_of() {
            let data = session.data.clone().with_example(parent.label(), answer);
            session
                .with_entry(QaEntry::clarified(state.label(), question, answer))
                .with_data(data)
                .with_state(state.next())
        } else if state.is_question() {
            let data = self.apply_answer(state, &session.data, answer).await?;
            let (vague, judged) = judge(&self.ctx, &session, &question, answer).await;
            judged
                .with_entry(QaEntry::answered(state.label(), question, answer, vague))
                .with_data(data)
                .with_state(route(state, vague))
        } else {
            return Err(GovernanceError::invalid_transition("answer", state));
        };

        let saved = self.sessions.save(next).await?;
        info!(
            session_id = %session_id,
            from = state.label(),
            to = saved.state.label(),
            progress = saved.progress(),
            "Quick Audit answer accepted"
        );
        Ok(saved)
    }

    async fn skip_vagueness_gate(&self, session_id: Uuid) -> Result<QuickSession> {
        let session = self.sessions.require(session_id).await?;
        let question = Self::question_for(session.state);
        let skipped = skip_clarify(&session, &question, session.state.next(), |e| e)?;
        let saved = self.sessions.save(skipped).await?;
        info!(session_id = %session_id, skip_count = saved.skip_count, "Clarify step skipped");
        Ok(saved)
    }

    async fn abandon(&self, session_id: Uuid) -> Result<QuickSession> {
        abandon_session(self.sessions.as_ref(), session_id).await
    }

    fn current_question(&self, session: &QuickSession) -> Option<String> {
        let state = session.state;
        if state.is_question() || state.is_clarify() || state == QuickState::SensitivityGate {
            Some(Self::question_for(state))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::verify_integrity;
    use crate::flows::testing::context;
    use crate::generation::testing::ScriptedGenerator;
    use crate::models::BetStatus;
    use crate::session::REFUSED_EXAMPLE;
    use crate::state::{InMemorySessionStore, Repository};

    fn controller(generator: ScriptedGenerator) -> (QuickAuditController, Arc<EngineContext>) {
        let (ctx, _) = context(generator);
        let store = Arc::new(InMemorySessionStore::<QuickState, QuickData>::new());
        (QuickAuditController::new(ctx.clone(), store), ctx)
    }

    #[tokio::test]
    async fn test_full_quick_audit() {
        let (controller, ctx) = controller(
            ScriptedGenerator::new()
                .reply("[\"Pricing\", \"Churn analysis\", \"Board reporting\"]")
                .reply("AUDIT REPORT"),
        );
        let user = Uuid::new_v4();

        let s = controller.start_session(user).await.unwrap();
        assert_eq!(s.state, QuickState::SensitivityGate);

        let s = controller.process_answer(s.session_id, "no").await.unwrap();
        assert_eq!(s.state, QuickState::RoleContext);
        assert!(!s.abstraction_mode);

        let s = controller
            .process_answer(s.session_id, "Head of analytics reporting to the CFO")
            .await
            .unwrap();
        assert_eq!(s.state, QuickState::PaidProblems);

        let s = controller
            .process_answer(s.session_id, "Pricing for Acme, churn analysis and board reporting")
            .await
            .unwrap();
        assert_eq!(s.state, QuickState::AvoidedDecision);
        assert_eq!(s.data.problems.len(), 3);

        let s = controller
            .process_answer(s.session_id, "Avoiding the reorg of the BI team, costing me 5 hours a week.")
            .await
            .unwrap();
        assert_eq!(s.state, QuickState::ComfortWork);
        assert_eq!(s.data.avoided_decision.as_ref().unwrap().decision, "the reorg of the BI team");

        let s = controller
            .process_answer(s.session_id, "Polishing the Monday dashboard deck")
            .await
            .unwrap();
        assert_eq!(s.state, QuickState::NinetyDayBet);

        // A bet needs a falsifying condition
        let err = controller
            .process_answer(s.session_id, "Pricing tests lift margin 3% by June")
            .await
            .unwrap_err();
        assert!(err.is_validation());
        let unchanged = controller.load_session(s.session_id).await.unwrap();
        assert_eq!(unchanged, s);

        let s = controller
            .process_answer(
                s.session_id,
                "Pricing tests lift margin 3% by June. I'm wrong if margin is flat",
            )
            .await
            .unwrap();
        assert_eq!(s.state, QuickState::GeneratingOutput);
        assert!(controller.current_question(&s).is_none());

        let done = controller.generate_output(s.session_id).await.unwrap();
        assert!(done.completed);
        assert_eq!(done.state, QuickState::Finalized);
        assert_eq!(done.output.as_deref(), Some("AUDIT REPORT"));
        assert!(verify_integrity(&done));

        let bet = ctx.repositories.bets.get(done.bet_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(bet.status, BetStatus::Open);
        assert_eq!(bet.wrong_if, "margin is flat");
    }

    #[tokio::test]
    async fn test_vague_answer_enters_clarify_and_skip_budget_holds() {
        let (controller, _) = controller(ScriptedGenerator::new());
        let s = controller.start_session(Uuid::new_v4()).await.unwrap();
        let s = controller.process_answer(s.session_id, "no thanks").await.unwrap();
        let s = controller.process_answer(s.session_id, "Engineer").await.unwrap();
        assert_eq!(s.state, QuickState::PaidProblems);

        // Split locally; the answer itself is lexicon-vague
        let s = controller
            .process_answer(s.session_id, "various stuff, things, helping")
            .await
            .unwrap();
        assert_eq!(s.state, QuickState::PaidProblemsClarify);
        assert!(s.transcript.last().unwrap().vague);

        let s = controller.skip_vagueness_gate(s.session_id).await.unwrap();
        assert_eq!(s.state, QuickState::AvoidedDecision);
        assert_eq!(s.skip_count, 1);
        assert_eq!(s.transcript.last().unwrap().answer, REFUSED_EXAMPLE);

        let s = controller.process_answer(s.session_id, "stuff").await.unwrap();
        assert_eq!(s.state, QuickState::AvoidedDecisionClarify);
        let s = controller.skip_vagueness_gate(s.session_id).await.unwrap();
        assert_eq!(s.skip_count, 2);
        assert!(!s.can_skip());

        let s = controller.process_answer(s.session_id, "meh").await.unwrap();
        assert_eq!(s.state, QuickState::ComfortWorkClarify);

        let before = controller.load_session(s.session_id).await.unwrap();
        let err = controller.skip_vagueness_gate(s.session_id).await.unwrap_err();
        assert!(matches!(err, GovernanceError::SkipBudgetExhausted { .. }));
        assert_eq!(controller.load_session(s.session_id).await.unwrap(), before);

        let s = controller
            .process_answer(s.session_id, "Rewrote the onboarding wiki on Friday")
            .await
            .unwrap();
        assert_eq!(s.state, QuickState::NinetyDayBet);
        assert_eq!(s.data.examples.len(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_fails_open_and_is_counted() {
        // Problem extraction and the vagueness check both fail
        let (controller, _) = controller(ScriptedGenerator::new().fail(false).fail(false));
        let s = controller.start_session(Uuid::new_v4()).await.unwrap();
        let s = controller.process_answer(s.session_id, "no").await.unwrap();
        let s = controller.process_answer(s.session_id, "Operations lead").await.unwrap();

        let s = controller
            .process_answer(s.session_id, "keeping customers calm when launches slip")
            .await
            .unwrap();
        assert_eq!(s.state, QuickState::AvoidedDecision);
        assert_eq!(s.provider_failures, 1);
    }

    #[tokio::test]
    async fn test_abandon_is_final() {
        let (controller, _) = controller(ScriptedGenerator::new());
        let s = controller.start_session(Uuid::new_v4()).await.unwrap();

        let abandoned = controller.abandon(s.session_id).await.unwrap();
        assert_eq!(abandoned.state, QuickState::Abandoned);
        assert!(abandoned.snapshot_hash.is_some());

        let again = controller.abandon(s.session_id).await.unwrap();
        assert_eq!(again, abandoned);

        let err = controller.process_answer(s.session_id, "yes").await.unwrap_err();
        assert!(matches!(err, GovernanceError::SessionClosed(_)));
    }

    #[tokio::test]
    async fn test_generate_output_requires_final_question_answered() {
        let (controller, ctx) = controller(ScriptedGenerator::new().reply("too early"));
        let s = controller.start_session(Uuid::new_v4()).await.unwrap();
        let store_view = controller.load_session(s.session_id).await.unwrap();

        let err = controller.generate_output(s.session_id).await.unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidTransition { .. }));
        assert_eq!(controller.load_session(s.session_id).await.unwrap(), store_view);
        assert!(ctx.repositories.bets.list_for_user(s.user_id).await.unwrap().is_empty());
    }
}
