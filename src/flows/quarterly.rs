//! Quarterly Review controller
//!
//! Ten questions against the last published portfolio. Health and
//! triggers are computed by the controller as soon as their state is
//! entered. Questions 7 and 8 are asked by the board, one persona at a
//! time, with the pending persona tracked in the accumulator.
//!
//! Nothing but evidence is written to the repositories before
//! `generate_output`; the bet evaluation, triggers, new bet and any new
//! portfolio version are committed there.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::board::{self, BoardProgress};
use super::{
    abandon_session, abstraction_note, clarify_prompt, ensure_open, extract, finalize, judge,
    non_empty, open_session, pass_sensitivity_gate, route, skip_clarify, EngineContext,
    FlowController, SENSITIVITY_QUESTION,
};
use crate::analysis::{evaluate_triggers, health_trend, HealthComposition, TriggerInput};
use crate::error::GovernanceError;
use crate::generation::GenerationRequest;
use crate::machine::{FlowState, QuarterlyState};
use crate::models::{
    Bet, BetStatus, BoardMember, Direction, EvidenceItem, EvidenceStrength, PortfolioVersion,
    Problem, TriggerRecord,
};
use crate::session::{BoardPhase, BoardQuestion, QaEntry, QuarterlyData, Session};
use crate::state::SessionStore;
use crate::vagueness::find_concrete_signal;
use crate::Result;

pub type QuarterlySession = Session<QuarterlyState, QuarterlyData>;

const REPORT_PROMPT: &str = r#"You write a quarterly career review from a structured interview and a board session.
Sections, in order: Last Bet, Commitments vs Actual, Avoided Decision, Comfort Work, Portfolio Health, Evidence, Board Questions, Re-setup Triggers, Next Quarter, New Bet.
Quote concrete examples. Call out vague or refused answers plainly. Plain text, no markdown tables."#;

const UNSUPPORTED_STRONG: &str = "No date, name or number backs the claim";

fn board_prompt(pending: &BoardQuestion) -> String {
    format!(
        "{} ({}): {}",
        pending.persona_name,
        pending.role.title(),
        pending.question
    )
}

pub fn question_text(state: QuarterlyState, data: &QuarterlyData) -> Option<String> {
    use QuarterlyState::*;

    let text = match state {
        SensitivityGate => SENSITIVITY_QUESTION.to_string(),
        LastBetReview => match &data.reviewed_bet {
            Some(bet) => format!(
                "Last bet: \"{}\" (wrong if: {}). Was it correct, wrong, or did it expire untested? What happened?",
                bet.prediction, bet.wrong_if
            ),
            None => "You had no open bet. What did you expect last quarter, and did it happen?".to_string(),
        },
        CommitmentsVsActual => "What did you commit to last quarter, and what actually happened?".to_string(),
        AvoidedDecision => {
            "What decision are you still avoiding, and what has it cost you this quarter?".to_string()
        }
        ComfortWork => {
            "Where did you spend time on comfortable work instead of the problems that matter?".to_string()
        }
        PortfolioCheck => {
            let names: Vec<String> = data
                .problems
                .iter()
                .map(|p| match p.direction {
                    Some(d) => format!("{} ({})", p.name, d),
                    None => p.name.clone(),
                })
                .collect();
            format!(
                "Has any problem changed direction? Current portfolio: {}. Name it and say whether it is now appreciating, depreciating or stable.",
                names.join(", ")
            )
        }
        AppreciatingEvidence => {
            "What happened this quarter that shows your appreciating skills gaining value? One item per line.".to_string()
        }
        CoreBoardInterrogation | GrowthBoardInterrogation => {
            board_prompt(data.board_cursor.pending.as_ref()?)
        }
        NextQuarterCommitments => {
            "What are you committing to next quarter? Say what and by when.".to_string()
        }
        NewBet => {
            "Make a new bet: what will be true by the next review, and what result would prove you wrong?".to_string()
        }
        _ => return None,
    };
    Some(text)
}

/// Evidence items from an answer, one per listed claim. Strong claims
/// without a concrete detail are downgraded.
pub fn evidence_from_answer(
    user_id: Uuid,
    session_id: Uuid,
    answer: &str,
    problems: &[Problem],
) -> Vec<EvidenceItem> {
    let fallback_problem = problems
        .iter()
        .find(|p| p.direction == Some(Direction::Appreciating))
        .map(|p| p.problem_id);

    extract::split_list(answer)
        .into_iter()
        .map(|claim| {
            let lowered = claim.to_lowercase();
            let problem_id = problems
                .iter()
                .find(|p| !p.name.is_empty() && lowered.contains(&p.name.to_lowercase()))
                .map(|p| p.problem_id)
                .or(fallback_problem);

            let item = EvidenceItem::new(user_id, session_id, claim.as_str(), extract::infer_evidence_kind(&claim))
                .with_problem(problem_id)
                .with_context("appreciating_evidence");

            if item.strength == EvidenceStrength::Strong && find_concrete_signal(&claim).is_none() {
                item.override_strength(EvidenceStrength::Medium, UNSUPPORTED_STRONG)
            } else {
                item
            }
        })
        .collect()
}

pub struct QuarterlyReviewController {
    ctx: Arc<EngineContext>,
    sessions: Arc<dyn SessionStore<QuarterlyState, QuarterlyData>>,
}

impl QuarterlyReviewController {
    pub fn new(
        ctx: Arc<EngineContext>,
        sessions: Arc<dyn SessionStore<QuarterlyState, QuarterlyData>>,
    ) -> Self {
        Self { ctx, sessions }
    }

    fn question_for(state: QuarterlyState, data: &QuarterlyData) -> String {
        if state == QuarterlyState::BoardInterrogationClarify {
            return match &data.board_cursor.pending {
                Some(pending) => clarify_prompt(&board_prompt(pending)),
                None => clarify_prompt("the board's last question"),
            };
        }
        match state.parent_of() {
            Some(parent) => clarify_prompt(&question_text(parent, data).unwrap_or_default()),
            None => question_text(state, data).unwrap_or_default(),
        }
    }

    /// Latest portfolio, its problems, the seated board and the open bet.
    async fn baseline(&self, user_id: Uuid) -> Result<QuarterlyData> {
        let repos = &self.ctx.repositories;
        let version = repos.latest_portfolio(user_id).await?.ok_or_else(|| {
            GovernanceError::Validation(
                "Publish a portfolio before running a quarterly review".to_string(),
            )
        })?;

        let mut problems = Vec::with_capacity(version.problem_ids.len());
        for id in &version.problem_ids {
            if let Some(problem) = repos.problems.get(*id).await? {
                problems.push(problem);
            }
        }

        // Most recent active seat per role
        let mut board: Vec<BoardMember> = Vec::new();
        for member in repos.board_members.list_for_user(user_id).await?.into_iter().rev() {
            if member.active && !board.iter().any(|m| m.role == member.role) {
                board.push(member);
            }
        }

        let open_bet = repos
            .bets
            .list_for_user(user_id)
            .await?
            .into_iter()
            .filter(|b| b.status == BetStatus::Open)
            .max_by_key(|b| b.created_at);

        debug!(
            user_id = %user_id,
            version = version.version,
            problems = problems.len(),
            board = board.len(),
            open_bet = open_bet.is_some(),
            "Quarterly baseline loaded"
        );

        Ok(QuarterlyData {
            portfolio_version_id: Some(version.version_id),
            problems,
            board,
            reviewed_bet: open_bet,
            previous_health: Some(version.health),
            ..QuarterlyData::default()
        })
    }

    /// Field updates for an ordinary answer. Fails before anything is
    /// recorded; evidence is the one write that happens here.
    async fn apply_answer(&self, session: &QuarterlySession, answer: &str) -> Result<QuarterlyData> {
        use QuarterlyState::*;

        let mut data = session.data.clone();
        match session.state {
            LastBetReview => {
                if let Some(bet) = &data.reviewed_bet {
                    let status = extract::parse_bet_review(answer).ok_or_else(|| {
                        GovernanceError::Validation(
                            "Say whether the bet was correct, wrong or expired".to_string(),
                        )
                    })?;
                    let evaluated = bet.evaluate(status, session.session_id, Utc::now())?;
                    data.reviewed_bet = Some(evaluated);
                    data.bet_outcome = Some(status);
                }
                data.bet_reflection = Some(answer.to_string());
            }
            CommitmentsVsActual => data.commitments_review = Some(answer.to_string()),
            AvoidedDecision => data.avoided_decision = Some(extract::split_avoided_decision(answer)),
            ComfortWork => data.comfort_work = Some(answer.to_string()),
            PortfolioCheck => {
                data.direction_shifts = extract::parse_direction_shifts(answer, &data.problems);
                data.portfolio_check = Some(answer.to_string());
            }
            AppreciatingEvidence => {
                let items = evidence_from_answer(
                    session.user_id,
                    session.session_id,
                    answer,
                    &data.current_problems(),
                );
                for item in items {
                    let saved = self.ctx.repositories.evidence.create(item).await?;
                    data.evidence_ids.push(saved.evidence_id);
                }
            }
            NextQuarterCommitments => data.next_quarter_commitments = Some(answer.to_string()),
            NewBet => data.new_bet = Some(extract::parse_bet(answer)?),
            other => return Err(GovernanceError::invalid_transition("answer", other)),
        }
        Ok(data)
    }

    /// Move the board past the pending persona.
    async fn advance_board(&self, session: QuarterlySession) -> QuarterlySession {
        let (data, progress) = board::advance(
            self.ctx.generator.as_ref(),
            session.data.clone(),
            session.user_id,
            session.session_id,
        )
        .await;

        let state = match progress {
            BoardProgress::Asking(state) => state,
            BoardProgress::Complete => QuarterlyState::TriggerCheck,
        };
        session.with_data(data).with_state(state)
    }

    async fn answer_board(&self, session: &QuarterlySession, question: &str, answer: &str) -> Result<QuarterlySession> {
        let pending = session
            .data
            .board_cursor
            .pending
            .clone()
            .ok_or_else(|| GovernanceError::invalid_transition("answer", session.state))?;

        let (vague, judged) = judge(&self.ctx, session, question, answer).await;
        let data = board::record_answer(session.data.clone(), answer, vague);
        let recorded = judged
            .with_entry(
                QaEntry::answered(session.state.label(), question, answer, vague)
                    .asked_by(pending.role, pending.persona_name.as_str()),
            )
            .with_data(data);

        if vague {
            return Ok(recorded.with_state(QuarterlyState::BoardInterrogationClarify));
        }
        Ok(self.advance_board(recorded).await)
    }

    async fn clarify_board(&self, session: &QuarterlySession, question: &str, answer: &str) -> Result<QuarterlySession> {
        let pending = session
            .data
            .board_cursor
            .pending
            .clone()
            .ok_or_else(|| GovernanceError::invalid_transition("answer", session.state))?;

        let phase_label = board::phase_state(session.data.board_cursor.phase).label();
        let data = board::record_clarification(session.data.clone(), answer).with_example(phase_label, answer);
        let recorded = session
            .with_entry(
                QaEntry::clarified(session.state.label(), question, answer)
                    .asked_by(pending.role, pending.persona_name.as_str()),
            )
            .with_data(data);

        Ok(self.advance_board(recorded).await)
    }

    fn update_health(&self, session: &QuarterlySession) -> QuarterlySession {
        let mut data = session.data.clone();
        let problems = data.current_problems();
        let current = HealthComposition::from_problems(&problems);

        data.current_health = Some(current);
        data.health_trend = data.previous_health.map(|previous| health_trend(previous, current));
        data.growth_active = problems
            .iter()
            .any(|p| p.direction == Some(Direction::Appreciating));

        info!(
            session_id = %session.session_id,
            appreciating = current.appreciating,
            depreciating = current.depreciating,
            stable = current.stable,
            shifts = data.direction_shifts.len(),
            "Portfolio health updated"
        );
        session.with_data(data).with_state(session.state.next())
    }

    /// Bet outcomes, most recent first, counting this session's evaluation.
    async fn recent_bet_statuses(&self, session: &QuarterlySession) -> Result<Vec<BetStatus>> {
        let reviewed = session.data.reviewed_bet.as_ref().map(|b| b.bet_id);
        let mut evaluated: Vec<Bet> = self
            .ctx
            .repositories
            .bets
            .list_for_user(session.user_id)
            .await?
            .into_iter()
            .filter(|b| b.status != BetStatus::Open && Some(b.bet_id) != reviewed)
            .collect();
        evaluated.sort_by(|a, b| b.evaluated_at.cmp(&a.evaluated_at));

        let mut statuses: Vec<BetStatus> = session.data.bet_outcome.into_iter().collect();
        statuses.extend(evaluated.iter().map(|b| b.status));
        Ok(statuses)
    }

    async fn check_triggers(&self, session: &QuarterlySession) -> Result<QuarterlySession> {
        let mut data = session.data.clone();
        let portfolio_created_at = match data.portfolio_version_id {
            Some(id) => self
                .ctx
                .repositories
                .portfolio_versions
                .get(id)
                .await?
                .map(|v| v.created_at),
            None => None,
        };
        let statuses = self.recent_bet_statuses(session).await?;
        let current = data
            .current_health
            .unwrap_or_else(|| HealthComposition::from_problems(&data.current_problems()));

        let fired = evaluate_triggers(&TriggerInput {
            current,
            trend: data.health_trend.as_ref(),
            portfolio_created_at,
            recent_bet_statuses: &statuses,
            now: Utc::now(),
        });
        for trigger in &fired {
            info!(session_id = %session.session_id, kind = ?trigger.kind, detail = %trigger.detail, "Re-setup trigger fired");
        }

        data.triggers = fired;
        data.triggers_evaluated = true;
        Ok(session.with_data(data).with_state(session.state.next()))
    }

    /// Run whatever the new state does on entry: derived steps, and the
    /// first board question.
    async fn settle(&self, mut session: QuarterlySession) -> Result<QuarterlySession> {
        loop {
            session = match session.state {
                QuarterlyState::PortfolioHealthUpdate => self.update_health(&session),
                QuarterlyState::TriggerCheck => self.check_triggers(&session).await?,
                QuarterlyState::CoreBoardInterrogation if session.data.board_cursor.pending.is_none() => {
                    let data = board::enter_phase(
                        self.ctx.generator.as_ref(),
                        session.data.clone(),
                        BoardPhase::Core,
                        session.user_id,
                        session.session_id,
                    )
                    .await;
                    return Ok(session.with_data(data));
                }
                _ => return Ok(session),
            };
        }
    }

    /// Commit the new bet now. Repeat calls return the session unchanged.
    pub async fn create_new_bet(&self, session_id: Uuid) -> Result<QuarterlySession> {
        let session = self.sessions.require(session_id).await?;
        ensure_open(&session)?;
        if session.state != QuarterlyState::GeneratingReport {
            return Err(GovernanceError::invalid_transition("create_new_bet", session.state));
        }
        if session.bet_id.is_some() {
            return Ok(session);
        }

        let draft = session
            .data
            .new_bet
            .as_ref()
            .ok_or_else(|| GovernanceError::Validation("No new bet was recorded".to_string()))?;
        let bet = self
            .ctx
            .repositories
            .bets
            .create(Bet::new(
                session.user_id,
                session.session_id,
                &draft.prediction,
                &draft.wrong_if,
                draft.duration_days,
            ))
            .await?;

        let mut next = session.clone();
        next.bet_id = Some(bet.bet_id);
        let saved = self.sessions.save(next).await?;
        info!(session_id = %session_id, bet_id = %bet.bet_id, "Quarterly bet created");
        Ok(saved)
    }

    fn report_input(session: &QuarterlySession) -> String {
        let data = &session.data;
        let mut input = String::from(abstraction_note(session.abstraction_mode));

        if let (Some(bet), Some(outcome)) = (&data.reviewed_bet, data.bet_outcome) {
            input.push_str(&format!("LAST BET: {} -> {:?}\n", bet.prediction, outcome));
        }
        if let Some(reflection) = &data.bet_reflection {
            input.push_str(&format!("BET REFLECTION: {}\n", reflection));
        }
        if let Some(commitments) = &data.commitments_review {
            input.push_str(&format!("COMMITMENTS VS ACTUAL: {}\n", commitments));
        }
        if let Some(avoided) = &data.avoided_decision {
            input.push_str(&format!(
                "AVOIDED DECISION: {}\nCOST: {}\n",
                avoided.decision, avoided.cost
            ));
        }
        if let Some(comfort) = &data.comfort_work {
            input.push_str(&format!("COMFORT WORK: {}\n", comfort));
        }
        for shift in &data.direction_shifts {
            let from = shift
                .from
                .map(|d| d.to_string())
                .unwrap_or_else(|| "unclassified".to_string());
            input.push_str(&format!("SHIFT: {} {} -> {}\n", shift.problem_name, from, shift.to));
        }
        if let Some(trend) = &data.health_trend {
            input.push_str(&format!(
                "HEALTH CHANGE: appreciating {:+}, depreciating {:+}, stable {:+}\n",
                trend.appreciating_change, trend.depreciating_change, trend.stable_change
            ));
        }

        input.push_str("\nBOARD:\n");
        for response in data.core_responses.iter().chain(&data.growth_responses) {
            let flag = if response.skipped {
                " [refused]"
            } else if response.vague {
                " [vague]"
            } else {
                ""
            };
            input.push_str(&format!(
                "{} ({}) on {}: {}\nA: {}{}\n",
                response.persona_name,
                response.role.title(),
                response.problem_name,
                response.question,
                response.answer,
                flag
            ));
            if let Some(example) = &response.concrete_example {
                input.push_str(&format!("EXAMPLE: {}\n", example));
            }
        }

        for trigger in &data.triggers {
            input.push_str(&format!("TRIGGER: {}\n", trigger.detail));
        }
        if let Some(commitments) = &data.next_quarter_commitments {
            input.push_str(&format!("NEXT QUARTER: {}\n", commitments));
        }
        if let Some(bet) = &data.new_bet {
            input.push_str(&format!(
                "NEW BET ({} days): {}\nWRONG IF: {}\n",
                bet.duration_days, bet.prediction, bet.wrong_if
            ));
        }
        input
    }

    /// Write the report and commit everything the review produced.
    pub async fn generate_output(&self, session_id: Uuid) -> Result<QuarterlySession> {
        let session = self.sessions.require(session_id).await?;
        ensure_open(&session)?;
        if session.state != QuarterlyState::GeneratingReport {
            return Err(GovernanceError::invalid_transition("generate_output", session.state));
        }
        let data = &session.data;
        if !data.all_core_board_responded() || !data.all_growth_board_responded() {
            return Err(GovernanceError::Validation(format!(
                "Board interrogation incomplete: {} of {} core, {} of {} growth",
                data.core_responses.len(),
                data.core_roster_size(),
                data.growth_responses.len(),
                data.growth_roster_size()
            )));
        }
        if !data.triggers_evaluated {
            return Err(GovernanceError::Validation(
                "Re-setup triggers have not been evaluated".to_string(),
            ));
        }

        let request = GenerationRequest::new(REPORT_PROMPT, Self::report_input(&session), 2000);
        let report = self.ctx.generator.generate(request).await.map_err(|e| {
            error!(session_id = %session_id, error = %e, "Quarterly report generation failed");
            e
        })?;

        let repos = &self.ctx.repositories;
        if let (Some(_), Some(bet)) = (data.bet_outcome, &data.reviewed_bet) {
            repos.bets.update(bet.clone()).await?;
        }
        for trigger in &data.triggers {
            repos
                .triggers
                .create(TriggerRecord {
                    trigger_id: Uuid::new_v4(),
                    user_id: session.user_id,
                    session_id: session.session_id,
                    kind: trigger.kind,
                    detail: trigger.detail.clone(),
                    created_at: Utc::now(),
                })
                .await?;
        }

        let mut closing = session.clone();
        if closing.bet_id.is_none() {
            if let Some(draft) = &data.new_bet {
                let bet = repos
                    .bets
                    .create(Bet::new(
                        session.user_id,
                        session.session_id,
                        &draft.prediction,
                        &draft.wrong_if,
                        draft.duration_days,
                    ))
                    .await?;
                closing.bet_id = Some(bet.bet_id);
            }
        }

        closing.portfolio_version_id = data.portfolio_version_id;
        if !data.direction_shifts.is_empty() {
            let problems = data.current_problems();
            for problem in problems
                .iter()
                .filter(|p| data.direction_shifts.iter().any(|s| s.problem_id == p.problem_id))
            {
                repos.problems.update(problem.clone()).await?;
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
                    problem_ids: problems.iter().map(|p| p.problem_id).collect(),
                    health: HealthComposition::from_problems(&problems),
                    created_at: Utc::now(),
                })
                .await?;
            closing.portfolio_version_id = Some(portfolio.version_id);
            info!(session_id = %session_id, version, "Portfolio version created from direction shifts");
        }

        let saved = self.sessions.save(finalize(&closing, Some(report.text))).await?;
        info!(
            session_id = %session_id,
            triggers = data.triggers.len(),
            bet_id = ?saved.bet_id,
            tokens_used = report.tokens_used,
            "Quarterly Review finalized"
        );
        Ok(saved)
    }
}

#[async_trait]
impl FlowController for QuarterlyReviewController {
    type State = QuarterlyState;
    type Data = QuarterlyData;

    async fn start_session(&self, user_id: Uuid) -> Result<QuarterlySession> {
        let data = self.baseline(user_id).await?;
        open_session(&self.ctx, self.sessions.as_ref(), user_id, data).await
    }

    async fn load_session(&self, session_id: Uuid) -> Result<QuarterlySession> {
        self.sessions.require(session_id).await
    }

    async fn process_answer(&self, session_id: Uuid, answer: &str) -> Result<QuarterlySession> {
        let session = self.sessions.require(session_id).await?;
        ensure_open(&session)?;
        let answer = non_empty(answer)?;
        let state = session.state;
        let question = Self::question_for(state, &session.data);

        let next = if state == QuarterlyState::SensitivityGate {
            pass_sensitivity_gate(&self.ctx, &session, answer).await?
        } else if state == QuarterlyState::BoardInterrogationClarify {
            self.clarify_board(&session, &question, answer).await?
        } else if state.is_board() {
            self.answer_board(&session, &question, answer).await?
        } else if let Some(parent) = state.parent_of() {
            let data = session.data.clone().with_example(parent.label(), answer);
            session
                .with_entry(QaEntry::clarified(state.label(), question, answer))
                .with_data(data)
                .with_state(state.next())
        } else if state.is_question() {
            let data = self.apply_answer(&session, answer).await?;
            let (vague, judged) = judge(&self.ctx, &session, &question, answer).await;
            judged
                .with_entry(QaEntry::answered(state.label(), question, answer, vague))
                .with_data(data)
                .with_state(route(state, vague))
        } else {
            return Err(GovernanceError::invalid_transition("answer", state));
        };

        let next = self.settle(next).await?;
        let saved = self.sessions.save(next).await?;
        info!(
            session_id = %session_id,
            from = state.label(),
            to = saved.state.label(),
            progress = saved.progress(),
            "Quarterly answer accepted"
        );
        Ok(saved)
    }

    async fn skip_vagueness_gate(&self, session_id: Uuid) -> Result<QuarterlySession> {
        let session = self.sessions.require(session_id).await?;
        let question = Self::question_for(session.state, &session.data);

        let next = if session.state == QuarterlyState::BoardInterrogationClarify {
            let pending = session.data.board_cursor.pending.clone();
            let skipped = skip_clarify(&session, &question, session.state, |entry| match &pending {
                Some(p) => entry.asked_by(p.role, p.persona_name.as_str()),
                None => entry,
            })?;
            let data = board::record_skip(skipped.data.clone());
            self.advance_board(skipped.with_data(data)).await
        } else {
            skip_clarify(&session, &question, session.state.next(), |entry| entry)?
        };

        let next = self.settle(next).await?;
        let saved = self.sessions.save(next).await?;
        info!(session_id = %session_id, skip_count = saved.skip_count, to = saved.state.label(), "Clarify step skipped");
        Ok(saved)
    }

    async fn abandon(&self, session_id: Uuid) -> Result<QuarterlySession> {
        abandon_session(self.sessions.as_ref(), session_id).await
    }

    fn current_question(&self, session: &QuarterlySession) -> Option<String> {
        let state = session.state;
        if state.is_question() || state.is_clarify() || state == QuarterlyState::SensitivityGate {
            Some(Self::question_for(state, &session.data))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::testing::context;
    use crate::generation::testing::ScriptedGenerator;
    use crate::models::{BoardRole, TriggerKind};
    use crate::session::REFUSED_EXAMPLE;
    use crate::state::{InMemorySessionStore, Repository};
    use chrono::Duration;
    use std::collections::HashMap;

    fn controller(generator: ScriptedGenerator) -> (QuarterlyReviewController, Arc<EngineContext>) {
        let (ctx, _) = context(generator);
        let store = Arc::new(InMemorySessionStore::<QuarterlyState, QuarterlyData>::new());
        (QuarterlyReviewController::new(ctx.clone(), store), ctx)
    }

    fn problem(user: Uuid, session: Uuid, name: &str, direction: Direction, percent: u32) -> Problem {
        let mut p = Problem::named(user, session, name);
        p.direction = Some(direction);
        p.time_allocation_percent = Some(percent);
        p
    }

    /// A published portfolio and an open bet of the given age.
    async fn seed(ctx: &EngineContext, user: Uuid, bet_age_days: i64) -> Bet {
        let setup_session = Uuid::new_v4();
        let problems = vec![
            problem(user, setup_session, "Vendor renewals", Direction::Appreciating, 50),
            problem(user, setup_session, "Weekly reporting", Direction::Stable, 30),
            problem(user, setup_session, "Compliance audits", Direction::Depreciating, 20),
        ];
        let repos = &ctx.repositories;
        for p in &problems {
            repos.problems.create(p.clone()).await.unwrap();
        }
        for member in board::assemble_board(user, setup_session, &problems, &HashMap::new()) {
            repos.board_members.create(member).await.unwrap();
        }
        repos
            .portfolio_versions
            .create(PortfolioVersion {
                version_id: Uuid::new_v4(),
                user_id: user,
                session_id: setup_session,
                version: 1,
                problem_ids: problems.iter().map(|p| p.problem_id).collect(),
                health: HealthComposition::from_problems(&problems),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let mut bet = Bet::new(user, Uuid::new_v4(), "Annual plans double", "Annual share flat", 90);
        bet.created_at = Utc::now() - Duration::days(bet_age_days);
        repos.bets.create(bet).await.unwrap()
    }

    fn board_questions(count: usize) -> ScriptedGenerator {
        (1..=count).fold(ScriptedGenerator::new(), |g, i| {
            g.reply(&format!("What exactly happened in week {}?", i))
        })
    }

    async fn to_board(controller: &QuarterlyReviewController, user: Uuid) -> QuarterlySession {
        let answers = [
            "no",
            "It was wrong, churn went up 4% in May",
            "Committed to 3 pricing experiments, shipped 2 by August",
            "Avoiding the Berlin office closure, costing us 10 hours a week",
            "Rebuilt the Monday KPI deck 4 times",
            "Weekly reporting is now depreciating since the BI rollout in July",
            "Signed the Acme renewal contract on 9/12\nthe CFO asked me to run the pricing review",
        ];
        let mut s = controller.start_session(user).await.unwrap();
        for answer in answers {
            s = controller.process_answer(s.session_id, answer).await.unwrap();
        }
        s
    }

    #[tokio::test]
    async fn test_start_requires_portfolio() {
        let (controller, _) = controller(ScriptedGenerator::new());
        let err = controller.start_session(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_full_review_commits_artifacts() {
        let (controller, ctx) = controller(
            board_questions(7)
                .reply("QUARTERLY REPORT")
                .reply("QUARTERLY REPORT"),
        );
        let user = Uuid::new_v4();
        let old_bet = seed(&ctx, user, 100).await;

        let s = to_board(&controller, user).await;
        assert_eq!(s.state, QuarterlyState::CoreBoardInterrogation);
        assert_eq!(s.data.bet_outcome, Some(BetStatus::Wrong));
        assert_eq!(s.data.direction_shifts.len(), 1);
        assert!(s.data.growth_active);
        let trend = s.data.health_trend.unwrap();
        assert_eq!(trend.depreciating_change, 30);
        assert_eq!(trend.stable_change, -30);
        assert_eq!(s.data.evidence_ids.len(), 2);
        assert_eq!(
            s.data.board_cursor.pending.as_ref().unwrap().question,
            "What exactly happened in week 1?"
        );

        let mut s = s;
        for i in 0..5 {
            assert_eq!(s.state, QuarterlyState::CoreBoardInterrogation, "core answer {}", i);
            s = controller
                .process_answer(s.session_id, "Shipped the pricing memo to Dana on Friday")
                .await
                .unwrap();
        }
        assert!(s.data.all_core_board_responded());
        assert_eq!(s.state, QuarterlyState::GrowthBoardInterrogation);

        for _ in 0..2 {
            s = controller
                .process_answer(s.session_id, "Pitched annual plans to 12 customers in October")
                .await
                .unwrap();
        }
        assert_eq!(s.state, QuarterlyState::NextQuarterCommitments);
        assert!(s.data.triggers_evaluated);
        let kinds: Vec<TriggerKind> = s.data.triggers.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TriggerKind::DepreciatingTrend]);

        let board_entries = s.transcript.iter().filter(|e| e.persona_role.is_some()).count();
        assert_eq!(board_entries, 7);

        let s = controller
            .process_answer(s.session_id, "Ship the annual pricing page by November 15")
            .await
            .unwrap();
        let err = controller
            .process_answer(s.session_id, "Annual plans reach 40% of new deals in 90 days")
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(controller.load_session(s.session_id).await.unwrap().state, QuarterlyState::NewBet);

        let s = controller
            .process_answer(
                s.session_id,
                "Annual plans reach 40% of new deals in 90 days. I'm wrong if they stay under 25%",
            )
            .await
            .unwrap();
        assert_eq!(s.state, QuarterlyState::GeneratingReport);

        let with_bet = controller.create_new_bet(s.session_id).await.unwrap();
        assert!(with_bet.bet_id.is_some());
        let again = controller.create_new_bet(s.session_id).await.unwrap();
        assert_eq!(again, with_bet);

        let done = controller.generate_output(s.session_id).await.unwrap();
        assert_eq!(done.state, QuarterlyState::Finalized);
        assert_eq!(done.output.as_deref(), Some("QUARTERLY REPORT"));
        assert_eq!(done.bet_id, with_bet.bet_id);

        let repos = &ctx.repositories;
        let evaluated = repos.bets.get(old_bet.bet_id).await.unwrap().unwrap();
        assert_eq!(evaluated.status, BetStatus::Wrong);
        assert_eq!(evaluated.evaluation_session_id, Some(done.session_id));
        assert_eq!(repos.bets.list_for_user(user).await.unwrap().len(), 2);
        assert_eq!(repos.triggers.list_for_session(done.session_id).await.unwrap().len(), 1);

        let latest = repos.latest_portfolio(user).await.unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(Some(latest.version_id), done.portfolio_version_id);
        assert_eq!(latest.health.depreciating, 50);
    }

    #[tokio::test]
    async fn test_board_clarify_and_skip_follow_the_cursor() {
        let (controller, ctx) = controller(ScriptedGenerator::new());
        let user = Uuid::new_v4();
        seed(&ctx, user, 10).await;

        let mut s = controller.start_session(user).await.unwrap();
        let answers = [
            "no",
            "Correct, annual plans hit 30% in June",
            "Committed to 3 pricing experiments, shipped 2 by August",
            "Avoiding the Berlin office closure, costing us 10 hours a week",
            "Rebuilt the Monday KPI deck 4 times",
            "none",
            "Signed the Acme renewal contract on 9/12",
        ];
        for answer in answers {
            s = controller.process_answer(s.session_id, answer).await.unwrap();
        }
        assert_eq!(s.state, QuarterlyState::CoreBoardInterrogation);
        let first = s.data.board_cursor.pending.clone().unwrap();
        assert_eq!(first.role, BoardRole::Accountability);
        assert_eq!(
            first.question,
            board::fallback_question(BoardRole::Accountability, "Vendor renewals")
        );

        let s = controller.process_answer(s.session_id, "stuff mostly").await.unwrap();
        assert_eq!(s.state, QuarterlyState::BoardInterrogationClarify);
        assert!(controller.current_question(&s).unwrap().contains(&first.persona_name));

        let s = controller
            .process_answer(s.session_id, "Closed the Acme renewal on 9/12")
            .await
            .unwrap();
        assert_eq!(s.state, QuarterlyState::CoreBoardInterrogation);
        assert_eq!(s.data.board_cursor.pending_index, 1);
        assert_eq!(
            s.data.core_responses[0].concrete_example.as_deref(),
            Some("Closed the Acme renewal on 9/12")
        );

        let s = controller.process_answer(s.session_id, "things").await.unwrap();
        assert_eq!(s.state, QuarterlyState::BoardInterrogationClarify);
        let s = controller.skip_vagueness_gate(s.session_id).await.unwrap();
        assert_eq!(s.state, QuarterlyState::CoreBoardInterrogation);
        assert_eq!(s.skip_count, 1);
        assert!(s.data.core_responses[1].skipped);

        let refused = s.transcript.last().unwrap();
        assert_eq!(refused.answer, REFUSED_EXAMPLE);
        assert_eq!(refused.persona_role, Some(BoardRole::MarketReality));
    }

    #[tokio::test]
    async fn test_expired_before_due_is_rejected() {
        let (controller, ctx) = controller(ScriptedGenerator::new());
        let user = Uuid::new_v4();
        seed(&ctx, user, 10).await;

        let s = controller.start_session(user).await.unwrap();
        let s = controller.process_answer(s.session_id, "no").await.unwrap();
        assert_eq!(s.state, QuarterlyState::LastBetReview);

        let before = controller.load_session(s.session_id).await.unwrap();
        let err = controller
            .process_answer(s.session_id, "It expired, I didn't test it")
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(controller.load_session(s.session_id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_report_waits_for_the_board() {
        let (controller, ctx) = controller(ScriptedGenerator::new().reply("REPORT"));
        let user = Uuid::new_v4();
        seed(&ctx, user, 100).await;

        let s = controller.start_session(user).await.unwrap();
        let err = controller.generate_output(s.session_id).await.unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidTransition { .. }));

        let err = controller.create_new_bet(s.session_id).await.unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidTransition { .. }));
    }

    #[test]
    fn test_unsupported_strong_evidence_is_downgraded() {
        let mut appreciating = Problem::named(Uuid::new_v4(), Uuid::new_v4(), "Pricing");
        appreciating.direction = Some(Direction::Appreciating);

        let items = evidence_from_answer(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "the pricing report is getting read\nShipped the Acme dashboard on 3/14",
            &[appreciating.clone()],
        );
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].strength, EvidenceStrength::Medium);
        assert!(items[0].strength_override.is_some());
        assert_eq!(items[1].strength, EvidenceStrength::Strong);
        assert!(items.iter().all(|i| i.problem_id == Some(appreciating.problem_id)));
    }
}
