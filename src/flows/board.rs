//! Board assembly and interrogation
//!
//! Setup seats the board: five core roles always, two growth roles when
//! some problem is appreciating, each anchored to one problem. The
//! quarterly review walks the roster in fixed order, one question per
//! persona, tracking the pending persona in a cursor beside the state.

use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::generation::{parse_json_reply, GenerationRequest, TextGenerator};
use crate::machine::QuarterlyState;
use crate::models::{BoardMember, BoardRole, Direction, PersonaProfile, Problem};
use crate::session::{BoardCursor, BoardPhase, BoardQuestion, BoardResponse, QuarterlyData};

const PERSONA_PROMPT: &str = r#"You cast a personal advisory board. For each requested role, invent one persona.
Return ONLY a JSON array:
[{"role": "<role id>", "name": "...", "background": "...", "communicationStyle": "...", "signaturePhrase": "..."}]
Role ids: accountability, market_reality, avoidance, long_term_positioning, devils_advocate, opportunity_scout, network_builder"#;

const QUESTION_PROMPT: &str = r#"You are one member of a personal advisory board running a quarterly review.
Stay in character. Ask exactly ONE pointed question about the anchored problem.
The question must demand a specific example, date, name or number. Return only the question."#;

fn allocation(problem: &Problem) -> u32 {
    problem.time_allocation_percent.unwrap_or(0)
}

/// Problems by allocation, largest first. Ties keep list order.
fn by_allocation(problems: &[Problem]) -> Vec<&Problem> {
    let mut sorted: Vec<&Problem> = problems.iter().collect();
    sorted.sort_by(|a, b| allocation(b).cmp(&allocation(a)));
    sorted
}

/// The problem a seat is anchored to.
pub fn anchor_problem(role: BoardRole, problems: &[Problem]) -> Option<&Problem> {
    let sorted = by_allocation(problems);
    let with = |direction: Direction| {
        sorted
            .iter()
            .copied()
            .filter(|p| p.direction == Some(direction))
            .collect::<Vec<_>>()
    };
    let largest = sorted.first().copied();

    match role {
        BoardRole::Accountability => largest,
        BoardRole::MarketReality => with(Direction::Depreciating).first().copied().or(largest),
        BoardRole::Avoidance => sorted.last().copied(),
        BoardRole::LongTermPositioning => with(Direction::Appreciating)
            .first()
            .copied()
            .or_else(|| with(Direction::Stable).first().copied())
            .or(largest),
        BoardRole::DevilsAdvocate => sorted.get(1).copied().or(largest),
        BoardRole::OpportunityScout => with(Direction::Appreciating).first().copied(),
        BoardRole::NetworkBuilder => {
            let appreciating = with(Direction::Appreciating);
            appreciating.get(1).or_else(|| appreciating.first()).copied()
        }
    }
}

pub fn anchored_demand(role: BoardRole, problem_name: &str) -> String {
    format!("On {}: {}", problem_name, role.mandate())
}

pub fn fallback_question(role: BoardRole, problem_name: &str) -> String {
    match role {
        BoardRole::Accountability => format!(
            "On {}: what did you commit to last quarter, and what actually shipped?",
            problem_name
        ),
        BoardRole::MarketReality => format!(
            "Who would pay for your work on {} today, and how do you know?",
            problem_name
        ),
        BoardRole::Avoidance => format!(
            "What decision about {} have you postponed, and when did it last come up?",
            problem_name
        ),
        BoardRole::LongTermPositioning => format!(
            "If you keep working on {} the same way for five years, what does that make you?",
            problem_name
        ),
        BoardRole::DevilsAdvocate => format!(
            "Make the case that {} is not worth your time. What evidence supports it?",
            problem_name
        ),
        BoardRole::OpportunityScout => format!(
            "What would it take to double your leverage on {} next quarter?",
            problem_name
        ),
        BoardRole::NetworkBuilder => format!(
            "Who outside your team should know about your results on {}, and when will you tell them?",
            problem_name
        ),
    }
}

fn seat(
    role: BoardRole,
    persona: PersonaProfile,
    problems: &[Problem],
    user_id: Uuid,
    session_id: Uuid,
) -> BoardMember {
    let anchor = anchor_problem(role, problems);
    let problem_name = anchor.map(|p| p.name.clone()).unwrap_or_default();

    BoardMember {
        member_id: Uuid::new_v4(),
        user_id,
        session_id,
        role,
        is_growth: role.is_growth(),
        active: true,
        anchored_problem_id: anchor.map(|p| p.problem_id),
        anchored_demand: anchored_demand(role, &problem_name),
        anchored_problem_name: problem_name,
        persona,
        created_at: chrono::Utc::now(),
    }
}

/// Seat the full board for a portfolio.
pub fn assemble_board(
    user_id: Uuid,
    session_id: Uuid,
    problems: &[Problem],
    personas: &HashMap<BoardRole, PersonaProfile>,
) -> Vec<BoardMember> {
    let growth = problems
        .iter()
        .any(|p| p.direction == Some(Direction::Appreciating));

    let mut roles: Vec<BoardRole> = BoardRole::CORE.to_vec();
    if growth {
        roles.extend(BoardRole::GROWTH);
    }

    roles
        .into_iter()
        .map(|role| {
            let persona = personas
                .get(&role)
                .cloned()
                .unwrap_or_else(|| role.default_persona());
            seat(role, persona, problems, user_id, session_id)
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersonaReply {
    role: BoardRole,
    name: String,
    #[serde(default)]
    background: String,
    #[serde(default, alias = "communication_style")]
    communication_style: String,
    #[serde(default, alias = "signature_phrase")]
    signature_phrase: Option<String>,
}

/// Personas from the generator. Roles it leaves out, or any failure,
/// fall back to the fixed roster.
pub async fn generate_personas(
    generator: &dyn TextGenerator,
    problems: &[Problem],
    abstraction_mode: bool,
) -> HashMap<BoardRole, PersonaProfile> {
    let mut message = String::new();
    if abstraction_mode {
        message.push_str("Keep personas generic; do not reference the user's employer.\n");
    }
    message.push_str("Portfolio:\n");
    for problem in problems {
        let direction = problem
            .direction
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unclassified".to_string());
        message.push_str(&format!("- {} ({})\n", problem.name, direction));
    }

    let request = GenerationRequest::new(PERSONA_PROMPT, message, 1200);
    let replies = match generator.generate(request).await {
        Ok(response) => parse_json_reply::<Vec<PersonaReply>>(&response.text),
        Err(e) => Err(e),
    };

    match replies {
        Ok(replies) => replies
            .into_iter()
            .filter(|r| !r.name.trim().is_empty())
            .map(|r| {
                (
                    r.role,
                    PersonaProfile {
                        name: r.name,
                        background: r.background,
                        communication_style: r.communication_style,
                        signature_phrase: r.signature_phrase.filter(|s| !s.trim().is_empty()),
                    },
                )
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, "Persona generation failed, using default roster");
            HashMap::new()
        }
    }
}

/// Board state for a phase.
pub fn phase_state(phase: BoardPhase) -> QuarterlyState {
    match phase {
        BoardPhase::Core => QuarterlyState::CoreBoardInterrogation,
        BoardPhase::Growth => QuarterlyState::GrowthBoardInterrogation,
    }
}

/// Members for a phase in roster order. Seats missing from the stored
/// board get a default persona anchored to the current portfolio.
pub fn roster(data: &QuarterlyData, phase: BoardPhase, user_id: Uuid, session_id: Uuid) -> Vec<BoardMember> {
    let roles: &[BoardRole] = match phase {
        BoardPhase::Core => &BoardRole::CORE,
        BoardPhase::Growth if data.growth_active => &BoardRole::GROWTH,
        BoardPhase::Growth => &[],
    };
    let problems = data.current_problems();

    roles
        .iter()
        .map(|role| {
            data.board
                .iter()
                .find(|m| m.active && m.role == *role)
                .cloned()
                .unwrap_or_else(|| seat(*role, role.default_persona(), &problems, user_id, session_id))
        })
        .collect()
}

fn review_context(data: &QuarterlyData) -> String {
    let mut context = String::new();
    if let Some(commitments) = &data.commitments_review {
        context.push_str(&format!("Commitments vs actual: {}\n", commitments));
    }
    if let Some(avoided) = &data.avoided_decision {
        context.push_str(&format!("Avoided decision: {}\n", avoided.decision));
    }
    if let Some(comfort) = &data.comfort_work {
        context.push_str(&format!("Comfort work: {}\n", comfort));
    }
    for shift in &data.direction_shifts {
        context.push_str(&format!("{} is now {}\n", shift.problem_name, shift.to));
    }
    context
}

/// One question from a persona, or its role's fixed question.
pub async fn ask(generator: &dyn TextGenerator, member: &BoardMember, data: &QuarterlyData) -> BoardQuestion {
    let problem_name = if member.anchored_problem_name.is_empty() {
        "your portfolio".to_string()
    } else {
        member.anchored_problem_name.clone()
    };

    let message = format!(
        "You are {} ({}). Background: {}. Style: {}.\nAnchored problem: {}\nDemand: {}\n\nReview so far:\n{}",
        member.persona.name,
        member.role.title(),
        member.persona.background,
        member.persona.communication_style,
        problem_name,
        member.anchored_demand,
        review_context(data),
    );

    let question = match generator
        .generate(GenerationRequest::new(QUESTION_PROMPT, message, 150))
        .await
    {
        Ok(response) => {
            let text = response.text.trim().trim_matches('"').trim().to_string();
            if text.is_empty() {
                fallback_question(member.role, &problem_name)
            } else {
                text
            }
        }
        Err(e) => {
            warn!(role = ?member.role, error = %e, "Board question generation failed, using fallback");
            fallback_question(member.role, &problem_name)
        }
    };

    BoardQuestion {
        member_id: member.member_id,
        role: member.role,
        persona_name: member.persona.name.clone(),
        problem_name,
        question,
    }
}

/// Start a phase at its first persona. An empty phase leaves nothing
/// pending.
pub async fn enter_phase(
    generator: &dyn TextGenerator,
    data: QuarterlyData,
    phase: BoardPhase,
    user_id: Uuid,
    session_id: Uuid,
) -> QuarterlyData {
    let members = roster(&data, phase, user_id, session_id);
    let pending = match members.first() {
        Some(member) => Some(ask(generator, member, &data).await),
        None => None,
    };

    debug!(phase = ?phase, roster = members.len(), "Board phase entered");
    data.with_board_cursor(BoardCursor {
        phase,
        pending_index: 0,
        pending,
    })
}

/// Record the pending persona's answer. The cursor stays put so a
/// clarify step can refer back to it.
pub fn record_answer(data: QuarterlyData, answer: &str, vague: bool) -> QuarterlyData {
    let cursor = data.board_cursor.clone();
    let Some(pending) = cursor.pending else {
        return data;
    };

    data.with_board_response(
        cursor.phase,
        BoardResponse {
            member_id: pending.member_id,
            role: pending.role,
            persona_name: pending.persona_name,
            problem_name: pending.problem_name,
            question: pending.question,
            answer: answer.to_string(),
            vague,
            concrete_example: None,
            skipped: false,
        },
    )
}

fn last_response_mut(data: &mut QuarterlyData) -> Option<&mut BoardResponse> {
    match data.board_cursor.phase {
        BoardPhase::Core => data.core_responses.last_mut(),
        BoardPhase::Growth => data.growth_responses.last_mut(),
    }
}

pub fn record_clarification(mut data: QuarterlyData, example: &str) -> QuarterlyData {
    if let Some(response) = last_response_mut(&mut data) {
        response.concrete_example = Some(example.to_string());
    }
    data
}

pub fn record_skip(mut data: QuarterlyData) -> QuarterlyData {
    if let Some(response) = last_response_mut(&mut data) {
        response.skipped = true;
    }
    data
}

/// Where the loop stands after a persona is done.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardProgress {
    /// Next persona in the same phase is pending.
    Asking(QuarterlyState),
    /// Both phases are complete.
    Complete,
}

/// Move past the current persona: next in roster, next phase, or done.
pub async fn advance(
    generator: &dyn TextGenerator,
    data: QuarterlyData,
    user_id: Uuid,
    session_id: Uuid,
) -> (QuarterlyData, BoardProgress) {
    let phase = data.board_cursor.phase;
    let next_index = data.board_cursor.pending_index + 1;
    let members = roster(&data, phase, user_id, session_id);

    if next_index < members.len() && data.responses(phase).len() < data.roster_size(phase) {
        let pending = ask(generator, &members[next_index], &data).await;
        let data = data.with_board_cursor(BoardCursor {
            phase,
            pending_index: next_index,
            pending: Some(pending),
        });
        return (data, BoardProgress::Asking(phase_state(phase)));
    }

    match phase {
        BoardPhase::Core => {
            let data = enter_phase(generator, data, BoardPhase::Growth, user_id, session_id).await;
            if data.all_growth_board_responded() {
                (data, BoardProgress::Complete)
            } else {
                (data, BoardProgress::Asking(QuarterlyState::GrowthBoardInterrogation))
            }
        }
        BoardPhase::Growth => {
            let data = data.with_board_cursor(BoardCursor {
                phase,
                pending_index: next_index,
                pending: None,
            });
            (data, BoardProgress::Complete)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::testing::ScriptedGenerator;

    fn problem(name: &str, direction: Direction, percent: u32) -> Problem {
        let mut p = Problem::named(Uuid::new_v4(), Uuid::new_v4(), name);
        p.direction = Some(direction);
        p.time_allocation_percent = Some(percent);
        p
    }

    fn portfolio() -> Vec<Problem> {
        vec![
            problem("Reporting", Direction::Depreciating, 50),
            problem("Pricing", Direction::Appreciating, 30),
            problem("Hiring", Direction::Stable, 20),
        ]
    }

    #[test]
    fn test_anchoring() {
        let problems = portfolio();
        let name = |role| anchor_problem(role, &problems).map(|p| p.name.as_str());

        assert_eq!(name(BoardRole::Accountability), Some("Reporting"));
        assert_eq!(name(BoardRole::MarketReality), Some("Reporting"));
        assert_eq!(name(BoardRole::Avoidance), Some("Hiring"));
        assert_eq!(name(BoardRole::LongTermPositioning), Some("Pricing"));
        assert_eq!(name(BoardRole::DevilsAdvocate), Some("Pricing"));
        assert_eq!(name(BoardRole::OpportunityScout), Some("Pricing"));
        assert_eq!(name(BoardRole::NetworkBuilder), Some("Pricing"));
    }

    #[test]
    fn test_growth_seats_need_appreciating() {
        let problems = portfolio();
        let board = assemble_board(Uuid::new_v4(), Uuid::new_v4(), &problems, &HashMap::new());
        assert_eq!(board.len(), 7);
        assert!(crate::models::validate_board(&board, &problems).is_ok());

        let flat: Vec<Problem> = problems
            .into_iter()
            .map(|mut p| {
                p.direction = Some(Direction::Stable);
                p
            })
            .collect();
        let board = assemble_board(Uuid::new_v4(), Uuid::new_v4(), &flat, &HashMap::new());
        assert_eq!(board.len(), 5);
        assert!(board.iter().all(|m| !m.is_growth));
        assert_eq!(board[0].persona.name, "Maya Chen");
    }

    #[tokio::test]
    async fn test_generated_personas_override_defaults() {
        let generator = ScriptedGenerator::new().reply(
            r#"[{"role": "avoidance", "name": "Ines Duarte", "background": "Therapist", "communicationStyle": "Soft"}]"#,
        );
        let personas = generate_personas(&generator, &portfolio(), false).await;
        assert_eq!(personas.len(), 1);
        assert_eq!(personas[&BoardRole::Avoidance].name, "Ines Duarte");

        let failing = ScriptedGenerator::new().fail(false);
        assert!(generate_personas(&failing, &portfolio(), false).await.is_empty());
    }

    #[tokio::test]
    async fn test_question_fallback_per_role() {
        let data = QuarterlyData {
            problems: portfolio(),
            ..QuarterlyData::default()
        };
        let members = roster(&data, BoardPhase::Core, Uuid::new_v4(), Uuid::new_v4());
        let question = ask(&ScriptedGenerator::new(), &members[0], &data).await;
        assert_eq!(question.question, fallback_question(BoardRole::Accountability, "Reporting"));
        assert_eq!(question.persona_name, "Maya Chen");
    }

    #[tokio::test]
    async fn test_loop_walks_core_then_skips_inactive_growth() {
        let generator = ScriptedGenerator::new();
        let user = Uuid::new_v4();
        let session = Uuid::new_v4();
        let mut data = enter_phase(
            &generator,
            QuarterlyData {
                problems: portfolio(),
                growth_active: false,
                ..QuarterlyData::default()
            },
            BoardPhase::Core,
            user,
            session,
        )
        .await;

        for i in 0..5 {
            assert_eq!(data.board_cursor.pending_index, i);
            let role = data.board_cursor.pending.as_ref().unwrap().role;
            assert_eq!(role, BoardRole::CORE[i]);

            data = record_answer(data, "Closed the Q3 pricing review with Finance", false);
            let (next, progress) = advance(&generator, data, user, session).await;
            data = next;
            if i < 4 {
                assert_eq!(progress, BoardProgress::Asking(QuarterlyState::CoreBoardInterrogation));
            } else {
                assert_eq!(progress, BoardProgress::Complete);
            }
        }

        assert!(data.all_core_board_responded());
        assert!(data.all_growth_board_responded());
    }

    #[tokio::test]
    async fn test_clarify_and_skip_mark_last_response() {
        let generator = ScriptedGenerator::new();
        let data = enter_phase(
            &generator,
            QuarterlyData {
                problems: portfolio(),
                growth_active: true,
                ..QuarterlyData::default()
            },
            BoardPhase::Growth,
            Uuid::new_v4(),
            Uuid::new_v4(),
        )
        .await;

        let data = record_answer(data, "stuff", true);
        let data = record_clarification(data, "Pitched the pricing model to Priya on 3/14");
        assert_eq!(
            data.growth_responses[0].concrete_example.as_deref(),
            Some("Pitched the pricing model to Priya on 3/14")
        );

        let data = record_skip(data);
        assert!(data.growth_responses[0].skipped);
        assert!(data.core_responses.is_empty());
    }
}
