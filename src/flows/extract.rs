//! Answer extraction
//!
//! Turns free-text answers into accumulator fields. Everything here is
//! deterministic except `extract_problem_names`, which asks the text
//! generator first and falls back to delimiter splitting.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::GovernanceError;
use crate::generation::{parse_json_reply, GenerationRequest, TextGenerator};
use crate::models::{BetStatus, Direction, EvidenceKind, Problem, Scarcity};
use crate::session::{AvoidedDecision, BetDraft, DirectionShift};
use crate::Result;

pub const DEFAULT_BET_DAYS: u32 = 90;

const PROBLEM_PROMPT: &str = r#"Extract the distinct work problems the user says they are paid to solve.
Use the user's own wording, shortened to a few words each. Do not invent problems.
Return ONLY a JSON array of strings, e.g. ["Vendor negotiations", "Quarterly forecasting"]"#;

const DECISION_WORDS: &[&str] = &[
    "decided", "decision", "approved", "chose", "signed off", "rejected", "hired", "fired",
    "promoted", "cancelled", "canceled", "committed",
];

const ARTIFACT_WORDS: &[&str] = &[
    "shipped", "published", "wrote", "document", "report", "deck", "released", "launched",
    "merged", "built", "dashboard", "prototype", "contract",
];

const CALENDAR_WORDS: &[&str] = &[
    "meeting", "calendar", "invited", "scheduled", "1:1", "one-on-one", "presented",
    "workshop", "offsite", "standup",
];

const PROXY_WORDS: &[&str] = &[
    "feedback", "said", "told me", "asked me", "praised", "mentioned", "heard", "noticed",
    "thanked", "recommended",
];

lazy_static! {
    static ref BULLET: Regex = Regex::new(r"^\s*(?:[-*•]|\(?\d{1,2}[.):])\s*").unwrap();
    static ref FINAL_AND: Regex = Regex::new(r"(?i),?\s+and\s+").unwrap();
    static ref LABELED_DECISION: Regex =
        Regex::new(r"(?i)\bdecision\s*:\s*(.+?)(?:\s*\bcost\s*:|$)").unwrap();
    static ref LABELED_COST: Regex = Regex::new(r"(?i)\bcost\s*:\s*(.+)$").unwrap();
    static ref AVOIDING: Regex =
        Regex::new(r"(?i)\b(?:i'?ve been |i am |i'm )?avoiding\s+(.+?)(?:[.;]|,?\s+(?:(?:and\s+)?(?:it'?s|which|that'?s|this is)\s+)?cost(?:ing|s)?\b|$)").unwrap();
    static ref COSTING: Regex =
        Regex::new(r"(?i)\bcost(?:ing|s)?\s+(?:me|us|the team)\s+(.+?)(?:[.;]|$)").unwrap();
    static ref WRONG_IF: Regex = Regex::new(
        r"(?i)[,.;]?\s*\b(?:i'?m\s+wrong\s+if|i\s+am\s+wrong\s+if|i'?ll\s+be\s+wrong\s+if|wrong\s+if|falsified\s+if)\b\s*[:,]?\s*(.+)$"
    )
    .unwrap();
    static ref DURATION: Regex = Regex::new(r"(?i)\b(\d{1,3})[\s-]*(day|week|month|year)s?\b").unwrap();
    static ref DIRECTION_WORD: Regex =
        Regex::new(r"(?i)\b(appreciat\w*|depreciat\w*|stable)\b").unwrap();
    static ref PERCENT: Regex = Regex::new(r"(\d{1,3})\s*%").unwrap();
    static ref INTEGER: Regex = Regex::new(r"\b(\d{1,3})\b").unwrap();
    static ref SCARCITY_UNKNOWN: Regex =
        Regex::new(r"(?i)\b(unknown|don'?t know|do not know|not sure|no idea|unclear)\b").unwrap();
    static ref EXPIRED: Regex = Regex::new(
        r"(?i)\b(expired|didn'?t test|did not test|never tested|couldn'?t test|ran out of time)\b"
    )
    .unwrap();
    static ref WRONG: Regex =
        Regex::new(r"(?i)\b(wrong|missed|failed|didn'?t happen|did not happen)\b").unwrap();
    static ref CORRECT: Regex =
        Regex::new(r"(?i)\b(correct|right|yes|came true|nailed it|hit it)\b").unwrap();
    static ref ABSTRACT_CHOICE: Regex =
        Regex::new(r"(?i)\b(abstract\w*|anonymi[sz]\w*|private|sensitive|yes)\b").unwrap();
    static ref DECLINE_CHOICE: Regex = Regex::new(r"(?i)\b(no|not|don'?t)\b").unwrap();
    static ref REMEMBER_CHOICE: Regex =
        Regex::new(r"(?i)\b(remember|always|every time|don'?t ask)\b").unwrap();
    static ref NEGATED_REMEMBER: Regex =
        Regex::new(r"(?i)\b(?:don'?t|do not|no need to|never)\s+(?:remember|save|store)\b[^,.;]*").unwrap();
}

/// Split prose into sentences on terminal punctuation followed by space.
pub fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_break = chars.peek().map(|(_, n)| n.is_whitespace()).unwrap_or(true);
            if at_break {
                let end = i + c.len_utf8();
                let piece = text[start..end].trim();
                if !piece.is_empty() {
                    out.push(piece);
                }
                start = end;
            }
        }
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

fn clean_item(item: &str) -> String {
    BULLET
        .replace(item, "")
        .trim()
        .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';'))
        .trim()
        .to_string()
}

/// Split a list answer: lines first, then semicolons, then commas
/// (with a trailing "and" treated as a comma).
pub fn split_list(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();

    let pieces: Vec<String> = if lines.len() > 1 {
        lines.into_iter().map(str::to_string).collect()
    } else if text.contains(';') {
        text.split(';').map(str::to_string).collect()
    } else if text.contains(',') {
        text.split(',')
            .flat_map(|p| FINAL_AND.split(p).map(str::to_string).collect::<Vec<_>>())
            .collect()
    } else {
        FINAL_AND.split(text).map(str::to_string).collect()
    };

    pieces
        .iter()
        .map(|p| clean_item(p))
        .filter(|p| !p.is_empty())
        .collect()
}

fn dedupe(names: Vec<String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::new();
    for name in names {
        let key = name.to_lowercase();
        if !key.is_empty() && !seen.contains(&key) {
            seen.push(key);
            out.push(name);
        }
    }
    out
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProblemList {
    Names(Vec<String>),
    Wrapped { problems: Vec<String> },
}

/// Problem names from a free-text answer, `min..=max` of them.
/// Fewer than `min` is a validation error; extras are dropped.
pub async fn extract_problem_names(
    generator: &dyn TextGenerator,
    answer: &str,
    min: usize,
    max: usize,
) -> Result<Vec<String>> {
    let request = GenerationRequest::new(PROBLEM_PROMPT, answer.trim(), 256);

    let from_generator = match generator.generate(request).await {
        Ok(response) => match parse_json_reply::<ProblemList>(&response.text) {
            Ok(ProblemList::Names(names)) | Ok(ProblemList::Wrapped { problems: names }) => names,
            Err(e) => {
                warn!(error = %e, "Problem extraction reply unusable, splitting locally");
                Vec::new()
            }
        },
        Err(e) => {
            warn!(error = %e, "Problem extraction unavailable, splitting locally");
            Vec::new()
        }
    };

    let cleaned = dedupe(from_generator.iter().map(|n| clean_item(n)).collect());
    let mut names = if cleaned.is_empty() {
        dedupe(split_list(answer))
    } else {
        cleaned
    };

    debug!(count = names.len(), "Problems extracted");

    if names.len() < min {
        return Err(GovernanceError::Validation(format!(
            "Name at least {} distinct problems (found {})",
            min,
            names.len()
        )));
    }
    names.truncate(max);
    Ok(names)
}

/// Decision and its cost. Labeled phrases win; otherwise the first
/// sentence is the decision and the rest is the cost.
pub fn split_avoided_decision(answer: &str) -> AvoidedDecision {
    let answer = answer.trim();

    let labeled_decision = LABELED_DECISION
        .captures(answer)
        .map(|c| clean_item(&c[1]));
    let labeled_cost = LABELED_COST.captures(answer).map(|c| clean_item(&c[1]));
    if let (Some(decision), Some(cost)) = (&labeled_decision, &labeled_cost) {
        if !decision.is_empty() {
            return AvoidedDecision {
                decision: decision.clone(),
                cost: cost.clone(),
            };
        }
    }

    let avoiding = AVOIDING.captures(answer).map(|c| clean_item(&c[1]));
    let costing = COSTING.captures(answer).map(|c| clean_item(&c[1]));
    if let Some(decision) = avoiding.filter(|d| !d.is_empty()) {
        return AvoidedDecision {
            decision,
            cost: costing.unwrap_or_default(),
        };
    }

    let parts = sentences(answer);
    match parts.split_first() {
        Some((first, rest)) => AvoidedDecision {
            decision: clean_item(first),
            cost: clean_item(&rest.join(" ")),
        },
        None => AvoidedDecision {
            decision: String::new(),
            cost: String::new(),
        },
    }
}

/// Days from "N days|weeks|months|years", default 90.
pub fn parse_duration_days(text: &str) -> u32 {
    DURATION
        .captures(text)
        .and_then(|c| {
            let n: u32 = c[1].parse().ok()?;
            let per = match c[2].to_lowercase().as_str() {
                "day" => 1,
                "week" => 7,
                "month" => 30,
                _ => 365,
            };
            Some(n.saturating_mul(per))
        })
        .filter(|days| *days > 0)
        .unwrap_or(DEFAULT_BET_DAYS)
}

/// Prediction, wrong-if condition and duration. A bet without a
/// falsifying condition is rejected.
pub fn parse_bet(answer: &str) -> Result<BetDraft> {
    let answer = answer.trim();
    let duration_days = parse_duration_days(answer);

    let draft = if let Some(caps) = WRONG_IF.captures(answer) {
        let whole = caps.get(0).map(|m| m.start()).unwrap_or(answer.len());
        let prediction = clean_item(&answer[..whole]);
        BetDraft {
            prediction: if prediction.is_empty() {
                answer.to_string()
            } else {
                prediction
            },
            wrong_if: clean_item(&caps[1]),
            duration_days,
        }
    } else {
        let parts = sentences(answer);
        match parts.split_first() {
            Some((first, rest)) if !rest.is_empty() => BetDraft {
                prediction: clean_item(first),
                wrong_if: clean_item(&rest.join(" ")),
                duration_days,
            },
            _ => BetDraft {
                prediction: clean_item(answer),
                wrong_if: String::new(),
                duration_days,
            },
        }
    };

    if draft.wrong_if.is_empty() {
        return Err(GovernanceError::Validation(
            "Add what would prove the bet wrong, e.g. \"I'm wrong if ...\"".to_string(),
        ));
    }
    Ok(draft)
}

/// Direction keyword plus the rest of the answer as rationale.
pub fn parse_direction(answer: &str) -> Option<(Direction, String)> {
    let found = DIRECTION_WORD.find(answer)?;
    let word = found.as_str().to_lowercase();
    let direction = if word.starts_with("appreciat") {
        Direction::Appreciating
    } else if word.starts_with("depreciat") {
        Direction::Depreciating
    } else {
        Direction::Stable
    };

    let strip = |s: &str| {
        s.trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | ':' | ',' | '.' | ';' | '(' | ')' | '–'))
            .trim_start_matches("because ")
            .trim()
            .to_string()
    };

    let after = strip(&answer[found.end()..]);
    let before = strip(&answer[..found.start()]);
    let rationale = if !after.is_empty() {
        after
    } else if !before.is_empty() {
        before
    } else {
        answer.trim().to_string()
    };

    Some((direction, rationale))
}

/// One percentage per problem, in order. Explicit `%` figures win over
/// bare integers.
pub fn parse_allocations(answer: &str) -> Vec<u32> {
    let percents: Vec<u32> = PERCENT
        .captures_iter(answer)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    if !percents.is_empty() {
        return percents;
    }
    INTEGER
        .captures_iter(answer)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

/// Two scarcity signals, or an explicit unknown with its reason.
pub fn parse_scarcity(answer: &str) -> Result<Scarcity> {
    let answer = answer.trim();
    if SCARCITY_UNKNOWN.is_match(answer) {
        return Ok(Scarcity::Unknown {
            reason: answer.to_string(),
        });
    }

    let mut signals = split_list(answer);
    if signals.len() < 2 {
        signals = sentences(answer).into_iter().map(clean_item).collect();
    }
    signals.retain(|s| !s.is_empty());

    if signals.len() < 2 {
        return Err(GovernanceError::Validation(
            "Give two scarcity signals, or say it is unknown and why".to_string(),
        ));
    }
    signals.truncate(2);
    Ok(Scarcity::Signals { signals })
}

/// Evidence kind from the wording of a claim.
pub fn infer_evidence_kind(text: &str) -> EvidenceKind {
    let lowered = text.to_lowercase();
    let hit = |words: &[&str]| words.iter().any(|w| lowered.contains(*w));

    if hit(DECISION_WORDS) {
        EvidenceKind::Decision
    } else if hit(ARTIFACT_WORDS) {
        EvidenceKind::Artifact
    } else if hit(CALENDAR_WORDS) {
        EvidenceKind::Calendar
    } else if hit(PROXY_WORDS) {
        EvidenceKind::Proxy
    } else {
        EvidenceKind::None
    }
}

/// Outcome of last quarter's bet.
///
/// The earliest outcome keyword wins, so "Correct, nothing went wrong"
/// reads as correct. A bare "no" counts only as the whole answer.
pub fn parse_bet_review(answer: &str) -> Option<BetStatus> {
    let bare = answer
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase();
    if matches!(bare.as_str(), "no" | "nope") {
        return Some(BetStatus::Wrong);
    }

    [
        (&*EXPIRED, BetStatus::Expired),
        (&*WRONG, BetStatus::Wrong),
        (&*CORRECT, BetStatus::Correct),
    ]
    .into_iter()
    .filter_map(|(pattern, status)| pattern.find(answer).map(|m| (m.start(), status)))
    .min_by_key(|(start, _)| *start)
    .map(|(_, status)| status)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbstractionChoice {
    pub abstraction_mode: bool,
    pub remember: bool,
}

/// Remember phrases are read and removed first so their negations
/// ("don't remember", "don't ask") never count as declining.
pub fn parse_abstraction_choice(answer: &str) -> AbstractionChoice {
    let forget = NEGATED_REMEMBER.is_match(answer);
    let rest = NEGATED_REMEMBER.replace_all(answer, "");
    let remember = !forget && REMEMBER_CHOICE.is_match(&rest);
    let rest = REMEMBER_CHOICE.replace_all(&rest, "");

    let declined = DECLINE_CHOICE.is_match(&rest) && !rest.to_lowercase().contains("abstract");
    AbstractionChoice {
        abstraction_mode: ABSTRACT_CHOICE.is_match(&rest) && !declined,
        remember,
    }
}

/// Direction changes named in a portfolio check answer.
pub fn parse_direction_shifts(answer: &str, problems: &[Problem]) -> Vec<DirectionShift> {
    let mut shifts: Vec<DirectionShift> = Vec::new();

    let clauses = answer
        .lines()
        .flat_map(sentences)
        .flat_map(|s| s.split(';'))
        .map(str::trim)
        .filter(|s| !s.is_empty());

    for clause in clauses {
        let lowered = clause.to_lowercase();
        let Some((direction, _)) = parse_direction(clause) else {
            continue;
        };

        for problem in problems {
            let named = !problem.name.is_empty() && lowered.contains(&problem.name.to_lowercase());
            let seen = shifts.iter().any(|s| s.problem_id == problem.problem_id);
            if named && !seen && problem.direction != Some(direction) {
                shifts.push(DirectionShift {
                    problem_id: problem.problem_id,
                    problem_name: problem.name.clone(),
                    from: problem.direction,
                    to: direction,
                });
            }
        }
    }

    shifts
}
