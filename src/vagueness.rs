//! Vagueness Gate
//!
//! Decides whether a free-text answer is concrete enough to accept or
//! needs a follow-up example. Checks run in strict priority order:
//! - trivial acceptance ("none", "n/a")
//! - trivial rejection (fewer than 3 tokens)
//! - concrete-signal fast path (dates, names, numbers, specific verbs)
//! - vague-lexicon rejection
//! - text-generation collaborator for whatever is left
//!
//! A collaborator failure fails open: the answer is accepted.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::generation::{parse_json_reply, GenerationRequest, TextGenerator};

const MIN_TOKENS: usize = 3;

/// Static lists — zero allocation
const TRIVIAL_ACCEPTANCE: &[&str] = &["none", "n/a"];

const SHORT_MISSING: &[&str] = &["a specific example", "who was involved", "when it happened"];

const LEXICON_MISSING: &[&str] = &["a specific instance", "a date or timeframe", "a measurable outcome"];

/// Capitalized tokens that say nothing about a specific entity.
const NON_PROPER_CAPITALS: &[&str] = &["I", "I'm", "I've", "I'd", "I'll", "OK", "Ok"];

const EVALUATION_PROMPT: &str = r#"You review answers in a structured career audit.
Decide whether the answer is concrete: it names a specific instance, person, artifact, date, number or decision.
General statements, intentions and categories are vague.

Return ONLY JSON:
{"isVague": true|false, "reason": "<one sentence>", "missingElements": ["<what a concrete answer would add>"]}"#;

lazy_static! {
    static ref DATE_WORD: Regex = Regex::new(
        r"(?i)\b(monday|tuesday|wednesday|thursday|friday|saturday|sunday|january|february|march|april|june|july|august|september|october|november|december)\b|\bmay\s+\d"
    )
    .unwrap();
    static ref DATE_ABBREVIATION: Regex = Regex::new(
        r"\b(Mon|Tue|Tues|Wed|Thu|Thurs|Fri|Sat|Sun|Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)\b"
    )
    .unwrap();
    static ref RELATIVE_DATE: Regex = Regex::new(
        r"(?i)\b(yesterday|today|tonight|this (morning|afternoon|week|month|quarter|year)|last (night|week|month|quarter|year|monday|tuesday|wednesday|thursday|friday|sprint)|next (week|month|quarter|year)|(\d+|two|three|four|five|a few) (days|weeks|months|years) ago|q[1-4])\b"
    )
    .unwrap();
    static ref DATE_PATTERN: Regex = Regex::new(r"\b\d{1,4}[/-]\d{1,2}(?:[/-]\d{1,4})?\b").unwrap();
    static ref QUANTITY: Regex = Regex::new(
        r"(?i)(\d+(?:\.\d+)?\s?%|[$€£]\s?\d|\b\d+(?:\.\d+)?\s?(?:k|m|bn)\b|\b\d+\s+(?:people|users|customers|clients|hours|hrs|days|weeks|months|years|deals|tickets|reports|meetings|engineers|calls|projects|features|bugs|pages|accounts|interviews|hires|releases|sprints|dollars|percent|emails|slides|orders|teams|candidates|stakeholders|vendors|contracts)\b)"
    )
    .unwrap();
    static ref SPECIFIC_VERB: Regex = Regex::new(
        r"(?i)\b(completed|delivered|shipped|launched|closed|signed|published|presented|submitted|met with|called|emailed|hired|fired|negotiated|decided|wrote|built|deployed|finished|released|sent|approved|rejected|cancelled|canceled|promoted|interviewed|resolved|migrated|merged|filed|booked|pitched)\s+(?:(?:the|a|an|my|our|their|his|her|its)\s+)?[a-z0-9]\w*"
    )
    .unwrap();
    static ref VAGUE_LEXICON: Regex = Regex::new(
        r"(?i)\b(stuff|things?|various|helped|helping|worked on|working on|some|a lot|lots of|many|several|generally|usually|kind of|sort of|etc|basically|involved in|supported|assisted|contributed to|dealt with|handled|misc|everything|anything|somehow)\b"
    )
    .unwrap();
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    TrivialAcceptance,
    TooShort,
    ConcreteSignal,
    VagueLexicon,
    Provider,
    /// Provider unavailable; accepted without judgment.
    FailOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VaguenessVerdict {
    pub is_vague: bool,
    pub reason: String,
    pub missing_elements: Vec<String>,
    pub source: VerdictSource,
}

impl VaguenessVerdict {
    fn concrete(reason: impl Into<String>, source: VerdictSource) -> Self {
        Self {
            is_vague: false,
            reason: reason.into(),
            missing_elements: Vec::new(),
            source,
        }
    }

    fn vague(reason: impl Into<String>, missing: &[&str], source: VerdictSource) -> Self {
        Self {
            is_vague: true,
            reason: reason.into(),
            missing_elements: missing.iter().map(|s| s.to_string()).collect(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcreteSignal {
    DateWord,
    RelativeDate,
    DatePattern,
    ProperNoun,
    Quantity,
    SpecificVerb,
}

impl ConcreteSignal {
    fn describe(&self) -> &'static str {
        match self {
            ConcreteSignal::DateWord => "names a day or month",
            ConcreteSignal::RelativeDate => "anchors to a point in time",
            ConcreteSignal::DatePattern => "includes a date",
            ConcreteSignal::ProperNoun => "names a specific person, team or thing",
            ConcreteSignal::Quantity => "includes a measurable quantity",
            ConcreteSignal::SpecificVerb => "describes a completed action",
        }
    }
}

/// First concrete signal found in `answer`, if any.
pub fn find_concrete_signal(answer: &str) -> Option<ConcreteSignal> {
    if DATE_WORD.is_match(answer) || DATE_ABBREVIATION.is_match(answer) {
        return Some(ConcreteSignal::DateWord);
    }
    if RELATIVE_DATE.is_match(answer) {
        return Some(ConcreteSignal::RelativeDate);
    }
    if DATE_PATTERN.is_match(answer) {
        return Some(ConcreteSignal::DatePattern);
    }
    if contains_proper_noun(answer) {
        return Some(ConcreteSignal::ProperNoun);
    }
    if QUANTITY.is_match(answer) {
        return Some(ConcreteSignal::Quantity);
    }
    if SPECIFIC_VERB.is_match(answer) {
        return Some(ConcreteSignal::SpecificVerb);
    }
    None
}

/// Capitalized token that does not open a sentence.
fn contains_proper_noun(text: &str) -> bool {
    let mut sentence_start = true;

    for raw in text.split_whitespace() {
        let token = raw.trim_start_matches(|c: char| !c.is_alphanumeric());
        let starts_upper = token.chars().next().map(char::is_uppercase).unwrap_or(false);
        let bare = token.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '\'');

        if starts_upper && !sentence_start && !NON_PROPER_CAPITALS.contains(&bare) {
            return true;
        }

        sentence_start = raw.ends_with(|c: char| matches!(c, '.' | '!' | '?' | ':' | ';'));
    }

    false
}

/// Every check that needs no collaborator. `None` means ambiguous.
pub fn classify_locally(answer: &str) -> Option<VaguenessVerdict> {
    let trimmed = answer.trim();
    let lowered = trimmed.to_lowercase();

    if TRIVIAL_ACCEPTANCE.contains(&lowered.as_str()) {
        return Some(VaguenessVerdict::concrete(
            "Explicitly nothing to report",
            VerdictSource::TrivialAcceptance,
        ));
    }

    if trimmed.split_whitespace().count() < MIN_TOKENS {
        return Some(VaguenessVerdict::vague(
            "Answer is too short to evaluate",
            SHORT_MISSING,
            VerdictSource::TooShort,
        ));
    }

    if let Some(signal) = find_concrete_signal(trimmed) {
        return Some(VaguenessVerdict::concrete(
            format!("Answer {}", signal.describe()),
            VerdictSource::ConcreteSignal,
        ));
    }

    if let Some(hit) = VAGUE_LEXICON.find(trimmed) {
        return Some(VaguenessVerdict::vague(
            format!(
                "Answer relies on general language (\"{}\") without a concrete detail",
                hit.as_str()
            ),
            LEXICON_MISSING,
            VerdictSource::VagueLexicon,
        ));
    }

    None
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderVerdict {
    #[serde(alias = "is_vague")]
    is_vague: bool,
    #[serde(default)]
    reason: String,
    #[serde(default, alias = "missing_elements")]
    missing_elements: Vec<String>,
}

/// Shared by every flow and by the board interrogation loop.
pub struct VaguenessGate {
    generator: Arc<dyn TextGenerator>,
}

impl VaguenessGate {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn classify(&self, question: &str, answer: &str) -> VaguenessVerdict {
        if let Some(verdict) = classify_locally(answer) {
            debug!(source = ?verdict.source, is_vague = verdict.is_vague, "Vagueness decided locally");
            return verdict;
        }

        let request = GenerationRequest::new(
            EVALUATION_PROMPT,
            format!("QUESTION:\n{}\n\nANSWER:\n{}", question, answer.trim()),
            256,
        );

        let outcome = match self.generator.generate(request).await {
            Ok(response) => parse_json_reply::<ProviderVerdict>(&response.text),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(parsed) => {
                debug!(is_vague = parsed.is_vague, "Vagueness decided by provider");
                VaguenessVerdict {
                    is_vague: parsed.is_vague,
                    reason: parsed.reason,
                    missing_elements: if parsed.is_vague {
                        parsed.missing_elements
                    } else {
                        Vec::new()
                    },
                    source: VerdictSource::Provider,
                }
            }
            Err(e) => {
                warn!(error = %e, "Vagueness provider unavailable, accepting answer");
                VaguenessVerdict::concrete(
                    format!("Vagueness check unavailable: {}", e),
                    VerdictSource::FailOpen,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::testing::ScriptedGenerator;

    fn gate(generator: ScriptedGenerator) -> (VaguenessGate, Arc<ScriptedGenerator>) {
        let generator = Arc::new(generator);
        (VaguenessGate::new(generator.clone()), generator)
    }

    #[tokio::test]
    async fn test_reference_answers() {
        let (gate, generator) = gate(ScriptedGenerator::new());

        assert!(gate.classify("Q", "ok").await.is_vague);
        assert!(!gate.classify("Q", "none").await.is_vague);
        assert!(!gate.classify("Q", "  N/A ").await.is_vague);
        assert!(!gate.classify("Q", "Shipped the report to Sarah on Tuesday").await.is_vague);
        assert!(gate.classify("Q", "Helped with various stuff").await.is_vague);

        // None of these needed the provider
        assert_eq!(generator.call_count(), 0);
    }

    #[test]
    fn test_short_answer_reason_is_fixed() {
        let verdict = classify_locally("not sure").unwrap();
        assert_eq!(verdict.source, VerdictSource::TooShort);
        assert_eq!(verdict.missing_elements.len(), SHORT_MISSING.len());
    }

    #[test]
    fn test_concrete_signals() {
        let cases = vec![
            ("We closed it last week after review", ConcreteSignal::RelativeDate),
            ("The launch slipped to 2024-03-15 after review", ConcreteSignal::DatePattern),
            ("budget was cut by 15% this cycle", ConcreteSignal::Quantity),
            ("we onboarded 12 customers after the pilot", ConcreteSignal::Quantity),
            ("my manager asked me about the Atlas migration", ConcreteSignal::ProperNoun),
            ("we finally delivered the pricing memo", ConcreteSignal::SpecificVerb),
            ("review happened in March with leadership", ConcreteSignal::DateWord),
        ];

        for (answer, expected) in cases {
            assert_eq!(find_concrete_signal(answer), Some(expected), "{}", answer);
        }
    }

    #[test]
    fn test_sentence_initial_capitals_are_not_names() {
        assert!(!contains_proper_noun("Helped with various stuff"));
        assert!(!contains_proper_noun("I think I did well. Mostly it went fine"));
        assert!(contains_proper_noun("mostly it went fine with Priya"));
    }

    #[test]
    fn test_lexicon_only_without_concrete_signal() {
        let verdict = classify_locally("worked on things for the team").unwrap();
        assert!(verdict.is_vague);
        assert_eq!(verdict.source, VerdictSource::VagueLexicon);

        // A concrete signal wins over the lexicon
        let verdict = classify_locally("helped Marcus close the renewal").unwrap();
        assert!(!verdict.is_vague);
    }

    #[tokio::test]
    async fn test_ambiguous_answer_goes_to_provider() {
        let (gate, generator) = gate(ScriptedGenerator::new().reply(
            "```json\n{\"isVague\": true, \"reason\": \"No instance\", \"missingElements\": [\"an example\"]}\n```",
        ));

        let verdict = gate.classify("What breaks?", "customers would be unhappy with us").await;
        assert!(verdict.is_vague);
        assert_eq!(verdict.source, VerdictSource::Provider);
        assert_eq!(verdict.missing_elements, vec!["an example".to_string()]);
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_fails_open() {
        let (gate, _) = gate(ScriptedGenerator::new().fail(true));
        let verdict = gate.classify("What breaks?", "customers would be unhappy with us").await;
        assert!(!verdict.is_vague);
        assert_eq!(verdict.source, VerdictSource::FailOpen);
        assert!(verdict.reason.contains("unavailable"));
    }

    #[tokio::test]
    async fn test_unparseable_reply_fails_open() {
        let (gate, _) = gate(ScriptedGenerator::new().reply("I think it is fine"));
        let verdict = gate.classify("What breaks?", "customers would be unhappy with us").await;
        assert!(!verdict.is_vague);
        assert_eq!(verdict.source, VerdictSource::FailOpen);
    }
}
