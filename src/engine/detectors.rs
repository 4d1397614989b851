//! Transcript signal detectors. Pure functions over conversation turns.
//!
//! Both detectors only ever look at the single most recent turn of the
//! relevant role, so a signal must be freshly stated to count.

use std::sync::OnceLock;

use regex::Regex;

use crate::runtime::{ConversationTurn, Role};

/// Escalation markers the AI is instructed to emit, in priority order.
/// Shape: `[KEYWORD: free text]`.
const ESCALATION_PATTERNS: &[&str] = &[
    r"(?i)\[\s*(?:ESCALAR|ESCALATE|ESCALATION|ESCALONAR)\s*:\s*([^\]]+)\]",
    r"(?i)\[\s*(?:TRANSFERIR|TRANSFER|TRANSFERENCIA|TRANSFERÊNCIA)\s*:\s*([^\]]+)\]",
    r"(?i)\[\s*(?:HUMANO|HUMAN|HUMAN_NEEDED|PRECISA_HUMANO|NEEDS_HUMAN)\s*:\s*([^\]]+)\]",
    r"(?i)\[\s*(?:ATENDENTE|ATTENDANT|AGENTE_HUMANO)\s*:\s*([^\]]+)\]",
];

static ESCALATION_REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();

fn escalation_regexes() -> &'static [Regex] {
    ESCALATION_REGEXES.get_or_init(|| {
        ESCALATION_PATTERNS
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::error!(pattern = p, "Invalid escalation pattern: {}", e);
                    None
                }
            })
            .collect()
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationSignal {
    pub reason: String,
}

/// Look for an escalation marker on the most recent assistant turn only.
pub fn detect_escalation(turns: &[ConversationTurn]) -> Option<EscalationSignal> {
    let last_assistant = turns.iter().rev().find(|t| t.role == Role::Assistant)?;
    let text = last_assistant.text();

    escalation_regexes().iter().find_map(|re| {
        let reason = re.captures(&text)?.get(1)?.as_str().trim();
        if reason.is_empty() {
            None
        } else {
            Some(EscalationSignal {
                reason: reason.to_string(),
            })
        }
    })
}

/// Read a 1..=5 rating from the most recent user turn.
///
/// The turn must contain exactly one digit overall; phone numbers, dates,
/// and "5 de 2024" style text are rejected rather than guessed at.
pub fn detect_survey_rating(turns: &[ConversationTurn]) -> Option<u8> {
    let last_user = turns.iter().rev().find(|t| t.role == Role::User)?;
    rating_from_text(&last_user.text())
}

pub fn rating_from_text(text: &str) -> Option<u8> {
    let mut digits = text.chars().filter(|c| c.is_ascii_digit());
    let only = digits.next()?;
    if digits.next().is_some() {
        return None;
    }
    let rating = only.to_digit(10)? as u8;
    (1..=5).contains(&rating).then_some(rating)
}
