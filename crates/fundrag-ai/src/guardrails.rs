use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Answer returned instead of running the pipeline for advice-seeking queries.
pub const REFUSAL_TEMPLATE: &str = "I cannot provide investment advice or recommendations. \
I can only share factual information about mutual fund schemes, such as expense ratios, \
exit loads, minimum SIP amounts, lock-in periods, and other objective details. \
Please rephrase your question to ask about specific factual information.";

const CONTEXT_WINDOW: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    InvestmentAdvice,
    Recommendation,
    Prediction,
    PersonalOpinion,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViolationKind::InvestmentAdvice => "investment_advice",
            ViolationKind::Recommendation => "recommendation",
            ViolationKind::Prediction => "prediction",
            ViolationKind::PersonalOpinion => "personal_opinion",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} guardrail violation: '{matched}'")]
pub struct GuardrailViolation {
    pub kind: ViolationKind,
    pub matched: String,
    pub context: String,
}

/// Phrases that are advice wherever they appear. No factual exemption.
const ADVICE_KEYWORDS: &[&str] = &[
    "should buy",
    "should invest",
    "should sell",
    "should hold",
    "you should invest",
    "i recommend",
    "i suggest",
    "i advise",
    "my recommendation",
    "my suggestion",
    "best fund",
    "best choice",
    "good investment",
    "bad investment",
    "better option",
    "optimal choice",
    "ideal fund",
    "perfect for",
    "suitable for you",
    "right for you",
    "avoid this",
    "stay away",
    "go ahead",
    "definitely buy",
    "definitely invest",
];

fn compile(patterns: &[(&str, ViolationKind)]) -> Vec<(Regex, ViolationKind)> {
    patterns
        .iter()
        .filter_map(|(pattern, kind)| match Regex::new(&format!("(?i){}", pattern)) {
            Ok(re) => Some((re, *kind)),
            Err(e) => {
                warn!("Skipping invalid guardrail pattern {}: {}", pattern, e);
                None
            }
        })
        .collect()
}

static ADVICE_PATTERNS: Lazy<Vec<(Regex, ViolationKind)>> = Lazy::new(|| {
    use ViolationKind::*;
    compile(&[
        (r"\b(should|must|need to)\s+(buy|invest|purchase|sell|hold|exit)\b", Recommendation),
        (r"\b(recommend|suggests?|advise)\s+.{0,20}\b(buy|invest|sell)\b", Recommendation),
        (r"\b(better|best|good|great|excellent)\s+(investment|choice|option|fund)\b", Recommendation),
        (r"\b(go for|opt for|choose)\s+.{0,20}\bfund\b", Recommendation),
        (r"\bI (suggest|recommend|advise|think you should)\b", Recommendation),
        (r"\byou (should|must|need to|ought to)\b", Recommendation),
        (r"\bit('s| is) (advisable|recommended|suggested)\b", Recommendation),
        (r"\b(consider|try) (buying|investing|purchasing)\b", Recommendation),
        (r"\b(will|going to|expected to)\s+(grow|increase|rise|perform|return)\b", Prediction),
        (r"\b(predict|forecast|expect).{0,30}(return|growth|performance)\b", Prediction),
        (r"\blikely to (outperform|beat|exceed)\b", Prediction),
        (r"\b(good|bad|poor|excellent|superior|inferior)\s+(performance|returns?)\b", PersonalOpinion),
        (r"\b(overvalued|undervalued|overpriced|underpriced)\b", PersonalOpinion),
        (r"\b(strong|weak)\s+(buy|sell|hold)\b", PersonalOpinion),
    ])
});

static FACTUAL_PATTERNS: Lazy<Vec<(Regex, ViolationKind)>> = Lazy::new(|| {
    // The kind is unused for factual markers.
    let kind = ViolationKind::InvestmentAdvice;
    compile(&[
        (r"\b(expense ratio|exit load|minimum sip|lock-in period|nav|aum)\b", kind),
        (r"\b(fund manager|benchmark|category|type|rating)\b", kind),
        (r"\b(historical|past|previous)\s+(return|performance)\b", kind),
        (r"\briskometer\s+(level|rating)\b", kind),
        (r"\b(available|offered|provided)\s+by\b", kind),
    ])
});

static ADVICE_SEEKING: Lazy<Vec<(Regex, ViolationKind)>> = Lazy::new(|| {
    let kind = ViolationKind::InvestmentAdvice;
    compile(&[
        (r"\bshould I (buy|invest|sell|hold)\b", kind),
        (r"\bwhat (should|must) I (do|buy|invest)\b", kind),
        (r"\b(which|what) (fund|scheme).{0,30}(best|better|recommend)\b", kind),
        (r"\b(help me|advise me|recommend|suggest).{0,30}(invest|fund)\b", kind),
        (r"\bis it (good|advisable|wise) to (buy|invest)\b", kind),
    ])
});

/// Pattern checks that keep the assistant factual.
///
/// Queries asking for advice are refused up front. Generated answers are
/// swept for advice phrasing; any hit means the answer is discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Guardrails;

impl Guardrails {
    pub fn new() -> Self {
        Self
    }

    pub fn check_query(&self, query: &str) -> Result<(), GuardrailViolation> {
        for (pattern, kind) in ADVICE_SEEKING.iter() {
            if let Some(m) = pattern.find(query) {
                warn!("Query contains advice-seeking pattern: {}", m.as_str());
                return Err(GuardrailViolation {
                    kind: *kind,
                    matched: m.as_str().to_string(),
                    context: query.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn check_response(&self, response: &str) -> Vec<GuardrailViolation> {
        let mut violations = Vec::new();
        let lower = response.to_lowercase();

        for keyword in ADVICE_KEYWORDS {
            if let Some(pos) = lower.find(keyword) {
                warn!("Response contains advice keyword: {}", keyword);
                violations.push(GuardrailViolation {
                    kind: ViolationKind::InvestmentAdvice,
                    matched: (*keyword).to_string(),
                    context: excerpt(&lower, pos, pos + keyword.len()),
                });
            }
        }

        for (pattern, kind) in ADVICE_PATTERNS.iter() {
            for m in pattern.find_iter(response) {
                // Predictions and opinions are never exempt, whatever facts surround them.
                if *kind == ViolationKind::Recommendation
                    && is_factual_context(response, m.start(), m.end())
                {
                    continue;
                }
                warn!("Response contains advice pattern: {}", m.as_str());
                violations.push(GuardrailViolation {
                    kind: *kind,
                    matched: m.as_str().to_string(),
                    context: excerpt(response, m.start(), m.end()),
                });
            }
        }

        violations
    }

    pub fn is_safe_response(&self, response: &str) -> bool {
        self.check_response(response).is_empty()
    }
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn surrounding(text: &str, start: usize, end: usize) -> (usize, usize) {
    let from = floor_boundary(text, start.saturating_sub(CONTEXT_WINDOW));
    let to = ceil_boundary(text, (end + CONTEXT_WINDOW).min(text.len()));
    (from, to)
}

fn is_factual_context(text: &str, start: usize, end: usize) -> bool {
    let (from, to) = surrounding(text, start, end);
    let window = &text[from..to];
    FACTUAL_PATTERNS.iter().any(|(re, _)| re.is_match(window))
}

fn excerpt(text: &str, start: usize, end: usize) -> String {
    let (from, to) = surrounding(text, start, end);
    let mut out = String::new();
    if from > 0 {
        out.push_str("...");
    }
    out.push_str(&text[from..to]);
    if to < text.len() {
        out.push_str("...");
    }
    out
}
