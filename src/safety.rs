//! Safety layer: crisis detection for inbound messages.
//!
//! Runs offline and before any generation. Matching is word-boundary regex
//! over a lower-cased copy of the message, so "kill" never matches inside
//! "skill". A medium result can be widened to high by the configured
//! [`EscalationPolicy`] when sentiment is strongly negative.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SafetyError;
use crate::sentiment::SentimentResult;

/// Maximum number of indicators reported back to callers.
pub const MAX_REPORTED_INDICATORS: usize = 5;

/// Indicator recorded when the assessor itself could not run.
pub const FAIL_CLOSED_INDICATOR: &str = "assessment_unavailable: fail_closed";

// ── Risk model ──────────────────────────────────────────────────────

/// Ordered severity of crisis indicators.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{s}")
    }
}

/// Result of assessing one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub is_high_risk: bool,
    pub risk_level: RiskLevel,
    /// Matched indicators as `"category: term"`, first match first.
    pub risk_indicators: Vec<String>,
}

impl RiskAssessment {
    pub fn new(level: RiskLevel, indicators: Vec<String>) -> Self {
        Self {
            is_high_risk: level == RiskLevel::High,
            risk_level: level,
            risk_indicators: indicators,
        }
    }

    /// Assessment used when scoring could not complete.
    pub fn fail_closed() -> Self {
        Self::new(RiskLevel::High, vec![FAIL_CLOSED_INDICATOR.to_string()])
    }
}

/// Anything that can score a message for crisis risk.
pub trait RiskScorer: Send + Sync {
    fn score(
        &self,
        text: &str,
        sentiment: Option<&SentimentResult>,
    ) -> Result<RiskAssessment, SafetyError>;
}

// ── Escalation ──────────────────────────────────────────────────────

/// When a medium-risk message is treated as high risk.
///
/// Escalates only if sentiment is NEGATIVE with `score >= min_negative_score`
/// and at least `min_medium_matches` distinct medium terms matched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EscalationPolicy {
    pub enabled: bool,
    pub min_negative_score: f32,
    pub min_medium_matches: usize,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            min_negative_score: 0.80,
            min_medium_matches: 2,
        }
    }
}

impl EscalationPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    fn escalates(&self, medium_matches: usize, sentiment: Option<&SentimentResult>) -> bool {
        self.enabled
            && medium_matches >= self.min_medium_matches.max(1)
            && sentiment.is_some_and(|s| s.is_negative_at_least(self.min_negative_score))
    }
}

// ── Term lexicon ────────────────────────────────────────────────────

const SUICIDE_TERMS: &[&str] = &[
    "suicide",
    "suicidal",
    "kill myself",
    "killing myself",
    "end my life",
    "ending my life",
    "take my own life",
    "don't want to live",
    "want to die",
    "better off dead",
];

const SELF_HARM_TERMS: &[&str] = &[
    "self harm",
    "self-harm",
    "cut myself",
    "cutting myself",
    "hurt myself",
    "hurting myself",
    "harm myself",
    "harming myself",
    "injure myself",
];

const ABUSE_TERMS: &[&str] = &[
    "abusing me",
    "abused me",
    "being abused",
    "abusive relationship",
    "abusive partner",
    "hits me",
    "hitting me",
    "beating me",
    "violent towards me",
];

const DISTRESS_TERMS: &[&str] = &[
    "depressed",
    "depression",
    "panic",
    "hopeless",
    "can't cope",
    "cannot cope",
    "can't take it anymore",
    "can't go on",
    "no point",
    "nothing matters",
    "overwhelmed",
    "breakdown",
    "falling apart",
    "crisis",
    "terrified",
    "trapped",
    "worthless",
];

/// A compiled risk term.
#[derive(Debug, Clone)]
struct RiskPattern {
    category: String,
    term: String,
    level: RiskLevel,
    regex: Regex,
}

impl RiskPattern {
    fn compile(category: &str, term: &str, level: RiskLevel) -> Result<Self, SafetyError> {
        let body = regex::escape(&term.to_lowercase())
            .replace('\'', "'?")
            .replace(' ', r"\s+");
        let regex = Regex::new(&format!(r"\b{body}\b")).map_err(|e| SafetyError::InvalidPattern {
            term: term.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            category: category.to_string(),
            term: term.to_string(),
            level,
            regex,
        })
    }

    fn indicator(&self) -> String {
        format!("{}: {}", self.category, self.term)
    }
}

// ── Assessor ────────────────────────────────────────────────────────

/// Keyword/pattern risk assessor.
#[derive(Debug, Clone)]
pub struct RiskAssessor {
    patterns: Vec<RiskPattern>,
    policy: EscalationPolicy,
}

impl RiskAssessor {
    /// Assessor with the built-in term lexicon.
    pub fn default_rules(policy: EscalationPolicy) -> Self {
        let mut assessor = Self::empty(policy);
        for (category, terms, level) in [
            ("suicide", SUICIDE_TERMS, RiskLevel::High),
            ("self_harm", SELF_HARM_TERMS, RiskLevel::High),
            ("abuse", ABUSE_TERMS, RiskLevel::High),
            ("distress", DISTRESS_TERMS, RiskLevel::Medium),
        ] {
            for term in terms {
                assessor
                    .add_term(category, term, level)
                    .expect("built-in risk terms compile");
            }
        }
        assessor
    }

    /// Assessor with no terms (everything is low risk).
    pub fn empty(policy: EscalationPolicy) -> Self {
        Self {
            patterns: Vec::new(),
            policy,
        }
    }

    /// Add a custom term. Low-level terms are ignored.
    pub fn add_term(
        &mut self,
        category: &str,
        term: &str,
        level: RiskLevel,
    ) -> Result<(), SafetyError> {
        if level == RiskLevel::Low || term.trim().is_empty() {
            return Ok(());
        }
        self.patterns.push(RiskPattern::compile(category, term.trim(), level)?);
        Ok(())
    }

    /// Assess a message. Pure and allocation-light.
    pub fn assess(&self, text: &str, sentiment: Option<&SentimentResult>) -> RiskAssessment {
        let normalized = text.to_lowercase().replace(['\u{2018}', '\u{2019}'], "'");

        let mut high = Vec::new();
        let mut medium = Vec::new();
        for pattern in &self.patterns {
            if !pattern.regex.is_match(&normalized) {
                continue;
            }
            let bucket = match pattern.level {
                RiskLevel::High => &mut high,
                _ => &mut medium,
            };
            let indicator = pattern.indicator();
            if !bucket.contains(&indicator) {
                bucket.push(indicator);
            }
        }

        let level = if !high.is_empty() {
            RiskLevel::High
        } else if self.policy.escalates(medium.len(), sentiment) {
            debug!(
                medium_matches = medium.len(),
                "Escalating medium risk to high on strongly negative sentiment"
            );
            RiskLevel::High
        } else if !medium.is_empty() {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let mut indicators = high;
        indicators.extend(medium);
        indicators.truncate(MAX_REPORTED_INDICATORS);

        RiskAssessment::new(level, indicators)
    }

    /// Whether normal conversation can continue for this message.
    pub fn is_safe_to_continue(&self, text: &str) -> bool {
        !self.assess(text, None).is_high_risk
    }
}

impl Default for RiskAssessor {
    fn default() -> Self {
        Self::default_rules(EscalationPolicy::default())
    }
}

impl RiskScorer for RiskAssessor {
    fn score(
        &self,
        text: &str,
        sentiment: Option<&SentimentResult>,
    ) -> Result<RiskAssessment, SafetyError> {
        Ok(self.assess(text, sentiment))
    }
}

// ── Crisis content ──────────────────────────────────────────────────

/// General crisis response with hotline resources.
pub const CRISIS_RESPONSE: &str = "I'm concerned about what you're sharing. Your safety is important.

If you're in immediate danger or having thoughts of self-harm, please reach out to emergency services or a crisis helpline right away:

Immediate Help Resources:
- National Suicide Prevention Lifeline (US): 988 (call or text)
- Crisis Text Line: Text HOME to 741741
- International Association for Suicide Prevention: https://www.iasp.info/resources/Crisis_Centres/
- Samaritans (UK): 116 123
- Lifeline (Australia): 13 11 14
- India Crisis Helpline: 9152987821

Please reach out to someone you trust - a friend, family member, or mental health professional. You're not alone in this.

This chatbot is not a substitute for professional mental health care. Please speak with a licensed therapist or counselor.";

/// Crisis response for abuse disclosures.
pub const ABUSE_CRISIS_RESPONSE: &str = "Thank you for telling me. What you're describing is not okay, and your safety matters.

If you're in immediate danger, please contact emergency services right now. Confidential support is available:

Immediate Help Resources:
- National Domestic Violence Hotline (US): 1-800-799-7233, or text START to 88788
- National Suicide Prevention Lifeline (US): 988 (call or text)
- Crisis Text Line: Text HOME to 741741
- Samaritans (UK): 116 123
- Lifeline (Australia): 13 11 14

If you can, reach out to someone you trust who can help you stay safe. You're not alone in this.

This chatbot is not a substitute for professional help. Please speak with a trained advocate or counselor.";

/// Every fixed crisis response.
pub const CRISIS_TEMPLATES: &[&str] = &[CRISIS_RESPONSE, ABUSE_CRISIS_RESPONSE];

/// Pick the crisis template for an assessment.
pub fn crisis_response(assessment: &RiskAssessment) -> &'static str {
    // Distress-only (escalated) assessments carry no disclosure to respond to.
    let mut disclosures = assessment
        .risk_indicators
        .iter()
        .filter(|i| !i.starts_with("distress:"))
        .peekable();
    let abuse_only = disclosures.peek().is_some() && disclosures.all(|i| i.starts_with("abuse:"));
    if abuse_only {
        ABUSE_CRISIS_RESPONSE
    } else {
        CRISIS_RESPONSE
    }
}

/// Suggested next steps for a risk level.
pub fn resource_suggestions(level: RiskLevel) -> &'static [&'static str] {
    match level {
        RiskLevel::Low => &[
            "Consider journaling about your feelings",
            "Try a breathing exercise when stressed",
            "Reach out to someone you trust",
            "Engage in activities that bring joy",
        ],
        RiskLevel::Medium => &[
            "Consider speaking with a counselor or therapist",
            "Contact a crisis support hotline",
            "Visit a mental health clinic",
            "Reach out to a trusted friend or family member",
        ],
        RiskLevel::High => &[
            "Contact emergency services immediately",
            "Call the National Suicide Prevention Lifeline: 988",
            "Go to the nearest emergency room",
            "Tell someone you trust right now",
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sentiment::SentimentLabel;

    fn assessor() -> RiskAssessor {
        RiskAssessor::default()
    }

    #[test]
    fn whole_word_high_terms_are_high() {
        let cases = [
            "I'm having thoughts of suicide",
            "sometimes I want to kill myself",
            "I've been cutting myself again",
            "my partner keeps hitting me",
            "Suicidal. That's how I feel.",
        ];
        for text in cases {
            let result = assessor().assess(text, None);
            assert_eq!(result.risk_level, RiskLevel::High, "{text}");
            assert!(result.is_high_risk);
        }
    }

    #[test]
    fn high_terms_ignore_positive_sentiment() {
        let positive = SentimentResult::new(SentimentLabel::Positive, 0.99);
        let result = assessor().assess("I'm at peace with my plan to end my life", Some(&positive));
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[test]
    fn substrings_do_not_match() {
        let cases = [
            "I want to skill myself up this year",
            "The panicle on this grass is pretty",
            "My cat is a suicideboys fan, apparently",
            "The team is on a hitting streak",
        ];
        for text in cases {
            let result = assessor().assess(text, None);
            assert_ne!(result.risk_level, RiskLevel::High, "{text}");
            assert!(!result.is_high_risk);
        }
    }

    #[test]
    fn medium_terms_are_medium() {
        let result = assessor().assess("I've been feeling depressed lately", None);
        assert_eq!(result.risk_level, RiskLevel::Medium);
        assert_eq!(result.risk_indicators, vec!["distress: depressed"]);
    }

    #[test]
    fn apostrophe_variants_match() {
        for text in ["I can't cope", "I cant cope", "I can\u{2019}t cope"] {
            assert_eq!(assessor().assess(text, None).risk_level, RiskLevel::Medium, "{text}");
        }
    }

    #[test]
    fn phrases_tolerate_extra_whitespace() {
        let result = assessor().assess("I want to\n  kill   myself", None);
        assert!(result.is_high_risk);
    }

    #[test]
    fn no_terms_is_low() {
        let result = assessor().assess("I am so happy today!", None);
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert!(result.risk_indicators.is_empty());
    }

    #[test]
    fn escalation_needs_strong_negative_and_two_terms() {
        let text = "I'm depressed and I feel trapped";
        let strong = SentimentResult::new(SentimentLabel::Negative, 0.95);
        let weak = SentimentResult::new(SentimentLabel::Negative, 0.6);

        assert_eq!(assessor().assess(text, Some(&strong)).risk_level, RiskLevel::High);
        assert_eq!(assessor().assess(text, Some(&weak)).risk_level, RiskLevel::Medium);
        assert_eq!(assessor().assess(text, None).risk_level, RiskLevel::Medium);

        let single = assessor().assess("I'm depressed", Some(&strong));
        assert_eq!(single.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn escalation_can_be_disabled() {
        let assessor = RiskAssessor::default_rules(EscalationPolicy::disabled());
        let strong = SentimentResult::new(SentimentLabel::Negative, 0.99);
        let result = assessor.assess("hopeless, worthless, overwhelmed", Some(&strong));
        assert_eq!(result.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn indicators_are_capped_and_high_first() {
        let text = "depressed hopeless overwhelmed trapped worthless panic suicide";
        let result = assessor().assess(text, None);
        assert_eq!(result.risk_indicators.len(), MAX_REPORTED_INDICATORS);
        assert_eq!(result.risk_indicators[0], "suicide: suicide");
    }

    #[test]
    fn levels_are_ordered() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
    }

    #[test]
    fn custom_terms() {
        let mut assessor = RiskAssessor::empty(EscalationPolicy::default());
        assessor.add_term("custom", "give up", RiskLevel::Medium).unwrap();
        assessor.add_term("ignored", "tired", RiskLevel::Low).unwrap();
        assert_eq!(assessor.assess("I want to give up", None).risk_level, RiskLevel::Medium);
        assert_eq!(assessor.assess("so tired", None).risk_level, RiskLevel::Low);
    }

    #[test]
    fn crisis_template_selection() {
        let abuse = assessor().assess("my partner is abusing me", None);
        let suicide = assessor().assess("thinking about suicide", None);
        assert_eq!(crisis_response(&abuse), ABUSE_CRISIS_RESPONSE);
        assert_eq!(crisis_response(&suicide), CRISIS_RESPONSE);
        assert_eq!(crisis_response(&RiskAssessment::fail_closed()), CRISIS_RESPONSE);
        assert!(CRISIS_RESPONSE.contains("988"));
    }

    #[test]
    fn escalated_distress_gets_general_crisis_template() {
        let negative = SentimentResult::new(SentimentLabel::Negative, 0.95);
        let escalated = assessor().assess("I'm depressed and I feel trapped", Some(&negative));
        assert!(escalated.is_high_risk);
        assert!(escalated.risk_indicators.iter().all(|i| i.starts_with("distress:")));
        assert_eq!(crisis_response(&escalated), CRISIS_RESPONSE);

        let mixed = assessor().assess("he keeps hitting me and I'm so depressed", None);
        assert_eq!(crisis_response(&mixed), ABUSE_CRISIS_RESPONSE);
    }

    #[test]
    fn safe_to_continue() {
        assert!(assessor().is_safe_to_continue("rough day at work"));
        assert!(!assessor().is_safe_to_continue("I want to die"));
    }

    #[test]
    fn resources_per_level() {
        assert!(resource_suggestions(RiskLevel::High)[1].contains("988"));
        assert_eq!(resource_suggestions(RiskLevel::Low).len(), 4);
    }

    #[test]
    fn fail_closed_is_high() {
        let result = RiskAssessment::fail_closed();
        assert!(result.is_high_risk);
        assert_eq!(result.risk_indicators, vec![FAIL_CLOSED_INDICATOR]);
    }

    #[test]
    fn serializes_like_the_api() {
        let json = serde_json::to_value(assessor().assess("I feel hopeless", None)).unwrap();
        assert_eq!(json["risk_level"], "medium");
        assert_eq!(json["is_high_risk"], false);
        assert_eq!(json["risk_indicators"][0], "distress: hopeless");
    }
}
