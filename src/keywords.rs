//! Deterministic keyword matcher
//!
//! Scores every intent by keyword overlap with the utterance. The score is a
//! heuristic, not a calibrated probability, and is capped below 1.0 so a pure
//! keyword hit never looks more certain than a confident neural prediction.

use crate::types::Intent;
use serde::Serialize;

/// Multiplier on the raw overlap score
const KEYWORD_BOOST: f32 = 1.1;
/// Upper bound of any reported keyword score
const MAX_KEYWORD_SCORE: f32 = 0.9;
/// Bonus per matched keyword
const MATCH_BONUS: f32 = 0.15;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordMatch {
    pub intent: Intent,
    pub score: f32,
    pub matched: Vec<String>,
}

impl KeywordMatch {
    pub fn none() -> Self {
        Self {
            intent: Intent::Unknown,
            score: 0.0,
            matched: Vec::new(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.intent != Intent::Unknown
    }
}

struct Keyword {
    phrase: String,
    tokens: Vec<String>,
}

pub struct KeywordMatcher {
    table: Vec<(Intent, Vec<Keyword>)>,
}

impl KeywordMatcher {
    /// Build from `(intent, keywords)` pairs. Order of the pairs is the tie-break order.
    pub fn new<I, S>(table: I) -> Self
    where
        I: IntoIterator<Item = (Intent, Vec<S>)>,
        S: AsRef<str>,
    {
        let table = table
            .into_iter()
            .filter(|(intent, _)| *intent != Intent::Unknown)
            .map(|(intent, keywords)| {
                let keywords = keywords
                    .iter()
                    .map(|k| Keyword {
                        phrase: k.as_ref().to_lowercase(),
                        tokens: tokenize(k.as_ref()),
                    })
                    .filter(|k| !k.tokens.is_empty())
                    .collect();
                (intent, keywords)
            })
            .collect();
        Self { table }
    }

    pub fn builtin() -> Self {
        Self::new(
            BUILTIN_KEYWORDS
                .iter()
                .map(|(intent, keywords)| (*intent, keywords.to_vec())),
        )
    }

    /// Best-scoring intent for `text`, or `unknown` with score 0 when nothing matches.
    pub fn match_text(&self, text: &str) -> KeywordMatch {
        let tokens = tokenize(text);
        let mut best = KeywordMatch::none();

        for (intent, keywords) in &self.table {
            if keywords.is_empty() {
                continue;
            }
            let matched: Vec<String> = keywords
                .iter()
                .filter(|k| contains_phrase(&tokens, &k.tokens))
                .map(|k| k.phrase.clone())
                .collect();
            if matched.is_empty() {
                continue;
            }

            let score = overlap_score(matched.len(), keywords.len());
            // strict comparison keeps the earlier intent on ties
            if score > best.score {
                best = KeywordMatch {
                    intent: *intent,
                    score,
                    matched,
                };
            }
        }

        best
    }
}

impl Default for KeywordMatcher {
    fn default() -> Self {
        Self::builtin()
    }
}

fn overlap_score(matches: usize, total: usize) -> f32 {
    let m = matches as f32;
    let base = (m / total as f32 + MATCH_BONUS * m).min(1.0);
    (base * KEYWORD_BOOST).min(MAX_KEYWORD_SCORE)
}

/// Lowercased alphanumeric words
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn contains_phrase(tokens: &[String], phrase: &[String]) -> bool {
    !phrase.is_empty() && tokens.windows(phrase.len()).any(|w| w == phrase)
}

const BUILTIN_KEYWORDS: &[(Intent, &[&str])] = &[
    (
        Intent::ProductFeatures,
        &["feature", "features", "capabilities", "functionality", "what can", "product", "analytics"],
    ),
    (
        Intent::ProductSecurity,
        &["security", "secure", "encryption", "encrypted", "sso", "compliance", "soc"],
    ),
    (Intent::PricingBasic, &["basic", "basic plan", "cheapest", "starter"]),
    (Intent::PricingProfessional, &["professional", "pro plan", "professional plan"]),
    (Intent::PricingEnterprise, &["enterprise", "enterprise plan", "custom pricing", "large team"]),
    (
        Intent::PricingComparison,
        &["pricing", "price", "prices", "plans", "cost", "compare", "how much", "subscription"],
    ),
    (
        Intent::SetupGuide,
        &["setup", "set up", "get started", "getting started", "install", "onboarding", "configure"],
    ),
    (
        Intent::IntegrationGuide,
        &["integration", "integrate", "api", "webhook", "slack", "connect"],
    ),
    (
        Intent::PrivacyPolicy,
        &["privacy", "personal data", "gdpr", "data retention", "delete my data"],
    ),
    (
        Intent::AccountCreation,
        &["sign up", "signup", "register", "create account", "create an account", "new account", "account"],
    ),
    (
        Intent::CompanyAbout,
        &["company", "about you", "who are you", "founded", "headquarters", "contact"],
    ),
    (
        Intent::ConversationalGreeting,
        &["hello", "hi", "hey", "good morning", "good afternoon", "greetings"],
    ),
    (
        Intent::ConversationalThanks,
        &["thanks", "thank you", "thank", "appreciate", "cheers"],
    ),
    (
        Intent::ConversationalGoodbye,
        &["bye", "goodbye", "see you", "farewell", "later"],
    ),
    (
        Intent::ConversationalChitchat,
        &["how are you", "joke", "bored", "weather", "your name"],
    ),
    (
        Intent::ConversationalFeedback,
        &["great", "awesome", "amazing", "love it", "feedback", "excellent", "helpful"],
    ),
];
