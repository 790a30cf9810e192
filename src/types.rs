//! Core type definitions for the hybrid decision pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Clamp a raw score into [0, 1]. NaN maps to 0.
pub fn clamp_unit(x: f32) -> f32 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Incoming user utterance. One per request, never persisted.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub text: String,
    pub user_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl Utterance {
    pub fn new(text: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            text: text.into(),
            user_id,
            received_at: Utc::now(),
        }
    }
}

/// Closed intent vocabulary
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ProductFeatures,
    ProductSecurity,
    PricingBasic,
    PricingProfessional,
    PricingEnterprise,
    PricingComparison,
    SetupGuide,
    IntegrationGuide,
    PrivacyPolicy,
    AccountCreation,
    CompanyAbout,
    ConversationalGreeting,
    ConversationalThanks,
    ConversationalGoodbye,
    ConversationalChitchat,
    ConversationalFeedback,
    Unknown,
}

/// Intents answered by extracting from a knowledge context.
pub const KNOWLEDGE_INTENTS: &[Intent] = &[
    Intent::ProductFeatures,
    Intent::ProductSecurity,
    Intent::PricingBasic,
    Intent::PricingProfessional,
    Intent::PricingEnterprise,
    Intent::PricingComparison,
    Intent::SetupGuide,
    Intent::IntegrationGuide,
    Intent::PrivacyPolicy,
    Intent::AccountCreation,
    Intent::CompanyAbout,
];

/// Intents answered from response templates.
pub const CONVERSATIONAL_INTENTS: &[Intent] = &[
    Intent::ConversationalGreeting,
    Intent::ConversationalThanks,
    Intent::ConversationalGoodbye,
    Intent::ConversationalChitchat,
    Intent::ConversationalFeedback,
];

impl Intent {
    /// Full vocabulary in label-index order (`LABEL_<n>` maps to `ALL[n]`).
    pub const ALL: [Intent; 17] = [
        Intent::ProductFeatures,
        Intent::ProductSecurity,
        Intent::PricingBasic,
        Intent::PricingProfessional,
        Intent::PricingEnterprise,
        Intent::PricingComparison,
        Intent::SetupGuide,
        Intent::IntegrationGuide,
        Intent::PrivacyPolicy,
        Intent::AccountCreation,
        Intent::CompanyAbout,
        Intent::ConversationalGreeting,
        Intent::ConversationalThanks,
        Intent::ConversationalGoodbye,
        Intent::ConversationalChitchat,
        Intent::ConversationalFeedback,
        Intent::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::ProductFeatures => "product_features",
            Intent::ProductSecurity => "product_security",
            Intent::PricingBasic => "pricing_basic",
            Intent::PricingProfessional => "pricing_professional",
            Intent::PricingEnterprise => "pricing_enterprise",
            Intent::PricingComparison => "pricing_comparison",
            Intent::SetupGuide => "setup_guide",
            Intent::IntegrationGuide => "integration_guide",
            Intent::PrivacyPolicy => "privacy_policy",
            Intent::AccountCreation => "account_creation",
            Intent::CompanyAbout => "company_about",
            Intent::ConversationalGreeting => "conversational_greeting",
            Intent::ConversationalThanks => "conversational_thanks",
            Intent::ConversationalGoodbye => "conversational_goodbye",
            Intent::ConversationalChitchat => "conversational_chitchat",
            Intent::ConversationalFeedback => "conversational_feedback",
            Intent::Unknown => "unknown",
        }
    }

    /// Map a label emitted by a classifier into the vocabulary.
    ///
    /// Accepts vocabulary names (case-insensitive) and positional `LABEL_<n>`
    /// labels. Anything else is `Unknown`.
    pub fn from_model_label(label: &str) -> Intent {
        let label = label.trim();
        if let Some(idx) = label
            .strip_prefix("LABEL_")
            .and_then(|n| n.parse::<usize>().ok())
        {
            return Intent::ALL.get(idx).copied().unwrap_or(Intent::Unknown);
        }
        label.parse().unwrap_or(Intent::Unknown)
    }

    pub fn is_knowledge(&self) -> bool {
        KNOWLEDGE_INTENTS.contains(self)
    }

    pub fn is_conversational(&self) -> bool {
        CONVERSATIONAL_INTENTS.contains(self)
    }

    /// Knowledge category for knowledge intents, `None` otherwise.
    pub fn knowledge_category(&self) -> Option<KnowledgeCategory> {
        match self {
            Intent::ProductFeatures | Intent::ProductSecurity => Some(KnowledgeCategory::Product),
            Intent::PricingBasic
            | Intent::PricingProfessional
            | Intent::PricingEnterprise
            | Intent::PricingComparison => Some(KnowledgeCategory::Pricing),
            Intent::SetupGuide | Intent::IntegrationGuide => Some(KnowledgeCategory::Guides),
            Intent::PrivacyPolicy => Some(KnowledgeCategory::Policies),
            Intent::AccountCreation => Some(KnowledgeCategory::Account),
            Intent::CompanyAbout => Some(KnowledgeCategory::Company),
            _ => None,
        }
    }

    /// Human readable topic name, e.g. "pricing enterprise"
    pub fn topic(&self) -> String {
        self.as_str().replace('_', " ")
    }

    pub fn description(&self) -> &'static str {
        match self {
            Intent::ProductFeatures => "Platform capabilities and feature set",
            Intent::ProductSecurity => "Security, encryption and compliance features",
            Intent::PricingBasic => "Basic plan price and limits",
            Intent::PricingProfessional => "Professional plan price and limits",
            Intent::PricingEnterprise => "Enterprise package and custom terms",
            Intent::PricingComparison => "Comparing plans and general pricing questions",
            Intent::SetupGuide => "Getting started and onboarding steps",
            Intent::IntegrationGuide => "Connecting the platform to other systems",
            Intent::PrivacyPolicy => "Data handling and privacy commitments",
            Intent::AccountCreation => "Creating and verifying an account",
            Intent::CompanyAbout => "Company background and contact",
            Intent::ConversationalGreeting => "Greetings",
            Intent::ConversationalThanks => "Expressions of thanks",
            Intent::ConversationalGoodbye => "Farewells",
            Intent::ConversationalChitchat => "Casual small talk",
            Intent::ConversationalFeedback => "Compliments and feedback",
            Intent::Unknown => "Unrecognized or ambiguous input",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Intent::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == lowered)
            .ok_or_else(|| format!("unknown intent label: {}", s))
    }
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeCategory {
    Product,
    Pricing,
    Guides,
    Policies,
    Account,
    Company,
}

impl KnowledgeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeCategory::Product => "product",
            KnowledgeCategory::Pricing => "pricing",
            KnowledgeCategory::Guides => "guides",
            KnowledgeCategory::Policies => "policies",
            KnowledgeCategory::Account => "account",
            KnowledgeCategory::Company => "company",
        }
    }
}

/// Which signal produced the final classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Neural,
    Keyword,
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub intent: Intent,
    pub confidence: f32, // 0.0-1.0
    pub source: ClassificationSource,
}

impl ClassificationResult {
    pub fn new(intent: Intent, confidence: f32, source: ClassificationSource) -> Self {
        Self {
            intent,
            confidence: clamp_unit(confidence),
            source,
        }
    }

    /// Result used when no signal could be obtained in time
    pub fn unresolved() -> Self {
        Self::new(Intent::Unknown, 0.0, ClassificationSource::Hybrid)
    }
}

/// Read-only context record owned by the knowledge store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeContext {
    pub intent_id: Intent,
    pub category: KnowledgeCategory,
    pub text: String,
}

impl KnowledgeContext {
    pub fn context_id(&self) -> &'static str {
        self.intent_id.as_str()
    }
}

/// Outcome of the QA confidence gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QaGate {
    Passed,
    LowConfidence,
    EmptySpan,
    ModelUnavailable,
    InferenceFailed,
}

impl QaGate {
    pub fn passed(&self) -> bool {
        matches!(self, QaGate::Passed)
    }

    /// The model ran and returned a span. Only these results are cached or
    /// reported as a QA confidence.
    pub fn produced_by_model(&self) -> bool {
        matches!(self, QaGate::Passed | QaGate::LowConfidence | QaGate::EmptySpan)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QaResult {
    pub answer_text: String,
    pub confidence: f32, // 0.0-1.0
    pub context_id: String,
    pub gate: QaGate,
}

impl QaResult {
    pub fn failed(context_id: impl Into<String>, gate: QaGate) -> Self {
        Self {
            answer_text: String::new(),
            confidence: 0.0,
            context_id: context_id.into(),
            gate,
        }
    }
}

/// Response path for one request
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Knowledge,
    Conversational,
    Fallback,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Knowledge => "knowledge",
            Mode::Conversational => "conversational",
            Mode::Fallback => "fallback",
        }
    }
}

/// Where the final message text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    QaExtraction,
    Template,
    KnowledgeFallback,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    UnknownIntent,
    LowConfidence,
    Timeout,
    NoContext,
    QaGateFailed,
    QaUnavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub classification_confidence: f32,
    pub classification_source: ClassificationSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qa_confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contexts_searched: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_options: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    pub processing_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<serde_json::Value>,
}

/// Final response for one chat request
#[derive(Debug, Clone, Serialize)]
pub struct ResponseRecord {
    pub message: String,
    pub intent: Intent,
    pub confidence: f32,
    pub mode: Mode,
    pub source: ResponseSource,
    pub metadata: ResponseMetadata,
    pub processing_time_ms: f64,
    pub timestamp: DateTime<Utc>,
}

/// Classify output as returned to the transport layer
#[derive(Debug, Clone, Serialize)]
pub struct ClassifyResponse {
    pub intent: Intent,
    pub confidence: f32,
    pub source: ClassificationSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct BatchClassifyResponse {
    pub results: Vec<ClassifyResponse>,
    pub total_processed: usize,
    pub total_time_ms: f64,
    pub average_time_ms: f64,
}
