//! In-memory knowledge base and response templates.
//!
//! Both load from JSON authored offline, or fall back to built-in content.
//! Contents are fixed after construction.

use crate::capabilities::{KnowledgeStore, TemplateStore};
use crate::types::{Intent, KnowledgeCategory, KnowledgeContext};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct KnowledgeEntry {
    #[serde(default)]
    category: Option<KnowledgeCategory>,
    context: String,
}

pub struct StaticKnowledgeBase {
    entries: HashMap<Intent, KnowledgeContext>,
}

impl StaticKnowledgeBase {
    pub fn new(contexts: Vec<KnowledgeContext>) -> Self {
        let entries = contexts
            .into_iter()
            .map(|ctx| (ctx.intent_id, ctx))
            .collect();
        Self { entries }
    }

    /// Load from `{ "<intent>": { "category": "...", "context": "..." } }`
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading knowledge base {}", path.display()))?;
        let kb = Self::from_json_str(&raw)?;
        info!("Knowledge base loaded from {}: {} intents", path.display(), kb.len());
        Ok(kb)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let parsed: HashMap<String, KnowledgeEntry> =
            serde_json::from_str(raw).context("parsing knowledge base JSON")?;

        let mut contexts = Vec::new();
        for (key, entry) in parsed {
            let intent = match key.parse::<Intent>() {
                Ok(intent) if intent.is_knowledge() => intent,
                _ => {
                    warn!("Skipping knowledge entry '{}': not a knowledge intent", key);
                    continue;
                }
            };
            if entry.context.trim().is_empty() {
                warn!("Skipping knowledge entry '{}': empty context", key);
                continue;
            }
            // is_knowledge() guarantees a category
            let Some(default_category) = intent.knowledge_category() else {
                continue;
            };
            contexts.push(KnowledgeContext {
                intent_id: intent,
                category: entry.category.unwrap_or(default_category),
                text: entry.context,
            });
        }
        Ok(Self::new(contexts))
    }

    /// Built-in product knowledge
    pub fn builtin() -> Self {
        let contexts = BUILTIN_KNOWLEDGE
            .iter()
            .filter_map(|(intent, text)| {
                intent.knowledge_category().map(|category| KnowledgeContext {
                    intent_id: *intent,
                    category,
                    text: text.to_string(),
                })
            })
            .collect();
        Self::new(contexts)
    }
}

impl KnowledgeStore for StaticKnowledgeBase {
    fn lookup(&self, intent: Intent) -> Option<KnowledgeContext> {
        self.entries.get(&intent).cloned()
    }

    fn related(&self, intent: Intent, limit: usize) -> Vec<KnowledgeContext> {
        let Some(category) = self.entries.get(&intent).map(|ctx| ctx.category) else {
            return Vec::new();
        };
        Intent::ALL
            .iter()
            .filter(|other| **other != intent)
            .filter_map(|other| self.entries.get(other))
            .filter(|ctx| ctx.category == category)
            .take(limit)
            .cloned()
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct StaticTemplates {
    templates: HashMap<Intent, Vec<String>>,
}

impl StaticTemplates {
    pub fn new(templates: HashMap<Intent, Vec<String>>) -> Self {
        Self { templates }
    }

    /// Load from `{ "<intent>": ["template", ...] }`
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading templates {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let parsed: HashMap<String, Vec<String>> =
            serde_json::from_str(raw).context("parsing templates JSON")?;

        let mut templates = HashMap::new();
        for (key, candidates) in parsed {
            match key.parse::<Intent>() {
                Ok(intent) if intent != Intent::Unknown => {
                    templates.insert(intent, candidates);
                }
                _ => warn!("Skipping templates for unrecognized intent '{}'", key),
            }
        }
        Ok(Self::new(templates))
    }

    pub fn builtin() -> Self {
        let templates = BUILTIN_TEMPLATES
            .iter()
            .map(|(intent, candidates)| {
                (*intent, candidates.iter().map(|s| s.to_string()).collect())
            })
            .collect();
        Self::new(templates)
    }
}

impl TemplateStore for StaticTemplates {
    fn templates_for(&self, intent: Intent) -> &[String] {
        self.templates
            .get(&intent)
            .map(|candidates| candidates.as_slice())
            .unwrap_or(&[])
    }
}

const BUILTIN_KNOWLEDGE: &[(Intent, &str)] = &[
    (
        Intent::ProductFeatures,
        "The platform lets teams build, train and deploy conversational assistants without writing code. \
         Key features include a visual flow designer, intent classification, extractive answers from your own documents, \
         multi-channel deployment to web chat, Slack and WhatsApp, and real-time analytics dashboards. \
         Every plan includes a knowledge base editor and conversation history search.",
    ),
    (
        Intent::ProductSecurity,
        "All data is encrypted in transit with TLS 1.3 and at rest with AES-256. \
         The platform supports single sign-on through SAML and OpenID Connect, role-based access control and audit logs. \
         Infrastructure is hosted in SOC 2 Type II certified data centers and penetration tested twice a year.",
    ),
    (
        Intent::PricingBasic,
        "The Basic plan costs $29 per month and includes one assistant, 2,000 conversations per month and email support. \
         Basic is billed monthly and can be cancelled at any time.",
    ),
    (
        Intent::PricingProfessional,
        "The Professional plan costs $99 per month and includes five assistants, 20,000 conversations per month, \
         custom branding, API access and priority support. Annual billing gives two months free.",
    ),
    (
        Intent::PricingEnterprise,
        "The Enterprise package is priced per contract and includes unlimited assistants, dedicated infrastructure, \
         single sign-on, a 99.9% uptime SLA and a named customer success manager. Contact sales for a quote.",
    ),
    (
        Intent::PricingComparison,
        "We offer three pricing plans: Basic at $29 per month, Professional at $99 per month and Enterprise with custom pricing. \
         Plans differ in the number of assistants, monthly conversations and support level. \
         Every plan starts with a 14-day free trial and no credit card is required.",
    ),
    (
        Intent::SetupGuide,
        "To get started, create an account, then open the dashboard and click New Assistant. \
         Choose a template, upload your documents to the knowledge base and publish the assistant. \
         Most teams have a working assistant in under 15 minutes.",
    ),
    (
        Intent::IntegrationGuide,
        "Integrations are configured from the Integrations tab. \
         The platform connects to Slack, Microsoft Teams, WhatsApp, Zendesk and any system with a REST API through webhooks. \
         API keys are generated under Settings and each request must include the key in the Authorization header.",
    ),
    (
        Intent::PrivacyPolicy,
        "We never sell customer data. Conversation data is retained for 90 days unless you configure a shorter period, \
         and you can request deletion at any time. The platform is GDPR and CCPA compliant and processes data only to provide the service.",
    ),
    (
        Intent::AccountCreation,
        "To create a new account, visit the sign-up page and enter your work email address. \
         You will receive a verification link within a few minutes. After verifying, choose a password with at least 12 characters \
         and invite teammates from the Members page.",
    ),
    (
        Intent::CompanyAbout,
        "The company was founded in 2019 and is headquartered in Amsterdam with offices in Austin and Singapore. \
         More than 3,000 businesses use the platform to automate customer conversations. \
         You can reach the team at hello@example.com.",
    ),
];

const BUILTIN_TEMPLATES: &[(Intent, &[&str])] = &[
    (
        Intent::ConversationalGreeting,
        &[
            "Hello! I'm here to help you with questions about our platform.",
            "Hi there! What can I help you with today?",
            "Welcome! Ask me anything about our products, pricing or setup.",
        ],
    ),
    (
        Intent::ConversationalThanks,
        &[
            "You're welcome! Is there anything else I can help with?",
            "Happy to help! Let me know if you have more questions.",
            "Glad I could help!",
        ],
    ),
    (
        Intent::ConversationalGoodbye,
        &[
            "Goodbye! Have a great day.",
            "See you later! Come back any time you have questions.",
            "Take care!",
        ],
    ),
    (
        Intent::ConversationalChitchat,
        &[
            "I'm doing well, thanks for asking! How can I help you today?",
            "That's fun to chat about, though I'm best at answering questions about our platform.",
            "I'm always happy to chat. Is there something about our service I can help with?",
        ],
    ),
    (
        Intent::ConversationalFeedback,
        &[
            "Thank you for the kind words! We'll pass your feedback on to the team.",
            "We really appreciate your feedback!",
            "Thanks for letting us know!",
        ],
    ),
];
