//! Hybrid decision & caching orchestrator
//!
//! Turns a user utterance into one confidence-scored response:
//! - neural + keyword intent fusion with an explicit rule table
//! - mode selection (knowledge / conversational / fallback)
//! - gated extractive answers with related-context retry
//! - bounded TTL caches for classification and QA results
//! - metrics and provenance for every response

pub mod types;
pub mod error;
pub mod config;
pub mod cache;
pub mod capabilities;
pub mod http_models;
pub mod lexical_qa;
pub mod knowledge;
pub mod keywords;
pub mod intent_resolver;
pub mod qa_extractor;
pub mod mode;
pub mod composer;
pub mod metrics;
pub mod orchestrator;
pub mod server;

pub use types::*;
pub use error::{CacheError, ConfigError, ValidationError};
pub use config::{Settings, TemplateSelection};
pub use cache::{canonicalize, CacheManager};
pub use capabilities::{
    Classifier, KnowledgeStore, MockClassifier, MockQaModel, ModelHandle, QaModel, TemplateStore,
};
pub use http_models::{HttpClassifier, HttpQaModel};
pub use lexical_qa::LexicalQa;
pub use knowledge::{StaticKnowledgeBase, StaticTemplates};
pub use intent_resolver::{FusionPolicy, FusionRule, IntentResolver};
pub use qa_extractor::QaExtractor;
pub use mode::ModeSelector;
pub use composer::ResponseComposer;
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use orchestrator::{Capabilities, Orchestrator, SharedOrchestrator};

#[cfg(test)]
mod tests;
