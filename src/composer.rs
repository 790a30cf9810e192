//! Builds the final response record for each mode

use crate::capabilities::TemplateStore;
use crate::config::TemplateSelection;
use crate::types::{
    ClassificationResult, FallbackReason, Intent, Mode, QaResult, ResponseMetadata, ResponseRecord,
    ResponseSource,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

pub const FALLBACK_MESSAGE: &str =
    "I'm not entirely sure about that. Could you please rephrase your question or provide more details?";

const NO_TEMPLATE_MESSAGE: &str = "I'm here to help! What would you like to know?";

/// What the knowledge path produced
#[derive(Debug, Clone)]
pub enum KnowledgeOutcome {
    Answered {
        qa: QaResult,
        contexts_searched: usize,
    },
    /// No answer cleared the gate. Carries the best failed confidence, if any.
    Degraded {
        reason: FallbackReason,
        qa_confidence: Option<f32>,
        related_topic: Option<Intent>,
        contexts_searched: usize,
    },
}

#[derive(Debug, Clone)]
pub enum ModeOutcome {
    Knowledge(KnowledgeOutcome),
    Conversational,
    Fallback(FallbackReason),
}

pub struct ResponseComposer {
    templates: Arc<dyn TemplateStore>,
    selection: TemplateSelection,
    cursors: Mutex<HashMap<Intent, usize>>,
}

impl ResponseComposer {
    pub fn new(templates: Arc<dyn TemplateStore>, selection: TemplateSelection) -> Self {
        Self {
            templates,
            selection,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Assemble the response. `started` marks the beginning of intent resolution.
    pub fn compose(
        &self,
        classification: &ClassificationResult,
        outcome: ModeOutcome,
        started: Instant,
        debug: Option<serde_json::Value>,
    ) -> ResponseRecord {
        let mut metadata = ResponseMetadata {
            classification_confidence: classification.confidence,
            classification_source: classification.source,
            qa_confidence: None,
            context_used: None,
            contexts_searched: None,
            template_index: None,
            template_options: None,
            fallback_reason: None,
            processing_time_ms: 0.0,
            debug,
        };

        let (message, mode, source, confidence) = match outcome {
            ModeOutcome::Knowledge(KnowledgeOutcome::Answered {
                qa,
                contexts_searched,
            }) => {
                metadata.qa_confidence = Some(qa.confidence);
                metadata.context_used = Some(qa.context_id);
                metadata.contexts_searched = Some(contexts_searched);
                (
                    qa.answer_text,
                    Mode::Knowledge,
                    ResponseSource::QaExtraction,
                    classification.confidence.min(qa.confidence),
                )
            }
            ModeOutcome::Knowledge(KnowledgeOutcome::Degraded {
                reason,
                qa_confidence,
                related_topic,
                contexts_searched,
            }) => {
                metadata.qa_confidence = qa_confidence;
                metadata.contexts_searched = Some(contexts_searched);
                metadata.fallback_reason = Some(reason);
                (
                    degraded_message(classification.intent, related_topic),
                    Mode::Knowledge,
                    ResponseSource::KnowledgeFallback,
                    classification.confidence,
                )
            }
            ModeOutcome::Conversational => {
                let candidates = self.templates.templates_for(classification.intent);
                let message = match self.pick(classification.intent, candidates.len()) {
                    Some(index) => {
                        metadata.template_index = Some(index);
                        metadata.template_options = Some(candidates.len());
                        candidates[index].clone()
                    }
                    None => NO_TEMPLATE_MESSAGE.to_string(),
                };
                (
                    message,
                    Mode::Conversational,
                    ResponseSource::Template,
                    classification.confidence,
                )
            }
            ModeOutcome::Fallback(reason) => {
                metadata.fallback_reason = Some(reason);
                (
                    FALLBACK_MESSAGE.to_string(),
                    Mode::Fallback,
                    ResponseSource::Fallback,
                    classification.confidence,
                )
            }
        };

        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        metadata.processing_time_ms = processing_time_ms;

        ResponseRecord {
            message,
            intent: classification.intent,
            confidence,
            mode,
            source,
            metadata,
            processing_time_ms,
            timestamp: Utc::now(),
        }
    }

    fn pick(&self, intent: Intent, options: usize) -> Option<usize> {
        if options == 0 {
            return None;
        }
        match self.selection {
            TemplateSelection::Fixed => Some(0),
            TemplateSelection::RoundRobin => {
                let mut cursors = self.cursors.lock();
                let cursor = cursors.entry(intent).or_insert(0);
                let index = *cursor % options;
                *cursor = cursor.wrapping_add(1);
                Some(index)
            }
        }
    }
}

fn degraded_message(intent: Intent, related_topic: Option<Intent>) -> String {
    let area = intent
        .knowledge_category()
        .map_or("that topic", |category| category.as_str());
    match related_topic {
        Some(related) => format!(
            "I couldn't find a confident answer to that in our {} information. \
             You might want to ask about {} instead, or rephrase your question.",
            area,
            related.topic()
        ),
        None => format!(
            "I couldn't find a confident answer to that in our {} information. \
             Could you rephrase your question or add more details?",
            area
        ),
    }
}
