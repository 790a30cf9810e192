//! Extractive QA with a confidence gate, multi-context ranking and a result cache

use crate::cache::{canonicalize, CacheManager};
use crate::capabilities::{ModelHandle, QaModel, SpanPrediction};
use crate::config::Settings;
use crate::metrics::{CacheKind, MetricsCollector};
use crate::types::{clamp_unit, KnowledgeContext, QaGate, QaResult};
use futures::future::join_all;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct QaCacheKey {
    pub question: String,
    pub context_id: String,
}

pub type QaCache = CacheManager<QaCacheKey, QaResult>;

#[derive(Debug, Clone)]
pub struct ExtractorOptions {
    pub confidence_threshold: f32,
    pub max_answer_chars: usize,
    pub max_context_chars: usize,
    /// TTL for gate-passed answers
    pub ttl: Duration,
    /// TTL for low-confidence and empty answers
    pub low_confidence_ttl: Duration,
    pub cache_enabled: bool,
}

impl ExtractorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            confidence_threshold: settings.qa_confidence_threshold,
            max_answer_chars: settings.max_answer_chars,
            max_context_chars: settings.max_context_chars,
            ttl: settings.cache_ttl(),
            low_confidence_ttl: settings.qa_low_confidence_ttl(),
            cache_enabled: settings.cache.enabled,
        }
    }
}

pub struct QaExtractor {
    model: ModelHandle<dyn QaModel>,
    cache: Arc<QaCache>,
    metrics: Arc<MetricsCollector>,
    options: ExtractorOptions,
}

impl QaExtractor {
    pub fn new(
        model: ModelHandle<dyn QaModel>,
        cache: Arc<QaCache>,
        metrics: Arc<MetricsCollector>,
        options: ExtractorOptions,
    ) -> Self {
        Self {
            model,
            cache,
            metrics,
            options,
        }
    }

    pub fn model_available(&self) -> bool {
        self.model.is_available()
    }

    /// Answer `question` from a single context. Never fails: problems show up in `gate`.
    pub async fn extract(&self, question: &str, context: &KnowledgeContext) -> QaResult {
        let context_id = context.context_id();
        let key = QaCacheKey {
            question: canonicalize(question),
            context_id: context_id.to_string(),
        };

        if self.options.cache_enabled {
            match self.cache.get(&key) {
                Ok(Some(cached)) => {
                    self.metrics.record_cache_hit(CacheKind::Qa);
                    debug!("QA cache hit for '{}' on {}", key.question, context_id);
                    return cached;
                }
                Ok(None) => self.metrics.record_cache_miss(CacheKind::Qa),
                Err(e) => {
                    warn!("{} cache bypassed: {}", self.cache.name(), e);
                    self.metrics.record_cache_miss(CacheKind::Qa);
                }
            }
        }

        let Some(model) = self.model.get() else {
            return QaResult::failed(context_id, QaGate::ModelUnavailable);
        };

        let prepared = preprocess_context(&context.text, self.options.max_context_chars);
        let prediction = match model.answer(question.trim(), &prepared).await {
            Ok(prediction) => prediction,
            Err(e) => {
                warn!("QA model {} failed on {}: {:#}", model.name(), context_id, e);
                self.metrics.record_qa_failure();
                return QaResult::failed(context_id, QaGate::InferenceFailed);
            }
        };

        let result = self.apply_gate(prediction, context_id);
        debug!(
            "QA on {}: {:?} ({:.3})",
            context_id, result.gate, result.confidence
        );

        if self.options.cache_enabled && result.gate.produced_by_model() {
            let ttl = if result.gate.passed() {
                self.options.ttl
            } else {
                self.options.low_confidence_ttl
            };
            if let Err(e) = self.cache.put(key, result.clone(), ttl) {
                warn!("{} cache write skipped: {}", self.cache.name(), e);
            }
        }

        result
    }

    /// Extract from every context concurrently and keep the best answer.
    ///
    /// Ranking: gate-passed answers first, then higher confidence, then the
    /// lexicographically smaller context id. `None` only for an empty slice.
    pub async fn extract_from_multiple(
        &self,
        question: &str,
        contexts: &[KnowledgeContext],
    ) -> Option<QaResult> {
        let results = join_all(contexts.iter().map(|ctx| self.extract(question, ctx))).await;
        results.into_iter().min_by(rank)
    }

    fn apply_gate(&self, prediction: SpanPrediction, context_id: &str) -> QaResult {
        let answer_text = truncate_chars(prediction.span.trim(), self.options.max_answer_chars);
        let confidence = clamp_unit(prediction.confidence);

        let gate = if answer_text.is_empty() {
            QaGate::EmptySpan
        } else if confidence < self.options.confidence_threshold {
            QaGate::LowConfidence
        } else {
            QaGate::Passed
        };

        QaResult {
            answer_text,
            confidence,
            context_id: context_id.to_string(),
            gate,
        }
    }
}

/// Orders better results first.
fn rank(a: &QaResult, b: &QaResult) -> Ordering {
    b.gate
        .passed()
        .cmp(&a.gate.passed())
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| a.context_id.cmp(&b.context_id))
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

/// Collapse whitespace and bound the context to `max_chars`, preferring to cut
/// at a sentence end in the last 20% of the window.
pub fn preprocess_context(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let Some((cut, _)) = collapsed.char_indices().nth(max_chars) else {
        return collapsed;
    };

    let window = &collapsed[..cut];
    let sentence_end = window
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(idx, _)| idx)
        .last();

    match sentence_end {
        Some(idx) if window[..idx].chars().count() as f64 > max_chars as f64 * 0.8 => {
            window[..=idx].to_string()
        }
        _ => window.to_string(),
    }
}
