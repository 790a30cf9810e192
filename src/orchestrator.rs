//! The orchestrator: one explicit context object owning models, caches and metrics

use crate::cache::canonicalize;
use crate::capabilities::{Classifier, KnowledgeStore, ModelHandle, QaModel, TemplateStore};
use crate::composer::{KnowledgeOutcome, ModeOutcome, ResponseComposer};
use crate::config::Settings;
use crate::intent_resolver::{ClassificationCache, FusionPolicy, IntentResolver};
use crate::metrics::{MetricsCollector, MetricsSnapshot, RequestKind};
use crate::mode::ModeSelector;
use crate::qa_extractor::{ExtractorOptions, QaCache, QaExtractor};
use crate::types::*;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// External collaborators handed to the orchestrator at startup
pub struct Capabilities {
    pub classifier: ModelHandle<dyn Classifier>,
    pub qa_model: ModelHandle<dyn QaModel>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub templates: Arc<dyn TemplateStore>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthInfo {
    pub status: &'static str,
    pub classifier_available: bool,
    pub qa_available: bool,
    pub knowledge_entries: usize,
    pub uptime_secs: u64,
    pub version: &'static str,
}

pub struct Orchestrator {
    settings: Settings,
    resolver: IntentResolver,
    mode_selector: ModeSelector,
    qa: QaExtractor,
    knowledge: Arc<dyn KnowledgeStore>,
    composer: ResponseComposer,
    metrics: Arc<MetricsCollector>,
    classification_cache: Arc<ClassificationCache>,
    qa_cache: Arc<QaCache>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

pub type SharedOrchestrator = Arc<Orchestrator>;

impl Orchestrator {
    pub fn new(settings: Settings, capabilities: Capabilities) -> SharedOrchestrator {
        let metrics = Arc::new(MetricsCollector::new());
        let lock_timeout = settings.cache_lock_timeout();
        let classification_cache = Arc::new(ClassificationCache::new(
            "classification",
            settings.cache.max_entries,
            lock_timeout,
        ));
        let qa_cache = Arc::new(QaCache::new("qa", settings.cache.max_entries, lock_timeout));

        let resolver = IntentResolver::new(
            capabilities.classifier,
            FusionPolicy::new(settings.confidence_threshold),
            Arc::clone(&classification_cache),
            settings.cache_ttl(),
            Arc::clone(&metrics),
        )
        .with_caching(settings.cache.enabled);

        let qa = QaExtractor::new(
            capabilities.qa_model,
            Arc::clone(&qa_cache),
            Arc::clone(&metrics),
            ExtractorOptions::from_settings(&settings),
        );

        info!(
            "Orchestrator ready: classifier={}, qa={}, knowledge entries={}, cache={}",
            resolver.classifier_available(),
            qa.model_available(),
            capabilities.knowledge.len(),
            if settings.cache.enabled { "on" } else { "off" }
        );

        Arc::new(Self {
            mode_selector: ModeSelector::new(settings.confidence_threshold),
            composer: ResponseComposer::new(capabilities.templates, settings.template_selection),
            knowledge: capabilities.knowledge,
            resolver,
            qa,
            metrics,
            classification_cache,
            qa_cache,
            sweeper: Mutex::new(None),
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Answer one utterance. Always produces a response; failures and
    /// timeouts come back as fallback responses.
    pub async fn chat(&self, utterance: Utterance, include_debug: bool) -> ResponseRecord {
        let request_id = Uuid::new_v4();
        let span = info_span!("chat", %request_id);

        async move {
            let started = Instant::now();
            self.metrics.record_request(RequestKind::Chat);

            let record = match tokio::time::timeout(
                self.settings.request_timeout(),
                self.respond(&utterance, include_debug, request_id, started),
            )
            .await
            {
                Ok(record) => record,
                Err(_) => {
                    warn!("Chat timed out after {}ms", self.settings.request_timeout_ms);
                    self.metrics.record_timeout();
                    self.composer.compose(
                        &ClassificationResult::unresolved(),
                        ModeOutcome::Fallback(FallbackReason::Timeout),
                        started,
                        None,
                    )
                }
            };

            self.metrics.record_mode(record.mode);
            self.metrics
                .record_latency(RequestKind::Chat, record.processing_time_ms);
            info!(
                "Chat answered: intent={}, mode={}, confidence={:.3}, {:.1}ms",
                record.intent,
                record.mode.as_str(),
                record.confidence,
                record.processing_time_ms
            );
            record
        }
        .instrument(span)
        .await
    }

    async fn respond(
        &self,
        utterance: &Utterance,
        include_debug: bool,
        request_id: Uuid,
        started: Instant,
    ) -> ResponseRecord {
        // Step 1: resolve intent
        let resolution = self.resolver.resolve_detailed(&utterance.text).await;
        let classification = resolution.result.clone();

        // Step 2: pick the response path
        let mode = self.mode_selector.select(&classification);
        debug!("Mode {} for intent {}", mode.as_str(), classification.intent);

        // Step 3: run it
        let outcome = match mode {
            Mode::Knowledge => ModeOutcome::Knowledge(
                self.answer_from_knowledge(&utterance.text, classification.intent)
                    .await,
            ),
            Mode::Conversational => ModeOutcome::Conversational,
            Mode::Fallback => ModeOutcome::Fallback(if classification.intent == Intent::Unknown {
                FallbackReason::UnknownIntent
            } else {
                FallbackReason::LowConfidence
            }),
        };

        let debug = include_debug.then(|| {
            json!({
                "request_id": request_id.to_string(),
                "classification": &classification,
                "classification_cached": resolution.from_cache,
                "fusion": &resolution.trace,
                "mode": mode,
                "user_id": &utterance.user_id,
                "received_at": utterance.received_at,
            })
        });

        // Step 4: compose
        self.composer.compose(&classification, outcome, started, debug)
    }

    /// Primary context first, then related contexts of the same category.
    async fn answer_from_knowledge(&self, question: &str, intent: Intent) -> KnowledgeOutcome {
        let Some(primary) = self.knowledge.lookup(intent) else {
            warn!("No knowledge context for {}", intent);
            return KnowledgeOutcome::Degraded {
                reason: FallbackReason::NoContext,
                qa_confidence: None,
                related_topic: None,
                contexts_searched: 0,
            };
        };

        let first = self.qa.extract(question, &primary).await;
        if first.gate.passed() {
            return KnowledgeOutcome::Answered {
                qa: first,
                contexts_searched: 1,
            };
        }

        let related = self
            .knowledge
            .related(intent, self.settings.related_context_limit);
        let related_topic = related.first().map(|ctx| ctx.intent_id);
        let mut contexts_searched = 1;
        let mut best_failed = first;

        if best_failed.gate != QaGate::ModelUnavailable && !related.is_empty() {
            debug!(
                "Primary context failed the QA gate ({:?}), trying {} related",
                best_failed.gate,
                related.len()
            );
            contexts_searched += related.len();
            if let Some(best) = self.qa.extract_from_multiple(question, &related).await {
                if best.gate.passed() {
                    return KnowledgeOutcome::Answered {
                        qa: best,
                        contexts_searched,
                    };
                }
                if best.confidence > best_failed.confidence {
                    best_failed = best;
                }
            }
        }

        let reason = match best_failed.gate {
            QaGate::ModelUnavailable | QaGate::InferenceFailed => FallbackReason::QaUnavailable,
            _ => FallbackReason::QaGateFailed,
        };
        KnowledgeOutcome::Degraded {
            reason,
            qa_confidence: best_failed
                .gate
                .produced_by_model()
                .then_some(best_failed.confidence),
            related_topic,
            contexts_searched,
        }
    }

    pub async fn classify(&self, text: &str, include_debug: bool) -> ClassifyResponse {
        let request_id = Uuid::new_v4();
        let span = info_span!("classify", %request_id);

        async move {
            let started = Instant::now();
            self.metrics.record_request(RequestKind::Classify);
            let response = self.classify_one(text, include_debug).await;
            self.metrics
                .record_latency(RequestKind::Classify, started.elapsed().as_secs_f64() * 1000.0);
            response
        }
        .instrument(span)
        .await
    }

    /// Classify every text, at most `batch_parallelism` at a time. Output order matches input.
    pub async fn classify_batch(&self, texts: &[String], include_debug: bool) -> BatchClassifyResponse {
        let request_id = Uuid::new_v4();
        let span = info_span!("batch_classify", %request_id, items = texts.len());

        async move {
            let started = Instant::now();
            self.metrics.record_request(RequestKind::Batch);
            self.metrics.record_batch_items(texts.len());

            // owned items keep the stream future Send for the router
            let results: Vec<ClassifyResponse> = stream::iter(texts.iter().cloned())
                .map(|text| async move { self.classify_one(&text, include_debug).await })
                .buffered(self.settings.batch_parallelism.max(1))
                .collect()
                .await;

            let total_time_ms = started.elapsed().as_secs_f64() * 1000.0;
            self.metrics.record_latency(RequestKind::Batch, total_time_ms);
            info!("Batch of {} classified in {:.1}ms", results.len(), total_time_ms);

            BatchClassifyResponse {
                total_processed: results.len(),
                average_time_ms: if results.is_empty() {
                    0.0
                } else {
                    total_time_ms / results.len() as f64
                },
                total_time_ms,
                results,
            }
        }
        .instrument(span)
        .await
    }

    async fn classify_one(&self, text: &str, include_debug: bool) -> ClassifyResponse {
        match tokio::time::timeout(
            self.settings.request_timeout(),
            self.resolver.resolve_detailed(text),
        )
        .await
        {
            Ok(resolution) => {
                let debug = include_debug.then(|| {
                    json!({
                        "normalized_text": canonicalize(text),
                        "from_cache": resolution.from_cache,
                        "neural": resolution.trace.as_ref().map(|t| &t.neural),
                        "keyword": resolution.trace.as_ref().map(|t| &t.keyword),
                        "rule": resolution.trace.as_ref().map(|t| t.rule),
                        "confidence_threshold": self.settings.confidence_threshold,
                    })
                });
                ClassifyResponse {
                    intent: resolution.result.intent,
                    confidence: resolution.result.confidence,
                    source: resolution.result.source,
                    debug,
                }
            }
            Err(_) => {
                warn!("Classification timed out after {}ms", self.settings.request_timeout_ms);
                self.metrics.record_timeout();
                let unresolved = ClassificationResult::unresolved();
                ClassifyResponse {
                    intent: unresolved.intent,
                    confidence: unresolved.confidence,
                    source: unresolved.source,
                    debug: include_debug.then(|| json!({ "timed_out": true })),
                }
            }
        }
    }

    pub fn stats(&self) -> MetricsSnapshot {
        self.metrics
            .snapshot(self.classification_cache.stats(), self.qa_cache.stats())
    }

    pub fn clear_caches(&self) {
        self.classification_cache.clear();
        self.qa_cache.clear();
        info!("Classification and QA caches cleared");
    }

    pub fn health(&self) -> HealthInfo {
        let classifier_available = self.resolver.classifier_available();
        let qa_available = self.qa.model_available();
        HealthInfo {
            status: if classifier_available && qa_available {
                "healthy"
            } else {
                "degraded"
            },
            classifier_available,
            qa_available,
            knowledge_entries: self.knowledge.len(),
            uptime_secs: self.metrics.uptime_secs(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Start the periodic purge of expired cache entries. Replaces a running sweeper.
    pub fn spawn_cache_sweeper(&self) {
        let classification = Arc::clone(&self.classification_cache);
        let qa = Arc::clone(&self.qa_cache);
        let period = self.settings.sweep_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = classification.purge_expired() + qa.purge_expired();
                if purged > 0 {
                    debug!("Cache sweep purged {} expired entries", purged);
                }
            }
        });

        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
        info!("Cache sweeper running every {:?}", period);
    }

    /// Stop background work and release cached state.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.clear_caches();
        info!("Orchestrator shut down");
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}
