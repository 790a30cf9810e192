//! End-to-end tests for the orchestrator and its HTTP surface

use crate::composer::FALLBACK_MESSAGE;
use crate::server::create_router;
use crate::*;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const PRICING_QUESTION: &str = "What are your pricing plans?";
const PRICING_ANSWER: &str = "Basic at $29 per month, Professional at $99 per month and Enterprise with custom pricing";

struct Harness {
    orch: SharedOrchestrator,
    classifier: Arc<MockClassifier>,
    qa: Arc<MockQaModel>,
}

fn harness_with(classifier: MockClassifier, qa: MockQaModel, settings: Settings) -> Harness {
    let classifier = Arc::new(classifier);
    let qa = Arc::new(qa);
    let classifier_dyn: Arc<dyn Classifier> = classifier.clone();
    let qa_dyn: Arc<dyn QaModel> = qa.clone();

    let orch = Orchestrator::new(
        settings,
        Capabilities {
            classifier: ModelHandle::ready(classifier_dyn),
            qa_model: ModelHandle::ready(qa_dyn),
            knowledge: Arc::new(StaticKnowledgeBase::builtin()),
            templates: Arc::new(StaticTemplates::builtin()),
        },
    );
    Harness { orch, classifier, qa }
}

fn harness(classifier: MockClassifier, qa: MockQaModel) -> Harness {
    harness_with(classifier, qa, Settings::default())
}

/// Classifier that knows the standard test utterances
fn standard_classifier() -> MockClassifier {
    MockClassifier::new()
        .with_prediction(PRICING_QUESTION, "pricing_comparison", 0.95)
        .with_prediction("Thank you for your help!", "conversational_thanks", 0.9)
        .with_prediction("Tell me about enterprise", "pricing_enterprise", 0.85)
        .with_default("unknown", 0.1)
}

fn pricing_qa(confidence: f32) -> MockQaModel {
    MockQaModel::new().with_answer("We offer three pricing plans", PRICING_ANSWER, confidence)
}

async fn send(router: axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_knowledge_answer_from_primary_context() {
    let h = harness(standard_classifier(), pricing_qa(0.87));

    let record = h.orch.chat(Utterance::new(PRICING_QUESTION, None), false).await;

    assert_eq!(record.intent, Intent::PricingComparison);
    assert_eq!(record.mode, Mode::Knowledge);
    assert_eq!(record.source, ResponseSource::QaExtraction);
    assert_eq!(record.message, PRICING_ANSWER);
    assert_eq!(record.metadata.qa_confidence, Some(0.87));
    assert_eq!(record.metadata.context_used.as_deref(), Some("pricing_comparison"));
    assert_eq!(record.confidence, 0.87);
    assert!(record.processing_time_ms >= 0.0);
    assert_eq!(record.metadata.processing_time_ms, record.processing_time_ms);
}

#[tokio::test]
async fn test_conversational_reply_skips_qa() {
    let h = harness(standard_classifier(), pricing_qa(0.87));

    let record = h
        .orch
        .chat(Utterance::new("Thank you for your help!", None), false)
        .await;

    assert_eq!(record.mode, Mode::Conversational);
    assert_eq!(record.source, ResponseSource::Template);
    let templates = StaticTemplates::builtin();
    assert!(templates
        .templates_for(Intent::ConversationalThanks)
        .contains(&record.message));
    assert_eq!(h.qa.calls(), 0);
}

#[tokio::test]
async fn test_gibberish_falls_back() {
    let h = harness(standard_classifier(), pricing_qa(0.87));

    let record = h.orch.chat(Utterance::new("asdkj qweoiuz", None), false).await;

    assert_eq!(record.intent, Intent::Unknown);
    assert_eq!(record.mode, Mode::Fallback);
    assert_eq!(record.message, FALLBACK_MESSAGE);
    assert_eq!(record.metadata.fallback_reason, Some(FallbackReason::UnknownIntent));
    assert_eq!(h.qa.calls(), 0);
}

#[tokio::test]
async fn test_repeated_request_is_served_from_cache() {
    let h = harness(standard_classifier(), pricing_qa(0.87));

    let first = h.orch.classify(PRICING_QUESTION, true).await;
    let second = h.orch.classify(PRICING_QUESTION, true).await;

    assert_eq!(first.intent, second.intent);
    assert_eq!(first.confidence, second.confidence);
    assert_eq!(first.source, second.source);
    assert_eq!(first.debug.as_ref().unwrap()["from_cache"], json!(false));
    assert_eq!(second.debug.as_ref().unwrap()["from_cache"], json!(true));
    assert_eq!(h.classifier.calls(), 1);

    // chat reuses both caches
    let a = h.orch.chat(Utterance::new(PRICING_QUESTION, None), false).await;
    let b = h.orch.chat(Utterance::new(PRICING_QUESTION, None), false).await;
    assert_eq!(a.message, b.message);
    assert_eq!(h.classifier.calls(), 1);
    assert_eq!(h.qa.calls(), 1);

    let stats = h.orch.stats();
    assert_eq!(stats.cache("classification").unwrap().hits, 3);
    assert_eq!(stats.cache("qa").unwrap().hits, 1);
}

#[tokio::test]
async fn test_empty_input_is_rejected_before_resolution() {
    let h = harness(standard_classifier(), pricing_qa(0.87));

    let (status, body) = send(
        create_router(h.orch.clone()),
        "POST",
        "/chat",
        Some(json!({ "message": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid request");

    let (status, _) = send(
        create_router(h.orch.clone()),
        "POST",
        "/classify",
        Some(json!({ "text": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(h.classifier.calls(), 0);
    assert_eq!(h.orch.stats().requests.chat, 0);
}

#[tokio::test]
async fn test_low_qa_confidence_degrades() {
    let h = harness(standard_classifier(), pricing_qa(0.15));

    let record = h.orch.chat(Utterance::new(PRICING_QUESTION, None), false).await;

    assert_eq!(record.mode, Mode::Knowledge);
    assert_eq!(record.source, ResponseSource::KnowledgeFallback);
    assert!(!record.message.contains(PRICING_ANSWER));
    assert_eq!(record.metadata.fallback_reason, Some(FallbackReason::QaGateFailed));
    assert_eq!(record.metadata.qa_confidence, Some(0.15));
    // primary plus three related pricing contexts
    assert_eq!(record.metadata.contexts_searched, Some(4));
}

#[tokio::test]
async fn test_gate_never_leaks_low_confidence_span() {
    for confidence in [0.0, 0.1, 0.29] {
        let qa = MockQaModel::new().with_answer("", "LEAKED SPAN", confidence);
        let h = harness(standard_classifier(), qa);

        let record = h.orch.chat(Utterance::new(PRICING_QUESTION, None), false).await;
        assert_eq!(record.mode, Mode::Knowledge);
        assert!(!record.message.contains("LEAKED SPAN"), "leaked at {}", confidence);
    }
}

#[tokio::test]
async fn test_related_context_rescues_failed_primary() {
    let qa = MockQaModel::new()
        .with_answer("Enterprise package", "custom", 0.1)
        .with_answer("The Basic plan costs", "$29 per month", 0.8);
    let h = harness(standard_classifier(), qa);

    let record = h
        .orch
        .chat(Utterance::new("Tell me about enterprise", None), false)
        .await;

    assert_eq!(record.source, ResponseSource::QaExtraction);
    assert_eq!(record.message, "$29 per month");
    assert_eq!(record.metadata.context_used.as_deref(), Some("pricing_basic"));
    assert_eq!(record.metadata.contexts_searched, Some(4));
    assert_eq!(h.qa.calls(), 4);
}

#[tokio::test]
async fn test_unavailable_models_degrade_gracefully() {
    let orch = Orchestrator::new(
        Settings::default(),
        Capabilities {
            classifier: ModelHandle::unavailable("classifier not loaded"),
            qa_model: ModelHandle::unavailable("qa not loaded"),
            knowledge: Arc::new(StaticKnowledgeBase::builtin()),
            templates: Arc::new(StaticTemplates::builtin()),
        },
    );

    // keyword score (0.605) clears the 0.6 gate on its own
    let record = orch.chat(Utterance::new(PRICING_QUESTION, None), false).await;
    assert_eq!(record.intent, Intent::PricingComparison);
    assert_eq!(record.metadata.classification_source, ClassificationSource::Keyword);
    assert_eq!(record.mode, Mode::Knowledge);
    assert_eq!(record.source, ResponseSource::KnowledgeFallback);
    assert_eq!(record.metadata.fallback_reason, Some(FallbackReason::QaUnavailable));

    let record = orch.chat(Utterance::new("asdkj qweoiuz", None), false).await;
    assert_eq!(record.mode, Mode::Fallback);
    assert_eq!(orch.health().status, "degraded");
}

#[tokio::test]
async fn test_local_lexical_qa_answers_from_builtin_knowledge() {
    let classifier: Arc<dyn Classifier> = Arc::new(
        MockClassifier::new().with_prediction("How much does the Basic plan cost?", "pricing_basic", 0.9),
    );
    let qa: Arc<dyn QaModel> = Arc::new(LexicalQa::new());
    let orch = Orchestrator::new(
        Settings::default(),
        Capabilities {
            classifier: ModelHandle::ready(classifier),
            qa_model: ModelHandle::ready(qa),
            knowledge: Arc::new(StaticKnowledgeBase::builtin()),
            templates: Arc::new(StaticTemplates::builtin()),
        },
    );

    let record = orch
        .chat(Utterance::new("How much does the Basic plan cost?", None), false)
        .await;
    assert_eq!(record.source, ResponseSource::QaExtraction);
    assert!(record.message.contains("$29 per month"));
}

#[tokio::test]
async fn test_batch_preserves_order_and_length() {
    let mut settings = Settings::default();
    settings.batch_parallelism = 3;
    let h = harness_with(
        standard_classifier().with_delay(Duration::from_millis(5)),
        pricing_qa(0.87),
        settings,
    );

    let texts: Vec<String> = [
        PRICING_QUESTION,
        "asdkj qweoiuz",
        "Thank you for your help!",
        "Tell me about enterprise",
        "hello",
        PRICING_QUESTION,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let batch = h.orch.classify_batch(&texts, false).await;
    let intents: Vec<Intent> = batch.results.iter().map(|r| r.intent).collect();

    assert_eq!(batch.total_processed, texts.len());
    assert_eq!(
        intents,
        vec![
            Intent::PricingComparison,
            Intent::Unknown,
            Intent::ConversationalThanks,
            Intent::PricingEnterprise,
            Intent::ConversationalGreeting,
            Intent::PricingComparison,
        ]
    );
    assert!(batch
        .results
        .iter()
        .all(|r| (0.0..=1.0).contains(&r.confidence)));

    let stats = h.orch.stats();
    assert_eq!(stats.requests.batch, 1);
    assert_eq!(stats.requests.batch_items, 6);
}

#[tokio::test]
async fn test_batch_runs_on_a_spawned_task() {
    let h = harness(standard_classifier(), pricing_qa(0.87));
    let orch = h.orch.clone();
    let texts = vec![PRICING_QUESTION.to_string(), "asdkj qweoiuz".to_string()];

    // the router needs the batch future to be Send
    let batch = tokio::spawn(async move { orch.classify_batch(&texts, false).await })
        .await
        .unwrap();

    assert_eq!(batch.total_processed, 2);
    assert_eq!(batch.results[0].intent, Intent::PricingComparison);
    assert_eq!(batch.results[1].intent, Intent::Unknown);
    assert_eq!(h.orch.stats().latency.batch.count, 1);
}

#[tokio::test]
async fn test_timeout_returns_fallback_without_cache_writes() {
    let mut settings = Settings::default();
    settings.request_timeout_ms = 50;
    let h = harness_with(
        standard_classifier().with_delay(Duration::from_millis(300)),
        pricing_qa(0.87),
        settings,
    );

    let record = h.orch.chat(Utterance::new(PRICING_QUESTION, None), false).await;
    assert_eq!(record.mode, Mode::Fallback);
    assert_eq!(record.message, FALLBACK_MESSAGE);
    assert_eq!(record.metadata.fallback_reason, Some(FallbackReason::Timeout));

    let classified = h.orch.classify(PRICING_QUESTION, false).await;
    assert_eq!(classified.intent, Intent::Unknown);
    assert_eq!(classified.confidence, 0.0);
    assert_eq!(classified.source, ClassificationSource::Hybrid);

    let stats = h.orch.stats();
    assert_eq!(stats.degradations.timeouts, 2);
    assert_eq!(stats.cache("classification").unwrap().entries, 0);
    assert_eq!(stats.modes.fallback, 1);
}

#[tokio::test]
async fn test_concurrent_chats_share_caches() {
    let h = harness(standard_classifier(), pricing_qa(0.87));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let orch = h.orch.clone();
            let text = if i % 2 == 0 {
                PRICING_QUESTION.to_string()
            } else {
                PRICING_QUESTION.to_uppercase()
            };
            tokio::spawn(async move { orch.chat(Utterance::new(text, None), false).await })
        })
        .collect();

    for handle in handles {
        let record = handle.await.unwrap();
        assert_eq!(record.mode, Mode::Knowledge);
        assert_eq!(record.message, PRICING_ANSWER);
    }

    let stats = h.orch.stats();
    assert_eq!(stats.requests.chat, 16);
    assert_eq!(stats.modes.knowledge, 16);
    assert_eq!(stats.cache("classification").unwrap().entries, 1);
    assert_eq!(stats.cache("qa").unwrap().entries, 1);
    assert_eq!(stats.latency.chat.count, 16);
    assert_eq!(stats.latency.classify.count, 0);
}

#[tokio::test]
async fn test_chat_debug_payload() {
    let h = harness(standard_classifier(), pricing_qa(0.87));

    let record = h
        .orch
        .chat(Utterance::new(PRICING_QUESTION, Some("u-1".to_string())), true)
        .await;
    let debug = record.metadata.debug.unwrap();

    assert_eq!(debug["user_id"], "u-1");
    assert_eq!(debug["mode"], "knowledge");
    assert_eq!(debug["classification"]["intent"], "pricing_comparison");
    assert_eq!(debug["fusion"]["rule"], "neural_confident");
}

#[tokio::test]
async fn test_http_surface() {
    let h = harness(standard_classifier(), pricing_qa(0.87));
    let router = || create_router(h.orch.clone());

    let (status, health) = send(router(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["knowledge_entries"], 11);

    let (_, intents) = send(router(), "GET", "/intents", None).await;
    assert_eq!(intents["total"], 17);
    assert_eq!(intents["intents"][0]["mode_family"], "knowledge");

    let (status, classified) = send(
        router(),
        "POST",
        "/classify",
        Some(json!({ "text": PRICING_QUESTION, "include_debug": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(classified["intent"], "pricing_comparison");
    assert_eq!(classified["source"], "neural");
    assert_eq!(classified["debug"]["rule"], "neural_confident");

    let (status, chat) = send(
        router(),
        "POST",
        "/chat",
        Some(json!({ "message": PRICING_QUESTION, "user_id": "u-7" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chat["mode"], "knowledge");
    assert_eq!(chat["source"], "qa_extraction");
    assert_eq!(chat["message"], PRICING_ANSWER);
    assert!(chat["timestamp"].is_string());

    let (status, batch) = send(
        router(),
        "POST",
        "/batch-classify",
        Some(json!({ "texts": ["hello", "asdkj qweoiuz"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(batch["total_processed"], 2);
    assert_eq!(batch["results"][1]["intent"], "unknown");
    assert!(batch["average_time_ms"].is_number());

    let too_many: Vec<String> = (0..21).map(|i| format!("text {}", i)).collect();
    let (status, error) = send(
        router(),
        "POST",
        "/batch-classify",
        Some(json!({ "texts": too_many })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error["details"].as_str().unwrap().contains("max 20"));

    let (status, stats) = send(router(), "GET", "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["requests"]["chat"], 1);
    assert_eq!(stats["modes"]["knowledge"], 1);

    let (status, cleared) = send(router(), "POST", "/cache/clear", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["status"], "cleared");
    assert_eq!(h.orch.stats().cache("classification").unwrap().entries, 0);
    assert_eq!(h.orch.stats().cache("qa").unwrap().entries, 0);
}
