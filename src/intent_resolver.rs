//! Hybrid intent resolution: neural classifier + keyword matcher + fusion policy

use crate::cache::{canonicalize, CacheManager};
use crate::capabilities::{Classifier, ModelHandle};
use crate::keywords::{KeywordMatch, KeywordMatcher};
use crate::metrics::{CacheKind, MetricsCollector};
use crate::types::{clamp_unit, ClassificationResult, ClassificationSource, Intent};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub type ClassificationCache = CacheManager<String, ClassificationResult>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NeuralStatus {
    Ok,
    Unavailable,
    Failed,
}

/// Classifier output mapped into the vocabulary
#[derive(Debug, Clone, Serialize)]
pub struct NeuralSignal {
    pub status: NeuralStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_label: Option<String>,
    pub intent: Intent,
    pub confidence: f32,
}

impl NeuralSignal {
    fn missing(status: NeuralStatus) -> Self {
        Self {
            status,
            raw_label: None,
            intent: Intent::Unknown,
            confidence: 0.0,
        }
    }
}

/// One row of the fusion decision table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionRule {
    /// Neural confidence at or above the threshold: take the neural label.
    NeuralConfident,
    /// A keyword match exists: take its label with the larger of both scores.
    KeywordMatch,
    /// Nothing actionable: unknown with the neural confidence.
    Unresolved,
}

impl FusionRule {
    pub fn apply(
        &self,
        neural: &NeuralSignal,
        keyword: &KeywordMatch,
        threshold: f32,
    ) -> Option<ClassificationResult> {
        match self {
            FusionRule::NeuralConfident if neural.confidence >= threshold => Some(
                ClassificationResult::new(neural.intent, neural.confidence, ClassificationSource::Neural),
            ),
            FusionRule::KeywordMatch if keyword.is_match() => Some(ClassificationResult::new(
                keyword.intent,
                neural.confidence.max(keyword.score),
                ClassificationSource::Keyword,
            )),
            FusionRule::Unresolved => Some(ClassificationResult::new(
                Intent::Unknown,
                neural.confidence,
                ClassificationSource::Hybrid,
            )),
            _ => None,
        }
    }
}

/// Ordered fusion rules; the first rule that fires decides.
#[derive(Debug, Clone)]
pub struct FusionPolicy {
    threshold: f32,
    rules: Vec<FusionRule>,
}

impl FusionPolicy {
    pub fn new(threshold: f32) -> Self {
        Self::with_rules(
            threshold,
            vec![
                FusionRule::NeuralConfident,
                FusionRule::KeywordMatch,
                FusionRule::Unresolved,
            ],
        )
    }

    pub fn with_rules(threshold: f32, rules: Vec<FusionRule>) -> Self {
        Self { threshold, rules }
    }

    /// Returns the result and the rule that produced it.
    pub fn fuse(&self, neural: &NeuralSignal, keyword: &KeywordMatch) -> (ClassificationResult, FusionRule) {
        self.rules
            .iter()
            .find_map(|rule| {
                rule.apply(neural, keyword, self.threshold)
                    .map(|result| (result, *rule))
            })
            .unwrap_or_else(|| {
                let rule = FusionRule::Unresolved;
                let result = rule
                    .apply(neural, keyword, self.threshold)
                    .unwrap_or_else(ClassificationResult::unresolved);
                (result, rule)
            })
    }
}

/// How a fresh classification was reached
#[derive(Debug, Clone, Serialize)]
pub struct FusionTrace {
    pub neural: NeuralSignal,
    pub keyword: KeywordMatch,
    pub rule: FusionRule,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub result: ClassificationResult,
    pub from_cache: bool,
    /// `None` on a cache hit
    pub trace: Option<FusionTrace>,
}

pub struct IntentResolver {
    classifier: ModelHandle<dyn Classifier>,
    keywords: KeywordMatcher,
    policy: FusionPolicy,
    cache: Arc<ClassificationCache>,
    cache_enabled: bool,
    ttl: Duration,
    metrics: Arc<MetricsCollector>,
}

impl IntentResolver {
    pub fn new(
        classifier: ModelHandle<dyn Classifier>,
        policy: FusionPolicy,
        cache: Arc<ClassificationCache>,
        ttl: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            classifier,
            keywords: KeywordMatcher::builtin(),
            policy,
            cache,
            cache_enabled: true,
            ttl,
            metrics,
        }
    }

    pub fn with_keyword_matcher(mut self, keywords: KeywordMatcher) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn classifier_available(&self) -> bool {
        self.classifier.is_available()
    }

    pub async fn resolve(&self, text: &str) -> ClassificationResult {
        self.resolve_detailed(text).await.result
    }

    pub async fn resolve_detailed(&self, text: &str) -> Resolution {
        let key = canonicalize(text);

        if self.cache_enabled {
            match self.cache.get(&key) {
                Ok(Some(result)) => {
                    self.metrics.record_cache_hit(CacheKind::Classification);
                    debug!("Classification cache hit for '{}'", key);
                    return Resolution {
                        result,
                        from_cache: true,
                        trace: None,
                    };
                }
                Ok(None) => self.metrics.record_cache_miss(CacheKind::Classification),
                Err(e) => {
                    warn!("{} cache bypassed: {}", self.cache.name(), e);
                    self.metrics.record_cache_miss(CacheKind::Classification);
                }
            }
        }

        let neural = self.neural_signal(text.trim()).await;
        let keyword = self.keywords.match_text(text);
        let (result, rule) = self.policy.fuse(&neural, &keyword);

        debug!(
            "Resolved '{}' -> {} ({:.3}, {:?}) via {:?}",
            key, result.intent, result.confidence, result.source, rule
        );

        // a transient classifier failure must not pin a keyword-only answer for a full TTL
        if self.cache_enabled && neural.status != NeuralStatus::Failed {
            if let Err(e) = self.cache.put(key, result.clone(), self.ttl) {
                warn!("{} cache write skipped: {}", self.cache.name(), e);
            }
        }

        Resolution {
            result,
            from_cache: false,
            trace: Some(FusionTrace {
                neural,
                keyword,
                rule,
            }),
        }
    }

    async fn neural_signal(&self, text: &str) -> NeuralSignal {
        let Some(classifier) = self.classifier.get() else {
            self.metrics.record_classifier_degraded();
            return NeuralSignal::missing(NeuralStatus::Unavailable);
        };

        match classifier.classify(text).await {
            Ok(prediction) => NeuralSignal {
                status: NeuralStatus::Ok,
                intent: Intent::from_model_label(&prediction.label),
                confidence: clamp_unit(prediction.confidence),
                raw_label: Some(prediction.label),
            },
            Err(e) => {
                warn!("Classifier {} failed, using keywords only: {:#}", classifier.name(), e);
                self.metrics.record_classifier_degraded();
                NeuralSignal::missing(NeuralStatus::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::hold_lock;
    use crate::capabilities::MockClassifier;

    const TTL: Duration = Duration::from_secs(60);

    fn resolver_with(classifier: ModelHandle<dyn Classifier>) -> (IntentResolver, Arc<MetricsCollector>) {
        let metrics = Arc::new(MetricsCollector::new());
        let cache = Arc::new(ClassificationCache::new("classification", 100, Duration::from_millis(50)));
        let resolver = IntentResolver::new(classifier, FusionPolicy::new(0.6), cache, TTL, Arc::clone(&metrics));
        (resolver, metrics)
    }

    fn ready(mock: MockClassifier) -> (ModelHandle<dyn Classifier>, Arc<MockClassifier>) {
        let mock = Arc::new(mock);
        let classifier: Arc<dyn Classifier> = mock.clone();
        (ModelHandle::ready(classifier), mock)
    }

    #[tokio::test]
    async fn test_confident_neural_wins() {
        let (handle, _) = ready(
            MockClassifier::new().with_prediction("What are your pricing plans?", "pricing_comparison", 0.95),
        );
        let (resolver, _) = resolver_with(handle);

        let resolution = resolver.resolve_detailed("What are your pricing plans?").await;
        assert_eq!(resolution.result.intent, Intent::PricingComparison);
        assert_eq!(resolution.result.confidence, 0.95);
        assert_eq!(resolution.result.source, ClassificationSource::Neural);
        assert_eq!(resolution.trace.unwrap().rule, FusionRule::NeuralConfident);
    }

    #[tokio::test]
    async fn test_keyword_rescues_weak_neural() {
        let (handle, _) = ready(MockClassifier::new().with_default("setup_guide", 0.3));
        let (resolver, _) = resolver_with(handle);

        let result = resolver.resolve("Thank you for your help!").await;
        assert_eq!(result.intent, Intent::ConversationalThanks);
        assert_eq!(result.source, ClassificationSource::Keyword);
        // keyword score (0.77) beats the neural 0.3
        assert!(result.confidence > 0.3 && result.confidence <= 0.9);
    }

    #[tokio::test]
    async fn test_keyword_keeps_higher_neural_confidence() {
        let (handle, _) = ready(MockClassifier::new().with_default("unknown", 0.55));
        let (resolver, _) = resolver_with(handle);

        // single keyword hit on "account": (1/7 + 0.15) * 1.1 < 0.55
        let result = resolver.resolve("my account").await;
        assert_eq!(result.intent, Intent::AccountCreation);
        assert_eq!(result.confidence, 0.55);
    }

    #[tokio::test]
    async fn test_gibberish_is_unknown() {
        let (handle, _) = ready(MockClassifier::new().with_default("company_about", 0.1));
        let (resolver, _) = resolver_with(handle);

        let resolution = resolver.resolve_detailed("asdkj qweoiuz").await;
        assert_eq!(resolution.result.intent, Intent::Unknown);
        assert_eq!(resolution.result.confidence, 0.1);
        assert_eq!(resolution.result.source, ClassificationSource::Hybrid);
        assert_eq!(resolution.trace.unwrap().rule, FusionRule::Unresolved);
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let (handle, mock) = ready(
            MockClassifier::new().with_prediction("What are your pricing plans?", "pricing_comparison", 0.95),
        );
        let (resolver, metrics) = resolver_with(handle);

        let first = resolver.resolve_detailed("What are your pricing plans?").await;
        let second = resolver.resolve_detailed("  what are your PRICING plans? ").await;

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.result, second.result);
        assert_eq!(mock.calls(), 1);

        let snap = metrics.snapshot(resolver.cache.stats(), resolver.cache.stats());
        assert_eq!(snap.caches[0].hits, 1);
        assert_eq!(snap.caches[0].misses, 1);
    }

    #[tokio::test]
    async fn test_unavailable_classifier_degrades_to_keywords() {
        let (resolver, metrics) = resolver_with(ModelHandle::unavailable("weights missing"));
        assert!(!resolver.classifier_available());

        let resolution = resolver.resolve_detailed("hello there").await;
        assert_eq!(resolution.result.intent, Intent::ConversationalGreeting);
        assert_eq!(resolution.result.source, ClassificationSource::Keyword);
        assert_eq!(resolution.trace.unwrap().neural.status, NeuralStatus::Unavailable);

        let unresolved = resolver.resolve("asdkj qweoiuz").await;
        assert_eq!(unresolved, ClassificationResult::unresolved());

        let snap = metrics.snapshot(resolver.cache.stats(), resolver.cache.stats());
        assert_eq!(snap.degradations.classifier_degraded, 2);
    }

    #[tokio::test]
    async fn test_failed_call_is_not_cached() {
        let (handle, mock) = ready(MockClassifier::failing());
        let (resolver, _) = resolver_with(handle);

        let first = resolver.resolve("pricing plans").await;
        let second = resolver.resolve("pricing plans").await;
        assert_eq!(first, second);
        assert_eq!(first.source, ClassificationSource::Keyword);
        assert_eq!(mock.calls(), 2);
        assert!(resolver.cache.is_empty());
    }

    #[tokio::test]
    async fn test_locked_cache_is_bypassed_as_a_miss() {
        let (handle, mock) = ready(
            MockClassifier::new().with_prediction("What are your pricing plans?", "pricing_comparison", 0.95),
        );
        let (resolver, metrics) = resolver_with(handle);

        let held = hold_lock(&resolver.cache);
        let resolution = resolver.resolve_detailed("What are your pricing plans?").await;
        held.release();

        assert!(!resolution.from_cache);
        assert_eq!(resolution.result.intent, Intent::PricingComparison);
        assert_eq!(resolution.result.confidence, 0.95);
        assert_eq!(mock.calls(), 1);
        assert!(resolver.cache.is_empty());

        let snap = metrics.snapshot(resolver.cache.stats(), resolver.cache.stats());
        assert_eq!(snap.caches[0].misses, 1);
        assert_eq!(snap.caches[0].hits, 0);

        // lock released: the next call caches normally
        resolver.resolve("What are your pricing plans?").await;
        assert_eq!(mock.calls(), 2);
        assert_eq!(resolver.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_custom_keyword_table() {
        let (resolver, _) = resolver_with(ModelHandle::unavailable("offline"));
        let resolver = resolver.with_keyword_matcher(KeywordMatcher::new(vec![(
            Intent::IntegrationGuide,
            vec!["webhook", "zapier"],
        )]));

        let result = resolver.resolve("Do you support zapier?").await;
        assert_eq!(result.intent, Intent::IntegrationGuide);
        assert_eq!(result.source, ClassificationSource::Keyword);

        // builtin greeting keywords are gone
        let result = resolver.resolve("hello").await;
        assert_eq!(result.intent, Intent::Unknown);
    }

    #[tokio::test]
    async fn test_out_of_range_confidence_is_clamped() {
        let (handle, _) = ready(MockClassifier::new().with_default("LABEL_2", 1.7));
        let (resolver, _) = resolver_with(handle);

        let result = resolver.resolve("anything").await;
        assert_eq!(result.intent, Intent::PricingBasic);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_policy_order_is_swappable() {
        let neural = NeuralSignal {
            status: NeuralStatus::Ok,
            raw_label: Some("pricing_basic".to_string()),
            intent: Intent::PricingBasic,
            confidence: 0.9,
        };
        let keyword = KeywordMatch {
            intent: Intent::PricingEnterprise,
            score: 0.4,
            matched: vec!["enterprise".to_string()],
        };

        let (default_result, _) = FusionPolicy::new(0.6).fuse(&neural, &keyword);
        assert_eq!(default_result.intent, Intent::PricingBasic);

        let keyword_first = FusionPolicy::with_rules(
            0.6,
            vec![FusionRule::KeywordMatch, FusionRule::NeuralConfident],
        );
        let (result, rule) = keyword_first.fuse(&neural, &keyword);
        assert_eq!(rule, FusionRule::KeywordMatch);
        assert_eq!(result.intent, Intent::PricingEnterprise);
        assert_eq!(result.confidence, 0.9);

        // no rule fires: implicit unresolved
        let empty = FusionPolicy::with_rules(0.6, vec![]);
        let (result, rule) = empty.fuse(&neural, &KeywordMatch::none());
        assert_eq!(rule, FusionRule::Unresolved);
        assert_eq!(result.intent, Intent::Unknown);
    }
}
