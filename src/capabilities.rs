//! Capability interfaces consumed by the orchestrator, plus mock implementations

use crate::types::{Intent, KnowledgeContext};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Raw classifier output before mapping into the vocabulary
#[derive(Debug, Clone, PartialEq)]
pub struct NeuralPrediction {
    pub label: String,
    pub confidence: f32,
}

/// Raw extractive-QA output
#[derive(Debug, Clone, PartialEq)]
pub struct SpanPrediction {
    pub span: String,
    pub confidence: f32,
}

/// Learned text classifier
#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(&self, text: &str) -> Result<NeuralPrediction>;
}

/// Extractive question answering over a single context
#[async_trait]
pub trait QaModel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn answer(&self, question: &str, context: &str) -> Result<SpanPrediction>;
}

/// Static intent -> context mapping authored offline
pub trait KnowledgeStore: Send + Sync {
    fn lookup(&self, intent: Intent) -> Option<KnowledgeContext>;

    /// Other contexts in the same category as `intent`, in vocabulary order.
    fn related(&self, intent: Intent, limit: usize) -> Vec<KnowledgeContext>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Conversational response templates per intent
pub trait TemplateStore: Send + Sync {
    fn templates_for(&self, intent: Intent) -> &[String];
}

/// Model availability, decided once at startup.
pub enum ModelHandle<T: ?Sized> {
    Ready(Arc<T>),
    Unavailable { reason: String },
}

impl<T: ?Sized> ModelHandle<T> {
    pub fn ready(model: Arc<T>) -> Self {
        ModelHandle::Ready(model)
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        ModelHandle::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn get(&self) -> Option<&Arc<T>> {
        match self {
            ModelHandle::Ready(model) => Some(model),
            ModelHandle::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, ModelHandle::Ready(_))
    }
}

impl<T: ?Sized> Clone for ModelHandle<T> {
    fn clone(&self) -> Self {
        match self {
            ModelHandle::Ready(model) => ModelHandle::Ready(Arc::clone(model)),
            ModelHandle::Unavailable { reason } => ModelHandle::Unavailable {
                reason: reason.clone(),
            },
        }
    }
}

/// Mock classifier for testing: fixed predictions per canonical text
pub struct MockClassifier {
    predictions: HashMap<String, NeuralPrediction>,
    default: NeuralPrediction,
    delay: Option<Duration>,
    failing: bool,
    calls: AtomicUsize,
}

impl MockClassifier {
    pub fn new() -> Self {
        Self {
            predictions: HashMap::new(),
            default: NeuralPrediction {
                label: "unknown".to_string(),
                confidence: 0.1,
            },
            delay: None,
            failing: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every call returns an error
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    pub fn with_prediction(mut self, text: &str, label: &str, confidence: f32) -> Self {
        self.predictions.insert(
            crate::cache::canonicalize(text),
            NeuralPrediction {
                label: label.to_string(),
                confidence,
            },
        );
        self
    }

    pub fn with_default(mut self, label: &str, confidence: f32) -> Self {
        self.default = NeuralPrediction {
            label: label.to_string(),
            confidence,
        };
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    fn name(&self) -> &'static str {
        "mock_classifier"
    }

    async fn classify(&self, text: &str) -> Result<NeuralPrediction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            anyhow::bail!("mock classifier failure");
        }
        Ok(self
            .predictions
            .get(&crate::cache::canonicalize(text))
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }
}

/// Mock QA model for testing: answers keyed by a marker contained in the context
pub struct MockQaModel {
    answers: Vec<(String, SpanPrediction)>,
    default: SpanPrediction,
    delay: Option<Duration>,
    failing: bool,
    calls: AtomicUsize,
}

impl MockQaModel {
    pub fn new() -> Self {
        Self {
            answers: Vec::new(),
            default: SpanPrediction {
                span: String::new(),
                confidence: 0.0,
            },
            delay: None,
            failing: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    /// Answer with `span` whenever the context contains `marker`
    pub fn with_answer(mut self, marker: &str, span: &str, confidence: f32) -> Self {
        self.answers.push((
            marker.to_string(),
            SpanPrediction {
                span: span.to_string(),
                confidence,
            },
        ));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockQaModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QaModel for MockQaModel {
    fn name(&self) -> &'static str {
        "mock_qa"
    }

    async fn answer(&self, _question: &str, context: &str) -> Result<SpanPrediction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            anyhow::bail!("mock QA failure");
        }
        Ok(self
            .answers
            .iter()
            .find(|(marker, _)| context.contains(marker.as_str()))
            .map(|(_, prediction)| prediction.clone())
            .unwrap_or_else(|| self.default.clone()))
    }
}
