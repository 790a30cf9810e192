//! HTTP transport: request validation, routing and JSON shapes

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::ValidationError;
use crate::metrics::MetricsSnapshot;
use crate::orchestrator::{HealthInfo, SharedOrchestrator};
use crate::types::{
    BatchClassifyResponse, ClassifyResponse, Intent, KnowledgeCategory, ResponseRecord, Utterance,
};

#[derive(Debug, Deserialize)]
pub struct ClassifyRequestHttp {
    pub text: String,
    #[serde(default)]
    pub include_debug: bool,
}

#[derive(Debug, Deserialize)]
pub struct BatchClassifyRequestHttp {
    pub texts: Vec<String>,
    #[serde(default)]
    pub include_debug: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequestHttp {
    pub message: String,
    pub user_id: Option<String>,
    #[serde(default)]
    pub include_debug: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub service: String,
    #[serde(flatten)]
    pub health: HealthInfo,
}

#[derive(Debug, Serialize)]
pub struct IntentInfo {
    pub intent: Intent,
    pub mode_family: &'static str,
    pub category: Option<KnowledgeCategory>,
    pub description: &'static str,
}

#[derive(Debug, Serialize)]
pub struct IntentsResponse {
    pub intents: Vec<IntentInfo>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct ClearCacheResponse {
    pub status: &'static str,
    pub cleared_at: DateTime<Utc>,
}

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Invalid request".to_string(),
                details: Some(self.to_string()),
            }),
        )
            .into_response()
    }
}

pub fn validate_text(text: &str, max_chars: usize) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyText);
    }
    let len = text.chars().count();
    if len > max_chars {
        return Err(ValidationError::TextTooLong { len, max: max_chars });
    }
    Ok(())
}

pub fn validate_batch(texts: &[String], max_batch: usize, max_chars: usize) -> Result<(), ValidationError> {
    if texts.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    if texts.len() > max_batch {
        return Err(ValidationError::BatchTooLarge {
            len: texts.len(),
            max: max_batch,
        });
    }
    for (index, text) in texts.iter().enumerate() {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyBatchItem { index });
        }
        let len = text.chars().count();
        if len > max_chars {
            return Err(ValidationError::BatchItemTooLong {
                index,
                len,
                max: max_chars,
            });
        }
    }
    Ok(())
}

async fn classify_handler(
    State(orchestrator): State<SharedOrchestrator>,
    Json(req): Json<ClassifyRequestHttp>,
) -> Result<Json<ClassifyResponse>, ValidationError> {
    validate_text(&req.text, orchestrator.settings().max_input_chars)?;
    Ok(Json(orchestrator.classify(&req.text, req.include_debug).await))
}

async fn batch_classify_handler(
    State(orchestrator): State<SharedOrchestrator>,
    Json(req): Json<BatchClassifyRequestHttp>,
) -> Result<Json<BatchClassifyResponse>, ValidationError> {
    let settings = orchestrator.settings();
    validate_batch(&req.texts, settings.max_batch_size, settings.max_input_chars)?;
    Ok(Json(
        orchestrator
            .classify_batch(&req.texts, req.include_debug)
            .await,
    ))
}

async fn chat_handler(
    State(orchestrator): State<SharedOrchestrator>,
    Json(req): Json<ChatRequestHttp>,
) -> Result<Json<ResponseRecord>, ValidationError> {
    validate_text(&req.message, orchestrator.settings().max_input_chars)?;
    let utterance = Utterance::new(req.message, req.user_id);
    Ok(Json(orchestrator.chat(utterance, req.include_debug).await))
}

async fn health_handler(State(orchestrator): State<SharedOrchestrator>) -> Json<HealthResponse> {
    Json(HealthResponse {
        service: env!("CARGO_PKG_NAME").to_string(),
        health: orchestrator.health(),
    })
}

async fn intents_handler() -> Json<IntentsResponse> {
    let intents: Vec<IntentInfo> = Intent::ALL
        .iter()
        .map(|intent| IntentInfo {
            intent: *intent,
            mode_family: if intent.is_knowledge() {
                "knowledge"
            } else if intent.is_conversational() {
                "conversational"
            } else {
                "fallback"
            },
            category: intent.knowledge_category(),
            description: intent.description(),
        })
        .collect();
    Json(IntentsResponse {
        total: intents.len(),
        intents,
    })
}

async fn stats_handler(State(orchestrator): State<SharedOrchestrator>) -> Json<MetricsSnapshot> {
    Json(orchestrator.stats())
}

async fn clear_cache_handler(State(orchestrator): State<SharedOrchestrator>) -> Json<ClearCacheResponse> {
    orchestrator.clear_caches();
    Json(ClearCacheResponse {
        status: "cleared",
        cleared_at: Utc::now(),
    })
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = err
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| err.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());
    error!("Request handler panicked: {}", details);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "Internal server error".to_string(),
            details: None,
        }),
    )
        .into_response()
}

/// Create and configure the HTTP router
pub fn create_router(orchestrator: SharedOrchestrator) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/intents", get(intents_handler))
        .route("/classify", post(classify_handler))
        .route("/batch-classify", post(batch_classify_handler))
        .route("/chat", post(chat_handler))
        .route("/stats", get(stats_handler))
        .route("/cache/clear", post(clear_cache_handler))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

/// Run the HTTP server until `shutdown` resolves
pub async fn run_server<F>(orchestrator: SharedOrchestrator, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!(
        "{}:{}",
        orchestrator.settings().server.host,
        orchestrator.settings().server.port
    );
    info!("Starting orchestrator server on {}", addr);

    let app = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
