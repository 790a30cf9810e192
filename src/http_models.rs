//! HTTP-backed capabilities calling external inference services

use crate::capabilities::{Classifier, NeuralPrediction, QaModel, SpanPrediction};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyReply {
    label: String,
    confidence: f32,
}

#[derive(Debug, Serialize)]
struct AnswerRequest<'a> {
    question: &'a str,
    context: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnswerReply {
    answer: String,
    score: f32,
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

async fn post_json<Req, Reply>(client: &reqwest::Client, url: &str, body: &Req) -> Result<Reply>
where
    Req: Serialize + ?Sized,
    Reply: for<'de> Deserialize<'de>,
{
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .with_context(|| format!("Failed to call {}", url))?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        anyhow::bail!("Inference service error ({}): {}", status, error_text);
    }

    response
        .json()
        .await
        .with_context(|| format!("Failed to parse response from {}", url))
}

async fn probe(client: &reqwest::Client, base_url: &str) -> Result<()> {
    let url = format!("{}/health", base_url);
    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Health probe to {} failed", url))?;
    if !response.status().is_success() {
        anyhow::bail!("Health probe to {} returned {}", url, response.status());
    }
    Ok(())
}

/// Classifier served over HTTP: `POST {url}/classify {text}` -> `{label, confidence}`
pub struct HttpClassifier {
    service_url: String,
    client: reqwest::Client,
}

impl HttpClassifier {
    pub fn new(service_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            service_url: service_url.into().trim_end_matches('/').to_string(),
            client: build_client(timeout)?,
        })
    }

    pub async fn health(&self) -> Result<()> {
        probe(&self.client, &self.service_url).await
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    fn name(&self) -> &'static str {
        "http_classifier"
    }

    async fn classify(&self, text: &str) -> Result<NeuralPrediction> {
        let url = format!("{}/classify", self.service_url);
        let reply: ClassifyReply = post_json(&self.client, &url, &ClassifyRequest { text }).await?;

        tracing::debug!("Classifier replied {} ({:.3})", reply.label, reply.confidence);

        Ok(NeuralPrediction {
            label: reply.label,
            confidence: reply.confidence,
        })
    }
}

/// Extractive QA served over HTTP: `POST {url}/answer {question, context}` -> `{answer, score}`
pub struct HttpQaModel {
    service_url: String,
    client: reqwest::Client,
}

impl HttpQaModel {
    pub fn new(service_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            service_url: service_url.into().trim_end_matches('/').to_string(),
            client: build_client(timeout)?,
        })
    }

    pub async fn health(&self) -> Result<()> {
        probe(&self.client, &self.service_url).await
    }
}

#[async_trait]
impl QaModel for HttpQaModel {
    fn name(&self) -> &'static str {
        "http_qa"
    }

    async fn answer(&self, question: &str, context: &str) -> Result<SpanPrediction> {
        let url = format!("{}/answer", self.service_url);
        let reply: AnswerReply =
            post_json(&self.client, &url, &AnswerRequest { question, context }).await?;

        Ok(SpanPrediction {
            span: reply.answer,
            confidence: reply.score,
        })
    }
}
