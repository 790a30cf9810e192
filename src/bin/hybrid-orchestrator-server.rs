//! Hybrid orchestrator HTTP server binary

use anyhow::Context;
use clap::Parser;
use hybrid_orchestrator::server::run_server;
use hybrid_orchestrator::{
    Capabilities, Classifier, HttpClassifier, HttpQaModel, KnowledgeStore, LexicalQa, ModelHandle,
    Orchestrator, QaModel, Settings, StaticKnowledgeBase, StaticTemplates, TemplateStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "hybrid-orchestrator-server", version, about = "Hybrid intent and QA orchestrator")]
struct Args {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.server.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();

    println!("Hybrid Orchestrator");
    println!("   Version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    let capabilities = build_capabilities(&settings).await?;
    let orchestrator = Orchestrator::new(settings, capabilities);
    orchestrator.spawn_cache_sweeper();

    run_server(orchestrator.clone(), shutdown_signal()).await?;

    orchestrator.shutdown();
    Ok(())
}

async fn build_capabilities(settings: &Settings) -> anyhow::Result<Capabilities> {
    let timeout = settings.request_timeout();

    // Step 1: classifier service
    let classifier: ModelHandle<dyn Classifier> = match &settings.classifier_url {
        Some(url) => {
            let client = HttpClassifier::new(url.as_str(), timeout)?;
            match client.health().await {
                Ok(()) => {
                    info!("Classifier service is healthy: {}", url);
                    let client: Arc<dyn Classifier> = Arc::new(client);
                    ModelHandle::ready(client)
                }
                Err(e) => {
                    warn!("Classifier service unavailable ({}), using keyword matching only", e);
                    ModelHandle::unavailable(e.to_string())
                }
            }
        }
        None => {
            warn!("No classifier_url configured, using keyword matching only");
            ModelHandle::unavailable("classifier_url not configured")
        }
    };

    // Step 2: QA service, or local lexical extraction
    let qa_model: ModelHandle<dyn QaModel> = match &settings.qa_model_url {
        Some(url) => {
            let client = HttpQaModel::new(url.as_str(), timeout)?;
            match client.health().await {
                Ok(()) => {
                    info!("QA service is healthy: {}", url);
                    let client: Arc<dyn QaModel> = Arc::new(client);
                    ModelHandle::ready(client)
                }
                Err(e) => {
                    warn!("QA service unavailable ({}), knowledge answers will degrade", e);
                    ModelHandle::unavailable(e.to_string())
                }
            }
        }
        None => {
            info!("No qa_model_url configured, using local lexical QA");
            let local: Arc<dyn QaModel> = Arc::new(LexicalQa::new());
            ModelHandle::ready(local)
        }
    };

    // Step 3: static knowledge and templates
    let knowledge: Arc<dyn KnowledgeStore> = match &settings.knowledge_base_path {
        Some(path) => Arc::new(
            StaticKnowledgeBase::load(path)
                .with_context(|| format!("loading knowledge base from {}", path.display()))?,
        ),
        None => Arc::new(StaticKnowledgeBase::builtin()),
    };
    let templates: Arc<dyn TemplateStore> = match &settings.templates_path {
        Some(path) => Arc::new(
            StaticTemplates::load(path)
                .with_context(|| format!("loading templates from {}", path.display()))?,
        ),
        None => Arc::new(StaticTemplates::builtin()),
    };
    info!("Knowledge base: {} contexts", knowledge.len());

    Ok(Capabilities {
        classifier,
        qa_model,
        knowledge,
        templates,
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
