//! Configuration for the orchestrator.
//!
//! Defaults, then an optional TOML file, then environment overrides.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// How a conversational template is picked from an intent's candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateSelection {
    /// Always the first candidate
    #[default]
    Fixed,
    /// Cycle through candidates per intent
    RoundRobin,
}

impl FromStr for TemplateSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Ok(TemplateSelection::Fixed),
            "round_robin" | "round-robin" => Ok(TemplateSelection::RoundRobin),
            other => Err(format!("unknown template selection: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// TTL for classifications and gate-passed QA answers
    pub ttl_secs: u64,
    /// Shorter TTL for answers that failed the QA gate
    pub qa_low_confidence_ttl_secs: u64,
    /// Per cache instance
    pub max_entries: usize,
    pub sweep_interval_secs: u64,
    pub lock_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            qa_low_confidence_ttl_secs: 60,
            max_entries: 1000,
            sweep_interval_secs: 60,
            lock_timeout_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub cache: CacheConfig,

    /// Classification gate
    pub confidence_threshold: f32,
    /// QA gate
    pub qa_confidence_threshold: f32,

    pub max_answer_chars: usize,
    pub max_context_chars: usize,
    pub max_input_chars: usize,
    pub max_batch_size: usize,
    pub batch_parallelism: usize,
    pub request_timeout_ms: u64,
    pub related_context_limit: usize,
    pub template_selection: TemplateSelection,

    pub classifier_url: Option<String>,
    pub qa_model_url: Option<String>,
    pub knowledge_base_path: Option<PathBuf>,
    pub templates_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            confidence_threshold: 0.6,
            qa_confidence_threshold: 0.3,
            max_answer_chars: 200,
            max_context_chars: 412,
            max_input_chars: 512,
            max_batch_size: 20,
            batch_parallelism: 4,
            request_timeout_ms: 2000,
            related_context_limit: 3,
            template_selection: TemplateSelection::Fixed,
            classifier_url: None,
            qa_model_url: None,
            knowledge_base_path: None,
            templates_path: None,
        }
    }
}

impl Settings {
    /// Load settings: defaults, optional TOML file, process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => {
                info!("Loading config from {}", path.display());
                Self::from_toml_str(&fs::read_to_string(path)?)?
            }
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "CONFIDENCE_THRESHOLD")? {
            self.confidence_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "QA_CONFIDENCE_THRESHOLD")? {
            self.qa_confidence_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "CACHE_TTL_SECONDS")? {
            self.cache.ttl_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "QA_LOW_CONFIDENCE_TTL_SECONDS")? {
            self.cache.qa_low_confidence_ttl_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "CACHE_MAX_SIZE")? {
            self.cache.max_entries = v;
        }
        if let Some(v) = parse_var(&lookup, "CACHE_ENABLED")? {
            self.cache.enabled = v;
        }
        if let Some(v) = parse_var(&lookup, "CACHE_SWEEP_INTERVAL_SECONDS")? {
            self.cache.sweep_interval_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "CACHE_LOCK_TIMEOUT_MS")? {
            self.cache.lock_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "MAX_ANSWER_LENGTH")? {
            self.max_answer_chars = v;
        }
        if let Some(v) = parse_var(&lookup, "MAX_CONTEXT_LENGTH")? {
            self.max_context_chars = v;
        }
        if let Some(v) = parse_var(&lookup, "MAX_INPUT_LENGTH")? {
            self.max_input_chars = v;
        }
        if let Some(v) = parse_var(&lookup, "MAX_BATCH_SIZE")? {
            self.max_batch_size = v;
        }
        if let Some(v) = parse_var(&lookup, "BATCH_PARALLELISM")? {
            self.batch_parallelism = v;
        }
        if let Some(v) = parse_var(&lookup, "REQUEST_TIMEOUT_MS")? {
            self.request_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "RELATED_CONTEXT_LIMIT")? {
            self.related_context_limit = v;
        }
        if let Some(v) = parse_var(&lookup, "TEMPLATE_SELECTION")? {
            self.template_selection = v;
        }
        if let Some(v) = parse_var(&lookup, "PORT")? {
            self.server.port = v;
        }
        if let Some(v) = lookup("HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.server.log_level = v;
        }
        if let Some(v) = lookup("CLASSIFIER_URL") {
            self.classifier_url = Some(v);
        }
        if let Some(v) = lookup("QA_MODEL_URL") {
            self.qa_model_url = Some(v);
        }
        if let Some(v) = lookup("KNOWLEDGE_BASE_PATH") {
            self.knowledge_base_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("RESPONSE_TEMPLATES_PATH") {
            self.templates_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("confidence_threshold", self.confidence_threshold)?;
        check_unit("qa_confidence_threshold", self.qa_confidence_threshold)?;
        check_positive("cache.max_entries", self.cache.max_entries)?;
        check_positive("max_answer_chars", self.max_answer_chars)?;
        check_positive("max_context_chars", self.max_context_chars)?;
        check_positive("max_input_chars", self.max_input_chars)?;
        check_positive("max_batch_size", self.max_batch_size)?;
        check_positive("batch_parallelism", self.batch_parallelism)?;
        check_positive("request_timeout_ms", self.request_timeout_ms as usize)?;
        if self.cache.sweep_interval_secs == 0 {
            return Err(ConfigError::OutOfRange {
                key: "cache.sweep_interval_secs",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn qa_low_confidence_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.qa_low_confidence_ttl_secs)
    }

    pub fn cache_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.cache.lock_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache.sweep_interval_secs)
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

fn check_unit(key: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            key,
            value: value.to_string(),
        })
    }
}

fn check_positive(key: &'static str, value: usize) -> Result<(), ConfigError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            key,
            value: value.to_string(),
        })
    }
}
