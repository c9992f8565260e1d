//! Configuration types.
//!
//! Everything is read from environment variables once at startup.
//! `AppConfig::from_lookup` takes any key lookup so tests don't touch the
//! process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;
use crate::llm::LlmBackend;

/// Sampling temperatures per operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingConfig {
    pub categorization: f32,
    pub extraction: f32,
    pub drafting: f32,
    pub answering: f32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            categorization: 0.3,
            extraction: 0.5,
            drafting: 0.8,
            answering: 0.7,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Which backend serves every completion for the lifetime of the process.
    pub backend: LlmBackend,
    pub openai_api_key: Option<SecretString>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub ollama_base_url: String,
    pub ollama_model: String,
    /// Total attempts per completion, first attempt included.
    pub max_retries: u32,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Base unit for retry backoff.
    pub retry_backoff: Duration,
    pub database_path: PathBuf,
    pub sampling: SamplingConfig,
    /// Conversation turns forwarded with each query.
    pub max_history: usize,
    /// Items scanned when building inbox-wide context.
    pub inbox_scan_limit: usize,
    /// Optional JSON file loaded into the inbox at startup.
    pub inbox_seed_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Ollama,
            openai_api_key: None,
            openai_model: "gpt-3.5-turbo".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.2".to_string(),
            max_retries: 3,
            timeout: Duration::from_secs(60),
            retry_backoff: Duration::from_secs(1),
            database_path: PathBuf::from("data/email_agent.db"),
            sampling: SamplingConfig::default(),
            max_history: 5,
            inbox_scan_limit: 100,
            inbox_seed_path: None,
        }
    }
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match get("LLM_PROVIDER") {
            Some(v) => LlmBackend::from_str(v.trim())?,
            None => defaults.backend,
        };

        let config = Self {
            backend,
            openai_api_key: get("OPENAI_API_KEY").map(SecretString::from),
            openai_model: get("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            ollama_base_url: get("OLLAMA_BASE_URL").unwrap_or(defaults.ollama_base_url),
            ollama_model: get("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            max_retries: parse_or(&get, "MAX_RETRIES", defaults.max_retries)?,
            timeout: Duration::from_secs(parse_or(&get, "TIMEOUT_SECONDS", 60u64)?),
            retry_backoff: Duration::from_millis(parse_or(&get, "RETRY_BACKOFF_MS", 1000u64)?),
            database_path: get("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            sampling: SamplingConfig {
                categorization: parse_or(
                    &get,
                    "CATEGORIZATION_TEMPERATURE",
                    defaults.sampling.categorization,
                )?,
                extraction: parse_or(
                    &get,
                    "EXTRACTION_TEMPERATURE",
                    defaults.sampling.extraction,
                )?,
                drafting: parse_or(&get, "DRAFT_TEMPERATURE", defaults.sampling.drafting)?,
                answering: parse_or(&get, "AGENT_TEMPERATURE", defaults.sampling.answering)?,
            },
            max_history: parse_or(&get, "MAX_CONVERSATION_HISTORY", defaults.max_history)?,
            inbox_scan_limit: parse_or(&get, "INBOX_SCAN_LIMIT", defaults.inbox_scan_limit)?,
            inbox_seed_path: get("INBOX_SEED_PATH").map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the settings the selected backend depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_RETRIES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.backend == LlmBackend::OpenAi {
            let key = self
                .openai_api_key
                .as_ref()
                .ok_or_else(|| ConfigError::MissingRequired {
                    key: "OPENAI_API_KEY".to_string(),
                    hint: "Set OPENAI_API_KEY or use LLM_PROVIDER=ollama".to_string(),
                })?;
            if !key.expose_secret().starts_with("sk-") {
                return Err(ConfigError::InvalidValue {
                    key: "OPENAI_API_KEY".to_string(),
                    message: "expected a key starting with 'sk-'".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Model name of the selected backend.
    pub fn active_model(&self) -> &str {
        match self.backend {
            LlmBackend::OpenAi => &self.openai_model,
            LlmBackend::Ollama => &self.ollama_model,
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}
