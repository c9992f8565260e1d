//! LLM integration for Inbox Assist.
//!
//! Supports:
//! - **OpenAI**: any OpenAI-compatible chat completions endpoint
//! - **Ollama**: a local Ollama server
//!
//! Both speak HTTP through reqwest and implement `LlmProvider`. `LlmClient`
//! adds retries and usage accounting, and `Orchestrator` exposes the
//! email operations on top.

pub mod client;
pub mod interpret;
pub mod ollama;
pub mod openai;
pub mod orchestrator;
pub mod provider;
pub mod retry;

pub use client::{LlmClient, TextStream};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use orchestrator::Orchestrator;
pub use provider::*;
pub use retry::{FailureKind, RetryPolicy};

use std::sync::Arc;

use secrecy::SecretString;

use crate::config::AppConfig;
use crate::error::{ConfigError, LlmError};

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAi,
    Ollama,
}

impl std::fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for LlmBackend {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".to_string(),
                message: format!("unknown backend {other:?}, expected \"openai\" or \"ollama\""),
            }),
        }
    }
}

/// Create the provider selected by configuration.
pub fn create_provider(config: &AppConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::OpenAi => {
            let api_key = config
                .openai_api_key
                .clone()
                .unwrap_or_else(|| SecretString::from(String::new()));
            let provider = OpenAiProvider::new(
                &config.openai_base_url,
                api_key,
                &config.openai_model,
                config.timeout,
            )?;
            tracing::info!("Using OpenAI (model: {})", config.openai_model);
            Ok(Arc::new(provider))
        }
        LlmBackend::Ollama => {
            let provider =
                OllamaProvider::new(&config.ollama_base_url, &config.ollama_model, config.timeout)?;
            tracing::info!(
                "Using Ollama at {} (model: {})",
                config.ollama_base_url,
                config.ollama_model
            );
            Ok(Arc::new(provider))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<LlmBackend>().unwrap(), LlmBackend::OpenAi);
        assert_eq!("ollama".parse::<LlmBackend>().unwrap(), LlmBackend::Ollama);
        assert!("anthropic".parse::<LlmBackend>().is_err());
    }

    #[test]
    fn test_create_openai_provider() {
        let config = AppConfig {
            backend: LlmBackend::OpenAi,
            openai_api_key: Some(SecretString::from("sk-test")),
            openai_model: "gpt-4o".to_string(),
            ..AppConfig::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "gpt-4o");
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn test_create_ollama_provider() {
        let provider = create_provider(&AppConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "llama3.2");
        assert_eq!(provider.name(), "ollama");
    }
}
