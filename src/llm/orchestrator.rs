//! The provider-independent email operations.
//!
//! One `Orchestrator` wraps one `LlmClient`. The backend is chosen once in
//! `connect` and never branched on again.

use tracing::{info, warn};

use crate::config::{AppConfig, SamplingConfig};
use crate::error::{CompletionFailure, ConfigError};
use crate::llm::client::{LlmClient, TextStream};
use crate::llm::interpret::{extract_category, extract_tasks};
use crate::llm::provider::{ChatMessage, CompletionRequest};
use crate::llm::retry::RetryPolicy;
use crate::llm::{LlmBackend, create_provider};
use crate::mail::model::{Category, ConversationMessage, PromptTemplate, Speaker, TaskItem};
use crate::prompts::{ANSWER_SYSTEM, CATEGORIZE_SYSTEM, EXTRACT_SYSTEM, REPLY_SYSTEM};

const CATEGORIZE_MAX_TOKENS: u32 = 50;
const EXTRACT_MAX_TOKENS: u32 = 500;
const DRAFT_MAX_TOKENS: u32 = 800;
const ANSWER_MAX_TOKENS: u32 = 1000;

const DEFAULT_MAX_HISTORY: usize = 5;

pub struct Orchestrator {
    client: LlmClient,
    backend: LlmBackend,
    sampling: SamplingConfig,
    max_history: usize,
}

impl Orchestrator {
    /// Build the configured backend. For the local backend a one-time
    /// availability probe runs; failure is only logged.
    pub async fn connect(config: &AppConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let provider = create_provider(config).map_err(|e| ConfigError::InvalidValue {
            key: "LLM_PROVIDER".to_string(),
            message: e.to_string(),
        })?;
        let client = LlmClient::new(
            provider,
            RetryPolicy::new(config.max_retries, config.retry_backoff),
        );

        if config.backend == LlmBackend::Ollama {
            match client.probe().await {
                Ok(()) => info!(model = client.model_name(), "Ollama is ready"),
                Err(e) => warn!(
                    error = %e,
                    url = %config.ollama_base_url,
                    "Ollama probe failed; start it with `ollama serve` and `ollama pull {}`",
                    config.ollama_model
                ),
            }
        }

        Ok(Self::new(client, config.backend, config.sampling).with_max_history(config.max_history))
    }

    pub fn new(client: LlmClient, backend: LlmBackend, sampling: SamplingConfig) -> Self {
        Self {
            client,
            backend,
            sampling,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn backend(&self) -> LlmBackend {
        self.backend
    }

    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    /// Tokens used by every call so far.
    pub fn token_usage(&self) -> u64 {
        self.client.token_usage()
    }

    /// Classify an email.
    pub async fn categorize(
        &self,
        email_text: &str,
        template: &PromptTemplate,
    ) -> Result<Category, CompletionFailure> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(CATEGORIZE_SYSTEM),
            ChatMessage::user(template.render(email_text)),
        ])
        .with_temperature(self.sampling.categorization)
        .with_max_tokens(CATEGORIZE_MAX_TOKENS);

        let raw = self.client.complete(&request).await?;
        extract_category(&raw)
            .ok_or_else(|| CompletionFailure::Failed("model returned no category".to_string()))
    }

    /// Extract tasks. Any failure degrades to an empty list.
    pub async fn extract_tasks(
        &self,
        email_text: &str,
        template: &PromptTemplate,
    ) -> Vec<TaskItem> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(EXTRACT_SYSTEM),
            ChatMessage::user(template.render(email_text)),
        ])
        .with_temperature(self.sampling.extraction)
        .with_max_tokens(EXTRACT_MAX_TOKENS);

        match self.client.complete(&request).await {
            Ok(raw) => extract_tasks(&raw),
            Err(e) => {
                warn!(error = %e, "Task extraction call failed, treating as no tasks");
                Vec::new()
            }
        }
    }

    /// Draft a reply. The text is returned as the model wrote it.
    pub async fn draft_reply(
        &self,
        email_text: &str,
        context: Option<&str>,
        template: &PromptTemplate,
        instruction: Option<&str>,
    ) -> Result<String, CompletionFailure> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(REPLY_SYSTEM),
            ChatMessage::user(build_draft_prompt(email_text, context, template, instruction)),
        ])
        .with_temperature(self.sampling.drafting)
        .with_max_tokens(DRAFT_MAX_TOKENS);

        self.client.complete(&request).await
    }

    /// Answer a free-text query with optional context and recent history.
    pub async fn answer(
        &self,
        query: &str,
        item_context: Option<&str>,
        extra_context: Option<&str>,
        history: &[ConversationMessage],
    ) -> Result<String, CompletionFailure> {
        let request = self.answer_request(query, item_context, extra_context, history);
        self.client.complete(&request).await
    }

    /// Streaming variant of [`answer`](Self::answer).
    pub async fn stream_answer(
        &self,
        query: &str,
        item_context: Option<&str>,
        extra_context: Option<&str>,
        history: &[ConversationMessage],
    ) -> Result<TextStream, CompletionFailure> {
        let request = self.answer_request(query, item_context, extra_context, history);
        self.client.stream(&request).await
    }

    fn answer_request(
        &self,
        query: &str,
        item_context: Option<&str>,
        extra_context: Option<&str>,
        history: &[ConversationMessage],
    ) -> CompletionRequest {
        let mut messages = vec![ChatMessage::system(ANSWER_SYSTEM)];

        let window = history.len().saturating_sub(self.max_history);
        messages.extend(history[window..].iter().map(|m| match m.speaker {
            Speaker::User => ChatMessage::user(m.content.clone()),
            Speaker::Assistant => ChatMessage::assistant(m.content.clone()),
        }));

        messages.push(ChatMessage::user(build_query_prompt(
            query,
            item_context,
            extra_context,
        )));

        CompletionRequest::new(messages)
            .with_temperature(self.sampling.answering)
            .with_max_tokens(ANSWER_MAX_TOKENS)
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn build_draft_prompt(
    email_text: &str,
    context: Option<&str>,
    template: &PromptTemplate,
    instruction: Option<&str>,
) -> String {
    let mut prompt = String::new();
    if let Some(context) = non_blank(context) {
        prompt.push_str(&format!("Context:\n{context}\n\n"));
    }
    prompt.push_str(&template.render(email_text));
    if let Some(instruction) = non_blank(instruction) {
        prompt.push_str(&format!("\n\nAdditional Instructions: {instruction}"));
    }
    prompt
}

fn build_query_prompt(
    query: &str,
    item_context: Option<&str>,
    extra_context: Option<&str>,
) -> String {
    let mut prompt = match non_blank(item_context) {
        Some(context) => format!("Email Context:\n{context}\n\nUser Query: {query}"),
        None => query.to_string(),
    };
    if let Some(extra) = non_blank(extra_context) {
        prompt.push_str(&format!("\n\nPrompt Configuration: {extra}"));
    }
    prompt
}
