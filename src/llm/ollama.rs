//! Local backend: an Ollama server.
//!
//! Ollama's `/api/generate` takes a single prompt string, so chat messages
//! are flattened into `System:`/`User:`/`Assistant:` blocks ending with an
//! open `Assistant: ` turn.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
    TokenStream, check_status, estimate_tokens, lines,
};

const PROVIDER: &str = "ollama";

/// The availability probe uses its own short timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

impl OllamaProvider {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    async fn post(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<(reqwest::Response, String), LlmError> {
        let prompt = flatten_messages(&request.messages);
        let body = GenerateBody {
            model: &self.model,
            prompt: prompt.clone(),
            stream,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(PROVIDER, e))?;

        let response = check_status(PROVIDER, &self.model, response).await?;
        Ok((response, prompt))
    }
}

/// Flatten chat messages into the single prompt `/api/generate` expects.
pub fn flatten_messages(messages: &[ChatMessage]) -> String {
    let mut parts: Vec<String> = messages
        .iter()
        .map(|m| {
            let label = match m.role {
                Role::System => "System",
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            format!("{label}: {}\n", m.content)
        })
        .collect();
    parts.push("Assistant: ".to_string());
    parts.join("\n")
}

fn parse_ndjson_line(line: &str) -> Option<Result<(String, bool), LlmError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str::<GenerateResponse>(line)
            .map(|chunk| (chunk.response, chunk.done))
            .map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: format!("bad stream chunk: {e}"),
            }),
    )
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        let (response, prompt) = self.post(&request, false).await?;
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::from_reqwest(PROVIDER, e))?;

        // Older servers omit the eval counters.
        let input_tokens = parsed
            .prompt_eval_count
            .unwrap_or_else(|| estimate_tokens(&prompt));
        let output_tokens = parsed
            .eval_count
            .unwrap_or_else(|| estimate_tokens(&parsed.response));

        debug!(model = %self.model, input_tokens, output_tokens, "Ollama completion");

        Ok(CompletionResponse {
            content: parsed.response.trim().to_string(),
            input_tokens,
            output_tokens,
            finish_reason: FinishReason::from_wire(parsed.done_reason.as_deref()),
        })
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<TokenStream, LlmError> {
        let (response, _) = self.post(&request, true).await?;
        let bytes = Box::pin(response.bytes_stream());

        // Stop after the first chunk flagged `done`, keeping its text.
        let tokens = lines(PROVIDER.to_string(), bytes)
            .filter_map(|line| {
                futures::future::ready(match line {
                    Ok(l) => parse_ndjson_line(&l),
                    Err(e) => Some(Err(e)),
                })
            })
            .scan(false, |finished, item| {
                if *finished {
                    return futures::future::ready(None);
                }
                let out = match item {
                    Ok((text, done)) => {
                        *finished = done;
                        Ok(text)
                    }
                    Err(e) => Err(e),
                };
                futures::future::ready(Some(out))
            })
            .filter(|item| futures::future::ready(!matches!(item, Ok(t) if t.is_empty())));

        Ok(Box::pin(tokens))
    }

    async fn probe(&self) -> Result<(), LlmError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(PROVIDER, e))?;
        let response = check_status(PROVIDER, &self.model, response).await?;
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| LlmError::from_reqwest(PROVIDER, e))?;

        if tags.models.iter().any(|m| m.name.contains(&self.model)) {
            Ok(())
        } else {
            let available: Vec<&str> = tags.models.iter().map(|m| m.name.as_str()).collect();
            warn!(model = %self.model, ?available, "Configured model not pulled on Ollama server");
            Err(LlmError::ModelNotAvailable {
                provider: PROVIDER.to_string(),
                model: self.model.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_ends_with_open_assistant_turn() {
        let prompt = flatten_messages(&[
            ChatMessage::system("Be brief."),
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello"),
            ChatMessage::user("Bye"),
        ]);
        assert_eq!(
            prompt,
            "System: Be brief.\n\nUser: Hi\n\nAssistant: Hello\n\nUser: Bye\n\nAssistant: "
        );
    }

    #[test]
    fn ndjson_line_parses_text_and_done() {
        let (text, done) = parse_ndjson_line(r#"{"response":"Hi","done":false}"#)
            .unwrap()
            .unwrap();
        assert_eq!(text, "Hi");
        assert!(!done);

        let (_, done) = parse_ndjson_line(r#"{"response":"","done":true,"eval_count":3}"#)
            .unwrap()
            .unwrap();
        assert!(done);
        assert!(parse_ndjson_line("   ").is_none());
        assert!(parse_ndjson_line("{not json").unwrap().is_err());
    }
}
