//! Remote backend: any OpenAI-compatible chat completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, TokenStream,
    check_status, lines,
};

const PROVIDER: &str = "openai";

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
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
            api_key,
            model: model.to_string(),
        })
    }

    async fn post(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let body = ChatCompletionBody {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(PROVIDER, e))?;

        check_status(PROVIDER, &self.model, response).await
    }
}

/// Parse one SSE line. `None` means the line carries no text.
fn parse_sse_line(line: &str) -> Option<Result<String, LlmError>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<ChatCompletionChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|s| !s.is_empty())
            .map(Ok),
        Err(e) => Some(Err(LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: format!("bad stream chunk: {e}"),
        })),
    }
}

fn is_done(line: &str) -> bool {
    line.strip_prefix("data:")
        .map(|d| d.trim() == "[DONE]")
        .unwrap_or(false)
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
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
        let response = self.post(&request, false).await?;
        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::from_reqwest(PROVIDER, e))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "empty choices".to_string(),
            })?;

        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        debug!(model = %self.model, input_tokens, output_tokens, "OpenAI completion");

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            input_tokens,
            output_tokens,
            finish_reason: FinishReason::from_wire(choice.finish_reason.as_deref()),
        })
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<TokenStream, LlmError> {
        let response = self.post(&request, true).await?;
        let bytes = Box::pin(response.bytes_stream());

        let tokens = lines(PROVIDER.to_string(), bytes)
            .take_while(|line| {
                let done = matches!(line, Ok(l) if is_done(l));
                futures::future::ready(!done)
            })
            .filter_map(|line| {
                futures::future::ready(match line {
                    Ok(l) => parse_sse_line(&l),
                    Err(e) => Some(Err(e)),
                })
            });

        Ok(Box::pin(tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_line_yields_delta_content() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_sse_line(line).unwrap().unwrap(), "Hel");
    }

    #[test]
    fn sse_line_skips_role_only_delta_and_comments() {
        assert!(parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).is_none());
        assert!(parse_sse_line(": keep-alive").is_none());
        assert!(parse_sse_line("").is_none());
    }

    #[test]
    fn done_marker_detected() {
        assert!(is_done("data: [DONE]"));
        assert!(!is_done(r#"data: {"choices":[]}"#));
    }

    #[test]
    fn body_omits_stream_flag_when_false() {
        let messages = vec![ChatMessage::user("hi")];
        let body = ChatCompletionBody {
            model: "gpt-4o",
            messages: &messages,
            temperature: Some(0.3),
            max_tokens: Some(50),
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("stream").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 50);
    }
}
