//! Provider abstraction: the request/response types and the single-attempt
//! transport trait both backends implement.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Chat role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a chat-style prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Unknown,
}

impl FinishReason {
    pub fn from_wire(s: Option<&str>) -> Self {
        match s {
            Some("stop") => Self::Stop,
            Some("length") => Self::Length,
            _ => Self::Unknown,
        }
    }
}

/// A completed response from one attempt.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: FinishReason,
}

impl CompletionResponse {
    pub fn total_tokens(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.output_tokens)
    }
}

/// Incremental text fragments from one attempt.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// A single-attempt transport to one backend.
///
/// Implementations never retry; `LlmClient` owns the retry policy.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short backend identifier used in errors and logs.
    fn name(&self) -> &str;

    fn model_name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest)
    -> Result<CompletionResponse, LlmError>;

    async fn complete_stream(&self, request: CompletionRequest) -> Result<TokenStream, LlmError>;

    /// Check the backend is reachable and serves the configured model.
    async fn probe(&self) -> Result<(), LlmError> {
        Ok(())
    }
}

/// Rough token count for backends that report none: 1.3 tokens per word.
pub fn estimate_tokens(text: &str) -> u32 {
    let words = text.split_whitespace().count() as u64;
    u32::try_from((words * 13).div_ceil(10)).unwrap_or(u32::MAX)
}

/// Turn a non-success HTTP response into the matching `LlmError`.
pub(crate) async fn check_status(
    provider: &str,
    model: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(std::time::Duration::from_secs);

    match status {
        reqwest::StatusCode::TOO_MANY_REQUESTS => Err(LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        }),
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
            Err(LlmError::AuthFailed {
                provider: provider.to_string(),
            })
        }
        reqwest::StatusCode::NOT_FOUND => Err(LlmError::ModelNotAvailable {
            provider: provider.to_string(),
            model: model.to_string(),
        }),
        reqwest::StatusCode::REQUEST_TIMEOUT | reqwest::StatusCode::GATEWAY_TIMEOUT => {
            Err(LlmError::Timeout {
                provider: provider.to_string(),
            })
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(LlmError::Http {
                provider: provider.to_string(),
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Split a byte stream into text lines, yielding each complete line without
/// its terminator. A trailing partial line is yielded at end of input.
pub(crate) fn lines<S, B>(
    provider: String,
    bytes: S,
) -> impl Stream<Item = Result<String, LlmError>> + Send
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send,
{
    struct State<S> {
        bytes: S,
        buf: Vec<u8>,
        done: bool,
        provider: String,
    }

    futures::stream::unfold(
        State {
            bytes,
            buf: Vec::new(),
            done: false,
            provider,
        },
        |mut st| async move {
            use futures::StreamExt;
            loop {
                if let Some(pos) = st.buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = st.buf.drain(..=pos).collect();
                    let text = String::from_utf8_lossy(&line)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    return Some((Ok(text), st));
                }
                if st.done {
                    if st.buf.is_empty() {
                        return None;
                    }
                    let rest = std::mem::take(&mut st.buf);
                    let text = String::from_utf8_lossy(&rest).trim_end().to_string();
                    return Some((Ok(text), st));
                }
                match st.bytes.next().await {
                    Some(Ok(chunk)) => st.buf.extend_from_slice(chunk.as_ref()),
                    Some(Err(e)) => {
                        st.done = true;
                        st.buf.clear();
                        let err = LlmError::from_reqwest(&st.provider, e);
                        return Some((Err(err), st));
                    }
                    None => st.done = true,
                }
            }
        },
    )
}
