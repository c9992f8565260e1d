//! Provider client: one backend behind the retry policy and usage counter.
//!
//! `LlmClient` is the boundary where transport failures stop. Callers get
//! either text or a `CompletionFailure`, never an `LlmError`.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use tracing::{debug, error, warn};

use crate::error::{CompletionFailure, LlmError};
use crate::llm::provider::{
    CompletionRequest, FinishReason, LlmProvider, TokenStream, estimate_tokens,
};
use crate::llm::retry::{FailureKind, RetryDecision, RetryPolicy};

pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
    usage: Arc<AtomicU64>,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        Self {
            provider,
            policy,
            usage: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Tokens used since this client was created.
    pub fn token_usage(&self) -> u64 {
        self.usage.load(Ordering::Relaxed)
    }

    /// Run the availability probe of the underlying provider.
    pub async fn probe(&self) -> Result<(), LlmError> {
        self.provider.probe().await
    }

    /// Request a full completion, retrying transient failures.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionFailure> {
        let mut others = 0;
        let mut last_error = String::from("no attempt made");

        for attempt in 0..self.policy.max_attempts {
            match self.provider.complete(request.clone()).await {
                Ok(response) => {
                    if response.finish_reason == FinishReason::Length {
                        warn!(
                            provider = self.provider.name(),
                            model = self.provider.model_name(),
                            max_tokens = request.max_tokens,
                            "Completion hit the token limit, output is truncated"
                        );
                    }
                    let used = if response.total_tokens() > 0 {
                        response.total_tokens()
                    } else {
                        estimate_request(request) + u64::from(estimate_tokens(&response.content))
                    };
                    let total = self.usage.fetch_add(used, Ordering::Relaxed) + used;
                    debug!(
                        provider = self.provider.name(),
                        attempt,
                        tokens = used,
                        total_tokens = total,
                        "Completion succeeded"
                    );
                    return Ok(response.content);
                }
                Err(e) => {
                    last_error = e.to_string();
                    match self.after_failure(&e, attempt, &mut others).await {
                        Some(failure) => return Err(failure),
                        None => continue,
                    }
                }
            }
        }

        Err(CompletionFailure::Failed(last_error))
    }

    /// Request a streamed completion. Only opening the stream is retried;
    /// a stream that fails midway simply ends early.
    pub async fn stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<TextStream, CompletionFailure> {
        let mut others = 0;
        let mut last_error = String::from("no attempt made");

        for attempt in 0..self.policy.max_attempts {
            match self.provider.complete_stream(request.clone()).await {
                Ok(inner) => {
                    return Ok(TextStream {
                        inner,
                        usage: Arc::clone(&self.usage),
                        prompt_tokens: estimate_request(request),
                        output: String::new(),
                        state: StreamState::Streaming,
                    });
                }
                Err(e) => {
                    last_error = e.to_string();
                    match self.after_failure(&e, attempt, &mut others).await {
                        Some(failure) => return Err(failure),
                        None => continue,
                    }
                }
            }
        }

        Err(CompletionFailure::Failed(last_error))
    }

    /// Apply the policy to one failed attempt. Sleeps when retrying and
    /// returns `Some` when the call should stop.
    async fn after_failure(
        &self,
        err: &LlmError,
        attempt: u32,
        others: &mut u32,
    ) -> Option<CompletionFailure> {
        let kind = err.failure_kind();
        match self.policy.decide_for(err, attempt, *others) {
            RetryDecision::RetryAfter(delay) => {
                if kind == FailureKind::Other {
                    *others += 1;
                }
                warn!(
                    provider = self.provider.name(),
                    attempt = attempt + 1,
                    max_attempts = self.policy.max_attempts,
                    ?kind,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "LLM call failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                None
            }
            RetryDecision::Unavailable => {
                error!(provider = self.provider.name(), error = %err, "LLM service unavailable");
                Some(CompletionFailure::ServiceUnavailable(format!(
                    "{} is not reachable: {err}",
                    self.provider.name()
                )))
            }
            RetryDecision::GiveUp => {
                error!(
                    provider = self.provider.name(),
                    attempt = attempt + 1,
                    ?kind,
                    error = %err,
                    "LLM call failed"
                );
                Some(CompletionFailure::Failed(err.to_string()))
            }
        }
    }
}

fn estimate_request(request: &CompletionRequest) -> u64 {
    request
        .messages
        .iter()
        .map(|m| u64::from(estimate_tokens(&m.content)))
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Streaming,
    Finished,
    Failed,
}

/// Text fragments of a streamed completion, in order.
///
/// Usage is recorded only when the stream runs to its end. A stream that
/// errors or is dropped early leaves the counter untouched.
pub struct TextStream {
    inner: TokenStream,
    usage: Arc<AtomicU64>,
    prompt_tokens: u64,
    output: String,
    state: StreamState,
}

impl TextStream {
    /// Whether the backend broke off the stream.
    pub fn failed(&self) -> bool {
        self.state == StreamState::Failed
    }

    /// Text received so far.
    pub fn text(&self) -> &str {
        &self.output
    }
}

impl Stream for TextStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        let this = &mut *self;
        if this.state != StreamState::Streaming {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(fragment))) => {
                this.output.push_str(&fragment);
                Poll::Ready(Some(fragment))
            }
            Poll::Ready(Some(Err(e))) => {
                warn!(error = %e, "LLM stream broke off");
                this.state = StreamState::Failed;
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                this.state = StreamState::Finished;
                let used = this.prompt_tokens + u64::from(estimate_tokens(&this.output));
                this.usage.fetch_add(used, Ordering::Relaxed);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
