//! OpenAI-compatible HTTP provider.
//!
//! Talks to any `/chat/completions` endpoint: one-shot JSON completions and
//! server-sent-event streaming, with bounded retries for transient failures
//! on the request phase.

use super::{Completion, Provider, StreamChunk, ToolCallAssembler};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::types::{
    ChatMessage, ChatRequest, ChatResponse, StreamFrame, ToolDefinition,
};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::sleep;
use std::time::Duration;
use tracing::{debug, warn};

/// Fallback endpoint when the config leaves `base_url` empty.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// HTTP client timeout. Streaming responses only need this to cover the
/// connection phase; body reads are incremental.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Buffered chunk capacity between the SSE reader and the consumer.
const CHANNEL_CAPACITY: usize = 100;

#[derive(Clone, Copy, Debug)]
struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// Provider for OpenAI-compatible chat endpoints.
pub struct OpenAiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry_policy: RetryPolicy,
}

impl OpenAiProvider {
    /// Build a provider from endpoint settings.
    pub fn new(cfg: &ProviderConfig) -> Self {
        let base_url = if cfg.base_url.trim().is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            cfg.base_url.trim_end_matches('/').to_string()
        };
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url,
            api_key: cfg.api_key.trim().to_string(),
            retry_policy: RetryPolicy::default(),
        }
    }

    fn build_request(
        &self,
        messages: Vec<ChatMessage>,
        cfg: &ProviderConfig,
        stream: bool,
        tools: Option<Vec<ToolDefinition>>,
        tool_choice: Option<String>,
    ) -> ChatRequest {
        ChatRequest {
            model: cfg.model.clone(),
            messages,
            max_tokens: Some(cfg.max_tokens),
            temperature: Some(cfg.temperature),
            stream: stream.then_some(true),
            tools,
            tool_choice,
        }
    }

    /// POST the request, retrying transient failures with backoff.
    async fn dispatch(&self, request: &ChatRequest) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut attempt: u32 = 0;
        loop {
            let result = self.post_once(&url, request).await;
            match result {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if !self.should_retry(&err, attempt) {
                        return Err(err);
                    }
                    let delay = self.retry_delay_for(attempt, &err);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying provider request");
                    attempt = attempt.saturating_add(1);
                    sleep(delay).await;
                }
            }
        }
    }

    async fn post_once(
        &self,
        url: &str,
        request: &ChatRequest,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut req = self.http.post(url).json(request);
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }
        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after_secs = parse_retry_after_secs(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::status(status, body, retry_after_secs));
        }
        Ok(response)
    }

    fn should_retry(&self, err: &ProviderError, attempt: u32) -> bool {
        if attempt.saturating_add(1) >= self.retry_policy.max_attempts {
            return false;
        }
        match err {
            ProviderError::Http(inner) => inner.is_timeout() || inner.is_connect(),
            ProviderError::Status { code, .. } => *code == 429 || (*code >= 500 && *code <= 599),
            ProviderError::InvalidResponse(_) | ProviderError::Stream(_) => false,
        }
    }

    fn retry_delay_for(&self, attempt: u32, err: &ProviderError) -> Duration {
        if let Some(seconds) = err.retry_after_secs() {
            return Duration::from_secs(seconds.clamp(1, 300));
        }
        let pow = 2u32.saturating_pow(attempt);
        let millis = self
            .retry_policy
            .initial_backoff
            .as_millis()
            .saturating_mul(pow as u128)
            .min(self.retry_policy.max_backoff.as_millis());
        Duration::from_millis(millis as u64)
    }

    /// Start an SSE stream and spawn the reader that translates frames into
    /// chunks. Tool-call fragments are reassembled and only emitted as
    /// complete calls right before the terminal `done` chunk.
    async fn start_stream(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderError> {
        let response = self.dispatch(&request).await?;
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut assembler = ToolCallAssembler::new();
            let mut finished = false;

            'read: while let Some(piece) = body.next().await {
                let piece = match piece {
                    Ok(piece) => piece,
                    Err(e) => {
                        // Close without a done chunk: consumers treat this
                        // as a mid-flight stream failure.
                        warn!(error = %e, "provider stream failed mid-flight");
                        return;
                    }
                };
                buffer.extend_from_slice(&piece);

                while let Some(frame_end) = find_frame_boundary(&buffer) {
                    let frame: Vec<u8> = buffer.drain(..frame_end + 2).collect();
                    let Some(data) = extract_data_payload(&frame) else {
                        continue;
                    };
                    if data == "[DONE]" {
                        finished = true;
                        break 'read;
                    }
                    let Ok(parsed) = serde_json::from_str::<StreamFrame>(&data) else {
                        continue;
                    };
                    for choice in &parsed.choices {
                        let delta = &choice.delta;
                        if let Some(content) = &delta.content {
                            if !content.is_empty()
                                && tx
                                    .send(StreamChunk {
                                        content: Some(content.clone()),
                                        ..StreamChunk::default()
                                    })
                                    .await
                                    .is_err()
                            {
                                return;
                            }
                        }
                        let thinking = delta
                            .reasoning_content
                            .as_deref()
                            .or(delta.thinking.as_deref());
                        if let Some(thinking) = thinking {
                            if !thinking.is_empty()
                                && tx
                                    .send(StreamChunk {
                                        thinking: Some(thinking.to_string()),
                                        ..StreamChunk::default()
                                    })
                                    .await
                                    .is_err()
                            {
                                return;
                            }
                        }
                        for fragment in delta.tool_calls.iter().flatten() {
                            assembler.ingest(fragment);
                        }
                        if choice.finish_reason.is_some() {
                            finished = true;
                        }
                    }
                    if finished {
                        break 'read;
                    }
                }
            }

            if !finished && !assembler.has_calls() {
                // EOF without a terminator still ends the stream cleanly
                // when nothing suggests a truncated tool call.
                finished = true;
            }
            if !finished {
                warn!("provider stream ended before finish marker");
                return;
            }

            let calls = assembler.finish();
            if !calls.is_empty()
                && tx
                    .send(StreamChunk {
                        tool_calls: calls,
                        ..StreamChunk::default()
                    })
                    .await
                    .is_err()
            {
                return;
            }
            let _ = tx.send(StreamChunk::done()).await;
        });

        Ok(rx)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        cfg: &ProviderConfig,
    ) -> Result<Completion, ProviderError> {
        let request = self.build_request(messages, cfg, false, None, None);
        let response = self.dispatch(&request).await?;
        let parsed: ChatResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("malformed completion body: {e}"))
        })?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("no choices in response".to_string()))?;
        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            usage: parsed.usage,
            stop_reason: choice.finish_reason,
        })
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        cfg: &ProviderConfig,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderError> {
        let request = self.build_request(messages, cfg, true, None, None);
        self.start_stream(request).await
    }

    async fn stream_with_tools(
        &self,
        messages: Vec<ChatMessage>,
        cfg: &ProviderConfig,
        tools: Vec<ToolDefinition>,
        tool_choice: &str,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderError> {
        let tools = (!tools.is_empty()).then_some(tools);
        let tool_choice = tools.as_ref().map(|_| tool_choice.to_string());
        let request = self.build_request(messages, cfg, true, tools, tool_choice);
        self.start_stream(request).await
    }
}

/// Byte offset of the first `\n\n` frame terminator, if any.
fn find_frame_boundary(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// Join the `data:` lines of one SSE frame.
fn extract_data_payload(frame: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(frame);
    let mut data_lines: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

/// Parse a `Retry-After` header in delay-seconds form.
fn parse_retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
