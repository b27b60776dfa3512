//! Completion providers
//!
//! `CompletionProvider` opens one segment per call. `OpenAiProvider` talks to
//! any OpenAI-compatible `/chat/completions` endpoint with `stream: true` and
//! turns its server-sent events into segment events.

use crate::auth;
use crate::segment::{Segment, SegmentEvent};
use crate::types::{ChatCompletionChunk, ChatCompletionRequest};
use async_trait::async_trait;
use futures::StreamExt;
use loom_core::{LoomError, Message, ProviderConfig, Result};
use std::time::Duration;
use thiserror::Error;

/// Failure to open a segment
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Transient server-side failures that are worth retrying (500 and 503)
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Status { status: 500 | 503, .. })
    }
}

/// A language-model backend that can stream one segment per call
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Start a completion for `messages`; the returned segment is still streaming
    async fn open_segment(&self, messages: &[Message]) -> std::result::Result<Segment, ProviderError>;
}

/// OpenAI-compatible streaming chat completions client
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    system_prompt: Option<String>,
}

impl OpenAiProvider {
    /// Create a provider using the key found in `config.api_key_env`
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let api_key = auth::get_api_key(&config.api_key_env)?;
        Self::new(config, api_key)
    }

    /// Create a provider with an explicit API key
    pub fn new(config: &ProviderConfig, api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| LoomError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            system_prompt: config.system_prompt.clone(),
        })
    }

    /// Model identifier sent with each request
    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, messages: &[Message]) -> ChatCompletionRequest {
        let mut all = Vec::with_capacity(messages.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            all.push(Message::system(prompt.clone()));
        }
        all.extend_from_slice(messages);

        ChatCompletionRequest {
            model: self.model.clone(),
            messages: all,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: true,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn open_segment(&self, messages: &[Message]) -> std::result::Result<Segment, ProviderError> {
        let request = self.build_request(messages);

        tracing::debug!(
            model = %self.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false);
        if !is_event_stream {
            return Err(ProviderError::Malformed(
                "expected a text/event-stream response".to_string(),
            ));
        }

        let mut bytes = Box::pin(response.bytes_stream());
        let events = async_stream::stream! {
            let mut decoder = SseDecoder::default();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(LoomError::Stream(format!("Provider stream failed: {}", e)));
                        return;
                    }
                };

                for data in decoder.push(&chunk) {
                    if data == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<ChatCompletionChunk>(&data) {
                        Ok(parsed) => {
                            for event in parsed.into_events() {
                                yield Ok(event);
                            }
                        }
                        Err(e) => {
                            yield Err(LoomError::Stream(format!("Malformed stream chunk: {}", e)));
                            return;
                        }
                    }
                }
            }
        };

        Ok(Segment::from_events(events))
    }
}

/// Incremental decoder for `data:` lines of a server-sent event stream
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes; returns the `data:` payloads of every completed line
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);

            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}
