//! Streaming chat completions.
//!
//! [`ChatProvider`] turns a list of messages into a stream of answer tokens.
//! [`OpenAIChat`] speaks the OpenAI-compatible `POST {url}/chat/completions`
//! API with `stream: true` and decodes its server-sent events:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Le"}}]}
//!
//! data: {"choices":[{"delta":{"content":" RGPD"}}]}
//!
//! data: [DONE]
//! ```
//!
//! Retries only cover the request phase; once tokens flow, a broken stream
//! surfaces as an error item.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::http::{openai_api_key, post_json_with_retry};

/// Answer tokens in arrival order.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn model_name(&self) -> &str;
    /// Sends the conversation and returns the streamed reply.
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream>;
}

pub struct DisabledChat;

#[async_trait]
impl ChatProvider for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn stream_chat(&self, _messages: &[ChatMessage]) -> Result<TokenStream> {
        bail!("LLM provider is disabled. Set [llm] provider in config.")
    }
}

/// Chat provider for the OpenAI API or any compatible endpoint.
///
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAIChat {
    model: String,
    url: String,
    api_key: String,
    temperature: Option<f32>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = openai_api_key()?;
        // Total time for one answer, streaming included.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            url: format!("{}/chat/completions", config.base_url()),
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }

        let response = post_json_with_retry(
            &self.client,
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;

        Ok(sse_token_stream(response.bytes_stream()))
    }
}

pub fn create_chat_provider(config: &LlmConfig) -> Result<Box<dyn ChatProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledChat)),
        "openai" => Ok(Box::new(OpenAIChat::new(config)?)),
        other => bail!("Unknown LLM provider: {}", other),
    }
}

// ============ Server-sent events ============

/// One line of an event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// Payload of a `data:` field.
    Data(String),
    /// `data: [DONE]`, the end of the completion.
    Done,
    /// Blank lines, comments and fields other than `data`.
    Skip,
}

pub fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(payload) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    if payload.trim() == "[DONE]" {
        SseLine::Done
    } else {
        SseLine::Data(payload.to_string())
    }
}

/// Extracts `choices[0].delta.content` from one completion chunk. An
/// `error` object in the chunk becomes an error.
fn delta_content(payload: &str) -> Result<Option<String>> {
    let json: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| anyhow!("Invalid completion chunk: {}", e))?;

    if let Some(error) = json.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        bail!("Completion failed: {}", message);
    }

    Ok(json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string))
}

struct SseState {
    body: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
    ended: bool,
}

/// Decodes an event-stream body into tokens. Lines may be split across
/// network reads; bytes are buffered until a full line is available.
pub fn sse_token_stream<S>(body: S) -> TokenStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let state = SseState {
        body: Box::pin(body),
        buffer: Vec::new(),
        ended: false,
    };

    Box::pin(stream::try_unfold(state, |mut state| async move {
        loop {
            while let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = state.buffer.drain(..=pos).collect();
                match parse_sse_line(&String::from_utf8_lossy(&raw)) {
                    SseLine::Done => return Ok(None),
                    SseLine::Data(payload) => {
                        if let Some(token) = delta_content(&payload)? {
                            return Ok(Some((token, state)));
                        }
                    }
                    SseLine::Skip => {}
                }
            }

            if state.ended {
                return Ok(None);
            }
            match state.body.next().await {
                Some(chunk) => state.buffer.extend_from_slice(&chunk?),
                None => {
                    state.ended = true;
                    if !state.buffer.is_empty() {
                        state.buffer.push(b'\n');
                    }
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(parts: &[&str]) -> impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static {
        let parts: Vec<reqwest::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        stream::iter(parts)
    }

    async fn collect(stream: TokenStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[test]
    fn parse_lines() {
        assert_eq!(parse_sse_line("data: {\"a\":1}"), SseLine::Data("{\"a\":1}".to_string()));
        assert_eq!(parse_sse_line("data:{\"a\":1}\r"), SseLine::Data("{\"a\":1}".to_string()));
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(""), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_sse_line("event: message"), SseLine::Skip);
    }

    #[test]
    fn delta_content_skips_role_only_chunks() {
        let role = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(delta_content(role).unwrap(), None);
        let token = r#"{"choices":[{"delta":{"content":"Article"}}]}"#;
        assert_eq!(delta_content(token).unwrap().as_deref(), Some("Article"));
    }

    #[test]
    fn delta_content_reports_errors() {
        let err = delta_content(r#"{"error":{"message":"quota exceeded"}}"#).unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn tokens_survive_lines_split_across_reads() {
        let stream = sse_token_stream(body(&[
            ": ping\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"Le \"}}]}\n\nda",
            "ta: {\"choices\":[{\"delta\":{\"content\":\"consente",
            "ment\"}}]}\n\ndata: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
        ]));
        let tokens: Vec<String> = collect(stream)
            .await
            .into_iter()
            .map(|t| t.unwrap())
            .collect();
        assert_eq!(tokens, vec!["Le ", "consentement"]);
    }

    #[tokio::test]
    async fn trailing_line_without_newline_is_read() {
        let stream = sse_token_stream(body(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"fin\"}}]}",
        ]));
        let tokens: Vec<String> = collect(stream)
            .await
            .into_iter()
            .map(|t| t.unwrap())
            .collect();
        assert_eq!(tokens, vec!["fin"]);
    }

    #[tokio::test]
    async fn malformed_chunk_ends_stream_with_error() {
        let stream = sse_token_stream(body(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
            "data: not json\n",
        ]));
        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "ok");
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn disabled_chat_refuses() {
        let provider = create_chat_provider(&LlmConfig::default()).unwrap();
        let err = provider
            .stream_chat(&[ChatMessage::user("bonjour")])
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("disabled"));
    }
}
