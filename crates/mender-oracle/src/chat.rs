//! OpenAI-compatible chat completions backend.
//!
//! Every supported provider exposes `POST {base_url}/chat/completions` with
//! the same request and response shape; they differ only in base URL,
//! model name and whether a bearer key is sent.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{
    BackendFailure, ChatMessage, ChunkStream, FinishReason, ModelBackend, ModelReply, ModelRequest,
};

/// Talks to one provider over HTTP.
pub struct ChatCompletionsBackend {
    name: String,
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl ChatCompletionsBackend {
    pub fn new(
        name: impl Into<String>,
        client: Client,
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
        }
    }

    async fn post(&self, request: &ModelRequest, stream: bool) -> Result<Response, BackendFailure> {
        let body = CompletionBody {
            model: &self.model,
            messages: request.messages(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        };

        debug!(backend = %self.name, endpoint = %self.endpoint, stream, "sending chat completion request");

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(|e| failure_from_reqwest(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response.text().await.unwrap_or_default();
        Err(failure_from_status(status, retry_after, &text))
    }
}

#[async_trait]
impl ModelBackend for ChatCompletionsBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: &ModelRequest) -> Result<ModelReply, BackendFailure> {
        let response = self.post(request, false).await?;
        let text = response.text().await.map_err(|e| failure_from_reqwest(&e))?;
        parse_completion(&text)
    }

    async fn send_streaming(&self, request: &ModelRequest) -> Result<ChunkStream, BackendFailure> {
        let response = self.post(request, true).await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| failure_from_reqwest(&e)));
        Ok(sse_chunks(bytes))
    }
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: Option<CompletionMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Option<CompletionMessage>,
}

// ── Failure mapping ───────────────────────────────────────────────────────────

pub(crate) fn failure_from_reqwest(e: &reqwest::Error) -> BackendFailure {
    if e.is_timeout() {
        BackendFailure::timeout(e.to_string())
    } else if e.is_decode() {
        BackendFailure::malformed(e.to_string())
    } else if e.is_builder() {
        BackendFailure::new("config", e.to_string())
    } else {
        BackendFailure::connection(e.to_string())
    }
}

pub(crate) fn failure_from_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> BackendFailure {
    let message = format!("HTTP {}: {}", status, body.chars().take(300).collect::<String>());
    match status.as_u16() {
        401 | 403 => BackendFailure::auth(message),
        404 => BackendFailure::new("not_found", message),
        408 | 504 => BackendFailure::timeout(message),
        429 => BackendFailure {
            message,
            ..BackendFailure::rate_limited(retry_after)
        },
        500..=599 => BackendFailure::new("server_error", message),
        _ => BackendFailure::new("invalid_request", message),
    }
}

pub(crate) fn parse_completion(body: &str) -> Result<ModelReply, BackendFailure> {
    let parsed: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| BackendFailure::malformed(format!("JSON parse error: {e}")))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| BackendFailure::malformed("no choices in response"))?;
    let text = choice.message.and_then(|m| m.content).unwrap_or_default();

    Ok(ModelReply {
        text,
        finish_reason: FinishReason::from_wire(choice.finish_reason.as_deref()),
    })
}

// ── Server-sent events ────────────────────────────────────────────────────────

enum SseLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, BackendFailure> {
    let Some(data) = line.strip_prefix("data:") else {
        // Comments, `event:` lines and blank separators.
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    let event: StreamResponse = serde_json::from_str(data)
        .map_err(|e| BackendFailure::malformed(format!("bad stream event: {e}")))?;
    let text: String = event
        .choices
        .into_iter()
        .filter_map(|c| c.delta.and_then(|d| d.content))
        .collect();
    Ok(if text.is_empty() { SseLine::Skip } else { SseLine::Delta(text) })
}

struct SseState<S> {
    bytes: S,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, BackendFailure>>,
    finished: bool,
}

impl<S> SseState<S> {
    /// Move every complete line out of the buffer into `pending`.
    fn drain_lines(&mut self, flush: bool) {
        loop {
            let line: Vec<u8> = match self.buffer.iter().position(|b| *b == b'\n') {
                Some(pos) => self.buffer.drain(..=pos).collect(),
                None if flush && !self.buffer.is_empty() => std::mem::take(&mut self.buffer),
                None => return,
            };
            let line = String::from_utf8_lossy(&line);
            match parse_sse_line(line.trim()) {
                Ok(SseLine::Delta(text)) => self.pending.push_back(Ok(text)),
                Ok(SseLine::Skip) => {}
                Ok(SseLine::Done) => {
                    self.finished = true;
                    self.buffer.clear();
                    return;
                }
                Err(failure) => {
                    self.pending.push_back(Err(failure));
                    self.finished = true;
                    self.buffer.clear();
                    return;
                }
            }
        }
    }
}

/// Turn a byte stream of server-sent events into reply chunks.
pub(crate) fn sse_chunks<S, B>(bytes: S) -> ChunkStream
where
    S: Stream<Item = Result<B, BackendFailure>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    st.buffer.extend_from_slice(chunk.as_ref());
                    st.drain_lines(false);
                }
                Some(Err(failure)) => {
                    st.finished = true;
                    return Some((Err(failure), st));
                }
                None => {
                    st.drain_lines(true);
                    st.finished = true;
                }
            }
        }
    });
    Box::pin(stream)
}
