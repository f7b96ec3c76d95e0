//! A model backend that plays back a fixed script.
//!
//! Used to drive the agent loop without a network. Each call to `send` or
//! `send_streaming` consumes the next step; an exhausted script answers
//! with a fatal `script_exhausted` failure.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::{BackendFailure, ChunkStream, FinishReason, ModelBackend, ModelReply, ModelRequest};

/// One scripted exchange.
pub enum ScriptStep {
    Reply(String),
    Fail(BackendFailure),
    /// Streamed chunks, optionally followed by a failure on the stream.
    Stream {
        chunks: Vec<String>,
        then: Option<BackendFailure>,
    },
    /// Run `before`, then reply. Lets a test act while a reply is in flight.
    ReplyAfter {
        before: Box<dyn FnOnce() + Send>,
        text: String,
    },
    /// Never answer.
    Hang,
}

impl ScriptStep {
    pub fn reply(text: impl Into<String>) -> Self {
        ScriptStep::Reply(text.into())
    }

    pub fn fail(category: &str) -> Self {
        ScriptStep::Fail(BackendFailure::new(category, format!("scripted {category} failure")))
    }
}

pub struct ScriptedBackend {
    steps: Mutex<VecDeque<ScriptStep>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedBackend {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A script of plain replies.
    pub fn replies<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self::new(replies.into_iter().map(|r| ScriptStep::Reply(r.into())))
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().map(|s| s.len()).unwrap_or_default()
    }

    fn next_step(&self, request: &ModelRequest) -> ScriptStep {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        self.steps
            .lock()
            .ok()
            .and_then(|mut steps| steps.pop_front())
            .unwrap_or_else(|| ScriptStep::Fail(BackendFailure::new("script_exhausted", "no scripted reply left")))
    }
}

fn stop(text: String) -> ModelReply {
    ModelReply {
        text,
        finish_reason: FinishReason::Stop,
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, request: &ModelRequest) -> Result<ModelReply, BackendFailure> {
        match self.next_step(request) {
            ScriptStep::Reply(text) => Ok(stop(text)),
            ScriptStep::Fail(failure) => Err(failure),
            ScriptStep::Stream { chunks, then: None } => Ok(stop(chunks.concat())),
            ScriptStep::Stream { then: Some(failure), .. } => Err(failure),
            ScriptStep::ReplyAfter { before, text } => {
                before();
                Ok(stop(text))
            }
            ScriptStep::Hang => futures::future::pending().await,
        }
    }

    async fn send_streaming(&self, request: &ModelRequest) -> Result<ChunkStream, BackendFailure> {
        let items: Vec<Result<String, BackendFailure>> = match self.next_step(request) {
            ScriptStep::Reply(text) => vec![Ok(text)],
            ScriptStep::Fail(failure) => return Err(failure),
            ScriptStep::Stream { chunks, then } => chunks.into_iter().map(Ok).chain(then.map(Err)).collect(),
            ScriptStep::ReplyAfter { before, text } => {
                before();
                vec![Ok(text)]
            }
            ScriptStep::Hang => futures::future::pending().await,
        };
        Ok(Box::pin(futures::stream::iter(items)))
    }
}
