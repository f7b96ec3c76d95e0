//! The oracle client: one model exchange with retry, bounded by the session
//! deadline.
//!
//! Failures are classified by category. Fatal ones surface at once as
//! `FatalProvider`; transient ones are retried with backoff until the retry
//! budget is spent, then surface as `TransientProvider`. Every send and every
//! pause is raced against the deadline, so an expired session never waits
//! on the network.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, warn};

use mender_contracts::error::{MenderError, MenderResult};
use mender_core::Deadline;

use crate::{
    backend::{BackendFailure, FinishReason, ModelBackend, ModelReply, ModelRequest},
    retry::{classify, FailureClass, RetryPolicy},
};

pub struct OracleClient {
    backend: Arc<dyn ModelBackend>,
    retry: RetryPolicy,
}

impl OracleClient {
    pub fn new(backend: Arc<dyn ModelBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Send `request` and wait for the full reply.
    ///
    /// # Errors
    ///
    /// `SessionTimeout` when the deadline fires first, `FatalProvider` on a
    /// non-retryable failure, `TransientProvider` when retries run out.
    pub async fn ask(&self, request: &ModelRequest, deadline: &Deadline) -> MenderResult<ModelReply> {
        let mut attempt = 0;
        loop {
            match deadline.bound(self.backend.send(request)).await? {
                Ok(reply) => {
                    debug!(
                        backend = %self.backend.name(),
                        attempts = attempt + 1,
                        chars = reply.text.len(),
                        "model reply received"
                    );
                    return Ok(reply);
                }
                Err(failure) => self.pause_or_escalate(failure, &mut attempt, deadline).await?,
            }
        }
    }

    /// Send `request` as a streamed exchange, handing each chunk to
    /// `on_chunk` as it arrives, and return the assembled reply.
    ///
    /// A failure before the first chunk is retried like `ask`. Once any text
    /// has been delivered, a failure ends the exchange without retry so the
    /// caller never sees the same text twice.
    pub async fn ask_streaming(
        &self,
        request: &ModelRequest,
        deadline: &Deadline,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> MenderResult<ModelReply> {
        let mut attempt = 0;
        'attempts: loop {
            let mut stream = match deadline.bound(self.backend.send_streaming(request)).await? {
                Ok(stream) => stream,
                Err(failure) => {
                    self.pause_or_escalate(failure, &mut attempt, deadline).await?;
                    continue;
                }
            };

            let mut text = String::new();
            loop {
                match deadline.bound(stream.next()).await? {
                    Some(Ok(chunk)) => {
                        on_chunk(&chunk);
                        text.push_str(&chunk);
                    }
                    Some(Err(failure)) if text.is_empty() => {
                        self.pause_or_escalate(failure, &mut attempt, deadline).await?;
                        continue 'attempts;
                    }
                    Some(Err(failure)) => {
                        warn!(
                            backend = %self.backend.name(),
                            delivered = text.len(),
                            error = %failure,
                            "stream broke after partial output"
                        );
                        return Err(escalate(failure, attempt + 1));
                    }
                    None => {
                        debug!(backend = %self.backend.name(), chars = text.len(), "model stream finished");
                        return Ok(ModelReply {
                            text,
                            finish_reason: FinishReason::Stop,
                        });
                    }
                }
            }
        }
    }

    /// Sleep before the next attempt, or turn `failure` into the error the
    /// caller sees.
    async fn pause_or_escalate(
        &self,
        failure: BackendFailure,
        attempt: &mut u32,
        deadline: &Deadline,
    ) -> MenderResult<()> {
        if classify(&failure.category) == FailureClass::Fatal || *attempt >= self.retry.max_retries {
            warn!(
                backend = %self.backend.name(),
                category = %failure.category,
                attempts = *attempt + 1,
                "provider failure not retried"
            );
            return Err(escalate(failure, *attempt + 1));
        }

        let delay = self.retry.delay_for(*attempt, failure.retry_after);
        warn!(
            backend = %self.backend.name(),
            category = %failure.category,
            attempt = *attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "transient provider failure, retrying"
        );
        deadline.bound(tokio::time::sleep(delay)).await?;
        *attempt += 1;
        Ok(())
    }
}

fn escalate(failure: BackendFailure, attempts: u32) -> MenderError {
    match classify(&failure.category) {
        FailureClass::Transient => MenderError::TransientProvider {
            category: failure.category,
            message: failure.message,
            attempts,
        },
        FailureClass::Fatal => MenderError::FatalProvider {
            category: failure.category,
            message: failure.message,
        },
    }
}
