//! Failure classification and backoff.

use std::time::Duration;

/// How the client treats a failed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth another attempt after a pause.
    Transient,
    /// Retrying cannot help: bad key, bad model, bad request.
    Fatal,
}

const TRANSIENT: &[&str] = &[
    "timeout",
    "timed_out",
    "rate_limit",
    "rate_limited",
    "connection",
    "server_error",
    "unavailable",
    "malformed_response",
];

/// Classify a failure by its category text.
///
/// Matching ignores case and treats `-` and spaces like `_`, so
/// `Rate-Limit` and `rate limit` are both transient. Anything not known to
/// be transient is fatal.
pub fn classify(category: &str) -> FailureClass {
    let normalized: String = category
        .trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect();

    if TRANSIENT.contains(&normalized.as_str()) {
        FailureClass::Transient
    } else {
        FailureClass::Fatal
    }
}

/// Exponential backoff with jitter.
///
/// `delay = min(initial * multiplier^attempt, max) * (1 ± jitter)`
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added or removed at random.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// No pauses; for tests.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    ///
    /// A server-provided `retry_after` is honoured when it is longer than
    /// the computed delay, up to `max_delay`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let spread = (rand::random::<f64>() * 2.0 - 1.0) * self.jitter;
        let jittered = Duration::from_secs_f64((capped * (1.0 + spread)).max(0.0));

        match retry_after {
            Some(hint) if hint > jittered => hint.min(self.max_delay),
            _ => jittered,
        }
    }
}
