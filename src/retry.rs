//! Retry logic with exponential backoff
//!
//! Bounded retries for transient per-link fetch failures, with exponential
//! backoff and optional jitter. Disabled by default (`max_attempts: 0`): the
//! base pipeline is fail-fast and retrying is an explicit opt-in. Protocol
//! contract violations (rejected kickoff, malformed manifest, wrong content
//! type) are never retried; repeating those requests cannot change the
//! answer.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::Error;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (connection resets, timeouts, server overload) return
/// `true`; contract violations and permanent failures return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Transport-level connect/timeout failures are transient
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            // A body read that died mid-stream can succeed on a fresh request
            Error::ReadBody { .. } => true,
            // Server overload and 5xx statuses on a resource link are
            // transient; 4xx means the link itself is bad
            Error::FetchFailed { status, .. } => {
                *status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            // Protocol contract violations and terminal states
            Error::KickoffRejected { .. }
            | Error::MissingStatusLocation
            | Error::PollRejected { .. }
            | Error::PollTimedOut { .. }
            | Error::Cancelled
            | Error::MalformedManifest { .. }
            | Error::UnexpectedContentType { .. }
            | Error::InvalidUrl { .. }
            | Error::Config { .. }
            | Error::Sink(_) => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// Runs `operation` once, then retries up to `config.max_attempts` times as
/// long as the error is classified retryable, sleeping between attempts with
/// exponential backoff capped at `config.max_delay`. With `max_attempts: 0`
/// the first error is returned untouched.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "transient failure, retrying"
                );

                let jittered = if config.jitter { add_jitter(delay) } else { delay };
                tokio::time::sleep(jittered).await;

                delay = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
                    .min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(error = %e, attempts = attempt + 1, "retry attempts exhausted");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay
///
/// Uniformly distributed between 0% and 100% of the delay, so the actual
/// delay lands between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let jitter_factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
