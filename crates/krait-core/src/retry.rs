//! Bounded exponential-backoff retry against a flaky dependent resource.
//!
//! [`retry_until_ready`] wraps an attempt that may find the resource
//! "starting" or "busy" (a container console booting, a single-threaded
//! console with a command in flight). Delays double from `initial_delay`
//! up to `max_delay`; elapsed wall-clock time is re-checked before each
//! attempt and the whole sequence fails with [`RetryError::Timeout`] once
//! it exceeds `max_wait_time`. A permanent failure short-circuits.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Immutable backoff configuration for one retry sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// First sleep after a not-ready attempt.
    pub initial_delay: Duration,
    /// Cap on the doubled delay.
    pub max_delay: Duration,
    /// Wall-clock budget for the whole sequence.
    pub max_wait_time: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_wait_time: Duration::from_secs(60),
        }
    }
}

/// Three-way classification of a single attempt, plus success.
pub enum AttemptOutcome<T, E> {
    /// Resource responded with a value.
    Ready(T),
    /// Resource exists but is still coming up.
    Starting,
    /// Resource is serving another request.
    Busy,
    /// Permanent failure — no further retries.
    Failed(E),
}

/// Why a retry sequence gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// `max_wait_time` elapsed without the resource becoming ready.
    #[error("resource not ready after {waited:?}")]
    Timeout {
        /// Total wall-clock time waited.
        waited: Duration,
    },
    /// The sequence was cancelled externally.
    #[error("retry cancelled")]
    Cancelled,
    /// The attempt reported a permanent failure.
    #[error("permanent failure: {0}")]
    Permanent(E),
}

/// Retry `attempt` until it is ready, the policy budget runs out, or it
/// fails permanently.
///
/// Cancelling `cancel` releases an in-flight backoff sleep promptly and
/// returns [`RetryError::Cancelled`].
pub async fn retry_until_ready<T, E, F, Fut>(
    mut attempt: F,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AttemptOutcome<T, E>>,
    E: std::fmt::Display,
{
    let start = tokio::time::Instant::now();
    let mut delay = policy.initial_delay;
    let mut attempts: u32 = 0;

    loop {
        // Elapsed is re-checked before each attempt, not before each sleep.
        let waited = start.elapsed();
        if waited > policy.max_wait_time {
            warn!(attempts, ?waited, "resource retry budget exhausted");
            return Err(RetryError::Timeout { waited });
        }
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        attempts += 1;
        match attempt().await {
            AttemptOutcome::Ready(value) => {
                debug!(attempts, "resource ready");
                return Ok(value);
            }
            AttemptOutcome::Failed(err) => {
                warn!(attempts, error = %err, "resource failed permanently");
                return Err(RetryError::Permanent(err));
            }
            outcome @ (AttemptOutcome::Starting | AttemptOutcome::Busy) => {
                let status = match outcome {
                    AttemptOutcome::Starting => "starting",
                    _ => "busy",
                };
                debug!(attempts, ?delay, status, "resource not ready, backing off");
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => return Err(RetryError::Cancelled),
                }
                delay = (delay * 2).min(policy.max_delay);
            }
        }
    }
}

impl<T, E> std::fmt::Debug for AttemptOutcome<T, E>
where
    T: std::fmt::Debug,
    E: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(v) => f.debug_tuple("Ready").field(v).finish(),
            Self::Starting => f.write_str("Starting"),
            Self::Busy => f.write_str("Busy"),
            Self::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
