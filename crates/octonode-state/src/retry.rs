//! Conflict-retry helpers for read-modify-write cycles.

use std::collections::BTreeMap;
use std::time::Duration;

use octonode_core::{Identity, Resource};
use serde_json::Value;
use tracing::{debug, warn};

use crate::StateResult;
use crate::error::StateError;
use crate::traits::State;

/// Bounds for [`update_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up with `RetryExhausted`.
    pub max_attempts: u32,
    /// Delay after the first conflict; doubled on every further conflict.
    pub backoff: Duration,
    /// Upper bound on the delay between attempts.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self.max_backoff = self.max_backoff.max(backoff);
        self
    }

    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(200),
        }
    }
}

/// Re-reads the resource, computes a new spec and writes it back, retrying on
/// version conflicts.
///
/// `modifier` receives the latest spec and returns the desired one. When the
/// result equals the current spec nothing is written and the current resource
/// is returned. Errors other than `Conflict` are returned immediately.
pub async fn update_with_retry<S, F>(
    state: &S,
    identity: &Identity,
    writer: &str,
    policy: RetryPolicy,
    modifier: F,
) -> StateResult<Resource>
where
    S: State + ?Sized,
    F: Fn(&Value) -> StateResult<Value> + Send + Sync,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let current = state.get(identity).await?;
        let desired = modifier(&current.spec)?;
        if desired == current.spec {
            return Ok(current);
        }

        match state
            .update_spec(identity, current.version(), writer, desired)
            .await
        {
            Err(StateError::Conflict { actual, .. }) => {
                if attempt >= policy.max_attempts {
                    warn!(identity = %identity, attempts = attempt, "Update retries exhausted");
                    return Err(StateError::retry_exhausted(identity, attempt));
                }
                debug!(identity = %identity, attempt, actual = %actual, "Update conflict, retrying");
                tokio::time::sleep(policy.delay(attempt)).await;
            }
            result => return result,
        }
    }
}

/// Label counterpart of [`update_with_retry`]; open to any writer.
pub async fn update_labels_with_retry<S, F>(
    state: &S,
    identity: &Identity,
    policy: RetryPolicy,
    modifier: F,
) -> StateResult<Resource>
where
    S: State + ?Sized,
    F: Fn(&BTreeMap<String, String>) -> BTreeMap<String, String> + Send + Sync,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let current = state.get(identity).await?;
        let desired = modifier(&current.meta.labels);
        if desired == current.meta.labels {
            return Ok(current);
        }

        match state
            .update_labels(
                identity,
                current.version(),
                Box::new(move |labels| {
                    *labels = desired;
                    Ok(())
                }),
            )
            .await
        {
            Err(StateError::Conflict { .. }) => {
                if attempt >= policy.max_attempts {
                    warn!(identity = %identity, attempts = attempt, "Label retries exhausted");
                    return Err(StateError::retry_exhausted(identity, attempt));
                }
                tokio::time::sleep(policy.delay(attempt)).await;
            }
            result => return result,
        }
    }
}
