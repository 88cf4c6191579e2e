//! Bounded polling and retry.
//!
//! Two primitives cover every asynchronous provider behavior:
//!
//! - [`wait_until`] polls a probe at a fixed interval until it reports a
//!   terminal condition (a group drained, a service inactive, a resource
//!   gone) and fails with [`ReconcileError::WaitTimeout`] when the polls
//!   run out.
//! - [`retry_on_codes`] repeats an operation that fails with one of a set
//!   of provider error codes (IAM propagation lag, resource still in use)
//!   and fails with [`ReconcileError::MaxRetriesExceeded`] after the last
//!   attempt. Other errors are returned at once.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ReconcileError, Result};

/// A fixed-interval, bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub interval: Duration,
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// A policy that does not sleep between attempts.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    const fn attempts(&self) -> u32 {
        if self.max_attempts == 0 { 1 } else { self.max_attempts }
    }
}

/// The policies used for each kind of asynchronous wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicies {
    /// Launch configuration create while a new instance profile propagates.
    pub iam_propagation: RetryPolicy,
    /// Autoscaling group scale-down to zero instances.
    pub instance_drain: RetryPolicy,
    /// Service drain to zero running tasks and to inactive.
    pub service_drain: RetryPolicy,
    /// Deletes rejected because a dependent is still going away.
    pub transient_error: RetryPolicy,
    /// Resources disappearing after a delete call.
    pub resource_deletion: RetryPolicy,
}

impl Default for WaitPolicies {
    fn default() -> Self {
        Self {
            iam_propagation: RetryPolicy::new(10, Duration::from_secs(3)),
            instance_drain: RetryPolicy::new(300, Duration::from_secs(1)),
            service_drain: RetryPolicy::new(300, Duration::from_secs(1)),
            transient_error: RetryPolicy::new(60, Duration::from_secs(1)),
            resource_deletion: RetryPolicy::new(120, Duration::from_secs(1)),
        }
    }
}

impl WaitPolicies {
    /// Policies with the default attempt counts and no sleeping.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            iam_propagation: RetryPolicy::immediate(10),
            instance_drain: RetryPolicy::immediate(300),
            service_drain: RetryPolicy::immediate(300),
            transient_error: RetryPolicy::immediate(60),
            resource_deletion: RetryPolicy::immediate(120),
        }
    }
}

/// Polls `probe` until it returns `Some`.
///
/// # Errors
///
/// Returns [`ReconcileError::WaitTimeout`] when every poll returned `None`,
/// or the first error the probe returns.
pub async fn wait_until<T, F, Fut>(
    policy: RetryPolicy,
    resource: &str,
    condition: &str,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let attempts = policy.attempts();
    for attempt in 1..=attempts {
        if let Some(value) = probe().await? {
            debug!("{} reached '{}' after {} polls", resource, condition, attempt);
            return Ok(value);
        }
        if attempt < attempts {
            debug!(
                "Waiting for {} to {} (poll {}/{})",
                resource, condition, attempt, attempts
            );
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(ReconcileError::WaitTimeout {
        resource: resource.to_string(),
        condition: condition.to_string(),
        attempts,
    }
    .into())
}

/// Runs `operation`, retrying while it fails with one of `codes`.
///
/// # Errors
///
/// Returns [`ReconcileError::MaxRetriesExceeded`] when every attempt failed
/// with a retryable code, or the first non-retryable error.
pub async fn retry_on_codes<T, F, Fut>(
    policy: RetryPolicy,
    resource: &str,
    codes: &[&str],
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts();
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.provider_code().is_some_and(|code| codes.contains(&code)) => {
                warn!(
                    "Attempt {}/{} on {} failed, will retry: {}",
                    attempt, attempts, resource, e
                );
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(policy.interval).await;
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(ReconcileError::MaxRetriesExceeded {
        attempts,
        resource: resource.to_string(),
        last_error,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::ResourceKind;
    use crate::error::{codes, DeployError, ProviderError, ProviderResultExt};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn failing(code: &str) -> Result<()> {
        Err::<(), _>(ProviderError::new(code, "failed")).for_resource(ResourceKind::Role, "r")
    }

    #[tokio::test]
    async fn test_retry_stops_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        let result = retry_on_codes(
            RetryPolicy::immediate(5),
            "role r",
            &[codes::RESOURCE_IN_USE],
            move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                failing(codes::RESOURCE_IN_USE)
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(matches!(
            result,
            Err(DeployError::Reconcile(ReconcileError::MaxRetriesExceeded { attempts: 5, .. }))
        ));
    }

    #[tokio::test]
    async fn test_retry_returns_other_errors_at_once() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        let result = retry_on_codes(
            RetryPolicy::immediate(5),
            "role r",
            &[codes::RESOURCE_IN_USE],
            move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                failing(codes::VALIDATION)
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            result.unwrap_err().provider_code(),
            Some(codes::VALIDATION)
        );
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        let result = retry_on_codes(
            RetryPolicy::immediate(5),
            "role r",
            &[codes::INVALID_INSTANCE_PROFILE],
            move || async move {
                if calls_ref.fetch_add(1, Ordering::SeqCst) < 2 {
                    failing(codes::INVALID_INSTANCE_PROFILE)
                } else {
                    Ok(())
                }
            },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        let polls = AtomicU32::new(0);
        let polls_ref = &polls;

        let result: Result<()> = wait_until(
            RetryPolicy::immediate(4),
            "group g",
            "drain",
            move || async move {
                polls_ref.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            },
        )
        .await;

        assert_eq!(polls.load(Ordering::SeqCst), 4);
        assert!(matches!(
            result,
            Err(DeployError::Reconcile(ReconcileError::WaitTimeout { attempts: 4, .. }))
        ));
    }

    #[tokio::test]
    async fn test_wait_until_returns_value() {
        let polls = AtomicU32::new(0);
        let polls_ref = &polls;

        let value = wait_until(
            RetryPolicy::immediate(10),
            "group g",
            "drain",
            move || async move {
                let n = polls_ref.fetch_add(1, Ordering::SeqCst);
                Ok((n == 2).then_some(n))
            },
        )
        .await
        .unwrap();

        assert_eq!(value, 2);
    }
}
