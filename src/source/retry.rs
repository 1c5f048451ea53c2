//! Bounded exponential backoff for source queries.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::VulnerabilitySource;
use crate::error::SourceError;
use crate::model::{Dependency, RawVulnerabilityRecord};

/// How often and how patiently a failed query is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

/// Retry state for one call. Delays double from `base_delay_ms` up to
/// `max_delay_ms`.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    retries: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, retries: 0 }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// The delay before the next retry, or `None` once retries are exhausted.
    ///
    /// A server-supplied `Retry-After` hint lengthens the delay but never past
    /// the cap.
    pub fn next_delay(&mut self, hint: Option<Duration>) -> Option<Duration> {
        if self.retries >= self.policy.max_retries {
            return None;
        }

        let max = Duration::from_millis(self.policy.max_delay_ms);
        let exponential = Duration::from_millis(self.policy.base_delay_ms)
            .saturating_mul(2u32.saturating_pow(self.retries))
            .min(max);
        let delay = hint.map_or(exponential, |h| h.max(exponential)).min(max);

        self.retries += 1;
        Some(delay)
    }
}

/// Queries `source`, retrying `Unavailable` and `RateLimited` failures.
///
/// Returns the last error once the policy is exhausted. Cancellation stops the
/// wait between attempts and surfaces the last error.
pub async fn query_with_retry(
    source: &dyn VulnerabilitySource,
    dependency: &Dependency,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<RawVulnerabilityRecord>, SourceError> {
    let mut backoff = Backoff::new(policy);

    loop {
        let error = match source.query(dependency).await {
            Ok(records) => {
                debug!(
                    source = %source.kind(),
                    package = %dependency.name,
                    records = records.len(),
                    retries = backoff.retries(),
                    "source query complete"
                );
                return Ok(records);
            }
            Err(e) if e.is_retryable() => e,
            Err(e) => return Err(e),
        };

        let hint = match &error {
            SourceError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        };
        let Some(delay) = backoff.next_delay(hint) else {
            warn!(
                source = %source.kind(),
                package = %dependency.name,
                error = %error,
                "retries exhausted"
            );
            return Err(error);
        };

        debug!(
            source = %source.kind(),
            package = %dependency.name,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "retrying source query"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(error),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestKind;
    use crate::model::{Ecosystem, SourceKind};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        error: SourceError,
        calls: AtomicU32,
    }

    #[async_trait]
    impl VulnerabilitySource for Flaky {
        fn kind(&self) -> SourceKind {
            SourceKind::Osv
        }

        async fn query(&self, _dependency: &Dependency) -> Result<Vec<RawVulnerabilityRecord>, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(self.error.clone())
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn dependency() -> Dependency {
        Dependency::new(
            Ecosystem::Npm,
            "lodash",
            "4.17.15",
            PathBuf::from("package.json"),
            ManifestKind::PackageJson,
        )
    }

    fn rate_limited() -> SourceError {
        SourceError::RateLimited {
            source_kind: SourceKind::Osv,
            retry_after: None,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(RetryPolicy {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 500,
        });

        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay(None)).collect();
        assert_eq!(
            delays,
            vec![100, 200, 400, 500, 500]
                .into_iter()
                .map(Duration::from_millis)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_backoff_honors_retry_after_within_cap() {
        let mut backoff = Backoff::new(RetryPolicy::default());
        assert_eq!(backoff.next_delay(Some(Duration::from_secs(2))), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_delay(Some(Duration::from_secs(60))), Some(Duration::from_secs(8)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_three_times_then_succeeds() {
        let source = Flaky {
            failures: 3,
            error: rate_limited(),
            calls: AtomicU32::new(0),
        };

        let result = query_with_retry(&source, &dependency(), RetryPolicy::default(), &CancellationToken::new()).await;
        assert!(result.is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let source = Flaky {
            failures: 10,
            error: SourceError::Unavailable {
                source_kind: SourceKind::Osv,
                reason: "HTTP 503".to_string(),
            },
            calls: AtomicU32::new(0),
        };

        let result = query_with_retry(&source, &dependency(), RetryPolicy::default(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(SourceError::Unavailable { .. })));
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_response_not_retried() {
        let source = Flaky {
            failures: 1,
            error: SourceError::MalformedResponse {
                source_kind: SourceKind::Osv,
                reason: "missing field `vulns`".to_string(),
            },
            calls: AtomicU32::new(0),
        };

        let result = query_with_retry(&source, &dependency(), RetryPolicy::default(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(SourceError::MalformedResponse { .. })));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_waiting() {
        let source = Flaky {
            failures: 10,
            error: rate_limited(),
            calls: AtomicU32::new(0),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = query_with_retry(&source, &dependency(), RetryPolicy::default(), &cancel).await;
        assert!(result.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
