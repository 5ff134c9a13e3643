//! Retries with exponential backoff and per-call timeouts for remote calls

use async_trait::async_trait;
use docsync_config::RemoteConfig;
use docsync_types::{DocumentId, Error, RemoteClient, RemoteDocument, Result, RetryConfig};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry and timeout settings applied to every remote call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    retry: RetryConfig,
    request_timeout: Duration,
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(retry: RetryConfig, request_timeout: Duration) -> Self {
        Self {
            retry,
            request_timeout,
        }
    }

    /// Create a retry policy from the remote configuration
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(config.retry.clone(), config.timeouts.request_timeout)
    }

    /// Retries allowed after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.retry.max_retries
    }

    /// Delay before retry number `attempt` (0-based) after `error`
    ///
    /// Exponential backoff plus random jitter, never shorter than the wait
    /// the server asked for.
    pub fn backoff(&self, attempt: u32, error: &Error) -> Duration {
        let base = self.retry.delay_for_attempt(attempt);
        let jitter = base.mul_f64(self.retry.jitter_factor * fastrand::f64());
        let delay = base + jitter;
        error.retry_after().map_or(delay, |minimum| delay.max(minimum))
    }

    /// Run `call` until it succeeds, fails permanently or runs out of retries
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.request_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    seconds: self.request_timeout.as_secs(),
                }),
            };

            match result {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{} succeeded after {} retries", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(error) if error.should_retry() && attempt < self.retry.max_retries => {
                    let delay = self.backoff(attempt, &error);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation,
                        attempt + 1,
                        self.retry.max_retries + 1,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    if error.should_retry() {
                        warn!("{} gave up after {} attempts: {}", operation, attempt + 1, error);
                    }
                    return Err(error);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RemoteConfig::default())
    }
}

/// Remote client decorator applying a [`RetryPolicy`] to every call
#[derive(Debug)]
pub struct RetryingRemote<R> {
    inner: R,
    policy: RetryPolicy,
}

impl<R: RemoteClient> RetryingRemote<R> {
    /// Wrap a remote client
    pub fn new(inner: R, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Wrapped client
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<R: RemoteClient> RemoteClient for RetryingRemote<R> {
    async fn get_document(&self, id: &DocumentId) -> Result<Option<RemoteDocument>> {
        self.policy
            .run("get_document", || self.inner.get_document(id))
            .await
    }

    async fn list_documents(&self, folder_scope: &str) -> Result<Vec<RemoteDocument>> {
        self.policy
            .run("list_documents", || self.inner.list_documents(folder_scope))
            .await
    }

    async fn create_document(
        &self,
        name: &str,
        content: &str,
        folder_scope: &str,
    ) -> Result<DocumentId> {
        self.policy
            .run("create_document", || {
                self.inner.create_document(name, content, folder_scope)
            })
            .await
    }

    async fn update_document(&self, id: &DocumentId, content: &str) -> Result<()> {
        self.policy
            .run("update_document", || self.inner.update_document(id, content))
            .await
    }

    async fn move_document(&self, id: &DocumentId, folder_scope: &str, name: &str) -> Result<()> {
        self.policy
            .run("move_document", || {
                self.inner.move_document(id, folder_scope, name)
            })
            .await
    }

    async fn delete_document(&self, id: &DocumentId) -> Result<()> {
        self.policy
            .run("delete_document", || self.inner.delete_document(id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct Flaky {
        calls: AtomicU32,
        failures: Mutex<Vec<Error>>,
        stall: Option<Duration>,
    }

    impl Flaky {
        fn failing_with(failures: Vec<Error>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures: Mutex::new(failures),
                stall: None,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteClient for Flaky {
        async fn get_document(&self, id: &DocumentId) -> Result<Option<RemoteDocument>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            let next = self.failures.lock().unwrap().pop();
            match next {
                Some(error) => Err(error),
                None => Ok(Some(RemoteDocument {
                    id: id.clone(),
                    content: "ok".into(),
                    modified_at: chrono::Utc::now(),
                    derived_path: "doc".into(),
                    trashed: false,
                })),
            }
        }

        async fn list_documents(&self, _folder_scope: &str) -> Result<Vec<RemoteDocument>> {
            Ok(Vec::new())
        }

        async fn create_document(&self, _: &str, _: &str, _: &str) -> Result<DocumentId> {
            Ok(DocumentId::new("new"))
        }

        async fn update_document(&self, _: &DocumentId, _: &str) -> Result<()> {
            Ok(())
        }

        async fn move_document(&self, _: &DocumentId, _: &str, _: &str) -> Result<()> {
            Ok(())
        }

        async fn delete_document(&self, _: &DocumentId) -> Result<()> {
            Ok(())
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        let retry = RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        };
        RetryPolicy::new(retry, Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let remote = RetryingRemote::new(
            Flaky::failing_with(vec![Error::network("reset"), Error::network("reset")]),
            policy(3),
        );

        let doc = remote.get_document(&DocumentId::new("R1")).await.unwrap();
        assert!(doc.is_some());
        assert_eq!(remote.inner().calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let remote = RetryingRemote::new(
            Flaky::failing_with(vec![Error::network("down"); 5]),
            policy(2),
        );

        let error = remote.get_document(&DocumentId::new("R1")).await.unwrap_err();
        assert!(error.should_retry());
        assert_eq!(remote.inner().calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_are_not_retried() {
        let remote = RetryingRemote::new(
            Flaky::failing_with(vec![Error::authentication("expired")]),
            policy(3),
        );

        let error = remote.get_document(&DocumentId::new("R1")).await.unwrap_err();
        assert!(error.is_fatal_to_pass());
        assert_eq!(remote.inner().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_wait_is_honoured() {
        let remote = RetryingRemote::new(
            Flaky::failing_with(vec![Error::RateLimited {
                retry_after_ms: Some(4_000),
            }]),
            policy(1),
        );

        let started = tokio::time::Instant::now();
        remote.get_document(&DocumentId::new("R1")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_calls_time_out() {
        let mut flaky = Flaky::failing_with(Vec::new());
        flaky.stall = Some(Duration::from_secs(10));
        let remote = RetryingRemote::new(flaky, policy(1));

        let error = remote.get_document(&DocumentId::new("R1")).await.unwrap_err();
        assert!(matches!(error, Error::Timeout { seconds: 1 }));
        assert_eq!(remote.inner().calls(), 2);
    }

    #[test]
    fn test_backoff_grows_and_respects_minimum() {
        let policy = policy(3);
        let network = Error::network("x");
        assert_eq!(policy.backoff(0, &network), Duration::from_millis(100));
        assert_eq!(policy.backoff(2, &network), Duration::from_millis(400));

        let limited = Error::RateLimited {
            retry_after_ms: Some(2_000),
        };
        assert_eq!(policy.backoff(0, &limited), Duration::from_secs(2));
    }
}
