use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::RetryConfig;

/// Exponential backoff for start-up dependencies (model runtime, Neo4j).
/// Graph generation itself is never retried.
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    /// Run `f` until it succeeds or `max_retries` further attempts have failed,
    /// doubling the pause between attempts up to `max_backoff`.
    pub async fn retry<F, Fut, T, E>(&self, dependency: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(dependency, attempts = attempt, "dependency ready after retries");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if attempt > self.max_retries {
                warn!(dependency, attempts = attempt, error = %err, "giving up on dependency");
                return Err(err);
            }

            warn!(
                dependency,
                attempt,
                max_retries = self.max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "dependency not ready, retrying"
            );
            sleep(backoff).await;
            backoff = (backoff * 2).min(self.max_backoff);
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.initial_backoff_ms, config.max_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let policy = RetryPolicy::new(3, 1, 4);
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;

        let result: Result<&str, String> = policy
            .retry("engine initialization", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("runtime not up yet".to_string())
                } else {
                    Ok("ready")
                }
            })
            .await;

        assert_eq!(result, Ok("ready"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let policy = RetryPolicy::new(2, 1, 2);
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;

        let result: Result<(), String> = policy
            .retry("neo4j connect", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("refused".to_string())
            })
            .await;

        assert_eq!(result, Err("refused".to_string()));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
