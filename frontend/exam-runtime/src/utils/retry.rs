use std::fmt::Display;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(2),
            jitter_max: Some(Duration::from_millis(100)),
        }
    }
}

impl RetryConfig {
    fn backoff_for(&self, current: Duration) -> Duration {
        match self.jitter_max {
            Some(jitter_max) if !jitter_max.is_zero() => {
                let jitter_ms = jitter_max.as_millis() as u64;
                current + Duration::from_millis(rand::random::<u64>() % (jitter_ms + 1))
            }
            _ => current,
        }
    }
}

/// Retries `f` with exponential backoff, logging every failed attempt under
/// `label`. Errors `retryable` rejects are returned at once.
pub async fn retry_async_with_config<F, Fut, T, E, P>(
    label: &str,
    config: RetryConfig,
    retryable: P,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    let mut backoff = config.base_backoff;

    loop {
        attempt += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if !retryable(&e) {
                    tracing::warn!(operation = label, attempt, error = %e, "not retryable");
                    return Err(e);
                }
                if attempt >= config.max_attempts.max(1) {
                    tracing::warn!(operation = label, attempt, error = %e, "giving up");
                    return Err(e);
                }

                let wait = config.backoff_for(backoff);
                tracing::warn!(
                    operation = label,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(wait).await;

                backoff = std::cmp::min(backoff * 2, config.max_backoff);
            }
        }
    }
}
