use std::future::Future;
use std::time::Duration;

/// Retry parameters: `max_attempts` total tries, `base_delay` before the
/// second try, multiplied by `multiplier` after each failure.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier,
        }
    }
}

/// Run `op` until it succeeds or the attempt budget is spent, sleeping with
/// exponential backoff between attempts. The final failure is returned to
/// the caller unchanged.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut delay = policy.base_delay;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt == attempts => {
                log::error!("{} failed after {} attempts: {}", label, attempts, e);
                return Err(e);
            }
            Err(e) => {
                log::warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:.1}s...",
                    label,
                    attempt,
                    attempts,
                    e,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(policy.multiplier);
            }
        }
    }

    unreachable!("retry loop always returns")
}
