//! Exponential backoff shared by every external call (LLM, search, embedding).

use std::future::Future;
use std::time::Duration;

use paracite_common::{PipelineError, Result, ServiceError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fraction of the delay randomly added or removed, in [0, 1].
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts()  -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 500 }
fn default_max_delay_ms()  -> u64 { 8000 }
fn default_jitter()        -> f64 { 0.25 }

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts:  default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms:  default_max_delay_ms(),
            jitter:        default_jitter(),
        }
    }
}

impl BackoffPolicy {
    /// No sleeping between attempts. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts, base_delay_ms: 0, max_delay_ms: 0, jitter: 0.0 }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(PipelineError::Config("backoff.max_attempts must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(PipelineError::Config("backoff.jitter must be within [0, 1]".into()));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`,
    /// capped, then jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay_ms.saturating_mul(1u64 << attempt.min(32));
        let capped = exp.min(self.max_delay_ms) as f64;
        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            (capped * (1.0 + spread)).max(0.0)
        } else {
            capped
        };
        Duration::from_millis(jittered.round() as u64)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. Sleeps between attempts abort on cancellation.
    pub async fn retry<T, F, Fut>(
        &self,
        op_name: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> std::result::Result<T, ServiceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, ServiceError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ServiceError::Cancelled);
            }
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
                r = op(attempt) => r,
            };
            match outcome {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.delay_for(attempt);
                    debug!(op = op_name, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(op = op_name, attempts, error = %e, "Giving up after retries");
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = BackoffPolicy { max_attempts: 5, base_delay_ms: 100, max_delay_ms: 350, jitter: 0.0 };
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(350));
        assert_eq!(p.delay_for(40), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_within_band() {
        let p = BackoffPolicy { max_attempts: 3, base_delay_ms: 1000, max_delay_ms: 8000, jitter: 0.25 };
        for _ in 0..50 {
            let d = p.delay_for(0).as_millis();
            assert!((750..=1250).contains(&d), "delay {d} outside jitter band");
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let out = BackoffPolicy::immediate(3)
            .retry("test", &token, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 { Err(ServiceError::Network("reset".into())) } else { Ok(n) }
                }
            })
            .await;
        assert_eq!(out, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let out: std::result::Result<(), _> = BackoffPolicy::immediate(3)
            .retry("test", &token, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ServiceError::RateLimited("429".into())) }
            })
            .await;
        assert!(matches!(out, Err(ServiceError::RateLimited(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_schema_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let out: std::result::Result<(), _> = BackoffPolicy::immediate(3)
            .retry("test", &token, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ServiceError::Schema("bad".into())) }
            })
            .await;
        assert!(matches!(out, Err(ServiceError::Schema(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff_sleep() {
        let token = CancellationToken::new();
        let policy = BackoffPolicy { max_attempts: 3, base_delay_ms: 60_000, max_delay_ms: 60_000, jitter: 0.0 };
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });
        let out: std::result::Result<(), _> = policy
            .retry("test", &token, |_| async { Err(ServiceError::Network("down".into())) })
            .await;
        assert_eq!(out, Err(ServiceError::Cancelled));
    }
}
