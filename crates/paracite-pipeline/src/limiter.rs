//! Token-bucket limiter for one external service, shared by all workers.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use paracite_common::{PipelineError, Result, ServiceError};
use tracing::warn;

#[derive(Clone)]
pub struct ServiceLimiter {
    name: &'static str,
    inner: Arc<DefaultDirectRateLimiter>,
    max_wait: Duration,
}

impl ServiceLimiter {
    /// `rps` may be fractional (0.33 is one request every ~3 s). Bursts are
    /// capped at one request or `rps`, whichever is larger.
    pub fn new(name: &'static str, rps: f64, max_wait: Duration) -> Result<Self> {
        if !(rps > 0.0) || !rps.is_finite() {
            return Err(PipelineError::Config(format!("{name}: rate limit must be positive")));
        }
        let period = Duration::from_secs_f64(1.0 / rps);
        let burst = NonZeroU32::new(rps.floor().max(1.0) as u32).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(period)
            .ok_or_else(|| PipelineError::Config(format!("{name}: rate limit too high")))?
            .allow_burst(burst);
        Ok(Self { name, inner: Arc::new(RateLimiter::direct(quota)), max_wait })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for a permit. Waiting longer than `max_wait` is reported as a
    /// rate-limit signal so the backoff policy can take over.
    pub async fn acquire(&self) -> std::result::Result<(), ServiceError> {
        match tokio::time::timeout(self.max_wait, self.inner.until_ready()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                warn!(service = self.name, wait_s = self.max_wait.as_secs_f64(), "Limiter wait exceeded");
                Err(ServiceError::RateLimited(format!(
                    "{} limiter: no permit within {:?}",
                    self.name, self.max_wait
                )))
            }
        }
    }
}

impl std::fmt::Debug for ServiceLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceLimiter")
            .field("name", &self.name)
            .field("max_wait", &self.max_wait)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_positive_rate() {
        assert!(ServiceLimiter::new("llm", 0.0, Duration::from_secs(1)).is_err());
        assert!(ServiceLimiter::new("llm", -1.0, Duration::from_secs(1)).is_err());
        assert!(ServiceLimiter::new("llm", f64::NAN, Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_first_permit_is_immediate() {
        let l = ServiceLimiter::new("search", 1.0, Duration::from_millis(50)).unwrap();
        assert!(l.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_exhausted_bucket_times_out_as_rate_limit() {
        // One permit every ~100 s; the second call cannot be served in 20 ms.
        let l = ServiceLimiter::new("search", 0.01, Duration::from_millis(20)).unwrap();
        l.acquire().await.unwrap();
        let err = l.acquire().await.unwrap_err();
        assert!(err.is_rate_limit());
    }

    #[tokio::test]
    async fn test_clones_share_one_bucket() {
        let a = ServiceLimiter::new("llm", 0.01, Duration::from_millis(20)).unwrap();
        let b = a.clone();
        a.acquire().await.unwrap();
        assert!(b.acquire().await.is_err());
    }
}
