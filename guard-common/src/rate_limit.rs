//! Token-bucket rate limiting for outbound calls to the GitLab, Datadog,
//! and cloud-provider APIs. Purely in-process: each remote a single
//! orchestrator process talks to gets its own bucket, and there is no
//! cross-process sharing requirement in this system.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Clone, Copy, Debug)]
pub struct RateLimiterConfig {
    /// Requests allowed per minute; also the bucket's capacity.
    pub requests_per_minute: u32,
    /// How long `acquire` will wait for a token before giving up.
    pub max_wait: Duration,
}

impl RateLimiterConfig {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            max_wait: Duration::from_secs(120),
        }
    }
}

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(config: RateLimiterConfig) -> Self {
        let capacity = config.requests_per_minute as f64;
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("rate limit wait exceeded {0:?} for remote '{1}'")]
pub struct RateLimitTimeout(pub Duration, pub String);

/// One bucket per named remote (`gitlab_api`, `datadog_api`, `aws_api`, ...).
/// Buckets are created lazily on first use, each with its own config.
pub struct RateLimiter {
    configs: HashMap<String, RateLimiterConfig>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(configs: HashMap<String, RateLimiterConfig>) -> Self {
        Self {
            configs,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Waits, polling at a fixed short interval, until a token for `remote`
    /// is available or `max_wait` elapses, whichever comes first. Remotes
    /// with no configured bucket are unthrottled.
    pub async fn acquire(&self, remote: &str) -> Result<(), RateLimitTimeout> {
        let Some(config) = self.configs.get(remote).copied() else {
            return Ok(());
        };

        let deadline = Instant::now() + config.max_wait;
        loop {
            let now = Instant::now();
            {
                let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
                let bucket = buckets
                    .entry(remote.to_string())
                    .or_insert_with(|| Bucket::new(config));
                if bucket.try_take(now) {
                    return Ok(());
                }
            }
            if now >= deadline {
                return Err(RateLimitTimeout(config.max_wait, remote.to_string()));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
