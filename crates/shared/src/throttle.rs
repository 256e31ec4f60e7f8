use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::timezone::next_local_midnight_utc;

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Time to regain one token.
    pub refill_interval: Duration,
    pub burst: u32,
    /// Requests allowed across all sources per local day. Zero disables the quota.
    pub daily_limit: u64,
    pub quota_time_zone: String,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            refill_interval: Duration::from_secs(1),
            burst: 3,
            daily_limit: 500,
            quota_time_zone: "America/Los_Angeles".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleScope {
    Daily,
    Source,
}

impl ThrottleScope {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Source => "source",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleRejection {
    pub scope: ThrottleScope,
    pub retry_after: Duration,
}

impl ThrottleRejection {
    /// Whole seconds for the `Retry-After` header, never zero.
    pub fn retry_after_seconds(&self) -> u64 {
        let whole = self.retry_after.as_secs();
        let rounded = if self.retry_after.subsec_nanos() > 0 {
            whole.saturating_add(1)
        } else {
            whole
        };
        rounded.max(1)
    }
}

#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Clone, Copy)]
struct DailyQuota {
    used: u64,
    resets_at: Option<DateTime<Utc>>,
}

/// Per-source token buckets behind a process-wide daily budget.
#[derive(Debug, Clone)]
pub struct Throttle {
    config: Arc<ThrottleConfig>,
    buckets: Arc<Mutex<HashMap<String, TokenBucket>>>,
    daily: Arc<Mutex<DailyQuota>>,
}

impl Throttle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config: Arc::new(config),
            buckets: Arc::new(Mutex::new(HashMap::new())),
            daily: Arc::new(Mutex::new(DailyQuota {
                used: 0,
                resets_at: None,
            })),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    pub fn check(&self, source: &str) -> Result<(), ThrottleRejection> {
        self.check_at(source, Instant::now(), Utc::now())
    }

    /// Admits one request from `source`. The daily budget is evaluated first, and
    /// is only charged when the source bucket also admits the request.
    pub fn check_at(
        &self,
        source: &str,
        now: Instant,
        now_utc: DateTime<Utc>,
    ) -> Result<(), ThrottleRejection> {
        let mut daily = lock(&self.daily);
        let resets_at = match daily.resets_at {
            Some(resets_at) if now_utc < resets_at => resets_at,
            _ => {
                let next = next_local_midnight_utc(now_utc, &self.config.quota_time_zone);
                if daily.resets_at.is_some() {
                    debug!(previous_used = daily.used, "daily chat quota reset");
                }
                daily.used = 0;
                daily.resets_at = Some(next);
                next
            }
        };

        if self.config.daily_limit > 0 && daily.used >= self.config.daily_limit {
            let retry_after = (resets_at - now_utc).to_std().unwrap_or(Duration::ZERO);
            warn!(
                limit = self.config.daily_limit,
                retry_after_seconds = retry_after.as_secs(),
                "daily chat quota exhausted"
            );
            return Err(ThrottleRejection {
                scope: ThrottleScope::Daily,
                retry_after,
            });
        }

        self.take_token(source, now)?;
        daily.used = daily.used.saturating_add(1);
        Ok(())
    }

    fn take_token(&self, source: &str, now: Instant) -> Result<(), ThrottleRejection> {
        let burst = f64::from(self.config.burst);
        let interval = self.config.refill_interval.as_secs_f64();
        let mut buckets = lock(&self.buckets);
        let bucket = buckets.entry(source.to_string()).or_insert(TokenBucket {
            tokens: burst,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        if interval > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed / interval).min(burst);
        }
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let missing = 1.0 - bucket.tokens;
        Err(ThrottleRejection {
            scope: ThrottleScope::Source,
            retry_after: Duration::from_secs_f64(missing * interval),
        })
    }

    pub fn daily_used(&self) -> u64 {
        lock(&self.daily).used
    }

    pub fn tracked_sources(&self) -> usize {
        lock(&self.buckets).len()
    }

    /// Drops buckets that have refilled completely since their last use.
    pub fn prune_idle(&self, now: Instant) {
        let full_after = self
            .config
            .refill_interval
            .saturating_mul(self.config.burst);
        lock(&self.buckets)
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < full_after);
    }

    pub fn spawn_pruner(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let throttle = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                throttle.prune_idle(Instant::now());
            }
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
