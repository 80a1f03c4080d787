//! Adaptive Rate Limiter (§4.3): multi-tier token buckets with lazy refill
//! and FIFO-per-tier admission.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// `(capacity, refillTokens, intervalMs)` — the static shape of a tier (§3).
#[derive(Debug, Clone, Copy)]
pub struct TierConfig {
    pub capacity: f64,
    pub refill_tokens: f64,
    pub interval_ms: u64,
}

impl TierConfig {
    pub fn new(capacity: f64, refill_tokens: f64, interval_ms: u64) -> Self {
        Self {
            capacity,
            refill_tokens,
            interval_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TierMetrics {
    pub requests: u64,
    pub throttled: u64,
    pub total_wait: Duration,
    pub waits_observed: u64,
}

impl TierMetrics {
    pub fn average_wait(&self) -> Duration {
        if self.waits_observed == 0 {
            Duration::ZERO
        } else {
            self.total_wait / self.waits_observed as u32
        }
    }
}

struct Bucket {
    config: TierConfig,
    tokens_available: f64,
    last_refill: Instant,
    metrics: TierMetrics,
    /// Arrival-ordered queue; front is served next, enforcing the FIFO
    /// ordering guarantee from §5.
    waiters: std::collections::VecDeque<Arc<Notify>>,
}

impl Bucket {
    fn new(config: TierConfig) -> Self {
        Self {
            config,
            tokens_available: config.capacity,
            last_refill: Instant::now(),
            metrics: TierMetrics::default(),
            waiters: std::collections::VecDeque::new(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let added = self.config.refill_tokens * (elapsed.as_secs_f64() * 1000.0)
            / self.config.interval_ms as f64;
        self.tokens_available = (self.tokens_available + added).min(self.config.capacity);
        self.last_refill = now;
    }

    fn time_until_available(&self, cost: f64) -> Duration {
        let deficit = cost - self.tokens_available;
        if deficit <= 0.0 {
            return Duration::ZERO;
        }
        let ms = deficit * self.config.interval_ms as f64 / self.config.refill_tokens;
        Duration::from_secs_f64((ms / 1000.0).max(0.0))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    Granted,
    Throttled,
}

/// One coarse lock guards every tier, per §5's "single coarse lock per
/// component" guidance.
pub struct RateLimiter {
    tiers: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(configs: HashMap<String, TierConfig>) -> Self {
        let tiers = configs
            .into_iter()
            .map(|(name, cfg)| (name, Bucket::new(cfg)))
            .collect();
        Self {
            tiers: Mutex::new(tiers),
        }
    }

    /// Replaces a tier's configuration atomically. Per §4.3, replacement
    /// resets neither counters nor bucket fill.
    pub fn reconfigure(&self, tier: &str, config: TierConfig) {
        let mut tiers = self.tiers.lock();
        match tiers.get_mut(tier) {
            Some(bucket) => bucket.config = config,
            None => {
                tiers.insert(tier.to_string(), Bucket::new(config));
            }
        }
    }

    pub fn metrics(&self, tier: &str) -> Option<TierMetrics> {
        self.tiers.lock().get(tier).map(|b| b.metrics)
    }

    pub fn tokens_available(&self, tier: &str) -> Option<f64> {
        let mut tiers = self.tiers.lock();
        let bucket = tiers.get_mut(tier)?;
        bucket.refill(Instant::now());
        Some(bucket.tokens_available)
    }

    /// `acquire(tier, cost, maxWaitMs)` (§4.3). Waiters on the same tier are
    /// served in FIFO arrival order: a caller registers exactly one notify
    /// handle for the whole call, before checking tokens, so a later
    /// arriver never bypasses an earlier one even if it would otherwise
    /// have enough tokens. Once at the front of the line it sleeps and
    /// re-checks rather than re-registering, so its position and notify
    /// handle never change underneath it.
    pub async fn acquire(&self, tier: &str, cost: f64, max_wait: Duration) -> Admission {
        let started = Instant::now();
        let deadline = started + max_wait;
        let notify = Arc::new(Notify::new());
        let mut registered = false;

        loop {
            let (is_front, wait, tokens_ok) = {
                let mut tiers = self.tiers.lock();
                let bucket = tiers
                    .entry(tier.to_string())
                    .or_insert_with(|| Bucket::new(TierConfig::new(0.0, 0.0, 1)));
                bucket.refill(Instant::now());

                if !registered {
                    bucket.metrics.requests += 1;
                    if bucket.waiters.is_empty() && bucket.tokens_available >= cost {
                        bucket.tokens_available -= cost;
                        trace!(tier, cost, "rate limiter admitted immediately");
                        return Admission::Granted;
                    }
                    bucket.waiters.push_back(notify.clone());
                    registered = true;
                }

                let is_front = bucket.waiters.front().map(Arc::as_ptr) == Some(Arc::as_ptr(&notify));
                let wait = if is_front {
                    bucket.time_until_available(cost)
                } else {
                    Duration::ZERO
                };
                let tokens_ok = is_front && bucket.tokens_available >= cost;
                (is_front, wait, tokens_ok)
            };

            if tokens_ok {
                let mut tiers = self.tiers.lock();
                let bucket = tiers.get_mut(tier).expect("tier present");
                bucket.tokens_available -= cost;
                bucket.waiters.pop_front();
                bucket.metrics.waits_observed += 1;
                bucket.metrics.total_wait += started.elapsed();
                if let Some(next) = bucket.waiters.front() {
                    next.notify_one();
                }
                return Admission::Granted;
            }

            let now = Instant::now();
            if now >= deadline {
                self.abandon_wait(tier, &notify);
                let mut tiers = self.tiers.lock();
                if let Some(bucket) = tiers.get_mut(tier) {
                    bucket.metrics.throttled += 1;
                }
                debug!(tier, "rate limiter throttled: deadline exceeded");
                return Admission::Throttled;
            }

            let remaining = deadline.saturating_duration_since(now);
            if is_front {
                // Front of the line: sleep until tokens should be available
                // and re-check, rather than re-registering a new notify.
                tokio::time::sleep(wait.min(remaining)).await;
            } else {
                // Not our turn yet; wait to be woken by the previous
                // holder's pop_front, bounded by our own deadline.
                let _ = tokio::time::timeout(remaining, notify.notified()).await;
            }
        }
    }

    fn abandon_wait(&self, tier: &str, notify: &Arc<Notify>) {
        let mut tiers = self.tiers.lock();
        if let Some(bucket) = tiers.get_mut(tier) {
            bucket
                .waiters
                .retain(|w| !Arc::ptr_eq(w, notify));
            if let Some(next) = bucket.waiters.front() {
                next.notify_one();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_with(capacity: f64, refill: f64, interval_ms: u64) -> RateLimiter {
        let mut tiers = HashMap::new();
        tiers.insert("write".to_string(), TierConfig::new(capacity, refill, interval_ms));
        RateLimiter::new(tiers)
    }

    #[tokio::test(start_paused = true)]
    async fn grants_up_to_capacity_immediately() {
        let limiter = limiter_with(2.0, 1.0, 60_000);
        assert_eq!(
            limiter.acquire("write", 1.0, Duration::from_millis(0)).await,
            Admission::Granted
        );
        assert_eq!(
            limiter.acquire("write", 1.0, Duration::from_millis(0)).await,
            Admission::Granted
        );
    }

    #[tokio::test(start_paused = true)]
    async fn third_caller_waits_for_refill() {
        let limiter = Arc::new(limiter_with(2.0, 1.0, 60_000));
        limiter.acquire("write", 1.0, Duration::ZERO).await;
        limiter.acquire("write", 1.0, Duration::ZERO).await;

        let l2 = limiter.clone();
        let handle = tokio::spawn(async move {
            l2.acquire("write", 1.0, Duration::from_secs(120)).await
        });

        tokio::time::advance(Duration::from_secs(61)).await;
        let result = handle.await.unwrap();
        assert_eq!(result, Admission::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn exceeding_deadline_throttles() {
        let limiter = limiter_with(1.0, 1.0, 60_000);
        limiter.acquire("write", 1.0, Duration::ZERO).await;
        let result = limiter.acquire("write", 1.0, Duration::from_millis(10)).await;
        assert_eq!(result, Admission::Throttled);
        assert_eq!(limiter.metrics("write").unwrap().throttled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fifo_arrival_order_is_preserved() {
        let limiter = Arc::new(limiter_with(1.0, 1.0, 60_000));
        limiter.acquire("write", 1.0, Duration::ZERO).await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let (l1, o1) = (limiter.clone(), order.clone());
        let first = tokio::spawn(async move {
            l1.acquire("write", 1.0, Duration::from_secs(120)).await;
            o1.lock().push(1);
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        let (l2, o2) = (limiter.clone(), order.clone());
        let second = tokio::spawn(async move {
            l2.acquire("write", 1.0, Duration::from_secs(120)).await;
            o2.lock().push(2);
        });

        tokio::time::advance(Duration::from_secs(121)).await;
        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(*order.lock(), vec![1, 2]);
    }
}
