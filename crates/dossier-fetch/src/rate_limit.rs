use dashmap::DashMap;
use dossier_core::{DossierError, Result};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Backoff parameters applied when a source reports `rate_limited`.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    pub jitter_frac: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(300),
            jitter_frac: 0.2,
        }
    }
}

/// Whether an acquisition waits for capacity or fails immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    Block,
    FailFast,
}

/// Per-source token accounting over a rolling hour with per-minute
/// smoothing, plus the exponential backoff window.
struct BucketState {
    hour_window: VecDeque<Instant>,
    minute_window: VecDeque<Instant>,
    backoff_until: Option<Instant>,
    consecutive_failures: u32,
}

struct SourceBucket {
    limit_per_hour: u32,
    limit_per_minute: u32,
    /// FIFO fairness: waiters pass through this queue-ordered mutex.
    gate: tokio::sync::Mutex<()>,
    state: Mutex<BucketState>,
}

impl SourceBucket {
    fn new(limit_per_hour: u32) -> Self {
        let limit_per_minute = limit_per_hour.div_ceil(60).max(1);
        Self {
            limit_per_hour,
            limit_per_minute,
            gate: tokio::sync::Mutex::new(()),
            state: Mutex::new(BucketState {
                hour_window: VecDeque::new(),
                minute_window: VecDeque::new(),
                backoff_until: None,
                consecutive_failures: 0,
            }),
        }
    }

    /// Time until a token frees up, or zero when one is available now.
    /// Caller must hold the gate; on zero the acquisition is recorded.
    fn try_take(&self, now: Instant) -> Duration {
        let mut state = self.state.lock();

        if let Some(until) = state.backoff_until {
            if now < until {
                return until - now;
            }
            state.backoff_until = None;
        }

        while let Some(&front) = state.hour_window.front() {
            if now.duration_since(front) >= Duration::from_secs(3600) {
                state.hour_window.pop_front();
            } else {
                break;
            }
        }
        while let Some(&front) = state.minute_window.front() {
            if now.duration_since(front) >= Duration::from_secs(60) {
                state.minute_window.pop_front();
            } else {
                break;
            }
        }

        if state.hour_window.len() >= self.limit_per_hour as usize {
            let oldest = *state.hour_window.front().expect("window non-empty");
            return oldest + Duration::from_secs(3600) - now;
        }
        if state.minute_window.len() >= self.limit_per_minute as usize {
            let oldest = *state.minute_window.front().expect("window non-empty");
            return oldest + Duration::from_secs(60) - now;
        }

        state.hour_window.push_back(now);
        state.minute_window.push_back(now);
        Duration::ZERO
    }
}

/// Process-wide rate-limit controller; one token bucket per source, sized
/// to the source's declared hourly budget.
pub struct RateLimitController {
    buckets: DashMap<String, Arc<SourceBucket>>,
    backoff: BackoffConfig,
}

impl RateLimitController {
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            backoff,
        }
    }

    fn bucket(&self, source: &str, limit_per_hour: u32) -> Arc<SourceBucket> {
        self.buckets
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(SourceBucket::new(limit_per_hour.max(1))))
            .clone()
    }

    /// Acquire one request slot for `source`. `Block` waits FIFO behind
    /// earlier callers up to `deadline`; `FailFast` returns `rate_limited`
    /// when no slot is immediately available.
    pub async fn acquire(
        &self,
        source: &str,
        limit_per_hour: u32,
        mode: AcquireMode,
        deadline: Instant,
    ) -> Result<()> {
        let bucket = self.bucket(source, limit_per_hour);

        match mode {
            AcquireMode::FailFast => {
                // still FIFO against blocked waiters: no queue jumping
                let Ok(_gate) = bucket.gate.try_lock() else {
                    return Err(self.rate_limited_error(source, &bucket));
                };
                let wait = bucket.try_take(Instant::now());
                if wait.is_zero() {
                    Ok(())
                } else {
                    Err(self.rate_limited_error(source, &bucket))
                }
            }
            AcquireMode::Block => {
                let _gate = tokio::select! {
                    biased;
                    gate = bucket.gate.lock() => gate,
                    _ = tokio::time::sleep_until(deadline) => {
                        return Err(DossierError::Timeout(Duration::ZERO));
                    }
                };
                loop {
                    let now = Instant::now();
                    let wait = bucket.try_take(now);
                    if wait.is_zero() {
                        return Ok(());
                    }
                    let wake = now + wait;
                    if wake > deadline {
                        debug!(source, ?wait, "rate-limit wait exceeds deadline");
                        return Err(DossierError::Timeout(deadline - now));
                    }
                    tokio::time::sleep_until(wake).await;
                }
            }
        }
    }

    fn rate_limited_error(&self, source: &str, bucket: &SourceBucket) -> DossierError {
        let state = bucket.state.lock();
        let retry_after_secs = state
            .backoff_until
            .map(|until| until.saturating_duration_since(Instant::now()).as_secs())
            .unwrap_or(60);
        DossierError::RateLimited {
            source_id: source.to_string(),
            retry_after_secs,
        }
    }

    /// A successful request after backoff resets the exponent.
    pub fn record_success(&self, source: &str) {
        if let Some(bucket) = self.buckets.get(source) {
            bucket.state.lock().consecutive_failures = 0;
        }
    }

    /// Source answered 429 / `rate_limited`: open (or widen) the backoff
    /// window. Returns the window length.
    pub fn record_rate_limited(&self, source: &str, limit_per_hour: u32) -> Duration {
        let bucket = self.bucket(source, limit_per_hour);
        let mut state = bucket.state.lock();
        state.consecutive_failures += 1;

        let exponent = state.consecutive_failures.saturating_sub(1).min(16);
        let raw = self.backoff.base.as_secs_f64() * self.backoff.factor.powi(exponent as i32);
        let capped = raw.min(self.backoff.cap.as_secs_f64());
        let jitter = 1.0
            + rand::thread_rng().gen_range(-self.backoff.jitter_frac..=self.backoff.jitter_frac);
        let window = Duration::from_secs_f64((capped * jitter).max(0.05));

        state.backoff_until = Some(Instant::now() + window);
        warn!(
            source,
            failures = state.consecutive_failures,
            window_secs = window.as_secs_f64(),
            "rate-limit backoff window set"
        );
        window
    }

    /// Acquisitions recorded for `source` in the current rolling hour.
    pub fn acquisitions_last_hour(&self, source: &str) -> usize {
        match self.buckets.get(source) {
            Some(bucket) => {
                let now = Instant::now();
                let state = bucket.state.lock();
                state
                    .hour_window
                    .iter()
                    .filter(|t| now.duration_since(**t) < Duration::from_secs(3600))
                    .count()
            }
            None => 0,
        }
    }
}

impl Default for RateLimitController {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(3600 * 4)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hourly_budget_enforced() {
        let controller = RateLimitController::default();
        // 60/hr smooths to 1/minute
        for i in 0..60 {
            controller
                .acquire("x", 60, AcquireMode::Block, far_deadline())
                .await
                .unwrap_or_else(|e| panic!("acquisition {} failed: {}", i, e));
        }
        assert_eq!(controller.acquisitions_last_hour("x"), 60);

        // 61st must wait for the rolling hour to free a slot
        let before = Instant::now();
        controller
            .acquire("x", 60, AcquireMode::Block, far_deadline())
            .await
            .unwrap();
        assert!(Instant::now() - before >= Duration::from_secs(1));
        assert!(controller.acquisitions_last_hour("x") <= 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_minute_smoothing() {
        let controller = RateLimitController::default();
        // 120/hr -> 2 per minute
        let start = Instant::now();
        for _ in 0..4 {
            controller
                .acquire("s", 120, AcquireMode::Block, far_deadline())
                .await
                .unwrap();
        }
        // the 3rd and 4th acquisitions had to wait out the minute window
        assert!(Instant::now() - start >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_when_exhausted() {
        let controller = RateLimitController::default();
        controller
            .acquire("y", 1, AcquireMode::Block, far_deadline())
            .await
            .unwrap();
        let err = controller
            .acquire("y", 1, AcquireMode::FailFast, far_deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, DossierError::RateLimited { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_window_blocks_then_clears() {
        let controller = RateLimitController::default();
        let window = controller.record_rate_limited("z", 1000);
        assert!(window >= Duration::from_millis(800)); // 1s base, -20% jitter floor

        let err = controller
            .acquire("z", 1000, AcquireMode::FailFast, far_deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, DossierError::RateLimited { .. }));

        // blocking acquisition rides out the window
        controller
            .acquire("z", 1000, AcquireMode::Block, far_deadline())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_exponent_grows_and_resets() {
        let controller = RateLimitController::new(BackoffConfig {
            jitter_frac: 0.0,
            ..Default::default()
        });
        let w1 = controller.record_rate_limited("w", 1000);
        let w2 = controller.record_rate_limited("w", 1000);
        let w3 = controller.record_rate_limited("w", 1000);
        assert!(w2 >= w1 * 2 - Duration::from_millis(50));
        assert!(w3 >= w2 * 2 - Duration::from_millis(50));

        controller.record_success("w");
        let after_reset = controller.record_rate_limited("w", 1000);
        assert!(after_reset <= w1 + Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_cap() {
        let controller = RateLimitController::new(BackoffConfig {
            jitter_frac: 0.0,
            ..Default::default()
        });
        for _ in 0..20 {
            controller.record_rate_limited("cap", 1000);
        }
        let window = controller.record_rate_limited("cap", 1000);
        assert!(window <= Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_fairness() {
        let controller = Arc::new(RateLimitController::default());
        // 2/hr: the first caller takes the slot, the rest queue
        controller
            .acquire("fifo", 2, AcquireMode::Block, far_deadline())
            .await
            .unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3u32 {
            let controller = Arc::clone(&controller);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                controller
                    .acquire("fifo", 2, AcquireMode::Block, far_deadline())
                    .await
                    .unwrap();
                order.lock().push(i);
            }));
            // give each task a chance to enqueue before the next spawns
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }
}
