//! Two-bucket sliding-window rate controller with reactive exponential
//! backoff.
//!
//! Grounded in the teacher's own sliding-window throttler
//! (`src/utils/throttler.rs`): a `VecDeque<Instant>` history, pruned from the
//! front, with a blocking `throttle()` call. This generalizes that single
//! bucket into an `{api, media}` pair, adds the reactive-backoff half
//! (`Observe`), and makes the sleep interruptible.

use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Named buckets; quotas never cross-pollinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Api,
    Media,
}

#[derive(Debug, Clone)]
pub struct BucketParams {
    pub limit: usize,
    pub window: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
    pub request_interval: Duration,
}

impl BucketParams {
    /// Defaults for the `api` bucket: 30 req / 600 s.
    pub fn api_default() -> Self {
        Self {
            limit: 30,
            window: Duration::from_secs(600),
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
            jitter_ratio: 0.2,
            request_interval: Duration::from_millis(0),
        }
    }

    /// Defaults for the `media` bucket, matching the api bucket's observed
    /// ceiling.
    pub fn media_default() -> Self {
        Self {
            limit: 30,
            window: Duration::from_secs(600),
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
            jitter_ratio: 0.2,
            request_interval: Duration::from_millis(0),
        }
    }
}

struct BucketState {
    params: BucketParams,
    history: VecDeque<Instant>,
    last_request: Option<Instant>,
    consecutive_failures: u32,
    /// One-shot delay armed by `Observe` on a rate-limit status; consumed by
    /// the next `WaitBefore` call.
    armed_delay: Option<Duration>,
}

impl BucketState {
    fn new(params: BucketParams) -> Self {
        Self {
            params,
            history: VecDeque::new(),
            last_request: None,
            consecutive_failures: 0,
            armed_delay: None,
        }
    }

    /// Computes the smallest non-negative sleep such that, after sleeping,
    /// both the sliding-window count and the request-interval constraint
    /// hold.
    fn compute_wait(&mut self, now: Instant) -> Duration {
        while let Some(&oldest) = self.history.front() {
            if now.saturating_duration_since(oldest) >= self.params.window {
                self.history.pop_front();
            } else {
                break;
            }
        }

        let mut wait = Duration::ZERO;

        if let Some(armed) = self.armed_delay.take() {
            wait = wait.max(armed);
        }

        if self.history.len() >= self.params.limit {
            if let Some(&oldest) = self.history.front() {
                let window_wait = self.params.window.saturating_sub(now.saturating_duration_since(oldest));
                wait = wait.max(window_wait);
            }
        }

        if let Some(last) = self.last_request {
            let since_last = now.saturating_duration_since(last);
            if since_last < self.params.request_interval {
                wait = wait.max(self.params.request_interval - since_last);
            }
        }

        wait
    }

    fn record(&mut self, at: Instant) {
        self.history.push_back(at);
        self.last_request = Some(at);
    }

    /// Reactive backoff on 403/418.
    fn observe_failure(&mut self) {
        self.consecutive_failures += 1;
        let k = self.consecutive_failures;
        let exp = 2u64.saturating_pow(k.saturating_sub(1));
        let base = self.params.base_delay.saturating_mul(exp as u32);
        let delay = base.min(self.params.max_delay);
        let jitter_ceiling = self
            .params
            .base_delay
            .mul_f64(self.params.jitter_ratio * exp as f64);
        let jitter = if jitter_ceiling.is_zero() {
            Duration::ZERO
        } else {
            let millis = rand::thread_rng().gen_range(0..=jitter_ceiling.as_millis().max(1) as u64);
            Duration::from_millis(millis)
        };
        self.armed_delay = Some(delay + jitter);
    }

    fn observe_success(&mut self) {
        self.consecutive_failures = 0;
        self.armed_delay = None;
    }
}

/// `WaitBefore`/`Observe` behind a small capability interface so custom
/// strategies may replace the default without touching callers.
pub trait RateControl: Send + Sync {
    fn wait_before(&self, bucket: Bucket);
    fn observe(&self, bucket: Bucket, status: u16);
}

/// The default sliding-window + reactive-backoff controller.
pub struct RateController {
    api: Mutex<BucketState>,
    media: Mutex<BucketState>,
    interrupted: std::sync::Arc<AtomicBool>,
    /// Exposed for tests: counts how many times `WaitBefore` actually slept.
    sleep_count: AtomicU32,
}

impl RateController {
    pub fn new(api: BucketParams, media: BucketParams, interrupted: std::sync::Arc<AtomicBool>) -> Self {
        Self {
            api: Mutex::new(BucketState::new(api)),
            media: Mutex::new(BucketState::new(media)),
            interrupted,
            sleep_count: AtomicU32::new(0),
        }
    }

    pub fn with_defaults(interrupted: std::sync::Arc<AtomicBool>) -> Self {
        Self::new(BucketParams::api_default(), BucketParams::media_default(), interrupted)
    }

    fn state(&self, bucket: Bucket) -> &Mutex<BucketState> {
        match bucket {
            Bucket::Api => &self.api,
            Bucket::Media => &self.media,
        }
    }

    /// Sleeps in short slices so the interrupt flag is observed within
    /// roughly one second.
    fn interruptible_sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        self.sleep_count.fetch_add(1, Ordering::Relaxed);
        const SLICE: Duration = Duration::from_millis(200);
        let mut remaining = duration;
        while remaining > Duration::ZERO {
            if self.interrupted.load(Ordering::SeqCst) {
                return;
            }
            let slice = remaining.min(SLICE);
            std::thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }

    pub fn sleep_count(&self) -> u32 {
        self.sleep_count.load(Ordering::Relaxed)
    }
}

impl RateControl for RateController {
    fn wait_before(&self, bucket: Bucket) {
        let wait = {
            let mut state = self.state(bucket).lock().unwrap();
            state.compute_wait(Instant::now())
        };
        self.interruptible_sleep(wait);
        let mut state = self.state(bucket).lock().unwrap();
        state.record(Instant::now());
    }

    fn observe(&self, bucket: Bucket, status: u16) {
        let mut state = self.state(bucket).lock().unwrap();
        if status == 403 || status == 418 {
            state.observe_failure();
        } else if (200..300).contains(&status) {
            state.observe_success();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn controller() -> RateController {
        RateController::new(
            BucketParams {
                limit: 3,
                window: Duration::from_millis(100),
                base_delay: Duration::from_millis(20),
                max_delay: Duration::from_millis(200),
                jitter_ratio: 0.0,
                request_interval: Duration::ZERO,
            },
            BucketParams {
                limit: 5,
                window: Duration::from_millis(100),
                base_delay: Duration::from_millis(20),
                max_delay: Duration::from_millis(200),
                jitter_ratio: 0.0,
                request_interval: Duration::ZERO,
            },
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn within_limit_does_not_block() {
        let rc = controller();
        let start = Instant::now();
        for _ in 0..3 {
            rc.wait_before(Bucket::Api);
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn exceeding_limit_blocks() {
        let rc = controller();
        let start = Instant::now();
        for _ in 0..4 {
            rc.wait_before(Bucket::Api);
        }
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn buckets_do_not_cross_pollinate() {
        let rc = controller();
        for _ in 0..3 {
            rc.wait_before(Bucket::Api);
        }
        let start = Instant::now();
        rc.wait_before(Bucket::Media);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn failure_arms_backoff_and_success_resets() {
        let rc = controller();
        rc.observe(Bucket::Api, 418);
        let start = Instant::now();
        rc.wait_before(Bucket::Api);
        assert!(start.elapsed() >= Duration::from_millis(15));

        rc.observe(Bucket::Api, 200);
        {
            let state = rc.api.lock().unwrap();
            assert_eq!(state.consecutive_failures, 0);
            assert!(state.armed_delay.is_none());
        }
    }

    #[test]
    fn base_delay_is_non_decreasing_across_failures() {
        let rc = controller();
        rc.observe(Bucket::Api, 418);
        let d1 = rc.api.lock().unwrap().armed_delay.unwrap();
        rc.api.lock().unwrap().armed_delay = Some(d1);
        rc.observe(Bucket::Api, 418);
        let d2 = rc.api.lock().unwrap().armed_delay.unwrap();
        assert!(d2 >= d1);
    }

    #[test]
    fn interrupt_unblocks_sleep_promptly() {
        let interrupted = Arc::new(AtomicBool::new(false));
        let rc = RateController::new(
            BucketParams {
                limit: 1,
                window: Duration::from_secs(10),
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(100),
                jitter_ratio: 0.0,
                request_interval: Duration::ZERO,
            },
            BucketParams::media_default(),
            interrupted.clone(),
        );
        rc.wait_before(Bucket::Api);
        let flag = interrupted.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::SeqCst);
        });
        let start = Instant::now();
        rc.wait_before(Bucket::Api);
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
