//! Token-bucket rate limiter with injectable time and sleep.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::time::SleepFor;
use crate::time::TimeProvider;

/// Bucket state guarded by one mutex. Refill is computed lazily on each
/// acquire, so no background task is needed.
#[derive(Debug)]
struct BucketState {
    permits: i64,
    fill_rate: f64,
    last_refill_ms: u64,
}

/// Token-bucket pacing.
///
/// `acquire(n)` waits cooperatively until `n` permits have accrued; permits
/// accrue at `fill_rate` per second up to `capacity`. Both the clock and the
/// sleep primitive are injected so tests can drive a simulated clock.
///
/// Safe for concurrent use from many tasks.
pub struct RateLimiter {
    state: Mutex<BucketState>,
    capacity: i64,
    clock: Arc<dyn TimeProvider>,
    sleep: Arc<dyn SleepFor>,
}

impl RateLimiter {
    /// Create a limiter holding `initial_permits`, refilling at `fill_rate`
    /// permits per second, capped at `capacity`.
    pub fn new(
        initial_permits: i64,
        fill_rate: f64,
        capacity: i64,
        clock: Arc<dyn TimeProvider>,
        sleep: Arc<dyn SleepFor>,
    ) -> Self {
        let now = clock.now_unix_ms();
        Self {
            state: Mutex::new(BucketState {
                permits: initial_permits.min(capacity),
                fill_rate,
                last_refill_ms: now,
            }),
            capacity,
            clock,
            sleep,
        }
    }

    /// Acquire one permit, waiting as long as necessary.
    pub async fn acquire(&self) {
        self.acquire_n(1).await;
    }

    /// Acquire `n` permits, waiting as long as necessary.
    pub async fn acquire_n(&self, n: i64) {
        loop {
            match self.try_take(n) {
                Ok(()) => return,
                Err(wait) => {
                    debug!(permits = n, wait_ms = wait.as_millis() as u64, "rate limiter waiting");
                    self.sleep.sleep_for(wait).await;
                }
            }
        }
    }

    /// Acquire `n` permits only if they are available right now.
    pub fn try_acquire_n(&self, n: i64) -> bool {
        self.try_take(n).is_ok()
    }

    /// Update the fill rate without losing accrued permits.
    pub fn set_fill_rate(&self, fill_rate: f64) {
        let mut state = self.state.lock();
        // Settle accrual at the old rate before switching.
        Self::refill(&mut state, self.capacity, self.clock.now_unix_ms());
        state.fill_rate = fill_rate;
    }

    /// Permits currently available, after lazy refill.
    pub fn available_permits(&self) -> i64 {
        let mut state = self.state.lock();
        Self::refill(&mut state, self.capacity, self.clock.now_unix_ms());
        state.permits
    }

    /// Take `n` permits or compute how long to wait for the deficit.
    fn try_take(&self, n: i64) -> Result<(), Duration> {
        let mut state = self.state.lock();
        Self::refill(&mut state, self.capacity, self.clock.now_unix_ms());
        if state.permits >= n {
            state.permits -= n;
            return Ok(());
        }
        let deficit = (n - state.permits) as f64;
        let wait_ms = if state.fill_rate > 0.0 {
            (deficit * 1000.0 / state.fill_rate).ceil() as u64
        } else {
            // No refill configured; poll slowly in case the rate is raised.
            1000
        };
        Err(Duration::from_millis(wait_ms.max(1)))
    }

    fn refill(state: &mut BucketState, capacity: i64, now_ms: u64) {
        let elapsed_ms = now_ms.saturating_sub(state.last_refill_ms);
        if elapsed_ms == 0 || state.fill_rate <= 0.0 {
            return;
        }
        let accrued = (elapsed_ms as f64 / 1000.0 * state.fill_rate).floor() as i64;
        if accrued > 0 {
            state.permits = (state.permits + accrued).min(capacity);
            state.last_refill_ms = now_ms;
        }
    }
}
