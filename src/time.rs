//! Injectable time and sleep primitives.
//!
//! Components that pace themselves against wall-clock time (the rate limiter,
//! the GC loop) take a [`TimeProvider`] and a [`SleepFor`] instead of calling
//! the system clock directly. Production code uses [`SystemTimeProvider`] and
//! [`TokioSleepFor`]; tests drive a [`SimulatedTimeProvider`] so time-based
//! behavior is deterministic.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;

/// Get current Unix timestamp in milliseconds.
///
/// Returns 0 if system time is before the UNIX epoch, preventing panics on
/// misconfigured clocks.
#[inline]
pub fn current_time_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Trait for injectable time sources.
///
/// In production, use [`SystemTimeProvider`]. For tests, use
/// [`SimulatedTimeProvider`] and advance it explicitly.
pub trait TimeProvider: Send + Sync {
    /// Get current Unix timestamp in milliseconds.
    fn now_unix_ms(&self) -> u64;
}

/// Production time provider using the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    #[inline]
    fn now_unix_ms(&self) -> u64 {
        current_time_ms()
    }
}

/// Simulated time provider for deterministic testing.
///
/// Clones share the same underlying clock, so a test can hold one handle and
/// hand another to the component under test.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTimeProvider {
    current_time_ms: Arc<AtomicU64>,
}

impl SimulatedTimeProvider {
    /// Create a simulated clock starting at the given timestamp.
    pub fn new(initial_time_ms: u64) -> Self {
        Self {
            current_time_ms: Arc::new(AtomicU64::new(initial_time_ms)),
        }
    }

    /// Advance time by the given number of milliseconds.
    pub fn advance_ms(&self, delta_ms: u64) {
        self.current_time_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Advance time by the given duration.
    pub fn advance(&self, delta: Duration) {
        self.advance_ms(delta.as_millis() as u64);
    }
}

impl TimeProvider for SimulatedTimeProvider {
    #[inline]
    fn now_unix_ms(&self) -> u64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }
}

/// Trait for injectable cooperative sleeping.
///
/// Separated from [`TimeProvider`] so a simulated sleep can advance the
/// simulated clock, letting rate-limiter waits resolve without real delays.
#[async_trait]
pub trait SleepFor: Send + Sync {
    /// Suspend the calling task for the given duration.
    async fn sleep_for(&self, duration: Duration);
}

/// Production sleep backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleepFor;

#[async_trait]
impl SleepFor for TokioSleepFor {
    async fn sleep_for(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Simulated sleep that advances a [`SimulatedTimeProvider`] instead of
/// waiting.
#[derive(Debug, Clone)]
pub struct SimulatedSleepFor {
    clock: SimulatedTimeProvider,
}

impl SimulatedSleepFor {
    /// Create a simulated sleep bound to the given simulated clock.
    pub fn new(clock: SimulatedTimeProvider) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl SleepFor for SimulatedSleepFor {
    async fn sleep_for(&self, duration: Duration) {
        self.clock.advance(duration);
        // Yield so concurrent tasks observe the new time.
        tokio::task::yield_now().await;
    }
}
