//! Frame-paced scheduling primitives.
//!
//! Detection and smoothing run as explicit loops on a [`FrameClock`] and
//! stop when their [`CancelToken`] fires. The loops share one cooperative
//! runtime thread; camera reads and detection run on the blocking pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{self, Interval, MissedTickBehavior};

/// Tick source paced at the display refresh rate
pub struct FrameClock {
    interval: Interval,
    period: Duration,
}

impl FrameClock {
    /// Create a clock ticking `refresh_hz` times per second (minimum 1 Hz)
    #[must_use]
    pub fn new(refresh_hz: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / f64::from(refresh_hz.max(1)));
        let mut interval = time::interval(period);
        // A slow detection must not cause a burst of catch-up ticks
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval, period }
    }

    /// Wait for the next frame
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }
}

/// Cloneable cancellation flag shared between an owner and its loop
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token; every waiter wakes immediately
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token has been cancelled
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_period_from_refresh_rate() {
        let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
        rt.block_on(async {
            assert_eq!(FrameClock::new(50).period(), Duration::from_millis(20));
            // Zero is treated as 1 Hz rather than dividing by zero
            assert_eq!(FrameClock::new(0).period(), Duration::from_secs(1));
        });
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        tokio::task::yield_now().await;
        assert!(!token.is_cancelled());
        token.cancel();

        handle.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_after_cancel() {
        let token = CancelToken::new();
        token.cancel();
        token.cancelled().await;
    }
}
