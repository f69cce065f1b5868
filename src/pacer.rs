//! Process-wide request pacing for the metadata service.
//!
//! One [`Pacer`] is created per run and shared through `Arc` by everything
//! that talks to the service. It wraps a GCRA limiter with a burst of one, so
//! requests are spaced at least `1 / rate` apart and no one-second window ever
//! holds more than `rate` of them.

use governor::clock::{Clock, DefaultClock, FakeRelativeClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

/// A clock that can also block until some duration has passed.
///
/// Production code sleeps the thread; the fake clock just advances, which
/// keeps pacing and back-off tests instant.
pub trait Wait: Clock + Clone {
    fn wait(&self, duration: Duration);
}

impl Wait for DefaultClock {
    fn wait(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl Wait for FakeRelativeClock {
    fn wait(&self, duration: Duration) {
        self.advance(duration);
    }
}

type Limiter<C> = RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Shared request-rate limiter.
pub struct Pacer<C: Wait = DefaultClock> {
    limiter: Limiter<C>,
    clock: C,
    rate: NonZeroU32,
}

impl Pacer<DefaultClock> {
    /// Pacer on the wall clock allowing `rate` requests per second.
    pub fn per_second(rate: NonZeroU32) -> Self {
        Self::with_clock(rate, DefaultClock::default())
    }
}

impl<C: Wait> Pacer<C> {
    pub fn with_clock(rate: NonZeroU32, clock: C) -> Self {
        // Round the period up so `rate` requests never fit inside one second.
        let period = Duration::from_nanos(1_000_000_000u64.div_ceil(u64::from(rate.get())));
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(rate))
            .allow_burst(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct_with_clock(quota, clock.clone()),
            clock,
            rate,
        }
    }

    /// Block until a request may be sent.
    pub fn acquire(&self) {
        loop {
            match self.limiter.check() {
                Ok(()) => return,
                Err(not_until) => {
                    let delay = not_until.wait_time_from(self.clock.now());
                    self.clock.wait(delay.max(Duration::from_nanos(1)));
                }
            }
        }
    }

    /// Sleep on the pacer's clock (used for retry back-off).
    pub fn wait(&self, duration: Duration) {
        if !duration.is_zero() {
            self.clock.wait(duration);
        }
    }

    pub fn rate(&self) -> NonZeroU32 {
        self.rate
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<C: Wait> std::fmt::Debug for Pacer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacer").field("rate", &self.rate).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn elapsed(clock: &FakeRelativeClock) -> Duration {
        Duration::from(clock.now())
    }

    fn acquire_times(pacer: &Pacer<FakeRelativeClock>, n: usize) -> Vec<Duration> {
        (0..n)
            .map(|_| {
                pacer.acquire();
                elapsed(pacer.clock())
            })
            .collect()
    }

    #[test]
    fn test_first_request_is_immediate() {
        let pacer = Pacer::with_clock(NonZeroU32::MIN, FakeRelativeClock::default());
        pacer.acquire();
        assert_eq!(elapsed(pacer.clock()), Duration::ZERO);
    }

    #[test]
    fn test_one_per_second_spacing() {
        let pacer = Pacer::with_clock(NonZeroU32::MIN, FakeRelativeClock::default());
        let times = acquire_times(&pacer, 4);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1), "{:?}", times);
        }
    }

    #[test]
    fn test_no_window_exceeds_rate() {
        let rate = NonZeroU32::new(3).unwrap();
        let pacer = Pacer::with_clock(rate, FakeRelativeClock::default());
        let times = acquire_times(&pacer, 12);
        for (i, start) in times.iter().enumerate() {
            let in_window = times[i..]
                .iter()
                .take_while(|t| **t - *start < Duration::from_secs(1))
                .count();
            assert!(in_window <= 3, "window at {:?} held {}", start, in_window);
        }
    }

    #[test]
    fn test_idle_pacer_does_not_burst() {
        let pacer = Pacer::with_clock(NonZeroU32::new(5).unwrap(), FakeRelativeClock::default());
        assert_eq!(pacer.rate().get(), 5);
        pacer.clock().advance(Duration::from_secs(10));
        let times = acquire_times(&pacer, 3);
        assert_eq!(times[0], Duration::from_secs(10));
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(200), "{:?}", times);
        }
    }

    #[test]
    fn test_shared_pacer_serializes_callers() {
        let pacer = Arc::new(Pacer::with_clock(NonZeroU32::MIN, FakeRelativeClock::default()));
        let a = Arc::clone(&pacer);
        let b = Arc::clone(&pacer);
        a.acquire();
        b.acquire();
        a.acquire();
        assert!(elapsed(pacer.clock()) >= Duration::from_secs(2));
    }

    #[test]
    fn test_wait_advances_fake_clock() {
        let pacer = Pacer::with_clock(NonZeroU32::MIN, FakeRelativeClock::default());
        pacer.wait(Duration::from_millis(750));
        assert_eq!(elapsed(pacer.clock()), Duration::from_millis(750));
    }
}
