use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the current time used for expiry checks and key set freshness.
///
/// Any `Fn() -> SystemTime` closure is a clock, which keeps tests free of global time overrides.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// The system's wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<F> Clock for F
where
    F: Fn() -> SystemTime + Send + Sync,
{
    fn now(&self) -> SystemTime {
        self()
    }
}

/// Seconds since the Unix epoch, negative for earlier times.
pub(crate) fn unix_seconds(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs_f64(),
        Err(error) => -error.duration().as_secs_f64(),
    }
}

/// Time elapsed from `earlier` to `now`, zero if the clock went backwards.
pub(crate) fn elapsed_between(earlier: SystemTime, now: SystemTime) -> Duration {
    now.duration_since(earlier).unwrap_or(Duration::ZERO)
}
