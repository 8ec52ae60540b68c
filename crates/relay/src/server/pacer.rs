use std::time::{Duration, Instant};

/// Fixed wall-clock cadence for the tick loop.
///
/// Oversleeping (or a late tick) leaves a positive leftover that shortens
/// the next wait; undersleeping lengthens it. The leftover is clamped to one
/// interval so a long stall is not paid back with a burst of ticks.
#[derive(Debug, Clone)]
pub struct TickPacer {
    interval: Duration,
    leftover: f64,
}

impl TickPacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            leftover: 0.0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Signed carry-over in seconds.
    pub fn leftover(&self) -> f64 {
        self.leftover
    }

    /// Planned sleep in seconds after `work` was spent on the tick. Negative
    /// when the tick is already late.
    pub fn plan(&self, work: Duration) -> f64 {
        self.interval.as_secs_f64() - work.as_secs_f64() - self.leftover
    }

    pub fn record(&mut self, planned: f64, actual: Duration) {
        let limit = self.interval.as_secs_f64();
        self.leftover = (actual.as_secs_f64() - planned).clamp(-limit, limit);
    }

    /// Sleeps out the remainder of the tick that began at `tick_started`.
    pub fn wait(&mut self, tick_started: Instant) {
        let planned = self.plan(tick_started.elapsed());
        let sleep_start = Instant::now();
        if planned > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(planned));
        }
        self.record(planned, sleep_start.elapsed());
    }
}
