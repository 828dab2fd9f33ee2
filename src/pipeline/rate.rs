//! Iterations-per-second counter

use std::time::Instant;

/// Counts iterations and reports their average rate since `start`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateCounter {
    started: Option<Instant>,
    count: u64,
}

impl RateCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) timing from a zero count.
    pub fn start(&mut self) -> &mut Self {
        self.started = Some(Instant::now());
        self.count = 0;
        self
    }

    pub fn increment(&mut self) {
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Average rate so far; 0 before `start` or when no time has elapsed.
    pub fn rate(&self) -> f64 {
        self.rate_at(Instant::now())
    }

    pub fn rate_at(&self, now: Instant) -> f64 {
        let Some(started) = self.started else {
            return 0.0;
        };
        let elapsed = now.saturating_duration_since(started).as_secs_f64();
        if elapsed <= 0.0 { 0.0 } else { self.count as f64 / elapsed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cold_start_reports_zero() {
        assert_eq!(RateCounter::new().rate(), 0.0);

        let mut counter = RateCounter::new();
        counter.start();
        counter.increment();
        let started = counter.started.unwrap();
        assert_eq!(counter.rate_at(started), 0.0);
    }

    #[test]
    fn rate_is_count_over_elapsed() {
        let mut counter = RateCounter::new();
        counter.start();
        for _ in 0..30 {
            counter.increment();
        }

        let started = counter.started.unwrap();
        let rate = counter.rate_at(started + Duration::from_secs(2));

        assert_eq!(counter.count(), 30);
        assert!((rate - 15.0).abs() < 1e-9);
    }

    #[test]
    fn restart_clears_the_count() {
        let mut counter = RateCounter::new();
        counter.start();
        for _ in 0..100 {
            counter.increment();
        }

        counter.start();
        counter.increment();
        let started = counter.started.unwrap();

        assert_eq!(counter.count(), 1);
        assert!((counter.rate_at(started + Duration::from_secs(1)) - 1.0).abs() < 1e-9);
    }
}
