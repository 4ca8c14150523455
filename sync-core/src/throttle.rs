//! Coalescing of bursts of updates.

use std::time::{Duration, Instant};

/// Runs at most once per interval: the first notification after a quiet
/// period is due immediately, and notifications during the interval
/// collapse into one run at its end.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last_run: Option<Instant>,
    deadline: Option<Instant>,
}

impl Throttle {
    /// Create a throttle with the given minimum spacing between runs.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: None,
            deadline: None,
        }
    }

    /// Minimum spacing between runs.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Note that something changed. Schedules a run if none is pending.
    pub fn notify(&mut self, now: Instant) {
        if self.deadline.is_some() {
            return;
        }
        let earliest = self.last_run.map_or(now, |last| last + self.interval);
        self.deadline = Some(earliest.max(now));
    }

    /// When the pending run is due.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether a run is pending.
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Take the pending run if it is due.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                self.last_run = Some(now);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn first_notification_is_immediate() {
        let now = Instant::now();
        let mut throttle = Throttle::new(200 * MS);
        throttle.notify(now);
        assert_eq!(throttle.deadline(), Some(now));
        assert!(throttle.fire(now));
        assert!(!throttle.is_pending());
    }

    #[test]
    fn burst_collapses_to_one_trailing_run() {
        let start = Instant::now();
        let mut throttle = Throttle::new(200 * MS);
        throttle.notify(start);
        assert!(throttle.fire(start));

        throttle.notify(start + 10 * MS);
        throttle.notify(start + 50 * MS);
        throttle.notify(start + 150 * MS);
        assert_eq!(throttle.deadline(), Some(start + 200 * MS));

        assert!(!throttle.fire(start + 199 * MS));
        assert!(throttle.fire(start + 200 * MS));
        assert!(!throttle.fire(start + 201 * MS));
    }

    #[test]
    fn quiet_period_resets() {
        let start = Instant::now();
        let mut throttle = Throttle::new(200 * MS);
        throttle.notify(start);
        throttle.fire(start);

        let later = start + 1000 * MS;
        throttle.notify(later);
        assert_eq!(throttle.deadline(), Some(later));
    }
}
