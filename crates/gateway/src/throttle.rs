use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// Rolling-window counter for high-frequency event logging.
///
/// Delivery receipts and presence updates arrive at chat speed; logging one
/// line per occurrence drowns everything else. Callers record each
/// occurrence; once per window `record` hands back the accumulated counts so
/// the caller can emit a single summary line. Throttling affects only
/// logging — sinks see every event.
pub struct LogThrottle {
    window: Duration,
    window_start: Instant,
    counts: HashMap<&'static str, u64>,
}

impl LogThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: Instant::now(),
            counts: HashMap::new(),
        }
    }

    /// Count one occurrence. Returns the closed window's counts when the
    /// window has rolled over, `None` otherwise.
    pub fn record(&mut self, name: &'static str) -> Option<Vec<(&'static str, u64)>> {
        *self.counts.entry(name).or_insert(0) += 1;

        if self.window_start.elapsed() < self.window {
            return None;
        }

        let mut summary: Vec<_> = self.counts.drain().collect();
        summary.sort_by_key(|(name, _)| *name);
        self.window_start = Instant::now();
        Some(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_within_window() {
        let mut throttle = LogThrottle::new(Duration::from_secs(60));
        for _ in 0..100 {
            assert!(throttle.record("Receipt").is_none());
        }
    }

    #[test]
    fn emits_one_summary_per_window() {
        let mut throttle = LogThrottle::new(Duration::ZERO);
        assert_eq!(throttle.record("Receipt"), Some(vec![("Receipt", 1)]));

        // Counts reset after the summary.
        throttle.window = Duration::from_secs(60);
        assert!(throttle.record("Receipt").is_none());
    }

    #[test]
    fn summary_covers_all_names_in_window() {
        let mut throttle = LogThrottle::new(Duration::from_secs(60));
        throttle.record("Receipt");
        throttle.record("Presence");
        throttle.record("Receipt");

        throttle.window = Duration::ZERO;
        let summary = throttle.record("Receipt").unwrap();
        assert_eq!(summary, vec![("Presence", 1), ("Receipt", 3)]);
    }
}
