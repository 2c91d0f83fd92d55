use std::time::Duration;

/// Bounded exponential back-off with jitter.
///
/// Each delay is drawn from `[current / 2, current]`, then `current` doubles up to `cap`.
#[derive(Debug, Clone)]
pub struct Backoff {
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(start: Duration, cap: Duration) -> Self {
        Self {
            cap,
            current: start.min(cap),
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let half = self.current / 2;
        let delay = half + half.mul_f64(fastrand::f64());
        self.current = (self.current * 2).min(self.cap);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_bounded() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(500) && first <= Duration::from_secs(1));
        for _ in 0..20 {
            assert!(backoff.next_delay() <= Duration::from_secs(60));
        }
        // saturated at the cap
        assert!(backoff.next_delay() >= Duration::from_secs(30));
    }
}
