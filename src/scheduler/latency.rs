use std::collections::VecDeque;
use std::time::Duration;

/// Default number of latency samples kept for the running average.
pub const DEFAULT_LATENCY_WINDOW: usize = 20;

/// Bounded ring buffer of recent latencies.
///
/// Holds at most `capacity` samples; recording into a full window evicts the
/// oldest sample first.
#[derive(Clone, Debug)]
pub struct LatencyWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, sample: Duration) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Mean of the retained samples.
    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    pub fn latest(&self) -> Option<Duration> {
        self.samples.back().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn empty_window_has_no_average() {
        let window = LatencyWindow::default();
        assert!(window.is_empty());
        assert_eq!(window.average(), None);
    }

    #[test]
    fn evicts_oldest_on_overflow() {
        let mut window = LatencyWindow::new(3);
        for sample in [100, 200, 300, 400] {
            window.record(ms(sample));
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.average(), Some(ms(300)));
        assert_eq!(window.latest(), Some(ms(400)));
    }

    #[test]
    fn zero_capacity_keeps_one_sample() {
        let mut window = LatencyWindow::new(0);
        window.record(ms(10));
        window.record(ms(20));
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.average(), Some(ms(20)));
    }
}
