use std::collections::HashMap;
use std::hash::Hash;

/// Rate limiter for repetitive per-key log lines, measured in poll ticks.
#[derive(Debug)]
pub struct LogThrottle<K> {
    interval_ticks: u64,
    last: HashMap<K, u64>,
}

impl<K: Eq + Hash> LogThrottle<K> {
    pub fn new(interval_ticks: u64) -> Self {
        Self {
            interval_ticks: interval_ticks.max(1),
            last: HashMap::new(),
        }
    }

    pub fn should_log(&mut self, key: K, tick: u64) -> bool {
        if let Some(last) = self.last.get(&key) {
            if tick.saturating_sub(*last) < self.interval_ticks {
                return false;
            }
        }
        self.last.insert(key, tick);
        true
    }

    pub fn forget(&mut self, key: &K) {
        self.last.remove(key);
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppresses_within_interval() {
        let mut throttle = LogThrottle::new(10);
        assert!(throttle.should_log("op-1", 100));
        assert!(!throttle.should_log("op-1", 105));
        assert!(throttle.should_log("op-2", 105));
        assert!(throttle.should_log("op-1", 110));
    }

    #[test]
    fn forget_resets_key() {
        let mut throttle = LogThrottle::new(10);
        assert!(throttle.should_log(1u64, 0));
        throttle.forget(&1);
        assert!(throttle.should_log(1u64, 1));
    }
}
