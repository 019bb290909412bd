//! Most-recent telemetry readings, one slot per topic.

use std::collections::HashMap;

/// Last-write-wins cache of scalar telemetry readings.
///
/// Process-lifetime only: every topic starts out unknown. The router owns
/// the cache and is its only writer, so there is no internal locking.
#[derive(Debug, Default, Clone)]
pub struct TelemetryCache {
    readings: HashMap<String, f64>,
}

impl TelemetryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known reading for `topic`, or `None` if none has arrived yet.
    pub fn get(&self, topic: &str) -> Option<f64> {
        self.readings.get(topic).copied()
    }

    /// Overwrite the reading for `topic`. No ordering or staleness check.
    pub fn set(&mut self, topic: &str, value: f64) {
        self.readings.insert(topic.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_until_set() {
        let cache = TelemetryCache::new();
        assert_eq!(cache.get("nichoir/battery"), None);
    }

    #[test]
    fn test_last_write_wins() {
        let mut cache = TelemetryCache::new();
        for value in [3.9, 3.8, 3.7] {
            cache.set("nichoir/battery", value);
        }
        assert_eq!(cache.get("nichoir/battery"), Some(3.7));
    }

    #[test]
    fn test_topics_are_independent() {
        let mut cache = TelemetryCache::new();
        cache.set("a", 1.0);
        cache.set("b", 2.0);
        assert_eq!(cache.get("a"), Some(1.0));
        assert_eq!(cache.get("b"), Some(2.0));
        assert_eq!(cache.get("c"), None);
    }
}
