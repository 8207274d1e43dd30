//! In-process metrics registry.
//!
//! Counters and latency samples keyed by name plus a sorted tag list.
//! Owned by the event-loop thread and mutated only from there, so no
//! locking is involved. A real deployment would flush these to a sink;
//! here they back the latency logs and tests.

use std::collections::HashMap;
use tracing::debug;

/// Monotonic counters and append-only latency samples.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: HashMap<String, u64>,
    latencies: HashMap<String, Vec<f64>>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one.
    pub fn increment(&mut self, name: &str, tags: &[(&str, &str)]) {
        let key = format_key(name, tags);
        let value = self.counters.entry(key.clone()).or_insert(0);
        *value += 1;
        debug!(metric = %key, value = *value, "counter incremented");
    }

    /// Append a latency sample in milliseconds.
    pub fn record_latency(&mut self, name: &str, value_ms: f64, tags: &[(&str, &str)]) {
        let key = format_key(name, tags);
        self.latencies.entry(key.clone()).or_default().push(value_ms);
        debug!(metric = %key, latency_ms = value_ms, "latency recorded");
    }

    /// Current value of a counter, zero if never incremented.
    #[must_use]
    pub fn counter(&self, name: &str, tags: &[(&str, &str)]) -> u64 {
        self.counters
            .get(&format_key(name, tags))
            .copied()
            .unwrap_or(0)
    }

    /// Recorded latency samples for a metric, oldest first.
    #[must_use]
    pub fn latencies(&self, name: &str, tags: &[(&str, &str)]) -> Option<&[f64]> {
        self.latencies
            .get(&format_key(name, tags))
            .map(Vec::as_slice)
    }
}

/// Build the registry key: `name` or `name[k1=v1,k2=v2]` with tags sorted
/// by key so equivalent tag sets collapse to one series.
fn format_key(name: &str, tags: &[(&str, &str)]) -> String {
    if tags.is_empty() {
        return name.to_owned();
    }
    let mut sorted: Vec<(&str, &str)> = tags.to_vec();
    sorted.sort_unstable();
    let tag_str = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("{name}[{tag_str}]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_latency_is_retrievable() {
        let mut metrics = MetricsRegistry::new();
        metrics.record_latency("test_op", 100.0, &[]);

        let samples = metrics.latencies("test_op", &[]).unwrap();
        assert_eq!(samples.last().copied(), Some(100.0));
    }

    #[test]
    fn counters_accumulate() {
        let mut metrics = MetricsRegistry::new();
        assert_eq!(metrics.counter("wake", &[]), 0);
        metrics.increment("wake", &[]);
        metrics.increment("wake", &[]);
        assert_eq!(metrics.counter("wake", &[]), 2);
    }

    #[test]
    fn tags_are_sorted_into_one_series() {
        let mut metrics = MetricsRegistry::new();
        metrics.increment("req", &[("b", "2"), ("a", "1")]);
        metrics.increment("req", &[("a", "1"), ("b", "2")]);
        assert_eq!(metrics.counter("req", &[("a", "1"), ("b", "2")]), 2);
    }

    #[test]
    fn different_tags_are_distinct_series() {
        let mut metrics = MetricsRegistry::new();
        metrics.record_latency("op", 1.0, &[("stage", "stt")]);
        metrics.record_latency("op", 2.0, &[("stage", "llm")]);
        assert_eq!(metrics.latencies("op", &[("stage", "stt")]).unwrap(), &[1.0]);
        assert_eq!(metrics.latencies("op", &[("stage", "llm")]).unwrap(), &[2.0]);
    }

    #[test]
    fn key_formatting() {
        assert_eq!(format_key("plain", &[]), "plain");
        assert_eq!(
            format_key("op", &[("z", "9"), ("a", "1")]),
            "op[a=1,z=9]"
        );
    }
}
