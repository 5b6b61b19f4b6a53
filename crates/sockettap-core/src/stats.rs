//! Tap statistics
//!
//! Counters live in a [`StatsStore`] shared by everything in one scope (a
//! listener, a cluster, the whole process). Handing out a [`Counter`] takes a
//! lock once; incrementing it afterwards is a single relaxed atomic add, so
//! tappers on any number of threads can bump the same counter.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle to a named monotonically increasing counter
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc(&self) {
        self.add(1);
    }

    #[inline]
    pub fn add(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Registry of named counters
#[derive(Debug, Default)]
pub struct StatsStore {
    counters: parking_lot::RwLock<BTreeMap<String, Counter>>,
}

impl StatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the counter registered under `name`
    pub fn counter(&self, name: &str) -> Counter {
        if let Some(counter) = self.counters.read().get(name) {
            return counter.clone();
        }
        self.counters
            .write()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Current value of a counter, if it was ever registered
    pub fn value(&self, name: &str) -> Option<u64> {
        self.counters.read().get(name).map(Counter::value)
    }

    /// Snapshot of all counters, ordered by name
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        self.counters
            .read()
            .iter()
            .map(|(name, c)| (name.clone(), c.value()))
            .collect()
    }

    /// Export counters in Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        for (name, value) in self.snapshot() {
            let metric = prometheus_name(&name);
            output.push_str(&format!("# TYPE {} counter\n", metric));
            output.push_str(&format!("{} {}\n", metric, value));
        }
        output
    }

    /// Export counters as JSON
    pub fn to_json(&self) -> serde_json::Value {
        let counters: serde_json::Map<String, serde_json::Value> = self
            .snapshot()
            .into_iter()
            .map(|(name, value)| (name, serde_json::Value::from(value)))
            .collect();
        serde_json::Value::Object(counters)
    }
}

fn prometheus_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Counters bumped by per-socket tappers
#[derive(Debug, Clone, Default)]
pub struct TransportTapStats {
    /// Streamed events accepted by the sink
    pub streamed_submit: Counter,

    /// Buffered traces accepted by the sink
    pub buffered_submit: Counter,
}

impl TransportTapStats {
    /// Register the tap counters in `store` under `prefix`
    pub fn new(store: &StatsStore, prefix: &str) -> Self {
        Self {
            streamed_submit: store.counter(&format!("{}streamed_submit", prefix)),
            buffered_submit: store.counter(&format!("{}buffered_submit", prefix)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_same_name_same_counter() {
        let store = StatsStore::new();
        let a = store.counter("transport.tap.buffered_submit");
        let b = store.counter("transport.tap.buffered_submit");
        a.inc();
        b.inc();
        assert_eq!(a.value(), 2);
        assert_eq!(store.value("transport.tap.buffered_submit"), Some(2));
        assert_eq!(store.value("missing"), None);
    }

    #[test]
    fn test_tap_stats_registration() {
        let store = StatsStore::new();
        let stats = TransportTapStats::new(&store, "transport.tap.");
        stats.streamed_submit.inc();

        let snapshot = store.snapshot();
        assert_eq!(
            snapshot,
            vec![
                ("transport.tap.buffered_submit".to_string(), 0),
                ("transport.tap.streamed_submit".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_concurrent_increments() {
        let store = StatsStore::new();
        let stats = TransportTapStats::new(&store, "");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.streamed_submit.inc();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.streamed_submit.value(), 8000);
    }

    #[test]
    fn test_prometheus_export() {
        let store = StatsStore::new();
        store.counter("transport.tap.streamed_submit").add(3);
        let text = store.to_prometheus();
        assert!(text.contains("# TYPE transport_tap_streamed_submit counter"));
        assert!(text.contains("transport_tap_streamed_submit 3"));
        assert_eq!(store.to_json()["transport.tap.streamed_submit"], 3);
    }
}
