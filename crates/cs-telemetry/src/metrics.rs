use ahash::AHashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Outbound and inbound sync attempts, by `platform`, `direction` and `outcome`.
pub const SYNC_OPERATIONS_TOTAL: &str = "sync_operations_total";
/// Wall time of one dispatch or inbound event, retries included.
pub const SYNC_DURATION_SECONDS: &str = "sync_duration_seconds";
pub const SYNC_QUEUE_PENDING: &str = "sync_queue_pending";
pub const SYNC_DEAD_LETTERS: &str = "sync_dead_letters";
pub const SYNC_DEAD_LETTERED_TOTAL: &str = "sync_dead_lettered_total";
/// Webhook deliveries by `platform` and HTTP `status` answered.
pub const WEBHOOKS_TOTAL: &str = "webhooks_total";
pub const API_REQUESTS_TOTAL: &str = "api_requests_total";
pub const API_REQUEST_DURATION_SECONDS: &str = "api_request_duration_seconds";

// ---------------------------------------------------------------------------
// Histogram
// ---------------------------------------------------------------------------

/// Distribution of observed values across fixed buckets.
#[derive(Debug)]
pub struct Histogram {
    pub buckets: Vec<f64>,
    pub counts: Vec<AtomicU64>,
    pub sum: AtomicU64,
    pub count: AtomicU64,
}

impl Histogram {
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        // f64 sum stored as bits for atomic add.
        let mut current = self.sum.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self
                .sum
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        for (i, boundary) in self.buckets.iter().enumerate() {
            if value <= *boundary {
                self.counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Buckets in seconds. The top end covers a full retry cycle against a slow
/// platform.
fn default_duration_buckets() -> Vec<f64> {
    vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Sorted key=value pairs distinguishing series of one counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut v: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        Self(v)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// `{key="value",key2="value2"}`, escaping quotes and backslashes.
    pub fn prometheus_str(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let inner: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| {
                let v = v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n");
                format!("{k}=\"{v}\"")
            })
            .collect();
        format!("{{{}}}", inner.join(","))
    }
}

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

type CounterMap = AHashMap<(String, Labels), AtomicU64>;

/// Counters, gauges and histograms behind interior mutability.
///
/// Values are atomics; the maps are only write-locked to register a new
/// series.
#[derive(Debug)]
pub struct MetricsCollector {
    counters: RwLock<CounterMap>,
    gauges: RwLock<AHashMap<String, AtomicI64>>,
    histograms: RwLock<AHashMap<String, Histogram>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(AHashMap::new()),
            gauges: RwLock::new(AHashMap::new()),
            histograms: RwLock::new(AHashMap::new()),
        }
    }

    /// A collector with the sync histograms and gauges pre-registered, so
    /// they show up in exports before the first event.
    pub fn with_defaults() -> Self {
        let collector = Self::new();
        {
            let mut h = write(&collector.histograms);
            for name in [SYNC_DURATION_SECONDS, API_REQUEST_DURATION_SECONDS] {
                h.insert(name.to_string(), Histogram::new(default_duration_buckets()));
            }
        }
        collector.set_gauge(SYNC_QUEUE_PENDING, 0);
        collector.set_gauge(SYNC_DEAD_LETTERS, 0);
        collector
    }

    // -- Counters -----------------------------------------------------------

    pub fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        self.increment_counter_by(name, labels, 1);
    }

    pub fn increment_counter_by(&self, name: &str, labels: &[(&str, &str)], amount: u64) {
        let key = (name.to_string(), Labels::new(labels));
        {
            let map = read(&self.counters);
            if let Some(c) = map.get(&key) {
                c.fetch_add(amount, Ordering::Relaxed);
                return;
            }
        }
        let mut map = write(&self.counters);
        map.entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get_counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = (name.to_string(), Labels::new(labels));
        read(&self.counters)
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    // -- Gauges -------------------------------------------------------------

    pub fn set_gauge(&self, name: &str, value: i64) {
        {
            let map = read(&self.gauges);
            if let Some(g) = map.get(name) {
                g.store(value, Ordering::Relaxed);
                return;
            }
        }
        write(&self.gauges)
            .entry(name.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .store(value, Ordering::Relaxed);
    }

    pub fn get_gauge(&self, name: &str) -> i64 {
        read(&self.gauges)
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    // -- Histograms ---------------------------------------------------------

    /// Record into a histogram, creating it with duration buckets if needed.
    pub fn record_histogram(&self, name: &str, value: f64) {
        {
            let map = read(&self.histograms);
            if let Some(h) = map.get(name) {
                h.observe(value);
                return;
            }
        }
        write(&self.histograms)
            .entry(name.to_string())
            .or_insert_with(|| Histogram::new(default_duration_buckets()))
            .observe(value);
    }

    /// `(count, sum)` of a histogram, zero if it was never recorded.
    pub fn histogram_totals(&self, name: &str) -> (u64, f64) {
        read(&self.histograms)
            .get(name)
            .map(|h| (h.get_count(), h.get_sum()))
            .unwrap_or((0, 0.0))
    }

    // -- Sync series --------------------------------------------------------

    /// One dispatch or inbound event. `outcome` is `success`, `failure`,
    /// `skipped` or `disabled`.
    pub fn record_sync(&self, platform: &str, direction: &str, outcome: &str, seconds: f64) {
        self.increment_counter(
            SYNC_OPERATIONS_TOTAL,
            &[("platform", platform), ("direction", direction), ("outcome", outcome)],
        );
        self.record_histogram(SYNC_DURATION_SECONDS, seconds);
    }

    pub fn record_webhook(&self, platform: &str, status: u16) {
        self.increment_counter(WEBHOOKS_TOTAL, &[("platform", platform), ("status", &status.to_string())]);
    }

    pub fn record_dead_letter(&self, platform: &str) {
        self.increment_counter(SYNC_DEAD_LETTERED_TOTAL, &[("platform", platform)]);
    }

    pub fn set_queue_depth(&self, pending: u64, dead_letters: u64) {
        self.set_gauge(SYNC_QUEUE_PENDING, i64::try_from(pending).unwrap_or(i64::MAX));
        self.set_gauge(SYNC_DEAD_LETTERS, i64::try_from(dead_letters).unwrap_or(i64::MAX));
    }

    // -- Export --------------------------------------------------------------

    /// Prometheus text exposition format, series sorted by name.
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        {
            let map = read(&self.counters);
            let mut grouped: AHashMap<&str, Vec<(&Labels, u64)>> = AHashMap::new();
            for ((name, labels), val) in map.iter() {
                grouped
                    .entry(name.as_str())
                    .or_default()
                    .push((labels, val.load(Ordering::Relaxed)));
            }
            let mut names: Vec<&str> = grouped.keys().copied().collect();
            names.sort_unstable();
            for name in names {
                out.push_str(&format!("# TYPE {name} counter\n"));
                let mut series = grouped[name].clone();
                series.sort_by_key(|(labels, _)| labels.prometheus_str());
                for (labels, value) in series {
                    out.push_str(&format!("{name}{} {value}\n", labels.prometheus_str()));
                }
            }
        }

        {
            let map = read(&self.gauges);
            let mut names: Vec<&String> = map.keys().collect();
            names.sort();
            for name in names {
                let val = map[name].load(Ordering::Relaxed);
                out.push_str(&format!("# TYPE {name} gauge\n{name} {val}\n"));
            }
        }

        {
            let map = read(&self.histograms);
            let mut names: Vec<&String> = map.keys().collect();
            names.sort();
            for name in names {
                let h = &map[name];
                out.push_str(&format!("# TYPE {name} histogram\n"));
                for (i, boundary) in h.buckets.iter().enumerate() {
                    // Bucket counts are already cumulative (observe bumps every bucket >= value).
                    let count = h.counts[i].load(Ordering::Relaxed);
                    out.push_str(&format!("{name}_bucket{{le=\"{boundary}\"}} {count}\n"));
                }
                out.push_str(&format!("{name}_bucket{{le=\"+Inf\"}} {}\n", h.get_count()));
                out.push_str(&format!("{name}_sum {}\n", h.get_sum()));
                out.push_str(&format!("{name}_count {}\n", h.get_count()));
            }
        }

        out
    }

    /// All metrics as one JSON object with `counters`, `gauges` and
    /// `histograms` keys.
    pub fn export_json(&self) -> serde_json::Value {
        let mut counters = serde_json::Map::new();
        for ((name, labels), val) in read(&self.counters).iter() {
            counters.insert(
                format!("{name}{}", labels.prometheus_str()),
                serde_json::json!(val.load(Ordering::Relaxed)),
            );
        }

        let mut gauges = serde_json::Map::new();
        for (name, val) in read(&self.gauges).iter() {
            gauges.insert(name.clone(), serde_json::json!(val.load(Ordering::Relaxed)));
        }

        let mut histograms = serde_json::Map::new();
        for (name, h) in read(&self.histograms).iter() {
            histograms.insert(
                name.clone(),
                serde_json::json!({ "sum": h.get_sum(), "count": h.get_count() }),
            );
        }

        serde_json::json!({
            "counters": counters,
            "gauges": gauges,
            "histograms": histograms,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ---------------------------------------------------------------------------
// Global singleton
// ---------------------------------------------------------------------------

/// Process-wide collector, created on first use with the default series.
pub fn global_metrics() -> &'static MetricsCollector {
    use std::sync::OnceLock;
    static INSTANCE: OnceLock<MetricsCollector> = OnceLock::new();
    INSTANCE.get_or_init(MetricsCollector::with_defaults)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_keyed_by_labels() {
        let m = MetricsCollector::new();
        m.increment_counter(WEBHOOKS_TOTAL, &[("platform", "shopify"), ("status", "200")]);
        m.increment_counter(WEBHOOKS_TOTAL, &[("status", "200"), ("platform", "shopify")]);
        m.increment_counter(WEBHOOKS_TOTAL, &[("platform", "shopify"), ("status", "401")]);

        assert_eq!(m.get_counter(WEBHOOKS_TOTAL, &[("platform", "shopify"), ("status", "200")]), 2);
        assert_eq!(m.get_counter(WEBHOOKS_TOTAL, &[("platform", "shopify"), ("status", "401")]), 1);
        assert_eq!(m.get_counter(WEBHOOKS_TOTAL, &[("platform", "wix"), ("status", "200")]), 0);
    }

    #[test]
    fn histogram_sum_and_cumulative_buckets() {
        let m = MetricsCollector::with_defaults();
        m.record_histogram(SYNC_DURATION_SECONDS, 0.05);
        m.record_histogram(SYNC_DURATION_SECONDS, 0.5);
        m.record_histogram(SYNC_DURATION_SECONDS, 2.0);

        let (count, sum) = m.histogram_totals(SYNC_DURATION_SECONDS);
        assert_eq!(count, 3);
        assert!((sum - 2.55).abs() < 0.001);

        let text = m.export_prometheus();
        assert!(text.contains("sync_duration_seconds_bucket{le=\"0.5\"} 2\n"));
        assert!(text.contains("sync_duration_seconds_bucket{le=\"+Inf\"} 3\n"));
    }

    #[test]
    fn sync_helpers_feed_named_series() {
        let m = MetricsCollector::new();
        m.record_sync("shopify", "outbound", "success", 0.2);
        m.record_webhook("wix", 401);
        m.set_queue_depth(7, 2);

        assert_eq!(
            m.get_counter(
                SYNC_OPERATIONS_TOTAL,
                &[("platform", "shopify"), ("direction", "outbound"), ("outcome", "success")]
            ),
            1
        );
        assert_eq!(m.get_counter(WEBHOOKS_TOTAL, &[("platform", "wix"), ("status", "401")]), 1);
        assert_eq!(m.get_gauge(SYNC_QUEUE_PENDING), 7);
        assert_eq!(m.get_gauge(SYNC_DEAD_LETTERS), 2);
    }

    #[test]
    fn label_values_are_escaped() {
        let l = Labels::new(&[("path", "a\"b"), ("method", "GET")]);
        assert_eq!(l.prometheus_str(), "{method=\"GET\",path=\"a\\\"b\"}");
        assert_eq!(Labels::empty().prometheus_str(), "");
    }

    #[test]
    fn json_export_shape() {
        let m = MetricsCollector::with_defaults();
        m.set_gauge(SYNC_QUEUE_PENDING, 4);
        let json = m.export_json();
        assert_eq!(json["gauges"]["sync_queue_pending"], 4);
        assert!(json["histograms"]["sync_duration_seconds"].is_object());
    }
}
