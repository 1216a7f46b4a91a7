/*!
 * # Metrics Module
 *
 * In-process metrics for the intent engine, exported in Prometheus text
 * format at `/metrics`.
 *
 * ## Tracked
 *
 * - Intents composed, blocked, sent to verification and degraded
 * - Sub-component timeouts, labelled by component
 * - Compose latency
 * - Calls per `/payments-tax` endpoint
 */

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fixed-point scale used to accumulate histogram sums in an integer.
const SUM_SCALE: f64 = 1_000_000.0;

#[derive(Debug, Clone, Default)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Gauge {
    value: Arc<AtomicU64>,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: f64) {
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Histogram {
    sum_micros: Arc<AtomicU64>,
    count: Arc<AtomicU64>,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, value: f64) {
        let scaled = (value.max(0.0) * SUM_SCALE) as u64;
        self.sum_micros.fetch_add(scaled, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / SUM_SCALE
    }
}

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: DashMap<String, Counter>,
    gauges: DashMap<String, Gauge>,
    histograms: DashMap<String, Histogram>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_counter(&self, name: &str) -> Counter {
        self.counters
            .entry(name.to_string())
            .or_insert_with(Counter::new)
            .clone()
    }

    pub fn get_or_create_gauge(&self, name: &str) -> Gauge {
        self.gauges
            .entry(name.to_string())
            .or_insert_with(Gauge::new)
            .clone()
    }

    pub fn get_or_create_histogram(&self, name: &str) -> Histogram {
        self.histograms
            .entry(name.to_string())
            .or_insert_with(Histogram::new)
            .clone()
    }

    /// Renders every metric in Prometheus text format, sorted by name.
    pub fn export_metrics(&self) -> String {
        let mut counters: Vec<(String, u64)> = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), e.value().get()))
            .collect();
        counters.sort();

        let mut gauges: Vec<(String, f64)> = self
            .gauges
            .iter()
            .map(|e| (e.key().clone(), e.value().get()))
            .collect();
        gauges.sort_by(|a, b| a.0.cmp(&b.0));

        let mut histograms: Vec<(String, u64, f64)> = self
            .histograms
            .iter()
            .map(|e| (e.key().clone(), e.value().get_count(), e.value().get_sum()))
            .collect();
        histograms.sort_by(|a, b| a.0.cmp(&b.0));

        let mut output = String::new();
        let mut last_family = String::new();
        for (name, value) in counters {
            // Labelled series share one TYPE line per family
            let family = name.split('{').next().unwrap_or(&name).to_string();
            if family != last_family {
                output.push_str(&format!("# TYPE {} counter\n", family));
                last_family = family;
            }
            output.push_str(&format!("{} {}\n", name, value));
        }
        for (name, value) in gauges {
            output.push_str(&format!("# TYPE {} gauge\n{} {}\n", name, name, value));
        }
        for (name, count, sum) in histograms {
            output.push_str(&format!("# TYPE {} summary\n", name));
            output.push_str(&format!("{}_count {}\n", name, count));
            output.push_str(&format!("{}_sum {}\n", name, sum));
        }
        output
    }
}

// Global metrics registry
lazy_static::lazy_static! {
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

pub fn increment_counter(name: &str) {
    METRICS.get_or_create_counter(name).inc();
}

pub fn set_gauge(name: &str, value: f64) {
    METRICS.get_or_create_gauge(name).set(value);
}

/// Intent-engine metrics.
pub struct IntentMetrics {
    pub composed: Counter,
    pub blocked: Counter,
    pub verification_required: Counter,
    pub degraded: Counter,
    pub failed: Counter,
    pub compose_duration: Histogram,
}

impl Default for IntentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentMetrics {
    pub fn new() -> Self {
        Self {
            composed: METRICS.get_or_create_counter("payment_intents_composed_total"),
            blocked: METRICS.get_or_create_counter("payment_intents_blocked_total"),
            verification_required: METRICS
                .get_or_create_counter("payment_intents_verification_required_total"),
            degraded: METRICS.get_or_create_counter("payment_intents_degraded_total"),
            failed: METRICS.get_or_create_counter("payment_intents_failed_total"),
            compose_duration: METRICS
                .get_or_create_histogram("payment_intent_compose_duration_seconds"),
        }
    }

    pub fn record_timeout(&self, component: &str) {
        increment_counter(&format!(
            "payment_intent_subcall_timeouts_total{{component=\"{}\"}}",
            component
        ));
    }

    pub fn record_duration(&self, duration: Duration) {
        self.compose_duration.observe(duration.as_secs_f64());
    }
}

/// Counts a call to one of the `/payments-tax` endpoints.
pub fn record_endpoint_call(endpoint: &str) {
    increment_counter(&format!(
        "payments_tax_endpoint_calls_total{{endpoint=\"{}\"}}",
        endpoint
    ));
}

/// `GET /metrics`
pub async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.export_metrics(),
    )
}
