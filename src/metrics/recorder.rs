//! Metrics recording implementation using Prometheus.

use prometheus::{
    register_counter_vec_with_registry, register_histogram_vec_with_registry, CounterVec,
    Encoder, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Trait for recording session metrics.
pub trait MetricsRecorder: Clone + Send + Sync + 'static {
    /// Records the final outcome of an API call ("ok", "api_error", "unauthorized", ...).
    fn record_request(&self, app: &str, outcome: &str);

    /// Records a request replayed after authentication recovery.
    fn record_replay(&self, app: &str);

    /// Records a refresh cycle and its result ("success" or "failure").
    fn record_refresh(&self, app: &str, result: &str);

    /// Records how long a refresh cycle took.
    fn record_refresh_duration(&self, app: &str, duration_secs: f64);

    /// Records a request that joined a refresh cycle already in flight.
    fn record_refresh_joined(&self, app: &str);
}

/// Prometheus metrics collector.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    requests_total: CounterVec,
    replays_total: CounterVec,

    refresh_total: CounterVec,
    refresh_joined_total: CounterVec,
    refresh_duration_seconds: HistogramVec,
}

impl Metrics {
    /// Creates a new metrics instance with its own Prometheus registry.
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        let requests_total = register_counter_vec_with_registry!(
            Opts::new(
                "session_requests_total",
                "Total API requests by final outcome"
            ),
            &["app", "outcome"],
            registry.clone()
        )
        .expect("Failed to register session_requests_total");

        let replays_total = register_counter_vec_with_registry!(
            Opts::new(
                "session_replays_total",
                "Requests replayed after authentication recovery"
            ),
            &["app"],
            registry.clone()
        )
        .expect("Failed to register session_replays_total");

        let refresh_total = register_counter_vec_with_registry!(
            Opts::new("session_refresh_total", "Refresh cycles by result"),
            &["app", "result"],
            registry.clone()
        )
        .expect("Failed to register session_refresh_total");

        let refresh_joined_total = register_counter_vec_with_registry!(
            Opts::new(
                "session_refresh_joined_total",
                "Requests that waited on a refresh cycle already in flight"
            ),
            &["app"],
            registry.clone()
        )
        .expect("Failed to register session_refresh_joined_total");

        let refresh_duration_seconds = register_histogram_vec_with_registry!(
            "session_refresh_duration_seconds",
            "Refresh cycle duration in seconds",
            &["app"],
            vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            registry.clone()
        )
        .expect("Failed to register session_refresh_duration_seconds");

        Metrics {
            registry,
            requests_total,
            replays_total,
            refresh_total,
            refresh_joined_total,
            refresh_duration_seconds,
        }
    }

    /// Renders all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder for Metrics {
    fn record_request(&self, app: &str, outcome: &str) {
        self.requests_total.with_label_values(&[app, outcome]).inc();
    }

    fn record_replay(&self, app: &str) {
        self.replays_total.with_label_values(&[app]).inc();
    }

    fn record_refresh(&self, app: &str, result: &str) {
        self.refresh_total.with_label_values(&[app, result]).inc();
    }

    fn record_refresh_duration(&self, app: &str, duration_secs: f64) {
        self.refresh_duration_seconds
            .with_label_values(&[app])
            .observe(duration_secs);
    }

    fn record_refresh_joined(&self, app: &str) {
        self.refresh_joined_total.with_label_values(&[app]).inc();
    }
}
