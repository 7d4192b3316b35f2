//! Metrics collection and exposition for Prometheus.
//!
//! Counts outbound requests, refresh cycles and replays per app.

mod recorder;

pub use recorder::{Metrics, MetricsRecorder};
