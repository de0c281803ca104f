//! Prometheus instrumentation for broadcasts.
//!
//! All series live in the default registry so `/metrics` on the trigger
//! endpoint can gather them together with the process collector:
//! - `dm_blaster_run_duration_seconds{trigger}`
//! - `dm_blaster_run_total{trigger,status}`
//! - `dm_blaster_run_inflight{trigger}`
//! - `dm_blaster_deliveries_total{outcome}`

use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram_vec, register_int_counter_vec, register_int_gauge_vec,
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};
use tracing::warn;

/// Run length boundaries in seconds. A run is one identity call plus two
/// calls per recipient, so large lists take minutes.
const RUN_SECONDS_BUCKETS: &[f64] = &[
    0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0,
];

struct BroadcastMetrics {
    run_seconds: HistogramVec,
    runs: IntCounterVec,
    runs_in_progress: IntGaugeVec,
    deliveries: IntCounterVec,
}

impl BroadcastMetrics {
    fn register() -> Self {
        if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
            warn!("Process metrics unavailable: {}", err);
        }

        Self {
            run_seconds: register_histogram_vec!(
                "dm_blaster_run_duration_seconds",
                "Wall-clock time of one broadcast, identity call to last post",
                &["trigger"],
                RUN_SECONDS_BUCKETS.to_vec()
            )
            .expect("dm_blaster_run_duration_seconds registered twice"),
            runs: register_int_counter_vec!(
                "dm_blaster_run_total",
                "Finished broadcasts; status=error means the run aborted before the loop ended",
                &["trigger", "status"]
            )
            .expect("dm_blaster_run_total registered twice"),
            runs_in_progress: register_int_gauge_vec!(
                "dm_blaster_run_inflight",
                "Broadcasts currently walking their recipient list",
                &["trigger"]
            )
            .expect("dm_blaster_run_inflight registered twice"),
            deliveries: register_int_counter_vec!(
                "dm_blaster_deliveries_total",
                "Recipients processed, by outcome (sent, channel_failed, post_failed)",
                &["outcome"]
            )
            .expect("dm_blaster_deliveries_total registered twice"),
        }
    }
}

static METRICS: Lazy<BroadcastMetrics> = Lazy::new(BroadcastMetrics::register);

/// `trigger` is `script` or `api`.
pub fn record_run_start(trigger: &'static str) {
    METRICS.runs_in_progress.with_label_values(&[trigger]).inc();
}

pub fn record_run_result(trigger: &'static str, duration: Duration, success: bool) {
    let status = if success { "ok" } else { "error" };
    METRICS.runs_in_progress.with_label_values(&[trigger]).dec();
    METRICS
        .run_seconds
        .with_label_values(&[trigger])
        .observe(duration.as_secs_f64());
    METRICS.runs.with_label_values(&[trigger, status]).inc();
}

pub fn record_delivery(outcome: &'static str) {
    METRICS.deliveries.with_label_values(&[outcome]).inc();
}

/// Text exposition of the default registry, with its content type.
pub fn encode() -> Result<(String, Vec<u8>), prometheus::Error> {
    Lazy::force(&METRICS);
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}
