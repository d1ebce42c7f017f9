// observability/metrics.rs - Prometheus Metrics

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Metrics errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to build Prometheus recorder: {0}")]
    Build(#[from] BuildError),
}

/// Configuration for metrics
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Histogram buckets for dispatch latency (in seconds)
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            latency_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

/// Handle to the installed Prometheus recorder
#[derive(Clone)]
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Message bus metrics
pub struct BusMetrics;

impl BusMetrics {
    pub const PUBLISHED_TOTAL: &'static str = "swarm_messages_published_total";
    pub const INVALID_TOTAL: &'static str = "swarm_messages_invalid_total";
    pub const RETRIES_TOTAL: &'static str = "swarm_dispatch_retries_total";
    pub const DROPPED_TOTAL: &'static str = "swarm_dispatch_dropped_total";
    pub const LATENCY_SECONDS: &'static str = "swarm_dispatch_latency_seconds";
}

/// Lifecycle metrics
pub struct LifecycleMetrics;

impl LifecycleMetrics {
    pub const TRANSITIONS_TOTAL: &'static str = "swarm_lifecycle_transitions_total";
}

/// Sector lock metrics
pub struct LockMetrics;

impl LockMetrics {
    pub const ACQUIRED_TOTAL: &'static str = "swarm_locks_acquired_total";
    pub const CONFLICTS_TOTAL: &'static str = "swarm_lock_conflicts_total";
    pub const RELEASED_TOTAL: &'static str = "swarm_locks_released_total";
}

/// Resource negotiation metrics
pub struct ResourceMetrics;

impl ResourceMetrics {
    pub const FULFILLMENT_ATTEMPTS_TOTAL: &'static str = "swarm_fulfillment_attempts_total";
    pub const FALLBACK_INJECTIONS_TOTAL: &'static str = "swarm_fallback_injections_total";
}

/// Install the global Prometheus recorder
///
/// Nothing is served over HTTP; callers render through the returned handle.
pub fn init_metrics(config: MetricsConfig) -> Result<MetricsHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(BusMetrics::LATENCY_SECONDS.into()),
            &config.latency_buckets,
        )?
        .install_recorder()?;

    describe_counter!(BusMetrics::PUBLISHED_TOTAL, "Messages accepted by the bus");
    describe_counter!(BusMetrics::INVALID_TOTAL, "Messages rejected by validation");
    describe_counter!(BusMetrics::RETRIES_TOTAL, "Callback retries after a failure");
    describe_counter!(
        BusMetrics::DROPPED_TOTAL,
        "Deliveries dropped after exhausting retries"
    );
    describe_histogram!(
        BusMetrics::LATENCY_SECONDS,
        "Time from dispatch start to successful delivery in seconds"
    );
    describe_counter!(
        LifecycleMetrics::TRANSITIONS_TOTAL,
        "Effective lifecycle state transitions"
    );
    describe_counter!(LockMetrics::ACQUIRED_TOTAL, "Sector locks acquired");
    describe_counter!(LockMetrics::CONFLICTS_TOTAL, "Sector lock attempts refused");
    describe_counter!(LockMetrics::RELEASED_TOTAL, "Sector locks released");
    describe_counter!(
        ResourceMetrics::FULFILLMENT_ATTEMPTS_TOTAL,
        "Gather and craft rounds run by producers"
    );
    describe_counter!(
        ResourceMetrics::FALLBACK_INJECTIONS_TOTAL,
        "Materials injected by the deterministic fallback"
    );

    tracing::info!("Metrics recorder installed");

    Ok(MetricsHandle { handle })
}

// Recording functions

pub fn record_message_published(topic: &str) {
    counter!(BusMetrics::PUBLISHED_TOTAL, "topic" => topic.to_string()).increment(1);
}

/// Record a validation failure at `stage` ("publish" or "dispatch")
pub fn record_validation_failure(topic: &str, stage: &'static str) {
    counter!(
        BusMetrics::INVALID_TOTAL,
        "topic" => topic.to_string(),
        "stage" => stage
    )
    .increment(1);
}

pub fn record_dispatch_retry(topic: &str) {
    counter!(BusMetrics::RETRIES_TOTAL, "topic" => topic.to_string()).increment(1);
}

pub fn record_dispatch_dropped(topic: &str) {
    counter!(BusMetrics::DROPPED_TOTAL, "topic" => topic.to_string()).increment(1);
}

pub fn record_dispatch_latency(topic: &str, latency: Duration) {
    histogram!(BusMetrics::LATENCY_SECONDS, "topic" => topic.to_string())
        .record(latency.as_secs_f64());
}

pub fn record_transition(actor: &str, to: &str) {
    counter!(
        LifecycleMetrics::TRANSITIONS_TOTAL,
        "actor" => actor.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

pub fn record_lock_acquired(actor: &str) {
    counter!(LockMetrics::ACQUIRED_TOTAL, "actor" => actor.to_string()).increment(1);
}

pub fn record_lock_conflict(actor: &str) {
    counter!(LockMetrics::CONFLICTS_TOTAL, "actor" => actor.to_string()).increment(1);
}

pub fn record_lock_released(actor: &str, count: usize) {
    counter!(LockMetrics::RELEASED_TOTAL, "actor" => actor.to_string()).increment(count as u64);
}

pub fn record_fulfillment_attempt(actor: &str) {
    counter!(
        ResourceMetrics::FULFILLMENT_ATTEMPTS_TOTAL,
        "actor" => actor.to_string()
    )
    .increment(1);
}

/// Record `quantity` units of `material` injected by the fallback
pub fn record_fallback_injection(actor: &str, material: &str, quantity: u64) {
    counter!(
        ResourceMetrics::FALLBACK_INJECTIONS_TOTAL,
        "actor" => actor.to_string(),
        "material" => material.to_string()
    )
    .increment(quantity);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_default() {
        let config = MetricsConfig::default();
        assert!(!config.latency_buckets.is_empty());
        assert!(config.latency_buckets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_metric_names() {
        assert!(BusMetrics::PUBLISHED_TOTAL.starts_with("swarm_"));
        assert!(LifecycleMetrics::TRANSITIONS_TOTAL.starts_with("swarm_"));
        assert!(LockMetrics::CONFLICTS_TOTAL.starts_with("swarm_"));
        assert!(ResourceMetrics::FALLBACK_INJECTIONS_TOTAL.starts_with("swarm_"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_message_published("topic");
        record_dispatch_latency("topic", Duration::from_millis(3));
        record_fallback_injection("actor", "WOOD", 4);
    }
}
