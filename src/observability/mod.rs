// observability/mod.rs - Tracing and Metrics

//! Structured logging and Prometheus metrics for the swarm.
//!
//! Every component logs through `tracing` with `actor`, `topic` and `attempt`
//! fields where they apply. Counters and histograms are recorded through the
//! `metrics` facade; they are no-ops until [`init_metrics`] installs the
//! Prometheus recorder.
//!
//! # Example
//!
//! ```ignore
//! use swarm_coordination::observability::{init_metrics, init_tracing, MetricsConfig, TracingConfig};
//!
//! init_tracing(TracingConfig::development());
//! let handle = init_metrics(MetricsConfig::default())?;
//! println!("{}", handle.render());
//! ```

mod metrics;
mod tracing_setup;

pub use metrics::{
    init_metrics, record_dispatch_dropped, record_dispatch_latency, record_dispatch_retry,
    record_fallback_injection, record_fulfillment_attempt, record_lock_acquired,
    record_lock_conflict, record_lock_released, record_message_published, record_transition,
    record_validation_failure, BusMetrics, LifecycleMetrics, LockMetrics, MetricsConfig,
    MetricsError, MetricsHandle, ResourceMetrics,
};

pub use tracing_setup::{init_tracing, try_init_tracing, TracingConfig, TracingFormat};
