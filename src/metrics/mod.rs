//! Prometheus metrics for the migration engine
//!
//! This module tracks:
//! - Jobs: started, finished by outcome, cancellations, running gauge, duration
//! - Lifecycle: repository status transitions
//! - API: requests by endpoint and status
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for job supervisor metrics
struct JobMetrics {
    started: CounterVec,
    finished: CounterVec,
    cancellations: Counter,
    running: Gauge,
    duration: HistogramVec,
    reconciled: Counter,
}

/// Container for lifecycle and API metrics
struct EngineMetrics {
    transitions: CounterVec,
    api_requests: CounterVec,
    api_duration: HistogramVec,
}

static JOB_METRICS: OnceLock<JobMetrics> = OnceLock::new();

static ENGINE_METRICS: OnceLock<EngineMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
/// On failure the error is returned and every recording function stays a
/// no-op.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let jobs = JobMetrics {
        started: register_counter_vec!(
            "ghmigrate_jobs_started_total",
            "Total jobs started by kind",
            &["kind"]
        )?,
        finished: register_counter_vec!(
            "ghmigrate_jobs_finished_total",
            "Total jobs finished by kind and outcome",
            &["kind", "outcome"]
        )?,
        cancellations: register_counter!(
            "ghmigrate_job_cancellations_total",
            "Total accepted cancellation requests"
        )?,
        running: register_gauge!(
            "ghmigrate_jobs_running",
            "Number of jobs currently registered on this process"
        )?,
        duration: register_histogram_vec!(
            "ghmigrate_job_duration_seconds",
            "Wall-clock job duration in seconds",
            &["kind"],
            vec![1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0]
        )?,
        reconciled: register_counter!(
            "ghmigrate_jobs_reconciled_total",
            "Total abandoned progress records marked failed by the sweep"
        )?,
    };

    let engine = EngineMetrics {
        transitions: register_counter_vec!(
            "ghmigrate_repository_transitions_total",
            "Total repository status transitions by target status",
            &["to"]
        )?,
        api_requests: register_counter_vec!(
            "ghmigrate_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        api_duration: register_histogram_vec!(
            "ghmigrate_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
        )?,
    };

    JOB_METRICS
        .set(jobs)
        .map_err(|_| "Job metrics already initialized")?;
    ENGINE_METRICS
        .set(engine)
        .map_err(|_| "Engine metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    JOB_METRICS.get().is_some() && ENGINE_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_job_started(kind: &str) {
    if let Some(m) = JOB_METRICS.get() {
        m.started.with_label_values(&[kind]).inc();
    }
}

/// Record the final outcome of a job and its duration
pub fn record_job_finished(kind: &str, outcome: &str, duration_secs: f64) {
    let Some(m) = JOB_METRICS.get() else {
        return;
    };

    m.finished.with_label_values(&[kind, outcome]).inc();
    m.duration.with_label_values(&[kind]).observe(duration_secs);
}

pub fn record_cancellation() {
    if let Some(m) = JOB_METRICS.get() {
        m.cancellations.inc();
    }
}

pub fn set_running_jobs(count: usize) {
    if let Some(m) = JOB_METRICS.get() {
        m.running.set(count as f64);
    }
}

pub fn record_reconciled(count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = JOB_METRICS.get() {
        m.reconciled.inc_by(count as f64);
    }
}

pub fn record_transition(to: &str) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.transitions.with_label_values(&[to]).inc();
    }
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = ENGINE_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.api_requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
    m.api_duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_metrics_initialized() {
        let _ = init_metrics();
    }

    #[test]
    fn test_init_metrics_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(metrics_initialized());
    }

    #[test]
    fn test_encode_metrics() {
        ensure_metrics_initialized();
        record_job_started("discovery");
        let text = encode_metrics().unwrap();
        assert!(text.contains("ghmigrate_jobs_started_total"));
    }

    #[test]
    fn test_recording_does_not_panic() {
        ensure_metrics_initialized();
        record_job_finished("migration", "complete", 12.5);
        record_cancellation();
        set_running_jobs(3);
        record_reconciled(2);
        record_transition("migration_failed");
        record_api_request("/api/health", 200, 0.002);
    }
}
