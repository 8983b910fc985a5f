//! Prometheus metrics, one registry per process.
//!
//! Naming convention: `contest_<subsystem>_<metric>_<unit>`.

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // AUTH
    // =========================================================================

    pub static ref OTP_SENT: Counter = Counter::new(
        "contest_auth_otp_sent_total",
        "One-time codes dispatched"
    ).expect("metric creation failed");

    pub static ref OTP_FAILURES: CounterVec = CounterVec::new(
        Opts::new("contest_auth_otp_failures_total", "Rejected OTP operations"),
        &["reason"]
    ).expect("metric creation failed");

    pub static ref SESSIONS_CREATED: Counter = Counter::new(
        "contest_auth_sessions_created_total",
        "Sessions created after successful verification"
    ).expect("metric creation failed");

    pub static ref SESSION_VALIDATION_FAILURES: Counter = Counter::new(
        "contest_auth_session_validation_failures_total",
        "Bearer tokens that matched no live session"
    ).expect("metric creation failed");

    pub static ref SESSIONS_CLEANED: Counter = Counter::new(
        "contest_auth_sessions_cleaned_total",
        "Expired session rows removed by scheduled cleanup"
    ).expect("metric creation failed");

    pub static ref FRAUD_SIGNALS: CounterVec = CounterVec::new(
        Opts::new("contest_auth_fraud_signals_total", "Non-blocking fraud signals"),
        &["kind"]
    ).expect("metric creation failed");

    // =========================================================================
    // SCORING PIPELINE
    // =========================================================================

    pub static ref JOBS_QUEUED: Counter = Counter::new(
        "contest_pipeline_jobs_queued_total",
        "Score jobs published by the dispatcher"
    ).expect("metric creation failed");

    pub static ref JOBS_PROCESSED: CounterVec = CounterVec::new(
        Opts::new("contest_pipeline_jobs_processed_total", "Score jobs consumed"),
        &["outcome"]  // scored / duplicate / missing / failed
    ).expect("metric creation failed");

    pub static ref JOB_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "contest_pipeline_job_duration_seconds",
            "Wall-clock time spent scoring one submission"
        ).buckets(exponential_buckets(0.001, 2.0, 12).unwrap())
    ).expect("metric creation failed");

    pub static ref QUEUE_DEPTH: Gauge = Gauge::new(
        "contest_pipeline_queue_depth",
        "Messages waiting in the score queue at last probe"
    ).expect("metric creation failed");
}

/// Register every metric with the process registry. Call once at startup;
/// re-registration errors are ignored so tests can call it freely.
pub fn register() {
    let _ = REGISTRY.register(Box::new(OTP_SENT.clone()));
    let _ = REGISTRY.register(Box::new(OTP_FAILURES.clone()));
    let _ = REGISTRY.register(Box::new(SESSIONS_CREATED.clone()));
    let _ = REGISTRY.register(Box::new(SESSION_VALIDATION_FAILURES.clone()));
    let _ = REGISTRY.register(Box::new(SESSIONS_CLEANED.clone()));
    let _ = REGISTRY.register(Box::new(FRAUD_SIGNALS.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_QUEUED.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_PROCESSED.clone()));
    let _ = REGISTRY.register(Box::new(JOB_DURATION.clone()));
    let _ = REGISTRY.register(Box::new(QUEUE_DEPTH.clone()));
}

/// Text exposition of the process registry.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %err, "Metric encoding failed");
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        register();
        register();

        OTP_SENT.inc();
        let exposition = gather();
        assert!(exposition.contains("contest_auth_otp_sent_total"));
    }

    #[test]
    fn test_outcome_labels() {
        register();
        JOBS_PROCESSED.with_label_values(&["scored"]).inc();
        JOBS_PROCESSED.with_label_values(&["duplicate"]).inc();

        let exposition = gather();
        assert!(exposition.contains(r#"outcome="scored""#));
    }
}
