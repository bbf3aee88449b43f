use crate::error::{RateLimitError, Result};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome label of a check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Allowed,
    Denied,
    /// Store failed and the failure policy allowed the request
    FailedOpen,
    /// Store failed and the failure policy denied the request
    FailedClosed,
}

impl CheckOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckOutcome::Allowed => "allowed",
            CheckOutcome::Denied => "denied",
            CheckOutcome::FailedOpen => "failed_open",
            CheckOutcome::FailedClosed => "failed_closed",
        }
    }
}

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install a Prometheus recorder for the process
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            RateLimitError::Config(format!("Failed to install metrics recorder: {}", e))
        })?;

        register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Register all metrics with descriptions
pub fn register_metrics() {
    describe_counter!(
        "ratekeeper_checks_total",
        "Total number of rate limit checks by algorithm and outcome"
    );
    describe_counter!(
        "ratekeeper_backend_errors_total",
        "Total number of failed quota store round trips"
    );
    describe_histogram!(
        "ratekeeper_check_duration_seconds",
        "Rate limit check latencies in seconds, store round trips included"
    );

    debug!("All metrics registered with descriptions");
}

/// Record a finished check
pub fn record_check(algorithm: &str, outcome: CheckOutcome, duration: f64) {
    let labels = [
        ("algorithm", algorithm.to_string()),
        ("outcome", outcome.as_str().to_string()),
    ];
    counter!("ratekeeper_checks_total", &labels).increment(1);

    let labels = [("algorithm", algorithm.to_string())];
    histogram!("ratekeeper_check_duration_seconds", &labels).record(duration);
}

/// Record a failed store round trip
pub fn record_backend_error(algorithm: &str) {
    let labels = [("algorithm", algorithm.to_string())];
    counter!("ratekeeper_backend_errors_total", &labels).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(CheckOutcome::Allowed.as_str(), "allowed");
        assert_eq!(CheckOutcome::Denied.as_str(), "denied");
        assert_eq!(CheckOutcome::FailedOpen.as_str(), "failed_open");
        assert_eq!(CheckOutcome::FailedClosed.as_str(), "failed_closed");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        register_metrics();
        record_check("fixed_window", CheckOutcome::Allowed, 0.001);
        record_backend_error("token_bucket");
    }
}
