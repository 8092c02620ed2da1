//! Prometheus metrics monitoring
//!
//! Provides metrics collection for:
//! - Request latency (histogram)
//! - Success and failure counts per request type (counters)
//! - Server pushes received (counter)
//! - Reconnects (counter)
//! - Listener count per key (gauge)
//!
//! Every client owns its own registry so several clients can live in one
//! process.

use std::time::{Duration, Instant};

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};

/// Prometheus metrics collector
pub struct MetricsMonitor {
    registry: Registry,

    /// Request latency histogram
    pub request_latency: HistogramVec,

    /// Failed request count counter
    pub failed_request_count: CounterVec,

    /// Success request count counter
    pub success_request_count: CounterVec,

    /// Server push count counter
    pub push_count: CounterVec,

    /// Reconnect counter
    pub reconnect_count: IntCounter,

    /// Listener count gauge
    pub listener_count: GaugeVec,
}

impl MetricsMonitor {
    /// Create a new metrics monitor with its own registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let request_latency = HistogramVec::new(
            HistogramOpts::new(
                "batata_sdk_request_latency_seconds",
                "Request latency in seconds",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(request_latency.clone()))?;

        let failed_request_count = CounterVec::new(
            Opts::new(
                "batata_sdk_failed_requests_total",
                "Total number of failed requests",
            ),
            &["operation", "error_type"],
        )?;
        registry.register(Box::new(failed_request_count.clone()))?;

        let success_request_count = CounterVec::new(
            Opts::new(
                "batata_sdk_success_requests_total",
                "Total number of successful requests",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(success_request_count.clone()))?;

        let push_count = CounterVec::new(
            Opts::new(
                "batata_sdk_server_pushes_total",
                "Total number of server pushes received",
            ),
            &["push_type"],
        )?;
        registry.register(Box::new(push_count.clone()))?;

        let reconnect_count = IntCounter::new(
            "batata_sdk_reconnects_total",
            "Total number of session reconnects",
        )?;
        registry.register(Box::new(reconnect_count.clone()))?;

        let listener_count = GaugeVec::new(
            Opts::new("batata_sdk_listener_count", "Number of registered listeners"),
            &["module", "key"],
        )?;
        registry.register(Box::new(listener_count.clone()))?;

        Ok(Self {
            registry,
            request_latency,
            failed_request_count,
            success_request_count,
            push_count,
            reconnect_count,
            listener_count,
        })
    }

    /// Record request latency
    pub fn record_latency(&self, operation: &str, status: &str, duration: Duration) {
        self.request_latency
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    /// Increment failed request count
    pub fn increment_failed_request(&self, operation: &str, error_type: &str) {
        self.failed_request_count
            .with_label_values(&[operation, error_type])
            .inc();
    }

    /// Increment success request count
    pub fn increment_success_request(&self, operation: &str) {
        self.success_request_count
            .with_label_values(&[operation])
            .inc();
    }

    pub fn increment_push(&self, push_type: &str) {
        self.push_count.with_label_values(&[push_type]).inc();
    }

    pub fn increment_reconnect(&self) {
        self.reconnect_count.inc();
    }

    /// Update the listener count of one config or service key
    pub fn update_listener_count(&self, module: &str, key: &str, count: usize) {
        self.listener_count
            .with_label_values(&[module, key])
            .set(count as f64);
    }

    /// Get metrics in Prometheus text format
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Simple metrics timer for measuring operation duration
pub struct Timer<'a> {
    metrics: &'a MetricsMonitor,
    operation: &'a str,
    start: Instant,
}

impl<'a> Timer<'a> {
    /// Create a new timer
    pub fn start(metrics: &'a MetricsMonitor, operation: &'a str) -> Self {
        Self {
            metrics,
            operation,
            start: Instant::now(),
        }
    }

    /// Stop the timer and record success
    pub fn success(self) {
        let duration = self.start.elapsed();
        self.metrics
            .record_latency(self.operation, "success", duration);
        self.metrics.increment_success_request(self.operation);
    }

    /// Stop the timer and record failure
    pub fn failure(self, error_type: &str) {
        let duration = self.start.elapsed();
        self.metrics
            .record_latency(self.operation, "failure", duration);
        self.metrics
            .increment_failed_request(self.operation, error_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_monitors_do_not_collide() {
        let first = MetricsMonitor::new().unwrap();
        let second = MetricsMonitor::new().unwrap();

        first.increment_success_request("ConfigQueryRequest");
        first.increment_reconnect();

        let text = first.gather();
        assert!(text.contains("batata_sdk_success_requests_total"));
        assert!(text.contains("batata_sdk_reconnects_total 1"));
        assert!(!second.gather().contains("ConfigQueryRequest"));
    }

    #[test]
    fn test_timer_records_failure() {
        let metrics = MetricsMonitor::new().unwrap();
        Timer::start(&metrics, "InstanceRequest").failure("timeout");

        let text = metrics.gather();
        assert!(text.contains("batata_sdk_failed_requests_total"));
        assert!(text.contains("error_type=\"timeout\""));
    }
}
