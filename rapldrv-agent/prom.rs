use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

use crate::dispatch::Status;
use crate::error::Result;

/// Request counters of the socket service
///
/// Counting happens in the transport after a request completes; the
/// dispatcher itself stays stateless.
pub struct DispatchMetricExporter {
    registry: Arc<Registry>,
    requests: IntCounterVec,
}

impl DispatchMetricExporter {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let requests = IntCounterVec::new(
            Opts::new("rapldrv_requests_total", "Completed device-control requests"),
            &["status"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        // Pre-create every series so scrapes see zeroes instead of gaps
        for status in Status::all() {
            requests.with_label_values(&[status.name()]);
        }

        Ok(Self { registry, requests })
    }

    pub fn observe(&self, status: Status) {
        self.requests.with_label_values(&[status.name()]).inc();
    }

    pub fn count(&self, status: Status) -> u64 {
        self.requests.with_label_values(&[status.name()]).get()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Text exposition of all registered metrics
    pub fn gather(&self) -> (String, Vec<u8>) {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        let metric_families = self.registry.gather();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode request metrics: {}", e);
        }
        (encoder.format_type().to_string(), buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_counts_by_status() {
        let exporter = DispatchMetricExporter::new().unwrap();
        exporter.observe(Status::Success);
        exporter.observe(Status::Success);
        exporter.observe(Status::InvalidRequest);

        assert_eq!(exporter.count(Status::Success), 2);
        assert_eq!(exporter.count(Status::InvalidRequest), 1);
        assert_eq!(exporter.count(Status::AccessFault), 0);
    }

    #[test]
    fn test_gather_text() {
        let exporter = DispatchMetricExporter::new().unwrap();
        exporter.observe(Status::UnsupportedOperation);

        let (content_type, body) = exporter.gather();
        let body = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(body.contains("rapldrv_requests_total{status=\"unsupported_operation\"} 1"));
        assert!(body.contains("rapldrv_requests_total{status=\"success\"} 0"));
    }
}
