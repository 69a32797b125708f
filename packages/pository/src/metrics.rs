//! Process-wide request counters and storage gauges, exposed in Prometheus
//! text format v0.0.4 at `/metrics`.

use std::sync::atomic::{AtomicU64, Ordering};

use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,

    pub requests_total: IntCounter,
    pub requests_by_method: IntCounterVec,
    pub requests_by_status: IntCounterVec,
    pub errors_total: IntCounter,
    pub upload_bytes_total: IntCounter,
    pub download_bytes_total: IntCounter,

    latency_ms_sum: AtomicU64,
    latency_count: AtomicU64,
    request_latency_ms_avg: Gauge,

    storage_bytes_total: IntGauge,
    packages_total: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let requests_total =
            IntCounter::new("pository_requests_total", "Total HTTP requests handled").unwrap();
        let requests_by_method = IntCounterVec::new(
            Opts::new(
                "pository_requests_by_method_total",
                "HTTP requests by method",
            ),
            &["method"],
        )
        .unwrap();
        let requests_by_status = IntCounterVec::new(
            Opts::new(
                "pository_requests_by_status_total",
                "HTTP requests by response status",
            ),
            &["status"],
        )
        .unwrap();
        let errors_total = IntCounter::new(
            "pository_errors_total",
            "HTTP responses with a 4xx or 5xx status",
        )
        .unwrap();
        let upload_bytes_total = IntCounter::new(
            "pository_upload_bytes_total",
            "Package bytes accepted via upload",
        )
        .unwrap();
        let download_bytes_total = IntCounter::new(
            "pository_download_bytes_total",
            "Package bytes served to clients",
        )
        .unwrap();
        let request_latency_ms_avg = Gauge::new(
            "pository_request_latency_ms_avg",
            "Mean request latency in milliseconds",
        )
        .unwrap();
        let storage_bytes_total = IntGauge::new(
            "pository_storage_bytes_total",
            "Total bytes of stored package artifacts",
        )
        .unwrap();
        let packages_total =
            IntGauge::new("pository_packages_total", "Number of stored packages").unwrap();

        registry.register(Box::new(requests_total.clone())).unwrap();
        registry
            .register(Box::new(requests_by_method.clone()))
            .unwrap();
        registry
            .register(Box::new(requests_by_status.clone()))
            .unwrap();
        registry.register(Box::new(errors_total.clone())).unwrap();
        registry
            .register(Box::new(upload_bytes_total.clone()))
            .unwrap();
        registry
            .register(Box::new(download_bytes_total.clone()))
            .unwrap();
        registry
            .register(Box::new(request_latency_ms_avg.clone()))
            .unwrap();
        registry
            .register(Box::new(storage_bytes_total.clone()))
            .unwrap();
        registry.register(Box::new(packages_total.clone())).unwrap();

        Self {
            registry,
            requests_total,
            requests_by_method,
            requests_by_status,
            errors_total,
            upload_bytes_total,
            download_bytes_total,
            latency_ms_sum: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            request_latency_ms_avg,
            storage_bytes_total,
            packages_total,
        }
    }

    /// Request-completion hook: counters plus the running latency average.
    pub fn observe_request(&self, method: &str, status: u16, latency_ms: u64) {
        self.requests_total.inc();
        self.requests_by_method.with_label_values(&[method]).inc();
        self.requests_by_status
            .with_label_values(&[&status.to_string()])
            .inc();
        if status >= 400 {
            self.errors_total.inc();
        }
        self.latency_ms_sum.fetch_add(latency_ms, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_storage_stats(&self, total_bytes: u64, package_count: u64) {
        self.storage_bytes_total.set(total_bytes as i64);
        self.packages_total.set(package_count as i64);
    }

    /// Render the registry as Prometheus text format v0.0.4.
    pub fn encode(&self) -> String {
        let count = self.latency_count.load(Ordering::Relaxed);
        let avg = if count == 0 {
            0.0
        } else {
            self.latency_ms_sum.load(Ordering::Relaxed) as f64 / count as f64
        };
        self.request_latency_ms_avg.set(avg);

        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .expect("encoding metrics to a Vec cannot fail");
        String::from_utf8(buf).expect("prometheus text output is UTF-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
