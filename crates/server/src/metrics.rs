use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static MERGES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static BEST_EFFORT_FAILURES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static COMPENSATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    register_collector(
        IntCounterVec::new(Opts::new(name, help), labels)
            .unwrap_or_else(|err| panic!("create {}: {}", name, err)),
    )
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        counter_vec(
            "casework_http_requests_total",
            "HTTP request count.",
            &["route", "method", "status"],
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "casework_http_request_duration_seconds",
                    "HTTP request duration in seconds.",
                )
                .buckets(vec![
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ]),
                &["route", "method", "outcome"],
            )
            .expect("create casework_http_request_duration_seconds"),
        )
    })
}

fn merges_total() -> &'static IntCounterVec {
    MERGES_TOTAL.get_or_init(|| {
        counter_vec(
            "casework_merges_total",
            "Applicant merges by outcome.",
            &["outcome"],
        )
    })
}

fn best_effort_failures_total() -> &'static IntCounterVec {
    BEST_EFFORT_FAILURES_TOTAL.get_or_init(|| {
        counter_vec(
            "casework_best_effort_failures_total",
            "Non-fatal sub-step failures that were logged and skipped.",
            &["step"],
        )
    })
}

fn compensations_total() -> &'static IntCounterVec {
    COMPENSATIONS_TOTAL.get_or_init(|| {
        counter_vec(
            "casework_compensations_total",
            "Compensating deletes of identity accounts by outcome.",
            &["outcome"],
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status_str.as_str()])
        .inc();

    let outcome = if (200..400).contains(&status) {
        "success"
    } else {
        "error"
    };
    http_request_duration_seconds()
        .with_label_values(&[route, method, outcome])
        .observe(duration.as_secs_f64());
}

pub fn observe_merge(outcome: &str) {
    merges_total().with_label_values(&[outcome]).inc();
}

pub fn inc_best_effort_failure(step: &str) {
    best_effort_failures_total().with_label_values(&[step]).inc();
}

pub fn observe_compensation(outcome: &str) {
    compensations_total().with_label_values(&[outcome]).inc();
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = merges_total();
    let _ = best_effort_failures_total();
    let _ = compensations_total();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_observed_series() {
        observe_http_request("/applications", "GET", 200, Duration::from_millis(3));
        observe_merge("success");
        inc_best_effort_failure("migrate_client");

        let (body, content_type) = render().expect("render");
        let text = String::from_utf8(body).expect("utf8");
        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("casework_http_requests_total"));
        assert!(text.contains("route=\"/applications\""));
        assert!(text.contains("casework_merges_total"));
        assert!(text.contains("step=\"migrate_client\""));
    }
}
