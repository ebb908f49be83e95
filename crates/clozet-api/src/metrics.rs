//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder. The handle renders `/metrics`.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub const HTTP_REQUESTS_TOTAL: &str = "clozet_http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "clozet_http_request_duration_seconds";
pub const HTTP_REQUESTS_IN_FLIGHT: &str = "clozet_http_requests_in_flight";
pub const RATE_LIMIT_HITS_TOTAL: &str = "clozet_rate_limit_hits_total";

pub fn record_rate_limit_hit(path: &str) {
    counter!(RATE_LIMIT_HITS_TOTAL, "path" => route_label(path)).increment(1);
}

/// Path label with the job id collapsed, so series stay bounded.
fn route_label(path: &str) -> String {
    match path.strip_prefix("/api/tryon/") {
        Some("retry") | None => path.to_string(),
        Some(_) => "/api/tryon/:job_id".to_string(),
    }
}

/// Decrements the in-flight gauge when the request finishes, even if the
/// handler future is dropped.
struct InFlight;

impl InFlight {
    fn enter() -> Self {
        gauge!(HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
        InFlight
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        gauge!(HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);
    }
}

/// Request count and latency by method, route and status.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let route = route_label(request.uri().path());
    let start = Instant::now();

    let _in_flight = InFlight::enter();
    let response = next.run(request).await;

    let labels = [
        ("method", method),
        ("path", route),
        ("status", response.status().as_u16().to_string()),
    ];
    counter!(HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, &labels).record(start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_label() {
        assert_eq!(
            route_label("/api/tryon/550e8400-e29b-41d4-a716-446655440000"),
            "/api/tryon/:job_id"
        );
        assert_eq!(route_label("/api/tryon/retry"), "/api/tryon/retry");
        assert_eq!(route_label("/api/tryon"), "/api/tryon");
        assert_eq!(route_label("/api/credits/check"), "/api/credits/check");
    }
}
