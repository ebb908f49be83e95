//! API routes.

use axum::body::Body;
use axum::http::Request;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    check_credits, get_credits, get_tryon_status, health, ready, retry_tryon, start_tryon,
    update_plan,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
    ClientRateLimiter,
};
use crate::state::AppState;

/// Every route, with the middleware stack. `/api` routes need a Firebase
/// ID token and are rate limited per client IP.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let tryon_routes = Router::new()
        .route("/tryon", post(start_tryon))
        .route("/tryon/retry", post(retry_tryon))
        .route("/tryon/:job_id", get(get_tryon_status));

    let credit_routes = Router::new()
        .route("/credits", get(get_credits))
        .route("/credits/check", get(check_credits))
        .route("/credits/plan", post(update_plan));

    let rate_limiter =
        ClientRateLimiter::new(state.config.rate_limit_rps, state.config.rate_limit_burst);

    let api_routes = Router::new()
        .merge(tryon_routes)
        .merge(credit_routes)
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let metrics_routes = match metrics_handle {
        Some(handle) => Router::new().route("/metrics", get(move || async move { handle.render() })),
        None => Router::new(),
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            // request_id is filled in by the request_id middleware
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri().path(),
                request_id = tracing::field::Empty,
            )
        }))
        .with_state(state)
}
