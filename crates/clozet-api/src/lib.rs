//! Axum HTTP API server.
//!
//! This crate provides:
//! - Try-on start, status and retry endpoints
//! - Credit balance and plan endpoints
//! - Firebase ID token verification
//! - Rate limiting, security headers and Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod state;

pub use auth::{AuthUser, JwksCache, TokenVerifier};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use handlers::health::DependencyCheck;
pub use routes::create_router;
pub use state::AppState;
