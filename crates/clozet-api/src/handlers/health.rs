//! Health check handlers.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::warn;

use clozet_firestore::FirestoreClient;
use clozet_queue::JobQueue;
use clozet_storage::R2Client;

use crate::state::AppState;

/// A backing service `/ready` depends on.
#[async_trait]
pub trait DependencyCheck: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self) -> Result<(), String>;
}

pub struct FirestoreCheck(FirestoreClient);

impl FirestoreCheck {
    pub fn new(client: FirestoreClient) -> Self {
        Self(client)
    }
}

#[async_trait]
impl DependencyCheck for FirestoreCheck {
    fn name(&self) -> &'static str {
        "firestore"
    }

    async fn check(&self) -> Result<(), String> {
        // A missing document still proves Firestore answered
        self.0
            .get_document("_health", "_check")
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

pub struct QueueCheck(JobQueue);

impl QueueCheck {
    pub fn new(queue: JobQueue) -> Self {
        Self(queue)
    }
}

#[async_trait]
impl DependencyCheck for QueueCheck {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn check(&self) -> Result<(), String> {
        self.0.ping().await.map_err(|e| e.to_string())
    }
}

pub struct StorageCheck(R2Client);

impl StorageCheck {
    pub fn new(client: R2Client) -> Self {
        Self(client)
    }
}

#[async_trait]
impl DependencyCheck for StorageCheck {
    fn name(&self) -> &'static str {
        "storage"
    }

    async fn check(&self) -> Result<(), String> {
        self.0.check_connectivity().await.map_err(|e| e.to_string())
    }
}

/// A dependency that hasn't answered by now counts as down.
const CHECK_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// Liveness: the process is up. Touches no dependency.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CheckStatus {
    Ok { latency_ms: u64 },
    Error { error: String },
}

async fn probe(dependency: &dyn DependencyCheck) -> CheckStatus {
    let start = Instant::now();
    match tokio::time::timeout(CHECK_TIMEOUT, dependency.check()).await {
        Ok(Ok(())) => CheckStatus::Ok {
            latency_ms: start.elapsed().as_millis() as u64,
        },
        Ok(Err(error)) => CheckStatus::Error { error },
        Err(_) => CheckStatus::Error {
            error: format!("no answer within {}s", CHECK_TIMEOUT.as_secs()),
        },
    }
}

/// Readiness: every backing service answered. 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let mut probes = JoinSet::new();
    for dependency in state.checks.iter().cloned() {
        probes.spawn(async move { (dependency.name(), probe(dependency.as_ref()).await) });
    }

    let mut checks = BTreeMap::new();
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok((name, status)) => {
                checks.insert(name, status);
            }
            Err(e) => warn!(error = %e, "Readiness probe panicked"),
        }
    }

    let ready = checks.len() == state.checks.len()
        && checks.values().all(|c| matches!(c, CheckStatus::Ok { .. }));
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            status: if ready { "ready" } else { "degraded" },
            checks,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hanging;

    #[async_trait]
    impl DependencyCheck for Hanging {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn check(&self) -> Result<(), String> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_dependency_times_out() {
        match probe(&Hanging).await {
            CheckStatus::Error { error } => assert_eq!(error, "no answer within 3s"),
            CheckStatus::Ok { .. } => panic!("hanging check reported ok"),
        }
    }

    #[test]
    fn test_check_status_shape() {
        let ok = serde_json::to_value(CheckStatus::Ok { latency_ms: 4 }).unwrap();
        assert_eq!(ok, serde_json::json!({"status": "ok", "latency_ms": 4}));

        let err = serde_json::to_value(CheckStatus::Error {
            error: "refused".to_string(),
        })
        .unwrap();
        assert_eq!(err, serde_json::json!({"status": "error", "error": "refused"}));
    }
}
