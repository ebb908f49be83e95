//! Application state.

use std::sync::Arc;

use clozet_firestore::FirestoreClient;
use clozet_queue::JobQueue;
use clozet_storage::{ImageStore, R2Client};
use clozet_tryon::{
    CreditLedger, FirestoreCreditStore, FirestoreJobStore, FirestoreSourceImages,
    JobOrchestrator, OrchestratorConfig, OrchestratorDeps, QueueDispatcher, RetryService,
    StatusService,
};

use crate::auth::{JwksCache, TokenVerifier};
use crate::config::ApiConfig;
use crate::handlers::health::{DependencyCheck, FirestoreCheck, QueueCheck, StorageCheck};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub orchestrator: Arc<JobOrchestrator>,
    pub status: StatusService,
    pub retry: RetryService,
    pub credits: CreditLedger,
    pub auth: Arc<dyn TokenVerifier>,
    pub checks: Arc<Vec<Arc<dyn DependencyCheck>>>,
}

impl AppState {
    /// Assemble the services over one set of collaborators.
    pub fn new(
        config: ApiConfig,
        deps: OrchestratorDeps,
        orchestrator_config: OrchestratorConfig,
        auth: Arc<dyn TokenVerifier>,
        checks: Vec<Arc<dyn DependencyCheck>>,
    ) -> Self {
        let status = StatusService::new(
            Arc::clone(&deps.jobs),
            Arc::clone(&deps.images),
            orchestrator_config.signed_url_ttl,
        );
        let retry = RetryService::new(Arc::clone(&deps.jobs), Arc::clone(&deps.dispatcher));
        let credits = deps.ledger.clone();

        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(JobOrchestrator::new(deps, orchestrator_config)),
            status,
            retry,
            credits,
            auth,
            checks: Arc::new(checks),
        }
    }

    /// Production state: Firestore, R2, Redis and Firebase Auth from the
    /// environment.
    pub async fn from_env(config: ApiConfig) -> anyhow::Result<Self> {
        let firestore = FirestoreClient::from_env().await?;
        let r2 = R2Client::from_env()?;
        let queue = JobQueue::from_env()?;
        queue.init().await?;

        let jwks = JwksCache::from_env()?;
        jwks.refresh_keys().await?;

        let images: Arc<dyn ImageStore> = Arc::new(r2.clone());

        let deps = OrchestratorDeps {
            jobs: Arc::new(FirestoreJobStore::new(firestore.clone())),
            sources: Arc::new(FirestoreSourceImages::new(firestore.clone())),
            dispatcher: Arc::new(QueueDispatcher::new(queue.clone())),
            // Jobs are processed by the worker
            provider: None,
            images,
            ledger: CreditLedger::new(Arc::new(FirestoreCreditStore::new(firestore.clone()))),
        };

        let checks: Vec<Arc<dyn DependencyCheck>> = vec![
            Arc::new(FirestoreCheck::new(firestore)),
            Arc::new(QueueCheck::new(queue)),
            Arc::new(StorageCheck::new(r2)),
        ];

        Ok(Self::new(
            config,
            deps,
            OrchestratorConfig::from_env(),
            Arc::new(jwks),
            checks,
        ))
    }
}
