//! Production wiring of the orchestrator.

use std::sync::Arc;

use tracing::info;

use clozet_firestore::FirestoreClient;
use clozet_queue::JobQueue;
use clozet_storage::{ImageStore, R2Client};
use clozet_tryon::{
    CreditLedger, FirestoreCreditStore, FirestoreJobStore, FirestoreSourceImages,
    JobOrchestrator, OrchestratorConfig, OrchestratorDeps, ProviderClient, ProviderConfig,
    QueueDispatcher, TryonError,
};

use crate::error::WorkerResult;

/// Build the orchestrator against Firestore, R2, Redis and Gemini, all
/// configured from the environment.
///
/// The dispatcher shares the worker's queue so sweeps re-enqueue onto the
/// stream the executor reads.
pub async fn build_orchestrator(queue: JobQueue) -> WorkerResult<Arc<JobOrchestrator>> {
    let firestore = FirestoreClient::from_env().await?;
    let images: Arc<dyn ImageStore> = Arc::new(R2Client::from_env()?);

    let provider_config = ProviderConfig::from_env();
    if provider_config.is_demo() {
        info!("Gemini is not configured, try-ons return the demo result");
    }
    let provider = ProviderClient::new(provider_config, Arc::clone(&images))
        .map_err(TryonError::from)?;

    let deps = OrchestratorDeps {
        jobs: Arc::new(FirestoreJobStore::new(firestore.clone())),
        sources: Arc::new(FirestoreSourceImages::new(firestore.clone())),
        dispatcher: Arc::new(QueueDispatcher::new(queue)),
        provider: Some(Arc::new(provider)),
        images,
        ledger: CreditLedger::new(Arc::new(FirestoreCreditStore::new(firestore))),
    };

    Ok(Arc::new(JobOrchestrator::new(
        deps,
        OrchestratorConfig::from_env(),
    )))
}
