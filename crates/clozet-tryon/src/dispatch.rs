//! Redis Streams dispatcher.

use async_trait::async_trait;
use tracing::{debug, info};

use clozet_models::TryonJob;
use clozet_queue::{JobQueue, ProcessTryonJob, QueueError};

use crate::error::TryonResult;
use crate::metrics;
use crate::store::JobDispatcher;

/// Hands jobs to the worker pool through [`JobQueue`].
#[derive(Clone)]
pub struct QueueDispatcher {
    queue: JobQueue,
}

impl QueueDispatcher {
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl JobDispatcher for QueueDispatcher {
    async fn dispatch(&self, job: &TryonJob) -> TryonResult<()> {
        let message = ProcessTryonJob::for_job(job);
        match self.queue.enqueue(&message).await {
            Ok(message_id) => {
                metrics::record_dispatch("enqueued");
                info!(job_id = %job.id, message_id = %message_id, "Dispatched try-on job");
                Ok(())
            }
            // This revision is already on the stream
            Err(QueueError::Duplicate(key)) => {
                metrics::record_dispatch("duplicate");
                debug!(job_id = %job.id, key = %key, "Try-on job already queued");
                Ok(())
            }
            Err(e) => {
                metrics::record_dispatch("error");
                Err(e.into())
            }
        }
    }
}
