//! Job queue using Redis Streams.

use std::time::Duration;

use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::message::ProcessTryonJob;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Max retries before DLQ
    pub max_retries: u32,
    /// How long an enqueued idempotency key blocks duplicates
    pub dedup_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "clozet:tryon".to_string(),
            consumer_group: "clozet:workers".to_string(),
            dlq_stream_name: "clozet:tryon:dlq".to_string(),
            max_retries: 3,
            dedup_ttl: Duration::from_secs(3600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM_NAME").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM_NAME")
                .unwrap_or(defaults.dlq_stream_name),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            dedup_ttl: std::env::var("QUEUE_DEDUP_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedup_ttl),
        }
    }
}

fn dedup_key(idempotency_key: &str) -> String {
    format!("clozet:dedup:{}", idempotency_key)
}

fn retry_key(message_id: &str) -> String {
    format!("clozet:retry:{}", message_id)
}

/// Job queue client.
#[derive(Clone)]
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // Create consumer group (ignore error if already exists)
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Round-trip to Redis, for readiness checks.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Enqueue a job. Returns `QueueError::Duplicate` if the same revision
    /// was enqueued inside the dedup window.
    pub async fn enqueue(&self, job: &ProcessTryonJob) -> QueueResult<String> {
        let mut conn = self.connection().await?;

        let payload = serde_json::to_string(job)?;
        let idempotency_key = job.idempotency_key();

        // Claim the idempotency key first so concurrent dispatches race on SET NX
        let claimed: bool = redis::cmd("SET")
            .arg(dedup_key(&idempotency_key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedup_ttl.as_secs().max(1))
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();
        if !claimed {
            debug!("Duplicate job rejected: {}", idempotency_key);
            return Err(QueueError::Duplicate(idempotency_key));
        }

        let added: Result<String, redis::RedisError> = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(&idempotency_key)
            .query_async(&mut conn)
            .await;

        let message_id = match added {
            Ok(id) => id,
            Err(e) => {
                // Release the key so the next dispatch is not suppressed
                let _: Result<(), _> = conn.del(dedup_key(&idempotency_key)).await;
                return Err(QueueError::enqueue_failed(e.to_string()));
            }
        };

        info!(
            job_id = %job.job_id,
            message_id = %message_id,
            "Enqueued try-on job"
        );

        Ok(message_id)
    }

    /// Acknowledge a job (mark as completed).
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        // Delete the message from the stream
        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        conn.del::<_, ()>(retry_key(message_id)).await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    /// Move a job to the dead letter queue.
    pub async fn dlq(&self, message_id: &str, job: &ProcessTryonJob, error: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let payload = serde_json::to_string(job)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        // Ack the original message
        self.ack(message_id).await?;

        warn!(job_id = %job.job_id, "Moved job to DLQ: {}", error);
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Read new messages for this consumer, blocking up to `block_ms`.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, ProcessTryonJob)>> {
        let mut conn = self.connection().await?;

        let result: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let entries = result
            .map(|reply| reply.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();

        Ok(self.decode_entries(entries, "consumed").await)
    }

    /// Claim entries idle for at least `min_idle_ms`, left behind by workers
    /// that crashed or shut down mid-job.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, ProcessTryonJob)>> {
        let mut conn = self.connection().await?;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms);
        for entry in &pending.ids {
            cmd.arg(&entry.id);
        }

        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;
        Ok(self.decode_entries(claimed.ids, "claimed").await)
    }

    /// Parse stream entries. Malformed payloads are acked and dropped so
    /// they are not redelivered forever.
    async fn decode_entries(
        &self,
        entries: Vec<StreamId>,
        action: &str,
    ) -> Vec<(String, ProcessTryonJob)> {
        let mut jobs = Vec::new();

        for entry in entries {
            match decode_entry(&entry) {
                Some(Ok(job)) => {
                    debug!(job_id = %job.job_id, "Job {} from stream", action);
                    jobs.push((entry.id, job));
                }
                Some(Err(e)) => {
                    warn!(message_id = %entry.id, "Failed to parse job payload: {}", e);
                    self.ack(&entry.id).await.ok();
                }
                None => {
                    warn!(message_id = %entry.id, "Stream entry has no job payload");
                    self.ack(&entry.id).await.ok();
                }
            }
        }

        jobs
    }

    /// Get retry count for a message.
    pub async fn get_retry_count(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.connection().await?;
        let count: Option<u32> = conn.get(retry_key(message_id)).await?;
        Ok(count.unwrap_or(0))
    }

    /// Increment retry count for a message.
    pub async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.connection().await?;

        let key = retry_key(message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        // Set TTL to 24 hours
        conn.expire::<_, ()>(&key, 86400).await?;
        Ok(count)
    }

    /// Get max retries from config.
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}

fn decode_entry(entry: &StreamId) -> Option<Result<ProcessTryonJob, serde_json::Error>> {
    match entry.map.get("job") {
        Some(redis::Value::BulkString(payload)) => Some(serde_json::from_slice(payload)),
        Some(redis::Value::SimpleString(payload)) => Some(serde_json::from_str(payload)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clozet_models::{JobOptions, TryonJob};
    use serial_test::serial;
    use std::collections::HashMap;

    #[test]
    #[serial]
    fn test_config_defaults() {
        for var in [
            "REDIS_URL",
            "QUEUE_STREAM_NAME",
            "QUEUE_CONSUMER_GROUP",
            "QUEUE_DLQ_STREAM_NAME",
            "QUEUE_MAX_RETRIES",
            "QUEUE_DEDUP_TTL_SECS",
        ] {
            std::env::remove_var(var);
        }
        let config = QueueConfig::from_env();
        assert_eq!(config.stream_name, "clozet:tryon");
        assert_eq!(config.dlq_stream_name, "clozet:tryon:dlq");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.dedup_ttl, Duration::from_secs(3600));
    }

    #[test]
    #[serial]
    fn test_config_ignores_unparseable_numbers() {
        std::env::set_var("QUEUE_MAX_RETRIES", "lots");
        let config = QueueConfig::from_env();
        std::env::remove_var("QUEUE_MAX_RETRIES");
        assert_eq!(config.max_retries, 3);
    }

    fn entry(field: &str, value: redis::Value) -> StreamId {
        let mut map = HashMap::new();
        map.insert(field.to_string(), value);
        StreamId {
            id: "1-0".to_string(),
            map,
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_entry() {
        let job = TryonJob::new("u1", "a1", "a.jpg", "f1", "f.jpg", JobOptions::new());
        let message = ProcessTryonJob::for_job(&job);
        let payload = serde_json::to_vec(&message).unwrap();

        let decoded = decode_entry(&entry("job", redis::Value::BulkString(payload)));
        assert_eq!(decoded.unwrap().unwrap(), message);

        let garbage = decode_entry(&entry("job", redis::Value::BulkString(b"{".to_vec())));
        assert!(garbage.unwrap().is_err());

        assert!(decode_entry(&entry("other", redis::Value::Nil)).is_none());
    }

    #[test]
    fn test_keys_are_namespaced() {
        assert_eq!(dedup_key("tryon:u1:j1:5"), "clozet:dedup:tryon:u1:j1:5");
        assert_eq!(retry_key("1-0"), "clozet:retry:1-0");
    }
}
