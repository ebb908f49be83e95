//! Redis queue integration tests.

use clozet_models::{JobOptions, TryonJob};
use clozet_queue::{JobQueue, ProcessTryonJob, QueueConfig};

fn test_queue() -> JobQueue {
    dotenvy::dotenv().ok();
    let config = QueueConfig {
        stream_name: format!("clozet:test:{}", uuid_suffix()),
        consumer_group: "clozet:test-workers".to_string(),
        dlq_stream_name: format!("clozet:test:dlq:{}", uuid_suffix()),
        ..QueueConfig::from_env()
    };
    JobQueue::new(config).expect("Failed to create queue")
}

fn uuid_suffix() -> String {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default().to_string()
}

fn message() -> ProcessTryonJob {
    let job = TryonJob::new(
        "test_user_queue",
        "avatar-1",
        "avatars/test_user_queue/a.jpg",
        "fit-1",
        "fits/test_user_queue/f.jpg",
        JobOptions::new(),
    );
    ProcessTryonJob::for_job(&job)
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_consume_ack() {
    let queue = test_queue();
    queue.init().await.expect("Failed to initialize queue");

    let job = message();
    queue.enqueue(&job).await.expect("Failed to enqueue");

    let jobs = queue
        .consume("test-consumer", 1000, 10)
        .await
        .expect("Failed to consume");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].1, job);

    queue.ack(&jobs[0].0).await.expect("Failed to ack");
    assert_eq!(queue.len().await.expect("Failed to get length"), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_duplicate_revision_is_rejected() {
    let queue = test_queue();
    queue.init().await.expect("Failed to initialize queue");

    let job = message();
    queue.enqueue(&job).await.expect("Failed to enqueue");
    let err = queue.enqueue(&job).await.unwrap_err();
    assert!(err.is_duplicate());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_unacked_message_can_be_claimed() {
    let queue = test_queue();
    queue.init().await.expect("Failed to initialize queue");

    let job = message();
    queue.enqueue(&job).await.expect("Failed to enqueue");
    let first = queue.consume("crashed-worker", 1000, 1).await.unwrap();
    assert_eq!(first.len(), 1);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let claimed = queue
        .claim_pending("rescuer", 10, 10)
        .await
        .expect("Failed to claim");
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].1.job_id, job.job_id);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_dlq() {
    let queue = test_queue();
    queue.init().await.expect("Failed to initialize queue");

    let job = message();
    queue.enqueue(&job).await.expect("Failed to enqueue");
    let jobs = queue.consume("test-consumer", 1000, 1).await.unwrap();
    let (message_id, consumed) = &jobs[0];

    assert_eq!(queue.increment_retry(message_id).await.unwrap(), 1);
    queue
        .dlq(message_id, consumed, "Firestore unavailable")
        .await
        .expect("Failed to move to DLQ");

    assert_eq!(queue.dlq_len().await.unwrap(), 1);
    assert_eq!(queue.get_retry_count(message_id).await.unwrap(), 0);
}
