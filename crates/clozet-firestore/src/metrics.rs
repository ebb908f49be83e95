//! Firestore request, retry and contention metrics.

use std::time::Duration;

use metrics::{counter, histogram};

use crate::error::FirestoreError;

pub const REQUESTS_TOTAL: &str = "clozet_firestore_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "clozet_firestore_request_duration_seconds";
pub const RETRIES_TOTAL: &str = "clozet_firestore_retries_total";
/// Writes that lost an `updateTime` precondition race.
pub const CONFLICTS_TOTAL: &str = "clozet_firestore_conflicts_total";

/// Label for a request outcome: `ok`, or the HTTP status of the failure.
fn outcome<T>(result: &Result<T, FirestoreError>) -> String {
    match result {
        Ok(_) => "ok".to_string(),
        Err(e) => e
            .http_status()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "transport".to_string()),
    }
}

pub fn record_request<T>(operation: &str, result: &Result<T, FirestoreError>, elapsed: Duration) {
    counter!(
        REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "outcome" => outcome(result)
    )
    .increment(1);
    histogram!(REQUEST_DURATION_SECONDS, "operation" => operation.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_retry(operation: &str) {
    counter!(RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

pub fn record_conflict(collection: &str) {
    counter!(CONFLICTS_TOTAL, "collection" => collection.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome::<()>(&Ok(())), "ok");
        assert_eq!(
            outcome::<()>(&Err(FirestoreError::PreconditionFailed("stale".into()))),
            "412"
        );
        assert_eq!(
            outcome::<()>(&Err(FirestoreError::invalid_response("no body"))),
            "transport"
        );
    }
}
