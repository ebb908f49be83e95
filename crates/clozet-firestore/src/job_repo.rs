//! Try-on job repository (`tryon_jobs/{job_id}`).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use clozet_models::{JobId, JobOptions, JobStatus, TryonJob};

use crate::client::FirestoreClient;
use crate::credit_repo::USERS_COLLECTION;
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::{
    Document, DocumentMask, FieldFilter, FieldTransform, Precondition, StructuredQuery,
    ToFirestoreValue, Value, Write,
};

/// Top-level job collection.
pub const JOBS_COLLECTION: &str = "tryon_jobs";

/// Fields a lifecycle transition may touch. Anything in the mask but
/// missing from the written fields is cleared.
pub const LIFECYCLE_FIELDS: [&str; 6] = [
    "status",
    "provider_job_id",
    "result_ref",
    "error_message",
    "options",
    "updated_at",
];

/// A document value paired with the `updateTime` it was read at.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub value: T,
    pub update_time: String,
}

/// Repository for try-on job documents.
#[derive(Clone)]
pub struct TryonJobRepository {
    client: FirestoreClient,
}

impl TryonJobRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    /// Insert a new job. Fails with `AlreadyExists` on an ID collision.
    pub async fn create(&self, job: &TryonJob) -> FirestoreResult<()> {
        self.client
            .create_document(JOBS_COLLECTION, job.id.as_str(), job_to_fields(job))
            .await?;
        info!(job_id = %job.id, user_id = %job.user_id, "Created try-on job");
        Ok(())
    }

    pub async fn get(&self, job_id: &JobId) -> FirestoreResult<Option<TryonJob>> {
        Ok(self.get_versioned(job_id).await?.map(|v| v.value))
    }

    /// Read a job together with its `updateTime` for a conditional write.
    pub async fn get_versioned(
        &self,
        job_id: &JobId,
    ) -> FirestoreResult<Option<Versioned<TryonJob>>> {
        let doc = self
            .client
            .with_retry("get_job", || {
                self.client.get_document(JOBS_COLLECTION, job_id.as_str())
            })
            .await?;

        let Some(doc) = doc else {
            return Ok(None);
        };

        let update_time = doc.update_time.clone().ok_or_else(|| {
            FirestoreError::invalid_response(format!("Job {} has no updateTime", job_id))
        })?;
        let value = document_to_job(&doc, job_id.as_str())?;
        Ok(Some(Versioned { value, update_time }))
    }

    /// Persist the lifecycle fields of `job`, provided nobody has written
    /// the document since `update_time`. Returns the new `updateTime`.
    pub async fn write_lifecycle(
        &self,
        job: &TryonJob,
        update_time: &str,
    ) -> FirestoreResult<String> {
        let all = job_to_fields(job);
        let fields: HashMap<String, Value> = LIFECYCLE_FIELDS
            .iter()
            .filter_map(|f| all.get(*f).map(|v| (f.to_string(), v.clone())))
            .collect();

        let doc = self
            .client
            .update_document_with_precondition(
                JOBS_COLLECTION,
                job.id.as_str(),
                fields,
                Some(LIFECYCLE_FIELDS.iter().map(|f| f.to_string()).collect()),
                Some(update_time),
            )
            .await?;

        debug!(job_id = %job.id, status = %job.status, "Wrote job lifecycle");
        doc.update_time
            .ok_or_else(|| FirestoreError::invalid_response("PATCH response has no updateTime"))
    }

    /// Flip `credit_charged` on the job and bump the owner's usage in one
    /// commit. The job write is guarded by `job_update_time`.
    pub async fn commit_charge(
        &self,
        job: &TryonJob,
        job_update_time: &str,
        now: DateTime<Utc>,
    ) -> FirestoreResult<()> {
        let mut job_fields = HashMap::new();
        job_fields.insert("credit_charged".to_string(), true.to_firestore_value());
        job_fields.insert("updated_at".to_string(), now.to_firestore_value());

        let mut user_fields = HashMap::new();
        user_fields.insert("updated_at".to_string(), now.to_firestore_value());

        let writes = vec![
            Write {
                update: Some(Document::named(
                    self.client
                        .full_document_name(JOBS_COLLECTION, job.id.as_str()),
                    job_fields,
                )),
                update_mask: Some(DocumentMask::new(["credit_charged", "updated_at"])),
                current_document: Some(Precondition::updated_at(job_update_time)),
                ..Default::default()
            },
            Write {
                update: Some(Document::named(
                    self.client
                        .full_document_name(USERS_COLLECTION, &job.user_id),
                    user_fields,
                )),
                update_mask: Some(DocumentMask::new(["updated_at"])),
                update_transforms: Some(vec![FieldTransform::increment(
                    "credits_used_this_period",
                    1,
                )]),
                current_document: Some(Precondition::exists()),
                ..Default::default()
            },
        ];

        self.client.commit(writes).await?;
        Ok(())
    }

    /// Jobs in `status` last written before `updated_before`.
    ///
    /// Requires a composite index on (status, updated_at).
    pub async fn list_by_status(
        &self,
        status: JobStatus,
        updated_before: DateTime<Utc>,
        limit: i32,
    ) -> FirestoreResult<Vec<TryonJob>> {
        let query = StructuredQuery::collection(JOBS_COLLECTION)
            .filter_all(vec![
                FieldFilter::equal("status", status.as_str().to_firestore_value()),
                FieldFilter::less_than("updated_at", updated_before.to_firestore_value()),
            ])
            .limit(limit);

        self.query(query).await
    }

    /// Completed jobs that were never charged, last written before
    /// `updated_before`.
    ///
    /// Requires a composite index on (status, credit_charged, updated_at).
    pub async fn list_uncharged_completed(
        &self,
        updated_before: DateTime<Utc>,
        limit: i32,
    ) -> FirestoreResult<Vec<TryonJob>> {
        let query = StructuredQuery::collection(JOBS_COLLECTION)
            .filter_all(vec![
                FieldFilter::equal("status", JobStatus::Completed.as_str().to_firestore_value()),
                FieldFilter::equal("credit_charged", false.to_firestore_value()),
                FieldFilter::less_than("updated_at", updated_before.to_firestore_value()),
            ])
            .limit(limit);

        self.query(query).await
    }

    async fn query(&self, query: StructuredQuery) -> FirestoreResult<Vec<TryonJob>> {
        let docs = self
            .client
            .with_retry("query_jobs", || self.client.run_query("", query.clone()))
            .await?;

        docs.iter()
            .map(|doc| {
                let id = doc.doc_id().unwrap_or_default().to_string();
                document_to_job(doc, &id)
            })
            .collect()
    }
}

/// Full field set of a job. Absent optionals are written as nulls.
pub fn job_to_fields(job: &TryonJob) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("user_id".to_string(), job.user_id.to_firestore_value());
    fields.insert("avatar_id".to_string(), job.avatar_id.to_firestore_value());
    fields.insert("avatar_ref".to_string(), job.avatar_ref.to_firestore_value());
    fields.insert("fit_id".to_string(), job.fit_id.to_firestore_value());
    fields.insert("fit_ref".to_string(), job.fit_ref.to_firestore_value());
    fields.insert("status".to_string(), job.status.as_str().to_firestore_value());
    fields.insert(
        "provider_job_id".to_string(),
        job.provider_job_id.to_firestore_value(),
    );
    fields.insert("result_ref".to_string(), job.result_ref.to_firestore_value());
    fields.insert(
        "error_message".to_string(),
        job.error_message.to_firestore_value(),
    );
    fields.insert(
        "credit_charged".to_string(),
        job.credit_charged.to_firestore_value(),
    );
    fields.insert("options".to_string(), job.options.to_firestore_value());
    fields.insert("created_at".to_string(), job.created_at.to_firestore_value());
    fields.insert("updated_at".to_string(), job.updated_at.to_firestore_value());
    fields
}

/// Parse a job document.
pub fn document_to_job(doc: &Document, job_id: &str) -> FirestoreResult<TryonJob> {
    let required = |field: &str| {
        doc.get::<String>(field).ok_or_else(|| {
            FirestoreError::invalid_response(format!("Job {} is missing {}", job_id, field))
        })
    };

    let status_str = required("status")?;
    let status = JobStatus::from_str(&status_str).ok_or_else(|| {
        FirestoreError::invalid_response(format!(
            "Job {} has unknown status {}",
            job_id, status_str
        ))
    })?;

    let created_at = doc
        .get::<DateTime<Utc>>("created_at")
        .unwrap_or_else(Utc::now);

    Ok(TryonJob {
        id: JobId::from_string(job_id),
        user_id: required("user_id")?,
        avatar_id: required("avatar_id")?,
        avatar_ref: required("avatar_ref")?,
        fit_id: required("fit_id")?,
        fit_ref: required("fit_ref")?,
        status,
        provider_job_id: doc.get("provider_job_id"),
        result_ref: doc.get("result_ref"),
        error_message: doc.get("error_message"),
        credit_charged: doc.get("credit_charged").unwrap_or(false),
        options: doc.get::<JobOptions>("options").unwrap_or_default(),
        created_at,
        updated_at: doc.get("updated_at").unwrap_or(created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FirestoreConfig;
    use clozet_models::JobTransition;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOCS: &str = "/v1/projects/test-project/databases/(default)/documents";

    fn repo(server: &MockServer) -> TryonJobRepository {
        let client = FirestoreClient::with_static_token(
            FirestoreConfig::for_project("test-project"),
            &server.uri(),
            "test-token",
        )
        .unwrap();
        TryonJobRepository::new(client)
    }

    fn job() -> TryonJob {
        let mut options = JobOptions::new();
        options.insert("style".to_string(), json!("casual"));
        TryonJob::new(
            "user123",
            "avatar-1",
            "avatars/user123/a.jpg",
            "fit-1",
            "fits/user123/f.jpg",
            options,
        )
    }

    fn stored(job: &TryonJob, update_time: &str) -> serde_json::Value {
        json!({
            "name": format!("projects/test-project/databases/(default)/documents/tryon_jobs/{}", job.id),
            "fields": serde_json::to_value(job_to_fields(job)).unwrap(),
            "updateTime": update_time,
        })
    }

    #[test]
    fn test_document_round_trip() {
        let mut job = job();
        job.apply(&JobTransition::BeginProcessing, Utc::now()).unwrap();
        job.apply(
            &JobTransition::RecordSubmission {
                provider_job_id: "{\"mode\":\"demo\",\"submitted_at_ms\":1}".to_string(),
            },
            Utc::now(),
        )
        .unwrap();

        let doc = Document::new(job_to_fields(&job));
        let parsed = document_to_job(&doc, job.id.as_str()).unwrap();

        assert_eq!(parsed.id, job.id);
        assert_eq!(parsed.status, JobStatus::Processing);
        assert_eq!(parsed.provider_job_id, job.provider_job_id);
        assert_eq!(parsed.result_ref, None);
        assert_eq!(parsed.options, job.options);
        assert!(!parsed.credit_charged);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let mut fields = job_to_fields(&job());
        fields.insert("status".to_string(), "exploded".to_firestore_value());
        let err = document_to_job(&Document::new(fields), "j1").unwrap_err();
        assert!(matches!(err, FirestoreError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_get_versioned_carries_update_time() {
        let server = MockServer::start().await;
        let job = job();
        Mock::given(method("GET"))
            .and(path(format!("{}/tryon_jobs/{}", DOCS, job.id)))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(stored(&job, "2024-05-01T10:00:00.1Z")),
            )
            .mount(&server)
            .await;

        let versioned = repo(&server).get_versioned(&job.id).await.unwrap().unwrap();
        assert_eq!(versioned.update_time, "2024-05-01T10:00:00.1Z");
        assert_eq!(versioned.value.user_id, "user123");
        assert_eq!(versioned.value.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_write_lifecycle_sends_mask_and_precondition() {
        let server = MockServer::start().await;
        let mut job = job();
        job.apply(&JobTransition::BeginProcessing, Utc::now()).unwrap();

        Mock::given(method("PATCH"))
            .and(path(format!("{}/tryon_jobs/{}", DOCS, job.id)))
            .and(query_param("updateMask.fieldPaths", "result_ref"))
            .and(query_param("currentDocument.updateTime", "2024-05-01T10:00:00.1Z"))
            .and(body_partial_json(json!({
                "fields": {"status": {"stringValue": "processing"}, "result_ref": {"nullValue": null}}
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(stored(&job, "2024-05-01T10:00:01Z")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let new_time = repo(&server)
            .write_lifecycle(&job, "2024-05-01T10:00:00.1Z")
            .await
            .unwrap();
        assert_eq!(new_time, "2024-05-01T10:00:01Z");
    }

    #[tokio::test]
    async fn test_commit_charge_is_single_atomic_commit() {
        let server = MockServer::start().await;
        let job = job();

        Mock::given(method("POST"))
            .and(path(format!("{}:commit", DOCS)))
            .and(body_partial_json(json!({
                "writes": [
                    {
                        "updateMask": {"fieldPaths": ["credit_charged", "updated_at"]},
                        "currentDocument": {"updateTime": "2024-05-01T10:00:00.1Z"}
                    },
                    {
                        "updateTransforms": [{
                            "fieldPath": "credits_used_this_period",
                            "increment": {"integerValue": "1"}
                        }],
                        "currentDocument": {"exists": true}
                    }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "writeResults": [{}, {}],
                "commitTime": "2024-05-01T10:00:02Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        repo(&server)
            .commit_charge(&job, "2024-05-01T10:00:00.1Z", Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_by_status_parses_documents() {
        let server = MockServer::start().await;
        let job = job();

        Mock::given(method("POST"))
            .and(path(format!("{}:runQuery", DOCS)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"document": stored(&job, "2024-05-01T10:00:00Z"), "readTime": "2024-05-01T10:05:00Z"}
            ])))
            .mount(&server)
            .await;

        let jobs = repo(&server)
            .list_by_status(JobStatus::Pending, Utc::now(), 50)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, job.id);
    }
}
