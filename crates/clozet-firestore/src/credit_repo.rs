//! Credit account repository (`users/{uid}`).
//!
//! The account lives on the user document itself, next to whatever profile
//! fields other services keep there. Writes therefore always go through an
//! update mask and never replace the document.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::info;

use clozet_models::{add_one_month, CreditAccount, PlanTier};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::job_repo::Versioned;
use crate::types::{Document, ToFirestoreValue, Value};

pub const USERS_COLLECTION: &str = "users";

const ACCOUNT_FIELDS: [&str; 6] = [
    "plan",
    "credits_total",
    "credits_used_this_period",
    "period_start",
    "period_end",
    "updated_at",
];

#[derive(Clone)]
pub struct CreditAccountRepository {
    client: FirestoreClient,
}

impl CreditAccountRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    pub async fn get_versioned(
        &self,
        user_id: &str,
    ) -> FirestoreResult<Option<Versioned<CreditAccount>>> {
        let doc = self
            .client
            .with_retry("get_credit_account", || {
                self.client.get_document(USERS_COLLECTION, user_id)
            })
            .await?;

        doc.map(|doc| versioned_account(&doc, user_id)).transpose()
    }

    /// Create the user document with a fresh account.
    ///
    /// Returns `AlreadyExists` if another request created it first.
    pub async fn create(
        &self,
        account: &CreditAccount,
        now: DateTime<Utc>,
    ) -> FirestoreResult<Versioned<CreditAccount>> {
        let mut fields = account_to_fields(account, now);
        fields.insert("created_at".to_string(), now.to_firestore_value());

        let doc = self
            .client
            .create_document(USERS_COLLECTION, &account.user_id, fields)
            .await?;

        info!(user_id = %account.user_id, plan = %account.plan, "Created credit account");
        versioned_account(&doc, &account.user_id)
    }

    /// Overwrite the account fields if the document is unchanged since
    /// `update_time`. Returns the new `updateTime`.
    pub async fn write(
        &self,
        account: &CreditAccount,
        update_time: &str,
        now: DateTime<Utc>,
    ) -> FirestoreResult<String> {
        let doc = self
            .client
            .update_document_with_precondition(
                USERS_COLLECTION,
                &account.user_id,
                account_to_fields(account, now),
                Some(ACCOUNT_FIELDS.iter().map(|f| f.to_string()).collect()),
                Some(update_time),
            )
            .await?;

        doc.update_time
            .ok_or_else(|| FirestoreError::invalid_response("PATCH response has no updateTime"))
    }
}

fn account_to_fields(account: &CreditAccount, now: DateTime<Utc>) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("plan".to_string(), account.plan.as_str().to_firestore_value());
    fields.insert(
        "credits_total".to_string(),
        account.credits_total.to_firestore_value(),
    );
    fields.insert(
        "credits_used_this_period".to_string(),
        account.credits_used_this_period.to_firestore_value(),
    );
    fields.insert(
        "period_start".to_string(),
        account.period_start.to_firestore_value(),
    );
    fields.insert(
        "period_end".to_string(),
        account.period_end.to_firestore_value(),
    );
    fields.insert("updated_at".to_string(), now.to_firestore_value());
    fields
}

fn versioned_account(doc: &Document, user_id: &str) -> FirestoreResult<Versioned<CreditAccount>> {
    let update_time = doc.update_time.clone().ok_or_else(|| {
        FirestoreError::invalid_response(format!("User {} has no updateTime", user_id))
    })?;
    Ok(Versioned {
        value: document_to_account(doc, user_id),
        update_time,
    })
}

/// Parse an account. A user document without credit fields reads as a
/// free account with nothing used.
pub fn document_to_account(doc: &Document, user_id: &str) -> CreditAccount {
    let plan = doc
        .get::<String>("plan")
        .and_then(|p| PlanTier::from_str(&p))
        .unwrap_or_default();
    let period_start = doc
        .get::<DateTime<Utc>>("period_start")
        .or_else(|| doc.get("created_at"))
        .unwrap_or_else(Utc::now);

    CreditAccount {
        user_id: user_id.to_string(),
        plan,
        credits_total: doc
            .get("credits_total")
            .unwrap_or_else(|| plan.credits_per_period()),
        credits_used_this_period: doc.get("credits_used_this_period").unwrap_or(0),
        period_start,
        period_end: doc
            .get("period_end")
            .unwrap_or_else(|| add_one_month(period_start)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FirestoreConfig;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOCS: &str = "/v1/projects/test-project/databases/(default)/documents";

    fn repo(server: &MockServer) -> CreditAccountRepository {
        let client = FirestoreClient::with_static_token(
            FirestoreConfig::for_project("test-project"),
            &server.uri(),
            "test-token",
        )
        .unwrap();
        CreditAccountRepository::new(client)
    }

    #[test]
    fn test_profile_only_document_reads_as_free() {
        let mut fields = HashMap::new();
        fields.insert("email".to_string(), "a@b.c".to_firestore_value());
        let account = document_to_account(&Document::new(fields), "u1");

        assert_eq!(account.plan, PlanTier::Free);
        assert_eq!(account.credits_total, 3);
        assert_eq!(account.credits_used_this_period, 0);
        assert_eq!(account.period_end, add_one_month(account.period_start));
    }

    #[test]
    fn test_fields_round_trip() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut account = CreditAccount::new_free("u1", now);
        account.change_plan(PlanTier::Premium, now);
        account.credits_used_this_period = 7;

        let parsed = document_to_account(&Document::new(account_to_fields(&account, now)), "u1");
        assert_eq!(parsed, account);
    }

    #[tokio::test]
    async fn test_missing_user_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/users/u1", DOCS)))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(repo(&server).get_versioned("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_race_surfaces_already_exists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}/users", DOCS)))
            .and(query_param("documentId", "u1"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let account = CreditAccount::new_free("u1", Utc::now());
        let err = repo(&server).create(&account, Utc::now()).await.unwrap_err();
        assert!(matches!(err, FirestoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_write_returns_new_update_time() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(format!("{}/users/u1", DOCS)))
            .and(query_param("updateMask.fieldPaths", "credits_used_this_period"))
            .and(query_param("currentDocument.updateTime", "t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/test-project/databases/(default)/documents/users/u1",
                "fields": {},
                "updateTime": "t2"
            })))
            .mount(&server)
            .await;

        let account = CreditAccount::new_free("u1", Utc::now());
        let new_time = repo(&server).write(&account, "t1", Utc::now()).await.unwrap();
        assert_eq!(new_time, "t2");
    }
}
