//! Read-only access to avatars and fits (`users/{uid}/{avatars|fits}/{id}`).

use clozet_models::{SourceImage, SourceKind};

use crate::client::FirestoreClient;
use crate::credit_repo::USERS_COLLECTION;
use crate::error::FirestoreResult;
use crate::types::Document;

#[derive(Clone)]
pub struct SourceImageRepository {
    client: FirestoreClient,
}

impl SourceImageRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    fn collection(user_id: &str, kind: SourceKind) -> String {
        format!("{}/{}/{}", USERS_COLLECTION, user_id, kind.collection())
    }

    /// Look up a source image under its owner. Records of other users are
    /// simply not found.
    pub async fn get(
        &self,
        user_id: &str,
        kind: SourceKind,
        id: &str,
    ) -> FirestoreResult<Option<SourceImage>> {
        let collection = Self::collection(user_id, kind);
        let doc = self
            .client
            .with_retry("get_source_image", || {
                self.client.get_document(&collection, id)
            })
            .await?;

        Ok(doc.map(|doc| document_to_source(&doc, user_id, kind, id)))
    }
}

fn document_to_source(doc: &Document, user_id: &str, kind: SourceKind, id: &str) -> SourceImage {
    SourceImage {
        id: id.to_string(),
        user_id: user_id.to_string(),
        kind,
        status: doc.get("status").unwrap_or_default(),
        original_url: doc.get("original_url"),
    }
}
