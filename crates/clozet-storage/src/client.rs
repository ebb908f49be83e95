//! Cloudflare R2 backed [`ImageStore`].

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::keys::validate_key;
use crate::store::ImageStore;

const DEFAULT_BUCKET: &str = "clozet-storage";

/// Generated images never change once written.
const RESULT_CACHE_CONTROL: &str = "private, max-age=31536000, immutable";

/// Connection settings for the R2 S3 endpoint.
#[derive(Debug, Clone)]
pub struct R2Config {
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    /// R2 ignores regions, but the SDK wants one
    pub region: String,
}

impl R2Config {
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: required("R2_ENDPOINT_URL")?,
            access_key_id: required("R2_ACCESS_KEY_ID")?,
            secret_access_key: required("R2_SECRET_ACCESS_KEY")?,
            bucket_name: std::env::var("R2_BUCKET_NAME")
                .unwrap_or_else(|_| DEFAULT_BUCKET.to_string()),
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }
}

fn required(var: &str) -> StorageResult<String> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| StorageError::config_error(format!("{} not set", var)))
}

/// Try-on images in one R2 bucket.
#[derive(Clone)]
pub struct R2Client {
    s3: Client,
    bucket: String,
}

impl R2Client {
    pub fn new(config: R2Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "r2-static",
        );

        // R2 does not support virtual-hosted bucket addressing
        let s3_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            s3: Client::from_conf(s3_config),
            bucket: config.bucket_name,
        }
    }

    pub fn from_env() -> StorageResult<Self> {
        R2Config::from_env().map(Self::new)
    }

    /// `HeadBucket` against the configured bucket, for readiness probes.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.s3
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| StorageError::Unreachable(e.to_string()))
    }
}

#[async_trait]
impl ImageStore for R2Client {
    async fn upload(&self, path: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        validate_key(path)?;
        let bytes = data.len();

        self.s3
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .content_type(content_type)
            .cache_control(RESULT_CACHE_CONTROL)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!(path, bytes, content_type, "Uploaded image to R2");
        Ok(())
    }

    /// Presigning is computed locally; no request reaches R2.
    async fn signed_download_url(&self, path: &str, ttl: Duration) -> StorageResult<String> {
        validate_key(path)?;
        let presigning =
            PresigningConfig::expires_in(ttl).map_err(|e| StorageError::presign_failed(e.to_string()))?;

        let request = self
            .s3
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::presign_failed(e.to_string()))?;

        debug!(path, ttl_secs = ttl.as_secs(), "Signed image URL");
        Ok(request.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> R2Client {
        R2Client::new(R2Config {
            endpoint_url: "https://account.r2.cloudflarestorage.com".to_string(),
            access_key_id: "key".to_string(),
            secret_access_key: "secret".to_string(),
            bucket_name: DEFAULT_BUCKET.to_string(),
            region: "auto".to_string(),
        })
    }

    #[tokio::test]
    async fn test_signed_url_is_path_style_and_scoped() {
        let url = client()
            .signed_download_url("results/user123/1-abc.png", Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(url.starts_with("https://account.r2.cloudflarestorage.com/clozet-storage/"));
        assert!(url.contains("results/user123/1-abc.png"));
        assert!(url.contains("X-Amz-Expires=3600"));
    }

    #[tokio::test]
    async fn test_signed_url_rejects_escaping_path() {
        let err = client()
            .signed_download_url("../secrets", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_upload_rejects_absolute_path() {
        let err = client()
            .upload("/results/x.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[test]
    #[serial_test::serial]
    fn test_config_requires_credentials() {
        std::env::set_var("R2_ENDPOINT_URL", "https://account.r2.cloudflarestorage.com");
        std::env::remove_var("R2_ACCESS_KEY_ID");
        std::env::set_var("R2_SECRET_ACCESS_KEY", "secret");

        let err = R2Config::from_env().unwrap_err();
        assert_eq!(err.to_string(), "Storage misconfigured: R2_ACCESS_KEY_ID not set");

        std::env::remove_var("R2_ENDPOINT_URL");
        std::env::remove_var("R2_SECRET_ACCESS_KEY");
    }
}
