//! Gemini-backed provider client.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use clozet_models::JobOptions;
use clozet_storage::{extension_for_mime, result_key, ImageStore};

use super::config::ProviderConfig;
use super::error::ProviderError;
use super::gemini::{
    detect_mime_type, extract_image, EncodedImage, GenerateContentRequest, GenerateContentResponse,
};
use super::token::{ProviderJobToken, ProviderStatus};
use super::Provider;
use crate::metrics;

/// Run `fut` unless `cancel` fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, ProviderError>>,
) -> Result<T, ProviderError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        result = fut => result,
    }
}

/// Error for a non-2xx generate call. A body that can't be read is
/// reported in place of the body.
fn api_error<E: std::fmt::Display>(status: u16, body: Result<String, E>) -> ProviderError {
    let body = match body {
        Ok(body) => body,
        Err(e) => format!("<unreadable body: {}>", e),
    };
    ProviderError::Api { status, body }
}

/// Provider client. Generated images are written to the image store
/// before `submit` returns.
#[derive(Clone)]
pub struct ProviderClient {
    config: ProviderConfig,
    http: Client,
    store: Arc<dyn ImageStore>,
}

impl ProviderClient {
    pub fn new(config: ProviderConfig, store: Arc<dyn ImageStore>) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .build()
            .map_err(|e| ProviderError::transport(e.to_string()))?;

        if config.is_demo() {
            info!("Gemini not configured, provider running in demo mode");
        } else {
            info!(model = ?config.model, "Gemini provider configured");
        }

        Ok(Self {
            config,
            http,
            store,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn is_demo(&self) -> bool {
        self.config.is_demo()
    }

    async fn download(&self, url: &str, label: &'static str) -> Result<EncodedImage, ProviderError> {
        let response = self
            .http
            .get(url)
            .timeout(self.config.download_timeout)
            .send()
            .await
            .map_err(|e| ProviderError::download(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::download(status.to_string()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::download(e.to_string()))?;
        if bytes.is_empty() {
            return Err(ProviderError::EmptyImage(label));
        }

        debug!(label, size = bytes.len(), "Downloaded source image");

        Ok(EncodedImage {
            mime_type: detect_mime_type(content_type.as_deref(), &bytes),
            data: STANDARD.encode(&bytes),
        })
    }

    async fn generate(
        &self,
        api_key: &str,
        url: &str,
        user_id: &str,
        avatar_url: &str,
        fit_url: &str,
    ) -> Result<ProviderJobToken, ProviderError> {
        let (avatar, fit) = tokio::try_join!(
            self.download(avatar_url, "avatar"),
            self.download(fit_url, "fit")
        )?;

        let request = GenerateContentRequest::tryon(avatar, fit);
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", api_key)
            .timeout(self.config.submit_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status.as_u16(), response.text().await));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let image = extract_image(&parsed)?;

        let data = STANDARD
            .decode(image.data.as_bytes())
            .map_err(|e| ProviderError::InvalidResponse(format!("bad image data: {}", e)))?;
        let path = result_key(user_id, extension_for_mime(&image.mime_type));
        self.store
            .upload(&path, data, &image.mime_type)
            .await
            .map_err(ProviderError::Store)?;

        info!(user_id, path = %path, "Stored generated image");

        Ok(ProviderJobToken::Generated {
            completed_at_ms: Utc::now().timestamp_millis(),
            path,
        })
    }
}

#[async_trait]
impl Provider for ProviderClient {
    async fn submit(
        &self,
        user_id: &str,
        avatar_url: &str,
        fit_url: &str,
        _options: &JobOptions,
        cancel: &CancellationToken,
    ) -> Result<ProviderJobToken, ProviderError> {
        let Some((api_key, url)) = self.config.live() else {
            metrics::record_provider_call("demo", "submitted", 0.0);
            return Ok(ProviderJobToken::Demo {
                submitted_at_ms: Utc::now().timestamp_millis(),
            });
        };

        // One deadline over downloads, generation and upload
        let deadline = self.config.submit_timeout;
        let started = Instant::now();
        let result = cancellable(cancel, async {
            tokio::time::timeout(
                deadline,
                self.generate(&api_key, &url, user_id, avatar_url, fit_url),
            )
            .await
            .map_err(|_| ProviderError::Timeout(deadline.as_secs()))?
        })
        .await
        .map_err(ProviderError::generation);
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(_) => metrics::record_provider_call("gemini", "success", elapsed),
            Err(ProviderError::Cancelled) => {
                metrics::record_provider_call("gemini", "cancelled", elapsed)
            }
            Err(e) => {
                warn!(user_id, error = %e, "Gemini generation failed");
                metrics::record_provider_call("gemini", "error", elapsed);
            }
        }

        result
    }

    async fn get_status(&self, token: &ProviderJobToken) -> Result<ProviderStatus, ProviderError> {
        let demo_delay_ms = i64::try_from(self.config.demo_delay.as_millis()).unwrap_or(i64::MAX);
        Ok(token.status_at(Utc::now().timestamp_millis(), demo_delay_ms))
    }
}
