//! Image generation provider.
//!
//! Live mode calls Gemini synchronously inside `submit` and stores the
//! image, so `get_status` on a live token answers immediately. Demo mode
//! (no key, endpoint or model configured) returns a fixed image after a
//! delay.

pub mod client;
pub mod config;
pub mod error;
pub mod gemini;
pub mod token;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use clozet_models::JobOptions;

pub use client::ProviderClient;
pub use config::ProviderConfig;
pub use error::ProviderError;
pub use token::{ProviderJobToken, ProviderState, ProviderStatus, DEMO_RESULT_URL};

/// A generation backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Start a generation for the two fetchable image URLs.
    async fn submit(
        &self,
        user_id: &str,
        avatar_url: &str,
        fit_url: &str,
        options: &JobOptions,
        cancel: &CancellationToken,
    ) -> Result<ProviderJobToken, ProviderError>;

    async fn get_status(&self, token: &ProviderJobToken) -> Result<ProviderStatus, ProviderError>;
}
