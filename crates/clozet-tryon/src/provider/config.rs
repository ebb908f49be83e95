//! Generation provider configuration.

use std::fmt;
use std::time::Duration;

/// Value operators leave in unset secrets.
const PLACEHOLDER: &str = "not-set";

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Provider settings, loaded once at startup.
///
/// Without a usable key, endpoint and model the client runs in demo mode.
#[derive(Clone)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    /// Bound on the generateContent call
    pub submit_timeout: Duration,
    /// Bound on each source image download
    pub download_timeout: Duration,
    /// How long a demo job reports `processing`
    pub demo_delay: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: None,
            model: None,
            submit_timeout: Duration::from_secs(60),
            download_timeout: Duration::from_secs(30),
            demo_delay: Duration::from_secs(15),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("submit_timeout", &self.submit_timeout)
            .field("download_timeout", &self.download_timeout)
            .field("demo_delay", &self.demo_delay)
            .finish()
    }
}

fn configured(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != PLACEHOLDER)
}

fn secs_from_env(var: &str, default: Duration) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl ProviderConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: configured(std::env::var("GEMINI_API_KEY").ok()),
            endpoint: configured(std::env::var("GEMINI_ENDPOINT").ok()),
            model: configured(std::env::var("GEMINI_MODEL").ok()),
            submit_timeout: secs_from_env("GEMINI_SUBMIT_TIMEOUT_SECS", defaults.submit_timeout),
            download_timeout: secs_from_env(
                "GEMINI_DOWNLOAD_TIMEOUT_SECS",
                defaults.download_timeout,
            ),
            demo_delay: secs_from_env("DEMO_RESULT_DELAY_SECS", defaults.demo_delay),
        }
    }

    /// Live settings for Gemini.
    pub fn gemini(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: configured(Some(api_key.into())),
            endpoint: configured(Some(endpoint.into())),
            model: configured(Some(model.into())),
            ..Self::default()
        }
    }

    pub fn is_demo(&self) -> bool {
        self.live().is_none()
    }

    /// `(api_key, generateContent URL)` when fully configured.
    pub fn live(&self) -> Option<(String, String)> {
        let key = configured(self.api_key.clone())?;
        let endpoint = configured(self.endpoint.clone())?;
        let model = configured(self.model.clone())?;
        Some((key, generate_content_url(&endpoint, &model)))
    }
}

/// Expand a configured endpoint into the full generateContent URL.
pub fn generate_content_url(endpoint: &str, model: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    if trimmed == GEMINI_BASE_URL {
        format!("{}/v1beta/models/{}:generateContent", GEMINI_BASE_URL, model)
    } else if endpoint.contains("generateContent") {
        endpoint.to_string()
    } else {
        format!("{}/{}:generateContent", trimmed, model)
    }
}
