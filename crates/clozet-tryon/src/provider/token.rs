//! Provider job tokens and status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ProviderError;

/// Fixed result returned by demo jobs.
pub const DEMO_RESULT_URL: &str = "https://images.unsplash.com/photo-1472099645785-5658abf4ff4e?ixlib=rb-4.0.3&auto=format&fit=crop&w=768&h=1024&q=80";

/// Handle for a submitted generation, stored on the job as
/// `provider_job_id`. Serialized as JSON with a `mode` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ProviderJobToken {
    /// Demo mode: completes with a fixed image after a delay.
    Demo { submitted_at_ms: i64 },
    /// Live generation, already stored at `path`.
    Generated { completed_at_ms: i64, path: String },
}

impl ProviderJobToken {
    pub fn decode(raw: &str) -> Result<Self, ProviderError> {
        serde_json::from_str(raw).map_err(|_| ProviderError::UnknownToken(raw.to_string()))
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Status of this token at `now_ms`. Demo tokens stay `processing` for
    /// `demo_delay_ms` after submission.
    pub fn status_at(&self, now_ms: i64, demo_delay_ms: i64) -> ProviderStatus {
        match self {
            ProviderJobToken::Demo { submitted_at_ms } => {
                if now_ms.saturating_sub(*submitted_at_ms) < demo_delay_ms {
                    ProviderStatus::processing()
                } else {
                    ProviderStatus::completed(DEMO_RESULT_URL)
                }
            }
            ProviderJobToken::Generated { path, .. } => ProviderStatus::completed(path.clone()),
        }
    }
}

impl fmt::Display for ProviderJobToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl FromStr for ProviderJobToken {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    Processing,
    Completed,
    Failed,
}

/// What the provider reports for a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderStatus {
    pub status: ProviderState,
    /// Stored path or absolute URL, when completed
    pub result: Option<String>,
    pub error: Option<String>,
}

impl ProviderStatus {
    pub fn processing() -> Self {
        Self {
            status: ProviderState::Processing,
            result: None,
            error: None,
        }
    }

    pub fn completed(result: impl Into<String>) -> Self {
        Self {
            status: ProviderState::Completed,
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ProviderState::Failed,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY_MS: i64 = 15_000;

    #[test]
    fn test_demo_window() {
        let token = ProviderJobToken::Demo {
            submitted_at_ms: 1_700_000_000_000,
        };

        let early = token.status_at(1_700_000_014_900, DELAY_MS);
        assert_eq!(early.status, ProviderState::Processing);
        assert!(early.result.is_none());

        let due = token.status_at(1_700_000_015_000, DELAY_MS);
        assert_eq!(due, ProviderStatus::completed(DEMO_RESULT_URL));

        let late = token.status_at(1_700_000_600_000, DELAY_MS);
        assert_eq!(late.status, ProviderState::Completed);
    }

    #[test]
    fn test_corrupt_submission_time_does_not_overflow() {
        let token = ProviderJobToken::Demo {
            submitted_at_ms: i64::MIN,
        };
        assert_eq!(
            token.status_at(1_700_000_000_000, DELAY_MS),
            ProviderStatus::completed(DEMO_RESULT_URL)
        );

        let future = ProviderJobToken::Demo {
            submitted_at_ms: i64::MAX,
        };
        assert_eq!(future.status_at(-1, DELAY_MS).status, ProviderState::Processing);
    }

    #[test]
    fn test_generated_is_completed_with_path() {
        let token = ProviderJobToken::Generated {
            completed_at_ms: 1,
            path: "results/u1/1-abc.png".to_string(),
        };
        assert_eq!(
            token.status_at(0, DELAY_MS),
            ProviderStatus::completed("results/u1/1-abc.png")
        );
    }

    #[test]
    fn test_wire_format() {
        let token = ProviderJobToken::Demo { submitted_at_ms: 42 };
        assert_eq!(token.encode(), r#"{"mode":"demo","submitted_at_ms":42}"#);
        assert_eq!(ProviderJobToken::decode(&token.encode()).unwrap(), token);
    }

    #[test]
    fn test_unknown_token() {
        let err = ProviderJobToken::decode("mystery-job-1").unwrap_err();
        assert_eq!(err.to_string(), "Unknown job type: mystery-job-1");

        let err = ProviderJobToken::decode(r#"{"mode":"replicate"}"#).unwrap_err();
        assert!(matches!(err, ProviderError::UnknownToken(_)));
    }
}
