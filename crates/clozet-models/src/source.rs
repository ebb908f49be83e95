//! Avatar and fit records consumed by try-on jobs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Upload status of a source image that is ready for generation.
pub const READY_STATUS: &str = "completed";

/// Which side of a try-on a source image plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// The person
    Avatar,
    /// The garment
    Fit,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Avatar => "avatar",
            SourceKind::Fit => "fit",
        }
    }

    /// Sub-collection under `users/{uid}`.
    pub fn collection(&self) -> &'static str {
        match self {
            SourceKind::Avatar => "avatars",
            SourceKind::Fit => "fits",
        }
    }

    /// Capitalized name for user-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Avatar => "Avatar",
            SourceKind::Fit => "Fit",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only view of an uploaded avatar or fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SourceImage {
    pub id: String,
    pub user_id: String,
    pub kind: SourceKind,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
}

impl SourceImage {
    /// Storage reference if the upload finished and has an original.
    pub fn ready_ref(&self) -> Option<&str> {
        if self.status != READY_STATUS {
            return None;
        }
        self.original_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }

    pub fn is_ready(&self) -> bool {
        self.ready_ref().is_some()
    }
}
