//! Provider error types.

use thiserror::Error;

use clozet_storage::StorageError;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Failed to download image: {0}")]
    Download(String),

    #[error("Failed to download {0} image - got empty data")]
    EmptyImage(&'static str),

    #[error("Gemini API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("Gemini API error: {0}")]
    ApiMessage(String),

    #[error("Gemini request failed: {0}")]
    Transport(String),

    /// Downloads, generation and upload together overran the deadline.
    #[error("Generation timed out after {0}s")]
    Timeout(u64),

    #[error("Invalid Gemini response: {0}")]
    InvalidResponse(String),

    #[error("Gemini API returned no candidates")]
    NoCandidates,

    #[error("Content blocked by Gemini safety filters. Try different images.")]
    SafetyBlocked,

    #[error("Content blocked due to recitation concerns. Try different images.")]
    RecitationBlocked,

    #[error("Gemini API returned no content parts (finish reason: {0})")]
    NoContentParts(String),

    /// The model answered in text only; the configured model cannot
    /// produce images.
    #[error("Model doesn't support image generation. Please check configuration.")]
    Unsupported,

    #[error("Couldn't generate the look. Try again.")]
    NoImage,

    #[error("Failed to store generated image: {0}")]
    Store(#[source] StorageError),

    #[error("Unknown job type: {0}")]
    UnknownToken(String),

    #[error("Operation cancelled")]
    Cancelled,

    /// Outer wrapper for every live-mode failure.
    #[error("Failed to generate with Gemini: {0}")]
    Generation(Box<ProviderError>),
}

impl ProviderError {
    pub fn download(msg: impl Into<String>) -> Self {
        Self::Download(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Wrap a live-mode failure. Cancellation passes through unwrapped.
    pub fn generation(inner: ProviderError) -> Self {
        match inner {
            ProviderError::Cancelled | ProviderError::Generation(_) => inner,
            other => ProviderError::Generation(Box::new(other)),
        }
    }

    /// The innermost error.
    pub fn root(&self) -> &ProviderError {
        match self {
            ProviderError::Generation(inner) => inner.root(),
            other => other,
        }
    }

    /// Configuration problems will not go away by trying again.
    pub fn is_configuration(&self) -> bool {
        matches!(self.root(), ProviderError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_wraps_once() {
        let err = ProviderError::generation(ProviderError::SafetyBlocked);
        assert_eq!(
            err.to_string(),
            "Failed to generate with Gemini: Content blocked by Gemini safety filters. Try different images."
        );
        let twice = ProviderError::generation(err);
        assert!(matches!(twice.root(), ProviderError::SafetyBlocked));
        assert!(twice.to_string().matches("Failed to generate").count() == 1);
    }

    #[test]
    fn test_cancellation_is_not_wrapped() {
        assert!(matches!(
            ProviderError::generation(ProviderError::Cancelled),
            ProviderError::Cancelled
        ));
    }

    #[test]
    fn test_download_messages() {
        assert_eq!(
            ProviderError::download("404").to_string(),
            "Failed to download image: 404"
        );
        assert_eq!(
            ProviderError::EmptyImage("fit").to_string(),
            "Failed to download fit image - got empty data"
        );
    }

    #[test]
    fn test_configuration_errors() {
        assert!(ProviderError::generation(ProviderError::Unsupported).is_configuration());
        assert!(!ProviderError::NoImage.is_configuration());
    }
}
