//! Input validation for ids and job options.

use clozet_models::JobOptions;

use crate::error::{ApiError, ApiResult};

/// Maximum length of an avatar, fit or job id.
const MAX_ID_LENGTH: usize = 128;

/// Maximum number of option keys on a job.
pub const MAX_OPTION_KEYS: usize = 32;

/// Maximum serialized size of a job's options.
pub const MAX_OPTIONS_BYTES: usize = 8 * 1024;

/// Document id format: alphanumerics, hyphens and underscores. Rejects
/// anything that could address another collection or path.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LENGTH
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Check an id from a path or body, naming the field in the error.
pub fn require_id(field: &str, id: &str) -> ApiResult<()> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!("Invalid {}", field)))
    }
}

/// Bound the size of client-supplied job options.
pub fn validate_options(options: &JobOptions) -> ApiResult<()> {
    if options.len() > MAX_OPTION_KEYS {
        return Err(ApiError::bad_request(format!(
            "Too many options (max {})",
            MAX_OPTION_KEYS
        )));
    }

    let size = serde_json::to_vec(options)
        .map_err(|e| ApiError::bad_request(format!("Invalid options: {}", e)))?
        .len();
    if size > MAX_OPTIONS_BYTES {
        return Err(ApiError::bad_request("Options too large"));
    }
    Ok(())
}
