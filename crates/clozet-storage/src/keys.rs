//! Object key helpers.

use chrono::Utc;
use rand::distr::Alphanumeric;
use rand::Rng;

use crate::error::{StorageError, StorageResult};

/// Reject keys that are empty, absolute, or escape their prefix.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.trim().is_empty() {
        return Err(StorageError::invalid_key("empty key"));
    }
    if key.starts_with('/') || key.split('/').any(|segment| segment == "..") {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}

/// File extension for a generated image: `png` for PNG data, `jpg` otherwise.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    if mime_type.contains("png") {
        "png"
    } else {
        "jpg"
    }
}

/// Key for a generated result: `results/{user_id}/{millis}-{random}.{ext}`.
pub fn result_key(user_id: &str, extension: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(11)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!(
        "results/{}/{}-{}.{}",
        user_id,
        Utc::now().timestamp_millis(),
        suffix,
        extension
    )
}
