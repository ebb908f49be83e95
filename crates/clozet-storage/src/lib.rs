//! Image storage for try-on inputs and results.
//!
//! This crate provides:
//! - The [`ImageStore`] seam (upload + time-limited signed download URLs)
//! - A Cloudflare R2 implementation
//! - An in-memory implementation for local runs and tests
//! - Result key generation

pub mod client;
pub mod error;
pub mod keys;
pub mod memory;
pub mod store;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use keys::{extension_for_mime, result_key, validate_key};
pub use memory::MemoryImageStore;
pub use store::ImageStore;
