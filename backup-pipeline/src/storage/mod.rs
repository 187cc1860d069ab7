//! Artifact placement: local layout, cold storage backends, metadata records.

pub mod artifact;
pub mod directory;
pub mod metadata;
pub mod s3;

use crate::utils::Result;
use async_trait::async_trait;
use std::path::Path;

pub use artifact::{artifact_file_name, artifact_path, artifact_variants, remote_key};
pub use directory::DirectoryStorage;
pub use metadata::MetadataStore;
pub use s3::S3Storage;

/// Off-host object storage addressed by key.
#[async_trait]
pub trait ColdStorage: Send + Sync {
    /// Short label for logs, e.g. `s3://bucket`.
    fn describe(&self) -> String;

    /// Copy `local` to `key`, replacing any existing object.
    async fn upload(&self, key: &str, local: &Path) -> Result<()>;

    /// Write the object at `key` to `local`. A missing key is `NotFound`.
    async fn download(&self, key: &str, local: &Path) -> Result<()>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether an object is stored at `key`.
    async fn exists(&self, key: &str) -> Result<bool>;
}
