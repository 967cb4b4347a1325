//! Blob storage and job persistence.
//!
//! The blob store holds staged inputs and the temporary containers used by
//! document translation, and hands out time-limited read grants. The job
//! store keeps the state of tracked aggregate jobs.

pub mod blob;
pub mod jobs;
pub mod sas;

use crate::error::StorageError;
use crate::models::JobRecord;
use async_trait::async_trait;

pub use blob::AzureBlobStore;
pub use jobs::{FileJobStore, InMemoryJobStore};
pub use sas::{SasSigner, StorageCredentials};

/// What a container-level grant allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAccess {
    /// Read and list, for a translation source.
    ReadList,
    /// Write and list, for a translation target.
    WriteList,
}

impl ContainerAccess {
    pub fn permissions(&self) -> &'static str {
        match self {
            ContainerAccess::ReadList => "rl",
            ContainerAccess::WriteList => "wl",
        }
    }
}

/// Object storage operations.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create a container. Creating one that already exists succeeds.
    async fn create_container(&self, container: &str) -> Result<(), StorageError>;

    /// Delete a container and everything in it. Deleting a missing
    /// container succeeds.
    async fn delete_container(&self, container: &str) -> Result<(), StorageError>;

    async fn upload(
        &self,
        container: &str,
        blob: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Delete one blob. Deleting a missing blob succeeds.
    async fn delete_blob(&self, container: &str, blob: &str) -> Result<(), StorageError>;

    /// Server-side copy of a readable URL into a blob.
    async fn copy_from_url(
        &self,
        container: &str,
        blob: &str,
        source_url: &str,
    ) -> Result<(), StorageError>;

    /// URL granting time-limited read access to one blob.
    fn read_url(&self, container: &str, blob: &str) -> Result<String, StorageError>;

    /// URL granting time-limited access to a whole container.
    fn container_url(&self, container: &str, access: ContainerAccess)
        -> Result<String, StorageError>;
}

/// Persistence for job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<JobRecord>, StorageError>;
    async fn put(&self, id: &str, record: &JobRecord) -> Result<(), StorageError>;
    async fn delete(&self, id: &str) -> Result<(), StorageError>;
}

/// Last path segment of a blob reference, without its query string.
pub fn blob_name(reference: &str) -> Option<&str> {
    let path = reference.split(['?', '#']).next().unwrap_or(reference);
    path.rsplit('/').next().filter(|name| !name.is_empty())
}

// ============================================================================
// In-memory blob store for testing
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_name() {
        assert_eq!(
            blob_name("https://acct.blob.core.windows.net/in/report.pdf?sv=1&sig=x"),
            Some("report.pdf")
        );
        assert_eq!(blob_name("https://example.com/a/b/scan.png"), Some("scan.png"));
        assert_eq!(blob_name("https://example.com/"), None);
    }

    #[test]
    fn test_container_access_permissions() {
        assert_eq!(ContainerAccess::ReadList.permissions(), "rl");
        assert_eq!(ContainerAccess::WriteList.permissions(), "wl");
    }
}
