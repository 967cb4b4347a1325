//! Blob store backed by the storage REST API.

use super::sas::{encode_path, SasSigner, SERVICE_VERSION};
use super::{BlobStore, ContainerAccess};
use crate::error::StorageError;
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use std::time::Duration;
use tracing::debug;

pub struct AzureBlobStore {
    http: reqwest::Client,
    signer: SasSigner,
}

impl AzureBlobStore {
    pub fn new(signer: SasSigner, timeout_seconds: u64) -> Result<Self, StorageError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self { http, signer })
    }

    fn endpoint(&self) -> &str {
        &self.signer.credentials().blob_endpoint
    }

    fn container_base(&self, container: &str) -> String {
        format!("{}/{}", self.endpoint(), encode_path(container))
    }

    fn blob_base(&self, container: &str, blob: &str) -> String {
        format!("{}/{}", self.container_base(container), encode_path(blob))
    }

    fn management_url(&self, base: &str, extra: Option<&str>) -> Result<String, StorageError> {
        let token = self.signer.account_token()?;
        Ok(match extra {
            Some(extra) => format!("{}?{}&{}", base, extra, token),
            None => format!("{}?{}", base, token),
        })
    }

    /// Send a request, accepting `tolerated` as success in addition to 2xx.
    async fn send(&self, request: RequestBuilder, tolerated: &[StatusCode]) -> Result<(), StorageError> {
        let response = request.header("x-ms-version", SERVICE_VERSION).send().await?;
        let status = response.status();
        if status.is_success() || tolerated.contains(&status) {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(StorageError::Http {
            status: status.as_u16(),
            message: error_code(&body).unwrap_or_else(|| status.to_string()),
        })
    }
}

/// Extract `<Code>` from a storage XML error body.
fn error_code(body: &str) -> Option<String> {
    let start = body.find("<Code>")? + "<Code>".len();
    let end = body[start..].find("</Code>")? + start;
    Some(body[start..end].to_string())
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    async fn create_container(&self, container: &str) -> Result<(), StorageError> {
        debug!("Creating container {}", container);
        let url = self.management_url(&self.container_base(container), Some("restype=container"))?;
        self.send(self.http.put(url).header("Content-Length", "0"), &[StatusCode::CONFLICT])
            .await
    }

    async fn delete_container(&self, container: &str) -> Result<(), StorageError> {
        debug!("Deleting container {}", container);
        let url = self.management_url(&self.container_base(container), Some("restype=container"))?;
        self.send(self.http.delete(url), &[StatusCode::NOT_FOUND]).await
    }

    async fn upload(
        &self,
        container: &str,
        blob: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        debug!("Uploading {} bytes to {}/{}", data.len(), container, blob);
        let url = self.management_url(&self.blob_base(container, blob), None)?;
        let request = self
            .http
            .put(url)
            .header("x-ms-blob-type", "BlockBlob")
            .header("Content-Type", content_type)
            .body(data);
        self.send(request, &[]).await
    }

    async fn delete_blob(&self, container: &str, blob: &str) -> Result<(), StorageError> {
        debug!("Deleting blob {}/{}", container, blob);
        let url = self.management_url(&self.blob_base(container, blob), None)?;
        self.send(self.http.delete(url), &[StatusCode::NOT_FOUND]).await
    }

    async fn copy_from_url(
        &self,
        container: &str,
        blob: &str,
        source_url: &str,
    ) -> Result<(), StorageError> {
        debug!("Copying into {}/{}", container, blob);
        let url = self.management_url(&self.blob_base(container, blob), None)?;
        let request = self
            .http
            .put(url)
            .header("Content-Length", "0")
            .header("x-ms-copy-source", source_url)
            .header("x-ms-requires-sync", "true");
        self.send(request, &[]).await
    }

    fn read_url(&self, container: &str, blob: &str) -> Result<String, StorageError> {
        let token = self.signer.blob_read_token(container, blob)?;
        Ok(format!("{}?{}", self.blob_base(container, blob), token))
    }

    fn container_url(
        &self,
        container: &str,
        access: ContainerAccess,
    ) -> Result<String, StorageError> {
        let token = self.signer.container_token(container, access.permissions())?;
        Ok(format!("{}?{}", self.container_base(container), token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageCredentials;

    fn store() -> AzureBlobStore {
        let credentials = StorageCredentials::from_connection_string(
            "AccountName=docstore;AccountKey=a2V5;EndpointSuffix=core.windows.net",
        )
        .unwrap();
        let signer = SasSigner::new(
            credentials,
            chrono::Duration::hours(1),
            chrono::Duration::minutes(5),
        );
        AzureBlobStore::new(signer, 10).unwrap()
    }

    #[test]
    fn test_read_url_scopes_to_blob() {
        let url = store().read_url("staging", "abc/report 1.pdf").unwrap();
        assert!(url.starts_with("https://docstore.blob.core.windows.net/staging/abc/report%201.pdf?sv="));
        assert!(url.contains("sr=b&sp=r&"));
    }

    #[test]
    fn test_container_url() {
        let url = store()
            .container_url("target-1a2b3c4d", ContainerAccess::WriteList)
            .unwrap();
        assert!(url.starts_with("https://docstore.blob.core.windows.net/target-1a2b3c4d?sv="));
        assert!(url.contains("sr=c&sp=wl&"));
    }

    #[test]
    fn test_management_url() {
        let store = store();
        let url = store
            .management_url(&store.container_base("staging"), Some("restype=container"))
            .unwrap();
        assert!(url.contains("/staging?restype=container&sv="));
        assert!(url.contains("srt=sco"));
    }

    #[test]
    fn test_error_code() {
        let body = "<?xml version=\"1.0\"?><Error><Code>AuthenticationFailed</Code><Message>x</Message></Error>";
        assert_eq!(error_code(body).as_deref(), Some("AuthenticationFailed"));
        assert_eq!(error_code("not xml"), None);
    }
}
