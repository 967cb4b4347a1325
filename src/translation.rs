//! Document translation through temporary storage containers.
//!
//! Batch translation works container to container, so each call copies the
//! source document into a fresh `source-*` container, translates into a
//! fresh `target-*` container, and copies the output into the persistent
//! output container before both temporary containers are deleted.

use crate::error::AnalysisError;
use crate::models::sanitize_reference;
use crate::services::DocumentTranslator;
use crate::storage::{blob_name, BlobStore, ContainerAccess};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct TranslationFlow {
    store: Arc<dyn BlobStore>,
    translator: Arc<dyn DocumentTranslator>,
    output_container: String,
}

impl TranslationFlow {
    pub fn new(
        store: Arc<dyn BlobStore>,
        translator: Arc<dyn DocumentTranslator>,
        output_container: impl Into<String>,
    ) -> Self {
        Self {
            store,
            translator,
            output_container: output_container.into(),
        }
    }

    /// Translate the document at `source_url` and return a read grant for
    /// the translated copy.
    pub async fn translate(
        &self,
        source_url: &str,
        target_language: &str,
    ) -> Result<String, AnalysisError> {
        info!(
            "Translating {} to {}",
            sanitize_reference(source_url),
            target_language
        );

        self.store.create_container(&self.output_container).await?;
        let containers = TempContainers::acquire(self.store.clone()).await?;
        let result = self.run(&containers, source_url, target_language).await;
        containers.release().await;
        result
    }

    async fn run(
        &self,
        containers: &TempContainers,
        source_url: &str,
        target_language: &str,
    ) -> Result<String, AnalysisError> {
        let blob = blob_name(source_url).unwrap_or("document");

        self.store
            .copy_from_url(&containers.source, blob, source_url)
            .await?;

        let source = self
            .store
            .container_url(&containers.source, ContainerAccess::ReadList)?;
        let target = self
            .store
            .container_url(&containers.target, ContainerAccess::WriteList)?;
        self.translator
            .translate(&source, &target, target_language)
            .await?;

        let translated = self.store.read_url(&containers.target, blob)?;
        let output = format!("translated/{}/{}-{}", containers.id, target_language, blob);
        self.store
            .copy_from_url(&self.output_container, &output, &translated)
            .await?;

        debug!("Translated document stored as {}", output);
        Ok(self.store.read_url(&self.output_container, &output)?)
    }
}

/// A uniquely named source/target container pair.
///
/// `release` deletes both. If the guard is dropped unreleased (the owning
/// future was cancelled), the deletion is spawned on the current runtime.
struct TempContainers {
    store: Arc<dyn BlobStore>,
    id: String,
    source: String,
    target: String,
    released: bool,
}

impl TempContainers {
    async fn acquire(store: Arc<dyn BlobStore>) -> Result<Self, AnalysisError> {
        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let containers = Self {
            source: format!("source-{}", id),
            target: format!("target-{}", id),
            id,
            store,
            released: false,
        };

        // On failure the guard is dropped and releases whatever was created.
        containers.store.create_container(&containers.source).await?;
        containers.store.create_container(&containers.target).await?;
        debug!(
            "Created temporary containers {} and {}",
            containers.source, containers.target
        );
        Ok(containers)
    }

    async fn release(mut self) {
        self.released = true;
        delete_all(self.store.clone(), [self.source.clone(), self.target.clone()]).await;
    }
}

impl Drop for TempContainers {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let names = [self.source.clone(), self.target.clone()];
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(delete_all(self.store.clone(), names));
            }
            Err(_) => warn!(
                "No runtime to release temporary containers {} and {}",
                names[0], names[1]
            ),
        }
    }
}

async fn delete_all(store: Arc<dyn BlobStore>, containers: [String; 2]) {
    for container in containers {
        if let Err(e) = store.delete_container(&container).await {
            warn!("Failed to delete temporary container {}: {}", container, e);
        }
    }
}
