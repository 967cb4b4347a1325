//! Input staging.
//!
//! Remote references pass through untouched. Local document and image files
//! are validated, uploaded to the staging container and replaced by
//! time-limited read URLs. Audio is read locally by the speech client, so
//! audio paths are only validated.

use crate::error::AnalysisError;
use crate::models::{sanitize_reference, AnalysisRequest, Modality, ModalityFailure};
use crate::storage::BlobStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Largest accepted input file.
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Staging limits.
#[derive(Debug, Clone)]
pub struct StagingConfig {
    /// Container receiving uploaded inputs
    pub container: String,
    /// Maximum file size in bytes
    pub max_file_size: u64,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            container: "docinsight-staging".to_string(),
            max_file_size: MAX_FILE_SIZE,
        }
    }
}

impl From<&crate::config::StorageConfig> for StagingConfig {
    fn from(config: &crate::config::StorageConfig) -> Self {
        Self {
            container: config.container.clone(),
            max_file_size: config.max_upload_mb * 1024 * 1024,
        }
    }
}

/// Content type for an accepted extension of the given modality.
pub fn content_type(modality: Modality, extension: &str) -> Option<&'static str> {
    let ext = extension.to_lowercase();
    let content_type = match (modality, ext.as_str()) {
        (Modality::Document, "pdf") => "application/pdf",
        (Modality::Document, "docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        (Modality::Document, "xlsx") => {
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        }
        (Modality::Document, "pptx") => {
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        }
        (Modality::Document, "html") => "text/html",
        (Modality::Document | Modality::Image, "jpg" | "jpeg") => "image/jpeg",
        (Modality::Document | Modality::Image, "png") => "image/png",
        (Modality::Document | Modality::Image, "bmp") => "image/bmp",
        (Modality::Document | Modality::Image, "tif" | "tiff") => "image/tiff",
        (Modality::Image, "gif") => "image/gif",
        (Modality::Image, "webp") => "image/webp",
        (Modality::Audio, "wav") => "audio/wav",
        (Modality::Audio, "ogg") => "audio/ogg",
        _ => return None,
    };
    Some(content_type)
}

/// Returns true for `http(s)://` references.
pub fn is_remote(reference: &str) -> bool {
    let lower = reference.trim().to_lowercase();
    lower.starts_with("https://") || lower.starts_with("http://")
}

/// A local input that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalInput {
    pub path: PathBuf,
    pub size: u64,
    pub content_type: &'static str,
}

/// Check that a local file exists, is non-empty, within the size limit and
/// of an accepted type for the modality.
pub fn validate_local(
    path: &Path,
    modality: Modality,
    max_file_size: u64,
) -> Result<LocalInput, AnalysisError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        AnalysisError::invalid_input(format!("cannot access {}: {}", path.display(), e))
    })?;

    if !metadata.is_file() {
        return Err(AnalysisError::invalid_input(format!(
            "{} is not a file",
            path.display()
        )));
    }
    if metadata.len() == 0 {
        return Err(AnalysisError::invalid_input(format!(
            "{} is empty",
            path.display()
        )));
    }
    if metadata.len() > max_file_size {
        return Err(AnalysisError::invalid_input(format!(
            "{} is {} bytes, larger than the {} byte limit",
            path.display(),
            metadata.len(),
            max_file_size
        )));
    }

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let content_type = content_type(modality, extension).ok_or_else(|| {
        AnalysisError::invalid_input(format!(
            "unsupported {} file type '{}'",
            modality.label().to_lowercase(),
            extension
        ))
    })?;

    Ok(LocalInput {
        path: path.to_path_buf(),
        size: metadata.len(),
        content_type,
    })
}

/// Outcome of staging a request: the inputs that are ready for analysis and
/// the ones that were rejected.
#[derive(Debug, Default)]
pub struct StagedRequest {
    pub request: AnalysisRequest,
    pub failures: Vec<ModalityFailure>,
}

/// Uploads local inputs and remembers them for cleanup.
pub struct Stager {
    store: Option<Arc<dyn BlobStore>>,
    config: StagingConfig,
    staged: Vec<String>,
}

impl Stager {
    pub fn new(store: Option<Arc<dyn BlobStore>>, config: StagingConfig) -> Self {
        Self {
            store,
            config,
            staged: Vec::new(),
        }
    }

    /// Blobs uploaded so far.
    pub fn staged(&self) -> &[String] {
        &self.staged
    }

    /// Stage every input of a request. An input that cannot be staged is
    /// dropped from the request and reported as a failure of its modality.
    pub async fn stage(&mut self, request: &AnalysisRequest) -> StagedRequest {
        let mut staged = StagedRequest::default();
        if let Some(language) = request.target_language() {
            staged.request.target_language = Some(language.to_string());
        }

        if let Some(document) = request.document() {
            match self.stage_reference(document, Modality::Document).await {
                Ok(url) => staged.request.document_url = Some(url),
                Err(e) => staged.failures.push(failure(Modality::Document, document, &e)),
            }
        }

        if let Some(image) = request.image() {
            match self.stage_reference(image, Modality::Image).await {
                Ok(url) => staged.request.image_url = Some(url),
                Err(e) => staged.failures.push(failure(Modality::Image, image, &e)),
            }
        }

        if let Some(audio) = request.audio() {
            match validate_local(audio, Modality::Audio, self.config.max_file_size) {
                Ok(_) => staged.request.audio_path = Some(audio.to_path_buf()),
                Err(e) => {
                    let reference = audio.display().to_string();
                    staged.failures.push(failure(Modality::Audio, &reference, &e));
                }
            }
        }

        staged
    }

    async fn stage_reference(
        &mut self,
        reference: &str,
        modality: Modality,
    ) -> Result<String, AnalysisError> {
        if is_remote(reference) {
            return Ok(reference.to_string());
        }

        let input = validate_local(Path::new(reference), modality, self.config.max_file_size)?;
        let store = self.store.clone().ok_or_else(|| AnalysisError::NotConfigured {
            service: "blob storage".to_string(),
        })?;

        let file_name = input
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("input");
        let blob = format!("{}/{}", Uuid::new_v4().simple(), file_name);
        let data = tokio::fs::read(&input.path).await.map_err(|e| {
            AnalysisError::invalid_input(format!("cannot read {}: {}", input.path.display(), e))
        })?;

        store.create_container(&self.config.container).await?;
        store
            .upload(&self.config.container, &blob, data, input.content_type)
            .await?;
        self.staged.push(blob.clone());
        info!("Staged {} ({} bytes) as {}", input.path.display(), input.size, blob);

        Ok(store.read_url(&self.config.container, &blob)?)
    }

    /// Delete every staged blob. Failures are logged and skipped.
    pub async fn cleanup(&mut self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        for blob in self.staged.drain(..) {
            match store.delete_blob(&self.config.container, &blob).await {
                Ok(()) => debug!("Deleted staged blob {}", blob),
                Err(e) => warn!("Failed to delete staged blob {}: {}", blob, e),
            }
        }
    }
}

fn failure(modality: Modality, reference: &str, error: &AnalysisError) -> ModalityFailure {
    warn!(
        modality = %modality,
        reference = %sanitize_reference(reference),
        kind = %error.kind(),
        error = %error,
        "Input rejected"
    );
    ModalityFailure {
        modality,
        reference: sanitize_reference(reference),
        kind: error.kind(),
        message: error.to_string(),
    }
}
