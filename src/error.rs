//! Error types.
//!
//! `AnalysisError` covers everything a single modality can fail with; the
//! aggregator isolates these per modality. `StorageError` covers the blob
//! store and job stores. `AggregateError` is the only error a whole
//! aggregate call surfaces.

use crate::models::{Modality, ModalityFailure};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure of one analyzer call (or one of its sub-calls).
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("{service} is unavailable: {message}")]
    Transient { service: String, message: String },

    #[error("{service} rejected the request (status {status}): {message}")]
    Rejected {
        service: String,
        status: u16,
        message: String,
    },

    #[error("{service} timed out after {seconds}s")]
    Timeout { service: String, seconds: u64 },

    #[error("Audio transcription failed: the speech service returned no recognized text")]
    TranscriptionFailed,

    #[error("Content failed moderation: {categories}")]
    UnsafeContent { categories: String },

    #[error("Unexpected response from {service}: {message}")]
    InvalidResponse { service: String, message: String },

    #[error("{service} is not configured")]
    NotConfigured { service: String },
}

impl AnalysisError {
    pub fn transient(service: &str, message: impl Into<String>) -> Self {
        Self::Transient {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_response(service: &str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Coarse classification used in failure reports and logs.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } | Self::NotConfigured { .. } => ErrorKind::Input,
            Self::Transient { .. } | Self::Rejected { .. } => ErrorKind::Service,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::TranscriptionFailed => ErrorKind::TranscriptionFailed,
            Self::UnsafeContent { .. } => ErrorKind::UnsafeContent,
            Self::InvalidResponse { .. } => ErrorKind::InvalidResponse,
        }
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }
}

impl From<StorageError> for AnalysisError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Http { status, message } if status == 429 || status >= 500 => {
                Self::transient("blob storage", message)
            }
            StorageError::Http { status, message } => Self::Rejected {
                service: "blob storage".to_string(),
                status,
                message,
            },
            StorageError::Request(e) => Self::transient("blob storage", e.to_string()),
            other => Self::invalid_input(other.to_string()),
        }
    }
}

/// Serializable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Service,
    Timeout,
    TranscriptionFailed,
    UnsafeContent,
    InvalidResponse,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Input => "input",
            ErrorKind::Service => "service",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TranscriptionFailed => "transcription_failed",
            ErrorKind::UnsafeContent => "unsafe_content",
            ErrorKind::InvalidResponse => "invalid_response",
        };
        write!(f, "{}", name)
    }
}

/// Blob storage and job store errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid storage connection string: {message}")]
    ConnectionString { message: String },

    #[error("Failed to sign access grant: {message}")]
    Signing { message: String },

    #[error("Storage request failed")]
    Request(#[from] reqwest::Error),

    #[error("Storage returned status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Storage I/O failed")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize stored record")]
    Serialization(#[from] serde_json::Error),
}

/// Error surfaced for an aggregate call as a whole.
#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("All requested modalities failed: {}", describe(.failures))]
    AllModalitiesFailed { failures: Vec<ModalityFailure> },
}

fn describe(failures: &[ModalityFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.modality, f.kind))
        .collect::<Vec<_>>()
        .join(", ")
}

impl AggregateError {
    pub fn failed_modalities(&self) -> Vec<Modality> {
        match self {
            Self::AllModalitiesFailed { failures } => failures.iter().map(|f| f.modality).collect(),
        }
    }
}
