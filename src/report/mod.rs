//! Report types and rendering.

pub mod generator;

pub use generator::{generate_json_report, generate_markdown_report, write_report};

use crate::models::{AggregateResult, Modality};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Complete output of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub analysis: AggregateResult,
}

/// Run metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub requested: Vec<Modality>,
    pub succeeded: Vec<Modality>,
    pub failed: Vec<Modality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
}

impl Report {
    /// Build a report, deriving the outcome lists from `analysis`.
    pub fn new(
        job_id: Option<String>,
        requested: Vec<Modality>,
        target_language: Option<String>,
        analysis: AggregateResult,
        duration_seconds: f64,
    ) -> Self {
        let metadata = ReportMetadata {
            job_id,
            generated_at: Utc::now(),
            duration_seconds,
            requested,
            succeeded: analysis.succeeded(),
            failed: analysis.failed(),
            target_language,
        };
        Self { metadata, analysis }
    }
}
