//! Data models for multi-modal analysis.
//!
//! This module contains the request, per-modality result and aggregate
//! result types shared by the aggregator, the service clients and the
//! report generators.

use crate::error::{AggregateError, AnalysisError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Severity at or above which a moderation category marks content unsafe
/// (on the service's 0-7 scale).
pub const SAFETY_THRESHOLD: u8 = 4;

/// One kind of input medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Modality {
    #[serde(rename = "document_analysis")]
    Document,
    #[serde(rename = "image_analysis")]
    Image,
    #[serde(rename = "audio_analysis")]
    Audio,
}

impl Modality {
    /// All modalities, in dispatch order.
    pub const ALL: [Modality; 3] = [Modality::Document, Modality::Image, Modality::Audio];

    /// Key under which this modality's result appears in the aggregate output.
    pub fn key(&self) -> &'static str {
        match self {
            Modality::Document => "document_analysis",
            Modality::Image => "image_analysis",
            Modality::Audio => "audio_analysis",
        }
    }

    /// Short human-readable name.
    pub fn label(&self) -> &'static str {
        match self {
            Modality::Document => "Document",
            Modality::Image => "Image",
            Modality::Audio => "Audio",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// A request to analyze zero or more inputs.
///
/// Empty strings are treated the same as absent references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// URL of a document to analyze.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
    /// URL of an image to analyze.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Local path of an audio file to transcribe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
    /// Target language for document translation (e.g. "es").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
}

impl AnalysisRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, url: impl Into<String>) -> Self {
        self.document_url = Some(url.into());
        self
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn with_audio(mut self, path: impl Into<PathBuf>) -> Self {
        self.audio_path = Some(path.into());
        self
    }

    pub fn with_target_language(mut self, language: impl Into<String>) -> Self {
        self.target_language = Some(language.into());
        self
    }

    /// The document reference, if present and non-empty.
    pub fn document(&self) -> Option<&str> {
        non_empty(self.document_url.as_deref())
    }

    /// The image reference, if present and non-empty.
    pub fn image(&self) -> Option<&str> {
        non_empty(self.image_url.as_deref())
    }

    /// The audio reference, if present and non-empty.
    pub fn audio(&self) -> Option<&std::path::Path> {
        self.audio_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// The translation target, if present and non-empty.
    pub fn target_language(&self) -> Option<&str> {
        non_empty(self.target_language.as_deref())
    }

    /// Modalities this request asks for, in dispatch order.
    pub fn requested_modalities(&self) -> Vec<Modality> {
        Modality::ALL
            .into_iter()
            .filter(|m| match m {
                Modality::Document => self.document().is_some(),
                Modality::Image => self.image().is_some(),
                Modality::Audio => self.audio().is_some(),
            })
            .collect()
    }

    /// Returns true if no modality is requested.
    pub fn is_empty(&self) -> bool {
        self.requested_modalities().is_empty()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Strip the query string (which may carry an access grant) from a reference
/// so it can be logged or reported.
pub fn sanitize_reference(reference: &str) -> String {
    match reference.split_once('?') {
        Some((base, _)) => base.to_string(),
        None => reference.to_string(),
    }
}

/// Result of one modality's analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum ModalityResult {
    Document(DocumentResult),
    Image(ImageResult),
    Audio(AudioResult),
}

impl ModalityResult {
    /// The modality this result belongs to.
    pub fn modality(&self) -> Modality {
        match self {
            ModalityResult::Document(_) => Modality::Document,
            ModalityResult::Image(_) => Modality::Image,
            ModalityResult::Audio(_) => Modality::Audio,
        }
    }
}

/// Structured output of the document-understanding service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    /// Pages with their lines and words.
    pub pages: Vec<PageInfo>,
    /// Tables found in the document.
    pub tables: Vec<TableInfo>,
    /// Paragraphs in reading order.
    pub paragraphs: Vec<ParagraphInfo>,
    /// Extracted key-value pairs.
    pub key_value_pairs: Vec<KeyValuePair>,
    /// Entities, empty when the service does not expose them.
    pub entities: Vec<DocumentEntity>,
    /// Read grant for the translated document, when translation was requested
    /// and succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_document_url: Option<String>,
}

/// A single page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub page_number: u32,
    pub lines: Vec<String>,
    pub words: Vec<String>,
    pub appearance: PageAppearance,
}

/// Optional style information for a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageAppearance {
    pub style: Option<String>,
    pub style_confidence: Option<f64>,
}

/// A table and its cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub row_count: u32,
    pub column_count: u32,
    pub cells: Vec<TableCell>,
}

/// A single table cell. Spans default to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCell {
    pub content: String,
    pub row_index: u32,
    pub column_index: u32,
    pub row_span: u32,
    pub column_span: u32,
}

/// A paragraph with optional layout metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParagraphInfo {
    pub content: String,
    pub role: Option<String>,
    pub bounding_box: Option<Vec<f64>>,
    pub style: Option<String>,
    pub confidence: Option<f64>,
}

/// A key-value pair. The value may be missing when the service found a key
/// with no associated value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyValuePair {
    pub key: FieldValue,
    pub value: Option<FieldValue>,
    pub confidence: Option<f64>,
}

/// One side of a key-value pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub content: String,
    pub bounding_box: Option<Vec<f64>>,
    pub confidence: Option<f64>,
}

/// An entity found in a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentEntity {
    pub category: String,
    pub sub_category: Option<String>,
    pub content: String,
    pub confidence: Option<f64>,
    pub bounding_box: Option<Vec<f64>>,
}

/// Structured output of the image-understanding service plus its
/// moderation result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
    /// Detected objects.
    pub objects: Vec<DetectedObject>,
    /// Content tags.
    pub tags: Vec<ImageTag>,
    /// Generated caption.
    pub caption: Option<Caption>,
    /// Detected people.
    pub people: Vec<DetectedPerson>,
    /// Text read from the image (OCR), one line per row.
    pub text: Option<String>,
    /// Moderation result for the image.
    pub safety: SafetyReport,
    /// True when caption and text were removed because the image is unsafe.
    #[serde(default)]
    pub redacted: bool,
}

impl ImageResult {
    /// Remove generated text content while keeping the safety breakdown.
    pub fn redact(&mut self) {
        self.caption = None;
        self.text = None;
        self.redacted = true;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    pub text: String,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageTag {
    pub name: String,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub name: Option<String>,
    pub confidence: Option<f64>,
    pub bounding_box: Option<BoundingBox>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectedPerson {
    pub confidence: Option<f64>,
    pub bounding_box: Option<BoundingBox>,
}

/// Pixel rectangle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

/// Transcript of an audio file plus text analytics and moderation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioResult {
    /// Recognized text. `None` only after redaction.
    pub transcription: Option<String>,
    /// Named entities found in the transcript.
    pub entities: Vec<TextEntity>,
    /// Abstractive summary of the transcript.
    pub summary: Option<String>,
    /// Detected language (ISO 639-1).
    pub language: Option<String>,
    /// Audio duration reported by the speech service.
    pub duration_seconds: Option<f64>,
    /// Moderation result for the transcript.
    pub safety: SafetyReport,
    /// True when text content was removed because the transcript is unsafe.
    #[serde(default)]
    pub redacted: bool,
}

impl AudioResult {
    /// Remove text content while keeping the safety breakdown.
    pub fn redact(&mut self) {
        self.transcription = None;
        self.summary = None;
        self.entities.clear();
        self.redacted = true;
    }
}

/// An entity found in free text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextEntity {
    pub text: String,
    pub category: String,
    pub sub_category: Option<String>,
    pub confidence: Option<f64>,
}

/// Moderation outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyReport {
    /// True iff every category is below [`SAFETY_THRESHOLD`].
    pub is_safe: bool,
    /// Per-category severities, as reported.
    pub categories: Vec<CategorySeverity>,
}

impl SafetyReport {
    /// Build a report, computing `is_safe` from the severities.
    pub fn from_categories(categories: Vec<CategorySeverity>) -> Self {
        let is_safe = categories.iter().all(|c| c.severity < SAFETY_THRESHOLD);
        Self {
            is_safe,
            categories,
        }
    }

    /// Categories at or above the threshold.
    pub fn flagged(&self) -> impl Iterator<Item = &CategorySeverity> {
        self.categories
            .iter()
            .filter(|c| c.severity >= SAFETY_THRESHOLD)
    }

    /// Comma-separated `category=severity` list of flagged categories.
    pub fn flagged_summary(&self) -> String {
        self.flagged()
            .map(|c| format!("{}={}", c.category, c.severity))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySeverity {
    pub category: String,
    pub severity: u8,
}

/// Why a requested modality is missing from the aggregate result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalityFailure {
    pub modality: Modality,
    /// The input reference with any access grant stripped.
    pub reference: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Merged output of one aggregate call.
///
/// A modality key is absent when it was not requested or when it failed;
/// failures are listed separately so the two cases stay distinguishable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_analysis: Option<DocumentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_analysis: Option<ImageResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_analysis: Option<AudioResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ModalityFailure>,
}

impl AggregateResult {
    /// Store a successful result under its modality key.
    pub fn insert(&mut self, result: ModalityResult) {
        match result {
            ModalityResult::Document(r) => self.document_analysis = Some(r),
            ModalityResult::Image(r) => self.image_analysis = Some(r),
            ModalityResult::Audio(r) => self.audio_analysis = Some(r),
        }
    }

    pub fn record_failure(&mut self, failure: ModalityFailure) {
        self.failures.push(failure);
    }

    /// Whether a result is present for the modality.
    pub fn contains(&self, modality: Modality) -> bool {
        match modality {
            Modality::Document => self.document_analysis.is_some(),
            Modality::Image => self.image_analysis.is_some(),
            Modality::Audio => self.audio_analysis.is_some(),
        }
    }

    /// Modalities with a result, in dispatch order.
    pub fn succeeded(&self) -> Vec<Modality> {
        Modality::ALL
            .into_iter()
            .filter(|m| self.contains(*m))
            .collect()
    }

    /// Modalities that were requested but failed.
    pub fn failed(&self) -> Vec<Modality> {
        self.failures.iter().map(|f| f.modality).collect()
    }

    /// Number of modality results present.
    pub fn len(&self) -> usize {
        self.succeeded().len()
    }

    /// Returns true if no modality result is present.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Safety reports of every moderated result present.
    pub fn safety_reports(&self) -> Vec<(Modality, &SafetyReport)> {
        let mut reports = Vec::new();
        if let Some(ref image) = self.image_analysis {
            reports.push((Modality::Image, &image.safety));
        }
        if let Some(ref audio) = self.audio_analysis {
            reports.push((Modality::Audio, &audio.safety));
        }
        reports
    }

    /// Moderation failure naming every flagged result, or `None` when all
    /// moderated content is safe.
    pub fn moderation_error(&self) -> Option<AnalysisError> {
        let flagged: Vec<String> = self
            .safety_reports()
            .into_iter()
            .filter(|(_, report)| !report.is_safe)
            .map(|(modality, report)| format!("{} ({})", modality.label(), report.flagged_summary()))
            .collect();

        if flagged.is_empty() {
            None
        } else {
            Some(AnalysisError::UnsafeContent {
                categories: flagged.join(", "),
            })
        }
    }

    /// Fail wholesale when modalities were requested and none succeeded.
    ///
    /// An empty result with no failures (nothing requested) is not an error.
    pub fn into_checked(self) -> Result<Self, AggregateError> {
        if self.is_empty() && !self.failures.is_empty() {
            Err(AggregateError::AllModalitiesFailed {
                failures: self.failures,
            })
        } else {
            Ok(self)
        }
    }
}

/// Lifecycle state of a tracked aggregate job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether the job has stopped and its record can expire.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Stored state of one aggregate job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    /// Requested modalities, in dispatch order.
    pub modalities: Vec<Modality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AggregateResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(id: impl Into<String>, modalities: Vec<Modality>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            modalities,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to a new status, stamping the update time.
    pub fn transition(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Whether a terminal record is older than `retention`.
    pub fn is_expired(&self, retention: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.status.is_terminal() && now - self.updated_at > retention
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(name: &str, severity: u8) -> CategorySeverity {
        CategorySeverity {
            category: name.to_string(),
            severity,
        }
    }

    #[test]
    fn test_safety_below_threshold_is_safe() {
        let report = SafetyReport::from_categories(vec![
            category("Hate", 0),
            category("SelfHarm", 2),
            category("Sexual", 3),
            category("Violence", 1),
        ]);
        assert!(report.is_safe);
        assert_eq!(report.categories.len(), 4);
        assert_eq!(report.flagged().count(), 0);
    }

    #[test]
    fn test_safety_at_threshold_is_unsafe() {
        let report = SafetyReport::from_categories(vec![
            category("Hate", 0),
            category("Violence", 4),
        ]);
        assert!(!report.is_safe);
        // Full breakdown preserved, not only the flagged category
        assert_eq!(report.categories.len(), 2);
        assert_eq!(report.flagged_summary(), "Violence=4");
    }

    #[test]
    fn test_request_ignores_empty_references() {
        let request = AnalysisRequest::new()
            .with_document("  ")
            .with_image("https://example.com/cat.png");
        assert_eq!(request.requested_modalities(), vec![Modality::Image]);
        assert!(AnalysisRequest::new().is_empty());
    }

    #[test]
    fn test_requested_modalities_order() {
        let request = AnalysisRequest::new()
            .with_audio("talk.wav")
            .with_document("https://example.com/a.pdf");
        assert_eq!(
            request.requested_modalities(),
            vec![Modality::Document, Modality::Audio]
        );
    }

    #[test]
    fn test_sanitize_reference() {
        assert_eq!(
            sanitize_reference("https://acct.blob.core.windows.net/c/a.pdf?sv=2022&sig=abc"),
            "https://acct.blob.core.windows.net/c/a.pdf"
        );
        assert_eq!(sanitize_reference("local.wav"), "local.wav");
    }

    #[test]
    fn test_aggregate_serializes_only_present_keys() {
        let mut aggregate = AggregateResult::default();
        aggregate.insert(ModalityResult::Image(ImageResult::default()));

        let json = serde_json::to_value(&aggregate).unwrap();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["image_analysis".to_string()]);
    }

    #[test]
    fn test_into_checked() {
        assert!(AggregateResult::default().into_checked().is_ok());

        let mut failed = AggregateResult::default();
        failed.record_failure(ModalityFailure {
            modality: Modality::Audio,
            reference: "talk.wav".to_string(),
            kind: ErrorKind::TranscriptionFailed,
            message: "no text".to_string(),
        });
        assert!(failed.clone().into_checked().is_err());

        failed.insert(ModalityResult::Document(DocumentResult::default()));
        assert!(failed.into_checked().is_ok());
    }

    #[test]
    fn test_redaction_keeps_safety() {
        let mut audio = AudioResult {
            transcription: Some("text".to_string()),
            summary: Some("sum".to_string()),
            entities: vec![TextEntity::default()],
            safety: SafetyReport::from_categories(vec![category("Hate", 6)]),
            ..Default::default()
        };
        audio.redact();
        assert!(audio.transcription.is_none());
        assert!(audio.entities.is_empty());
        assert!(audio.redacted);
        assert_eq!(audio.safety.categories.len(), 1);
    }

    #[test]
    fn test_moderation_error_names_flagged_results() {
        let mut result = AggregateResult::default();
        result.insert(ModalityResult::Audio(AudioResult {
            safety: SafetyReport::from_categories(vec![category("Hate", 1)]),
            ..Default::default()
        }));
        assert!(result.moderation_error().is_none());

        result.insert(ModalityResult::Image(ImageResult {
            safety: SafetyReport::from_categories(vec![category("Violence", 6), category("Hate", 0)]),
            ..Default::default()
        }));
        let err = result.moderation_error().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsafeContent);
        assert_eq!(err.to_string(), "Content failed moderation: Image (Violence=6)");
    }

    #[test]
    fn test_job_record_expiry() {
        let mut record = JobRecord::new("job-1", vec![Modality::Document]);
        let later = record.updated_at + chrono::Duration::hours(2);
        assert!(!record.is_expired(chrono::Duration::hours(1), later));

        record.transition(JobStatus::Completed);
        let later = record.updated_at + chrono::Duration::hours(2);
        assert!(record.is_expired(chrono::Duration::hours(1), later));
        assert!(!record.is_expired(chrono::Duration::hours(3), later));
    }
}
