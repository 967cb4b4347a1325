//! External analyzer collaborators.
//!
//! Each cloud service is reached through a narrow async trait so the
//! aggregator can be wired to the HTTP clients in this module or to test
//! doubles.

pub mod audio;
pub mod document;
pub mod http;
pub mod language;
pub mod safety;
pub mod speech;
pub mod translator;
pub mod unconfigured;
pub mod vision;

use crate::error::AnalysisError;
use crate::models::{AudioResult, DocumentResult, ImageResult, SafetyReport, TextEntity};
use async_trait::async_trait;
use std::path::Path;

pub use audio::SpeechAudioAnalyzer;
pub use document::FormRecognizerClient;
pub use language::LanguageClient;
pub use safety::ContentSafetyClient;
pub use speech::SpeechClient;
pub use translator::BatchTranslatorClient;
pub use unconfigured::Unconfigured;
pub use vision::{VisionClient, VisionImageAnalyzer};

/// Document understanding.
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    async fn analyze_document(&self, url: &str) -> Result<DocumentResult, AnalysisError>;
}

/// Image understanding. Implementations must embed a safety check and fail
/// if it cannot be completed.
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    async fn analyze_image(&self, url: &str) -> Result<ImageResult, AnalysisError>;
}

/// Image description (caption, tags, objects, people, OCR) without
/// moderation.
#[async_trait]
pub trait ImageDescriber: Send + Sync {
    async fn describe_image(&self, url: &str) -> Result<ImageResult, AnalysisError>;
}

/// Speech-to-text plus transcript analytics.
#[async_trait]
pub trait AudioAnalyzer: Send + Sync {
    async fn analyze_audio(&self, path: &Path) -> Result<AudioResult, AnalysisError>;
}

/// Content moderation.
#[async_trait]
pub trait SafetyChecker: Send + Sync {
    async fn check_text(&self, text: &str) -> Result<SafetyReport, AnalysisError>;
    async fn check_image(&self, url: &str) -> Result<SafetyReport, AnalysisError>;
}

/// Raw output of a speech recognizer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub duration_seconds: Option<f64>,
}

/// Speech-to-text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, path: &Path) -> Result<Transcript, AnalysisError>;
}

/// Text analytics over a transcript.
#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    async fn recognize_entities(&self, text: &str) -> Result<Vec<TextEntity>, AnalysisError>;
    async fn summarize(&self, text: &str) -> Result<Option<String>, AnalysisError>;
    async fn detect_language(&self, text: &str) -> Result<Option<String>, AnalysisError>;
}

/// Batch document translation between two storage containers.
#[async_trait]
pub trait DocumentTranslator: Send + Sync {
    async fn translate(
        &self,
        source_container_url: &str,
        target_container_url: &str,
        target_language: &str,
    ) -> Result<(), AnalysisError>;
}

/// Deserialize a field that the services may send as explicit `null`,
/// falling back to its default.
pub(crate) fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + serde::Deserialize<'de>,
{
    use serde::Deserialize;
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Truncate `text` to at most `max_chars` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ============================================================================
// Mock collaborators for testing
// ============================================================================

#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::models::CategorySeverity;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Behavior shared by every mock analyzer.
    #[derive(Clone)]
    pub struct MockBehavior {
        pub latency: Duration,
        pub fail: bool,
        pub calls: Arc<AtomicUsize>,
    }

    impl MockBehavior {
        pub fn ok() -> Self {
            Self {
                latency: Duration::ZERO,
                fail: false,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::ok()
            }
        }

        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        async fn run(&self, service: &str) -> Result<(), AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if self.fail {
                Err(AnalysisError::transient(service, "mock failure"))
            } else {
                Ok(())
            }
        }
    }

    pub struct MockDocumentAnalyzer(pub MockBehavior);

    #[async_trait]
    impl DocumentAnalyzer for MockDocumentAnalyzer {
        async fn analyze_document(&self, _url: &str) -> Result<DocumentResult, AnalysisError> {
            self.0.run("document").await?;
            Ok(DocumentResult {
                pages: vec![crate::models::PageInfo {
                    page_number: 1,
                    lines: vec!["Invoice".to_string()],
                    ..Default::default()
                }],
                ..Default::default()
            })
        }
    }

    pub struct MockImageAnalyzer {
        pub behavior: MockBehavior,
        pub safety: SafetyReport,
    }

    impl MockImageAnalyzer {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                safety: SafetyReport::from_categories(vec![]),
            }
        }
    }

    #[async_trait]
    impl ImageAnalyzer for MockImageAnalyzer {
        async fn analyze_image(&self, _url: &str) -> Result<ImageResult, AnalysisError> {
            self.behavior.run("image").await?;
            Ok(ImageResult {
                caption: Some(crate::models::Caption {
                    text: "a cat on a mat".to_string(),
                    confidence: Some(0.9),
                }),
                text: Some("MAT".to_string()),
                safety: self.safety.clone(),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl ImageDescriber for MockImageAnalyzer {
        async fn describe_image(&self, url: &str) -> Result<ImageResult, AnalysisError> {
            self.analyze_image(url).await
        }
    }

    pub struct MockAudioAnalyzer(pub MockBehavior);

    #[async_trait]
    impl AudioAnalyzer for MockAudioAnalyzer {
        async fn analyze_audio(&self, _path: &Path) -> Result<AudioResult, AnalysisError> {
            self.0.run("audio").await?;
            Ok(AudioResult {
                transcription: Some("hello world".to_string()),
                safety: SafetyReport::from_categories(vec![]),
                ..Default::default()
            })
        }
    }

    /// Safety checker returning fixed severities.
    pub struct MockSafetyChecker {
        pub behavior: MockBehavior,
        pub severities: Vec<(&'static str, u8)>,
    }

    impl MockSafetyChecker {
        pub fn safe() -> Self {
            Self {
                behavior: MockBehavior::ok(),
                severities: vec![("Hate", 0), ("SelfHarm", 0), ("Sexual", 0), ("Violence", 0)],
            }
        }

        fn report(&self) -> SafetyReport {
            SafetyReport::from_categories(
                self.severities
                    .iter()
                    .map(|(c, s)| CategorySeverity {
                        category: c.to_string(),
                        severity: *s,
                    })
                    .collect(),
            )
        }
    }

    #[async_trait]
    impl SafetyChecker for MockSafetyChecker {
        async fn check_text(&self, _text: &str) -> Result<SafetyReport, AnalysisError> {
            self.behavior.run("safety").await?;
            Ok(self.report())
        }

        async fn check_image(&self, _url: &str) -> Result<SafetyReport, AnalysisError> {
            self.behavior.run("safety").await?;
            Ok(self.report())
        }
    }

    pub struct MockTranslator(pub MockBehavior);

    #[async_trait]
    impl DocumentTranslator for MockTranslator {
        async fn translate(
            &self,
            _source_container_url: &str,
            _target_container_url: &str,
            _target_language: &str,
        ) -> Result<(), AnalysisError> {
            self.0.run("translator").await
        }
    }
}
