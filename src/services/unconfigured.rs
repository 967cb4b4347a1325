//! Stand-in for a service with no endpoint or key configured.
//!
//! Every call fails with `NotConfigured`, which the aggregator isolates
//! like any other per-modality failure.

use super::{
    AudioAnalyzer, DocumentAnalyzer, DocumentTranslator, ImageAnalyzer, SafetyChecker,
    TextAnalyzer, Transcriber, Transcript,
};
use crate::error::AnalysisError;
use crate::models::{AudioResult, DocumentResult, ImageResult, SafetyReport, TextEntity};
use async_trait::async_trait;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Unconfigured {
    service: &'static str,
}

impl Unconfigured {
    pub fn new(service: &'static str) -> Self {
        Self { service }
    }

    fn error(&self) -> AnalysisError {
        AnalysisError::NotConfigured {
            service: self.service.to_string(),
        }
    }
}

#[async_trait]
impl DocumentAnalyzer for Unconfigured {
    async fn analyze_document(&self, _url: &str) -> Result<DocumentResult, AnalysisError> {
        Err(self.error())
    }
}

#[async_trait]
impl ImageAnalyzer for Unconfigured {
    async fn analyze_image(&self, _url: &str) -> Result<ImageResult, AnalysisError> {
        Err(self.error())
    }
}

#[async_trait]
impl AudioAnalyzer for Unconfigured {
    async fn analyze_audio(&self, _path: &Path) -> Result<AudioResult, AnalysisError> {
        Err(self.error())
    }
}

#[async_trait]
impl DocumentTranslator for Unconfigured {
    async fn translate(&self, _: &str, _: &str, _: &str) -> Result<(), AnalysisError> {
        Err(self.error())
    }
}

#[async_trait]
impl SafetyChecker for Unconfigured {
    async fn check_text(&self, _text: &str) -> Result<SafetyReport, AnalysisError> {
        Err(self.error())
    }

    async fn check_image(&self, _url: &str) -> Result<SafetyReport, AnalysisError> {
        Err(self.error())
    }
}

#[async_trait]
impl Transcriber for Unconfigured {
    async fn transcribe(&self, _path: &Path) -> Result<Transcript, AnalysisError> {
        Err(self.error())
    }
}

#[async_trait]
impl TextAnalyzer for Unconfigured {
    async fn recognize_entities(&self, _text: &str) -> Result<Vec<TextEntity>, AnalysisError> {
        Err(self.error())
    }

    async fn summarize(&self, _text: &str) -> Result<Option<String>, AnalysisError> {
        Err(self.error())
    }

    async fn detect_language(&self, _text: &str) -> Result<Option<String>, AnalysisError> {
        Err(self.error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_fails() {
        let unconfigured = Unconfigured::new("speech");
        let err = tokio_test::block_on(unconfigured.analyze_audio(Path::new("a.wav"))).unwrap_err();
        assert!(matches!(err, AnalysisError::NotConfigured { .. }));
        assert_eq!(err.to_string(), "speech is not configured");
    }

    #[test]
    fn test_unconfigured_text_services_fail() {
        let unconfigured = Unconfigured::new("content safety");
        let err = tokio_test::block_on(unconfigured.check_text("hello")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Input);
        assert!(tokio_test::block_on(unconfigured.summarize("hello")).is_err());
    }
}
