//! Audio analysis: transcription followed by transcript analytics and
//! moderation.
//!
//! Entity recognition, summarization and language detection degrade to
//! empty values on failure. The safety check does not: a transcript that
//! could not be moderated is not returned.

use super::{AudioAnalyzer, SafetyChecker, TextAnalyzer, Transcriber};
use crate::error::AnalysisError;
use crate::models::AudioResult;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub struct SpeechAudioAnalyzer {
    transcriber: Arc<dyn Transcriber>,
    text: Arc<dyn TextAnalyzer>,
    safety: Arc<dyn SafetyChecker>,
}

impl SpeechAudioAnalyzer {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        text: Arc<dyn TextAnalyzer>,
        safety: Arc<dyn SafetyChecker>,
    ) -> Self {
        Self {
            transcriber,
            text,
            safety,
        }
    }
}

/// Log a failed optional sub-call and fall back to the default value.
fn degrade<T: Default>(what: &str, result: Result<T, AnalysisError>) -> T {
    result.unwrap_or_else(|e| {
        warn!("Transcript {} unavailable: {}", what, e);
        T::default()
    })
}

#[async_trait]
impl AudioAnalyzer for SpeechAudioAnalyzer {
    async fn analyze_audio(&self, path: &Path) -> Result<AudioResult, AnalysisError> {
        let transcript = self.transcriber.transcribe(path).await?;
        if transcript.text.trim().is_empty() {
            return Err(AnalysisError::TranscriptionFailed);
        }
        let text = transcript.text.as_str();

        let (entities, summary, language, safety) = tokio::join!(
            self.text.recognize_entities(text),
            self.text.summarize(text),
            self.text.detect_language(text),
            self.safety.check_text(text),
        );
        let safety = safety?;

        info!(
            "Audio analysis complete: {} chars transcribed, safe={}",
            text.len(),
            safety.is_safe
        );

        Ok(AudioResult {
            entities: degrade("entities", entities),
            summary: degrade("summary", summary),
            language: degrade("language", language),
            duration_seconds: transcript.duration_seconds,
            safety,
            transcription: Some(transcript.text),
            redacted: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TextEntity;
    use crate::services::mock::{MockBehavior, MockSafetyChecker};
    use crate::services::Transcript;

    struct FixedTranscriber(&'static str);

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        async fn transcribe(&self, _path: &Path) -> Result<Transcript, AnalysisError> {
            Ok(Transcript {
                text: self.0.to_string(),
                duration_seconds: Some(2.5),
            })
        }
    }

    struct SilentTranscriber;

    #[async_trait]
    impl Transcriber for SilentTranscriber {
        async fn transcribe(&self, _path: &Path) -> Result<Transcript, AnalysisError> {
            Err(AnalysisError::TranscriptionFailed)
        }
    }

    struct FlakyText {
        fail_summary: bool,
    }

    #[async_trait]
    impl TextAnalyzer for FlakyText {
        async fn recognize_entities(&self, text: &str) -> Result<Vec<TextEntity>, AnalysisError> {
            Ok(vec![TextEntity {
                text: text.split_whitespace().next().unwrap_or("").to_string(),
                category: "Person".to_string(),
                ..Default::default()
            }])
        }

        async fn summarize(&self, _text: &str) -> Result<Option<String>, AnalysisError> {
            if self.fail_summary {
                Err(AnalysisError::transient("language", "503"))
            } else {
                Ok(Some("summary".to_string()))
            }
        }

        async fn detect_language(&self, _text: &str) -> Result<Option<String>, AnalysisError> {
            Ok(Some("en".to_string()))
        }
    }

    fn build(
        transcriber: impl Transcriber + 'static,
        fail_summary: bool,
        safety: MockSafetyChecker,
    ) -> SpeechAudioAnalyzer {
        SpeechAudioAnalyzer::new(
            Arc::new(transcriber),
            Arc::new(FlakyText { fail_summary }),
            Arc::new(safety),
        )
    }

    #[tokio::test]
    async fn test_merges_sub_results() {
        let analyzer = build(FixedTranscriber("Ada spoke today"), false, MockSafetyChecker::safe());
        let result = analyzer.analyze_audio(Path::new("talk.wav")).await.unwrap();

        assert_eq!(result.transcription.as_deref(), Some("Ada spoke today"));
        assert_eq!(result.entities[0].text, "Ada");
        assert_eq!(result.summary.as_deref(), Some("summary"));
        assert_eq!(result.language.as_deref(), Some("en"));
        assert_eq!(result.duration_seconds, Some(2.5));
        assert!(result.safety.is_safe);
    }

    #[tokio::test]
    async fn test_summary_failure_degrades() {
        let analyzer = build(FixedTranscriber("Ada spoke"), true, MockSafetyChecker::safe());
        let result = analyzer.analyze_audio(Path::new("talk.wav")).await.unwrap();
        assert!(result.summary.is_none());
        assert_eq!(result.entities.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_transcript_fails() {
        let analyzer = build(FixedTranscriber("   "), false, MockSafetyChecker::safe());
        let err = analyzer.analyze_audio(Path::new("talk.wav")).await.unwrap_err();
        assert!(matches!(err, AnalysisError::TranscriptionFailed));

        let analyzer = build(SilentTranscriber, false, MockSafetyChecker::safe());
        let err = analyzer.analyze_audio(Path::new("talk.wav")).await.unwrap_err();
        assert!(matches!(err, AnalysisError::TranscriptionFailed));
    }

    #[tokio::test]
    async fn test_safety_failure_fails_audio() {
        let safety = MockSafetyChecker {
            behavior: MockBehavior::failing(),
            severities: vec![],
        };
        let analyzer = build(FixedTranscriber("hello"), false, safety);
        assert!(analyzer.analyze_audio(Path::new("talk.wav")).await.is_err());
    }
}
