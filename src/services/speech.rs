//! Speech-to-text client for short audio.

use super::http::ServiceClient;
use super::{Transcriber, Transcript};
use crate::error::AnalysisError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// Speech durations are reported in 100-nanosecond ticks.
const TICKS_PER_SECOND: f64 = 10_000_000.0;

pub struct SpeechClient {
    client: ServiceClient,
    language: String,
}

impl SpeechClient {
    /// The speech endpoint is derived from the service region.
    pub fn endpoint_for_region(region: &str) -> String {
        format!("https://{}.stt.speech.microsoft.com", region)
    }

    pub fn new(client: ServiceClient, language: &str) -> Self {
        Self {
            client,
            language: language.to_string(),
        }
    }

    fn recognition_url(&self) -> String {
        self.client.url(&format!(
            "speech/recognition/conversation/cognitiveservices/v1?language={}&format=simple",
            self.language
        ))
    }
}

#[async_trait]
impl Transcriber for SpeechClient {
    async fn transcribe(&self, path: &Path) -> Result<Transcript, AnalysisError> {
        let audio = tokio::fs::read(path).await.map_err(|e| {
            AnalysisError::invalid_input(format!("cannot read audio {}: {}", path.display(), e))
        })?;
        info!("Transcribing {} ({} bytes)", path.display(), audio.len());

        let request = self
            .client
            .post(&self.recognition_url())
            .header("Content-Type", content_type(path))
            .header("Accept", "application/json")
            .body(audio);

        let raw: RawRecognition = self.client.send_json(request).await?;
        debug!("Recognition status: {}", raw.recognition_status);
        raw.into_transcript()
    }
}

fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("ogg") => "audio/ogg; codecs=opus",
        _ => "audio/wav; codecs=audio/pcm; samplerate=16000",
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawRecognition {
    recognition_status: String,
    display_text: Option<String>,
    duration: Option<u64>,
}

impl RawRecognition {
    fn into_transcript(self) -> Result<Transcript, AnalysisError> {
        let text = self
            .display_text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        match (self.recognition_status.as_str(), text) {
            ("Success", Some(text)) => Ok(Transcript {
                text,
                duration_seconds: self.duration.map(|ticks| ticks as f64 / TICKS_PER_SECOND),
            }),
            _ => Err(AnalysisError::TranscriptionFailed),
        }
    }
}
