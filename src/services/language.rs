//! Text analytics client: entity recognition, language detection and
//! abstractive summarization.

use super::http::{PollSettings, ServiceClient};
use super::{truncate_chars, TextAnalyzer};
use crate::error::AnalysisError;
use crate::models::TextEntity;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

pub const DEFAULT_API_VERSION: &str = "2023-04-01";

/// Longest document the synchronous endpoint accepts.
pub const MAX_DOCUMENT_CHARS: usize = 5_120;

pub struct LanguageClient {
    client: ServiceClient,
    api_version: String,
    language: String,
    poll: PollSettings,
}

impl LanguageClient {
    pub fn new(client: ServiceClient, api_version: &str, language: &str, poll: PollSettings) -> Self {
        Self {
            client,
            api_version: api_version.to_string(),
            language: language.to_string(),
            poll,
        }
    }

    fn sync_url(&self) -> String {
        self.client.url(&format!(
            "language/:analyze-text?api-version={}",
            self.api_version
        ))
    }

    fn jobs_url(&self) -> String {
        self.client.url(&format!(
            "language/analyze-text/jobs?api-version={}",
            self.api_version
        ))
    }

    fn documents(&self, text: &str) -> Value {
        json!({
            "documents": [{
                "id": "1",
                "language": self.language,
                "text": truncate_chars(text, MAX_DOCUMENT_CHARS),
            }]
        })
    }

    async fn analyze_sync(&self, kind: &str, text: &str) -> Result<Value, AnalysisError> {
        let body = json!({
            "kind": kind,
            "analysisInput": self.documents(text),
        });
        self.client
            .send_json(self.client.post(&self.sync_url()).json(&body))
            .await
    }
}

#[async_trait]
impl TextAnalyzer for LanguageClient {
    async fn recognize_entities(&self, text: &str) -> Result<Vec<TextEntity>, AnalysisError> {
        let body = self.analyze_sync("EntityRecognition", text).await?;
        let entities = parse_entities(&body)?;
        debug!("Recognized {} entities", entities.len());
        Ok(entities)
    }

    async fn summarize(&self, text: &str) -> Result<Option<String>, AnalysisError> {
        let body = json!({
            "displayName": "transcript summary",
            "analysisInput": self.documents(text),
            "tasks": [{
                "kind": "AbstractiveSummarization",
                "taskName": "summary",
                "parameters": { "sentenceCount": 3 }
            }]
        });
        let operation = self
            .client
            .start_operation(self.client.post(&self.jobs_url()).json(&body))
            .await?;
        let result = self.client.poll_operation(&operation, self.poll).await?;
        Ok(parse_summary(&result))
    }

    async fn detect_language(&self, text: &str) -> Result<Option<String>, AnalysisError> {
        let body = self.analyze_sync("LanguageDetection", text).await?;
        Ok(body
            .pointer("/results/documents/0/detectedLanguage/iso6391Name")
            .and_then(|v| v.as_str())
            .map(String::from))
    }
}

/// Extract entities from an `EntityRecognitionResults` document.
pub fn parse_entities(body: &Value) -> Result<Vec<TextEntity>, AnalysisError> {
    if let Some(error) = body.pointer("/results/errors/0/error/message").and_then(|v| v.as_str()) {
        return Err(AnalysisError::invalid_response("language", error));
    }

    let entities = body
        .pointer("/results/documents/0/entities")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|e| {
                    Some(TextEntity {
                        text: e.get("text")?.as_str()?.to_string(),
                        category: e
                            .get("category")
                            .and_then(|v| v.as_str())
                            .unwrap_or("Unknown")
                            .to_string(),
                        sub_category: e
                            .get("subcategory")
                            .and_then(|v| v.as_str())
                            .map(String::from),
                        confidence: e.get("confidenceScore").and_then(|v| v.as_f64()),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(entities)
}

/// First summary sentence of a finished summarization job.
pub fn parse_summary(body: &Value) -> Option<String> {
    body.pointer("/tasks/items/0/results/documents/0/summaries/0/text")
        .and_then(|v| v.as_str())
        .map(String::from)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entities() {
        let body = json!({
            "kind": "EntityRecognitionResults",
            "results": {
                "documents": [{
                    "id": "1",
                    "entities": [
                        {"text": "Seattle", "category": "Location", "subcategory": "GPE", "confidenceScore": 0.99},
                        {"text": "Tuesday", "category": "DateTime", "confidenceScore": 0.8},
                        {"category": "Broken"}
                    ],
                    "warnings": []
                }],
                "errors": []
            }
        });

        let entities = parse_entities(&body).unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].sub_category.as_deref(), Some("GPE"));
        assert!(entities[1].sub_category.is_none());
    }

    #[test]
    fn test_parse_entities_document_error() {
        let body = json!({
            "results": {
                "documents": [],
                "errors": [{"id": "1", "error": {"code": "InvalidArgument", "message": "Document text is empty."}}]
            }
        });
        assert!(parse_entities(&body).is_err());
    }

    #[test]
    fn test_parse_summary() {
        let body = json!({
            "status": "succeeded",
            "tasks": {"items": [{
                "kind": "AbstractiveSummarizationLROResults",
                "results": {"documents": [{"id": "1", "summaries": [{"text": "A short talk about weather."}]}]}
            }]}
        });
        assert_eq!(parse_summary(&body).as_deref(), Some("A short talk about weather."));
        assert_eq!(parse_summary(&json!({"tasks": {"items": []}})), None);
    }
}
