//! Content moderation client.

use super::http::ServiceClient;
use super::{truncate_chars, SafetyChecker};
use crate::error::AnalysisError;
use crate::models::{CategorySeverity, SafetyReport};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

pub const DEFAULT_API_VERSION: &str = "2023-10-01";

/// Categories requested on every check.
pub const CATEGORIES: [&str; 4] = ["Hate", "SelfHarm", "Sexual", "Violence"];

/// Longest text the text endpoint accepts.
pub const MAX_TEXT_CHARS: usize = 10_000;

pub struct ContentSafetyClient {
    client: ServiceClient,
    api_version: String,
}

impl ContentSafetyClient {
    pub fn new(client: ServiceClient, api_version: &str) -> Self {
        Self {
            client,
            api_version: api_version.to_string(),
        }
    }

    fn endpoint(&self, kind: &str) -> String {
        self.client.url(&format!(
            "contentsafety/{}:analyze?api-version={}",
            kind, self.api_version
        ))
    }

    async fn analyze(&self, kind: &str, body: serde_json::Value) -> Result<SafetyReport, AnalysisError> {
        let request = self.client.post(&self.endpoint(kind)).json(&body);
        let response: RawSafetyResponse = self.client.send_json(request).await?;
        let report = response.into_report();

        if report.is_safe {
            debug!("{} content passed moderation", kind);
        } else {
            warn!("{} content flagged: {}", kind, report.flagged_summary());
        }
        Ok(report)
    }
}

#[async_trait]
impl SafetyChecker for ContentSafetyClient {
    async fn check_text(&self, text: &str) -> Result<SafetyReport, AnalysisError> {
        let text = truncate_chars(text, MAX_TEXT_CHARS);
        self.analyze("text", json!({ "text": text, "categories": CATEGORIES }))
            .await
    }

    async fn check_image(&self, url: &str) -> Result<SafetyReport, AnalysisError> {
        self.analyze(
            "image",
            json!({ "image": { "blobUrl": url }, "categories": CATEGORIES }),
        )
        .await
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawSafetyResponse {
    categories_analysis: Vec<RawCategory>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCategory {
    category: String,
    severity: Option<u8>,
}

impl RawSafetyResponse {
    fn into_report(self) -> SafetyReport {
        SafetyReport::from_categories(
            self.categories_analysis
                .into_iter()
                .map(|c| CategorySeverity {
                    category: c.category,
                    severity: c.severity.unwrap_or(0),
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_safe_response() {
        let raw: RawSafetyResponse = serde_json::from_value(json!({
            "blocklistsMatch": [],
            "categoriesAnalysis": [
                {"category": "Hate", "severity": 0},
                {"category": "SelfHarm", "severity": 0},
                {"category": "Sexual", "severity": 2},
                {"category": "Violence", "severity": 0}
            ]
        }))
        .unwrap();

        let report = raw.into_report();
        assert!(report.is_safe);
        assert_eq!(report.categories.len(), 4);
    }

    #[test]
    fn test_parse_flagged_response() {
        let raw: RawSafetyResponse = serde_json::from_value(json!({
            "categoriesAnalysis": [
                {"category": "Hate", "severity": 0},
                {"category": "Violence", "severity": 6}
            ]
        }))
        .unwrap();

        let report = raw.into_report();
        assert!(!report.is_safe);
        assert_eq!(report.categories[1].severity, 6);
    }

    #[test]
    fn test_missing_severity_defaults_to_zero() {
        let raw: RawSafetyResponse =
            serde_json::from_value(json!({"categoriesAnalysis": [{"category": "Hate"}]})).unwrap();
        assert!(raw.into_report().is_safe);
    }

    #[test]
    fn test_endpoint() {
        let client = ServiceClient::new("safety", "https://cs.example.com/", "key", 5).unwrap();
        let safety = ContentSafetyClient::new(client, DEFAULT_API_VERSION);
        assert_eq!(
            safety.endpoint("image"),
            "https://cs.example.com/contentsafety/image:analyze?api-version=2023-10-01"
        );
    }
}
