//! Batch document translation client.

use super::http::{PollSettings, ServiceClient};
use super::DocumentTranslator;
use crate::error::AnalysisError;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

pub struct BatchTranslatorClient {
    client: ServiceClient,
    poll: PollSettings,
}

impl BatchTranslatorClient {
    pub fn new(client: ServiceClient, poll: PollSettings) -> Self {
        Self { client, poll }
    }

    fn batches_url(&self) -> String {
        self.client.url("translator/text/batch/v1.1/batches")
    }
}

/// Request body translating every document in one container into another.
pub fn batch_request(source_container_url: &str, target_container_url: &str, language: &str) -> Value {
    json!({
        "inputs": [{
            "source": { "sourceUrl": source_container_url },
            "targets": [{
                "targetUrl": target_container_url,
                "language": language,
            }]
        }]
    })
}

#[async_trait]
impl DocumentTranslator for BatchTranslatorClient {
    async fn translate(
        &self,
        source_container_url: &str,
        target_container_url: &str,
        target_language: &str,
    ) -> Result<(), AnalysisError> {
        info!("Starting document translation to {}", target_language);

        let body = batch_request(source_container_url, target_container_url, target_language);
        let operation = self
            .client
            .start_operation(self.client.post(&self.batches_url()).json(&body))
            .await?;
        let status = self.client.poll_operation(&operation, self.poll).await?;

        let failed = status
            .pointer("/summary/failed")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        if failed > 0 {
            return Err(AnalysisError::invalid_response(
                "translator",
                format!("{} document(s) failed to translate", failed),
            ));
        }

        info!("Document translation to {} complete", target_language);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_request_shape() {
        let body = batch_request("https://src?sig=a", "https://dst?sig=b", "es");
        assert_eq!(body.pointer("/inputs/0/source/sourceUrl").unwrap(), "https://src?sig=a");
        assert_eq!(body.pointer("/inputs/0/targets/0/language").unwrap(), "es");
    }

    #[test]
    fn test_batches_url() {
        let client = ServiceClient::new("translator", "https://tr.example.com/", "key", 5).unwrap();
        let translator = BatchTranslatorClient::new(client, PollSettings::default());
        assert_eq!(
            translator.batches_url(),
            "https://tr.example.com/translator/text/batch/v1.1/batches"
        );
    }
}
