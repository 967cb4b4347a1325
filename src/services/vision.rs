//! Image understanding client.
//!
//! Requests caption, tags, objects, people and OCR in one call and runs the
//! image moderation check alongside it. Both must succeed: an image is never
//! returned without its safety result.

use super::http::ServiceClient;
use super::{ImageAnalyzer, ImageDescriber, SafetyChecker};
use crate::error::AnalysisError;
use crate::models::{BoundingBox, Caption, DetectedObject, DetectedPerson, ImageResult, ImageTag};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_API_VERSION: &str = "2023-10-01";
pub const FEATURES: &str = "caption,tags,objects,people,read";

/// Image analysis REST client.
pub struct VisionClient {
    client: ServiceClient,
    api_version: String,
}

impl VisionClient {
    pub fn new(client: ServiceClient, api_version: &str) -> Self {
        Self {
            client,
            api_version: api_version.to_string(),
        }
    }

    fn analyze_url(&self) -> String {
        self.client.url(&format!(
            "computervision/imageanalysis:analyze?api-version={}&features={}",
            self.api_version, FEATURES
        ))
    }
}

#[async_trait]
impl ImageDescriber for VisionClient {
    async fn describe_image(&self, url: &str) -> Result<ImageResult, AnalysisError> {
        let request = self.client.post(&self.analyze_url()).json(&json!({ "url": url }));
        let raw: RawImageAnalysis = self.client.send_json(request).await?;
        Ok(raw.into())
    }
}

/// Description and moderation of one image, run concurrently.
pub struct VisionImageAnalyzer {
    describer: Arc<dyn ImageDescriber>,
    safety: Arc<dyn SafetyChecker>,
}

impl VisionImageAnalyzer {
    pub fn new(describer: Arc<dyn ImageDescriber>, safety: Arc<dyn SafetyChecker>) -> Self {
        Self { describer, safety }
    }
}

#[async_trait]
impl ImageAnalyzer for VisionImageAnalyzer {
    async fn analyze_image(&self, url: &str) -> Result<ImageResult, AnalysisError> {
        info!("Starting image analysis");

        let (description, safety) = tokio::try_join!(
            self.describer.describe_image(url),
            self.safety.check_image(url)
        )?;

        let result = ImageResult {
            safety,
            ..description
        };
        info!(
            "Image analysis complete: {} tags, {} objects, safe={}",
            result.tags.len(),
            result.objects.len(),
            result.safety.is_safe
        );
        Ok(result)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawImageAnalysis {
    caption_result: Option<RawCaption>,
    tags_result: Option<RawValues<RawTag>>,
    objects_result: Option<RawValues<RawObject>>,
    people_result: Option<RawValues<RawPerson>>,
    read_result: Option<RawRead>,
}

#[derive(Debug, Deserialize)]
struct RawValues<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCaption {
    text: String,
    confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTag {
    name: String,
    confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawObject {
    bounding_box: Option<BoundingBox>,
    tags: Vec<RawTag>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawPerson {
    bounding_box: Option<BoundingBox>,
    confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRead {
    blocks: Vec<RawBlock>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBlock {
    lines: Vec<RawLine>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawLine {
    text: String,
}

fn values<T>(raw: Option<RawValues<T>>) -> Vec<T> {
    raw.map(|r| r.values).unwrap_or_default()
}

impl From<RawImageAnalysis> for ImageResult {
    fn from(raw: RawImageAnalysis) -> Self {
        let caption = raw.caption_result.filter(|c| !c.text.is_empty()).map(|c| Caption {
            text: c.text,
            confidence: c.confidence,
        });

        let tags = values(raw.tags_result)
            .into_iter()
            .map(|t| ImageTag {
                name: t.name,
                confidence: t.confidence,
            })
            .collect();

        // An object's label is its highest-ranked tag
        let objects = values(raw.objects_result)
            .into_iter()
            .map(|o| {
                let top = o.tags.into_iter().next();
                DetectedObject {
                    name: top.as_ref().map(|t| t.name.clone()),
                    confidence: top.and_then(|t| t.confidence),
                    bounding_box: o.bounding_box,
                }
            })
            .collect();

        let people = values(raw.people_result)
            .into_iter()
            .map(|p| DetectedPerson {
                confidence: p.confidence,
                bounding_box: p.bounding_box,
            })
            .collect();

        let lines: Vec<String> = raw
            .read_result
            .map(|r| r.blocks)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|b| b.lines)
            .map(|l| l.text)
            .collect();
        let text = if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        };

        ImageResult {
            objects,
            tags,
            caption,
            people,
            text,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock::{MockBehavior, MockImageAnalyzer, MockSafetyChecker};

    #[test]
    fn test_parse_image_analysis() {
        let raw: RawImageAnalysis = serde_json::from_value(json!({
            "modelVersion": "2023-10-01",
            "captionResult": {"text": "a dog sitting on a couch", "confidence": 0.82},
            "tagsResult": {"values": [{"name": "dog", "confidence": 0.99}, {"name": "indoor", "confidence": 0.9}]},
            "objectsResult": {"values": [
                {"boundingBox": {"x": 10, "y": 20, "w": 100, "h": 80}, "tags": [{"name": "dog", "confidence": 0.87}]},
                {"boundingBox": {"x": 0, "y": 0, "w": 5, "h": 5}, "tags": []}
            ]},
            "peopleResult": {"values": [{"boundingBox": {"x": 1, "y": 2, "w": 3, "h": 4}, "confidence": 0.1}]},
            "readResult": {"blocks": [{"lines": [{"text": "GOOD"}, {"text": "BOY"}]}]},
            "metadata": {"width": 640, "height": 480}
        }))
        .unwrap();

        let result: ImageResult = raw.into();
        assert_eq!(result.caption.as_ref().unwrap().text, "a dog sitting on a couch");
        assert_eq!(result.tags.len(), 2);
        assert_eq!(result.objects[0].name.as_deref(), Some("dog"));
        assert_eq!(result.objects[0].bounding_box.unwrap().w, 100);
        assert!(result.objects[1].name.is_none());
        assert_eq!(result.people.len(), 1);
        assert_eq!(result.text.as_deref(), Some("GOOD\nBOY"));
    }

    #[test]
    fn test_parse_sparse_analysis() {
        let raw: RawImageAnalysis = serde_json::from_value(json!({
            "tagsResult": {}
        }))
        .unwrap();
        let result: ImageResult = raw.into();
        assert!(result.caption.is_none());
        assert!(result.tags.is_empty());
        assert!(result.text.is_none());
    }

    fn analyzer(image: MockBehavior, safety: MockSafetyChecker) -> VisionImageAnalyzer {
        VisionImageAnalyzer::new(Arc::new(MockImageAnalyzer::new(image)), Arc::new(safety))
    }

    #[tokio::test]
    async fn test_safety_result_replaces_description_safety() {
        let mut safety = MockSafetyChecker::safe();
        safety.severities = vec![("Hate", 0), ("Violence", 5)];

        let result = analyzer(MockBehavior::ok(), safety)
            .analyze_image("https://example.com/a.png")
            .await
            .unwrap();
        assert_eq!(result.caption.unwrap().text, "a cat on a mat");
        assert!(!result.safety.is_safe);
        assert_eq!(result.safety.categories.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_safety_fails_image() {
        let description = MockBehavior::ok();
        let safety = MockSafetyChecker {
            behavior: MockBehavior::failing(),
            severities: vec![],
        };

        let err = analyzer(description.clone(), safety)
            .analyze_image("https://example.com/a.png")
            .await
            .unwrap_err();
        // The description itself succeeded
        assert_eq!(description.call_count(), 1);
        assert!(err.to_string().contains("safety"));
    }

    #[tokio::test]
    async fn test_failed_description_fails_image() {
        let result = analyzer(MockBehavior::failing(), MockSafetyChecker::safe())
            .analyze_image("https://example.com/a.png")
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_analyze_url() {
        let client = ServiceClient::new("vision", "https://vision.example.com/", "k", 5).unwrap();
        let vision = VisionClient::new(client, DEFAULT_API_VERSION);
        assert_eq!(
            vision.analyze_url(),
            "https://vision.example.com/computervision/imageanalysis:analyze?api-version=2023-10-01&features=caption,tags,objects,people,read"
        );
    }
}
