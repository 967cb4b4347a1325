//! Document understanding client.
//!
//! Submits a document URL to the `prebuilt-document` model, polls the
//! analysis operation and converts the raw `analyzeResult` into a
//! [`DocumentResult`]. Every optional element of the raw payload maps to an
//! `Option`, so a response missing style, confidence or layout data still
//! parses.

use super::http::{PollSettings, ServiceClient};
use super::null_default;
use super::DocumentAnalyzer;
use crate::error::AnalysisError;
use crate::models::{
    DocumentEntity, DocumentResult, FieldValue, KeyValuePair, PageAppearance, PageInfo,
    ParagraphInfo, TableCell, TableInfo,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

pub const DEFAULT_API_VERSION: &str = "2023-07-31";
pub const DEFAULT_MODEL: &str = "prebuilt-document";

pub struct FormRecognizerClient {
    client: ServiceClient,
    api_version: String,
    model: String,
    poll: PollSettings,
}

impl FormRecognizerClient {
    pub fn new(client: ServiceClient, api_version: &str, model: &str, poll: PollSettings) -> Self {
        Self {
            client,
            api_version: api_version.to_string(),
            model: model.to_string(),
            poll,
        }
    }

    fn analyze_url(&self) -> String {
        self.client.url(&format!(
            "formrecognizer/documentModels/{}:analyze?api-version={}",
            self.model, self.api_version
        ))
    }
}

#[async_trait]
impl DocumentAnalyzer for FormRecognizerClient {
    async fn analyze_document(&self, url: &str) -> Result<DocumentResult, AnalysisError> {
        info!("Starting document analysis with model {}", self.model);

        let request = self
            .client
            .post(&self.analyze_url())
            .json(&json!({ "urlSource": url }));
        let operation = self.client.start_operation(request).await?;

        debug!("Waiting for document analysis to complete");
        let body = self.client.poll_operation(&operation, self.poll).await?;

        let result = parse_analyze_result(&body)?;
        info!(
            "Document analysis complete: {} pages, {} tables, {} key-value pairs",
            result.pages.len(),
            result.tables.len(),
            result.key_value_pairs.len()
        );
        Ok(result)
    }
}

/// Convert a finished operation document into a [`DocumentResult`].
pub fn parse_analyze_result(body: &Value) -> Result<DocumentResult, AnalysisError> {
    let raw = body
        .get("analyzeResult")
        .ok_or_else(|| AnalysisError::invalid_response("document", "missing analyzeResult"))?;

    let raw: RawAnalyzeResult = serde_json::from_value(raw.clone())
        .map_err(|e| AnalysisError::invalid_response("document", e.to_string()))?;

    Ok(raw.into())
}

// Raw service payload. Everything defaults so missing or null elements
// degrade to empty/absent values instead of failing the parse.

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawAnalyzeResult {
    #[serde(deserialize_with = "null_default")]
    pages: Vec<RawPage>,
    #[serde(deserialize_with = "null_default")]
    tables: Vec<RawTable>,
    #[serde(deserialize_with = "null_default")]
    paragraphs: Vec<RawParagraph>,
    #[serde(deserialize_with = "null_default")]
    key_value_pairs: Vec<RawKeyValuePair>,
    entities: Option<Vec<RawEntity>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawPage {
    #[serde(deserialize_with = "null_default")]
    page_number: u32,
    #[serde(deserialize_with = "null_default")]
    lines: Vec<RawContent>,
    #[serde(deserialize_with = "null_default")]
    words: Vec<RawContent>,
    appearance: Option<RawAppearance>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawContent {
    #[serde(deserialize_with = "null_default")]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAppearance {
    style: Option<RawStyle>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStyle {
    name: Option<String>,
    confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawTable {
    #[serde(deserialize_with = "null_default")]
    row_count: u32,
    #[serde(deserialize_with = "null_default")]
    column_count: u32,
    #[serde(deserialize_with = "null_default")]
    cells: Vec<RawCell>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawCell {
    #[serde(deserialize_with = "null_default")]
    content: String,
    #[serde(deserialize_with = "null_default")]
    row_index: u32,
    #[serde(deserialize_with = "null_default")]
    column_index: u32,
    row_span: Option<u32>,
    column_span: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawParagraph {
    #[serde(deserialize_with = "null_default")]
    content: String,
    role: Option<String>,
    #[serde(deserialize_with = "null_default")]
    bounding_regions: Vec<RawRegion>,
    style: Option<RawStyle>,
    confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRegion {
    #[serde(deserialize_with = "null_default")]
    polygon: Vec<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawField {
    #[serde(deserialize_with = "null_default")]
    content: String,
    #[serde(deserialize_with = "null_default")]
    bounding_regions: Vec<RawRegion>,
    confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawKeyValuePair {
    key: Option<RawField>,
    value: Option<RawField>,
    confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawEntity {
    #[serde(deserialize_with = "null_default")]
    category: String,
    sub_category: Option<String>,
    #[serde(deserialize_with = "null_default")]
    content: String,
    confidence: Option<f64>,
    #[serde(deserialize_with = "null_default")]
    bounding_regions: Vec<RawRegion>,
}

fn first_polygon(regions: &[RawRegion]) -> Option<Vec<f64>> {
    regions
        .first()
        .map(|r| r.polygon.clone())
        .filter(|p| !p.is_empty())
}

impl From<RawField> for FieldValue {
    fn from(raw: RawField) -> Self {
        Self {
            bounding_box: first_polygon(&raw.bounding_regions),
            content: raw.content,
            confidence: raw.confidence,
        }
    }
}

impl From<RawAnalyzeResult> for DocumentResult {
    fn from(raw: RawAnalyzeResult) -> Self {
        let pages = raw
            .pages
            .into_iter()
            .map(|page| {
                let style = page.appearance.and_then(|a| a.style);
                PageInfo {
                    page_number: page.page_number,
                    lines: page.lines.into_iter().map(|l| l.content).collect(),
                    words: page.words.into_iter().map(|w| w.content).collect(),
                    appearance: PageAppearance {
                        style: style.as_ref().and_then(|s| s.name.clone()),
                        style_confidence: style.and_then(|s| s.confidence),
                    },
                }
            })
            .collect();

        let tables = raw
            .tables
            .into_iter()
            .map(|table| TableInfo {
                row_count: table.row_count,
                column_count: table.column_count,
                cells: table
                    .cells
                    .into_iter()
                    .map(|cell| TableCell {
                        content: cell.content,
                        row_index: cell.row_index,
                        column_index: cell.column_index,
                        row_span: cell.row_span.unwrap_or(1),
                        column_span: cell.column_span.unwrap_or(1),
                    })
                    .collect(),
            })
            .collect();

        let paragraphs = raw
            .paragraphs
            .into_iter()
            .map(|p| ParagraphInfo {
                bounding_box: first_polygon(&p.bounding_regions),
                content: p.content,
                role: p.role,
                style: p.style.and_then(|s| s.name),
                confidence: p.confidence,
            })
            .collect();

        // A pair without a key carries nothing useful
        let key_value_pairs = raw
            .key_value_pairs
            .into_iter()
            .filter_map(|kv| {
                let key = kv.key?;
                Some(KeyValuePair {
                    key: key.into(),
                    value: kv.value.map(Into::into),
                    confidence: kv.confidence,
                })
            })
            .collect();

        let entities = raw
            .entities
            .unwrap_or_default()
            .into_iter()
            .map(|e| DocumentEntity {
                bounding_box: first_polygon(&e.bounding_regions),
                category: e.category,
                sub_category: e.sub_category,
                content: e.content,
                confidence: e.confidence,
            })
            .collect();

        DocumentResult {
            pages,
            tables,
            paragraphs,
            key_value_pairs,
            entities,
            translated_document_url: None,
        }
    }
}
