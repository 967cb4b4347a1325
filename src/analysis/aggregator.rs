//! Multi-modal aggregation.
//!
//! One analysis per requested modality is dispatched concurrently. Each
//! call is bounded by a timeout, and a failure or timeout only removes its
//! own modality from the merged result.

use crate::error::{AggregateError, AnalysisError, ErrorKind};
use crate::models::{
    sanitize_reference, AggregateResult, AnalysisRequest, Modality, ModalityFailure,
    ModalityResult,
};
use crate::services::{AudioAnalyzer, DocumentAnalyzer, ImageAnalyzer};
use crate::translation::TranslationFlow;
use futures::future::{join_all, BoxFuture};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default bound on a single analyzer call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Fans a request out to the per-modality analyzers and merges the results.
pub struct Aggregator {
    document: Arc<dyn DocumentAnalyzer>,
    image: Arc<dyn ImageAnalyzer>,
    audio: Arc<dyn AudioAnalyzer>,
    translation: Option<Arc<TranslationFlow>>,
    timeout: Duration,
    redact_unsafe: bool,
}

/// One dispatched analysis, labelled with its modality.
struct PendingOperation<'a> {
    modality: Modality,
    reference: String,
    future: BoxFuture<'a, Result<ModalityResult, AnalysisError>>,
}

impl Aggregator {
    pub fn new(
        document: Arc<dyn DocumentAnalyzer>,
        image: Arc<dyn ImageAnalyzer>,
        audio: Arc<dyn AudioAnalyzer>,
    ) -> Self {
        Self {
            document,
            image,
            audio,
            translation: None,
            timeout: DEFAULT_TIMEOUT,
            redact_unsafe: true,
        }
    }

    /// Enable document translation for requests carrying a target language.
    pub fn with_translation(mut self, flow: Arc<TranslationFlow>) -> Self {
        self.translation = Some(flow);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether unsafe image and audio content is stripped from results.
    pub fn with_redaction(mut self, enabled: bool) -> Self {
        self.redact_unsafe = enabled;
        self
    }

    /// Analyze every modality present in the request.
    ///
    /// Never fails: modalities whose analysis failed are absent from the
    /// result and listed in its `failures`.
    pub async fn aggregate(&self, request: &AnalysisRequest) -> AggregateResult {
        let pending = self.pending_operations(request);
        let mut result = AggregateResult::default();

        if pending.is_empty() {
            debug!("Request contains no modality references");
            return result;
        }

        info!(
            "Dispatching {} analyses: {}",
            pending.len(),
            pending
                .iter()
                .map(|op| op.modality.key())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let outcomes = join_all(pending.into_iter().map(|op| async move {
            let outcome = op.future.await;
            (op.modality, op.reference, outcome)
        }))
        .await;

        for (modality, reference, outcome) in outcomes {
            match outcome {
                Ok(mut analysis) => {
                    self.apply_safety_policy(&mut analysis, &reference);
                    debug!(modality = %modality, reference = %reference, "Analysis succeeded");
                    result.insert(analysis);
                }
                Err(e) => {
                    warn!(
                        modality = %modality,
                        reference = %reference,
                        kind = %e.kind(),
                        transient = e.is_transient(),
                        error = %e,
                        "Analysis failed"
                    );
                    result.record_failure(ModalityFailure {
                        modality,
                        reference,
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Aggregation complete: {} succeeded, {} failed",
            result.len(),
            result.failures.len()
        );
        result
    }

    /// Like [`aggregate`](Self::aggregate), but fails when modalities were
    /// requested and every one of them failed.
    pub async fn aggregate_checked(
        &self,
        request: &AnalysisRequest,
    ) -> Result<AggregateResult, AggregateError> {
        self.aggregate(request).await.into_checked()
    }

    fn pending_operations<'a>(&'a self, request: &'a AnalysisRequest) -> Vec<PendingOperation<'a>> {
        let mut pending = Vec::new();

        if let Some(url) = request.document() {
            pending.push(PendingOperation {
                modality: Modality::Document,
                reference: sanitize_reference(url),
                future: Box::pin(self.analyze_document(url, request.target_language())),
            });
        }

        if let Some(url) = request.image() {
            pending.push(PendingOperation {
                modality: Modality::Image,
                reference: sanitize_reference(url),
                future: Box::pin(self.analyze_image(url)),
            });
        }

        if let Some(path) = request.audio() {
            pending.push(PendingOperation {
                modality: Modality::Audio,
                reference: path.display().to_string(),
                future: Box::pin(self.analyze_audio(path)),
            });
        }

        pending
    }

    async fn analyze_document(
        &self,
        url: &str,
        target_language: Option<&str>,
    ) -> Result<ModalityResult, AnalysisError> {
        let analysis = bounded(
            Modality::Document.key(),
            self.timeout,
            self.document.analyze_document(url),
        );

        let (analysis, translated) = match (&self.translation, target_language) {
            (Some(flow), Some(language)) => {
                let translation = bounded("translation", self.timeout, flow.translate(url, language));
                let (analysis, translated) = tokio::join!(analysis, translation);
                (analysis, Some(translated))
            }
            (None, Some(language)) => {
                warn!("Translation to {} requested but translation is not configured", language);
                (analysis.await, None)
            }
            _ => (analysis.await, None),
        };

        let mut document = analysis?;
        match translated {
            Some(Ok(translated_url)) => document.translated_document_url = Some(translated_url),
            Some(Err(e)) => warn!(
                reference = %sanitize_reference(url),
                kind = %e.kind(),
                error = %e,
                "Translation failed"
            ),
            None => {}
        }

        Ok(ModalityResult::Document(document))
    }

    async fn analyze_image(&self, url: &str) -> Result<ModalityResult, AnalysisError> {
        let image = bounded(Modality::Image.key(), self.timeout, self.image.analyze_image(url)).await?;
        Ok(ModalityResult::Image(image))
    }

    async fn analyze_audio(&self, path: &Path) -> Result<ModalityResult, AnalysisError> {
        let audio = bounded(Modality::Audio.key(), self.timeout, self.audio.analyze_audio(path)).await?;
        Ok(ModalityResult::Audio(audio))
    }

    /// Redact (or just report) results whose moderation flagged them.
    fn apply_safety_policy(&self, analysis: &mut ModalityResult, reference: &str) {
        let modality = analysis.modality();
        let safety = match analysis {
            ModalityResult::Image(image) => &image.safety,
            ModalityResult::Audio(audio) => &audio.safety,
            ModalityResult::Document(_) => return,
        };
        if safety.is_safe {
            return;
        }

        let categories = safety.flagged_summary();
        if !self.redact_unsafe {
            warn!(
                modality = %modality,
                reference = %reference,
                kind = %ErrorKind::UnsafeContent,
                categories = %categories,
                "Unsafe content returned unredacted"
            );
            return;
        }

        match analysis {
            ModalityResult::Image(image) => image.redact(),
            ModalityResult::Audio(audio) => audio.redact(),
            ModalityResult::Document(_) => {}
        }
        warn!(
            modality = %modality,
            reference = %reference,
            kind = %ErrorKind::UnsafeContent,
            categories = %categories,
            "Unsafe content redacted"
        );
    }
}

/// Bound a call by `limit`, mapping expiry to a timeout error.
async fn bounded<T>(
    service: &str,
    limit: Duration,
    call: impl Future<Output = Result<T, AnalysisError>>,
) -> Result<T, AnalysisError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| {
            Err(AnalysisError::Timeout {
                service: service.to_string(),
                seconds: limit.as_secs(),
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategorySeverity, SafetyReport};
    use crate::services::mock::{
        MockAudioAnalyzer, MockBehavior, MockDocumentAnalyzer, MockImageAnalyzer, MockTranslator,
    };
    use crate::storage::mock::{CopyingTranslator, MemoryBlobStore};
    use crate::storage::BlobStore;

    struct Mocks {
        document: MockBehavior,
        image: MockBehavior,
        audio: MockBehavior,
    }

    impl Mocks {
        fn ok() -> Self {
            Self {
                document: MockBehavior::ok(),
                image: MockBehavior::ok(),
                audio: MockBehavior::ok(),
            }
        }

        fn aggregator(&self) -> Aggregator {
            Aggregator::new(
                Arc::new(MockDocumentAnalyzer(self.document.clone())),
                Arc::new(MockImageAnalyzer::new(self.image.clone())),
                Arc::new(MockAudioAnalyzer(self.audio.clone())),
            )
        }

        fn total_calls(&self) -> usize {
            self.document.call_count() + self.image.call_count() + self.audio.call_count()
        }
    }

    fn full_request() -> AnalysisRequest {
        AnalysisRequest::new()
            .with_document("https://example.com/invoice.pdf?sig=secret")
            .with_image("https://example.com/cat.png")
            .with_audio("talk.wav")
    }

    fn keys(result: &AggregateResult) -> Vec<String> {
        let json = serde_json::to_value(result).unwrap();
        json.as_object().unwrap().keys().cloned().collect()
    }

    #[tokio::test]
    async fn test_empty_request_calls_nothing() {
        let mocks = Mocks::ok();
        let result = mocks.aggregator().aggregate(&AnalysisRequest::new()).await;

        assert!(result.is_empty());
        assert!(result.failures.is_empty());
        assert_eq!(mocks.total_calls(), 0);

        // Blank references count as absent
        let blank = AnalysisRequest::new().with_document("").with_image("  ");
        assert!(mocks.aggregator().aggregate(&blank).await.is_empty());
        assert_eq!(mocks.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_single_modality_is_labelled_correctly() {
        let cases = [
            (AnalysisRequest::new().with_document("https://x/a.pdf"), "document_analysis"),
            (AnalysisRequest::new().with_image("https://x/b.png"), "image_analysis"),
            (AnalysisRequest::new().with_audio("c.wav"), "audio_analysis"),
        ];

        for (request, expected) in cases {
            let result = Mocks::ok().aggregator().aggregate(&request).await;
            assert_eq!(keys(&result), vec![expected.to_string()]);
        }
    }

    #[tokio::test]
    async fn test_document_failure_is_isolated() {
        let mocks = Mocks {
            document: MockBehavior::failing(),
            ..Mocks::ok()
        };
        let request = AnalysisRequest::new()
            .with_document("https://example.com/invoice.pdf?sig=secret")
            .with_image("https://example.com/cat.png");

        let result = mocks.aggregator().aggregate(&request).await;

        assert!(result.document_analysis.is_none());
        assert!(result.image_analysis.is_some());
        assert_eq!(result.failed(), vec![Modality::Document]);
        assert_eq!(result.failures[0].kind, ErrorKind::Service);
        // Access grants never reach failure reports
        assert_eq!(result.failures[0].reference, "https://example.com/invoice.pdf");
        assert_eq!(mocks.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_all_failed_is_checked_error() {
        let mocks = Mocks {
            document: MockBehavior::failing(),
            image: MockBehavior::failing(),
            audio: MockBehavior::failing(),
        };
        let err = mocks
            .aggregator()
            .aggregate_checked(&full_request())
            .await
            .unwrap_err();
        assert_eq!(
            err.failed_modalities(),
            vec![Modality::Document, Modality::Image, Modality::Audio]
        );

        let ok = Mocks::ok()
            .aggregator()
            .aggregate_checked(&AnalysisRequest::new())
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let mocks = Mocks {
            image: MockBehavior::ok().with_latency(Duration::from_secs(30)),
            ..Mocks::ok()
        };
        let aggregator = mocks.aggregator().with_timeout(Duration::from_secs(5));

        let result = aggregator.aggregate(&full_request()).await;

        assert_eq!(result.succeeded(), vec![Modality::Document, Modality::Audio]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].modality, Modality::Image);
        assert_eq!(result.failures[0].kind, ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_is_concurrent() {
        let mocks = Mocks {
            document: MockBehavior::ok().with_latency(Duration::from_millis(100)),
            image: MockBehavior::ok().with_latency(Duration::from_millis(200)),
            audio: MockBehavior::ok().with_latency(Duration::from_millis(300)),
        };
        let aggregator = mocks.aggregator();

        let started = tokio::time::Instant::now();
        let result = aggregator.aggregate(&full_request()).await;
        let elapsed = started.elapsed();

        assert_eq!(result.len(), 3);
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(600), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_unsafe_image_is_redacted() {
        let mut image = MockImageAnalyzer::new(MockBehavior::ok());
        image.safety = SafetyReport::from_categories(vec![
            CategorySeverity {
                category: "Violence".to_string(),
                severity: 6,
            },
            CategorySeverity {
                category: "Hate".to_string(),
                severity: 0,
            },
        ]);
        let image = Arc::new(image);
        let request = AnalysisRequest::new().with_image("https://example.com/x.png");

        let aggregator = Aggregator::new(
            Arc::new(MockDocumentAnalyzer(MockBehavior::ok())),
            image.clone(),
            Arc::new(MockAudioAnalyzer(MockBehavior::ok())),
        );
        let redacted = aggregator.aggregate(&request).await.image_analysis.unwrap();
        assert!(redacted.redacted);
        assert!(redacted.caption.is_none());
        assert!(redacted.text.is_none());
        assert!(!redacted.safety.is_safe);
        assert_eq!(redacted.safety.categories.len(), 2);

        let aggregator = aggregator.with_redaction(false);
        let raw = aggregator.aggregate(&request).await.image_analysis.unwrap();
        assert!(!raw.redacted);
        assert!(raw.caption.is_some());
    }

    async fn translation_store() -> Arc<MemoryBlobStore> {
        let store = MemoryBlobStore::new().with_container("inputs");
        store
            .upload("inputs", "invoice.pdf", b"PDF".to_vec(), "application/pdf")
            .await
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_document_with_translation() {
        let store = translation_store().await;
        let flow = TranslationFlow::new(
            store.clone(),
            Arc::new(CopyingTranslator {
                store: store.clone(),
            }),
            "staging",
        );
        let aggregator = Mocks::ok().aggregator().with_translation(Arc::new(flow));
        let request = AnalysisRequest::new()
            .with_document("memory://inputs/invoice.pdf?sig=x")
            .with_target_language("es");

        let result = aggregator.aggregate(&request).await;

        let document = result.document_analysis.unwrap();
        assert_eq!(document.pages.len(), 1);
        let translated = document.translated_document_url.unwrap();
        assert!(translated.starts_with("memory://staging/translated/"));
        assert!(translated.contains("/es-invoice.pdf"));
    }

    #[tokio::test]
    async fn test_translation_failure_keeps_document() {
        let store = translation_store().await;
        let flow = TranslationFlow::new(
            store.clone(),
            Arc::new(MockTranslator(MockBehavior::failing())),
            "staging",
        );
        let aggregator = Mocks::ok().aggregator().with_translation(Arc::new(flow));
        let request = AnalysisRequest::new()
            .with_document("memory://inputs/invoice.pdf")
            .with_target_language("es");

        let result = aggregator.aggregate(&request).await;

        let document = result.document_analysis.unwrap();
        assert!(document.translated_document_url.is_none());
        assert!(result.failures.is_empty());
        assert_eq!(store.deleted_containers.lock().unwrap().len(), 2);
    }
}
