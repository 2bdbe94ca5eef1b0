//! Document Pipeline: download -> normalize -> extract -> aggregate, for
//! one artifact. Every failure below this boundary becomes the document's
//! `FieldResult` status; nothing propagates to sibling documents.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, info_span, warn, Instrument};

use super::aggregation::FieldAggregator;
use super::extraction::CandidateExtractor;
use super::normalize::{ArtifactError, ArtifactNormalizer};
use crate::models::{ArtifactKind, ArtifactRef, DocumentStatus, FieldResult};
use crate::storage::BlobStore;

#[derive(Clone)]
pub struct DocumentPipeline {
    blob_store: Arc<dyn BlobStore>,
    normalizer: Arc<ArtifactNormalizer>,
    extractor: CandidateExtractor,
    aggregator: Arc<FieldAggregator>,
}

impl DocumentPipeline {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        normalizer: Arc<ArtifactNormalizer>,
        extractor: CandidateExtractor,
        aggregator: Arc<FieldAggregator>,
    ) -> Self {
        Self {
            blob_store,
            normalizer,
            extractor,
            aggregator,
        }
    }

    /// Always yields a result; failures are recorded in its status.
    /// A cancelled run yields status `cancelled` and must not be committed.
    pub async fn run(&self, artifact: &ArtifactRef, cancel: &AtomicBool) -> FieldResult {
        let key = artifact.storage_key.clone();
        let started = Instant::now();
        let span = info_span!("document", document = %key);

        async {
            match self.process(artifact, cancel).await {
                Ok(result) => {
                    info!(
                        pages = result.page_count,
                        resolved = result.resolved_count(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Document processed"
                    );
                    result
                }
                Err(e) => {
                    warn!(status = e.status().as_str(), error = %e, "Document failed");
                    FieldResult::failed(&key, e.status(), e.to_string())
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn process(
        &self,
        artifact: &ArtifactRef,
        cancel: &AtomicBool,
    ) -> Result<FieldResult, ArtifactError> {
        let key = artifact.storage_key.as_str();
        let kind = artifact.kind();
        if kind == ArtifactKind::Other {
            return Err(ArtifactError::UnsupportedKind { key: key.to_string() });
        }

        let bytes = self.download(key).await?;
        check_cancelled(cancel)?;

        let pages = self.normalize(bytes, kind, key).await?;
        let page_count = pages.len();

        let mut candidates = Vec::with_capacity(page_count * self.aggregator.questions().len());
        for page in pages {
            check_cancelled(cancel)?;
            let page = Arc::new(page);
            for question in self.aggregator.questions() {
                candidates.push(
                    self.extractor
                        .extract_candidate(Arc::clone(&page), &question.text)
                        .await,
                );
            }
        }
        check_cancelled(cancel)?;

        let aggregated = self.aggregator.aggregate(&candidates);
        Ok(FieldResult {
            storage_key: key.to_string(),
            status: DocumentStatus::Completed,
            error: None,
            page_count,
            fields: aggregated.fields,
            evidence: aggregated.evidence,
        })
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, ArtifactError> {
        let store = Arc::clone(&self.blob_store);
        let owned_key = key.to_string();
        tokio::task::spawn_blocking(move || store.download(&owned_key))
            .await
            .map_err(|e| ArtifactError::Download {
                key: key.to_string(),
                reason: e.to_string(),
            })?
            .map_err(|e| ArtifactError::Download {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn normalize(
        &self,
        bytes: Vec<u8>,
        kind: ArtifactKind,
        key: &str,
    ) -> Result<Vec<super::normalize::PageImage>, ArtifactError> {
        let normalizer = Arc::clone(&self.normalizer);
        let owned_key = key.to_string();
        tokio::task::spawn_blocking(move || normalizer.normalize(&bytes, kind, &owned_key))
            .await
            .map_err(|e| match kind {
                ArtifactKind::Image => ArtifactError::ImageDecode(e.to_string()),
                _ => ArtifactError::PdfConversion(e.to_string()),
            })?
    }
}

fn check_cancelled(cancel: &AtomicBool) -> Result<(), ArtifactError> {
    if cancel.load(Ordering::SeqCst) {
        Err(ArtifactError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::EngineConfig;
    use crate::models::NOT_FOUND;
    use crate::pipeline::extraction::MockExtractionModel;
    use crate::pipeline::normalize::tests::sample_png;
    use crate::pipeline::normalize::MockRasterizer;
    use crate::storage::MemoryBlobStore;

    const NAME: &str = "What is the patient's full name?";
    const PHONE: &str = "What is the patient's phone number?";

    fn pipeline(store: MemoryBlobStore, pdf_pages: usize, model: MockExtractionModel) -> DocumentPipeline {
        let config = EngineConfig::default();
        DocumentPipeline::new(
            Arc::new(store),
            Arc::new(ArtifactNormalizer::new(
                Arc::new(MockRasterizer::new(pdf_pages)),
                config.pdf_scale_factor,
                config.max_page_dimension_px,
            )),
            CandidateExtractor::new(Arc::new(model), Duration::from_secs(5)),
            Arc::new(FieldAggregator::new(&config).unwrap()),
        )
    }

    #[tokio::test]
    async fn multi_page_pdf_picks_best_per_question() {
        let store = MemoryBlobStore::new().with_blob("t1/intake.pdf", b"%PDF");
        let model = MockExtractionModel::new()
            .with_default("", 0.0)
            .with_answer(1, NAME, "PATIENT DETAILS First Name: Dylan Last Name: Wettlaufer", 9.0)
            .with_answer(2, NAME, "Dylan W.", 3.0)
            .with_answer(1, PHONE, "1", 11.0)
            .with_answer(2, PHONE, "519-555-0100", 4.0);

        let result = pipeline(store, 2, model)
            .run(&ArtifactRef::new("t1/intake.pdf", None), &AtomicBool::new(false))
            .await;

        assert_eq!(result.status, DocumentStatus::Completed);
        assert_eq!(result.page_count, 2);
        assert_eq!(result.answer(NAME), Some("Dylan Wettlaufer"));
        assert_eq!(result.answer(PHONE), Some("519-555-0100"));
        assert_eq!(result.evidence[PHONE].page_index, 2);
        assert_eq!(result.answer("List all known allergies."), Some(NOT_FOUND));
    }

    #[tokio::test]
    async fn image_is_single_page() {
        let store = MemoryBlobStore::new().with_blob("t1/scan.png", &sample_png());
        let model = MockExtractionModel::new().with_default("Penicillin", 5.0);

        let result = pipeline(store, 0, model)
            .run(&ArtifactRef::new("t1/scan.png", None), &AtomicBool::new(false))
            .await;

        assert_eq!(result.status, DocumentStatus::Completed);
        assert_eq!(result.page_count, 1);
        assert_eq!(result.answer("List all known allergies."), Some("Penicillin"));
    }

    #[tokio::test]
    async fn missing_blob_is_failed_download() {
        let model = MockExtractionModel::new().with_default("x", 5.0);
        let result = pipeline(MemoryBlobStore::new(), 1, model)
            .run(&ArtifactRef::new("t1/gone.pdf", None), &AtomicBool::new(false))
            .await;

        assert_eq!(result.status, DocumentStatus::FailedDownload);
        assert!(result.error.as_deref().unwrap_or_default().contains("t1/gone.pdf"));
        assert!(result.fields.is_empty());
    }

    #[tokio::test]
    async fn unsupported_kind_skips_download() {
        let model = MockExtractionModel::new();
        let result = pipeline(MemoryBlobStore::new(), 1, model)
            .run(&ArtifactRef::new("t1/notes.docx", None), &AtomicBool::new(false))
            .await;
        assert_eq!(result.status, DocumentStatus::UnsupportedKind);
    }

    #[tokio::test]
    async fn empty_pdf_is_no_pages() {
        let store = MemoryBlobStore::new().with_blob("t1/empty.pdf", b"%PDF");
        let result = pipeline(store, 0, MockExtractionModel::new())
            .run(&ArtifactRef::new("t1/empty.pdf", None), &AtomicBool::new(false))
            .await;
        assert_eq!(result.status, DocumentStatus::NoPages);
    }

    #[tokio::test]
    async fn model_failures_degrade_to_not_found() {
        let store = MemoryBlobStore::new().with_blob("t1/a.pdf", b"%PDF");
        let model = MockExtractionModel::new().with_answer(1, NAME, "Ada Lovelace", 8.0);

        let result = pipeline(store, 1, model)
            .run(&ArtifactRef::new("t1/a.pdf", None), &AtomicBool::new(false))
            .await;

        assert_eq!(result.status, DocumentStatus::Completed);
        assert_eq!(result.answer(NAME), Some("Ada Lovelace"));
        assert_eq!(result.resolved_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_extraction_makes_no_model_calls() {
        let store = MemoryBlobStore::new().with_blob("t1/a.pdf", b"%PDF");
        let model = Arc::new(MockExtractionModel::new().with_default("x", 5.0));
        let config = EngineConfig::default();
        let pipeline = DocumentPipeline::new(
            Arc::new(store),
            Arc::new(ArtifactNormalizer::new(Arc::new(MockRasterizer::new(3)), 2.0, 4096)),
            CandidateExtractor::new(model.clone(), Duration::from_secs(5)),
            Arc::new(FieldAggregator::new(&config).unwrap()),
        );

        let result = pipeline
            .run(&ArtifactRef::new("t1/a.pdf", None), &AtomicBool::new(true))
            .await;

        assert_eq!(result.status, DocumentStatus::Cancelled);
        assert_eq!(model.call_count(), 0);
    }
}
