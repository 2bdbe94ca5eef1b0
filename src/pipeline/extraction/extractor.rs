use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::types::{Candidate, ExtractionFailure, FieldExtractionModel};
use crate::pipeline::normalize::PageImage;

/// Candidate Extractor: one page image + one question -> one candidate.
///
/// The model is blocking and runs on the blocking pool; each call is bounded
/// by `timeout`. A timed-out call is abandoned, not awaited.
#[derive(Clone)]
pub struct CandidateExtractor {
    model: Arc<dyn FieldExtractionModel>,
    timeout: Duration,
}

impl CandidateExtractor {
    pub fn new(model: Arc<dyn FieldExtractionModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub async fn extract(
        &self,
        page: Arc<PageImage>,
        question: &str,
    ) -> Result<Candidate, ExtractionFailure> {
        let page_index = page.page_index;
        let model = Arc::clone(&self.model);
        let owned_question = question.to_string();
        let started = Instant::now();

        let task = tokio::task::spawn_blocking(move || model.answer(&page, &owned_question));

        let cause = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(answer))) => {
                debug!(
                    page = page_index,
                    question,
                    score = answer.score,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Model answered"
                );
                return Ok(Candidate::new(question, &answer.text, answer.score, page_index));
            }
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(join)) => format!("Model task aborted: {join}"),
            Err(_) => format!("Model call timed out after {}ms", self.timeout.as_millis()),
        };

        warn!(page = page_index, question, cause = %cause, "Extraction failed");
        Err(ExtractionFailure {
            question: question.to_string(),
            page_index,
            cause,
        })
    }

    /// Like [`extract`](Self::extract), but a failure is folded into a
    /// zero-confidence "not found" candidate.
    pub async fn extract_candidate(&self, page: Arc<PageImage>, question: &str) -> Candidate {
        match self.extract(page, question).await {
            Ok(candidate) => candidate,
            Err(failure) => Candidate::from_failure(&failure),
        }
    }
}
