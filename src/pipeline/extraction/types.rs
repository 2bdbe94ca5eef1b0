use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;

use super::ModelError;
use crate::models::NOT_FOUND;
use crate::pipeline::normalize::PageImage;

/// One (question, page) extraction attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub question: String,
    pub answer: String,
    pub confidence: f32,
    /// 1-based page index.
    pub page_index: usize,
    /// Set when the model call failed; the candidate is then a
    /// zero-confidence "not found" placeholder.
    pub error: Option<String>,
}

impl Candidate {
    pub fn new(question: &str, answer: &str, confidence: f32, page_index: usize) -> Self {
        Self {
            question: question.to_string(),
            answer: answer.to_string(),
            confidence,
            page_index,
            error: None,
        }
    }

    pub fn from_failure(failure: &ExtractionFailure) -> Self {
        Self {
            question: failure.question.clone(),
            answer: NOT_FOUND.to_string(),
            confidence: 0.0,
            page_index: failure.page_index,
            error: Some(failure.cause.clone()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A model call that errored or timed out.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Extraction failed for '{question}' on page {page_index}: {cause}")]
pub struct ExtractionFailure {
    pub question: String,
    pub page_index: usize,
    pub cause: String,
}

/// Raw model output: answer span and native-scale score.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelAnswer {
    pub text: String,
    pub score: f32,
}

/// Document question-answering capability. Blocking.
pub trait FieldExtractionModel: Send + Sync {
    fn answer(&self, page: &PageImage, question: &str) -> Result<ModelAnswer, ModelError>;
}

// ── Mock for testing ──────────────────────────────────────

/// Scripted model: answers per (page, question), optional default,
/// optional per-call delay for timeout tests.
#[derive(Default)]
pub struct MockExtractionModel {
    answers: HashMap<(usize, String), Result<ModelAnswer, ModelError>>,
    default: Option<ModelAnswer>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockExtractionModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_answer(mut self, page_index: usize, question: &str, text: &str, score: f32) -> Self {
        self.answers.insert(
            (page_index, question.to_string()),
            Ok(ModelAnswer {
                text: text.to_string(),
                score,
            }),
        );
        self
    }

    pub fn with_failure(mut self, page_index: usize, question: &str, cause: &str) -> Self {
        self.answers.insert(
            (page_index, question.to_string()),
            Err(ModelError::Inference(cause.to_string())),
        );
        self
    }

    /// Answer for any (page, question) not explicitly scripted.
    pub fn with_default(mut self, text: &str, score: f32) -> Self {
        self.default = Some(ModelAnswer {
            text: text.to_string(),
            score,
        });
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FieldExtractionModel for MockExtractionModel {
    fn answer(&self, page: &PageImage, question: &str) -> Result<ModelAnswer, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        match self.answers.get(&(page.page_index, question.to_string())) {
            Some(scripted) => scripted.clone(),
            None => self
                .default
                .clone()
                .ok_or_else(|| ModelError::Inference("no scripted answer".into())),
        }
    }
}
