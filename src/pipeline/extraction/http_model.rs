use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::types::{FieldExtractionModel, ModelAnswer};
use super::ModelError;
use crate::pipeline::normalize::PageImage;

/// HTTP client for a document question-answering inference endpoint.
pub struct HttpQaModel {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl HttpQaModel {
    /// Must be called outside an async context (blocking client).
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ModelError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::HttpClient(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

/// Request body: base64 PNG page + natural-language question.
#[derive(Serialize)]
struct QaRequest<'a> {
    image: String,
    question: &'a str,
}

#[derive(Deserialize)]
struct QaResponse {
    answer: String,
    score: f32,
}

impl FieldExtractionModel for HttpQaModel {
    fn answer(&self, page: &PageImage, question: &str) -> Result<ModelAnswer, ModelError> {
        let body = QaRequest {
            image: BASE64.encode(&page.png),
            question,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    ModelError::Connection(self.endpoint.clone())
                } else {
                    ModelError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ModelError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: QaResponse = response
            .json()
            .map_err(|e| ModelError::ResponseParsing(e.to_string()))?;

        Ok(ModelAnswer {
            text: parsed.answer,
            score: parsed.score,
        })
    }
}
