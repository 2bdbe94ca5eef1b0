pub mod types;
pub mod extractor;
pub mod http_model;

pub use types::*;
pub use extractor::*;
pub use http_model::*;

use thiserror::Error;

/// Failure of one extraction-model invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Model service unreachable at {0}")]
    Connection(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Model service returned {status}: {body}")]
    Service { status: u16, body: String },

    #[error("Unparseable model response: {0}")]
    ResponseParsing(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}
