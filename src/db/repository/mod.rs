mod artifact;
mod document_result;
mod triage;

pub use artifact::*;
pub use document_result::*;
pub use triage::*;

/// Current UTC time as stored in every timestamp column.
pub(crate) fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}
