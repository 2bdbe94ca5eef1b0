pub mod orchestrator;
pub mod store;

pub use orchestrator::*;
pub use store::{SqliteTriageStore, TriageStore};

use thiserror::Error;

use crate::db::DatabaseError;
use crate::models::TriageStatus;

/// Errors that stop the state machine itself. Per-document failures never
/// surface here.
#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("Record store error: {0}")]
    Store(#[from] DatabaseError),

    #[error("Triage request not found: {0}")]
    NotFound(String),

    #[error("Triage {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: TriageStatus,
        to: TriageStatus,
    },

    #[error("Orchestrator state lock poisoned")]
    LockPoisoned,
}
