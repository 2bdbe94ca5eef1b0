//! Triage HTTP API.
//!
//! A thin adapter over intake and the orchestrator: upload a batch,
//! poll a request's status, cancel it. Upload limits are enforced here,
//! not in the core.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use error::ApiError;
pub use router::triage_api_router;
pub use server::serve;
pub use types::ApiContext;
