//! API endpoint handlers. Thin adapters over intake and the orchestrator.

pub mod home;
pub mod triage;
