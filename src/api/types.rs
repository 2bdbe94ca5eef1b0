//! Shared state for the triage API router.

use std::sync::Arc;

use crate::config::UploadLimits;
use crate::intake::IntakeService;
use crate::triage::TriageOrchestrator;

/// Maximum files accepted in one upload request.
pub const MAX_FILES_PER_UPLOAD: usize = 10;

#[derive(Clone)]
pub struct ApiContext {
    pub intake: Arc<IntakeService>,
    pub limits: Arc<UploadLimits>,
}

impl ApiContext {
    pub fn new(intake: Arc<IntakeService>, limits: UploadLimits) -> Self {
        Self {
            intake,
            limits: Arc::new(limits),
        }
    }

    pub fn orchestrator(&self) -> &Arc<TriageOrchestrator> {
        self.intake.orchestrator()
    }

    /// Body limit covering a full batch of maximum-size files.
    pub fn body_limit(&self) -> usize {
        let per_file = usize::try_from(self.limits.max_file_size_bytes()).unwrap_or(usize::MAX);
        per_file
            .saturating_mul(MAX_FILES_PER_UPLOAD)
            .saturating_add(64 * 1024)
    }
}
