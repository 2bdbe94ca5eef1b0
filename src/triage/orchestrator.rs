//! Triage Orchestrator: claims a request, runs its documents through the
//! Document Pipeline and drives the record to a terminal state.
//!
//! pending -> processing -> completed | failed. The claim is the
//! conditional `pending -> processing` transition in the record store; a
//! second claim on the same id is a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::store::TriageStore;
use super::OrchestrationError;
use crate::db::repository::TransitionOutcome;
use crate::models::{ArtifactRef, DocumentStatus, TriageRequest, TriageStatus};
use crate::pipeline::document::DocumentPipeline;

/// Cause recorded when a request has no artifacts.
pub const CAUSE_NO_DOCUMENTS: &str = "no documents";
/// Cause recorded when every artifact failed before extraction.
pub const CAUSE_NOTHING_NORMALIZED: &str = "no documents could be normalized";
/// Cause recorded on external cancellation.
pub const CAUSE_CANCELLED: &str = "cancelled";

/// Result of one orchestration pass.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed { documents: usize, normalized: usize },
    Failed { cause: String },
    /// Another pass claimed the request first, or it is already terminal.
    AlreadyClaimed { current: TriageStatus },
}

/// Passes owned by this process, by triage id.
#[derive(Default)]
struct PassRegistry {
    /// Cancellation flags of running passes.
    running: HashMap<String, Arc<AtomicBool>>,
    /// Claims issued but not yet resolved.
    claiming: HashMap<String, PendingClaim>,
}

#[derive(Default)]
struct PendingClaim {
    claimers: usize,
    cancel_requested: bool,
}

/// How a claim attempt left the registry.
struct ClaimResolution {
    /// Flag of the pass that now owns the request.
    flag: Option<Arc<AtomicBool>>,
    /// A cancel was accepted during the claim but no pass of ours won it.
    orphaned_cancel: bool,
}

pub struct TriageOrchestrator {
    store: Arc<dyn TriageStore>,
    pipeline: DocumentPipeline,
    max_concurrent_documents: usize,
    passes: Mutex<PassRegistry>,
}

impl TriageOrchestrator {
    pub fn new(
        store: Arc<dyn TriageStore>,
        pipeline: DocumentPipeline,
        max_concurrent_documents: usize,
    ) -> Self {
        Self {
            store,
            pipeline,
            max_concurrent_documents: max_concurrent_documents.max(1),
            passes: Mutex::new(PassRegistry::default()),
        }
    }

    /// Fire-and-forget entry point. Safe to call again on an id that is
    /// already processing or terminal.
    pub fn start_processing(
        self: &Arc<Self>,
        triage_id: &str,
        artifacts: Vec<ArtifactRef>,
        patient_identifier: Option<&str>,
    ) -> JoinHandle<()> {
        debug!(triage_id, patient = ?patient_identifier, "Scheduling triage pass");
        let this = Arc::clone(self);
        let id = triage_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = this.run_triage(&id, &artifacts).await {
                error!(triage_id = %id, error = %e, "Triage pass aborted");
            }
        })
    }

    /// Read-only snapshot for status polling. `None` for unknown ids.
    pub fn current_state(
        &self,
        triage_id: &str,
    ) -> Result<Option<TriageRequest>, OrchestrationError> {
        Ok(self.store.get_triage_request(triage_id)?)
    }

    /// Request cancellation. Returns `false` when there is nothing to cancel
    /// (unknown id or already terminal).
    ///
    /// A pass running here is flagged and fails itself at the next page
    /// boundary. Otherwise the record is failed directly, which also covers
    /// a `processing` record whose pass died or lives in another process.
    pub fn cancel(&self, triage_id: &str) -> Result<bool, OrchestrationError> {
        let mut passes = self.lock_passes()?;

        if let Some(flag) = passes.running.get(triage_id) {
            flag.store(true, Ordering::SeqCst);
            info!(triage_id, "Cancellation requested for in-flight pass");
            return Ok(true);
        }

        if let Some(claim) = passes.claiming.get_mut(triage_id) {
            claim.cancel_requested = true;
            info!(triage_id, "Cancellation requested during claim");
            return Ok(true);
        }

        // No claim of ours can start while the registry is held.
        match self
            .store
            .transition(triage_id, TriageStatus::Failed, Some(CAUSE_CANCELLED))?
        {
            TransitionOutcome::Applied { from } => {
                info!(triage_id, from = from.as_str(), "Cancelled without a local pass");
                Ok(true)
            }
            TransitionOutcome::Rejected { .. } | TransitionOutcome::NotFound => Ok(false),
        }
    }

    /// One orchestration pass. Claims the request, processes every
    /// artifact with per-document isolation and finishes in a terminal state.
    pub async fn run_triage(
        &self,
        triage_id: &str,
        artifacts: &[ArtifactRef],
    ) -> Result<RunOutcome, OrchestrationError> {
        self.begin_claim(triage_id)?;
        let claim = self
            .store
            .transition(triage_id, TriageStatus::Processing, None);
        let applied = matches!(claim, Ok(TransitionOutcome::Applied { .. }));
        let resolution = self.finish_claim(triage_id, applied)?;
        if resolution.orphaned_cancel {
            self.cancel(triage_id)?;
        }

        let cancel = match claim? {
            TransitionOutcome::Applied { .. } => resolution.flag.unwrap_or_default(),
            TransitionOutcome::Rejected { current } => {
                info!(triage_id, current = current.as_str(), "Claim rejected, pass skipped");
                return Ok(RunOutcome::AlreadyClaimed { current });
            }
            TransitionOutcome::NotFound => {
                return Err(OrchestrationError::NotFound(triage_id.to_string()));
            }
        };
        let span = info_span!("triage_pass", triage_id);
        let outcome = self
            .run_claimed(triage_id, artifacts, &cancel)
            .instrument(span)
            .await;
        self.unregister(triage_id);
        outcome
    }

    async fn run_claimed(
        &self,
        triage_id: &str,
        artifacts: &[ArtifactRef],
        cancel: &AtomicBool,
    ) -> Result<RunOutcome, OrchestrationError> {
        let started = Instant::now();

        if artifacts.is_empty() {
            return self.fail(triage_id, CAUSE_NO_DOCUMENTS);
        }

        info!(documents = artifacts.len(), "Triage pass started");

        let permits = Semaphore::new(self.max_concurrent_documents);
        let runs = artifacts.iter().map(|artifact| {
            let permits = &permits;
            async move {
                let _permit = permits.acquire().await.ok();
                let result = self.pipeline.run(artifact, cancel).await;
                if result.status == DocumentStatus::Cancelled {
                    return Ok(None);
                }
                self.store
                    .put_document_result(triage_id, &result)
                    .map(|()| Some(result.status))
            }
        });
        let results = join_all(runs).await;

        if cancel.load(Ordering::SeqCst) {
            return self.fail(triage_id, CAUSE_CANCELLED);
        }

        let mut normalized = 0;
        for result in results {
            match result {
                Ok(Some(status)) if status.was_normalized() => normalized += 1,
                Ok(_) => {}
                Err(e) => {
                    let cause = format!("failed to persist document result: {e}");
                    return self.fail(triage_id, &cause);
                }
            }
        }

        if normalized == 0 {
            return self.fail(triage_id, CAUSE_NOTHING_NORMALIZED);
        }

        match self
            .store
            .transition(triage_id, TriageStatus::Completed, None)?
        {
            TransitionOutcome::Applied { .. } => {
                info!(
                    documents = artifacts.len(),
                    normalized,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Triage completed"
                );
                Ok(RunOutcome::Completed {
                    documents: artifacts.len(),
                    normalized,
                })
            }
            TransitionOutcome::Rejected { current } => Err(OrchestrationError::InvalidTransition {
                id: triage_id.to_string(),
                from: current,
                to: TriageStatus::Completed,
            }),
            TransitionOutcome::NotFound => Err(OrchestrationError::NotFound(triage_id.to_string())),
        }
    }

    fn fail(&self, triage_id: &str, cause: &str) -> Result<RunOutcome, OrchestrationError> {
        warn!(triage_id, cause, "Triage failed");
        match self
            .store
            .transition(triage_id, TriageStatus::Failed, Some(cause))?
        {
            TransitionOutcome::Applied { .. } => Ok(RunOutcome::Failed {
                cause: cause.to_string(),
            }),
            TransitionOutcome::Rejected { current } => Err(OrchestrationError::InvalidTransition {
                id: triage_id.to_string(),
                from: current,
                to: TriageStatus::Failed,
            }),
            TransitionOutcome::NotFound => Err(OrchestrationError::NotFound(triage_id.to_string())),
        }
    }

    fn lock_passes(&self) -> Result<MutexGuard<'_, PassRegistry>, OrchestrationError> {
        self.passes.lock().map_err(|_| OrchestrationError::LockPoisoned)
    }

    fn begin_claim(&self, triage_id: &str) -> Result<(), OrchestrationError> {
        let mut passes = self.lock_passes()?;
        passes
            .claiming
            .entry(triage_id.to_string())
            .or_default()
            .claimers += 1;
        Ok(())
    }

    /// Resolve a claim attempt. The winner registers its flag, pre-set if
    /// a cancel arrived while the claim was in progress.
    fn finish_claim(
        &self,
        triage_id: &str,
        applied: bool,
    ) -> Result<ClaimResolution, OrchestrationError> {
        let mut passes = self.lock_passes()?;
        let mut cancel_requested = false;
        let mut last_claimer = true;
        if let Some(claim) = passes.claiming.get_mut(triage_id) {
            claim.claimers = claim.claimers.saturating_sub(1);
            cancel_requested = claim.cancel_requested;
            if applied {
                claim.cancel_requested = false;
            }
            last_claimer = claim.claimers == 0;
        }
        if last_claimer {
            passes.claiming.remove(triage_id);
        }

        let flag = applied.then(|| {
            let flag = Arc::new(AtomicBool::new(cancel_requested));
            passes.running.insert(triage_id.to_string(), Arc::clone(&flag));
            flag
        });
        Ok(ClaimResolution {
            flag,
            orphaned_cancel: last_claimer && cancel_requested && !applied,
        })
    }

    fn unregister(&self, triage_id: &str) {
        if let Ok(mut passes) = self.passes.lock() {
            passes.running.remove(triage_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use std::sync::{OnceLock, Weak};

    use crate::config::EngineConfig;
    use crate::db::repository::StatusTransition;
    use crate::db::DatabaseError;
    use crate::models::{FieldResult, TriageUpdate, UploadedArtifact, NOT_FOUND};
    use crate::pipeline::aggregation::FieldAggregator;
    use crate::pipeline::extraction::{CandidateExtractor, MockExtractionModel};
    use crate::pipeline::normalize::{ArtifactNormalizer, MockRasterizer};
    use crate::storage::MemoryBlobStore;
    use crate::triage::store::SqliteTriageStore;

    const NAME: &str = "What is the patient's full name?";

    struct Harness {
        store: Arc<SqliteTriageStore>,
        orchestrator: Arc<TriageOrchestrator>,
    }

    fn pipeline(blobs: MemoryBlobStore, model: MockExtractionModel) -> DocumentPipeline {
        let config = EngineConfig::default();
        DocumentPipeline::new(
            Arc::new(blobs),
            Arc::new(ArtifactNormalizer::new(Arc::new(MockRasterizer::new(2)), 2.0, 4096)),
            CandidateExtractor::new(Arc::new(model), Duration::from_secs(5)),
            Arc::new(FieldAggregator::new(&config).unwrap()),
        )
    }

    fn harness(blobs: MemoryBlobStore, model: MockExtractionModel) -> Harness {
        let store = Arc::new(SqliteTriageStore::in_memory().unwrap());
        let orchestrator = Arc::new(TriageOrchestrator::new(
            store.clone(),
            pipeline(blobs, model),
            4,
        ));
        Harness {
            store,
            orchestrator,
        }
    }

    fn refs(keys: &[&str]) -> Vec<ArtifactRef> {
        keys.iter().map(|k| ArtifactRef::new(k, None)).collect()
    }

    #[tokio::test]
    async fn failed_download_is_isolated_and_request_completes() {
        let blobs = MemoryBlobStore::new().with_blob("t1/good.pdf", b"%PDF");
        let model = MockExtractionModel::new()
            .with_default("", 0.0)
            .with_answer(1, NAME, "Dylan Wettlaufer", 8.0);
        let h = harness(blobs, model);
        h.store.create_triage_request("t1", None).unwrap();

        let outcome = h
            .orchestrator
            .run_triage("t1", &refs(&["t1/good.pdf", "t1/missing.pdf"]))
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Completed { documents: 2, normalized: 1 });

        let record = h.orchestrator.current_state("t1").unwrap().unwrap();
        assert_eq!(record.status, TriageStatus::Completed);
        assert!(record.error.is_none());
        assert_eq!(
            record.extracted_fields["t1/missing.pdf"].status,
            DocumentStatus::FailedDownload
        );
        let good = &record.extracted_fields["t1/good.pdf"];
        assert_eq!(good.status, DocumentStatus::Completed);
        assert_eq!(good.answer(NAME), Some("Dylan Wettlaufer"));
        assert_eq!(good.answer("List all known allergies."), Some(NOT_FOUND));
    }

    #[tokio::test]
    async fn double_start_claims_once() {
        let blobs = MemoryBlobStore::new().with_blob("t1/a.pdf", b"%PDF");
        let h = harness(blobs, MockExtractionModel::new().with_default("x y", 5.0));
        h.store.create_triage_request("t1", None).unwrap();
        let artifacts = refs(&["t1/a.pdf"]);

        let first = h.orchestrator.start_processing("t1", artifacts.clone(), None);
        let second = h.orchestrator.start_processing("t1", artifacts, None);
        first.await.unwrap();
        second.await.unwrap();

        let claims = h
            .store
            .transitions("t1")
            .unwrap()
            .into_iter()
            .filter(|t| t.from == Some(TriageStatus::Pending) && t.to == TriageStatus::Processing)
            .count();
        assert_eq!(claims, 1);
        let record = h.orchestrator.current_state("t1").unwrap().unwrap();
        assert_eq!(record.status, TriageStatus::Completed);
    }

    #[tokio::test]
    async fn rerun_on_terminal_request_is_noop() {
        let blobs = MemoryBlobStore::new().with_blob("t1/a.pdf", b"%PDF");
        let h = harness(blobs, MockExtractionModel::new().with_default("x y", 5.0));
        h.store.create_triage_request("t1", None).unwrap();
        h.orchestrator.run_triage("t1", &refs(&["t1/a.pdf"])).await.unwrap();

        let again = h.orchestrator.run_triage("t1", &refs(&["t1/a.pdf"])).await.unwrap();
        assert_eq!(
            again,
            RunOutcome::AlreadyClaimed { current: TriageStatus::Completed }
        );
        assert_eq!(h.store.transitions("t1").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unknown_id_state_is_none() {
        let h = harness(MemoryBlobStore::new(), MockExtractionModel::new());
        assert!(h.orchestrator.current_state("nope").unwrap().is_none());
    }

    #[tokio::test]
    async fn run_on_unknown_id_is_not_found() {
        let h = harness(MemoryBlobStore::new(), MockExtractionModel::new());
        let err = h.orchestrator.run_triage("nope", &[]).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::NotFound(_)));
    }

    #[tokio::test]
    async fn no_documents_fails_request() {
        let h = harness(MemoryBlobStore::new(), MockExtractionModel::new());
        h.store.create_triage_request("t1", None).unwrap();

        let outcome = h.orchestrator.run_triage("t1", &[]).await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed { cause: CAUSE_NO_DOCUMENTS.into() });
        let record = h.orchestrator.current_state("t1").unwrap().unwrap();
        assert_eq!(record.status, TriageStatus::Failed);
        assert_eq!(record.error.as_deref(), Some(CAUSE_NO_DOCUMENTS));
    }

    #[tokio::test]
    async fn nothing_normalized_fails_request() {
        let h = harness(MemoryBlobStore::new(), MockExtractionModel::new());
        h.store.create_triage_request("t1", None).unwrap();

        let outcome = h
            .orchestrator
            .run_triage("t1", &refs(&["t1/a.pdf", "t1/notes.txt"]))
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Failed { cause: CAUSE_NOTHING_NORMALIZED.into() });

        let record = h.orchestrator.current_state("t1").unwrap().unwrap();
        assert_eq!(record.status, TriageStatus::Failed);
        assert_eq!(record.extracted_fields.len(), 2);
    }

    #[tokio::test]
    async fn cancel_pending_request_fails_it() {
        let h = harness(MemoryBlobStore::new(), MockExtractionModel::new());
        h.store.create_triage_request("t1", None).unwrap();

        assert!(h.orchestrator.cancel("t1").unwrap());
        let record = h.orchestrator.current_state("t1").unwrap().unwrap();
        assert_eq!(record.status, TriageStatus::Failed);
        assert_eq!(record.error.as_deref(), Some(CAUSE_CANCELLED));

        let outcome = h.orchestrator.run_triage("t1", &refs(&["t1/a.pdf"])).await.unwrap();
        assert_eq!(outcome, RunOutcome::AlreadyClaimed { current: TriageStatus::Failed });
    }

    #[tokio::test]
    async fn cancel_in_flight_commits_nothing_and_fails() {
        let blobs = MemoryBlobStore::new().with_blob("t1/a.pdf", b"%PDF");
        let model = MockExtractionModel::new()
            .with_default("slow answer", 5.0)
            .with_delay(Duration::from_millis(20));
        let h = harness(blobs, model);
        h.store.create_triage_request("t1", None).unwrap();

        let handle = h.orchestrator.start_processing("t1", refs(&["t1/a.pdf"]), None);
        // Wait for the claim.
        for _ in 0..100 {
            let status = h.orchestrator.current_state("t1").unwrap().unwrap().status;
            if status == TriageStatus::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(h.orchestrator.cancel("t1").unwrap());
        handle.await.unwrap();

        let record = h.orchestrator.current_state("t1").unwrap().unwrap();
        assert_eq!(record.status, TriageStatus::Failed);
        assert_eq!(record.error.as_deref(), Some(CAUSE_CANCELLED));
        assert!(record.extracted_fields.is_empty());
    }

    #[tokio::test]
    async fn cancel_terminal_or_unknown_is_false() {
        let h = harness(MemoryBlobStore::new(), MockExtractionModel::new());
        assert!(!h.orchestrator.cancel("ghost").unwrap());

        h.store.create_triage_request("t1", None).unwrap();
        h.orchestrator.run_triage("t1", &[]).await.unwrap();
        assert!(!h.orchestrator.cancel("t1").unwrap());
    }

    #[tokio::test]
    async fn cancel_processing_without_local_pass_fails_record() {
        let h = harness(MemoryBlobStore::new(), MockExtractionModel::new());
        h.store.create_triage_request("t1", None).unwrap();
        // Claimed by a pass this orchestrator never saw.
        h.store.transition("t1", TriageStatus::Processing, None).unwrap();

        assert!(h.orchestrator.cancel("t1").unwrap());
        let record = h.orchestrator.current_state("t1").unwrap().unwrap();
        assert_eq!(record.status, TriageStatus::Failed);
        assert_eq!(record.error.as_deref(), Some(CAUSE_CANCELLED));

        let passes = h.orchestrator.passes.lock().unwrap();
        assert!(passes.running.is_empty());
        assert!(passes.claiming.is_empty());
    }

    /// Issues a cancel right after the claim lands, before the pass
    /// registers its flag.
    struct CancelOnClaim {
        inner: SqliteTriageStore,
        orchestrator: OnceLock<Weak<TriageOrchestrator>>,
    }

    impl TriageStore for CancelOnClaim {
        fn create_triage_request(
            &self,
            id: &str,
            patient_identifier: Option<&str>,
        ) -> Result<TriageRequest, DatabaseError> {
            self.inner.create_triage_request(id, patient_identifier)
        }

        fn get_triage_request(&self, id: &str) -> Result<Option<TriageRequest>, DatabaseError> {
            self.inner.get_triage_request(id)
        }

        fn update_triage_request(
            &self,
            id: &str,
            update: &TriageUpdate,
        ) -> Result<Option<TriageRequest>, DatabaseError> {
            self.inner.update_triage_request(id, update)
        }

        fn create_artifact_record(
            &self,
            artifact: &UploadedArtifact,
        ) -> Result<UploadedArtifact, DatabaseError> {
            self.inner.create_artifact_record(artifact)
        }

        fn transition(
            &self,
            id: &str,
            to: TriageStatus,
            error: Option<&str>,
        ) -> Result<TransitionOutcome, DatabaseError> {
            let outcome = self.inner.transition(id, to, error)?;
            if to == TriageStatus::Processing && matches!(outcome, TransitionOutcome::Applied { .. }) {
                if let Some(orchestrator) = self.orchestrator.get().and_then(Weak::upgrade) {
                    assert!(orchestrator.cancel(id).unwrap());
                }
            }
            Ok(outcome)
        }

        fn put_document_result(&self, id: &str, result: &FieldResult) -> Result<(), DatabaseError> {
            self.inner.put_document_result(id, result)
        }

        fn transitions(&self, id: &str) -> Result<Vec<StatusTransition>, DatabaseError> {
            self.inner.transitions(id)
        }
    }

    #[tokio::test]
    async fn cancel_between_claim_and_registration_stops_pass() {
        let store = Arc::new(CancelOnClaim {
            inner: SqliteTriageStore::in_memory().unwrap(),
            orchestrator: OnceLock::new(),
        });
        let blobs = MemoryBlobStore::new().with_blob("t1/a.pdf", b"%PDF");
        let orchestrator = Arc::new(TriageOrchestrator::new(
            store.clone(),
            pipeline(blobs, MockExtractionModel::new().with_default("x y", 5.0)),
            4,
        ));
        store.orchestrator.set(Arc::downgrade(&orchestrator)).unwrap();
        store.create_triage_request("t1", None).unwrap();

        let outcome = orchestrator.run_triage("t1", &refs(&["t1/a.pdf"])).await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed { cause: CAUSE_CANCELLED.into() });

        let record = orchestrator.current_state("t1").unwrap().unwrap();
        assert_eq!(record.status, TriageStatus::Failed);
        assert!(record.extracted_fields.is_empty());
        let passes = orchestrator.passes.lock().unwrap();
        assert!(passes.running.is_empty());
        assert!(passes.claiming.is_empty());
    }
}
