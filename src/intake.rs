//! Intake: accept a batch of files for one triage request, store them and
//! hand them to the orchestrator. Returns before any processing happens.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::repository::now;
use crate::db::DatabaseError;
use crate::models::{ArtifactKind, ArtifactRef, TriageStatus, UploadedArtifact};
use crate::storage::{namespaced_key, BlobStore, StorageError};
use crate::triage::{TriageOrchestrator, TriageStore};

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("No files submitted")]
    EmptyBatch,

    #[error("File is empty: {0}")]
    EmptyFile(String),

    #[error("Upload failed for {filename}: {source}")]
    Upload {
        triage_id: String,
        filename: String,
        source: StorageError,
    },

    #[error("Record store error: {0}")]
    Store(#[from] DatabaseError),

    #[error("Upload task failed: {0}")]
    Task(String),
}

/// One file as received from the client.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl IncomingFile {
    /// Declared content type, or one guessed from the filename.
    pub fn resolved_content_type(&self) -> String {
        self.content_type
            .clone()
            .filter(|c| !c.is_empty() && c != "application/octet-stream")
            .unwrap_or_else(|| {
                mime_guess::from_path(&self.filename)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string()
            })
    }
}

/// Acknowledgement returned to the caller immediately after intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageAccepted {
    pub triage_id: String,
    pub uploaded_filenames: Vec<String>,
    pub status_url: String,
}

pub fn status_url(triage_id: &str) -> String {
    format!("/api/v1/triage/{triage_id}/status")
}

pub struct IntakeService {
    store: Arc<dyn TriageStore>,
    blob_store: Arc<dyn BlobStore>,
    orchestrator: Arc<TriageOrchestrator>,
}

impl IntakeService {
    pub fn new(
        store: Arc<dyn TriageStore>,
        blob_store: Arc<dyn BlobStore>,
        orchestrator: Arc<TriageOrchestrator>,
    ) -> Self {
        Self {
            store,
            blob_store,
            orchestrator,
        }
    }

    pub fn orchestrator(&self) -> &Arc<TriageOrchestrator> {
        &self.orchestrator
    }

    /// Create the record, upload every file, register artifacts and start
    /// background processing. A storage failure fails the new record.
    pub async fn submit(
        &self,
        files: Vec<IncomingFile>,
        patient_identifier: Option<String>,
    ) -> Result<TriageAccepted, IntakeError> {
        if files.is_empty() {
            return Err(IntakeError::EmptyBatch);
        }
        if let Some(empty) = files.iter().find(|f| f.bytes.is_empty()) {
            return Err(IntakeError::EmptyFile(empty.filename.clone()));
        }

        let triage_id = uuid::Uuid::new_v4().to_string();
        self.store
            .create_triage_request(&triage_id, patient_identifier.as_deref())?;
        info!(triage_id = %triage_id, files = files.len(), "Triage request created");
        debug!(triage_id = %triage_id, patient = ?patient_identifier, "Intake patient");

        let mut artifacts = Vec::with_capacity(files.len());
        let mut uploaded_filenames = Vec::with_capacity(files.len());

        for file in files {
            let artifact = match self.store_file(&triage_id, file).await {
                Ok(artifact) => artifact,
                Err(e) => {
                    warn!(triage_id = %triage_id, error = %e, "Intake upload failed");
                    let cause = e.to_string();
                    self.store
                        .transition(&triage_id, TriageStatus::Failed, Some(&cause))?;
                    return Err(e);
                }
            };
            uploaded_filenames.push(artifact.original_filename.clone());
            artifacts.push(ArtifactRef::new(
                &artifact.storage_key,
                artifact.public_url.as_deref(),
            ));
        }

        self.orchestrator
            .start_processing(&triage_id, artifacts, patient_identifier.as_deref());

        Ok(TriageAccepted {
            status_url: status_url(&triage_id),
            triage_id,
            uploaded_filenames,
        })
    }

    async fn store_file(
        &self,
        triage_id: &str,
        file: IncomingFile,
    ) -> Result<UploadedArtifact, IntakeError> {
        let key = namespaced_key(triage_id, &file.filename);
        let content_type = file.resolved_content_type();
        let blob_store = Arc::clone(&self.blob_store);
        let upload_key = key.clone();
        let bytes = file.bytes;

        let public_url = tokio::task::spawn_blocking(move || {
            blob_store.upload(&bytes, &upload_key, &content_type)
        })
        .await
        .map_err(|e| IntakeError::Task(e.to_string()))?
        .map_err(|source| IntakeError::Upload {
            triage_id: triage_id.to_string(),
            filename: file.filename.clone(),
            source,
        })?;

        let artifact = UploadedArtifact {
            id: uuid::Uuid::new_v4().to_string(),
            triage_id: triage_id.to_string(),
            kind: ArtifactKind::from_filename(&file.filename),
            original_filename: file.filename,
            storage_key: key,
            public_url: Some(public_url),
            uploaded_at: now(),
        };
        Ok(self.store.create_artifact_record(&artifact)?)
    }
}
