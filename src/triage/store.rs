use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::db::repository::{self, StatusTransition, TransitionOutcome};
use crate::db::sqlite::{open_database, open_memory_database};
use crate::db::DatabaseError;
use crate::models::*;

/// Record store for triage requests. The only shared mutable resource.
///
/// `transition` is the sole way to change status and is conditional on the
/// persisted status, so it doubles as the processing claim.
pub trait TriageStore: Send + Sync {
    fn create_triage_request(
        &self,
        id: &str,
        patient_identifier: Option<&str>,
    ) -> Result<TriageRequest, DatabaseError>;

    fn get_triage_request(&self, id: &str) -> Result<Option<TriageRequest>, DatabaseError>;

    /// `None` if the id is unknown.
    fn update_triage_request(
        &self,
        id: &str,
        update: &TriageUpdate,
    ) -> Result<Option<TriageRequest>, DatabaseError>;

    fn create_artifact_record(
        &self,
        artifact: &UploadedArtifact,
    ) -> Result<UploadedArtifact, DatabaseError>;

    fn transition(
        &self,
        id: &str,
        to: TriageStatus,
        error: Option<&str>,
    ) -> Result<TransitionOutcome, DatabaseError>;

    /// Replace one document's slice of the extracted-fields mapping.
    fn put_document_result(&self, id: &str, result: &FieldResult) -> Result<(), DatabaseError>;

    fn transitions(&self, id: &str) -> Result<Vec<StatusTransition>, DatabaseError>;
}

/// SQLite-backed record store.
pub struct SqliteTriageStore {
    conn: Mutex<Connection>,
}

impl SqliteTriageStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::new(open_database(path)?))
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(open_memory_database()?))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }
}

impl TriageStore for SqliteTriageStore {
    fn create_triage_request(
        &self,
        id: &str,
        patient_identifier: Option<&str>,
    ) -> Result<TriageRequest, DatabaseError> {
        let conn = self.conn()?;
        repository::insert_triage_request(&conn, id, patient_identifier)?;
        repository::get_triage_request(&conn, id)?.ok_or_else(|| DatabaseError::NotFound {
            entity_type: "TriageRequest".into(),
            id: id.to_string(),
        })
    }

    fn get_triage_request(&self, id: &str) -> Result<Option<TriageRequest>, DatabaseError> {
        repository::get_triage_request(&*self.conn()?, id)
    }

    fn update_triage_request(
        &self,
        id: &str,
        update: &TriageUpdate,
    ) -> Result<Option<TriageRequest>, DatabaseError> {
        let conn = self.conn()?;
        if !repository::update_triage_request(&conn, id, update)? {
            return Ok(None);
        }
        repository::get_triage_request(&conn, id)
    }

    fn create_artifact_record(
        &self,
        artifact: &UploadedArtifact,
    ) -> Result<UploadedArtifact, DatabaseError> {
        repository::insert_uploaded_file(&*self.conn()?, artifact)?;
        Ok(artifact.clone())
    }

    fn transition(
        &self,
        id: &str,
        to: TriageStatus,
        error: Option<&str>,
    ) -> Result<TransitionOutcome, DatabaseError> {
        repository::transition_status(&*self.conn()?, id, to, error)
    }

    fn put_document_result(&self, id: &str, result: &FieldResult) -> Result<(), DatabaseError> {
        repository::upsert_document_result(&*self.conn()?, id, result)
    }

    fn transitions(&self, id: &str) -> Result<Vec<StatusTransition>, DatabaseError> {
        repository::list_transitions(&*self.conn()?, id)
    }
}
