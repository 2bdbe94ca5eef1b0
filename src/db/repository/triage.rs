use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};

use super::{get_document_results, get_uploaded_files, now};
use crate::db::DatabaseError;
use crate::models::*;

/// Outcome of a conditional status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied { from: TriageStatus },
    /// The record exists but its current status does not allow the move.
    Rejected { current: TriageStatus },
    NotFound,
}

impl TransitionOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// A logged status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: Option<TriageStatus>,
    pub to: TriageStatus,
    pub at: NaiveDateTime,
}

pub fn insert_triage_request(
    conn: &Connection,
    id: &str,
    patient_identifier: Option<&str>,
) -> Result<(), DatabaseError> {
    let ts = now();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO triage_requests (id, patient_identifier, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![id, patient_identifier, TriageStatus::Pending.as_str(), ts],
    )?;
    log_transition(&tx, id, None, TriageStatus::Pending, ts)?;
    tx.commit()?;
    Ok(())
}

/// Load the full projection: record + uploaded files + per-document results.
pub fn get_triage_request(
    conn: &Connection,
    id: &str,
) -> Result<Option<TriageRequest>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, patient_identifier, status, urgency_level, diagnostic_suggestions,
                    image_findings, error, created_at, updated_at
             FROM triage_requests WHERE id = ?1",
            params![id],
            |row| {
                Ok(TriageRow {
                    id: row.get(0)?,
                    patient_identifier: row.get(1)?,
                    status: row.get(2)?,
                    urgency_level: row.get(3)?,
                    diagnostic_suggestions: row.get(4)?,
                    image_findings: row.get(5)?,
                    error: row.get(6)?,
                    created_at: row.get(7)?,
                    updated_at: row.get(8)?,
                })
            },
        )
        .optional()?;

    let Some(row) = row else {
        return Ok(None);
    };

    let uploaded_files = get_uploaded_files(conn, id)?;
    let extracted_fields = get_document_results(conn, id)?;
    Ok(Some(triage_from_row(row, uploaded_files, extracted_fields)?))
}

pub fn get_triage_status(
    conn: &Connection,
    id: &str,
) -> Result<Option<TriageStatus>, DatabaseError> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM triage_requests WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    status.map(|s| TriageStatus::from_str(&s)).transpose()
}

/// Apply a partial update. Returns `false` if the id is unknown.
/// Status is never changed here; use [`transition_status`].
pub fn update_triage_request(
    conn: &Connection,
    id: &str,
    update: &TriageUpdate,
) -> Result<bool, DatabaseError> {
    let suggestions = update
        .diagnostic_suggestions
        .as_ref()
        .map(|s| to_json("diagnostic_suggestions", s))
        .transpose()?;
    let findings = update
        .image_findings
        .as_ref()
        .map(|f| to_json("image_findings", f))
        .transpose()?;

    let rows = conn.execute(
        "UPDATE triage_requests SET
            urgency_level = COALESCE(?2, urgency_level),
            diagnostic_suggestions = COALESCE(?3, diagnostic_suggestions),
            image_findings = COALESCE(?4, image_findings),
            updated_at = ?5
         WHERE id = ?1",
        params![
            id,
            update.urgency_level.map(|u| u.as_str()),
            suggestions,
            findings,
            now(),
        ],
    )?;
    Ok(rows > 0)
}

/// Move a record to `to` if its current status allows it.
///
/// The UPDATE is conditional on the status read inside the same
/// transaction, so two writers racing on the same id cannot both apply.
pub fn transition_status(
    conn: &Connection,
    id: &str,
    to: TriageStatus,
    error: Option<&str>,
) -> Result<TransitionOutcome, DatabaseError> {
    let tx = conn.unchecked_transaction()?;

    let Some(current) = get_triage_status(&tx, id)? else {
        return Ok(TransitionOutcome::NotFound);
    };

    if !current.can_transition_to(to) {
        return Ok(TransitionOutcome::Rejected { current });
    }

    let ts = now();
    let rows = tx.execute(
        "UPDATE triage_requests SET status = ?2, error = COALESCE(?3, error), updated_at = ?4
         WHERE id = ?1 AND status = ?5",
        params![id, to.as_str(), error, ts, current.as_str()],
    )?;

    if rows == 0 {
        return Ok(TransitionOutcome::Rejected { current });
    }

    log_transition(&tx, id, Some(current), to, ts)?;
    tx.commit()?;
    Ok(TransitionOutcome::Applied { from: current })
}

pub fn list_transitions(
    conn: &Connection,
    id: &str,
) -> Result<Vec<StatusTransition>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT from_status, to_status, at FROM triage_transitions
         WHERE triage_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![id], |row| {
        Ok((
            row.get::<_, Option<String>>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, NaiveDateTime>(2)?,
        ))
    })?;

    let mut transitions = Vec::new();
    for row in rows {
        let (from, to, at) = row?;
        transitions.push(StatusTransition {
            from: from.map(|s| TriageStatus::from_str(&s)).transpose()?,
            to: TriageStatus::from_str(&to)?,
            at,
        });
    }
    Ok(transitions)
}

fn log_transition(
    conn: &Connection,
    id: &str,
    from: Option<TriageStatus>,
    to: TriageStatus,
    at: NaiveDateTime,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO triage_transitions (triage_id, from_status, to_status, at)
         VALUES (?1, ?2, ?3, ?4)",
        params![id, from.map(|s| s.as_str()), to.as_str(), at],
    )?;
    Ok(())
}

fn to_json<T: serde::Serialize>(column: &str, value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization {
        column: column.into(),
        reason: e.to_string(),
    })
}

struct TriageRow {
    id: String,
    patient_identifier: Option<String>,
    status: String,
    urgency_level: Option<String>,
    diagnostic_suggestions: String,
    image_findings: Option<String>,
    error: Option<String>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

fn triage_from_row(
    row: TriageRow,
    uploaded_files: Vec<UploadedArtifact>,
    extracted_fields: std::collections::BTreeMap<String, FieldResult>,
) -> Result<TriageRequest, DatabaseError> {
    let diagnostic_suggestions: Vec<String> = serde_json::from_str(&row.diagnostic_suggestions)
        .map_err(|e| DatabaseError::Serialization {
            column: "diagnostic_suggestions".into(),
            reason: e.to_string(),
        })?;
    let image_findings = row
        .image_findings
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|e| DatabaseError::Serialization {
                column: "image_findings".into(),
                reason: e.to_string(),
            })
        })
        .transpose()?;

    Ok(TriageRequest {
        id: row.id,
        patient_identifier: row.patient_identifier,
        status: TriageStatus::from_str(&row.status)?,
        urgency_level: row
            .urgency_level
            .map(|u| UrgencyLevel::from_str(&u))
            .transpose()?,
        diagnostic_suggestions,
        extracted_fields,
        image_findings,
        error: row.error,
        uploaded_files,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}
