use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};

use crate::db::DatabaseError;
use crate::models::*;

pub fn insert_uploaded_file(
    conn: &Connection,
    artifact: &UploadedArtifact,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO uploaded_files (id, triage_id, original_filename, storage_key, kind,
         public_url, uploaded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            artifact.id,
            artifact.triage_id,
            artifact.original_filename,
            artifact.storage_key,
            artifact.kind.as_str(),
            artifact.public_url,
            artifact.uploaded_at,
        ],
    )?;
    Ok(())
}

pub fn get_uploaded_files(
    conn: &Connection,
    triage_id: &str,
) -> Result<Vec<UploadedArtifact>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, triage_id, original_filename, storage_key, kind, public_url, uploaded_at
         FROM uploaded_files WHERE triage_id = ?1
         ORDER BY uploaded_at ASC, rowid ASC",
    )?;

    let rows = stmt.query_map(params![triage_id], |row| {
        Ok(ArtifactRow {
            id: row.get(0)?,
            triage_id: row.get(1)?,
            original_filename: row.get(2)?,
            storage_key: row.get(3)?,
            kind: row.get(4)?,
            public_url: row.get(5)?,
            uploaded_at: row.get(6)?,
        })
    })?;

    let mut artifacts = Vec::new();
    for row in rows {
        let row = row?;
        artifacts.push(UploadedArtifact {
            id: row.id,
            triage_id: row.triage_id,
            original_filename: row.original_filename,
            storage_key: row.storage_key,
            kind: ArtifactKind::from_str(&row.kind)?,
            public_url: row.public_url,
            uploaded_at: row.uploaded_at,
        });
    }
    Ok(artifacts)
}

struct ArtifactRow {
    id: String,
    triage_id: String,
    original_filename: String,
    storage_key: String,
    kind: String,
    public_url: Option<String>,
    uploaded_at: NaiveDateTime,
}
