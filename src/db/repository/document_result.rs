use std::collections::BTreeMap;

use rusqlite::{params, Connection};

use super::now;
use crate::db::DatabaseError;
use crate::models::*;

/// Insert or replace one document's slice of the extracted-fields mapping.
/// Other documents' rows for the same request are untouched.
pub fn upsert_document_result(
    conn: &Connection,
    triage_id: &str,
    result: &FieldResult,
) -> Result<(), DatabaseError> {
    let json = serde_json::to_string(result).map_err(|e| DatabaseError::Serialization {
        column: "document_results.result".into(),
        reason: e.to_string(),
    })?;

    conn.execute(
        "INSERT INTO document_results (triage_id, document_key, status, result, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(triage_id, document_key) DO UPDATE SET
            status = excluded.status,
            result = excluded.result,
            updated_at = excluded.updated_at",
        params![
            triage_id,
            result.storage_key,
            result.status.as_str(),
            json,
            now(),
        ],
    )?;
    Ok(())
}

pub fn get_document_results(
    conn: &Connection,
    triage_id: &str,
) -> Result<BTreeMap<String, FieldResult>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT document_key, result FROM document_results WHERE triage_id = ?1",
    )?;
    let rows = stmt.query_map(params![triage_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut results = BTreeMap::new();
    for row in rows {
        let (key, raw) = row?;
        let parsed: FieldResult =
            serde_json::from_str(&raw).map_err(|e| DatabaseError::Serialization {
                column: "document_results.result".into(),
                reason: e.to_string(),
            })?;
        results.insert(key, parsed);
    }
    Ok(results)
}
