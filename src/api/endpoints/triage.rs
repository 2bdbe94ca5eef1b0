//! Triage endpoints: upload a batch, poll status, cancel.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, MAX_FILES_PER_UPLOAD};
use crate::intake::{IncomingFile, TriageAccepted};
use crate::models::TriageRequest;

/// Patient identifier used when the client sends none.
const ANONYMOUS_PATIENT: &str = "anonymous";

#[derive(Debug, Default, Deserialize)]
struct UploadMetadata {
    patient_identifier: Option<String>,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub triage_id: String,
    pub cancelled: bool,
}

/// `POST /upload`: multipart `files` (one or more) plus optional
/// `metadata_json`. Returns 202 once files are stored; processing runs
/// in the background.
pub async fn upload(
    State(ctx): State<ApiContext>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<TriageAccepted>), ApiError> {
    let mut files: Vec<IncomingFile> = Vec::new();
    let mut metadata = UploadMetadata::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("files") => {
                if files.len() >= MAX_FILES_PER_UPLOAD {
                    return Err(ApiError::BadRequest(format!(
                        "Maximum {MAX_FILES_PER_UPLOAD} files per upload"
                    )));
                }
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::BadRequest("File part without filename".into()))?;
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read {filename}: {e}")))?;

                let file = IncomingFile {
                    filename,
                    content_type,
                    bytes: bytes.to_vec(),
                };
                validate_file(&ctx, &file)?;
                files.push(file);
            }
            Some("metadata_json") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read metadata: {e}")))?;
                if !raw.trim().is_empty() {
                    metadata = serde_json::from_str(&raw)
                        .map_err(|e| ApiError::BadRequest(format!("Invalid metadata_json: {e}")))?;
                }
            }
            other => {
                tracing::debug!(field = ?other, "Ignoring unknown multipart field");
            }
        }
    }

    if files.is_empty() {
        return Err(ApiError::BadRequest("No files provided".into()));
    }

    let patient = metadata
        .patient_identifier
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| ANONYMOUS_PATIENT.to_string());

    let accepted = ctx.intake.submit(files, Some(patient)).await?;
    tracing::info!(
        triage_id = %accepted.triage_id,
        files = accepted.uploaded_filenames.len(),
        "Upload accepted"
    );
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

fn validate_file(ctx: &ApiContext, file: &IncomingFile) -> Result<(), ApiError> {
    let size = file.bytes.len() as u64;
    if size > ctx.limits.max_file_size_bytes() {
        return Err(ApiError::PayloadTooLarge(format!(
            "File {} exceeds maximum size of {}MB",
            file.filename, ctx.limits.max_file_size_mb
        )));
    }
    let content_type = file.resolved_content_type();
    if !ctx.limits.allows(&content_type) {
        return Err(ApiError::BadRequest(format!(
            "File type {content_type} of {} not allowed",
            file.filename
        )));
    }
    Ok(())
}

/// `GET /api/v1/triage/:triage_id/status`
pub async fn status(
    State(ctx): State<ApiContext>,
    Path(triage_id): Path<String>,
) -> Result<Json<TriageRequest>, ApiError> {
    ctx.orchestrator()
        .current_state(&triage_id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Triage request {triage_id} not found")))
}

/// `POST /api/v1/triage/:triage_id/cancel`
pub async fn cancel(
    State(ctx): State<ApiContext>,
    Path(triage_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    if ctx.orchestrator().current_state(&triage_id)?.is_none() {
        return Err(ApiError::NotFound(format!("Triage request {triage_id} not found")));
    }
    let cancelled = ctx.orchestrator().cancel(&triage_id)?;
    Ok(Json(CancelResponse {
        triage_id,
        cancelled,
    }))
}
