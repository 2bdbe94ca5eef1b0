use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::enums::{ArtifactKind, DocumentStatus, TriageStatus, UrgencyLevel};

/// Sentinel answer for a field no candidate survived for.
pub const NOT_FOUND: &str = "not found";

/// Top-level unit of work spanning the artifacts of one intake event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageRequest {
    pub id: String,
    pub patient_identifier: Option<String>,
    pub status: TriageStatus,
    pub urgency_level: Option<UrgencyLevel>,
    pub diagnostic_suggestions: Vec<String>,
    /// Keyed by document storage key.
    pub extracted_fields: BTreeMap<String, FieldResult>,
    /// Reserved for image classification output; not populated.
    pub image_findings: Option<serde_json::Value>,
    /// Cause text when `status` is `failed`.
    pub error: Option<String>,
    pub uploaded_files: Vec<UploadedArtifact>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// One uploaded file. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedArtifact {
    pub id: String,
    pub triage_id: String,
    pub original_filename: String,
    pub storage_key: String,
    pub kind: ArtifactKind,
    pub public_url: Option<String>,
    pub uploaded_at: NaiveDateTime,
}

/// Storage key + public URL handed to the orchestrator at intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub storage_key: String,
    pub public_url: Option<String>,
}

impl ArtifactRef {
    pub fn new(storage_key: &str, public_url: Option<&str>) -> Self {
        Self {
            storage_key: storage_key.to_string(),
            public_url: public_url.map(str::to_string),
        }
    }

    /// Declared kind, from the storage key's extension.
    pub fn kind(&self) -> ArtifactKind {
        ArtifactKind::from_filename(&self.storage_key)
    }
}

/// Winning candidate's provenance for a resolved field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldEvidence {
    pub confidence: f32,
    /// 1-based page index.
    pub page_index: usize,
}

/// Per-document outcome: final answer per question plus a status marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldResult {
    pub storage_key: String,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub page_count: usize,
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub evidence: BTreeMap<String, FieldEvidence>,
}

impl FieldResult {
    /// Degraded result for a document that never reached extraction.
    pub fn failed(storage_key: &str, status: DocumentStatus, error: String) -> Self {
        Self {
            storage_key: storage_key.to_string(),
            status,
            error: Some(error),
            page_count: 0,
            fields: BTreeMap::new(),
            evidence: BTreeMap::new(),
        }
    }

    pub fn answer(&self, question: &str) -> Option<&str> {
        self.fields.get(question).map(String::as_str)
    }

    /// Count of fields resolved to something other than the sentinel.
    pub fn resolved_count(&self) -> usize {
        self.fields.values().filter(|v| v.as_str() != NOT_FOUND).count()
    }
}

/// Partial update to a triage record. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct TriageUpdate {
    pub urgency_level: Option<UrgencyLevel>,
    pub diagnostic_suggestions: Option<Vec<String>>,
    pub image_findings: Option<serde_json::Value>,
}
