//! Application constants and engine configuration.
//!
//! `EngineConfig` holds everything the extraction engine treats as static
//! input: the ordered question set, the confidence threshold, the denylist
//! and the narrow full-name cleanup labels. It is resolved once at startup
//! and passed down explicitly; nothing below this module reads env vars.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "TriageAI";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Env var pointing at a JSON engine config file.
pub const ENGINE_CONFIG_ENV: &str = "TRIAGE_ENGINE_CONFIG";

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,triageai_lib=debug,tower_http=info"
}

/// Get the application data directory (SQLite database, local blobs).
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
}

/// Default location of the SQLite database.
pub fn default_database_path() -> PathBuf {
    app_data_dir().join("triage.db")
}

/// Default root for the filesystem blob store.
pub fn default_blob_dir() -> PathBuf {
    app_data_dir().join("uploads")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

// ═══════════════════════════════════════════════════════════
// Question set
// ═══════════════════════════════════════════════════════════

/// Semantic type of a question. Drives the field-specific filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    FullName,
    DateOfBirth,
    Phone,
    Address,
    FreeText,
}

impl FieldKind {
    /// Phone, date of birth and address answers are subject to the
    /// short-numeric (page number) filter.
    pub fn rejects_numeric_noise(&self) -> bool {
        matches!(self, Self::DateOfBirth | Self::Phone | Self::Address)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSpec {
    pub text: String,
    pub kind: FieldKind,
}

impl QuestionSpec {
    pub fn new(text: &str, kind: FieldKind) -> Self {
        Self {
            text: text.to_string(),
            kind,
        }
    }
}

fn default_questions() -> Vec<QuestionSpec> {
    vec![
        QuestionSpec::new("What is the patient's full name?", FieldKind::FullName),
        QuestionSpec::new("What is the patient's date of birth?", FieldKind::DateOfBirth),
        QuestionSpec::new("What is the patient's phone number?", FieldKind::Phone),
        QuestionSpec::new("What is their primary complaint?", FieldKind::FreeText),
        QuestionSpec::new("List all known allergies.", FieldKind::FreeText),
        QuestionSpec::new("What medications are they currently taking?", FieldKind::FreeText),
        QuestionSpec::new("What is the patient's address?", FieldKind::Address),
    ]
}

/// Known-bad extractions: tokenizer specials, form labels, section headers.
fn default_denylist() -> Vec<String> {
    [
        "[CLS]",
        "[SEP]",
        "patient details",
        "patient information",
        "first name:",
        "last name:",
        "first name",
        "last name",
        "name",
        "name:",
        "date of birth",
        "date of birth:",
        "dob",
        "phone",
        "phone:",
        "phone number",
        "address",
        "address:",
        "allergies",
        "medications",
        "primary complaint",
        "page",
        "n/a",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Label sequences stripped from the full-name answer only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameLabels {
    /// Banner that may precede the name block, e.g. "PATIENT DETAILS".
    pub banners: Vec<String>,
    /// Sub-labels inside the name block, e.g. "First Name:".
    pub field_labels: Vec<String>,
}

impl Default for NameLabels {
    fn default() -> Self {
        Self {
            banners: vec!["patient details".into()],
            field_labels: vec!["first name:".into(), "last name:".into()],
        }
    }
}

/// Upload validation owned by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadLimits {
    pub max_file_size_mb: u64,
    pub allowed_content_types: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_size_mb: 20,
            allowed_content_types: vec![
                "application/pdf".into(),
                "image/jpeg".into(),
                "image/png".into(),
            ],
        }
    }
}

impl UploadLimits {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn allows(&self, content_type: &str) -> bool {
        self.allowed_content_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(content_type))
    }
}

// ═══════════════════════════════════════════════════════════
// EngineConfig
// ═══════════════════════════════════════════════════════════

/// Static input to the extraction engine.
///
/// The threshold is on the model's native score scale (logit sum for
/// LayoutLM-style document QA); re-tune it when swapping models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub questions: Vec<QuestionSpec>,
    pub confidence_threshold: f32,
    pub denylist: Vec<String>,
    /// Purely numeric answers shorter than this are page-number noise.
    pub numeric_noise_max_len: usize,
    pub name_labels: NameLabels,
    /// PDF upscale factor relative to 72 DPI.
    pub pdf_scale_factor: f32,
    pub max_page_dimension_px: u32,
    pub model_timeout_secs: u64,
    pub max_concurrent_documents: usize,
    pub upload: UploadLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            questions: default_questions(),
            confidence_threshold: 1.0,
            denylist: default_denylist(),
            numeric_noise_max_len: 5,
            name_labels: NameLabels::default(),
            pdf_scale_factor: 2.0,
            max_page_dimension_px: 4096,
            model_timeout_secs: 60,
            max_concurrent_documents: 4,
            upload: UploadLimits::default(),
        }
    }
}

impl EngineConfig {
    /// Resolve the config: `.env` → optional JSON file → single-value overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut config = match std::env::var(ENGINE_CONFIG_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        if let Ok(value) = std::env::var("TRIAGE_CONFIDENCE_THRESHOLD") {
            config.confidence_threshold =
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "TRIAGE_CONFIDENCE_THRESHOLD".into(),
                    value: value.clone(),
                })?;
        }

        if let Ok(value) = std::env::var("TRIAGE_MODEL_TIMEOUT_SECS") {
            config.model_timeout_secs =
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "TRIAGE_MODEL_TIMEOUT_SECS".into(),
                    value: value.clone(),
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.questions.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "questions".into(),
                value: "[]".into(),
            });
        }
        if !self.confidence_threshold.is_finite() {
            return Err(ConfigError::InvalidValue {
                key: "confidence_threshold".into(),
                value: self.confidence_threshold.to_string(),
            });
        }
        // NaN fails the comparison too.
        if !(self.pdf_scale_factor > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "pdf_scale_factor".into(),
                value: self.pdf_scale_factor.to_string(),
            });
        }
        if self.model_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "model_timeout_secs".into(),
                value: "0".into(),
            });
        }
        if self.max_concurrent_documents == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrent_documents".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }
}
