pub mod api;
pub mod config;
pub mod db;
pub mod intake; // Upload batch → stored artifacts → background pass
pub mod models;
pub mod pipeline;
pub mod storage;
pub mod triage;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, EngineConfig};
use crate::db::DatabaseError;
use crate::pipeline::aggregation::FieldAggregator;
use crate::pipeline::document::DocumentPipeline;
use crate::pipeline::extraction::{CandidateExtractor, HttpQaModel, ModelError};
use crate::pipeline::normalize::pdfium::PdfiumRasterizer;
use crate::pipeline::normalize::{ArtifactError, ArtifactNormalizer};
use crate::storage::fs::FsBlobStore;
use crate::storage::http::HttpBlobStore;
use crate::storage::{BlobStore, StorageError};
use crate::triage::{SqliteTriageStore, TriageOrchestrator};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_MODEL_URL: &str = "http://127.0.0.1:8500/answer";
const DEFAULT_BUCKET: &str = "triage-uploads";
const STORAGE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Blob store unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error("Extraction model client: {0}")]
    Model(#[from] ModelError),

    #[error("PDF rasterizer: {0}")]
    Rasterizer(#[from] ArtifactError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where blobs live: a local directory or a Supabase-style object store.
#[derive(Debug, Clone, PartialEq)]
pub enum BlobBackend {
    Filesystem(PathBuf),
    Http {
        base_url: String,
        api_key: String,
        bucket: String,
    },
}

/// Process-level wiring read from the environment. Engine behavior lives
/// in [`EngineConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub bind_addr: SocketAddr,
    pub database_path: PathBuf,
    pub blob_backend: BlobBackend,
    pub model_url: String,
}

impl ServiceSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_addr = lookup("TRIAGE_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into());
        let bind_addr = raw_addr.parse().map_err(|_| ConfigError::InvalidValue {
            key: "TRIAGE_BIND_ADDR".into(),
            value: raw_addr.clone(),
        })?;

        let database_path = lookup("TRIAGE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(config::default_database_path);

        let blob_backend = match (lookup("TRIAGE_STORAGE_URL"), lookup("TRIAGE_STORAGE_KEY")) {
            (Some(base_url), Some(api_key)) => BlobBackend::Http {
                base_url,
                api_key,
                bucket: lookup("TRIAGE_STORAGE_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.into()),
            },
            (Some(_), None) => {
                return Err(ConfigError::InvalidValue {
                    key: "TRIAGE_STORAGE_KEY".into(),
                    value: "<unset>".into(),
                })
            }
            _ => BlobBackend::Filesystem(
                lookup("TRIAGE_BLOB_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(config::default_blob_dir),
            ),
        };

        Ok(Self {
            bind_addr,
            database_path,
            blob_backend,
            model_url: lookup("TRIAGE_MODEL_URL").unwrap_or_else(|| DEFAULT_MODEL_URL.into()),
        })
    }
}

/// Start the triage service and block until shutdown.
pub fn run() -> Result<(), StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let engine = EngineConfig::load()?;
    let settings = ServiceSettings::from_env()?;
    tracing::info!(
        questions = engine.questions.len(),
        threshold = engine.confidence_threshold,
        db = %settings.database_path.display(),
        model = %settings.model_url,
        "Configuration resolved"
    );

    // Blocking HTTP clients own their runtime; build them before ours.
    let blob_store: Arc<dyn BlobStore> = match &settings.blob_backend {
        BlobBackend::Filesystem(root) => Arc::new(FsBlobStore::new(root)?),
        BlobBackend::Http {
            base_url,
            api_key,
            bucket,
        } => Arc::new(HttpBlobStore::new(base_url, bucket, api_key, STORAGE_TIMEOUT)?),
    };
    let model = Arc::new(HttpQaModel::new(&settings.model_url, engine.model_timeout())?);
    let rasterizer = Arc::new(PdfiumRasterizer::new()?);

    let store = Arc::new(SqliteTriageStore::open(&settings.database_path)?);

    let pipeline = DocumentPipeline::new(
        blob_store.clone(),
        Arc::new(ArtifactNormalizer::new(
            rasterizer,
            engine.pdf_scale_factor,
            engine.max_page_dimension_px,
        )),
        CandidateExtractor::new(model, engine.model_timeout()),
        Arc::new(FieldAggregator::new(&engine)?),
    );
    let orchestrator = Arc::new(TriageOrchestrator::new(
        store.clone(),
        pipeline,
        engine.max_concurrent_documents,
    ));
    let intake = Arc::new(intake::IntakeService::new(store, blob_store, orchestrator));
    let router = api::triage_api_router(api::ApiContext::new(intake, engine.upload.clone()));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(api::serve(settings.bind_addr, router))?;
    Ok(())
}
