//! Blob storage for raw uploaded artifacts.
//!
//! Keys are namespaced by triage id (`{triage_id}/{uuid}{ext}`) so two
//! requests can never collide. Implementations are blocking; async callers
//! run them on the blocking pool.

pub mod fs;
pub mod http;

pub use fs::FsBlobStore;
pub use http::HttpBlobStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage service unreachable at {0}")]
    Connection(String),

    #[error("Storage service returned {status}: {body}")]
    Service { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

/// Object storage for raw artifacts.
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any existing blob.
    /// Returns the public URL of the stored object.
    fn upload(&self, bytes: &[u8], key: &str, content_type: &str) -> Result<String, StorageError>;

    /// Fetch the blob at `key`. Missing keys are `StorageError::NotFound`.
    fn download(&self, key: &str) -> Result<Vec<u8>, StorageError>;
}

/// Build the storage key for a new upload: `{triage_id}/{uuid}{.ext}`.
pub fn namespaced_key(triage_id: &str, original_filename: &str) -> String {
    let ext = std::path::Path::new(original_filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();
    format!("{triage_id}/{}{ext}", uuid::Uuid::new_v4())
}

/// Reject keys that could escape the store root or address nothing.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

// ── Mock for testing ──────────────────────────────────────

/// In-memory blob store. Missing keys are `NotFound`.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(self, key: &str, bytes: &[u8]) -> Self {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(key.to_string(), bytes.to_vec());
        }
        self
    }

    pub fn keys(&self) -> Vec<String> {
        self.blobs
            .lock()
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn upload(&self, bytes: &[u8], key: &str, _content_type: &str) -> Result<String, StorageError> {
        validate_key(key)?;
        self.blobs
            .lock()
            .map_err(|_| StorageError::HttpClient("blob map poisoned".into()))?
            .insert(key.to_string(), bytes.to_vec());
        Ok(format!("memory://{key}"))
    }

    fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.blobs
            .lock()
            .map_err(|_| StorageError::HttpClient("blob map poisoned".into()))?
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_namespaced_by_triage_id() {
        let key = namespaced_key("t-123", "Scan.PDF");
        assert!(key.starts_with("t-123/"));
        assert!(key.ends_with(".pdf"));
        assert!(validate_key(&key).is_ok());
    }

    #[test]
    fn key_without_extension() {
        let key = namespaced_key("t1", "README");
        assert!(!key.contains('.'));
    }

    #[test]
    fn two_uploads_never_share_a_key() {
        assert_ne!(namespaced_key("t1", "a.png"), namespaced_key("t1", "a.png"));
    }

    #[test]
    fn traversal_keys_rejected() {
        for bad in ["", "/etc/passwd", "t1/../t2/x.pdf", "t1//x.pdf", "t1\\x.pdf", "./x"] {
            assert!(validate_key(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn blob_store_is_object_safe() {
        fn _assert(_: &dyn BlobStore) {}
    }
}
