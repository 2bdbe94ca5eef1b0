use std::time::Duration;

use super::{validate_key, BlobStore, StorageError};

/// Object storage behind a Supabase-style REST API.
///
/// Upload: `POST {base}/storage/v1/object/{bucket}/{key}` (upsert).
/// Download: `GET` on the same path.
/// Public URL: `{base}/storage/v1/object/public/{bucket}/{key}`.
pub struct HttpBlobStore {
    base_url: String,
    bucket: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

impl HttpBlobStore {
    /// Must be called outside an async context (blocking client).
    pub fn new(
        base_url: &str,
        bucket: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, key)
    }

    pub fn public_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, key
        )
    }

    fn map_send_error(&self, e: reqwest::Error) -> StorageError {
        if e.is_connect() {
            StorageError::Connection(self.base_url.clone())
        } else {
            StorageError::HttpClient(e.to_string())
        }
    }
}

impl BlobStore for HttpBlobStore {
    fn upload(&self, bytes: &[u8], key: &str, content_type: &str) -> Result<String, StorageError> {
        validate_key(key)?;

        let response = self
            .client
            .post(self.object_url(key))
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(StorageError::Service {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(key, size = bytes.len(), bucket = %self.bucket, "Uploaded blob");
        Ok(self.public_url(key))
    }

    fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        validate_key(key)?;

        let response = self
            .client
            .get(self.object_url(key))
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(key.to_string()));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(StorageError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .map_err(|e| StorageError::HttpClient(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
