// src/services/storage.rs
use crate::errors::StudioError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Datelike, Utc};
use log::{debug, info};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde_json::Value;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores `data` under `key` and returns its public URL.
    async fn upload(&self, data: Bytes, key: &str, content_type: &str) -> Result<String, StudioError>;

    /// Strips the public base from a URL this storage returned.
    fn key_from_url(&self, url: &str) -> String;
}

/// Uploads through a presigned PUT URL issued by the API.
pub struct PresignedStorage {
    client: Client,
    api_base_url: String,
    public_base_url: String,
}

impl PresignedStorage {
    pub fn new(client: Client, api_base_url: impl Into<String>, public_base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_base_url: api_base_url.into(),
            public_base_url: public_base_url.into(),
        }
    }

    async fn presign(&self, key: &str, content_type: &str) -> Result<String, StudioError> {
        let response = self
            .client
            .get(format!("{}/api/r2-presign", self.api_base_url))
            .query(&[("key", key), ("contentType", content_type)])
            .send()
            .await
            .map_err(|e| StudioError::Upload(format!("Presign request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(StudioError::Upload(format!(
                "Failed to get presigned URL: {} {}",
                status, error_text
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| StudioError::Upload(format!("Failed to parse presign response: {}", e)))?;

        body["uploadUrl"]
            .as_str()
            .or_else(|| body["url"].as_str())
            .map(str::to_string)
            .ok_or_else(|| StudioError::Upload("Presigned upload URL is missing in response".to_string()))
    }
}

#[async_trait]
impl ObjectStorage for PresignedStorage {
    async fn upload(&self, data: Bytes, key: &str, content_type: &str) -> Result<String, StudioError> {
        let upload_url = self.presign(key, content_type).await?;
        debug!("Uploading {} bytes to {}", data.len(), key);

        let response = self
            .client
            .put(&upload_url)
            .header("Content-Type", content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| StudioError::Upload(format!("Upload request failed: {}", e)))?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::NO_CONTENT {
            return Err(StudioError::Upload(format!("Object upload failed: {}", status)));
        }

        let url = format!("{}/{}", self.public_base_url, key);
        info!("Uploaded {}", url);
        Ok(url)
    }

    fn key_from_url(&self, url: &str) -> String {
        url.strip_prefix(&format!("{}/", self.public_base_url))
            .unwrap_or(url)
            .to_string()
    }
}

/// `{prefix}/{user}/{yyyy}/{mm}/{millis}[-{label}]-{random}.{ext}`.
/// Every call yields a fresh key, so retried uploads never overwrite each other.
pub fn object_key<R: Rng + ?Sized>(
    prefix: &str,
    user_id: Option<&str>,
    extension: &str,
    label: Option<&str>,
    now: DateTime<Utc>,
    rng: &mut R,
) -> String {
    let random: String = rng
        .sample_iter(&rand::distr::Alphanumeric)
        .take(8)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    let label = label.map(|l| format!("-{}", l)).unwrap_or_default();

    format!(
        "{}/{}/{:04}/{:02}/{}{}-{}.{}",
        prefix,
        user_id.filter(|u| !u.is_empty()).unwrap_or("anonymous"),
        now.year(),
        now.month(),
        now.timestamp_millis(),
        label,
        random,
        extension
    )
}

pub fn new_object_key(prefix: &str, user_id: Option<&str>, extension: &str, label: Option<&str>) -> String {
    object_key(prefix, user_id, extension, label, Utc::now(), &mut rand::rng())
}
