//! Object storage client for the brigade back office.
//!
//! Menu item images live in a public-read bucket that must exist before
//! the application starts; its absence is a configuration error, not a
//! runtime-recoverable one.

pub use bytes::Bytes;

use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Error type
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Storage bucket missing: {0} (create it with public-read access before starting)")]
    BucketMissing(String),
}

/// Upload options
#[derive(Debug, Clone, Serialize, Default)]
pub struct FileOptions {
    pub cache_control: Option<String>,
    pub content_type: Option<String>,
    pub upsert: Option<bool>,
}

impl FileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_control(mut self, cache_control: &str) -> Self {
        self.cache_control = Some(cache_control.to_string());
        self
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = Some(upsert);
        self
    }
}

/// Bucket metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub id: String,
    pub name: String,
    pub public: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Storage client
#[derive(Clone)]
pub struct StorageClient {
    base_url: String,
    api_key: String,
    http_client: Client,
}

impl StorageClient {
    /// Create a new storage client.
    pub fn new(base_url: &str, api_key: &str, http_client: Client) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            http_client,
        }
    }

    /// Fetch bucket metadata. A 404 maps to `BucketMissing`.
    pub async fn get_bucket(&self, bucket_id: &str) -> Result<Bucket> {
        let url = format!("{}/storage/v1/bucket/{}", self.base_url, bucket_id);

        let response = self
            .http_client
            .get(&url)
            .header("apikey", &self.api_key)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::BucketMissing(bucket_id.to_string()));
        }
        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(StorageError::ApiError(error_text));
        }

        let bucket = response.json::<Bucket>().await?;

        Ok(bucket)
    }

    /// Assert the bucket exists and is publicly readable.
    pub async fn ensure_public_bucket(&self, bucket_id: &str) -> Result<()> {
        let bucket = self.get_bucket(bucket_id).await?;
        if !bucket.public {
            return Err(StorageError::ApiError(format!(
                "bucket '{}' exists but is not public-read",
                bucket_id
            )));
        }
        Ok(())
    }

    /// Upload bytes to `bucket/path`, returning the public URL.
    pub async fn upload(
        &self,
        bucket_id: &str,
        path: &str,
        contents: Bytes,
        options: Option<FileOptions>,
    ) -> Result<String> {
        let mut url = Url::parse(&self.base_url)?;
        url.set_path(&format!("/storage/v1/object/{}/{}", bucket_id, path));

        if let Some(opts) = &options {
            let mut query_pairs = url.query_pairs_mut();
            if let Some(cache_control) = &opts.cache_control {
                query_pairs.append_pair("cache_control", cache_control);
            }
            if let Some(upsert) = &opts.upsert {
                query_pairs.append_pair("upsert", &upsert.to_string());
            }
        }

        let file_name = path
            .rsplit('/')
            .next()
            .unwrap_or(path)
            .to_string();
        let mut part = Part::bytes(contents.to_vec()).file_name(file_name);
        if let Some(content_type) = options.as_ref().and_then(|o| o.content_type.clone()) {
            part = part
                .mime_str(&content_type)
                .map_err(|e| StorageError::ApiError(format!("invalid content type: {}", e)))?;
        }
        let form = Form::new().part("file", part);

        debug!("uploading {}/{}", bucket_id, path);
        let response = self
            .http_client
            .post(url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", &self.api_key))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(StorageError::ApiError(error_text));
        }

        Ok(self.get_public_url(bucket_id, path))
    }

    /// Public URL for an object in a public-read bucket. No request is
    /// made; the URL shape is part of the storage contract.
    pub fn get_public_url(&self, bucket_id: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, bucket_id, path
        )
    }

    /// Remove objects, e.g. a replaced menu image.
    pub async fn remove(&self, bucket_id: &str, paths: &[&str]) -> Result<()> {
        let url = format!("{}/storage/v1/object/{}", self.base_url, bucket_id);

        let payload = serde_json::json!({ "prefixes": paths });

        let response = self
            .http_client
            .delete(&url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", &self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(StorageError::ApiError(error_text));
        }

        Ok(())
    }
}
