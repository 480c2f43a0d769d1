//! HTTP object store adapter.
//!
//! Issues `PUT {endpoint}/{bucket}/{key}` with the body's SHA-256 in
//! `x-amz-content-sha256`, metadata as `x-amz-meta-*` headers and, when an
//! access key is configured, a bearer token. Works against gateways and
//! presigning proxies in front of S3-compatible stores.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::ObjectStore;

const PUT_TIMEOUT: Duration = Duration::from_secs(120);

pub struct HttpObjectStore {
    endpoint: String,
    bucket: String,
    access_key: Option<String>,
    secret_key: Option<String>,
    client: reqwest::Client,
}

impl HttpObjectStore {
    pub fn new(
        endpoint: &str,
        bucket: &str,
        access_key: Option<String>,
        secret_key: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PUT_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.trim_matches('/').to_string(),
            access_key,
            secret_key,
            client,
        })
    }

    /// Full URL for an object key
    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key.trim_start_matches('/'))
    }
}

/// Lowercase hex SHA-256 of a payload
pub fn content_sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Header name for a metadata key
fn meta_header(key: &str) -> String {
    let clean: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '-' })
        .collect();
    format!("x-amz-meta-{}", clean)
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &[(String, String)],
    ) -> Result<()> {
        let url = self.object_url(key);
        let digest = content_sha256(&bytes);

        let mut request = self
            .client
            .put(&url)
            .header("content-type", content_type)
            .header("x-amz-content-sha256", &digest);

        for (k, v) in metadata {
            // Header values must be visible ASCII
            let value: String = v.chars().filter(|c| c.is_ascii() && !c.is_ascii_control()).collect();
            request = request.header(meta_header(k), value);
        }

        if let Some(access) = &self.access_key {
            request = request.bearer_auth(match &self.secret_key {
                Some(secret) => format!("{}:{}", access, secret),
                None => access.clone(),
            });
        }

        let response = request
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("Failed to PUT {}", key))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Object store rejected {} with {}: {}", key, status, body.trim());
        }

        tracing::debug!("Stored {} ({})", key, digest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url() {
        let store = HttpObjectStore::new("https://s3.example.com/", "/evidence/", None, None).unwrap();
        assert_eq!(
            store.object_url("recordings/evidence_1.wav"),
            "https://s3.example.com/evidence/recordings/evidence_1.wav"
        );
    }

    #[test]
    fn test_meta_header_names() {
        assert_eq!(meta_header("label"), "x-amz-meta-label");
        assert_eq!(meta_header("Peak dB"), "x-amz-meta-peak-db");
    }

    #[test]
    fn test_content_sha256() {
        assert_eq!(
            content_sha256(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
