use anyhow::Result;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_credential_types::{provider::SharedCredentialsProvider, Credentials};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use base64::{engine::general_purpose, Engine as _};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::settings::S3Settings;

#[cfg(test)]
use mockall::automock;

/// Fresh caller-assigned storage id. Content hashes are recorded next to the
/// id, never used as the key.
pub fn new_storage_key() -> String {
    format!("files/{}", uuid::Uuid::new_v4())
}

/// Where package file bytes live. Keys are opaque to callers.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
}

pub struct S3Storage {
    client: Client,
    bucket: String,
}

fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim_matches('"').trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Custom endpoints (MinIO, R2, ...) generally need path-style addressing.
fn resolve_force_path_style(force_path_style: bool, endpoint: Option<&str>) -> bool {
    force_path_style || endpoint.map(|e| !e.trim().is_empty()).unwrap_or(false)
}

impl S3Storage {
    pub async fn new(settings: &S3Settings) -> Self {
        let region_provider =
            RegionProviderChain::first_try(aws_types::region::Region::new(settings.region.clone()))
                .or_default_provider();

        let mut config_loader =
            aws_config::defaults(BehaviorVersion::latest()).region(region_provider);

        if let (Some(ak), Some(sk)) = (&settings.access_key_id, &settings.secret_access_key) {
            let creds = Credentials::new(ak, sk, None, None, "config");
            config_loader =
                config_loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }

        if let Some(ep) = settings.endpoint.as_deref() {
            config_loader = config_loader.endpoint_url(normalize_endpoint(ep));
        }

        let config = config_loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(resolve_force_path_style(
                settings.force_path_style,
                settings.endpoint.as_deref(),
            ))
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: settings.bucket.clone(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Creates the bucket unless it already exists. Returns whether it was
    /// created.
    pub async fn ensure_bucket(&self) -> Result<bool> {
        if self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok()
        {
            return Ok(false);
        }

        match self.client.create_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let message = format!("{:?}", e);
                if message.contains("BucketAlreadyOwnedByYou")
                    || message.contains("BucketAlreadyExists")
                {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn put_once(&self, key: &str, body: &[u8], base64_md5: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body.to_vec()))
            .content_md5(base64_md5)
            .send()
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStorage for S3Storage {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let md5_digest = md5::compute(&body);
        let base64_md5 = general_purpose::STANDARD.encode(md5_digest.0);

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.put_once(key, &body, &base64_md5).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempts >= 3 {
                        return Err(e);
                    }
                    tracing::warn!(attempt = attempts, key, error = ?e, "Blob upload failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(500 * attempts as u64))
                        .await;
                }
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let obj = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;
        Ok(obj.body.collect().await?.into_bytes().to_vec())
    }
}

/// Process-local storage for tests and single-node development.
#[derive(Default)]
pub struct MemoryStorage {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl BlobStorage for MemoryStorage {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        self.objects.write().await.insert(key.to_string(), body);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("blob not found: {}", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_normalized_to_a_url() {
        assert_eq!(normalize_endpoint("s3.example.com"), "https://s3.example.com");
        assert_eq!(
            normalize_endpoint("\"http://localhost:9000\""),
            "http://localhost:9000"
        );
    }

    #[test]
    fn custom_endpoint_forces_path_style() {
        assert!(resolve_force_path_style(false, Some("http://minio:9000")));
        assert!(resolve_force_path_style(true, None));
        assert!(!resolve_force_path_style(false, None));
        assert!(!resolve_force_path_style(false, Some("  ")));
    }

    #[test]
    fn storage_keys_are_unique() {
        let a = new_storage_key();
        assert!(a.starts_with("files/"));
        assert_ne!(a, new_storage_key());
    }

    #[tokio::test]
    async fn memory_storage_round_trips_and_reports_missing() -> Result<()> {
        let storage = MemoryStorage::new();
        storage.put("k", b"v".to_vec()).await?;
        assert_eq!(storage.get("k").await?, b"v".to_vec());
        assert!(storage.get("missing").await.is_err());
        assert_eq!(storage.len().await, 1);
        Ok(())
    }
}
