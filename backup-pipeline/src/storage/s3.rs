//! S3 (or S3-compatible) cold storage.

use super::ColdStorage;
use crate::config::S3Config;
use crate::utils::{BackupError, Result};
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::path::Path;

pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

fn storage_error(action: &str, key: &str, e: impl std::error::Error) -> BackupError {
    BackupError::Storage(format!("{action} {key} failed: {}", DisplayErrorContext(e)))
}

impl S3Storage {
    /// Wrap an already configured client.
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from config. Static credentials are used when both keys
    /// are set, otherwise the default AWS provider chain applies.
    pub async fn from_config(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(aws_credential_types::Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "backup-pipeline",
            ));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let sdk_config = loader.load().await;

        // S3-compatible endpoints (MinIO and friends) want path-style addressing
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint.is_some())
            .build();

        Self::new(S3Client::from_conf(s3_config), config.bucket.clone())
    }
}

#[async_trait]
impl ColdStorage for S3Storage {
    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    async fn upload(&self, key: &str, local: &Path) -> Result<()> {
        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| storage_error("reading", &local.display().to_string(), e))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|e| storage_error("upload of", key, e))?;
        Ok(())
    }

    async fn download(&self, key: &str, local: &Path) -> Result<()> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    BackupError::NotFound(format!("Object {key}"))
                } else {
                    storage_error("download of", key, e)
                }
            })?;

        let mut body = object.body.into_async_read();
        let mut file = tokio::fs::File::create(local).await?;
        let copied = async {
            tokio::io::copy(&mut body, &mut file).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = copied {
            drop(file);
            let _ = tokio::fs::remove_file(local).await;
            return Err(storage_error("download of", key, e));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| storage_error("delete of", key, e))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(storage_error("lookup of", key, e)),
        }
    }
}
