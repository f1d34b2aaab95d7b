use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;

use crate::bundle::Bundle;
use crate::errors::BundlerError;
use crate::repository::{archive, BundleRepository};
use crate::settings::Settings;

/// Stores bundles in an S3-compatible object store. The previous live
/// object is preserved as a timestamped backup before every overwrite, so
/// the external decision engine can always fall back to an earlier bundle.
#[derive(Debug, Clone)]
pub struct MinioRepository {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl MinioRepository {
    pub fn new(settings: &Settings) -> Self {
        let credentials = Credentials::new(
            settings.minio_access_key.clone(),
            settings.minio_secret_key.clone(),
            None,
            None,
            "settings",
        );
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(settings.endpoint_url())
            .credentials_provider(credentials)
            .force_path_style(true)
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(Duration::from_secs(settings.minio_timeout))
                    .build(),
            )
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(config),
            bucket: settings.bucket_name.clone(),
            prefix: settings.minio_bundle_prefix.clone(),
        }
    }

    /// Ensure the bucket exists; create it with an anonymous-read policy
    /// when absent, so the decision engine can pull bundles without
    /// credentials. Safe to call repeatedly.
    pub async fn ensure_bucket(&self) -> Result<(), BundlerError> {
        match self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) if e.as_service_error().map(|s| s.is_not_found()) == Some(true) => {}
            Err(e) => return Err(unavailable(e)),
        }

        self.client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(unavailable)?;

        let policy = serde_json::json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "AWS": ["*"] },
                "Action": ["s3:GetBucketLocation", "s3:ListBucket", "s3:GetObject"],
                "Resource": [
                    format!("arn:aws:s3:::{}", self.bucket),
                    format!("arn:aws:s3:::{}/*", self.bucket),
                ],
            }],
        });
        self.client
            .put_bucket_policy()
            .bucket(&self.bucket)
            .policy(policy.to_string())
            .send()
            .await
            .map_err(unavailable)?;

        tracing::info!(bucket = %self.bucket, "created bucket with public-read policy");
        Ok(())
    }

    async fn object_exists(&self, key: &str) -> Result<bool, BundlerError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map(|s| s.is_not_found()) == Some(true) => Ok(false),
            Err(e) => Err(unavailable(e)),
        }
    }

    /// Server-side copy of the current object to its timestamped backup name.
    async fn backup(&self, key: &str) -> Result<(), BundlerError> {
        let timestamp = chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let backup_key = format!("{}-{}.tar.gz", self.prefix, timestamp);

        self.client
            .copy_object()
            .copy_source(format!("{}/{}", self.bucket, key))
            .bucket(&self.bucket)
            .key(&backup_key)
            .send()
            .await
            .map_err(unavailable)?;

        tracing::info!(from = %key, to = %backup_key, "backed up previous bundle");
        Ok(())
    }
}

fn unavailable<E>(e: E) -> BundlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    BundlerError::RepositoryUnavailable(DisplayErrorContext(&e).to_string())
}

#[async_trait]
impl BundleRepository for MinioRepository {
    async fn get(&self, key: &str) -> Result<Bundle, BundlerError> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.as_service_error().map(|s| s.is_no_such_key()) == Some(true) => {
                return Err(BundlerError::NotFound(format!("object `{key}`")));
            }
            Err(e) => return Err(unavailable(e)),
        };

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| BundlerError::RepositoryUnavailable(e.to_string()))?
            .into_bytes();

        tokio::task::spawn_blocking(move || archive::decode(bytes.as_ref()))
            .await
            .map_err(|e| BundlerError::RepositoryUnavailable(e.to_string()))?
    }

    async fn save(&self, key: &str, bundle: &Bundle) -> Result<(), BundlerError> {
        if self.object_exists(key).await? {
            self.backup(key).await?;
        }

        // Stage the archive in a temporary file and stream it to the store,
        // so the encoded form never sits in memory next to the bundle.
        let staging = tempfile::NamedTempFile::new()?;
        let staging_path = staging.path().to_path_buf();
        let encoded = bundle.clone();
        tokio::task::spawn_blocking(move || archive::encode_to_path(&encoded, &staging_path))
            .await
            .map_err(|e| BundlerError::RepositoryUnavailable(e.to_string()))??;

        let body = ByteStream::from_path(staging.path())
            .await
            .map_err(|e| BundlerError::RepositoryUnavailable(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/gzip")
            .body(body)
            .send()
            .await
            .map_err(unavailable)?;

        tracing::info!(bucket = %self.bucket, key = %key, "bundle uploaded");
        Ok(())
    }
}
