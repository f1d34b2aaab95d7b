use serde::{Deserialize, Serialize};

use crate::errors::BundlerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Object store host:port, e.g. "minio:9000"
    pub minio_server: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    /// Use TLS when talking to the object store
    pub minio_secure: bool,
    pub bucket_name: String,
    /// Object-name prefix; the live bundle is `<prefix>-LATEST.tar.gz`
    pub minio_bundle_prefix: String,
    /// Per-operation timeout against the object store, in seconds
    pub minio_timeout: u64,
    /// HTTP listener port
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            minio_server: "localhost:9000".to_string(),
            minio_access_key: "minioadmin".to_string(),
            minio_secret_key: "minioadmin".to_string(),
            minio_secure: false,
            bucket_name: "bundles".to_string(),
            minio_bundle_prefix: "bundle".to_string(),
            minio_timeout: 5,
            port: 8080,
        }
    }
}

impl Settings {
    /// Load settings from defaults overridden by the process environment
    /// (MINIO_SERVER, MINIO_ACCESS_KEY, MINIO_SECRET_KEY, MINIO_SECURE,
    /// BUCKET_NAME, MINIO_BUNDLE_PREFIX, MINIO_TIMEOUT, PORT).
    pub fn load() -> Result<Self, BundlerError> {
        let defaults = Settings::default();
        let cfg = config::Config::builder()
            .set_default("minio_server", defaults.minio_server)?
            .set_default("minio_access_key", defaults.minio_access_key)?
            .set_default("minio_secret_key", defaults.minio_secret_key)?
            .set_default("minio_secure", defaults.minio_secure)?
            .set_default("bucket_name", defaults.bucket_name)?
            .set_default("minio_bundle_prefix", defaults.minio_bundle_prefix)?
            .set_default("minio_timeout", defaults.minio_timeout as i64)?
            .set_default("port", defaults.port as i64)?
            .add_source(config::Environment::default())
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// Full endpoint URL for the object store.
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.minio_secure { "https" } else { "http" };
        format!("{}://{}", scheme, self.minio_server)
    }

    /// Object name of the live bundle.
    pub fn latest_object(&self) -> String {
        format!("{}-LATEST.tar.gz", self.minio_bundle_prefix)
    }

    /// Object name for a timestamped backup of the live bundle.
    pub fn backup_object(&self, timestamp: &str) -> String {
        format!("{}-{}.tar.gz", self.minio_bundle_prefix, timestamp)
    }
}
