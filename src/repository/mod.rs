pub mod archive;
pub mod fs;
pub mod minio;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::bundle::Bundle;
use crate::errors::BundlerError;
use crate::settings::Settings;

pub use fs::FsRepository;
pub use minio::MinioRepository;

/// Where a bundle lives. `minio://latest` is an alias for the configured
/// `<prefix>-LATEST.tar.gz` object; a bare path is a filesystem location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Minio { key: String },
    File(PathBuf),
}

impl Location {
    pub fn parse(input: &str, settings: &Settings) -> Self {
        if let Some(rest) = input.strip_prefix("minio://") {
            let key = if rest == "latest" {
                settings.latest_object()
            } else {
                rest.to_string()
            };
            Location::Minio { key }
        } else if let Some(rest) = input.strip_prefix("file://") {
            Location::File(PathBuf::from(rest))
        } else {
            Location::File(PathBuf::from(input))
        }
    }
}

/// Read and write bundles against a backing store.
#[async_trait]
pub trait BundleRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Bundle, BundlerError>;
    async fn save(&self, key: &str, bundle: &Bundle) -> Result<(), BundlerError>;
}

/// Open the repository behind `location`, returning it together with the
/// key the bundle is addressed by. Object-store locations also ensure the
/// bucket exists.
pub async fn open(
    location: &Location,
    settings: &Settings,
) -> Result<(Box<dyn BundleRepository>, String), BundlerError> {
    match location {
        Location::File(path) => Ok((
            Box::new(FsRepository::new()),
            path.to_string_lossy().into_owned(),
        )),
        Location::Minio { key } => {
            let repo = MinioRepository::new(settings);
            repo.ensure_bucket().await?;
            Ok((Box::new(repo), key.clone()))
        }
    }
}
