use std::path::Path;

use async_trait::async_trait;

use crate::bundle::Bundle;
use crate::errors::BundlerError;
use crate::repository::{archive, BundleRepository};

/// Stores bundles as gzipped tar files on the local filesystem. Writes go
/// through a temporary file in the target directory followed by an atomic
/// rename, so readers never observe a half-written archive.
#[derive(Debug, Default, Clone)]
pub struct FsRepository;

impl FsRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BundleRepository for FsRepository {
    async fn get(&self, path: &str) -> Result<Bundle, BundlerError> {
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            if !Path::new(&path).exists() {
                return Err(BundlerError::NotFound(format!("bundle at `{path}`")));
            }
            let file = std::fs::File::open(&path)?;
            archive::decode(file)
        })
        .await
        .map_err(|e| BundlerError::RepositoryUnavailable(e.to_string()))?
    }

    async fn save(&self, path: &str, bundle: &Bundle) -> Result<(), BundlerError> {
        let path = path.to_string();
        let bundle = bundle.clone();
        tokio::task::spawn_blocking(move || {
            let target = Path::new(&path);
            let dir = target.parent().filter(|p| !p.as_os_str().is_empty());
            if let Some(dir) = dir {
                std::fs::create_dir_all(dir)?;
            }

            let tmp = match dir {
                Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
                None => tempfile::NamedTempFile::new_in(".")?,
            };
            archive::encode(&bundle, tmp.as_file())?;
            tmp.as_file().sync_all()?;
            tmp.persist(target).map_err(|e| e.error)?;

            tracing::debug!(path = %path, "bundle written");
            Ok(())
        })
        .await
        .map_err(|e| BundlerError::RepositoryUnavailable(e.to_string()))?
    }
}
