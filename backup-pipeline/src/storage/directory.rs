use super::ColdStorage;
use crate::utils::{BackupError, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// Cold storage on a mounted filesystem (NFS share, external disk, ...).
pub struct DirectoryStorage {
    root: PathBuf,
}

impl DirectoryStorage {
    /// Objects live under `root`, keys map to relative paths.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(BackupError::Storage(format!("invalid object key '{key}'")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ColdStorage for DirectoryStorage {
    fn describe(&self) -> String {
        format!("dir://{}", self.root.display())
    }

    async fn upload(&self, key: &str, local: &Path) -> Result<()> {
        let target = self.resolve(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local, &target).await?;
        Ok(())
    }

    async fn download(&self, key: &str, local: &Path) -> Result<()> {
        let source = self.resolve(key)?;
        if !tokio::fs::try_exists(&source).await? {
            return Err(BackupError::NotFound(format!("Object {key}")));
        }
        tokio::fs::copy(&source, local).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.resolve(key)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resolve(key)?).await?)
    }
}
