//! One JSON record per backup under `{storage root}/metadata/`.

use super::artifact::is_safe_id;
use crate::models::BackupMetadata;
use crate::utils::Result;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    /// Store rooted at `dir`; nothing is created until the first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the `{id}.json` records.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &str) -> Option<PathBuf> {
        is_safe_id(id).then(|| self.dir.join(format!("{id}.json")))
    }

    /// Write the record atomically (temp file + rename).
    pub async fn save(&self, metadata: &BackupMetadata) -> Result<()> {
        let path = self.path(&metadata.id).ok_or_else(|| {
            crate::utils::BackupError::Configuration(format!("unsafe backup id '{}'", metadata.id))
        })?;
        let tmp = self.dir.join(format!(".{}.json.tmp", metadata.id));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(metadata)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// `None` when no such record exists.
    pub async fn read(&self, id: &str) -> Result<Option<BackupMetadata>> {
        let Some(path) = self.path(id) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Records newest first. Unreadable entries are skipped, a missing
    /// directory yields an empty list.
    pub async fn list(&self, limit: Option<usize>) -> Vec<BackupMetadata> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(dir = %self.dir.display(), error = %e, "Cannot read metadata directory");
                }
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Stopped reading metadata directory");
                    break;
                }
            };
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            match self.read(id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(backup_id = %id, error = %e, "Skipping unreadable metadata"),
            }
        }

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        records
    }

    /// Remove a record. `false` if there was none.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let Some(path) = self.path(id) else {
            return Ok(false);
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
