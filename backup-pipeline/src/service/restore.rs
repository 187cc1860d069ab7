use super::BackupService;
use crate::db::restore_command;
use crate::models::{JobKind, JobStage, RestoreRequest};
use crate::storage::artifact_file_name;
use crate::transform::{decompress_file, decrypt_file, filter_tables, sha256_file};
use crate::utils::{BackupError, Result};
use std::path::Path;
use tracing::{info, warn};

impl BackupService {
    /// Restore a backup into the configured (or requested) database. Returns
    /// the restore job id.
    pub async fn restore_backup(&self, request: RestoreRequest) -> Result<String> {
        let guard = self.begin(JobKind::Restore)?;
        let job_id = guard.job_id().to_string();
        info!(
            job_id = %job_id,
            backup_id = %request.backup_id,
            dry_run = request.dry_run,
            "Starting restore"
        );

        let work_dir = self.root().join(format!(".restore-{job_id}"));
        let result = self.run_restore(&job_id, &request, &work_dir).await;

        self.jobs.update(&job_id, |job| job.advance(JobStage::Cleanup, 98));
        match tokio::fs::remove_dir_all(&work_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(job_id = %job_id, error = %e, "Could not remove restore work directory"),
        }

        match result {
            Ok(()) => {
                let now = self.clock.now();
                if !self.jobs.update(&job_id, |job| job.complete(now)).unwrap_or(false) {
                    warn!(job_id = %job_id, "Restore finished after its job was ended");
                    return Err(BackupError::ShuttingDown);
                }
                info!(job_id = %job_id, backup_id = %request.backup_id, "Restore completed");
                Ok(job_id)
            }
            Err(e) => {
                self.fail_job(&job_id, &e);
                Err(e)
            }
        }
    }

    async fn run_restore(&self, job_id: &str, request: &RestoreRequest, work_dir: &Path) -> Result<()> {
        self.advance(job_id, JobStage::ResolvingMetadata, 5)?;
        let metadata = self
            .metadata
            .read(&request.backup_id)
            .await?
            .ok_or_else(|| BackupError::NotFound(format!("Backup {}", request.backup_id)))?;

        self.advance(job_id, JobStage::PreparingArtifact, 15)?;
        let file_name = artifact_file_name(&metadata.id, metadata.compression, metadata.encryption);
        let artifact = self.root().join(&file_name);
        if !tokio::fs::try_exists(&artifact).await? {
            if !metadata.location.uses_remote() {
                return Err(BackupError::NotFound(format!("Artifact {file_name}")));
            }
            let object = self.remote_key(&file_name);
            info!(job_id = %job_id, object = %object, "Fetching artifact from cold storage");
            // only a complete download is moved to the artifact path
            tokio::fs::create_dir_all(work_dir).await?;
            let part = work_dir.join(&file_name);
            self.cold_storage()?.download(&object, &part).await?;
            tokio::fs::rename(&part, &artifact).await?;
        }

        if request.validate_integrity {
            self.advance(job_id, JobStage::Validating, 30)?;
            let actual = sha256_file(&artifact).await?;
            if actual != metadata.checksum {
                return Err(BackupError::Integrity {
                    expected: metadata.checksum,
                    actual,
                });
            }
            info!(job_id = %job_id, "Artifact checksum verified");
        }

        if request.dry_run {
            self.advance(job_id, JobStage::DryRun, 90)?;
            info!(job_id = %job_id, "Dry run, target database left untouched");
            return Ok(());
        }

        let key = match (metadata.encryption, &self.key) {
            (false, _) => None,
            (true, Some(key)) => Some(key),
            (true, None) => {
                return Err(BackupError::Configuration(format!(
                    "backup {} is encrypted but BACKUP_ENCRYPTION_KEY is not set",
                    metadata.id
                )))
            }
        };

        tokio::fs::create_dir_all(work_dir).await?;
        let mut current = artifact;

        if let Some(key) = key {
            self.advance(job_id, JobStage::Decrypting, 40)?;
            let next = work_dir.join(artifact_file_name(&metadata.id, metadata.compression, false));
            decrypt_file(key, &current, &next).await?;
            current = next;
        }

        if metadata.compression {
            self.advance(job_id, JobStage::Decompressing, 55)?;
            let next = work_dir.join(artifact_file_name(&metadata.id, false, false));
            decompress_file(&current, &next).await?;
            current = next;
        }

        if let Some(tables) = request.tables.as_ref().filter(|t| !t.is_empty()) {
            self.advance(job_id, JobStage::FilteringTables, 65)?;
            let next = work_dir.join(format!("{}.filtered.sql", metadata.id));
            filter_tables(&current, &next, tables).await?;
            current = next;
        }

        self.advance(job_id, JobStage::Restoring, 70)?;
        let target = request
            .target_database
            .as_deref()
            .unwrap_or(&self.config.database.name);
        let spec = restore_command(&self.config.restore_bin, &self.config.database, target);
        self.runner
            .run_from_file(&spec, &current, self.shutdown_token.child_token())
            .await?;
        info!(job_id = %job_id, target = %target, "SQL applied");
        Ok(())
    }
}
