use super::BackupService;
use crate::db::dump_command;
use crate::models::{BackupMetadata, BackupStatus, BackupType, CreateBackupRequest, JobKind, JobStage};
use crate::process::ProgressCallback;
use crate::storage::{artifact_file_name, artifact_path};
use crate::transform::{compress_file, encrypt_file, sha256_file};
use crate::utils::format::{format_bytes, format_duration_ms};
use crate::utils::{BackupError, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Dump progress moves from 10 to 50, one point per MiB written.
const DUMP_PROGRESS_START: u8 = 10;
const DUMP_PROGRESS_SPAN: u64 = 40;
const BYTES_PER_PERCENT: u64 = 1024 * 1024;

const FALLBACK_COMPRESSION_LEVEL: u32 = 6;

fn dump_progress(bytes: u64) -> u8 {
    DUMP_PROGRESS_START + (bytes / BYTES_PER_PERCENT).min(DUMP_PROGRESS_SPAN) as u8
}

/// Everything a backup wrote so far, removed if it does not complete.
#[derive(Default)]
struct Leftovers {
    local: Vec<PathBuf>,
    remote: Option<String>,
}

impl BackupService {
    /// Run a backup to completion and return its id (which is also the job id).
    pub async fn create_backup(&self, backup_type: BackupType, request: CreateBackupRequest) -> Result<String> {
        let guard = self.begin(JobKind::Backup)?;
        let job_id = guard.job_id().to_string();
        let started_at = self.clock.now();
        let started = Instant::now();
        info!(job_id = %job_id, %backup_type, "Starting backup");

        let mut leftovers = Leftovers::default();
        match self
            .run_backup(&job_id, backup_type, &request, started_at, started, &mut leftovers)
            .await
        {
            Ok(metadata) => {
                let now = self.clock.now();
                let completed = self
                    .jobs
                    .update(&job_id, |job| {
                        let done = job.complete(now);
                        if done {
                            job.metadata = Some(metadata.clone());
                        }
                        done
                    })
                    .unwrap_or(false);
                if !completed {
                    // ended by shutdown while the record was being written
                    warn!(job_id = %job_id, "Backup outlived its job, discarding");
                    if let Err(e) = self.metadata.delete(&job_id).await {
                        warn!(job_id = %job_id, error = %e, "Could not remove backup record");
                    }
                    self.discard(&job_id, leftovers).await;
                    return Err(BackupError::ShuttingDown);
                }
                info!(
                    job_id = %job_id,
                    size = %format_bytes(metadata.size),
                    elapsed = %format_duration_ms(metadata.duration.unwrap_or_default()),
                    location = %metadata.location,
                    "Backup completed"
                );
                Ok(job_id)
            }
            Err(e) => {
                self.fail_job(&job_id, &e);
                self.discard(&job_id, leftovers).await;
                Err(e)
            }
        }
    }

    async fn run_backup(
        &self,
        job_id: &str,
        backup_type: BackupType,
        request: &CreateBackupRequest,
        started_at: DateTime<Utc>,
        started: Instant,
        leftovers: &mut Leftovers,
    ) -> Result<BackupMetadata> {
        let compress = request.compress.unwrap_or(self.config.compression_enabled());
        let encrypt = request.encrypt.unwrap_or(self.key.is_some());
        let location = request.storage.unwrap_or(self.config.storage);
        let key = match (encrypt, &self.key) {
            (false, _) => None,
            (true, Some(key)) => Some(key),
            (true, None) => {
                return Err(BackupError::Configuration(
                    "encryption requested but BACKUP_ENCRYPTION_KEY is not set".into(),
                ))
            }
        };
        if location.uses_remote() {
            self.cold_storage()?;
        }

        self.advance(job_id, JobStage::VerifyingConnectivity, 5)?;
        if !self.database.ping().await {
            let db = &self.config.database;
            return Err(BackupError::Connectivity(format!("{}:{} did not respond", db.host, db.port)));
        }

        self.advance(job_id, JobStage::ResolvingTables, 8)?;
        let explicit = request.tables.clone().filter(|t| !t.is_empty());
        let tables = match &explicit {
            Some(tables) => tables.clone(),
            None => self.database.list_tables(&self.config.database.name).await?,
        };

        self.advance(job_id, JobStage::Dumping, DUMP_PROGRESS_START)?;
        let root = self.root();
        let mut current = artifact_path(root, job_id, false, false);
        leftovers.local.push(current.clone());
        let spec = dump_command(
            &self.config.dump_bin,
            &self.config.database,
            &self.config.database.name,
            explicit.as_deref().unwrap_or_default(),
        );
        let jobs = Arc::clone(&self.jobs);
        let progress_id = job_id.to_string();
        let progress: ProgressCallback = Arc::new(move |bytes| {
            jobs.update(&progress_id, |job| job.raise_progress(dump_progress(bytes)));
        });
        let dumped = self
            .runner
            .run_to_file(&spec, &current, progress, self.shutdown_token.child_token())
            .await?;
        info!(job_id = %job_id, size = %format_bytes(dumped), tables = tables.len(), "Dump finished");

        if compress {
            self.advance(job_id, JobStage::Compressing, 55)?;
            let level = match self.config.compression_level {
                0 => FALLBACK_COMPRESSION_LEVEL,
                level => level,
            };
            let next = artifact_path(root, job_id, true, false);
            leftovers.local.push(next.clone());
            compress_file(&current, &next, level).await?;
            tokio::fs::remove_file(&current).await?;
            current = next;
        }

        if let Some(key) = key {
            self.advance(job_id, JobStage::Encrypting, 65)?;
            let next = artifact_path(root, job_id, compress, true);
            leftovers.local.push(next.clone());
            encrypt_file(key, &current, &next).await?;
            tokio::fs::remove_file(&current).await?;
            current = next;
        }

        self.advance(job_id, JobStage::Checksumming, 75)?;
        let checksum = sha256_file(&current).await?;
        let size = tokio::fs::metadata(&current).await?.len();

        if location.uses_remote() {
            self.advance(job_id, JobStage::Uploading, 85)?;
            let object = self.remote_key(&artifact_file_name(job_id, compress, encrypt));
            leftovers.remote = Some(object.clone());
            self.cold_storage()?.upload(&object, &current).await?;
            info!(job_id = %job_id, object = %object, "Artifact uploaded");
            if !location.keeps_local() {
                tokio::fs::remove_file(&current).await?;
            }
        }

        self.advance(job_id, JobStage::PersistingMetadata, 95)?;
        let metadata = BackupMetadata {
            id: job_id.to_string(),
            timestamp: started_at,
            backup_type,
            size,
            checksum,
            compression: compress,
            encryption: encrypt,
            location,
            status: BackupStatus::Completed,
            tables,
            duration: Some(started.elapsed().as_millis() as u64),
        };
        self.metadata.save(&metadata).await?;
        Ok(metadata)
    }

    /// Best-effort removal of a failed backup's partial output.
    async fn discard(&self, job_id: &str, leftovers: Leftovers) {
        for path in leftovers.local {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(job_id = %job_id, path = %path.display(), error = %e, "Could not remove partial artifact"),
            }
        }
        if let (Some(object), Some(cold)) = (leftovers.remote, &self.cold) {
            if let Err(e) = cold.delete(&object).await {
                warn!(job_id = %job_id, object = %object, error = %e, "Could not remove uploaded artifact");
            }
        }
    }
}
