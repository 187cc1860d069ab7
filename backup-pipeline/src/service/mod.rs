//! The backup service: owns the job slot and sequences dump, transform,
//! upload and metadata persistence (and the reverse for restores).

mod backup;
mod restore;
mod retention;
mod stats;

#[cfg(test)]
mod tests;

pub use retention::is_expired;
pub use stats::compute_stats;

use crate::config::BackupConfig;
use crate::db::{DatabaseProbe, MysqlCliProbe};
use crate::jobs::{JobRegistry, SlotGuard};
use crate::models::{BackupMetadata, BackupStats, Job, JobKind, JobStage};
use crate::process::{ProcessRunner, TokioProcessRunner};
use crate::storage::{artifact_file_name, artifact_variants, remote_key, ColdStorage, MetadataStore, S3Storage};
use crate::transform::ArtifactKey;
use crate::utils::{BackupError, Clock, Result, SystemClock};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Reason recorded on a job that outlived the shutdown timeout.
pub const SHUTDOWN_TIMEOUT_REASON: &str = "Service shutdown timeout";

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct BackupService {
    config: BackupConfig,
    database: Arc<dyn DatabaseProbe>,
    runner: Arc<dyn ProcessRunner>,
    cold: Option<Arc<dyn ColdStorage>>,
    clock: Arc<dyn Clock>,
    metadata: MetadataStore,
    jobs: Arc<JobRegistry>,
    key: Option<ArtifactKey>,
    closing: AtomicBool,
    /// Cancelled on shutdown; job tokens are children of it.
    shutdown_token: CancellationToken,
}

impl BackupService {
    /// Service without cold storage, using the system clock. The artifact key is
    /// derived from the configured passphrase once, here.
    pub fn new(config: BackupConfig, database: Arc<dyn DatabaseProbe>, runner: Arc<dyn ProcessRunner>) -> Self {
        let key = config.encryption_key.as_deref().map(ArtifactKey::from_passphrase);
        Self {
            metadata: MetadataStore::new(config.metadata_dir()),
            config,
            database,
            runner,
            cold: None,
            clock: Arc::new(SystemClock),
            jobs: Arc::new(JobRegistry::new()),
            key,
            closing: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Backend used for the `s3` and `both` storage modes.
    pub fn with_cold_storage(mut self, cold: Arc<dyn ColdStorage>) -> Self {
        self.cold = Some(cold);
        self
    }

    /// Replace the clock used for job times, ids and retention.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Production wiring: external mysql tools and, when configured, S3.
    pub async fn from_config(config: BackupConfig) -> Result<Self> {
        config.validate()?;
        let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner::new());
        let probe = MysqlCliProbe::new(Arc::clone(&runner), config.restore_bin.clone(), config.database.clone());
        let s3 = match &config.s3 {
            Some(s3) => Some(S3Storage::from_config(s3).await),
            None => None,
        };

        let mut service = Self::new(config, Arc::new(probe), runner);
        if let Some(s3) = s3 {
            service = service.with_cold_storage(Arc::new(s3));
        }
        Ok(service)
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    fn root(&self) -> &Path {
        &self.config.local_path
    }

    /// Prepare the storage root and metadata directory.
    pub async fn initialize(&self) -> Result<()> {
        self.config.validate()?;
        if self.config.storage.uses_remote() && self.cold.is_none() {
            return Err(BackupError::Configuration(format!(
                "storage mode '{}' needs a cold storage backend",
                self.config.storage
            )));
        }

        for dir in [self.root(), self.metadata.dir()] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                BackupError::Configuration(format!("storage root {} is unusable: {}", dir.display(), e))
            })?;
        }

        info!(
            root = %self.root().display(),
            storage = %self.config.storage,
            cold = self.cold.as_ref().map(|c| c.describe()).unwrap_or_default(),
            compression = self.config.compression_enabled(),
            encryption = self.key.is_some(),
            retention_days = self.config.retention_days,
            "Backup service initialized"
        );
        Ok(())
    }

    /// Claim the single job slot and mark the new job running.
    fn begin(&self, kind: JobKind) -> Result<SlotGuard> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(BackupError::ShuttingDown);
        }
        let guard = self.jobs.try_acquire(kind, self.clock.now())?;
        self.jobs.update(guard.job_id(), |job| job.start());
        Ok(guard)
    }

    /// Move the job to its next stage. Fails once the job was ended from
    /// outside (shutdown timeout) or the service is stopping, so no further
    /// work is done on its behalf.
    fn advance(&self, job_id: &str, stage: JobStage, progress: u8) -> Result<()> {
        let live = self
            .jobs
            .update(job_id, |job| {
                if job.status.is_terminal() {
                    return false;
                }
                job.advance(stage, progress);
                true
            })
            .unwrap_or(false);
        if !live || self.shutdown_token.is_cancelled() {
            warn!(job_id = %job_id, ?stage, "Job ended externally, abandoning");
            return Err(BackupError::ShuttingDown);
        }
        info!(job_id = %job_id, ?stage, progress, "Job stage");
        Ok(())
    }

    fn fail_job(&self, job_id: &str, err: &BackupError) {
        self.jobs.update(job_id, |job| job.fail(err.to_string(), self.clock.now()));
        error!(job_id = %job_id, error = %err, "Job failed");
    }

    fn cold_storage(&self) -> Result<&Arc<dyn ColdStorage>> {
        self.cold
            .as_ref()
            .ok_or_else(|| BackupError::Configuration("no cold storage backend configured".into()))
    }

    fn remote_key(&self, file_name: &str) -> String {
        let prefix = self.config.s3.as_ref().map(|s3| s3.prefix.as_str()).unwrap_or("");
        remote_key(prefix, file_name)
    }

    /// Snapshot of a tracked job, running or recently finished.
    pub fn get_job_status(&self, job_id: &str) -> Option<Job> {
        self.jobs.get(job_id)
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        self.jobs.list()
    }

    /// Newest first; never fails, unreadable records are skipped.
    pub async fn list_backups(&self, limit: Option<usize>) -> Vec<BackupMetadata> {
        self.metadata.list(limit).await
    }

    /// Aggregates over every readable backup record.
    pub async fn get_backup_stats(&self) -> BackupStats {
        compute_stats(&self.list_backups(None).await)
    }

    /// Delete a backup's artifacts and record. `false` if the id is unknown.
    pub async fn delete_backup(&self, backup_id: &str) -> Result<bool> {
        let Some(metadata) = self.metadata.read(backup_id).await? else {
            return Ok(false);
        };
        self.remove_backup(&metadata).await?;
        info!(backup_id = %backup_id, "Backup deleted");
        Ok(true)
    }

    /// Local variants, then the remote object, then the record last so a
    /// failed step leaves something to retry.
    async fn remove_backup(&self, metadata: &BackupMetadata) -> Result<()> {
        for name in artifact_variants(&metadata.id) {
            match tokio::fs::remove_file(self.root().join(&name)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if metadata.location.uses_remote() {
            let name = artifact_file_name(&metadata.id, metadata.compression, metadata.encryption);
            self.cold_storage()?.delete(&self.remote_key(&name)).await?;
        }

        self.metadata.delete(&metadata.id).await?;
        Ok(())
    }

    /// Stop accepting jobs and wait for the running one, up to the configured
    /// timeout. A job still running then is marked failed and its external
    /// process is terminated.
    pub async fn shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);

        if let Some(active) = self.jobs.active() {
            info!(job_id = %active.id, "Waiting for running job before shutdown");
            let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
            loop {
                let finished = self
                    .jobs
                    .get(&active.id)
                    .map_or(true, |job| job.status.is_terminal());
                if finished {
                    info!(job_id = %active.id, "Running job finished");
                    break;
                }

                let now = tokio::time::Instant::now();
                if now >= deadline {
                    warn!(job_id = %active.id, "Job did not finish in time, forcing failure");
                    self.jobs.force_fail(&active.id, SHUTDOWN_TIMEOUT_REASON, self.clock.now());
                    break;
                }
                tokio::time::sleep(SHUTDOWN_POLL_INTERVAL.min(deadline - now)).await;
            }
        }

        self.shutdown_token.cancel();
        info!("Backup service stopped");
    }
}
