//! Cron-driven full backups followed by a retention sweep.

use crate::models::{BackupType, CreateBackupRequest};
use crate::service::BackupService;
use crate::utils::BackupError;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    service: Arc<BackupService>,
}

impl BackupScheduler {
    pub async fn new(service: Arc<BackupService>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            service,
        })
    }

    /// Register the recurring backup. `cron_expression` has six fields,
    /// seconds first.
    pub async fn schedule_backups(&self, cron_expression: &str) -> anyhow::Result<()> {
        let service = self.service.clone();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let service = service.clone();
            Box::pin(async move {
                run_scheduled(&service).await;
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(cron = %cron_expression, "Backup schedule registered");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}

/// One scheduled tick. A tick that finds the slot taken is skipped.
pub async fn run_scheduled(service: &BackupService) {
    match service
        .create_backup(BackupType::Full, CreateBackupRequest::default())
        .await
    {
        Ok(id) => tracing::info!(backup_id = %id, "Scheduled backup finished"),
        Err(BackupError::Concurrency(active)) => {
            tracing::warn!(active_job = %active, "Skipping scheduled backup: another job is running");
            return;
        }
        Err(BackupError::ShuttingDown) => return,
        Err(e) => tracing::error!(error = %e, "Scheduled backup failed"),
    }

    let removed = service.cleanup_old_backups().await;
    if removed > 0 {
        tracing::info!(removed, "Old backups cleaned up");
    }
}
