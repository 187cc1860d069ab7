use super::BackupService;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

/// A backup expires once it is strictly older than `now - retention_days`.
/// A window reaching past the representable calendar expires nothing.
pub fn is_expired(timestamp: DateTime<Utc>, now: DateTime<Utc>, retention_days: u32) -> bool {
    Duration::try_days(i64::from(retention_days))
        .and_then(|window| now.checked_sub_signed(window))
        .is_some_and(|cutoff| timestamp < cutoff)
}

impl BackupService {
    /// Delete every backup past the retention window. Returns how many were
    /// removed; a backup that fails to delete is logged and retried on the
    /// next sweep.
    pub async fn cleanup_old_backups(&self) -> usize {
        let now = self.clock.now();
        let retention_days = self.config.retention_days;
        let mut removed = 0;

        for metadata in self.list_backups(None).await {
            if !is_expired(metadata.timestamp, now, retention_days) {
                continue;
            }
            match self.remove_backup(&metadata).await {
                Ok(()) => {
                    info!(backup_id = %metadata.id, timestamp = %metadata.timestamp, "Expired backup removed");
                    removed += 1;
                }
                Err(e) => warn!(backup_id = %metadata.id, error = %e, "Failed to remove expired backup"),
            }
        }

        info!(removed, retention_days, "Retention sweep finished");
        removed
    }
}
