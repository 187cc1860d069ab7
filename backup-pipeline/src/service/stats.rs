use crate::models::{BackupMetadata, BackupStats, LocationCounts, StorageMode};
use crate::utils::format::format_bytes;

/// Aggregate over every known backup record.
pub fn compute_stats(backups: &[BackupMetadata]) -> BackupStats {
    let mut counts = LocationCounts::default();
    for backup in backups {
        match backup.location {
            StorageMode::Local => counts.local += 1,
            StorageMode::S3 => counts.s3 += 1,
            StorageMode::Both => counts.both += 1,
        }
    }

    BackupStats {
        total_backups: backups.len(),
        total_size: format_bytes(backups.iter().map(|b| b.size).sum()),
        oldest_backup: backups.iter().map(|b| b.timestamp).min(),
        newest_backup: backups.iter().map(|b| b.timestamp).max(),
        counts_by_location: counts,
    }
}
