pub mod backup;
pub mod job;

pub use backup::{
    BackupMetadata, BackupStats, BackupStatus, BackupType, CreateBackupRequest, LocationCounts,
    RestoreRequest, StorageMode,
};
pub use job::{new_job_id, Job, JobKind, JobStage, JobStatus};
