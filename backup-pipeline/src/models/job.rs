use super::backup::BackupMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Backup,
    Restore,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobKind::Backup => "backup",
            JobKind::Restore => "restore",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

/// Where inside the pipeline a job currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Queued,
    VerifyingConnectivity,
    ResolvingTables,
    Dumping,
    Compressing,
    Encrypting,
    Checksumming,
    Uploading,
    PersistingMetadata,
    ResolvingMetadata,
    PreparingArtifact,
    Validating,
    Decrypting,
    Decompressing,
    FilteringTables,
    Restoring,
    DryRun,
    Cleanup,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub stage: JobStage,
    /// Advisory 0-100, never decreases
    pub progress: u8,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub metadata: Option<BackupMetadata>,
}

impl Job {
    pub fn new(id: String, kind: JobKind, now: DateTime<Utc>) -> Self {
        Self {
            id,
            kind,
            status: JobStatus::Queued,
            stage: JobStage::Queued,
            progress: 0,
            start_time: now,
            end_time: None,
            error: None,
            metadata: None,
        }
    }

    /// Status transitions only move forward; returns whether it applied.
    fn transition(&mut self, next: JobStatus) -> bool {
        if next.rank() <= self.status.rank() {
            return false;
        }
        self.status = next;
        true
    }

    pub fn start(&mut self) -> bool {
        self.transition(JobStatus::Running)
    }

    /// Move to `stage`, raising progress to at least `progress`.
    pub fn advance(&mut self, stage: JobStage, progress: u8) {
        if self.status.is_terminal() {
            return;
        }
        self.stage = stage;
        self.raise_progress(progress);
    }

    pub fn raise_progress(&mut self, progress: u8) {
        if self.status.is_terminal() {
            return;
        }
        self.progress = self.progress.max(progress.min(100));
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> bool {
        if !self.transition(JobStatus::Completed) {
            return false;
        }
        self.stage = JobStage::Done;
        self.progress = 100;
        self.end_time = Some(now);
        true
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> bool {
        if !self.transition(JobStatus::Failed) {
            return false;
        }
        self.error = Some(error.into());
        self.end_time = Some(now);
        true
    }
}

/// `backup_1760752800000_3f9a1c0b2` style ids: time-derived with a random suffix.
pub fn new_job_id(kind: JobKind, now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", kind, now.timestamp_millis(), &suffix[..9])
}
