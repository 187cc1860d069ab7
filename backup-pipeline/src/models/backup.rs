use crate::utils::BackupError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    Full,
    Incremental,
}

impl FromStr for BackupType {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(BackupType::Full),
            "incremental" => Ok(BackupType::Incremental),
            other => Err(BackupError::Configuration(format!("unknown backup type '{other}'"))),
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackupType::Full => "full",
            BackupType::Incremental => "incremental",
        })
    }
}

/// Where an artifact lives (and where new ones should go).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    Local,
    S3,
    Both,
}

impl StorageMode {
    pub fn uses_remote(self) -> bool {
        matches!(self, StorageMode::S3 | StorageMode::Both)
    }

    pub fn keeps_local(self) -> bool {
        matches!(self, StorageMode::Local | StorageMode::Both)
    }
}

impl FromStr for StorageMode {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(StorageMode::Local),
            "s3" => Ok(StorageMode::S3),
            "both" => Ok(StorageMode::Both),
            other => Err(BackupError::Configuration(format!("unknown storage mode '{other}'"))),
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageMode::Local => "local",
            StorageMode::S3 => "s3",
            StorageMode::Both => "both",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    InProgress,
    Completed,
    Failed,
}

/// Durable descriptor of one backup, stored as `metadata/{id}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    /// Bytes of the final artifact
    pub size: u64,
    /// SHA-256 of the final artifact, hex
    pub checksum: String,
    pub compression: bool,
    pub encryption: bool,
    pub location: StorageMode,
    pub status: BackupStatus,
    #[serde(default)]
    pub tables: Vec<String>,
    /// Wall-clock milliseconds
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateBackupRequest {
    /// Explicit table list; discovered from the schema catalog when `None`
    pub tables: Option<Vec<String>>,
    pub compress: Option<bool>,
    pub encrypt: Option<bool>,
    pub storage: Option<StorageMode>,
}

#[derive(Debug, Clone, Default)]
pub struct RestoreRequest {
    pub backup_id: String,
    pub dry_run: bool,
    pub validate_integrity: bool,
    pub target_database: Option<String>,
    pub tables: Option<Vec<String>>,
}

impl RestoreRequest {
    pub fn new(backup_id: impl Into<String>) -> Self {
        Self {
            backup_id: backup_id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationCounts {
    pub local: usize,
    pub s3: usize,
    pub both: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStats {
    pub total_backups: usize,
    pub total_size: String,
    pub oldest_backup: Option<DateTime<Utc>>,
    pub newest_backup: Option<DateTime<Utc>>,
    pub counts_by_location: LocationCounts,
}
