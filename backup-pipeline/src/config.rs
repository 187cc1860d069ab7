//! Configuration for the backup pipeline.
//!
//! Loaded from environment variables (and a `.env` file when present).

use crate::models::StorageMode;
use crate::utils::{BackupError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Whether the cron scheduler should run
    pub enabled: bool,
    /// 6-field cron expression (seconds first)
    pub schedule: String,
    pub retention_days: u32,
    /// gzip level 0-9; 0 disables compression
    pub compression_level: u32,
    pub encryption_key: Option<String>,
    pub storage: StorageMode,
    pub local_path: PathBuf,
    pub s3: Option<S3Config>,
    pub database: DatabaseConfig,
    pub dump_bin: String,
    pub restore_bin: String,
    pub shutdown_timeout: Duration,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub prefix: String,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
}

const DEFAULT_SCHEDULE: &str = "0 0 2 * * *";
const DEFAULT_RETENTION_DAYS: u32 = 30;
const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 300;
const DEFAULT_DB_PORT: u16 = 3306;

/// Parse into the target type; missing, malformed or out-of-range values
/// fall back to `default`.
fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

impl BackupConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let storage = match get("BACKUP_STORAGE") {
            Some(v) => v.parse::<StorageMode>()?,
            None => StorageMode::Local,
        };

        let s3 = get("BACKUP_S3_BUCKET").map(|bucket| S3Config {
            bucket,
            region: get("BACKUP_S3_REGION"),
            access_key: get("BACKUP_S3_ACCESS_KEY"),
            secret_key: get("BACKUP_S3_SECRET_KEY"),
            prefix: get("BACKUP_S3_PREFIX").unwrap_or_else(|| "backups/".into()),
            endpoint: get("BACKUP_S3_ENDPOINT"),
        });

        let enabled = get("BACKUP_ENABLED")
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no" | "off"))
            .unwrap_or(true);

        Ok(Self {
            enabled,
            schedule: get("BACKUP_SCHEDULE").unwrap_or_else(|| DEFAULT_SCHEDULE.into()),
            retention_days: parse_or(get("BACKUP_RETENTION_DAYS"), DEFAULT_RETENTION_DAYS),
            compression_level: parse_or(get("BACKUP_COMPRESSION_LEVEL"), DEFAULT_COMPRESSION_LEVEL).min(9),
            encryption_key: get("BACKUP_ENCRYPTION_KEY"),
            storage,
            local_path: PathBuf::from(get("BACKUP_LOCAL_PATH").unwrap_or_else(|| "./backups".into())),
            s3,
            database: DatabaseConfig {
                host: get("DB_HOST").unwrap_or_else(|| "localhost".into()),
                port: parse_or(get("DB_PORT"), DEFAULT_DB_PORT),
                user: get("DB_USER").unwrap_or_else(|| "root".into()),
                password: lookup("DB_PASSWORD").unwrap_or_default(),
                name: get("DB_NAME").unwrap_or_else(|| "app".into()),
            },
            dump_bin: get("BACKUP_DUMP_BIN").unwrap_or_else(|| "mysqldump".into()),
            restore_bin: get("BACKUP_RESTORE_BIN").unwrap_or_else(|| "mysql".into()),
            shutdown_timeout: Duration::from_secs(parse_or(
                get("BACKUP_SHUTDOWN_TIMEOUT_SECS"),
                DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            )),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".into()),
        })
    }

    pub fn compression_enabled(&self) -> bool {
        self.compression_level > 0
    }

    pub fn encryption_enabled(&self) -> bool {
        self.encryption_key.is_some()
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.local_path.join("metadata")
    }

    /// Checks that the selected storage mode has what it needs.
    pub fn validate(&self) -> Result<()> {
        if self.storage.uses_remote() && self.s3.is_none() {
            return Err(BackupError::Configuration(format!(
                "storage mode '{}' requires BACKUP_S3_BUCKET",
                self.storage
            )));
        }
        Ok(())
    }
}
