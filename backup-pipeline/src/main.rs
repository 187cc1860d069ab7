//! Backup Pipeline - Main entry point

use anyhow::{Context, Result};
use backup_pipeline::daemon::{BackupScheduler, ShutdownCoordinator};
use backup_pipeline::models::{BackupType, CreateBackupRequest, RestoreRequest, StorageMode};
use backup_pipeline::{utils, BackupConfig, BackupService};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take a backup now
    Backup {
        /// full or incremental
        #[arg(long = "type", default_value = "full")]
        backup_type: BackupType,
        /// Comma-separated table list (default: every table)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
        #[arg(long)]
        no_compress: bool,
        #[arg(long)]
        no_encrypt: bool,
        /// local, s3 or both
        #[arg(long)]
        storage: Option<StorageMode>,
    },
    /// Restore a backup
    Restore {
        backup_id: String,
        /// Validate only, leave the database untouched
        #[arg(long)]
        dry_run: bool,
        /// Verify the artifact checksum first
        #[arg(long)]
        validate: bool,
        /// Database to restore into (default: DB_NAME)
        #[arg(long)]
        target: Option<String>,
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
    },
    /// List backups, newest first
    List {
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Summary over all backups
    Stats,
    /// Delete one backup everywhere it is stored
    Delete { backup_id: String },
    /// Delete backups older than the retention window
    Cleanup,
    /// Run scheduled backups until SIGTERM/SIGINT
    Daemon,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn non_empty(list: Vec<String>) -> Option<Vec<String>> {
    (!list.is_empty()).then_some(list)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = BackupConfig::from_env().context("invalid configuration")?;
    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting backup-pipeline v{}", env!("CARGO_PKG_VERSION"));

    let service = Arc::new(BackupService::from_config(config).await?);
    service.initialize().await?;

    match args.command {
        Command::Backup {
            backup_type,
            tables,
            no_compress,
            no_encrypt,
            storage,
        } => {
            let request = CreateBackupRequest {
                tables: non_empty(tables),
                compress: no_compress.then_some(false),
                encrypt: no_encrypt.then_some(false),
                storage,
            };
            let id = service.create_backup(backup_type, request).await?;
            print_json(&service.get_job_status(&id))?;
        }
        Command::Restore {
            backup_id,
            dry_run,
            validate,
            target,
            tables,
        } => {
            let request = RestoreRequest {
                backup_id,
                dry_run,
                validate_integrity: validate,
                target_database: target,
                tables: non_empty(tables),
            };
            let id = service.restore_backup(request).await?;
            print_json(&service.get_job_status(&id))?;
        }
        Command::List { limit } => print_json(&service.list_backups(limit).await)?,
        Command::Stats => print_json(&service.get_backup_stats().await)?,
        Command::Delete { backup_id } => {
            if !service.delete_backup(&backup_id).await? {
                anyhow::bail!("backup {backup_id} not found");
            }
            tracing::info!(backup_id = %backup_id, "Deleted");
        }
        Command::Cleanup => {
            let removed = service.cleanup_old_backups().await;
            println!("{removed}");
        }
        Command::Daemon => run_daemon(service).await?,
    }

    Ok(())
}

async fn run_daemon(service: Arc<BackupService>) -> Result<()> {
    let coordinator = ShutdownCoordinator::new();
    let scheduler = BackupScheduler::new(service.clone()).await?;

    if service.config().enabled {
        scheduler.schedule_backups(&service.config().schedule).await?;
        scheduler.start().await?;
    } else {
        tracing::info!("Scheduled backups disabled (BACKUP_ENABLED=false)");
    }

    coordinator.wait_for_signal().await;
    coordinator.drain(&service).await;

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "Scheduler did not stop cleanly");
    }
    Ok(())
}
