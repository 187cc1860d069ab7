use super::*;
use crate::config::S3Config;
use crate::models::{BackupType, CreateBackupRequest, JobStatus, RestoreRequest, StorageMode};
use crate::testing::{FakeColdStorage, FakeProbe, FakeRunner, FixedClock};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use tokio::sync::Notify;

const DUMP: &str = "\
-- MySQL dump 10.13
/*!40101 SET @OLD_SQL_MODE=@@SQL_MODE */;
--
-- Table structure for table `orders`
--
CREATE TABLE `orders` (`id` int);
INSERT INTO `orders` VALUES (1),(2);
--
-- Table structure for table `users`
--
CREATE TABLE `users` (`id` int);
INSERT INTO `users` VALUES (7);
/*!40101 SET SQL_MODE=@OLD_SQL_MODE */;
-- Dump completed
";

struct Harness {
    root: TempDir,
    cold_root: TempDir,
    cold: Arc<FakeColdStorage>,
    service: Arc<BackupService>,
    runner: Arc<FakeRunner>,
    probe: Arc<FakeProbe>,
}

impl Harness {
    async fn new(runner: FakeRunner, probe: FakeProbe, configure: impl FnOnce(&mut BackupConfig)) -> Self {
        let root = TempDir::new().unwrap();
        let cold_root = TempDir::new().unwrap();

        let mut config = BackupConfig::from_lookup(|_| None).unwrap();
        config.local_path = root.path().to_path_buf();
        config.encryption_key = Some("correct horse battery staple".into());
        config.s3 = Some(S3Config {
            bucket: "test".into(),
            region: None,
            access_key: None,
            secret_key: None,
            prefix: "backups/".into(),
            endpoint: None,
        });
        config.shutdown_timeout = Duration::from_secs(5);
        configure(&mut config);

        let runner = Arc::new(runner);
        let probe = Arc::new(probe);
        let cold = Arc::new(FakeColdStorage::new(cold_root.path()));
        let service = BackupService::new(config, probe.clone(), runner.clone()).with_cold_storage(cold.clone());
        service.initialize().await.unwrap();

        Self {
            root,
            cold_root,
            cold,
            service: Arc::new(service),
            runner,
            probe,
        }
    }

    async fn standard() -> Self {
        Self::new(FakeRunner::new(DUMP), FakeProbe::up(&["orders", "users"]), |_| {}).await
    }

    fn artifact(&self, name: &str) -> std::path::PathBuf {
        self.root.path().join(name)
    }
}

fn full() -> CreateBackupRequest {
    CreateBackupRequest::default()
}

#[tokio::test]
async fn test_backup_writes_artifact_and_metadata() {
    let h = Harness::standard().await;
    let id = h.service.create_backup(BackupType::Full, full()).await.unwrap();

    let job = h.service.get_job_status(&id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.metadata.as_ref().map(|m| m.id.as_str()), Some(id.as_str()));

    let artifact = h.artifact(&format!("{id}.sql.gz.enc"));
    assert!(artifact.exists());
    assert!(!h.artifact(&format!("{id}.sql")).exists());
    assert!(!h.artifact(&format!("{id}.sql.gz")).exists());

    let listed = h.service.list_backups(None).await;
    assert_eq!(listed.len(), 1);
    let meta = &listed[0];
    assert_eq!(meta.id, id);
    assert!(meta.compression && meta.encryption);
    assert_eq!(meta.location, StorageMode::Local);
    assert_eq!(meta.tables, ["orders", "users"]);
    assert_eq!(meta.size, std::fs::metadata(&artifact).unwrap().len());
    assert_eq!(meta.checksum, crate::transform::sha256_file(&artifact).await.unwrap());

    // Discovered tables are recorded but the dump itself covers the whole database.
    let dump = &h.runner.dump_specs()[0];
    assert_eq!(dump.args.last().map(String::as_str), Some("app"));
}

#[tokio::test]
async fn test_backup_honours_request_overrides() {
    let h = Harness::standard().await;
    let request = CreateBackupRequest {
        tables: Some(vec!["users".into()]),
        compress: Some(false),
        encrypt: Some(false),
        storage: None,
    };
    let id = h.service.create_backup(BackupType::Incremental, request).await.unwrap();

    let artifact = h.artifact(&format!("{id}.sql"));
    assert_eq!(std::fs::read_to_string(artifact).unwrap(), DUMP);
    let meta = h.service.list_backups(Some(1)).await.remove(0);
    assert_eq!(meta.backup_type, BackupType::Incremental);
    assert_eq!(meta.tables, ["users"]);
    assert_eq!(h.runner.dump_specs()[0].args.last().map(String::as_str), Some("users"));
}

#[tokio::test]
async fn test_connectivity_failure_fails_job_without_metadata() {
    let h = Harness::new(FakeRunner::new(DUMP), FakeProbe::down(), |_| {}).await;
    let err = h.service.create_backup(BackupType::Full, full()).await.unwrap_err();
    assert!(matches!(err, BackupError::Connectivity(_)));
    assert!(err.to_string().contains("Database connection failed"));

    let jobs = h.service.list_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert!(jobs[0].error.as_deref().unwrap().contains("Database connection failed"));
    assert!(h.service.list_backups(None).await.is_empty());
    assert!(h.runner.dump_specs().is_empty());

    // Slot was released
    assert!(h.service.jobs.active().is_none());
}

#[tokio::test]
async fn test_dump_failure_removes_partial_artifact() {
    let h = Harness::new(
        FakeRunner::new(DUMP).failing_dump("Access denied for user"),
        FakeProbe::up(&["orders"]),
        |_| {},
    )
    .await;
    let err = h.service.create_backup(BackupType::Full, full()).await.unwrap_err();
    assert!(err.to_string().contains("Access denied"));

    let leftovers: Vec<_> = std::fs::read_dir(h.root.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".sql"))
        .collect();
    assert!(leftovers.is_empty());
    assert!(h.service.list_backups(None).await.is_empty());
}

#[tokio::test]
async fn test_single_flight() {
    let gate = Arc::new(Notify::new());
    let h = Harness::new(
        FakeRunner::new(DUMP).gated(gate.clone()),
        FakeProbe::up(&["orders"]),
        |_| {},
    )
    .await;

    let service = h.service.clone();
    let first = tokio::spawn(async move { service.create_backup(BackupType::Full, full()).await });
    while h.runner.dump_specs().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = h.service.create_backup(BackupType::Full, full()).await.unwrap_err();
    assert!(matches!(err, BackupError::Concurrency(_)));
    let err = h.service.restore_backup(RestoreRequest::new("anything")).await.unwrap_err();
    assert!(matches!(err, BackupError::Concurrency(_)));
    assert_eq!(h.service.list_jobs().len(), 1);

    gate.notify_one();
    let id = first.await.unwrap().unwrap();
    assert_eq!(h.service.get_job_status(&id).unwrap().status, JobStatus::Completed);

    // Free again once the first job is done
    gate.notify_one();
    h.service.create_backup(BackupType::Full, full()).await.unwrap();
}

#[tokio::test]
async fn test_progress_is_monotonic_while_running() {
    let gate = Arc::new(Notify::new());
    let h = Harness::new(
        FakeRunner::new(DUMP).gated(gate.clone()),
        FakeProbe::up(&["orders"]),
        |_| {},
    )
    .await;

    let service = h.service.clone();
    let task = tokio::spawn(async move { service.create_backup(BackupType::Full, full()).await });
    let mut seen = Vec::new();
    loop {
        if let Some(job) = h.service.list_jobs().first() {
            seen.push(job.progress);
            if job.status == JobStatus::Running && job.stage == JobStage::Dumping {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    gate.notify_one();
    let id = task.await.unwrap().unwrap();
    seen.push(h.service.get_job_status(&id).unwrap().progress);

    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert_eq!(seen.last(), Some(&100));
}

#[tokio::test]
async fn test_round_trip_restore_feeds_original_sql() {
    let h = Harness::standard().await;
    let id = h.service.create_backup(BackupType::Full, full()).await.unwrap();

    let mut request = RestoreRequest::new(&id);
    request.validate_integrity = true;
    let restore_id = h.service.restore_backup(request).await.unwrap();
    assert_eq!(h.service.get_job_status(&restore_id).unwrap().status, JobStatus::Completed);

    let restores = h.runner.restores();
    assert_eq!(restores.len(), 1);
    assert_eq!(restores[0].1, DUMP.as_bytes());
    assert_eq!(restores[0].0.args.last().map(String::as_str), Some("app"));

    // Artifact kept, work directory gone
    assert!(h.artifact(&format!("{id}.sql.gz.enc")).exists());
    assert!(!h.artifact(&format!(".restore-{restore_id}")).exists());
}

#[tokio::test]
async fn test_tampered_artifact_is_rejected_before_restore() {
    let h = Harness::standard().await;
    let id = h.service.create_backup(BackupType::Full, full()).await.unwrap();

    let artifact = h.artifact(&format!("{id}.sql.gz.enc"));
    let mut bytes = std::fs::read(&artifact).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0x01;
    std::fs::write(&artifact, bytes).unwrap();

    let mut request = RestoreRequest::new(&id);
    request.validate_integrity = true;
    let err = h.service.restore_backup(request).await.unwrap_err();
    assert!(matches!(err, BackupError::Integrity { .. }));
    assert!(h.runner.restores().is_empty());
    let job = h.service.list_jobs().remove(0);
    assert_eq!(job.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_restore_to_other_database_with_table_filter() {
    let h = Harness::standard().await;
    let id = h.service.create_backup(BackupType::Full, full()).await.unwrap();

    let request = RestoreRequest {
        backup_id: id,
        dry_run: false,
        validate_integrity: false,
        target_database: Some("app_copy".into()),
        tables: Some(vec!["users".into()]),
    };
    h.service.restore_backup(request).await.unwrap();

    let (spec, fed) = h.runner.restores().remove(0);
    assert_eq!(spec.args.last().map(String::as_str), Some("app_copy"));
    let sql = String::from_utf8(fed).unwrap();
    assert!(sql.contains("INSERT INTO `users`"));
    assert!(!sql.contains("INSERT INTO `orders`"));
    assert!(sql.contains("SET SQL_MODE=@OLD_SQL_MODE"));
}

#[tokio::test]
async fn test_dry_run_never_invokes_restore() {
    let h = Harness::standard().await;
    let id = h.service.create_backup(BackupType::Full, full()).await.unwrap();

    let mut request = RestoreRequest::new(&id);
    request.dry_run = true;
    request.validate_integrity = true;
    let restore_id = h.service.restore_backup(request).await.unwrap();

    assert_eq!(h.service.get_job_status(&restore_id).unwrap().status, JobStatus::Completed);
    assert!(h.runner.restores().is_empty());
}

#[tokio::test]
async fn test_missing_backup_is_not_found() {
    let h = Harness::standard().await;
    let err = h.service.restore_backup(RestoreRequest::new("nope")).await.unwrap_err();
    assert!(matches!(err, BackupError::NotFound(_)));
    assert!(err.to_string().contains("not found"));
    assert!(h.runner.restores().is_empty());
    assert_eq!(h.service.list_jobs()[0].status, JobStatus::Failed);
}

#[tokio::test]
async fn test_remote_only_backup_is_fetched_for_restore() {
    let h = Harness::new(FakeRunner::new(DUMP), FakeProbe::up(&["orders"]), |config| {
        config.storage = StorageMode::S3;
    })
    .await;
    let id = h.service.create_backup(BackupType::Full, full()).await.unwrap();

    let name = format!("{id}.sql.gz.enc");
    assert!(!h.artifact(&name).exists());
    assert!(h.cold_root.path().join("backups").join(&name).exists());

    let mut request = RestoreRequest::new(&id);
    request.validate_integrity = true;
    h.service.restore_backup(request).await.unwrap();
    assert_eq!(h.runner.restores()[0].1, DUMP.as_bytes());
    // Downloaded copy stays at the canonical path
    assert!(h.artifact(&name).exists());

    assert!(h.service.delete_backup(&id).await.unwrap());
    assert!(!h.cold_root.path().join("backups").join(&name).exists());
    assert!(!h.artifact(&name).exists());
}

#[tokio::test]
async fn test_interrupted_download_leaves_no_artifact_behind() {
    let h = Harness::new(FakeRunner::new(DUMP), FakeProbe::up(&["orders"]), |config| {
        config.storage = StorageMode::S3;
    })
    .await;
    let request = CreateBackupRequest {
        compress: Some(false),
        encrypt: Some(false),
        ..full()
    };
    let id = h.service.create_backup(BackupType::Full, request).await.unwrap();
    let name = format!("{id}.sql");

    h.cold.break_downloads(1);
    let err = h.service.restore_backup(RestoreRequest::new(&id)).await.unwrap_err();
    assert!(err.to_string().contains("connection reset"));
    assert!(!h.artifact(&name).exists());
    assert!(h.runner.restores().is_empty());

    // Retrying fetches the object again instead of trusting a truncated copy
    let mut retry = RestoreRequest::new(&id);
    retry.validate_integrity = true;
    h.service.restore_backup(retry).await.unwrap();
    assert_eq!(h.runner.restores()[0].1, DUMP.as_bytes());
    assert!(h.artifact(&name).exists());
}

#[tokio::test]
async fn test_encrypted_restore_without_key_is_rejected() {
    let h = Harness::standard().await;
    let id = h.service.create_backup(BackupType::Full, full()).await.unwrap();

    let mut config = h.service.config().clone();
    config.encryption_key = None;
    let keyless = BackupService::new(config, h.probe.clone(), h.runner.clone());

    let err = keyless.restore_backup(RestoreRequest::new(&id)).await.unwrap_err();
    assert!(matches!(err, BackupError::Configuration(_)));
    assert!(err.to_string().contains("BACKUP_ENCRYPTION_KEY"));
    assert!(h.runner.restores().is_empty());
    assert_eq!(keyless.list_jobs()[0].status, JobStatus::Failed);
    assert!(h.artifact(&format!("{id}.sql.gz.enc")).exists());
}

#[tokio::test]
async fn test_delete_backup() {
    let h = Harness::new(FakeRunner::new(DUMP), FakeProbe::up(&["orders"]), |config| {
        config.storage = StorageMode::Both;
    })
    .await;
    let id = h.service.create_backup(BackupType::Full, full()).await.unwrap();
    let name = format!("{id}.sql.gz.enc");
    assert!(h.artifact(&name).exists());
    assert!(h.cold_root.path().join("backups").join(&name).exists());

    assert!(!h.service.delete_backup("nope").await.unwrap());
    assert!(h.service.delete_backup(&id).await.unwrap());
    assert!(!h.artifact(&name).exists());
    assert!(!h.cold_root.path().join("backups").join(&name).exists());
    assert!(h.service.list_backups(None).await.is_empty());
    assert!(!h.service.delete_backup(&id).await.unwrap());
}

#[tokio::test]
async fn test_retention_boundary() {
    let now = Utc.with_ymd_and_hms(2026, 10, 1, 2, 0, 0).unwrap();
    let clock = Arc::new(FixedClock::new(now));
    let h = Harness::standard().await;
    let service = Arc::try_unwrap(h.service).ok().unwrap().with_clock(clock.clone());

    let cutoff = now - chrono::Duration::days(30);
    let mut ids = Vec::new();
    for at in [
        cutoff - chrono::Duration::milliseconds(1),
        cutoff,
        cutoff + chrono::Duration::milliseconds(1),
    ] {
        clock.set(at);
        ids.push(service.create_backup(BackupType::Full, full()).await.unwrap());
    }
    clock.set(now);

    assert_eq!(service.cleanup_old_backups().await, 1);
    let remaining: Vec<String> = service.list_backups(None).await.into_iter().map(|m| m.id).collect();
    assert_eq!(remaining, [ids[2].clone(), ids[1].clone()]);
    assert!(!h.root.path().join(format!("{}.sql.gz.enc", ids[0])).exists());

    // Nothing left to expire
    assert_eq!(service.cleanup_old_backups().await, 0);
}

#[tokio::test]
async fn test_stats_over_created_backups() {
    let h = Harness::standard().await;
    let empty = h.service.get_backup_stats().await;
    assert_eq!(empty.total_backups, 0);
    assert_eq!(empty.total_size, "0.00 B");

    h.service.create_backup(BackupType::Full, full()).await.unwrap();
    let stats = h.service.get_backup_stats().await;
    assert_eq!(stats.total_backups, 1);
    assert_eq!(stats.counts_by_location.local, 1);
    assert_eq!(stats.oldest_backup, stats.newest_backup);
    assert!(h.probe.pings() >= 1);
}

#[tokio::test]
async fn test_shutdown_waits_for_running_job() {
    let gate = Arc::new(Notify::new());
    let h = Harness::new(
        FakeRunner::new(DUMP).gated(gate.clone()),
        FakeProbe::up(&["orders"]),
        |_| {},
    )
    .await;

    let service = h.service.clone();
    let task = tokio::spawn(async move { service.create_backup(BackupType::Full, full()).await });
    while h.runner.dump_specs().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let release = gate.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        release.notify_one();
    });
    h.service.shutdown().await;

    let id = task.await.unwrap().unwrap();
    assert_eq!(h.service.get_job_status(&id).unwrap().status, JobStatus::Completed);
    let err = h.service.create_backup(BackupType::Full, full()).await.unwrap_err();
    assert!(matches!(err, BackupError::ShuttingDown));
}

#[tokio::test]
async fn test_shutdown_timeout_forces_failure_and_cancels() {
    let gate = Arc::new(Notify::new());
    let h = Harness::new(
        FakeRunner::new(DUMP).gated(gate),
        FakeProbe::up(&["orders"]),
        |config| config.shutdown_timeout = Duration::from_millis(200),
    )
    .await;

    let service = h.service.clone();
    let task = tokio::spawn(async move { service.create_backup(BackupType::Full, full()).await });
    while h.runner.dump_specs().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    h.service.shutdown().await;
    let job = h.service.list_jobs().remove(0);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some(SHUTDOWN_TIMEOUT_REASON));

    // The dump observes cancellation and the job stays failed with the shutdown reason
    assert!(task.await.unwrap().is_err());
    let job = h.service.get_job_status(&job.id).unwrap();
    assert_eq!(job.error.as_deref(), Some(SHUTDOWN_TIMEOUT_REASON));
    assert!(h.service.list_backups(None).await.is_empty());
}

#[tokio::test]
async fn test_shutdown_timeout_during_upload_discards_backup() {
    let h = Harness::new(FakeRunner::new(DUMP), FakeProbe::up(&["orders"]), |config| {
        config.storage = StorageMode::Both;
        config.shutdown_timeout = Duration::from_millis(100);
    })
    .await;
    h.cold.delay_uploads(Duration::from_millis(600));

    let service = h.service.clone();
    let task = tokio::spawn(async move { service.create_backup(BackupType::Full, full()).await });
    while h.cold.uploads_started() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    h.service.shutdown().await;
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, BackupError::ShuttingDown));

    let job = h.service.list_jobs().remove(0);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some(SHUTDOWN_TIMEOUT_REASON));
    assert!(job.metadata.is_none());
    assert!(h.service.list_backups(None).await.is_empty());

    let name = format!("{}.sql.gz.enc", job.id);
    assert!(!h.artifact(&name).exists());
    // The object that finished uploading after the timeout is removed too
    assert!(!h.cold_root.path().join("backups").join(&name).exists());
}

#[tokio::test]
async fn test_initialize_requires_cold_storage_for_remote_modes() {
    let root = TempDir::new().unwrap();
    let mut config = BackupConfig::from_lookup(|_| None).unwrap();
    config.local_path = root.path().to_path_buf();
    config.storage = StorageMode::Both;
    config.s3 = Some(S3Config {
        bucket: "b".into(),
        region: None,
        access_key: None,
        secret_key: None,
        prefix: String::new(),
        endpoint: None,
    });
    let service = BackupService::new(
        config,
        Arc::new(FakeProbe::up(&[])),
        Arc::new(FakeRunner::new("")),
    );
    assert!(matches!(service.initialize().await, Err(BackupError::Configuration(_))));
}

#[tokio::test]
async fn test_initialize_rejects_unusable_root() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("not-a-dir");
    std::fs::write(&file, b"x").unwrap();

    let mut config = BackupConfig::from_lookup(|_| None).unwrap();
    config.local_path = file;
    let service = BackupService::new(config, Arc::new(FakeProbe::up(&[])), Arc::new(FakeRunner::new("")));
    assert!(matches!(service.initialize().await, Err(BackupError::Configuration(_))));
}
