//! In-process stand-ins for the database, the external tools, cold storage
//! and the clock.

use crate::db::DatabaseProbe;
use crate::process::{ProcessRunner, ProcessSpec, ProgressCallback};
use crate::storage::{ColdStorage, DirectoryStorage};
use crate::utils::{BackupError, Clock, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Pretends to be `mysqldump` / `mysql`. The dump writes a canned payload;
/// restores record the program and the bytes they were fed.
#[derive(Default)]
pub struct FakeRunner {
    dump_output: Vec<u8>,
    capture_output: Option<String>,
    dump_failure: Option<String>,
    gate: Option<Arc<Notify>>,
    dumps: Mutex<Vec<ProcessSpec>>,
    restores: Mutex<Vec<(ProcessSpec, Vec<u8>)>>,
    captured: Mutex<Vec<ProcessSpec>>,
}

impl FakeRunner {
    /// Dumps succeed and write `dump_output`.
    pub fn new(dump_output: impl AsRef<[u8]>) -> Self {
        Self {
            dump_output: dump_output.as_ref().to_vec(),
            ..Default::default()
        }
    }

    pub fn with_capture_output(mut self, output: impl Into<String>) -> Self {
        self.capture_output = Some(output.into());
        self
    }

    /// Dumps exit non-zero with `stderr`.
    pub fn failing_dump(mut self, stderr: impl Into<String>) -> Self {
        self.dump_failure = Some(stderr.into());
        self
    }

    /// Dumps block until `gate` is notified or the job is cancelled.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn dump_specs(&self) -> Vec<ProcessSpec> {
        self.dumps.lock().unwrap().clone()
    }

    /// Every restore with the exact bytes it read.
    pub fn restores(&self) -> Vec<(ProcessSpec, Vec<u8>)> {
        self.restores.lock().unwrap().clone()
    }

    pub fn captured_specs(&self) -> Vec<ProcessSpec> {
        self.captured.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run_to_file(
        &self,
        spec: &ProcessSpec,
        output: &Path,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<u64> {
        self.dumps.lock().unwrap().push(spec.clone());
        tokio::fs::write(output, b"").await?;

        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = gate.notified() => {}
                _ = cancel.cancelled() => {
                    return Err(BackupError::ProcessExecution(format!(
                        "{} terminated by shutdown",
                        spec.program
                    )));
                }
            }
        }
        if let Some(stderr) = &self.dump_failure {
            return Err(BackupError::ProcessExecution(format!(
                "{} exited with code 2: {}",
                spec.program, stderr
            )));
        }

        tokio::fs::write(output, &self.dump_output).await?;
        let written = self.dump_output.len() as u64;
        progress(written);
        Ok(written)
    }

    async fn run_from_file(&self, spec: &ProcessSpec, input: &Path, _cancel: CancellationToken) -> Result<()> {
        let fed = tokio::fs::read(input).await?;
        self.restores.lock().unwrap().push((spec.clone(), fed));
        Ok(())
    }

    async fn run_capture(&self, spec: &ProcessSpec, _cancel: CancellationToken) -> Result<String> {
        self.captured.lock().unwrap().push(spec.clone());
        self.capture_output
            .clone()
            .ok_or_else(|| BackupError::ProcessExecution(format!("{} exited with code 1", spec.program)))
    }
}

pub struct FakeProbe {
    up: bool,
    tables: Vec<String>,
    pings: AtomicUsize,
}

impl FakeProbe {
    /// Reachable database holding `tables`.
    pub fn up(tables: &[&str]) -> Self {
        Self {
            up: true,
            tables: tables.iter().map(|t| t.to_string()).collect(),
            pings: AtomicUsize::new(0),
        }
    }

    pub fn down() -> Self {
        Self {
            up: false,
            tables: Vec::new(),
            pings: AtomicUsize::new(0),
        }
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseProbe for FakeProbe {
    async fn ping(&self) -> bool {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.up
    }

    async fn list_tables(&self, _database: &str) -> Result<Vec<String>> {
        Ok(self.tables.clone())
    }
}

pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Directory-backed cold storage that can stall uploads and break
/// downloads halfway through.
pub struct FakeColdStorage {
    inner: DirectoryStorage,
    upload_delay: Mutex<Duration>,
    broken_downloads: AtomicUsize,
    uploads: AtomicUsize,
}

impl FakeColdStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: DirectoryStorage::new(root),
            upload_delay: Mutex::new(Duration::ZERO),
            broken_downloads: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
        }
    }

    /// Every upload sleeps for `delay` before storing the object.
    pub fn delay_uploads(&self, delay: Duration) {
        *self.upload_delay.lock().unwrap() = delay;
    }

    /// The next `count` downloads write a few bytes and then fail.
    pub fn break_downloads(&self, count: usize) {
        self.broken_downloads.store(count, Ordering::SeqCst);
    }

    pub fn uploads_started(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ColdStorage for FakeColdStorage {
    fn describe(&self) -> String {
        format!("fake+{}", self.inner.describe())
    }

    async fn upload(&self, key: &str, local: &Path) -> Result<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.upload_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.inner.upload(key, local).await
    }

    async fn download(&self, key: &str, local: &Path) -> Result<()> {
        let broken = self
            .broken_downloads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if broken {
            tokio::fs::write(local, b"-- MySQL dump 10.13").await?;
            return Err(BackupError::Storage("connection reset".into()));
        }
        self.inner.download(key, local).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }
}
