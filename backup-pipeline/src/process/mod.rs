//! External process execution for the dump and restore tools.
//!
//! Children are started with `tokio::process`. Standard output is streamed
//! to a file (dump) or standard input is fed from a file (restore); stderr is
//! collected so a non-zero exit can be reported with the tool's own message.
//! Cancelling the token terminates the child: SIGTERM first, SIGKILL after a
//! grace period.

pub mod progress_stream;

use crate::utils::{BackupError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use progress_stream::ProgressStream;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use progress_stream::ProgressCallback;

const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// A program invocation. `env` carries secrets so they never show up in argv.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl ProcessSpec {
    /// Command with no arguments and the inherited environment.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Extra environment variable for the child; never logged.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> BackupError {
        BackupError::ProcessExecution(format!("failed to start {}: {}", self.program, e))
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `spec`, streaming its stdout into `output`. Returns bytes written.
    async fn run_to_file(
        &self,
        spec: &ProcessSpec,
        output: &Path,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<u64>;

    /// Run `spec` with `input` piped to its stdin.
    async fn run_from_file(&self, spec: &ProcessSpec, input: &Path, cancel: CancellationToken) -> Result<()>;

    /// Run `spec` and return its stdout.
    async fn run_capture(&self, spec: &ProcessSpec, cancel: CancellationToken) -> Result<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run_to_file(
        &self,
        spec: &ProcessSpec,
        output: &Path,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<u64> {
        debug!(program = %spec.program, args = ?spec.args, "Spawning process");
        let mut child = spec
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spec.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackupError::ProcessExecution("stdout not captured".into()))?;
        let stderr = tokio::spawn(collect_output(child.stderr.take()));

        let mut file = tokio::fs::File::create(output).await?;
        let mut stream = ProgressStream::new(ReaderStream::new(stdout), progress);

        let copy = async {
            while let Some(chunk) = stream.next().await {
                file.write_all(&chunk?).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok::<u64, std::io::Error>(stream.bytes_seen())
        };

        let written = tokio::select! {
            result = copy => result,
            _ = cancel.cancelled() => {
                terminate(&mut child, &spec.program).await;
                return Err(cancelled(spec));
            }
        };

        // the child may be blocked on a full pipe nobody reads any more
        let written = match written {
            Ok(written) => written,
            Err(e) => {
                drop(stream);
                terminate(&mut child, &spec.program).await;
                return Err(e.into());
            }
        };

        let status = wait_or_terminate(&mut child, spec, &cancel).await?;
        let stderr = stderr.await.unwrap_or_default();
        check_status(spec, status, &stderr)?;
        Ok(written)
    }

    async fn run_from_file(&self, spec: &ProcessSpec, input: &Path, cancel: CancellationToken) -> Result<()> {
        debug!(program = %spec.program, args = ?spec.args, input = %input.display(), "Spawning process");
        let mut source = tokio::fs::File::open(input).await?;
        let mut child = spec
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spec.spawn_error(e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackupError::ProcessExecution("stdin not captured".into()))?;
        let stderr = tokio::spawn(collect_output(child.stderr.take()));

        let feed = async {
            tokio::io::copy(&mut source, &mut stdin).await?;
            stdin.shutdown().await
        };

        let fed = tokio::select! {
            result = feed => result,
            _ = cancel.cancelled() => {
                terminate(&mut child, &spec.program).await;
                return Err(cancelled(spec));
            }
        };
        drop(stdin);

        let status = wait_or_terminate(&mut child, spec, &cancel).await?;
        let stderr = stderr.await.unwrap_or_default();
        // a child that dies early breaks the pipe; its exit status says more
        check_status(spec, status, &stderr)?;
        fed?;
        Ok(())
    }

    async fn run_capture(&self, spec: &ProcessSpec, cancel: CancellationToken) -> Result<String> {
        let mut cmd = spec.command();
        cmd.stdin(Stdio::null());
        let output = tokio::select! {
            output = cmd.output() => {
                output.map_err(|e| spec.spawn_error(e))?
            }
            _ = cancel.cancelled() => return Err(cancelled(spec)),
        };
        let stderr = String::from_utf8_lossy(&output.stderr);
        check_status(spec, output.status, &stderr)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

async fn collect_output<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_string(&mut buf).await;
    }
    buf
}

async fn wait_or_terminate(child: &mut Child, spec: &ProcessSpec, cancel: &CancellationToken) -> Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => Ok(status?),
        _ = cancel.cancelled() => {
            terminate(child, &spec.program).await;
            Err(cancelled(spec))
        }
    }
}

fn check_status(spec: &ProcessSpec, status: ExitStatus, stderr: &str) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    let code = status
        .code()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".into());
    Err(BackupError::ProcessExecution(format!(
        "{} exited with code {}: {}",
        spec.program,
        code,
        stderr.trim()
    )))
}

fn cancelled(spec: &ProcessSpec) -> BackupError {
    BackupError::ProcessExecution(format!("{} terminated by shutdown", spec.program))
}

/// SIGTERM, then SIGKILL if the child is still alive after the grace period.
async fn terminate(child: &mut Child, program: &str) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
            if let Ok(Ok(_)) = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                warn!(program, pid, "Process terminated");
                return;
            }
        }
    }

    if let Err(e) = child.kill().await {
        warn!(program, error = %e, "Failed to kill process");
    } else {
        warn!(program, "Process killed");
    }
}
