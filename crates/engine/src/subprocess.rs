//! Out-of-process strategy: launch the engine for a single job.
//!
//! The job is written to a temporary JSON file and the engine launcher is
//! told to run it immediately and exit. stdout and stderr are drained
//! concurrently into one bounded tail.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use deforum_core::text::TailBuffer;
use deforum_core::{Deadline, JobSpec};
use tempfile::TempPath;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::executor::{ExecutionResult, JobExecutor, TAIL_CHARS};

/// How long to wait for output readers after the child has exited.
///
/// Grandchildren can keep the pipes open after the launcher dies.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Where and how to launch the engine.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Interpreter, e.g. `<root>/venv/bin/python`.
    pub python: PathBuf,
    /// Launcher script, e.g. `<root>/launch.py`.
    pub launch: PathBuf,
    /// Working directory for the launcher.
    pub root: PathBuf,
    pub port: u16,
    /// Checkpoint to load instead of downloading one. Ignored if missing.
    pub ckpt: Option<PathBuf>,
}

/// Runs each job in a fresh engine process.
#[derive(Debug, Clone)]
pub struct CliExecutor {
    config: CliConfig,
}

type SharedTail = Arc<Mutex<TailBuffer>>;

impl CliExecutor {
    pub fn new(config: CliConfig) -> Self {
        Self { config }
    }

    /// Launcher arguments for a job written to `job_file`.
    pub fn args(&self, job_file: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            self.config.launch.clone().into(),
            "--nowebui".into(),
            "--xformers".into(),
            "--api".into(),
            "--enable-insecure-extension-access".into(),
            "--port".into(),
            self.config.port.to_string().into(),
            "--deforum-run-now".into(),
            job_file.into(),
            "--deforum-terminate-after-run-now".into(),
        ];
        if let Some(ckpt) = self.config.ckpt.as_ref().filter(|p| p.exists()) {
            args.push("--no-download-sd-model".into());
            args.push("--ckpt".into());
            args.push(ckpt.into());
            args.push("--skip-install".into());
        }
        args
    }

    async fn run(&self, job_file: &Path, deadline: Deadline, outdir: &Path) -> ExecutionResult {
        let mut cmd = Command::new(&self.config.python);
        cmd.args(self.args(job_file))
            .current_dir(&self.config.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(
                    target: "deforum.exec",
                    python = %self.config.python.display(),
                    error = %e,
                    "Failed to spawn engine",
                );
                return ExecutionResult::exception("", format!("spawn failed: {e}"), outdir);
            }
        };

        let tail: SharedTail = Arc::new(Mutex::new(TailBuffer::new(TAIL_CHARS)));
        let readers = [
            spawn_reader(child.stdout.take(), Arc::clone(&tail)),
            spawn_reader(child.stderr.take(), Arc::clone(&tail)),
        ];

        // On timeout the child is killed explicitly; `kill_on_drop` covers
        // every other early exit.
        let waited = tokio::time::timeout(deadline.remaining(), child.wait()).await;
        match waited {
            Ok(Ok(status)) => {
                join_readers(readers).await;
                ExecutionResult::new(status.code().unwrap_or(-1), &snapshot(&tail), outdir)
            }
            Ok(Err(e)) => {
                let _ = child.start_kill();
                join_readers(readers).await;
                ExecutionResult::exception(&snapshot(&tail), format!("wait failed: {e}"), outdir)
            }
            Err(_elapsed) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(target: "deforum.exec", error = %e, "Failed to kill engine");
                }
                join_readers(readers).await;
                ExecutionResult::timeout(&snapshot(&tail), outdir)
            }
        }
    }
}

#[async_trait]
impl JobExecutor for CliExecutor {
    fn name(&self) -> &'static str {
        "cli-launch"
    }

    async fn execute(&self, job: &JobSpec, deadline: Deadline) -> ExecutionResult {
        let outdir = job.outdir.clone();
        if let Err(e) = tokio::fs::create_dir_all(&outdir).await {
            return ExecutionResult::exception("", format!("create outdir: {e}"), outdir);
        }

        // Removed when `job_file` drops, on every path out of this function.
        let job_file = match write_job_file(job) {
            Ok(path) => path,
            Err(e) => return ExecutionResult::exception("", format!("write job file: {e}"), outdir),
        };
        tracing::debug!(target: "deforum.exec", job_file = %job_file.display(), "Job file written");

        self.run(&job_file, deadline, &outdir).await
    }
}

/// Serialize `job` to a `deforum-*.json` temp file.
fn write_job_file(job: &JobSpec) -> std::io::Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("deforum-")
        .suffix(".json")
        .tempfile()?;
    serde_json::to_writer(&mut file, job)?;
    file.flush()?;
    Ok(file.into_temp_path())
}

fn spawn_reader<R>(stream: Option<R>, tail: SharedTail) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(stream) = stream else {
            return;
        };
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    let mut guard = tail.lock().unwrap_or_else(|p| p.into_inner());
                    guard.push_line(text.trim_end_matches(['\r', '\n']));
                }
            }
        }
    })
}

async fn join_readers(readers: [JoinHandle<()>; 2]) {
    for mut reader in readers {
        if tokio::time::timeout(READER_GRACE, &mut reader).await.is_err() {
            reader.abort();
        }
    }
}

fn snapshot(tail: &SharedTail) -> String {
    tail.lock().unwrap_or_else(|p| p.into_inner()).snapshot()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
