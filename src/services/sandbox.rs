//! Script sandbox: runs LLM-generated code as a subprocess in isolation.
//!
//! Each run gets a fresh working directory containing only the source
//! file. The subprocess is placed in its own process group so a timeout or
//! stdout overflow kills the whole tree; partial output captured before
//! the kill is returned. Nonzero exit codes, timeouts and malformed output
//! are first-class outcomes, not exceptions.

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::models::SandboxConfig;

/// Stderr is capped well below stdout; it only feeds diagnostics.
const STDERR_BYTE_CAP: usize = 256 * 1024;

/// Grace period for pipe drain after the child has been killed.
const REAP_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to spawn subprocess: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Sandbox I/O failed: {0}")]
    Io(#[source] std::io::Error),
}

/// What one sandbox run produced.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Exit code; `None` when the process died to a signal (e.g. our kill).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub wall_ms: u64,
    /// The wall-clock cap fired and the process tree was killed.
    pub timed_out: bool,
    /// Stdout crossed the byte cap and the process tree was killed.
    pub truncated: bool,
}

/// Inputs for one run.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub source: String,
    pub timeout: Duration,
    /// Extra environment (e.g. QUANTLAB_MARKET_DB).
    pub env: Vec<(String, String)>,
    /// Piped to the child's stdin when present.
    pub stdin: Option<String>,
}

pub struct ScriptSandbox {
    config: SandboxConfig,
}

impl ScriptSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn interpreter(&self) -> &str {
        &self.config.interpreter
    }

    pub fn scanner_timeout(&self) -> Duration {
        Duration::from_secs(self.config.scanner_timeout_secs)
    }

    pub fn executor_timeout(&self) -> Duration {
        Duration::from_secs(self.config.executor_timeout_secs)
    }

    /// Run one script to completion, kill, or overflow. The working
    /// directory is removed before returning, success or failure.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, SandboxError> {
        let workdir = PathBuf::from(&self.config.workdir_root).join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&workdir)
            .await
            .map_err(SandboxError::Io)?;

        let result = self.execute_in(&workdir, &request).await;

        if let Err(err) = tokio::fs::remove_dir_all(&workdir).await {
            warn!(workdir = %workdir.display(), error = %err, "Failed to remove sandbox workdir");
        }

        result
    }

    async fn execute_in(
        &self,
        workdir: &Path,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let script_path = workdir.join("script");
        tokio::fs::write(&script_path, &request.source)
            .await
            .map_err(SandboxError::Io)?;

        let mut command = Command::new(&self.config.interpreter);
        command
            .arg(&script_path)
            .current_dir(workdir)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);
        for (key, value) in &request.env {
            command.env(key, value);
        }

        let started = Instant::now();
        let mut child = command.spawn().map_err(SandboxError::Spawn)?;
        let pgid = child.id().map(|id| Pid::from_raw(id as i32));

        if let (Some(input), Some(mut stdin)) = (request.stdin.clone(), child.stdin.take()) {
            // A child that never reads its stdin must not wedge the run.
            tokio::spawn(async move {
                let _ = stdin.write_all(input.as_bytes()).await;
                let _ = stdin.shutdown().await;
            });
        }

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));

        let mut stdout_task = tokio::spawn(read_capped(
            stdout_pipe,
            Arc::clone(&stdout_buf),
            self.config.stdout_byte_cap,
        ));
        let stderr_task = tokio::spawn(read_capped(
            stderr_pipe,
            Arc::clone(&stderr_buf),
            STDERR_BYTE_CAP,
        ));

        let deadline = started + request.timeout;
        let mut timed_out = false;
        let mut truncated = false;
        let mut stdout_done = false;

        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break status.map_err(SandboxError::Io)?;
                }
                overflowed = &mut stdout_task, if !stdout_done => {
                    stdout_done = true;
                    if overflowed.unwrap_or(false) {
                        truncated = true;
                        kill_process_group(pgid);
                    }
                }
                () = tokio::time::sleep_until(deadline), if !timed_out => {
                    timed_out = true;
                    kill_process_group(pgid);
                }
            }
        };

        // Drain the readers; a surviving grandchild can hold the pipes
        // open, so bound the wait and kill again if it fires.
        if !stdout_done
            && tokio::time::timeout(REAP_GRACE, &mut stdout_task).await.is_err()
        {
            kill_process_group(pgid);
            stdout_task.abort();
        }
        let _ = tokio::time::timeout(REAP_GRACE, stderr_task).await;

        let stdout = String::from_utf8_lossy(&stdout_buf.lock().await).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_buf.lock().await).into_owned();
        let wall_ms = started.elapsed().as_millis() as u64;

        debug!(
            exit_code = ?status.code(),
            wall_ms,
            timed_out,
            truncated,
            stdout_bytes = stdout.len(),
            "Sandbox run finished"
        );

        Ok(ExecutionOutcome {
            exit_code: status.code(),
            stdout,
            stderr,
            wall_ms,
            timed_out,
            truncated,
        })
    }
}

/// Read a pipe into the shared buffer, stopping at `cap`. Returns true
/// when the cap was crossed.
async fn read_capped(
    pipe: Option<impl AsyncReadExt + Unpin>,
    buffer: Arc<Mutex<Vec<u8>>>,
    cap: usize,
) -> bool {
    let Some(mut pipe) = pipe else {
        return false;
    };

    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => return false,
            Ok(n) => {
                let mut buffer = buffer.lock().await;
                let room = cap.saturating_sub(buffer.len());
                buffer.extend_from_slice(&chunk[..n.min(room)]);
                if n > room {
                    return true;
                }
            }
            Err(_) => return false,
        }
    }
}

fn kill_process_group(pgid: Option<Pid>) {
    if let Some(pgid) = pgid {
        if let Err(err) = killpg(pgid, Signal::SIGKILL) {
            debug!(pgid = %pgid, error = %err, "killpg failed (process likely already gone)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh_sandbox() -> (ScriptSandbox, tempfile::TempDir) {
        let workdir = tempfile::tempdir().expect("tempdir");
        let config = SandboxConfig {
            interpreter: "sh".to_string(),
            workdir_root: workdir.path().to_string_lossy().into_owned(),
            scanner_timeout_secs: 2,
            executor_timeout_secs: 2,
            stdout_byte_cap: 64 * 1024,
        };
        (ScriptSandbox::new(config), workdir)
    }

    fn request(source: &str, timeout_secs: u64) -> ExecutionRequest {
        ExecutionRequest {
            source: source.to_string(),
            timeout: Duration::from_secs(timeout_secs),
            env: vec![],
            stdin: None,
        }
    }

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let (sandbox, _dir) = sh_sandbox();
        let outcome = sandbox
            .execute(request("echo '[{\"ticker\": \"AAPL\"}]'", 5))
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.stdout.contains("AAPL"));
        assert!(!outcome.timed_out);
        assert!(!outcome.truncated);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_an_outcome() {
        let (sandbox, _dir) = sh_sandbox();
        let outcome = sandbox
            .execute(request("echo partial; exit 3", 5))
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, Some(3));
        assert!(outcome.stdout.contains("partial"));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_keeps_partial_output() {
        let (sandbox, _dir) = sh_sandbox();
        let outcome = sandbox
            .execute(request("echo before; sleep 30; echo after", 1))
            .await
            .unwrap();

        assert!(outcome.timed_out);
        assert!(outcome.stdout.contains("before"));
        assert!(!outcome.stdout.contains("after"));
        assert!(outcome.wall_ms < 15_000);
    }

    #[tokio::test]
    async fn test_stdout_overflow_reports_truncated() {
        let (sandbox, _dir) = sh_sandbox();
        // Emits ~10 MiB of zeros against a 64 KiB cap.
        let outcome = sandbox
            .execute(request(
                "i=0; while [ $i -lt 200000 ]; do echo 0000000000000000000000000000000000000000000000000000; i=$((i+1)); done",
                10,
            ))
            .await
            .unwrap();

        assert!(outcome.truncated);
        assert!(outcome.stdout.len() <= 64 * 1024);
    }

    #[tokio::test]
    async fn test_stdin_is_piped() {
        let (sandbox, _dir) = sh_sandbox();
        let mut req = request("cat -", 5);
        req.stdin = Some("[{\"ticker\": \"X\"}]".to_string());
        let outcome = sandbox.execute(req).await.unwrap();

        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.stdout.contains("\"X\""));
    }

    #[tokio::test]
    async fn test_env_reaches_child() {
        let (sandbox, _dir) = sh_sandbox();
        let mut req = request("printf '%s' \"$QUANTLAB_MARKET_DB\"", 5);
        req.env = vec![("QUANTLAB_MARKET_DB".to_string(), "/data/market.db".to_string())];
        let outcome = sandbox.execute(req).await.unwrap();

        assert_eq!(outcome.stdout, "/data/market.db");
    }

    #[tokio::test]
    async fn test_workdir_removed_after_run() {
        let (sandbox, dir) = sh_sandbox();
        sandbox.execute(request("pwd", 5)).await.unwrap();
        sandbox.execute(request("exit 7", 5)).await.unwrap();

        let remaining: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_surfaces() {
        let workdir = tempfile::tempdir().expect("tempdir");
        let config = SandboxConfig {
            interpreter: "/nonexistent/interpreter".to_string(),
            workdir_root: workdir.path().to_string_lossy().into_owned(),
            ..SandboxConfig::default()
        };
        let sandbox = ScriptSandbox::new(config);
        let err = sandbox.execute(request("echo hi", 5)).await.unwrap_err();
        assert!(matches!(err, SandboxError::Spawn(_)));
    }
}
