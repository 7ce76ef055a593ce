/// Execution Engine - Abstraction for Code Execution
///
/// **Core Responsibility:**
/// Run a materialised submission with one test input and capture raw
/// outputs.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (local process, Docker, ...)
/// - Engine does NOT know scoring rules
/// - Engine does NOT evaluate correctness
/// - Engine returns raw outputs for the Evaluator to judge
///
/// Launch failures, non-zero exits and timeouts are ordinary outcomes and are
/// reported inside [`TestExecutionOutput`]. An `Err` from an engine means
/// the infrastructure itself failed.
use crate::artifact::ExecutionArtifact;
use crate::config::LanguageConfig;
use crate::evaluator::TestExecutionOutput;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cap on captured stdout per run; the rest is drained and discarded
pub const MAX_STDOUT_BYTES: usize = 1024 * 1024;
/// Cap on captured stderr per run, before sanitising and truncation
pub const MAX_STDERR_BYTES: usize = 64 * 1024;

/// How long to wait for pipes to close after the process has exited
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Result of the optional compile step
#[derive(Debug, Clone, PartialEq)]
pub struct CompilationResult {
    pub success: bool,
    pub diagnostics: String,
}

impl CompilationResult {
    pub fn success() -> Self {
        Self {
            success: true,
            diagnostics: String::new(),
        }
    }

    pub fn failure(diagnostics: impl Into<String>) -> Self {
        Self {
            success: false,
            diagnostics: diagnostics.into(),
        }
    }
}

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build the artifact for languages with a compile step. Called once per
    /// grading run, before any test case.
    async fn compile(
        &self,
        artifact: &ExecutionArtifact,
        language: &LanguageConfig,
        cancel: &CancellationToken,
    ) -> Result<CompilationResult>;

    /// Run the artifact once with `input` on stdin under a hard `timeout`.
    async fn run(
        &self,
        artifact: &ExecutionArtifact,
        language: &LanguageConfig,
        input: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<TestExecutionOutput>;
}

/// Runs submissions as local child processes.
///
/// Each child gets a scrubbed environment, its own process group and the
/// artifact directory as working directory. On timeout or cancellation the
/// whole process group is killed, so forked helpers cannot outlive the run.
#[derive(Debug, Default, Clone)]
pub struct ProcessEngine;

impl ProcessEngine {
    pub fn new() -> Self {
        Self
    }
}

enum Waited {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

struct Finished {
    waited: Waited,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    stdout_truncated: bool,
    elapsed: Duration,
}

/// Read a pipe to EOF, keeping at most `limit` bytes. Reading continues past
/// the limit so the child never blocks on a full pipe.
async fn read_capped<R>(mut reader: R, limit: usize) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(buf.len());
                if n > room {
                    buf.extend_from_slice(&chunk[..room]);
                    truncated = true;
                } else {
                    buf.extend_from_slice(&chunk[..n]);
                }
            }
        }
    }
    (buf, truncated)
}

async fn join_reader(handle: JoinHandle<(Vec<u8>, bool)>) -> (Vec<u8>, bool) {
    let abort = handle.abort_handle();
    match tokio::time::timeout(PIPE_DRAIN_GRACE, handle).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(_)) => (Vec::new(), false),
        Err(_) => {
            // a leftover descendant still holds the pipe open
            abort.abort();
            (Vec::new(), false)
        }
    }
}

/// SIGKILL the child's process group. The pid is captured at spawn time since
/// tokio forgets it once the child has been reaped.
fn kill_process_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Wait until the child has exited while leaving it unreaped. A zombie
/// leader keeps its pid, and with it the process group id, from being handed
/// to another process before the group is killed.
#[cfg(target_os = "linux")]
async fn wait_for_exit(child: &mut Child, pid: Option<u32>) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::wait::{waitid, Id, WaitPidFlag};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return child.wait().await.map(|_| ());
    };
    tokio::task::spawn_blocking(move || loop {
        match waitid(
            Id::Pid(Pid::from_raw(pid as i32)),
            WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT,
        ) {
            Err(Errno::EINTR) => continue,
            Ok(_) => return Ok(()),
            Err(e) => return Err(std::io::Error::from(e)),
        }
    })
    .await
    .map_err(std::io::Error::other)?
}

#[cfg(not(target_os = "linux"))]
async fn wait_for_exit(child: &mut Child, _pid: Option<u32>) -> std::io::Result<()> {
    child.wait().await.map(|_| ())
}

fn kill_process_tree(child: &mut Child, pid: Option<u32>) {
    kill_process_group(pid);
    let _ = child.start_kill();
}

fn describe_exit(status: &ExitStatus) -> Option<String> {
    if status.success() {
        return None;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(match signal {
                9 => "[killed by signal 9: likely exceeded a resource limit]".to_string(),
                11 => "[killed by signal 11: segmentation fault]".to_string(),
                other => format!("[killed by signal {}]", other),
            });
        }
    }
    status
        .code()
        .map(|code| format!("[exited with code {}]", code))
}

impl ProcessEngine {
    fn command(
        &self,
        artifact: &ExecutionArtifact,
        language: &LanguageConfig,
        program: &str,
        args: &[String],
    ) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(artifact.dir())
            .env_clear()
            .env("HOME", artifact.dir())
            .env("LANG", "C.UTF-8")
            .envs(&language.execution.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // the interpreter still has to be found
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Spawn, feed stdin, wait under the deadline and collect output.
    /// Returns `Ok(Err(message))` when the process could not be launched.
    async fn spawn_and_wait(
        &self,
        mut cmd: Command,
        input: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<std::result::Result<Finished, String>> {
        let start = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return Ok(Err(format!("failed to launch submission: {}", e))),
        };
        let pid = child.id();

        let stdin = child.stdin.take();
        let input = input.as_bytes().to_vec();
        let writer = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                // the child may exit without reading; a broken pipe is fine
                let _ = stdin.write_all(&input).await;
                let _ = stdin.shutdown().await;
            }
        });

        let stdout = child.stdout.take().context("missing stdout pipe")?;
        let stderr = child.stderr.take().context("missing stderr pipe")?;
        let out_task = tokio::spawn(read_capped(stdout, MAX_STDOUT_BYTES));
        let err_task = tokio::spawn(read_capped(stderr, MAX_STDERR_BYTES));

        let stopped = tokio::select! {
            res = tokio::time::timeout(timeout, wait_for_exit(&mut child, pid)) => match res {
                Ok(exited) => {
                    exited.context("failed to wait for submission process")?;
                    None
                }
                Err(_) => Some(Waited::TimedOut),
            },
            _ = cancel.cancelled() => Some(Waited::Cancelled),
        };
        let elapsed = start.elapsed();

        let waited = match stopped {
            None => {
                // the leader is not reaped yet, so the group id is still ours;
                // anything the submission left running in it goes too
                kill_process_group(pid);
                let status = child
                    .wait()
                    .await
                    .context("failed to wait for submission process")?;
                Waited::Exited(status)
            }
            Some(waited) => {
                kill_process_tree(&mut child, pid);
                let _ = child.wait().await;
                waited
            }
        };
        writer.abort();

        let ((stdout, stdout_truncated), (stderr, _)) = match waited {
            Waited::Exited(_) => (join_reader(out_task).await, join_reader(err_task).await),
            // partial output of killed runs is discarded
            Waited::TimedOut | Waited::Cancelled => {
                out_task.abort();
                err_task.abort();
                ((Vec::new(), false), (Vec::new(), false))
            }
        };

        Ok(Ok(Finished {
            waited,
            stdout,
            stderr,
            stdout_truncated,
            elapsed,
        }))
    }
}

#[async_trait]
impl ExecutionEngine for ProcessEngine {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn compile(
        &self,
        artifact: &ExecutionArtifact,
        language: &LanguageConfig,
        cancel: &CancellationToken,
    ) -> Result<CompilationResult> {
        let (Some((program, args)), Some(step)) = (
            language.compile_command(&artifact.host_paths()),
            language.execution.compile.as_ref(),
        ) else {
            return Ok(CompilationResult::success());
        };

        debug!(language = %language.name, program = %program, "Compiling submission");
        let cmd = self.command(artifact, language, &program, &args);
        let timeout = Duration::from_millis(step.timeout_ms);

        let finished = match self.spawn_and_wait(cmd, "", timeout, cancel).await? {
            Ok(finished) => finished,
            Err(message) => return Ok(CompilationResult::failure(message)),
        };

        let result = match finished.waited {
            Waited::Exited(status) if status.success() => CompilationResult::success(),
            Waited::Exited(_) => {
                let mut diagnostics = String::from_utf8_lossy(&finished.stderr).into_owned();
                if diagnostics.trim().is_empty() {
                    diagnostics = String::from_utf8_lossy(&finished.stdout).into_owned();
                }
                CompilationResult::failure(diagnostics)
            }
            Waited::TimedOut => CompilationResult::failure(format!(
                "compilation exceeded {} ms",
                step.timeout_ms
            )),
            Waited::Cancelled => CompilationResult::failure("compilation cancelled"),
        };

        debug!(
            language = %language.name,
            success = result.success,
            compilation_ms = finished.elapsed.as_millis() as u64,
            "Compilation finished"
        );
        Ok(result)
    }

    async fn run(
        &self,
        artifact: &ExecutionArtifact,
        language: &LanguageConfig,
        input: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<TestExecutionOutput> {
        let (program, args) = language.run_command(&artifact.host_paths());
        let cmd = self.command(artifact, language, &program, &args);

        let finished = match self.spawn_and_wait(cmd, input, timeout, cancel).await? {
            Ok(finished) => finished,
            Err(message) => {
                warn!(program = %program, error = %message, "Submission process failed to launch");
                return Ok(TestExecutionOutput::launch_failure(0, message));
            }
        };

        let execution_time_ms = finished.elapsed.as_millis() as u64;
        let mut output = TestExecutionOutput {
            test_id: 0, // set by the grader
            stdout: String::from_utf8_lossy(&finished.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&finished.stderr).into_owned(),
            exit_code: None,
            execution_time_ms,
            timed_out: false,
            runtime_error: false,
        };

        match finished.waited {
            Waited::Exited(status) => {
                output.exit_code = status.code();
                if let Some(note) = describe_exit(&status) {
                    output.runtime_error = true;
                    if output.stderr.trim().is_empty() {
                        output.stderr = note;
                    }
                }
                if finished.stdout_truncated {
                    output.stderr.push_str("\n[stdout truncated]");
                }
            }
            Waited::TimedOut => {
                output.timed_out = true;
                output.stderr = "[Execution timed out]".to_string();
            }
            Waited::Cancelled => {
                output.runtime_error = true;
                output.stderr = "[Execution cancelled]".to_string();
            }
        }

        Ok(output)
    }
}
