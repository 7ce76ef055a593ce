/// Docker-based execution engine for sandboxed code execution
///
/// **Docker Execution Rules:**
/// 1. Pulls the language image if not present
/// 2. Bind-mounts the artifact directory at `/sandbox` (read-only for runs)
/// 3. Creates one container per compile or test run with:
///    - Network disabled
///    - CPU/memory/pid limits from the language config
/// 4. Feeds the test input from a staged file, since attached stdin over the
///    Docker API is not reliable for short-lived containers
/// 5. Captures stdout/stderr from the log stream
/// 6. Kills the container on timeout or cancellation
/// 7. Removes the container on every exit path
///
/// The artifact root must be a path the Docker daemon can see (i.e. not a
/// private tmpfs of a containerised grader).
use crate::artifact::{ExecutionArtifact, SANDBOX_DIR};
use crate::config::LanguageConfig;
use crate::engine::{CompilationResult, ExecutionEngine, MAX_STDERR_BYTES, MAX_STDOUT_BYTES};
use crate::evaluator::TestExecutionOutput;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PIDS_LIMIT: i64 = 64;

/// Container cleanup guard - guarantees container removal on drop,
/// including when the grading future is cancelled mid-run
struct ContainerGuard {
    docker: Docker,
    container_id: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let docker = self.docker.clone();
        let container_id = std::mem::take(&mut self.container_id);
        // Drop cannot be async; removal is best-effort
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let options = RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                };
                if let Err(e) = docker.remove_container(&container_id, Some(options)).await {
                    warn!(container_id = %container_id, error = %e, "Failed to remove container");
                }
            });
        }
    }
}

enum ContainerOutcome {
    Exited(i64),
    TimedOut,
    Cancelled,
}

struct ContainerRun {
    outcome: ContainerOutcome,
    stdout: String,
    stderr: String,
    stdout_truncated: bool,
    elapsed: Duration,
}

pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self { docker })
    }

    /// Fail fast when the daemon is unreachable
    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await.context("Docker daemon did not answer ping")?;
        Ok(())
    }

    /// Ensure Docker image is available (pull if needed)
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    fn container_config(
        &self,
        artifact: &ExecutionArtifact,
        language: &LanguageConfig,
        cmd: Vec<String>,
        writable: bool,
    ) -> Config<String> {
        let mode = if writable { "rw" } else { "ro" };
        let env = language
            .execution
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .chain(["HOME=/tmp".to_string(), "LANG=C.UTF-8".to_string()])
            .collect();

        Config {
            image: Some(language.image.clone()),
            cmd: Some(cmd),
            env: Some(env),
            working_dir: Some(SANDBOX_DIR.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                binds: Some(vec![format!(
                    "{}:{}:{}",
                    artifact.dir().display(),
                    SANDBOX_DIR,
                    mode
                )]),
                memory: Some(i64::from(language.memory_limit_mb) * 1024 * 1024),
                nano_cpus: Some((f64::from(language.cpu_limit) * 1_000_000_000.0) as i64),
                pids_limit: Some(PIDS_LIMIT),
                network_mode: Some("none".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn run_container(
        &self,
        config: Config<String>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ContainerRun> {
        let image = config.image.clone().unwrap_or_default();
        self.ensure_image(&image)
            .await
            .with_context(|| format!("Failed to ensure Docker image '{}' is available", image))?;

        let name = format!("judgemaster-{}", uuid::Uuid::new_v4());
        let create_options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .context("Failed to create Docker container")?;
        let container_id = container.id;
        let _guard = ContainerGuard {
            docker: self.docker.clone(),
            container_id: container_id.clone(),
        };

        let start = Instant::now();
        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")?;

        let collect = async {
            let mut stdout = String::new();
            let mut stderr = String::new();
            let mut stdout_truncated = false;

            let logs_options = Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            });
            let mut logs = self.docker.logs(&container_id, logs_options);
            while let Some(chunk) = logs.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        if stdout.len() + message.len() > MAX_STDOUT_BYTES {
                            stdout_truncated = true;
                        } else {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        if stderr.len() + message.len() <= MAX_STDERR_BYTES {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(container_id = %container_id, error = %e, "Error reading container logs");
                        break;
                    }
                }
            }

            let wait_options = Some(WaitContainerOptions {
                condition: "not-running",
            });
            let mut wait = self.docker.wait_container(&container_id, wait_options);
            let exit_code = match wait.next().await {
                Some(Ok(response)) => Ok(response.status_code),
                // bollard reports non-zero exits as a wait error carrying the code
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
                Some(Err(e)) => Err(anyhow::Error::new(e).context("Failed to wait for container")),
                None => Err(anyhow::anyhow!("No wait response from container")),
            };

            exit_code.map(|code| (code, stdout, stderr, stdout_truncated))
        };

        let outcome = tokio::select! {
            res = tokio::time::timeout(timeout, collect) => match res {
                Ok(finished) => Some(finished?),
                Err(_) => None,
            },
            _ = cancel.cancelled() => {
                self.kill(&container_id).await;
                return Ok(ContainerRun {
                    outcome: ContainerOutcome::Cancelled,
                    stdout: String::new(),
                    stderr: String::new(),
                    stdout_truncated: false,
                    elapsed: start.elapsed(),
                });
            }
        };
        let elapsed = start.elapsed();

        Ok(match outcome {
            Some((code, stdout, stderr, stdout_truncated)) => ContainerRun {
                outcome: ContainerOutcome::Exited(code),
                stdout,
                stderr,
                stdout_truncated,
                elapsed,
            },
            None => {
                self.kill(&container_id).await;
                ContainerRun {
                    outcome: ContainerOutcome::TimedOut,
                    stdout: String::new(),
                    stderr: String::new(),
                    stdout_truncated: false,
                    elapsed,
                }
            }
        })
    }

    async fn kill(&self, container_id: &str) {
        if let Err(e) = self
            .docker
            .kill_container(container_id, None::<KillContainerOptions<String>>)
            .await
        {
            warn!(container_id = %container_id, error = %e, "Failed to kill container");
        }
    }
}

#[async_trait]
impl ExecutionEngine for DockerEngine {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn compile(
        &self,
        artifact: &ExecutionArtifact,
        language: &LanguageConfig,
        cancel: &CancellationToken,
    ) -> Result<CompilationResult> {
        let (Some((program, args)), Some(step)) = (
            language.compile_command(&artifact.sandbox_paths()),
            language.execution.compile.as_ref(),
        ) else {
            return Ok(CompilationResult::success());
        };

        let cmd = std::iter::once(program).chain(args).collect();
        let config = self.container_config(artifact, language, cmd, true);
        let run = self
            .run_container(config, Duration::from_millis(step.timeout_ms), cancel)
            .await?;

        Ok(match run.outcome {
            ContainerOutcome::Exited(0) => CompilationResult::success(),
            ContainerOutcome::Exited(_) if run.stderr.trim().is_empty() => {
                CompilationResult::failure(run.stdout)
            }
            ContainerOutcome::Exited(_) => CompilationResult::failure(run.stderr),
            ContainerOutcome::TimedOut => {
                CompilationResult::failure(format!("compilation exceeded {} ms", step.timeout_ms))
            }
            ContainerOutcome::Cancelled => CompilationResult::failure("compilation cancelled"),
        })
    }

    async fn run(
        &self,
        artifact: &ExecutionArtifact,
        language: &LanguageConfig,
        input: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<TestExecutionOutput> {
        let stdin_path = artifact
            .stage_stdin(input)
            .await
            .context("Failed to stage test input")?;
        let (program, args) = language.run_command(&artifact.sandbox_paths());

        let mut cmd = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("exec \"$0\" \"$@\" < {}", stdin_path),
            program,
        ];
        cmd.extend(args);

        let config = self.container_config(artifact, language, cmd, false);
        let run = self.run_container(config, timeout, cancel).await?;

        let mut output = TestExecutionOutput {
            test_id: 0, // set by the grader
            stdout: run.stdout,
            stderr: run.stderr,
            exit_code: None,
            execution_time_ms: run.elapsed.as_millis() as u64,
            timed_out: false,
            runtime_error: false,
        };

        match run.outcome {
            ContainerOutcome::Exited(code) => {
                output.exit_code = i32::try_from(code).ok();
                if code != 0 {
                    output.runtime_error = true;
                    let note = match code {
                        137 => "[Container killed: likely OOM or exceeded memory limit]".to_string(),
                        139 => "[Container killed: segmentation fault]".to_string(),
                        other => format!("[exited with code {}]", other),
                    };
                    if output.stderr.trim().is_empty() {
                        output.stderr = note;
                    } else if code == 137 || code == 139 {
                        output.stderr.push('\n');
                        output.stderr.push_str(&note);
                    }
                }
                if run.stdout_truncated {
                    output.stderr.push_str("\n[stdout truncated]");
                }
            }
            ContainerOutcome::TimedOut => {
                output.timed_out = true;
                output.stderr = "[Execution timed out]".to_string();
            }
            ContainerOutcome::Cancelled => {
                output.runtime_error = true;
                output.stderr = "[Execution cancelled]".to_string();
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanguageConfigManager;
    use judgemaster_common::types::Language;

    fn python() -> LanguageConfig {
        LanguageConfigManager::builtin()
            .get_config(&Language::Python)
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_mounts_artifact_read_only() {
        let Ok(engine) = DockerEngine::connect() else {
            return;
        };
        let language = python();
        let artifact = ExecutionArtifact::materialize(None, &language, "").await.unwrap();

        let config = engine.container_config(&artifact, &language, vec!["true".into()], false);
        let host = config.host_config.unwrap();

        assert_eq!(config.network_disabled, Some(true));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert!(host.binds.unwrap()[0].ends_with(":/sandbox:ro"));
        assert_eq!(host.memory, Some(256 * 1024 * 1024));
    }

    #[tokio::test]
    #[ignore] // Requires Docker to be running
    async fn test_docker_python_factorial() {
        let engine = DockerEngine::connect().unwrap();
        let language = python();
        let source = "import math\nprint(math.factorial(int(input())))\n";
        let artifact = ExecutionArtifact::materialize(None, &language, source).await.unwrap();

        let output = engine
            .run(&artifact, &language, "5\n", Duration::from_secs(10), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.stdout.trim(), "120");
        assert!(!output.runtime_error);
    }

    #[tokio::test]
    #[ignore] // Requires Docker to be running
    async fn test_docker_timeout_kills_container() {
        let engine = DockerEngine::connect().unwrap();
        let language = python();
        let artifact = ExecutionArtifact::materialize(None, &language, "while True:\n    pass\n")
            .await
            .unwrap();

        let output = engine
            .run(&artifact, &language, "", Duration::from_secs(2), &CancellationToken::new())
            .await
            .unwrap();

        assert!(output.timed_out);
    }
}
