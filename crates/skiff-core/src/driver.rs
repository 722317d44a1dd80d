//! Semantic wrapper over the container engine.
//!
//! Everything the pool does to a container funnels through here: image
//! ensure, container creation from the pool configuration, command
//! execution with deadline and output collection, safe in-container file
//! writes, the first-time Python bootstrap, and the liveness probe.

use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::sandbox::SandboxId;
use base64::{engine::general_purpose, Engine as _};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use skiff_docker::{
    Bind, ContainerEngine, ContainerRef, ContainerSpec, ExecStarted, OutputChunk, TmpfsMount,
};
use std::time::Duration;

/// Name prefix for every container the pool owns.
pub const CONTAINER_NAME_PREFIX: &str = "sandbox-";

/// Working directory inside every sandbox.
const CONTAINER_WORKDIR: &str = "/app";

/// Read-only data mount target inside every sandbox.
const SEMANTIC_MOUNT: &str = "/app/semantic";

/// Host directory bound read-only onto [`SEMANTIC_MOUNT`].
const SEMANTIC_HOST_DIR: &str = "src/semantic";

/// Private scratch space: 64 MiB, no exec, no suid.
const TMPFS_OPTIONS: &str = "rw,noexec,nosuid,size=67108864";

/// Liveness probe command and its fixed deadline.
pub const HEALTH_PROBE_CMD: &str = "python3 -c 'print(1)'";
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Import probe deciding whether the image is already pre-baked.
const PYTHON_PROBE_CMD: &str = "python3 -c 'import pandas, numpy, scipy' 2>/dev/null";
const PYTHON_PROBE_TIMEOUT: Duration = Duration::from_millis(30_000);

/// First-time install of the Python data stack.
const PYTHON_BOOTSTRAP_CMD: &str = "apt-get update -qq && \
    DEBIAN_FRONTEND=noninteractive apt-get install -y -qq python3-pip python3-dev && \
    pip3 install --quiet pandas numpy scipy";

/// Result of a command run inside a container.
///
/// Both output strings are whitespace-trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl ExecResult {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Thin semantic driver over a [`ContainerEngine`].
pub struct ContainerDriver<E> {
    engine: E,
}

impl<E: ContainerEngine> ContainerDriver<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Check that the engine daemon answers.
    pub async fn ping(&self) -> Result<()> {
        self.engine.ping().await?;
        Ok(())
    }

    /// Pull the image unless it is already present locally.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.engine.image_exists(image).await? {
            tracing::debug!(image, "Image already present");
            return Ok(());
        }
        self.engine.pull_image(image).await?;
        Ok(())
    }

    /// Create (but do not start) the container backing a sandbox.
    pub async fn create_container(
        &self,
        config: &SandboxConfig,
        id: &SandboxId,
    ) -> Result<ContainerRef> {
        let spec = container_spec(config, id)?;
        tracing::debug!(sandbox_id = %id, image = %spec.image, "Creating container");
        let container = self.engine.create_container(&spec).await?;
        Ok(container)
    }

    pub async fn start_container(&self, container: &ContainerRef) -> Result<()> {
        self.engine.start_container(container).await?;
        Ok(())
    }

    pub async fn stop_container(&self, container: &ContainerRef, grace_secs: i64) -> Result<()> {
        self.engine.stop_container(container, grace_secs).await?;
        Ok(())
    }

    pub async fn remove_container(&self, container: &ContainerRef) -> Result<()> {
        self.engine.remove_container(container).await?;
        Ok(())
    }

    pub async fn is_running(&self, container: &ContainerRef) -> bool {
        self.engine.is_running(container).await
    }

    /// Containers left behind under the sandbox name prefix.
    pub async fn list_sandbox_containers(&self) -> Result<Vec<ContainerRef>> {
        let refs = self.engine.list_containers(CONTAINER_NAME_PREFIX).await?;
        Ok(refs)
    }

    /// Run a command under `/bin/bash -lc`, collecting stdout and stderr.
    ///
    /// If `timeout` elapses before the output stream ends, the stream is
    /// dropped and the call fails with a timeout error; the command inside
    /// the container is not guaranteed to be killed.
    pub async fn exec(
        &self,
        container: &ContainerRef,
        cmd: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecResult> {
        tracing::debug!(container = %container.name, cmd = %cmd, "Executing command");
        let shell = vec!["/bin/bash".to_string(), "-lc".to_string(), cmd.to_string()];
        let ExecStarted { exec_id, output } = self.engine.start_exec(container, &shell).await?;

        let collected = collect_output(output);
        let (stdout, stderr) = match timeout {
            Some(limit) => tokio::time::timeout(limit, collected).await.map_err(|_| {
                tracing::warn!(container = %container.name, timeout_ms = limit.as_millis() as u64, "Exec timed out");
                SandboxError::Timeout {
                    op: "exec",
                    timeout_ms: limit.as_millis() as u64,
                }
            })?,
            None => collected.await,
        };

        let exit_code = self.engine.exec_exit_code(&exec_id).await?.unwrap_or(-1);
        tracing::debug!(
            container = %container.name,
            exit_code,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "Command completed"
        );
        Ok(ExecResult {
            stdout: stdout.trim().to_string(),
            stderr: stderr.trim().to_string(),
            exit_code,
        })
    }

    /// Write bytes to a path inside the container via base64 piping.
    ///
    /// The path must match `[A-Za-z0-9/_.-]+`; anything else is rejected
    /// before a shell ever sees it.
    pub async fn write_file(
        &self,
        container: &ContainerRef,
        path: &str,
        bytes: &[u8],
    ) -> Result<()> {
        if !is_safe_path(path) {
            return Err(SandboxError::UnsafePath(path.to_string()));
        }
        let encoded = general_purpose::STANDARD.encode(bytes);
        let cmd = format!("echo '{encoded}' | base64 -d > {path}");
        let result = self.exec(container, &cmd, None).await?;
        if !result.success() {
            return Err(SandboxError::WriteFailed(result.stderr));
        }
        tracing::debug!(container = %container.name, path, size = bytes.len(), "File written");
        Ok(())
    }

    /// Install the Python data stack on first use.
    ///
    /// Pre-baked images skip the install: if the imports already resolve
    /// there is nothing to do.
    pub async fn init_python(&self, container: &ContainerRef, timeout: Duration) -> Result<()> {
        let probe = self
            .exec(container, PYTHON_PROBE_CMD, Some(PYTHON_PROBE_TIMEOUT))
            .await?;
        if probe.success() {
            tracing::debug!(container = %container.name, "Python stack already present, skipping bootstrap");
            return Ok(());
        }

        tracing::info!(container = %container.name, "Installing Python data stack");
        let result = self
            .exec(container, PYTHON_BOOTSTRAP_CMD, Some(timeout))
            .await?;
        if !result.success() {
            return Err(SandboxError::PythonSetupFailed(result.stderr));
        }
        Ok(())
    }

    /// Liveness probe with its fixed 5 s deadline.
    pub async fn health_probe(&self, container: &ContainerRef) -> Result<ExecResult> {
        self.exec(container, HEALTH_PROBE_CMD, Some(HEALTH_PROBE_TIMEOUT))
            .await
    }
}

/// Drain the demultiplexed exec stream into stdout/stderr buffers.
///
/// A mid-stream error ends collection with whatever arrived; truncated
/// output is not a failure.
async fn collect_output(
    mut output: BoxStream<'static, skiff_docker::Result<OutputChunk>>,
) -> (String, String) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    while let Some(item) = output.next().await {
        match item {
            Ok(OutputChunk::Stdout(bytes)) => stdout.extend_from_slice(&bytes),
            Ok(OutputChunk::Stderr(bytes)) => stderr.extend_from_slice(&bytes),
            Err(e) => {
                tracing::warn!(error = %e, "Exec stream error");
                break;
            }
        }
    }
    (
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    )
}

/// Build the container spec for one sandbox from the pool configuration.
fn container_spec(config: &SandboxConfig, id: &SandboxId) -> Result<ContainerSpec> {
    let semantic_dir = std::env::current_dir()?.join(SEMANTIC_HOST_DIR);
    Ok(ContainerSpec {
        name: format!("{CONTAINER_NAME_PREFIX}{id}"),
        image: config.image.clone(),
        cmd: vec!["sleep".into(), "infinity".into()],
        working_dir: CONTAINER_WORKDIR.into(),
        binds: vec![Bind {
            host_path: semantic_dir.to_string_lossy().into_owned(),
            container_path: SEMANTIC_MOUNT.into(),
            read_only: true,
        }],
        tmpfs: vec![TmpfsMount {
            container_path: "/tmp".into(),
            options: TMPFS_OPTIONS.into(),
        }],
        memory_bytes: config.resource_limits.memory_bytes,
        nano_cpus: config.resource_limits.nano_cpus,
        pids_limit: config.resource_limits.pids_limit,
        security_opt: vec!["no-new-privileges:true".into()],
    })
}

fn is_safe_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use skiff_docker::{ExecScript, FakeEngine};

    fn driver() -> ContainerDriver<FakeEngine> {
        ContainerDriver::new(FakeEngine::new())
    }

    #[test]
    fn test_safe_paths() {
        assert!(is_safe_path("/tmp/result.json"));
        assert!(is_safe_path("/app/data_2024-01.csv"));
        assert!(!is_safe_path(""));
        assert!(!is_safe_path("/tmp/out; rm -rf /"));
        assert!(!is_safe_path("/tmp/with space"));
        assert!(!is_safe_path("/tmp/$(whoami)"));
        assert!(!is_safe_path("/tmp/tick`ed"));
        assert!(!is_safe_path("/tmp/quo'te"));
    }

    #[test]
    fn test_container_spec_shape() {
        let config = SandboxConfig::default();
        let id = SandboxId::from_raw("ab12cd34");
        let spec = container_spec(&config, &id).expect("spec");
        assert_eq!(spec.name, "sandbox-ab12cd34");
        assert_eq!(spec.image, "ubuntu:22.04");
        assert_eq!(spec.cmd, vec!["sleep".to_string(), "infinity".to_string()]);
        assert_eq!(spec.working_dir, "/app");
        assert_eq!(spec.binds.len(), 1);
        assert!(spec.binds[0].read_only);
        assert_eq!(spec.binds[0].container_path, "/app/semantic");
        assert!(spec.binds[0].host_path.ends_with("src/semantic"));
        assert_eq!(spec.tmpfs.len(), 1);
        assert_eq!(spec.tmpfs[0].container_path, "/tmp");
        assert_eq!(spec.tmpfs[0].options, "rw,noexec,nosuid,size=67108864");
        assert_eq!(spec.security_opt, vec!["no-new-privileges:true".to_string()]);
        assert_eq!(spec.memory_bytes, 536_870_912);
    }

    #[tokio::test]
    async fn test_exec_trims_and_reports_exit_code() {
        let d = driver();
        d.engine().on_exec(|_, _| {
            ExecScript::with_chunks(
                vec![
                    OutputChunk::Stdout(Bytes::from_static(b"  hello\n")),
                    OutputChunk::Stderr(Bytes::from_static(b"warn\n\n")),
                ],
                3,
            )
        });
        let c = ContainerRef::new("sandbox-x");
        let result = d.exec(&c, "anything", None).await.expect("exec");
        assert_eq!(result.stdout, "hello");
        assert_eq!(result.stderr, "warn");
        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_exec_runs_through_login_shell() {
        let d = driver();
        let c = ContainerRef::new("sandbox-x");
        d.exec(&c, "ls /app", None).await.expect("exec");
        let log = d.engine().exec_log();
        assert_eq!(log[0].cmd, "ls /app");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exec_timeout_destroys_stream() {
        let d = driver();
        d.engine()
            .on_exec(|_, _| ExecScript::delayed(Duration::from_secs(1)));
        let c = ContainerRef::new("sandbox-x");
        let err = d
            .exec(&c, "sleep 1", Some(Duration::from_millis(100)))
            .await
            .expect_err("should time out");
        assert!(matches!(
            err,
            SandboxError::Timeout {
                op: "exec",
                timeout_ms: 100
            }
        ));
    }

    #[tokio::test]
    async fn test_write_file_pipes_base64() {
        let d = driver();
        let c = ContainerRef::new("sandbox-x");
        d.write_file(&c, "/tmp/out.txt", b"hello world")
            .await
            .expect("write");
        let log = d.engine().exec_log();
        let encoded = general_purpose::STANDARD.encode(b"hello world");
        assert_eq!(log[0].cmd, format!("echo '{encoded}' | base64 -d > /tmp/out.txt"));
    }

    #[tokio::test]
    async fn test_write_file_rejects_unsafe_path_before_exec() {
        let d = driver();
        let c = ContainerRef::new("sandbox-x");
        let err = d
            .write_file(&c, "/tmp/evil;id", b"x")
            .await
            .expect_err("unsafe");
        assert!(matches!(err, SandboxError::UnsafePath(_)));
        assert!(d.engine().exec_log().is_empty());
    }

    #[tokio::test]
    async fn test_write_file_surfaces_nonzero_exit() {
        let d = driver();
        d.engine()
            .on_exec(|_, _| ExecScript::failure(1, "disk full"));
        let c = ContainerRef::new("sandbox-x");
        let err = d
            .write_file(&c, "/tmp/out.txt", b"x")
            .await
            .expect_err("write fails");
        assert!(matches!(err, SandboxError::WriteFailed(ref s) if s == "disk full"));
    }

    #[tokio::test]
    async fn test_init_python_skips_prebaked_image() {
        let d = driver();
        let c = ContainerRef::new("sandbox-x");
        d.init_python(&c, Duration::from_secs(120))
            .await
            .expect("init");
        let log = d.engine().exec_log();
        assert_eq!(log.len(), 1);
        assert!(log[0].cmd.contains("import pandas"));
    }

    #[tokio::test]
    async fn test_init_python_installs_when_probe_fails() {
        let d = driver();
        d.engine().on_exec(|_, cmd| {
            if cmd.contains("import pandas") {
                ExecScript::failure(1, "ModuleNotFoundError")
            } else {
                ExecScript::silent()
            }
        });
        let c = ContainerRef::new("sandbox-x");
        d.init_python(&c, Duration::from_secs(120))
            .await
            .expect("init");
        let log = d.engine().exec_log();
        assert_eq!(log.len(), 2);
        assert!(log[1].cmd.contains("apt-get"));
        assert!(log[1].cmd.contains("pandas numpy scipy"));
    }

    #[tokio::test]
    async fn test_init_python_surfaces_install_failure() {
        let d = driver();
        d.engine().on_exec(|_, cmd| {
            if cmd.contains("import pandas") {
                ExecScript::failure(1, "ModuleNotFoundError")
            } else {
                ExecScript::failure(100, "apt broke")
            }
        });
        let c = ContainerRef::new("sandbox-x");
        let err = d
            .init_python(&c, Duration::from_secs(120))
            .await
            .expect_err("install fails");
        assert!(matches!(err, SandboxError::PythonSetupFailed(ref s) if s == "apt broke"));
    }

    #[tokio::test]
    async fn test_ensure_image_pulls_once() {
        let d = driver();
        d.ensure_image("ubuntu:22.04").await.expect("ensure");
        assert!(d.engine().image_pulled("ubuntu:22.04"));
        // Second call sees the image and does not re-pull.
        d.ensure_image("ubuntu:22.04").await.expect("ensure again");
    }

    #[tokio::test]
    async fn test_health_probe_command() {
        let d = driver();
        let c = ContainerRef::new("sandbox-x");
        let result = d.health_probe(&c).await.expect("probe");
        assert!(result.success());
        assert_eq!(d.engine().exec_log()[0].cmd, HEALTH_PROBE_CMD);
    }
}
