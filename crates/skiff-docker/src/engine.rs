//! The engine seam: everything the sandbox pool needs from a container engine.
//!
//! The pool layer is written entirely against [`ContainerEngine`]; the
//! production implementation is [`DockerEngine`](crate::DockerEngine) and
//! tests use [`FakeEngine`](crate::FakeEngine).

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

/// Opaque reference to an engine-side container.
///
/// The engine addresses containers by name; the pool treats this value as
/// an opaque handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    /// Engine-side container name.
    pub name: String,
}

impl ContainerRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl std::fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// One demultiplexed slice of exec output.
///
/// The Docker attach protocol multiplexes stdout and stderr over a single
/// connection as 8-byte-header frames; the engine implementation decodes
/// those frames and hands the pool tagged payloads.
#[derive(Debug, Clone)]
pub enum OutputChunk {
    Stdout(Bytes),
    Stderr(Bytes),
}

/// A started exec: the id used for the exit-code query plus the
/// demultiplexed output stream.
pub struct ExecStarted {
    pub exec_id: String,
    pub output: BoxStream<'static, Result<OutputChunk>>,
}

/// Host bind mount for a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

/// Tmpfs mount for a container, with raw mount options
/// (e.g. `rw,noexec,nosuid,size=67108864`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmpfsMount {
    pub container_path: String,
    pub options: String,
}

/// Everything the engine needs to create a container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub working_dir: String,
    pub binds: Vec<Bind>,
    pub tmpfs: Vec<TmpfsMount>,
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub pids_limit: i64,
    pub security_opt: Vec<String>,
}

/// Semantic operations the sandbox pool requires from a container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync + 'static {
    /// Check that the engine daemon is reachable.
    async fn ping(&self) -> Result<()>;

    /// Check whether an image is present locally.
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pull an image, blocking until the pull stream reports completion.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Create a container from the given spec. Does not start it.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerRef>;

    /// Start a created container.
    async fn start_container(&self, container: &ContainerRef) -> Result<()>;

    /// Request a graceful stop. An already-stopped container is success.
    async fn stop_container(&self, container: &ContainerRef, grace_secs: i64) -> Result<()>;

    /// Force-remove a container. An already-removed container is success.
    async fn remove_container(&self, container: &ContainerRef) -> Result<()>;

    /// Whether the container is currently running. False on any error.
    async fn is_running(&self, container: &ContainerRef) -> bool;

    /// Start a command in a running container, attaching stdout and stderr.
    ///
    /// The returned stream ends when the command finishes or the connection
    /// drops; a truncated stream ends the read without error.
    async fn start_exec(&self, container: &ContainerRef, cmd: &[String]) -> Result<ExecStarted>;

    /// Query the exit code of a finished exec. `None` while still running.
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>>;

    /// List containers (running or not) whose name starts with `prefix`.
    async fn list_containers(&self, prefix: &str) -> Result<Vec<ContainerRef>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_ref_display() {
        let c = ContainerRef::new("sandbox-ab12cd34");
        assert_eq!(format!("{}", c), "sandbox-ab12cd34");
    }

    #[test]
    fn test_container_spec_default_is_empty() {
        let spec = ContainerSpec::default();
        assert!(spec.name.is_empty());
        assert!(spec.binds.is_empty());
        assert!(spec.tmpfs.is_empty());
        assert_eq!(spec.memory_bytes, 0);
    }
}
