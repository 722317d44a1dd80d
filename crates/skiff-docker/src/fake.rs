//! In-memory engine double for exercising the pool without a daemon.
//!
//! Containers are plain entries in a map, execs are scripted through a
//! programmable handler, and every exec invocation is recorded so tests
//! can assert on the commands a component issued.

use crate::engine::{ContainerEngine, ContainerRef, ContainerSpec, ExecStarted, OutputChunk};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type ExecHandler = Box<dyn Fn(&str, &str) -> ExecScript + Send + Sync>;

/// Scripted response for one exec invocation.
#[derive(Debug, Clone)]
pub struct ExecScript {
    /// Output chunks, emitted in order.
    pub chunks: Vec<OutputChunk>,
    /// Exit code reported after the stream ends.
    pub exit_code: i64,
    /// Optional delay before the first chunk, for timeout scenarios.
    pub delay: Option<Duration>,
}

impl ExecScript {
    /// Exit 0 with the given stdout.
    pub fn ok(stdout: &str) -> Self {
        Self {
            chunks: vec![OutputChunk::Stdout(Bytes::copy_from_slice(
                stdout.as_bytes(),
            ))],
            exit_code: 0,
            delay: None,
        }
    }

    /// Non-zero exit with the given stderr.
    pub fn failure(exit_code: i64, stderr: &str) -> Self {
        Self {
            chunks: vec![OutputChunk::Stderr(Bytes::copy_from_slice(
                stderr.as_bytes(),
            ))],
            exit_code,
            delay: None,
        }
    }

    /// Exit 0 with no output.
    pub fn silent() -> Self {
        Self {
            chunks: Vec::new(),
            exit_code: 0,
            delay: None,
        }
    }

    /// Exit 0 with no output after a delay.
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::silent()
        }
    }

    /// Explicit chunk sequence and exit code.
    pub fn with_chunks(chunks: Vec<OutputChunk>, exit_code: i64) -> Self {
        Self {
            chunks,
            exit_code,
            delay: None,
        }
    }
}

/// One recorded exec invocation.
#[derive(Debug, Clone)]
pub struct ExecRecord {
    pub container: String,
    pub cmd: String,
}

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, bool>, // name -> running
    images: Vec<String>,
    exec_exit_codes: HashMap<String, i64>,
    exec_log: Vec<ExecRecord>,
    create_failures: u32,
    fail_ping: bool,
}

/// Test double implementing [`ContainerEngine`] entirely in memory.
pub struct FakeEngine {
    state: Mutex<FakeState>,
    handler: Mutex<ExecHandler>,
    next_exec: AtomicU64,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            handler: Mutex::new(Box::new(|_, _| ExecScript::ok(""))),
            next_exec: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Script exec responses. The handler receives the container name and
    /// the shell command line and returns the [`ExecScript`] to play back.
    pub fn on_exec(&self, f: impl Fn(&str, &str) -> ExecScript + Send + Sync + 'static) {
        *self.handler.lock().unwrap_or_else(|e| e.into_inner()) = Box::new(f);
    }

    /// Make `ping` fail until called again with `false`.
    pub fn fail_ping(&self, fail: bool) {
        self.lock().fail_ping = fail;
    }

    /// Fail the next `n` container creations.
    pub fn fail_next_creates(&self, n: u32) {
        self.lock().create_failures = n;
    }

    /// Pre-register a container, as if left behind by a prior process.
    pub fn seed_container(&self, name: &str) {
        self.lock().containers.insert(name.to_string(), false);
    }

    /// All exec invocations observed so far.
    pub fn exec_log(&self) -> Vec<ExecRecord> {
        self.lock().exec_log.clone()
    }

    /// Names of containers currently known to the engine.
    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().containers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether the named container exists and is running.
    pub fn container_running(&self, name: &str) -> bool {
        self.lock().containers.get(name).copied().unwrap_or(false)
    }

    /// Whether the image has been pulled.
    pub fn image_pulled(&self, image: &str) -> bool {
        self.lock().images.iter().any(|i| i == image)
    }
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> Result<()> {
        if self.lock().fail_ping {
            return Err(EngineError::Unreachable("fake daemon is down".into()));
        }
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.lock().images.iter().any(|i| i == image))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.lock().images.push(image.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerRef> {
        let mut state = self.lock();
        if state.create_failures > 0 {
            state.create_failures -= 1;
            return Err(EngineError::Container("injected create failure".into()));
        }
        state.containers.insert(spec.name.clone(), false);
        Ok(ContainerRef::new(spec.name.clone()))
    }

    async fn start_container(&self, container: &ContainerRef) -> Result<()> {
        match self.lock().containers.get_mut(&container.name) {
            Some(running) => {
                *running = true;
                Ok(())
            }
            None => Err(EngineError::Container(format!(
                "no such container: {}",
                container.name
            ))),
        }
    }

    async fn stop_container(&self, container: &ContainerRef, _grace_secs: i64) -> Result<()> {
        if let Some(running) = self.lock().containers.get_mut(&container.name) {
            *running = false;
        }
        Ok(())
    }

    async fn remove_container(&self, container: &ContainerRef) -> Result<()> {
        self.lock().containers.remove(&container.name);
        Ok(())
    }

    async fn is_running(&self, container: &ContainerRef) -> bool {
        self.container_running(&container.name)
    }

    async fn start_exec(&self, container: &ContainerRef, cmd: &[String]) -> Result<ExecStarted> {
        // The pool always execs through a shell; the last argv element is
        // the command line the caller actually wrote.
        let line = cmd.last().cloned().unwrap_or_default();
        let script = {
            let handler = self.handler.lock().unwrap_or_else(|e| e.into_inner());
            handler(&container.name, &line)
        };

        let exec_id = format!("exec-{}", self.next_exec.fetch_add(1, Ordering::Relaxed));
        {
            let mut state = self.lock();
            state.exec_log.push(ExecRecord {
                container: container.name.clone(),
                cmd: line,
            });
            state.exec_exit_codes.insert(exec_id.clone(), script.exit_code);
        }

        let chunks =
            futures_util::stream::iter(script.chunks.into_iter().map(Ok::<_, EngineError>));
        let output = match script.delay {
            Some(delay) => futures_util::stream::once(async move {
                tokio::time::sleep(delay).await;
                Ok(OutputChunk::Stdout(Bytes::new()))
            })
            .chain(chunks)
            .boxed(),
            None => chunks.boxed(),
        };

        Ok(ExecStarted { exec_id, output })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        Ok(self.lock().exec_exit_codes.get(exec_id).copied())
    }

    async fn list_containers(&self, prefix: &str) -> Result<Vec<ContainerRef>> {
        let mut refs: Vec<ContainerRef> = self
            .lock()
            .containers
            .keys()
            .filter(|name| name.starts_with(prefix))
            .map(ContainerRef::new)
            .collect();
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(refs)
    }
}
