//! Docker Engine API implementation of the engine seam.
//!
//! Talks to the local daemon over its control socket via bollard. Exec
//! output arrives on the multiplexed attach stream (8-byte frame headers,
//! stream tag + big-endian length); bollard decodes the framing and this
//! module maps the decoded records onto [`OutputChunk`]s.

use crate::engine::{ContainerEngine, ContainerRef, ContainerSpec, ExecStarted, OutputChunk};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    RemoveContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::service::HostConfig;
use bollard::Docker;
use futures_util::{StreamExt, TryStreamExt};
use std::collections::HashMap;

/// Production engine backed by the local Docker daemon.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using the platform's default control socket.
    ///
    /// The connection is lazy; use [`ContainerEngine::ping`] to verify the
    /// daemon is actually up.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::Unreachable(e.to_string()))?;
        Ok(Self { docker })
    }
}

/// Map a [`ContainerSpec`] onto the Docker API's create-container payload.
fn to_bollard_config(spec: &ContainerSpec) -> (CreateContainerOptions<String>, Config<String>) {
    let binds: Vec<String> = spec
        .binds
        .iter()
        .map(|b| {
            let mode = if b.read_only { "ro" } else { "rw" };
            format!("{}:{}:{}", b.host_path, b.container_path, mode)
        })
        .collect();

    let tmpfs: HashMap<String, String> = spec
        .tmpfs
        .iter()
        .map(|t| (t.container_path.clone(), t.options.clone()))
        .collect();

    let host_config = HostConfig {
        binds: Some(binds),
        tmpfs: Some(tmpfs),
        memory: Some(spec.memory_bytes),
        nano_cpus: Some(spec.nano_cpus),
        pids_limit: Some(spec.pids_limit),
        security_opt: Some(spec.security_opt.clone()),
        ..Default::default()
    };

    let config = Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.cmd.clone()),
        working_dir: Some(spec.working_dir.clone()),
        host_config: Some(host_config),
        ..Default::default()
    };

    let options = CreateContainerOptions {
        name: spec.name.clone(),
        platform: None,
    };

    (options, config)
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| EngineError::Unreachable(e.to_string()))?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        tracing::info!(image, "Pulling image");
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );
        // The pull is complete once the progress stream ends.
        while let Some(progress) = stream.try_next().await? {
            if let Some(status) = progress.status {
                tracing::trace!(image, status = %status, "Pull progress");
            }
        }
        tracing::info!(image, "Image pulled");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerRef> {
        let (options, config) = to_bollard_config(spec);
        tracing::debug!(name = %spec.name, image = %spec.image, "Creating container");
        self.docker.create_container(Some(options), config).await?;
        Ok(ContainerRef::new(spec.name.clone()))
    }

    async fn start_container(&self, container: &ContainerRef) -> Result<()> {
        tracing::debug!(container = %container.name, "Starting container");
        self.docker
            .start_container::<String>(&container.name, None)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, container: &ContainerRef, grace_secs: i64) -> Result<()> {
        match self
            .docker
            .stop_container(&container.name, Some(StopContainerOptions { t: grace_secs }))
            .await
        {
            Ok(()) => Ok(()),
            // 304: already stopped; 404: already gone. Both are fine.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_container(&self, container: &ContainerRef) -> Result<()> {
        match self
            .docker
            .remove_container(
                &container.name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn is_running(&self, container: &ContainerRef) -> bool {
        match self
            .docker
            .inspect_container(&container.name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => info.state.and_then(|s| s.running).unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn start_exec(&self, container: &ContainerRef, cmd: &[String]) -> Result<ExecStarted> {
        let exec = self
            .docker
            .create_exec(
                &container.name,
                CreateExecOptions {
                    cmd: Some(cmd.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        match self.docker.start_exec(&exec.id, None).await? {
            StartExecResults::Attached { output, .. } => {
                let stream = output
                    .filter_map(|item| async move {
                        match item {
                            Ok(LogOutput::StdOut { message }) => {
                                Some(Ok(OutputChunk::Stdout(message)))
                            }
                            Ok(LogOutput::Console { message }) => {
                                Some(Ok(OutputChunk::Stdout(message)))
                            }
                            Ok(LogOutput::StdErr { message }) => {
                                Some(Ok(OutputChunk::Stderr(message)))
                            }
                            Ok(LogOutput::StdIn { .. }) => None,
                            Err(e) => Some(Err(EngineError::from(e))),
                        }
                    })
                    .boxed();
                Ok(ExecStarted {
                    exec_id: exec.id,
                    output: stream,
                })
            }
            StartExecResults::Detached => Ok(ExecStarted {
                exec_id: exec.id,
                output: futures_util::stream::empty().boxed(),
            }),
        }
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        let inspect = self.docker.inspect_exec(exec_id).await?;
        Ok(inspect.exit_code)
    }

    async fn list_containers(&self, prefix: &str) -> Result<Vec<ContainerRef>> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await?;

        let mut refs = Vec::new();
        for container in containers {
            let Some(names) = container.names else {
                continue;
            };
            for name in names {
                // Engine API prefixes names with "/".
                let name = name.trim_start_matches('/');
                if name.starts_with(prefix) {
                    refs.push(ContainerRef::new(name));
                    break;
                }
            }
        }
        Ok(refs)
    }
}
