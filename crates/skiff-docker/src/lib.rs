//! # skiff-docker
//!
//! Container engine adapter for the skiff sandbox pool.
//! Provides a narrow semantic surface over the Docker Engine API
//! (via bollard) so the pool layer never touches the wire protocol.
//!
//! ## Quick Start
//!
//! ```no_run
//! use skiff_docker::{ContainerEngine, ContainerSpec, DockerEngine};
//!
//! # async fn example() -> skiff_docker::Result<()> {
//! let engine = DockerEngine::connect()?;
//! engine.ping().await?;
//!
//! let spec = ContainerSpec {
//!     name: "sandbox-demo".into(),
//!     image: "ubuntu:22.04".into(),
//!     cmd: vec!["sleep".into(), "infinity".into()],
//!     ..Default::default()
//! };
//! let container = engine.create_container(&spec).await?;
//! engine.start_container(&container).await?;
//!
//! // Cleanup
//! engine.remove_container(&container).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Engine seam**: the [`ContainerEngine`] trait is the only surface the
//!   pool depends on, so tests run against [`FakeEngine`] without a daemon
//! - **Lifecycle**: image ensure/pull, container create/start/stop/remove
//! - **Exec streaming**: demultiplexed stdout/stderr chunks plus the exec
//!   exit-code query
//! - **Idempotent teardown**: stopping a stopped container or removing a
//!   missing one is treated as success

mod docker;
mod engine;
mod error;
mod fake;

pub use docker::DockerEngine;
pub use engine::{
    Bind, ContainerEngine, ContainerRef, ContainerSpec, ExecStarted, OutputChunk, TmpfsMount,
};
pub use error::{EngineError, Result};
pub use fake::{ExecRecord, ExecScript, FakeEngine};
