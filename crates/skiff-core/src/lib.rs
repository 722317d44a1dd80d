//! # skiff-core
//!
//! A warm pool of Docker-backed sandboxes for running untrusted analysis
//! workloads (shell exploration, Python data-frame work) against a fixed
//! read-only data mount.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     skiff-core (host)                     │
//! ├───────────────────────────────────────────────────────────┤
//! │                                                           │
//! │  ┌─────────────────┐     ┌───────────────────────────┐    │
//! │  │ SandboxManager  │────▶│  HashMap<SandboxId,       │    │
//! │  │   - acquire()   │     │           TrackedSandbox> │    │
//! │  │   - release()   │     │  + FIFO ready queue       │    │
//! │  │   - shutdown()  │     └───────────────────────────┘    │
//! │  └─────────────────┘                                      │
//! │      │         │  health + cleanup loops                  │
//! │      ▼         ▼                                          │
//! │  ┌─────────────────┐     ┌───────────────────────────┐    │
//! │  │  SandboxHandle  │────▶│   ContainerDriver         │    │
//! │  │  - exec()       │     │   exec / write / bootstrap│    │
//! │  │  - write_file() │     └───────────────────────────┘    │
//! │  └─────────────────┘                 │                    │
//! │                                      ▼                    │
//! │                          ┌───────────────────────────┐    │
//! │                          │  ContainerEngine          │    │
//! │                          │  (skiff-docker / bollard) │    │
//! │                          └───────────────────────────┘    │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use skiff_core::{SandboxConfig, SandboxManager, SandboxOverrides};
//! use skiff_docker::DockerEngine;
//!
//! # async fn example() -> skiff_core::Result<()> {
//! let config = SandboxConfig::load(SandboxOverrides {
//!     min_warm: Some(1),
//!     max_total: Some(4),
//!     ..Default::default()
//! })?;
//! let manager = SandboxManager::new(DockerEngine::connect()?, config);
//! manager.initialize().await?;
//!
//! // Lease a sandbox, run a command, return it to the pool.
//! let sandbox = manager.acquire(Some("session-42".into())).await?;
//! let result = sandbox.exec("ls /app/semantic").await?;
//! println!("{}", result.stdout);
//! sandbox.release().await?;
//!
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Lifecycle state machine**: eight states with an explicit transition
//!   table; illegal transitions are programmer errors
//! - **Warm pool**: FIFO ready queue kept at a configured floor, bounded
//!   by a hard ceiling with retrying admission control
//! - **Health checking**: periodic liveness probes quarantine and replace
//!   bad instances
//! - **Idle reaping**: sandboxes idle past their TTL are torn down
//! - **Events**: synchronous lifecycle notifications with panic isolation
//! - **Result files**: tabular query results serialized to well-known
//!   JSON/CSV paths inside the container

mod config;
mod driver;
mod error;
mod events;
mod facade;
mod manager;
mod results;
mod sandbox;
mod state;

pub use config::{
    HealthCheckSettings, PoolSettings, ResourceLimits, SandboxConfig, SandboxOverrides,
    TimeoutSettings, ENV_IMAGE, ENV_MEMORY_BYTES, ENV_POOL_MAX_IDLE_MS, ENV_POOL_MAX_TOTAL,
    ENV_POOL_MIN_WARM,
};
pub use driver::{ContainerDriver, ExecResult, CONTAINER_NAME_PREFIX, HEALTH_PROBE_CMD};
pub use error::{Result, SandboxError};
pub use events::{ListenerId, SandboxEvent};
pub use facade::{create_sandbox, global, reset};
pub use manager::{reason, PoolCounters, PoolStats, SandboxManager};
pub use results::{
    render_csv, write_result_to_container, Column, QueryResult, RESULT_CSV_PATH, RESULT_JSON_PATH,
};
pub use sandbox::{SandboxHandle, SandboxId};
pub use state::{can_transition, transition, SandboxState};

pub use skiff_docker::{ContainerEngine, ContainerRef, DockerEngine, EngineError};
