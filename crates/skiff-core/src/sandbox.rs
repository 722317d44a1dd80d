//! Sandbox identity, the manager's tracking record, and the caller handle.

use crate::driver::ExecResult;
use crate::error::Result;
use crate::manager::{reason, SandboxManager};
use crate::results::QueryResult;
use crate::state::SandboxState;
use chrono::{DateTime, Utc};
use skiff_docker::{ContainerEngine, ContainerRef};
use std::fmt;
use tokio::time::Instant;
use uuid::Uuid;

/// Short opaque identifier for a sandbox, unique within process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxId(String);

impl SandboxId {
    /// Allocate a fresh id (first eight hex digits of a v4 UUID).
    pub fn new() -> Self {
        let full = Uuid::new_v4().simple().to_string();
        Self(full[..8].to_string())
    }

    /// Wrap an existing raw id.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SandboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Manager-internal record for one tracked sandbox.
///
/// Owned exclusively by the manager; handles only carry the id and the
/// container reference.
pub(crate) struct TrackedSandbox {
    pub(crate) id: SandboxId,
    pub(crate) container: ContainerRef,
    pub(crate) state: SandboxState,
    pub(crate) created_at: DateTime<Utc>,
    /// Monotonic stamp used for idle eviction; immune to wall-clock jumps.
    pub(crate) last_used_at: Instant,
    /// Consecutive failed probes; reset to zero on every success.
    pub(crate) health_failures: u32,
    /// Correlation tag set by the acquiring caller.
    pub(crate) session_id: Option<String>,
}

impl TrackedSandbox {
    pub(crate) fn new(id: SandboxId, container: ContainerRef) -> Self {
        Self {
            id,
            container,
            state: SandboxState::Creating,
            created_at: Utc::now(),
            last_used_at: Instant::now(),
            health_failures: 0,
            session_id: None,
        }
    }
}

/// A leased sandbox.
///
/// The handle is a weak capability: it can run commands, write files,
/// release the lease, or destroy the sandbox, but the manager owns the
/// underlying container. After `shutdown()` any operation through a
/// surviving handle fails against the destroyed container.
pub struct SandboxHandle<E: ContainerEngine> {
    id: SandboxId,
    container: ContainerRef,
    manager: SandboxManager<E>,
}

impl<E: ContainerEngine> fmt::Debug for SandboxHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxHandle")
            .field("id", &self.id)
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

impl<E: ContainerEngine> SandboxHandle<E> {
    pub(crate) fn new(
        id: SandboxId,
        container: ContainerRef,
        manager: SandboxManager<E>,
    ) -> Self {
        Self {
            id,
            container,
            manager,
        }
    }

    pub fn id(&self) -> &SandboxId {
        &self.id
    }

    pub fn container(&self) -> &ContainerRef {
        &self.container
    }

    /// Live view of the sandbox state; `None` once destroyed.
    pub async fn state(&self) -> Option<SandboxState> {
        self.manager.state_of(&self.id).await
    }

    /// Run a shell command under the configured exec deadline.
    pub async fn exec(&self, cmd: &str) -> Result<ExecResult> {
        let timeout = self.manager.config().timeouts.exec();
        self.manager
            .driver()
            .exec(&self.container, cmd, Some(timeout))
            .await
    }

    /// Write bytes to a path inside the container.
    pub async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.manager
            .driver()
            .write_file(&self.container, path, bytes)
            .await
    }

    /// Serialize a tabular result to the well-known paths in the container.
    pub async fn write_result(&self, result: &QueryResult) {
        crate::results::write_result_to_container(self.manager.driver(), &self.container, result)
            .await;
    }

    /// Return the sandbox to the pool.
    pub async fn release(self) -> Result<()> {
        self.manager.release(&self.id).await
    }

    /// Tear the sandbox down instead of returning it.
    pub async fn destroy(self) {
        self.manager.destroy_sandbox(&self.id, reason::MANUAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_short_and_unique() {
        let a = SandboxId::new();
        let b = SandboxId::new();
        assert_eq!(a.as_str().len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_id_display_matches_raw() {
        let id = SandboxId::from_raw("ab12cd34");
        assert_eq!(format!("{id}"), "ab12cd34");
    }

    #[test]
    fn test_tracked_sandbox_starts_creating() {
        let sb = TrackedSandbox::new(SandboxId::new(), ContainerRef::new("sandbox-x"));
        assert_eq!(sb.state, SandboxState::Creating);
        assert_eq!(sb.health_failures, 0);
        assert!(sb.session_id.is_none());
    }
}
