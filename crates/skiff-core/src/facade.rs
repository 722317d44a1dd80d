//! Process-wide manager access.
//!
//! Most callers want exactly one pool per process. `global()` lazily
//! constructs a Docker-backed manager on first call; later calls return
//! the same instance and ignore the config argument. Tests that need
//! isolation call `reset()` between cases.

use crate::config::{SandboxConfig, SandboxOverrides};
use crate::error::Result;
use crate::manager::SandboxManager;
use crate::sandbox::SandboxHandle;
use skiff_docker::DockerEngine;
use std::sync::Mutex;

static GLOBAL: Mutex<Option<SandboxManager<DockerEngine>>> = Mutex::new(None);

/// The process-wide sandbox manager, constructed on first call.
///
/// The first caller's `config` (or, when `None`, the environment-resolved
/// configuration) wins; subsequent calls ignore the argument.
pub fn global(config: Option<SandboxConfig>) -> Result<SandboxManager<DockerEngine>> {
    let mut slot = GLOBAL.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(manager) = slot.as_ref() {
        return Ok(manager.clone());
    }
    let config = match config {
        Some(config) => {
            config.validate()?;
            config
        }
        None => SandboxConfig::load(SandboxOverrides::default())?,
    };
    let engine = DockerEngine::connect()?;
    let manager = SandboxManager::new(engine, config);
    *slot = Some(manager.clone());
    Ok(manager)
}

/// Drop the process-wide manager so the next `global()` rebuilds it.
/// Intended for tests; does not shut the old manager down.
pub fn reset() {
    let mut slot = GLOBAL.lock().unwrap_or_else(|e| e.into_inner());
    *slot = None;
}

/// Convenience: lease a sandbox from the process-wide manager.
pub async fn create_sandbox() -> Result<SandboxHandle<DockerEngine>> {
    let manager = global(None)?;
    manager.create_sandbox().await
}

#[cfg(test)]
mod tests {
    use super::*;

    // The global slot is process state, so keep every assertion about it
    // in a single test case.
    #[test]
    fn test_global_is_a_singleton_until_reset() {
        reset();
        let first = global(None).expect("construct");
        let second = global(Some(SandboxConfig::default())).expect("reuse");
        // Same underlying pool: the second call ignored its config.
        assert_eq!(
            first.config().pool.max_total,
            second.config().pool.max_total
        );

        reset();
        let mut config = SandboxConfig::default();
        config.pool.max_total = 2;
        let rebuilt = global(Some(config)).expect("rebuild");
        assert_eq!(rebuilt.config().pool.max_total, 2);
        reset();
    }

    #[test]
    fn test_global_rejects_invalid_config() {
        reset();
        let mut config = SandboxConfig::default();
        config.pool.min_warm = 10;
        config.pool.max_total = 1;
        assert!(global(Some(config)).is_err());
        reset();
    }
}
