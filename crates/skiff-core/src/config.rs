//! Sandbox pool configuration.
//!
//! Configuration is resolved once at manager construction. Each field is
//! picked with the precedence: environment variable, then caller override,
//! then built-in default. A value that is unset or fails to parse falls
//! through silently to the next layer; a bad environment never aborts
//! startup.
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `SANDBOX_IMAGE` | `image` | `ubuntu:22.04` |
//! | `SANDBOX_POOL_MIN_WARM` | `pool.min_warm` | `0` |
//! | `SANDBOX_POOL_MAX_TOTAL` | `pool.max_total` | `5` |
//! | `SANDBOX_POOL_MAX_IDLE_MS` | `pool.max_idle_ms` | `300000` |
//! | `SANDBOX_MEMORY_BYTES` | `resource_limits.memory_bytes` | `536870912` |

use crate::error::{Result, SandboxError};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_IMAGE: &str = "SANDBOX_IMAGE";
pub const ENV_POOL_MIN_WARM: &str = "SANDBOX_POOL_MIN_WARM";
pub const ENV_POOL_MAX_TOTAL: &str = "SANDBOX_POOL_MAX_TOTAL";
pub const ENV_POOL_MAX_IDLE_MS: &str = "SANDBOX_POOL_MAX_IDLE_MS";
pub const ENV_MEMORY_BYTES: &str = "SANDBOX_MEMORY_BYTES";

/// Immutable configuration for the sandbox pool.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Container image reference.
    pub image: String,
    pub pool: PoolSettings,
    pub resource_limits: ResourceLimits,
    pub health_check: HealthCheckSettings,
    pub timeouts: TimeoutSettings,
}

/// Warm-pool sizing and idle eviction.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Sandboxes to keep warm in the ready queue.
    pub min_warm: usize,
    /// Hard ceiling on tracked sandboxes.
    pub max_total: usize,
    /// Idle sandboxes older than this are reaped.
    pub max_idle_ms: u64,
}

/// Per-container cgroup limits.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub pids_limit: i64,
}

/// Liveness probing cadence and eviction threshold.
#[derive(Debug, Clone)]
pub struct HealthCheckSettings {
    pub interval_ms: u64,
    /// Consecutive probe failures before eviction.
    pub max_failures: u32,
}

impl HealthCheckSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Operation deadlines.
#[derive(Debug, Clone)]
pub struct TimeoutSettings {
    pub exec_ms: u64,
    pub init_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl TimeoutSettings {
    pub fn exec(&self) -> Duration {
        Duration::from_millis(self.exec_ms)
    }

    pub fn init(&self) -> Duration {
        Duration::from_millis(self.init_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "ubuntu:22.04".to_string(),
            pool: PoolSettings {
                min_warm: 0,
                max_total: 5,
                max_idle_ms: 300_000,
            },
            resource_limits: ResourceLimits {
                memory_bytes: 536_870_912,
                nano_cpus: 1_000_000_000,
                pids_limit: 256,
            },
            health_check: HealthCheckSettings {
                interval_ms: 30_000,
                max_failures: 3,
            },
            timeouts: TimeoutSettings {
                exec_ms: 60_000,
                init_ms: 120_000,
                shutdown_grace_ms: 10_000,
            },
        }
    }
}

/// Caller overrides; any field left `None` falls through to the default.
#[derive(Debug, Clone, Default)]
pub struct SandboxOverrides {
    pub image: Option<String>,
    pub min_warm: Option<usize>,
    pub max_total: Option<usize>,
    pub max_idle_ms: Option<u64>,
    pub memory_bytes: Option<i64>,
    pub nano_cpus: Option<i64>,
    pub pids_limit: Option<i64>,
    pub health_interval_ms: Option<u64>,
    pub health_max_failures: Option<u32>,
    pub exec_ms: Option<u64>,
    pub init_ms: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
}

impl SandboxConfig {
    /// Resolve configuration from the process environment and the given
    /// overrides, then validate the merged result.
    pub fn load(overrides: SandboxOverrides) -> Result<Self> {
        let config = merged(&|key| std::env::var(key).ok(), &overrides);
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration invariants.
    pub fn validate(&self) -> Result<()> {
        if self.image.is_empty() {
            return Err(SandboxError::Config("image must not be empty".into()));
        }
        if self.pool.min_warm > self.pool.max_total {
            return Err(SandboxError::Config(format!(
                "min_warm ({}) must not exceed max_total ({})",
                self.pool.min_warm, self.pool.max_total
            )));
        }
        if self.pool.max_idle_ms == 0 {
            return Err(SandboxError::Config("max_idle_ms must be positive".into()));
        }
        if self.resource_limits.memory_bytes <= 0
            || self.resource_limits.nano_cpus <= 0
            || self.resource_limits.pids_limit <= 0
        {
            return Err(SandboxError::Config(
                "resource limits must be positive".into(),
            ));
        }
        if self.health_check.interval_ms == 0 || self.health_check.max_failures == 0 {
            return Err(SandboxError::Config(
                "health check settings must be positive".into(),
            ));
        }
        if self.timeouts.exec_ms == 0
            || self.timeouts.init_ms == 0
            || self.timeouts.shutdown_grace_ms == 0
        {
            return Err(SandboxError::Config("timeouts must be positive".into()));
        }
        Ok(())
    }
}

/// Apply the env -> override -> default precedence for one numeric field.
fn pick<T: FromStr + Copy>(env_value: Option<String>, over: Option<T>, default: T) -> T {
    env_value
        .and_then(|v| v.parse().ok())
        .or(over)
        .unwrap_or(default)
}

/// Merge the three precedence layers. The environment lookup is injected
/// so tests stay independent of process state.
fn merged(env: &dyn Fn(&str) -> Option<String>, overrides: &SandboxOverrides) -> SandboxConfig {
    let d = SandboxConfig::default();
    SandboxConfig {
        image: env(ENV_IMAGE)
            .or_else(|| overrides.image.clone())
            .unwrap_or(d.image),
        pool: PoolSettings {
            min_warm: pick(env(ENV_POOL_MIN_WARM), overrides.min_warm, d.pool.min_warm),
            max_total: pick(
                env(ENV_POOL_MAX_TOTAL),
                overrides.max_total,
                d.pool.max_total,
            ),
            max_idle_ms: pick(
                env(ENV_POOL_MAX_IDLE_MS),
                overrides.max_idle_ms,
                d.pool.max_idle_ms,
            ),
        },
        resource_limits: ResourceLimits {
            memory_bytes: pick(
                env(ENV_MEMORY_BYTES),
                overrides.memory_bytes,
                d.resource_limits.memory_bytes,
            ),
            nano_cpus: overrides.nano_cpus.unwrap_or(d.resource_limits.nano_cpus),
            pids_limit: overrides.pids_limit.unwrap_or(d.resource_limits.pids_limit),
        },
        health_check: HealthCheckSettings {
            interval_ms: overrides
                .health_interval_ms
                .unwrap_or(d.health_check.interval_ms),
            max_failures: overrides
                .health_max_failures
                .unwrap_or(d.health_check.max_failures),
        },
        timeouts: TimeoutSettings {
            exec_ms: overrides.exec_ms.unwrap_or(d.timeouts.exec_ms),
            init_ms: overrides.init_ms.unwrap_or(d.timeouts.init_ms),
            shutdown_grace_ms: overrides
                .shutdown_grace_ms
                .unwrap_or(d.timeouts.shutdown_grace_ms),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.image, "ubuntu:22.04");
        assert_eq!(config.pool.min_warm, 0);
        assert_eq!(config.pool.max_total, 5);
        assert_eq!(config.pool.max_idle_ms, 300_000);
        assert_eq!(config.resource_limits.memory_bytes, 536_870_912);
        assert_eq!(config.resource_limits.nano_cpus, 1_000_000_000);
        assert_eq!(config.resource_limits.pids_limit, 256);
        assert_eq!(config.health_check.interval_ms, 30_000);
        assert_eq!(config.health_check.max_failures, 3);
        assert_eq!(config.timeouts.exec_ms, 60_000);
        assert_eq!(config.timeouts.init_ms, 120_000);
        assert_eq!(config.timeouts.shutdown_grace_ms, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_beats_overrides() {
        let env = env_of(&[
            (ENV_IMAGE, "python:3.12-slim"),
            (ENV_POOL_MAX_TOTAL, "9"),
            (ENV_MEMORY_BYTES, "1073741824"),
        ]);
        let overrides = SandboxOverrides {
            image: Some("alpine:3".into()),
            max_total: Some(2),
            memory_bytes: Some(1),
            ..Default::default()
        };
        let config = merged(&|k| env.get(k).cloned(), &overrides);
        assert_eq!(config.image, "python:3.12-slim");
        assert_eq!(config.pool.max_total, 9);
        assert_eq!(config.resource_limits.memory_bytes, 1_073_741_824);
    }

    #[test]
    fn test_overrides_beat_defaults() {
        let overrides = SandboxOverrides {
            min_warm: Some(2),
            max_total: Some(4),
            exec_ms: Some(5_000),
            ..Default::default()
        };
        let config = merged(&|_| None, &overrides);
        assert_eq!(config.pool.min_warm, 2);
        assert_eq!(config.pool.max_total, 4);
        assert_eq!(config.timeouts.exec_ms, 5_000);
        // Untouched fields keep their defaults.
        assert_eq!(config.pool.max_idle_ms, 300_000);
    }

    #[test]
    fn test_unparseable_env_falls_through() {
        let env = env_of(&[(ENV_POOL_MAX_TOTAL, "not-a-number")]);
        let overrides = SandboxOverrides {
            max_total: Some(7),
            ..Default::default()
        };
        let config = merged(&|k| env.get(k).cloned(), &overrides);
        assert_eq!(config.pool.max_total, 7);

        let config = merged(&|k| env.get(k).cloned(), &SandboxOverrides::default());
        assert_eq!(config.pool.max_total, 5);
    }

    #[test]
    fn test_validate_rejects_min_warm_above_max_total() {
        let mut config = SandboxConfig::default();
        config.pool.min_warm = 6;
        config.pool.max_total = 5;
        assert!(matches!(
            config.validate(),
            Err(SandboxError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_durations_and_limits() {
        let mut config = SandboxConfig::default();
        config.timeouts.exec_ms = 0;
        assert!(config.validate().is_err());

        let mut config = SandboxConfig::default();
        config.resource_limits.pids_limit = 0;
        assert!(config.validate().is_err());

        let mut config = SandboxConfig::default();
        config.health_check.max_failures = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_accessors() {
        let config = SandboxConfig::default();
        assert_eq!(config.timeouts.exec(), Duration::from_millis(60_000));
        assert_eq!(config.health_check.interval(), Duration::from_millis(30_000));
    }
}
