//! Sandbox pool lifecycle manager.
//!
//! Owns every tracked sandbox and the FIFO ready queue, warms the pool to
//! its floor, leases sandboxes to sessions, probes liveness on a timer,
//! reaps idle instances, and tears everything down on shutdown.
//!
//! # Locking
//!
//! One async mutex guards the sandbox map, the ready queue, and the two
//! lifecycle flags. Every compound check-then-act (the pop-validate-claim
//! in `acquire`, the promote in `release`) happens under that lock, and
//! the lock is never held across a container-engine round-trip: the
//! background loops snapshot under the lock, call out, then re-acquire to
//! commit.

use crate::config::SandboxConfig;
use crate::driver::ContainerDriver;
use crate::error::{Result, SandboxError};
use crate::events::{EventBus, ListenerId, SandboxEvent};
use crate::sandbox::{SandboxHandle, SandboxId, TrackedSandbox};
use crate::state::{self, SandboxState};
use futures_util::future::join_all;
use skiff_docker::{ContainerEngine, ContainerRef};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Extra acquire rounds after the first attempt finds the pool full.
const ACQUIRE_MAX_RETRIES: u32 = 3;
/// Pause between acquire rounds.
const ACQUIRE_RETRY_INTERVAL: Duration = Duration::from_millis(2_000);
/// Grace given to a container's entry process during teardown.
const DESTROY_STOP_GRACE_SECS: i64 = 5;

/// Destroy reasons carried on `Destroyed` events.
pub mod reason {
    pub const HEALTH_CHECK_FAILURE: &str = "health-check-failure";
    pub const IDLE_TIMEOUT: &str = "idle-timeout";
    pub const SHUTDOWN: &str = "shutdown";
    pub const MANUAL: &str = "manual";
}

/// Point-in-time state counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub ready: usize,
    pub executing: usize,
    pub idle: usize,
    pub suspended: usize,
}

/// Monotone counters for observability.
///
/// All counters are atomic and can be read without locking.
#[derive(Debug, Default)]
pub struct PoolCounters {
    /// Acquires served straight from the warm pool.
    pub warm_hits: AtomicU64,
    /// Acquires that had to cold-start a sandbox.
    pub cold_misses: AtomicU64,
    /// Sandboxes successfully provisioned.
    pub created: AtomicU64,
    /// Sandboxes destroyed, whatever the reason.
    pub destroyed: AtomicU64,
}

impl PoolCounters {
    pub fn warm_hits(&self) -> u64 {
        self.warm_hits.load(Ordering::Relaxed)
    }

    pub fn cold_misses(&self) -> u64 {
        self.cold_misses.load(Ordering::Relaxed)
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::Relaxed)
    }

    /// Warm hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.warm_hits() as f64;
        let misses = self.cold_misses() as f64;
        let total = hits + misses;
        if total == 0.0 {
            0.0
        } else {
            (hits / total) * 100.0
        }
    }
}

#[derive(Default)]
struct PoolInner {
    sandboxes: HashMap<SandboxId, TrackedSandbox>,
    /// FIFO of ids believed Ready. Every pop re-validates against the map,
    /// so an entry destroyed between enqueue and dequeue is harmless.
    ready: VecDeque<SandboxId>,
    initialized: bool,
    shutdown_requested: bool,
}

impl PoolInner {
    fn ready_count(&self) -> usize {
        self.sandboxes
            .values()
            .filter(|s| s.state == SandboxState::Ready)
            .count()
    }
}

struct Shared<E> {
    driver: ContainerDriver<E>,
    config: SandboxConfig,
    inner: Mutex<PoolInner>,
    /// Serializes concurrent first-call initialization.
    init_lock: Mutex<()>,
    events: EventBus,
    counters: PoolCounters,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
    loops: StdMutex<Vec<JoinHandle<()>>>,
}

/// Manages the pool of Docker-backed sandboxes.
///
/// Cheap to clone; clones share the same pool. Background loops and every
/// leased handle hold a clone.
pub struct SandboxManager<E: ContainerEngine> {
    shared: Arc<Shared<E>>,
}

impl<E: ContainerEngine> Clone for SandboxManager<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: ContainerEngine> SandboxManager<E> {
    /// Create a manager over a validated configuration.
    pub fn new(engine: E, config: SandboxConfig) -> Self {
        tracing::info!(
            image = %config.image,
            min_warm = config.pool.min_warm,
            max_total = config.pool.max_total,
            "Creating sandbox manager"
        );
        Self {
            shared: Arc::new(Shared {
                driver: ContainerDriver::new(engine),
                config,
                inner: Mutex::new(PoolInner::default()),
                init_lock: Mutex::new(()),
                events: EventBus::default(),
                counters: PoolCounters::default(),
                shutdown: AtomicBool::new(false),
                shutdown_notify: Notify::new(),
                loops: StdMutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.shared.config
    }

    pub fn driver(&self) -> &ContainerDriver<E> {
        &self.shared.driver
    }

    pub fn counters(&self) -> &PoolCounters {
        &self.shared.counters
    }

    /// Subscribe to lifecycle events.
    pub fn on(&self, listener: impl Fn(&SandboxEvent) + Send + Sync + 'static) -> ListenerId {
        self.shared.events.subscribe(listener)
    }

    /// Remove a previously registered listener.
    pub fn off(&self, id: ListenerId) {
        self.shared.events.unsubscribe(id);
    }

    /// Bring the pool up: verify the engine, ensure the image, sweep
    /// containers left behind by a prior process, warm the floor, and
    /// start the background loops. Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        let s = &self.shared;
        let _guard = s.init_lock.lock().await;
        {
            let inner = s.inner.lock().await;
            if inner.initialized {
                return Ok(());
            }
            if inner.shutdown_requested {
                return Err(SandboxError::SandboxUnavailable(
                    "manager is shutting down".into(),
                ));
            }
        }

        s.driver.ping().await.map_err(|e| {
            SandboxError::SandboxUnavailable(format!("container engine unreachable: {e}"))
        })?;
        s.driver.ensure_image(&s.config.image).await?;
        self.sweep_stale_containers().await;

        let warm = s.config.pool.min_warm.min(s.config.pool.max_total);
        if warm > 0 {
            tracing::info!(count = warm, "Warming sandbox pool");
            let results = join_all((0..warm).map(|_| self.warm_one())).await;
            for result in results {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Failed to warm sandbox");
                }
            }
        }

        {
            let mut inner = s.inner.lock().await;
            inner.initialized = true;
        }
        self.spawn_loops();
        tracing::info!(image = %s.config.image, "Sandbox manager initialized");
        Ok(())
    }

    /// Lease a sandbox.
    ///
    /// Drains the ready queue first; falls back to a bounded cold start;
    /// then retries both a few times before reporting the pool exhausted.
    pub async fn acquire(&self, session_id: Option<String>) -> Result<SandboxHandle<E>> {
        self.initialize().await?;

        let mut attempt = 0;
        loop {
            if let Some(handle) = self.try_acquire(&session_id).await? {
                return Ok(handle);
            }
            if attempt >= ACQUIRE_MAX_RETRIES {
                tracing::warn!(
                    max_total = self.shared.config.pool.max_total,
                    "Pool exhausted after retries"
                );
                return Err(SandboxError::PoolExhausted(
                    self.shared.config.pool.max_total,
                ));
            }
            attempt += 1;
            tracing::debug!(attempt, "Pool saturated, retrying acquire");
            tokio::time::sleep(ACQUIRE_RETRY_INTERVAL).await;
        }
    }

    /// One acquire round: warm pop, then cold start if under the ceiling.
    async fn try_acquire(&self, session_id: &Option<String>) -> Result<Option<SandboxHandle<E>>> {
        let s = &self.shared;
        {
            let mut inner = s.inner.lock().await;
            if inner.shutdown_requested {
                return Err(SandboxError::SandboxUnavailable(
                    "manager is shutting down".into(),
                ));
            }
            while let Some(id) = inner.ready.pop_front() {
                let Some(sb) = inner.sandboxes.get_mut(&id) else {
                    continue;
                };
                if sb.state != SandboxState::Ready {
                    continue;
                }
                let from = sb.state;
                sb.state = state::transition(from, SandboxState::Executing)?;
                sb.session_id = session_id.clone();
                sb.last_used_at = Instant::now();
                let container = sb.container.clone();
                s.events.emit(&SandboxEvent::StateChange {
                    id: id.clone(),
                    from,
                    to: SandboxState::Executing,
                });
                s.counters.warm_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(sandbox_id = %id, "Acquired sandbox from warm pool");
                return Ok(Some(SandboxHandle::new(id, container, self.clone())));
            }
            if inner.sandboxes.len() >= s.config.pool.max_total {
                return Ok(None);
            }
        }

        // Cold start outside the lock; capacity is re-checked at insert.
        match self.create_fresh().await {
            Ok(id) => {
                s.counters.cold_misses.fetch_add(1, Ordering::Relaxed);
                let mut inner = s.inner.lock().await;
                let Some(sb) = inner.sandboxes.get_mut(&id) else {
                    // Destroyed between creation and claim; try another round.
                    return Ok(None);
                };
                let from = sb.state;
                sb.state = state::transition(from, SandboxState::Executing)?;
                sb.session_id = session_id.clone();
                sb.last_used_at = Instant::now();
                let container = sb.container.clone();
                s.events.emit(&SandboxEvent::StateChange {
                    id: id.clone(),
                    from,
                    to: SandboxState::Executing,
                });
                tracing::debug!(sandbox_id = %id, "Acquired freshly created sandbox");
                Ok(Some(SandboxHandle::new(id, container, self.clone())))
            }
            // Lost the capacity race; let the retry loop have another go.
            Err(SandboxError::PoolExhausted(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Backwards-compatible convenience: lease without a session tag.
    pub async fn create_sandbox(&self) -> Result<SandboxHandle<E>> {
        self.acquire(None).await
    }

    /// Return a leased sandbox to the pool.
    ///
    /// Moves it `Executing -> Idle`; promotes straight back to `Ready` and
    /// re-queues it while the warm floor is short. Unknown ids are a
    /// silent no-op.
    pub async fn release(&self, id: &SandboxId) -> Result<()> {
        let s = &self.shared;
        let mut inner = s.inner.lock().await;
        let Some(sb) = inner.sandboxes.get_mut(id) else {
            tracing::debug!(sandbox_id = %id, "Release of unknown sandbox ignored");
            return Ok(());
        };
        let from = sb.state;
        sb.state = state::transition(from, SandboxState::Idle)?;
        sb.last_used_at = Instant::now();
        sb.session_id = None;
        s.events.emit(&SandboxEvent::StateChange {
            id: id.clone(),
            from,
            to: SandboxState::Idle,
        });

        if inner.ready_count() < s.config.pool.min_warm {
            let Some(sb) = inner.sandboxes.get_mut(id) else {
                return Ok(());
            };
            let from = sb.state;
            sb.state = state::transition(from, SandboxState::Ready)?;
            inner.ready.push_back(id.clone());
            s.events.emit(&SandboxEvent::StateChange {
                id: id.clone(),
                from,
                to: SandboxState::Ready,
            });
            tracing::debug!(sandbox_id = %id, "Sandbox returned to warm pool");
        } else {
            tracing::debug!(sandbox_id = %id, "Sandbox left idle for the reaper");
        }
        Ok(())
    }

    /// Point-in-time state counts.
    pub async fn stats(&self) -> PoolStats {
        let inner = self.shared.inner.lock().await;
        let mut stats = PoolStats {
            total: inner.sandboxes.len(),
            ..Default::default()
        };
        for sb in inner.sandboxes.values() {
            match sb.state {
                SandboxState::Ready => stats.ready += 1,
                SandboxState::Executing => stats.executing += 1,
                SandboxState::Idle => stats.idle += 1,
                SandboxState::Suspended => stats.suspended += 1,
                _ => {}
            }
        }
        stats
    }

    /// Current state of one sandbox; `None` once destroyed.
    pub async fn state_of(&self, id: &SandboxId) -> Option<SandboxState> {
        self.shared
            .inner
            .lock()
            .await
            .sandboxes
            .get(id)
            .map(|s| s.state)
    }

    /// Stop loops, wait out in-flight executions, destroy everything.
    /// Idempotent; teardown errors are absorbed.
    pub async fn shutdown(&self) {
        let s = &self.shared;
        {
            let mut inner = s.inner.lock().await;
            if inner.shutdown_requested && !inner.initialized && inner.sandboxes.is_empty() {
                return;
            }
            inner.shutdown_requested = true;
        }
        tracing::info!("Shutting down sandbox manager");

        s.shutdown.store(true, Ordering::Relaxed);
        s.shutdown_notify.notify_waiters();
        let handles: Vec<JoinHandle<()>> = {
            let mut loops = s.loops.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *loops)
        };
        for handle in handles {
            handle.abort();
        }

        let executing = {
            let inner = s.inner.lock().await;
            inner
                .sandboxes
                .values()
                .filter(|sb| sb.state == SandboxState::Executing)
                .count()
        };
        if executing > 0 {
            let grace = s.config.timeouts.shutdown_grace();
            tracing::info!(
                executing,
                grace_ms = grace.as_millis() as u64,
                "Waiting for in-flight executions"
            );
            tokio::time::sleep(grace).await;
        }

        let ids: Vec<SandboxId> = {
            let inner = s.inner.lock().await;
            inner.sandboxes.keys().cloned().collect()
        };
        join_all(
            ids.iter()
                .map(|id| self.destroy_sandbox(id, reason::SHUTDOWN)),
        )
        .await;

        {
            let mut inner = s.inner.lock().await;
            inner.sandboxes.clear();
            inner.ready.clear();
            inner.initialized = false;
        }
        tracing::info!(
            created = s.counters.created(),
            destroyed = s.counters.destroyed(),
            warm_hits = s.counters.warm_hits(),
            cold_misses = s.counters.cold_misses(),
            hit_rate = format!("{:.1}%", s.counters.hit_rate()),
            "Sandbox manager shut down"
        );
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Provision one sandbox to `Ready`, retrying the whole sequence once
    /// with a new id on failure.
    async fn create_fresh(&self) -> Result<SandboxId> {
        match self.attempt_create().await {
            Ok(id) => Ok(id),
            Err(e @ SandboxError::PoolExhausted(_)) => Err(e),
            Err(first) => {
                tracing::warn!(error = %first, "Sandbox creation failed, retrying once");
                match self.attempt_create().await {
                    Ok(id) => Ok(id),
                    Err(e @ SandboxError::PoolExhausted(_)) => Err(e),
                    Err(retry) => Err(SandboxError::SandboxUnavailable(retry.to_string())),
                }
            }
        }
    }

    /// One provisioning pass: reserve a slot, create, start, bootstrap.
    async fn attempt_create(&self) -> Result<SandboxId> {
        let s = &self.shared;
        let id = SandboxId::new();
        let container = ContainerRef::new(format!("sandbox-{id}"));
        {
            // Reserving the map entry up front keeps the pool bound exact
            // even while the engine round-trips are in flight.
            let mut inner = s.inner.lock().await;
            if inner.sandboxes.len() >= s.config.pool.max_total {
                return Err(SandboxError::PoolExhausted(s.config.pool.max_total));
            }
            inner.sandboxes.insert(
                id.clone(),
                TrackedSandbox::new(id.clone(), container.clone()),
            );
        }
        s.events.emit(&SandboxEvent::Created { id: id.clone() });
        tracing::info!(sandbox_id = %id, "Creating sandbox");

        match self.provision(&id, &container).await {
            Ok(()) => {
                s.counters.created.fetch_add(1, Ordering::Relaxed);
                tracing::info!(sandbox_id = %id, "Sandbox ready");
                Ok(id)
            }
            Err(e) => {
                if let Err(remove_err) = s.driver.remove_container(&container).await {
                    tracing::debug!(sandbox_id = %id, error = %remove_err, "Cleanup removal failed");
                }
                s.inner.lock().await.sandboxes.remove(&id);
                s.events.emit(&SandboxEvent::Error {
                    id: Some(id.clone()),
                    message: e.to_string(),
                });
                tracing::warn!(sandbox_id = %id, error = %e, "Sandbox creation failed");
                Err(e)
            }
        }
    }

    async fn provision(&self, id: &SandboxId, container: &ContainerRef) -> Result<()> {
        let s = &self.shared;
        s.driver.create_container(&s.config, id).await?;
        self.set_state(id, SandboxState::Initializing).await?;
        s.driver.start_container(container).await?;
        s.driver
            .init_python(container, s.config.timeouts.init())
            .await?;
        self.set_state(id, SandboxState::Ready).await?;
        Ok(())
    }

    /// Provision a sandbox and put it on the ready queue.
    async fn warm_one(&self) -> Result<()> {
        let id = self.create_fresh().await?;
        let mut inner = self.shared.inner.lock().await;
        let is_ready = inner
            .sandboxes
            .get(&id)
            .map(|s| s.state == SandboxState::Ready)
            .unwrap_or(false);
        if is_ready {
            inner.ready.push_back(id);
        }
        Ok(())
    }

    /// Table-checked transition plus the post-update event.
    async fn set_state(&self, id: &SandboxId, to: SandboxState) -> Result<()> {
        let from = {
            let mut inner = self.shared.inner.lock().await;
            let Some(sb) = inner.sandboxes.get_mut(id) else {
                return Err(SandboxError::UnknownSandbox(id.clone()));
            };
            let from = sb.state;
            sb.state = state::transition(from, to)?;
            from
        };
        self.shared.events.emit(&SandboxEvent::StateChange {
            id: id.clone(),
            from,
            to,
        });
        Ok(())
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Destroy a sandbox whatever state it is in.
    ///
    /// Teardown must never be blocked by the lifecycle table, so the state
    /// is written directly. Engine errors are logged and absorbed. Called
    /// concurrently, only the caller that removes the map entry proceeds,
    /// so the `Destroyed` event fires at most once.
    pub async fn destroy_sandbox(&self, id: &SandboxId, reason: &str) {
        let s = &self.shared;
        let removed = {
            let mut inner = s.inner.lock().await;
            inner.ready.retain(|queued| queued != id);
            inner.sandboxes.remove(id)
        };
        let Some(mut sb) = removed else {
            return;
        };
        sb.state = SandboxState::Destroyed;

        if let Err(e) = s
            .driver
            .stop_container(&sb.container, DESTROY_STOP_GRACE_SECS)
            .await
        {
            tracing::warn!(sandbox_id = %id, error = %e, "Failed to stop container");
        }
        if let Err(e) = s.driver.remove_container(&sb.container).await {
            tracing::warn!(sandbox_id = %id, error = %e, "Failed to remove container");
        }

        s.counters.destroyed.fetch_add(1, Ordering::Relaxed);
        s.events.emit(&SandboxEvent::Destroyed {
            id: id.clone(),
            reason: reason.to_string(),
        });
        let age_ms = (chrono::Utc::now() - sb.created_at).num_milliseconds();
        tracing::info!(sandbox_id = %id, reason, age_ms, "Sandbox destroyed");
    }

    /// Remove containers left behind by a prior process. Nothing here is
    /// fatal; a colliding name is simply reclaimed.
    async fn sweep_stale_containers(&self) {
        let s = &self.shared;
        let stale = match s.driver.list_sandbox_containers().await {
            Ok(list) => list,
            Err(e) => {
                tracing::debug!(error = %e, "Stale container sweep skipped");
                return;
            }
        };
        if stale.is_empty() {
            return;
        }
        tracing::info!(count = stale.len(), "Removing stale sandbox containers");
        for container in stale {
            if let Err(e) = s.driver.remove_container(&container).await {
                tracing::warn!(container = %container.name, error = %e, "Failed to remove stale container");
            }
        }
    }

    // =========================================================================
    // Background loops
    // =========================================================================

    fn spawn_loops(&self) {
        let mut loops = self.shared.loops.lock().unwrap_or_else(|e| e.into_inner());
        if !loops.is_empty() {
            return;
        }
        loops.push(tokio::spawn(Self::health_loop(self.clone())));
        loops.push(tokio::spawn(Self::cleanup_loop(self.clone())));
        tracing::debug!(
            interval_ms = self.shared.config.health_check.interval_ms,
            "Background loops started"
        );
    }

    async fn health_loop(this: Self) {
        let interval = this.shared.config.health_check.interval();
        loop {
            tokio::select! {
                biased;
                _ = this.shared.shutdown_notify.notified() => break,
                _ = tokio::time::sleep(interval) => {
                    if this.shared.shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    this.run_health_pass().await;
                }
            }
        }
        tracing::debug!("Health loop exited");
    }

    async fn cleanup_loop(this: Self) {
        let interval = this.shared.config.health_check.interval();
        loop {
            tokio::select! {
                biased;
                _ = this.shared.shutdown_notify.notified() => break,
                _ = tokio::time::sleep(interval) => {
                    if this.shared.shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    this.run_cleanup_pass().await;
                }
            }
        }
        tracing::debug!("Cleanup loop exited");
    }

    /// Probe every `Ready` or `Idle` sandbox; evict after the configured
    /// number of consecutive failures and warm a replacement if the floor
    /// dropped. `Executing` sandboxes are never probed.
    async fn run_health_pass(&self) {
        let s = &self.shared;
        let targets: Vec<(SandboxId, ContainerRef)> = {
            let inner = s.inner.lock().await;
            inner
                .sandboxes
                .values()
                .filter(|sb| matches!(sb.state, SandboxState::Ready | SandboxState::Idle))
                .map(|sb| (sb.id.clone(), sb.container.clone()))
                .collect()
        };

        for (id, container) in targets {
            let healthy = match s.driver.health_probe(&container).await {
                Ok(result) => result.success(),
                Err(e) => {
                    tracing::debug!(sandbox_id = %id, error = %e, "Health probe errored");
                    false
                }
            };

            let failures = {
                let mut inner = s.inner.lock().await;
                let Some(sb) = inner.sandboxes.get_mut(&id) else {
                    continue;
                };
                // Claimed or parked while the probe was in flight.
                if !matches!(sb.state, SandboxState::Ready | SandboxState::Idle) {
                    continue;
                }
                if healthy {
                    sb.health_failures = 0;
                    continue;
                }
                sb.health_failures += 1;
                sb.health_failures
            };

            if failures < s.config.health_check.max_failures {
                tracing::warn!(sandbox_id = %id, failures, "Health probe failed");
                continue;
            }

            s.events.emit(&SandboxEvent::HealthCheckFailed {
                id: id.clone(),
                failures,
            });
            self.destroy_sandbox(&id, reason::HEALTH_CHECK_FAILURE).await;

            let ready = s.inner.lock().await.ready_count();
            if ready < s.config.pool.min_warm {
                let this = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = this.warm_one().await {
                        tracing::warn!(error = %e, "Failed to warm replacement sandbox");
                    }
                });
            }
        }
    }

    /// Reap `Idle` sandboxes past the idle TTL. `Ready` sandboxes are the
    /// warm pool and are never reaped here; `Executing` ones are untouched.
    async fn run_cleanup_pass(&self) {
        let s = &self.shared;
        let max_idle = Duration::from_millis(s.config.pool.max_idle_ms);
        let expired: Vec<SandboxId> = {
            let inner = s.inner.lock().await;
            inner
                .sandboxes
                .values()
                .filter(|sb| {
                    sb.state == SandboxState::Idle && sb.last_used_at.elapsed() > max_idle
                })
                .map(|sb| sb.id.clone())
                .collect()
        };
        for id in expired {
            tracing::info!(sandbox_id = %id, "Evicting idle sandbox");
            self.destroy_sandbox(&id, reason::IDLE_TIMEOUT).await;
        }
    }
}
