//! Lifecycle event bus.
//!
//! Listeners are invoked synchronously, in registration order, at the
//! point the event occurs. A panicking listener is caught and logged so it
//! cannot disturb the emitter or the other listeners. For every sandbox
//! the manager emits exactly one `Created`, zero or more `StateChange`
//! (always after the state field has been updated), and at most one
//! `Destroyed`, last.

use crate::sandbox::SandboxId;
use crate::state::SandboxState;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A lifecycle event emitted by the sandbox manager.
#[derive(Debug, Clone)]
pub enum SandboxEvent {
    Created {
        id: SandboxId,
    },
    StateChange {
        id: SandboxId,
        from: SandboxState,
        to: SandboxState,
    },
    Destroyed {
        id: SandboxId,
        reason: String,
    },
    HealthCheckFailed {
        id: SandboxId,
        failures: u32,
    },
    Error {
        id: Option<SandboxId>,
        message: String,
    },
}

/// Token returned by `on`; pass to `off` to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&SandboxEvent) + Send + Sync>;

#[derive(Default)]
pub(crate) struct EventBus {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn subscribe(&self, f: impl Fn(&SandboxEvent) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(f)));
        ListenerId(id)
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(lid, _)| *lid != id.0);
    }

    pub fn emit(&self, event: &SandboxEvent) {
        // Snapshot outside the lock so a listener can subscribe or
        // unsubscribe without deadlocking.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!(?event, "Event listener panicked");
            }
        }
    }
}
