//! Start/stop state machine for background loops.
//!
//! A [`PeriodicTask`] moves `Idle → Running → Stopping → Idle`. Starting a
//! running task is a no-op; stopping cancels the loop's token and waits for
//! the spawned task to return, so shutdown never abandons an in-flight pass.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Observable phase of a [`PeriodicTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// No loop running.
    Idle,
    /// Loop spawned and accepting ticks.
    Running,
    /// Cancellation signalled; waiting for the loop to exit.
    Stopping,
}

enum TaskState {
    Idle,
    Running {
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    },
    Stopping,
}

/// Owner of at most one spawned background loop.
pub struct PeriodicTask {
    name: &'static str,
    state: Mutex<TaskState>,
}

impl PeriodicTask {
    /// Create an idle task slot.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(TaskState::Idle),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> TaskPhase {
        match *self.lock() {
            TaskState::Idle => TaskPhase::Idle,
            TaskState::Running { .. } => TaskPhase::Running,
            TaskState::Stopping => TaskPhase::Stopping,
        }
    }

    /// Spawn the loop via `spawn` unless one is already running or stopping.
    ///
    /// `spawn` receives a fresh cancellation token the loop must observe.
    /// Returns `true` when a new loop was spawned.
    pub fn start<F>(&self, spawn: F) -> bool
    where
        F: FnOnce(CancellationToken) -> JoinHandle<()>,
    {
        let mut state = self.lock();
        if !matches!(*state, TaskState::Idle) {
            debug!(task = self.name, "start ignored; already running");
            return false;
        }
        let cancel = CancellationToken::new();
        let handle = spawn(cancel.clone());
        *state = TaskState::Running { cancel, handle };
        debug!(task = self.name, "background task started");
        true
    }

    /// Signal cancellation and wait for the loop to exit.
    ///
    /// A no-op when idle. A concurrent second caller returns immediately
    /// while the first is still waiting.
    pub async fn stop(&self) {
        let running = {
            let mut state = self.lock();
            match std::mem::replace(&mut *state, TaskState::Stopping) {
                TaskState::Running { cancel, handle } => Some((cancel, handle)),
                TaskState::Idle => {
                    *state = TaskState::Idle;
                    None
                }
                TaskState::Stopping => None,
            }
        };

        let Some((cancel, handle)) = running else {
            return;
        };

        cancel.cancel();
        if let Err(err) = handle.await {
            warn!(task = self.name, %err, "background task ended abnormally");
        }
        *self.lock() = TaskState::Idle;
        debug!(task = self.name, "background task stopped");
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
