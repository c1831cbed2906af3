//! Per-job unwind list.
//!
//! Every orchestration registers its teardown steps here as it acquires
//! resources (cancel the job scope, release the repository lock, clear the
//! backup-path flag, close the live entry) and runs them once when the job
//! ends, whichever way it ends.

use std::sync::{Arc, Mutex};

use crate::platform::lock_unpoisoned;

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
pub struct CleanupContext {
    callbacks: Mutex<Vec<(&'static str, Callback)>>,
}

impl CleanupContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an unwind step. `label` only shows up in debug logs.
    pub fn add_cleanup(&self, label: &'static str, f: impl FnOnce() + Send + 'static) {
        lock_unpoisoned(&self.callbacks, "cleanup").push((label, Box::new(f)));
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.callbacks, "cleanup").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every registered callback, most recently added first, and clear
    /// the list. A second call runs nothing.
    pub fn cleanup(&self) {
        // Callbacks run without the mutex held.
        let callbacks = std::mem::take(&mut *lock_unpoisoned(&self.callbacks, "cleanup"));
        for (label, f) in callbacks.into_iter().rev() {
            tracing::debug!(step = label, "cleanup");
            f();
        }
    }

    /// Run [`cleanup`](Self::cleanup) on the blocking pool; unwind steps may
    /// talk to the repository engine.
    pub async fn unwind(self: &Arc<Self>) {
        let this = Arc::clone(self);
        if let Err(e) = tokio::task::spawn_blocking(move || this.cleanup()).await {
            tracing::error!(error = %e, "cleanup task panicked");
        }
    }
}
