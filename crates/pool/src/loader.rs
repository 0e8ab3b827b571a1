//! A frame-pumped [`AssetLoader`].
//!
//! Requests queue up and complete, in request order, when the host calls
//! [`DeferredLoader::pump`] between frames. Completions run on the pumping
//! thread. Used by hosts without their own streaming loader and by tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use enrichments_core::asset::{AssetHandle, AssetLoader, LoadCallback};
use enrichments_core::error::AssetError;
use tracing::{debug, warn};

#[derive(Default)]
struct LoaderState {
    queue: VecDeque<(String, LoadCallback)>,
    missing: HashSet<String>,
    /// Handle id → key of every load not yet released
    outstanding: HashMap<u64, String>,
    next_id: u64,
    released: usize,
}

#[derive(Clone, Default)]
pub struct DeferredLoader {
    state: Arc<Mutex<LoaderState>>,
}

impl DeferredLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future load of `key` fail.
    pub fn mark_missing(&self, key: impl Into<String>) {
        self.lock().missing.insert(key.into());
    }

    /// Complete every queued request, including ones queued by completions.
    /// Returns how many completed.
    pub fn pump(&self) -> usize {
        let mut completed = 0;
        while self.pump_one() {
            completed += 1;
        }
        completed
    }

    /// Complete the oldest queued request. Returns `false` if none was queued.
    pub fn pump_one(&self) -> bool {
        let (key, on_complete, result) = {
            let mut state = self.lock();
            let Some((key, on_complete)) = state.queue.pop_front() else {
                return false;
            };
            let result = if state.missing.contains(&key) {
                Err(AssetError::NotFound(key.clone()))
            } else {
                state.next_id += 1;
                let id = state.next_id;
                state.outstanding.insert(id, key.clone());
                Ok(AssetHandle::new(key.clone(), id))
            };
            (key, on_complete, result)
        };
        debug!(key = %key, ok = result.is_ok(), "Asset load completed");
        // The callback may issue new loads, so the lock is not held here
        on_complete(result);
        true
    }

    /// Requests waiting for a pump.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Loaded handles not yet released.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding.len()
    }

    /// Loaded, unreleased handles for `key`.
    pub fn outstanding_for(&self, key: &str) -> usize {
        self.lock().outstanding.values().filter(|k| *k == key).count()
    }

    /// Handles handed back so far.
    pub fn released(&self) -> usize {
        self.lock().released
    }

    fn lock(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AssetLoader for DeferredLoader {
    fn load_async(&self, key: &str, on_complete: LoadCallback) {
        self.lock().queue.push_back((key.to_string(), on_complete));
    }

    fn release(&self, handle: AssetHandle) {
        let mut state = self.lock();
        if state.outstanding.remove(&handle.id).is_some() {
            state.released += 1;
        } else {
            warn!(key = %handle.key, id = handle.id, "Release of unknown asset handle");
        }
    }
}
