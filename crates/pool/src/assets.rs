//! Reference-counted visual asset cache.
//!
//! One load per asset key, shared by every token slot showing it. The handle
//! goes back to the loader only when the last slot lets go.

use std::collections::HashMap;

use enrichments_core::asset::AssetHandle;

use crate::token::{TokenId, VisualSlot};

/// A token slot waiting for an asset, tagged with the binding epoch that asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    pub token: TokenId,
    pub epoch: u64,
    pub slot: VisualSlot,
}

#[derive(Debug)]
enum Entry {
    Pending(Vec<Waiter>),
    Loaded { handle: AssetHandle, refs: usize },
}

/// What the caller must do after [`AssetCache::request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Already loaded; the reference was taken.
    Hit(AssetHandle),
    /// A load is in flight; the waiter was queued behind it.
    Queued,
    /// First request for the key; the caller must start the load.
    Miss,
}

#[derive(Debug, Default)]
pub struct AssetCache {
    entries: HashMap<String, Entry>,
}

impl AssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self, key: &str, waiter: Waiter) -> Lookup {
        match self.entries.get_mut(key) {
            Some(Entry::Loaded { handle, refs }) => {
                *refs += 1;
                Lookup::Hit(handle.clone())
            }
            Some(Entry::Pending(waiters)) => {
                waiters.push(waiter);
                Lookup::Queued
            }
            None => {
                self.entries
                    .insert(key.to_string(), Entry::Pending(vec![waiter]));
                Lookup::Miss
            }
        }
    }

    /// Take the waiters of a finished load. `None` if no load was pending.
    pub fn take_waiters(&mut self, key: &str) -> Option<Vec<Waiter>> {
        match self.entries.remove(key) {
            Some(Entry::Pending(waiters)) => Some(waiters),
            Some(loaded) => {
                self.entries.insert(key.to_string(), loaded);
                None
            }
            None => None,
        }
    }

    /// Record a loaded handle with `refs` live users. Zero refs is not stored.
    pub fn insert_loaded(&mut self, handle: AssetHandle, refs: usize) {
        if refs > 0 {
            self.entries
                .insert(handle.key.clone(), Entry::Loaded { handle, refs });
        }
    }

    /// Drop one reference. Returns the handle once nobody uses it.
    pub fn release(&mut self, key: &str) -> Option<AssetHandle> {
        let Some(Entry::Loaded { refs, .. }) = self.entries.get_mut(key) else {
            return None;
        };
        *refs = refs.saturating_sub(1);
        if *refs > 0 {
            return None;
        }
        match self.entries.remove(key) {
            Some(Entry::Loaded { handle, .. }) => Some(handle),
            _ => None,
        }
    }

    /// Forget everything, returning each loaded handle once.
    pub fn drain(&mut self) -> Vec<AssetHandle> {
        self.entries
            .drain()
            .filter_map(|(_, entry)| match entry {
                Entry::Loaded { handle, .. } => Some(handle),
                Entry::Pending(_) => None,
            })
            .collect()
    }

    pub fn refs(&self, key: &str) -> usize {
        match self.entries.get(key) {
            Some(Entry::Loaded { refs, .. }) => *refs,
            _ => 0,
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        matches!(self.entries.get(key), Some(Entry::Pending(_)))
    }

    /// Number of loaded assets currently held.
    pub fn loaded(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry, Entry::Loaded { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiter(token: u64) -> Waiter {
        Waiter {
            token: TokenId(token),
            epoch: 1,
            slot: VisualSlot::OrbIcon,
        }
    }

    #[test]
    fn first_request_misses_then_queues() {
        let mut cache = AssetCache::new();
        assert_eq!(cache.request("icon.fire", waiter(1)), Lookup::Miss);
        assert_eq!(cache.request("icon.fire", waiter(2)), Lookup::Queued);
        assert!(cache.is_pending("icon.fire"));

        let waiters = cache.take_waiters("icon.fire").unwrap();
        assert_eq!(waiters, vec![waiter(1), waiter(2)]);
        assert!(cache.take_waiters("icon.fire").is_none());
    }

    #[test]
    fn shared_handle_released_on_last_reference() {
        let mut cache = AssetCache::new();
        let handle = AssetHandle::new("icon.fire", 1);
        cache.insert_loaded(handle.clone(), 2);
        assert_eq!(cache.request("icon.fire", waiter(3)), Lookup::Hit(handle.clone()));
        assert_eq!(cache.refs("icon.fire"), 3);

        assert!(cache.release("icon.fire").is_none());
        assert!(cache.release("icon.fire").is_none());
        assert_eq!(cache.release("icon.fire"), Some(handle));
        assert_eq!(cache.refs("icon.fire"), 0);
        assert!(cache.release("icon.fire").is_none());
    }

    #[test]
    fn unreferenced_handle_is_not_kept() {
        let mut cache = AssetCache::new();
        cache.insert_loaded(AssetHandle::new("icon.fire", 1), 0);
        assert_eq!(cache.loaded(), 0);
    }

    #[test]
    fn drain_returns_loaded_only() {
        let mut cache = AssetCache::new();
        cache.insert_loaded(AssetHandle::new("icon.fire", 1), 1);
        cache.request("icon.frost", waiter(1));
        assert_eq!(cache.drain(), vec![AssetHandle::new("icon.fire", 1)]);
        assert!(!cache.is_pending("icon.frost"));
    }
}
