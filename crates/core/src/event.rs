//! Domain event system: decoupled notification of lifecycle changes.
//!
//! Events are published when something interesting happens to an item's
//! enrichments. The presentation layer subscribes to react (e.g. playing a
//! "denied" pulse) without the lifecycle manager knowing about it.
//!
//! Listeners live in an owned list: every subscription returns a
//! [`ListenerId`], and [`EventBus::clear`] drops all of them on teardown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::item::ItemId;

/// All domain events in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DomainEvent {
    /// An enrichment was granted and its instance loaded
    EnrichmentAdded {
        item: ItemId,
        enrichment: String,
        timestamp: DateTime<Utc>,
    },

    /// An enrichment was removed from an item
    EnrichmentRemoved {
        item: ItemId,
        enrichment: String,
        timestamp: DateTime<Utc>,
    },

    /// A grant was refused (template missing, capacity, eligibility, rollback)
    EnrichmentDenied {
        item: ItemId,
        enrichment: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// An item's persisted enrichments were restored on spawn
    EnrichmentsLoaded {
        item: ItemId,
        enrichments: Vec<String>,
        missing: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// An item's live enrichments were unloaded on despawn
    EnrichmentsUnloaded {
        item: ItemId,
        enrichments: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// An instance hook failed and was isolated
    HookFailed {
        item: ItemId,
        enrichment: String,
        hook: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// An item's maximum capacity changed
    CapacityChanged {
        item: ItemId,
        max_enrichments: u32,
        timestamp: DateTime<Utc>,
    },

    /// A stale record was migrated to the current schema
    MigrationApplied {
        item: ItemId,
        rule: String,
        from_version: u32,
        to_version: u32,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// The item this event concerns.
    pub fn item(&self) -> ItemId {
        match self {
            Self::EnrichmentAdded { item, .. }
            | Self::EnrichmentRemoved { item, .. }
            | Self::EnrichmentDenied { item, .. }
            | Self::EnrichmentsLoaded { item, .. }
            | Self::EnrichmentsUnloaded { item, .. }
            | Self::HookFailed { item, .. }
            | Self::CapacityChanged { item, .. }
            | Self::MigrationApplied { item, .. } => *item,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&DomainEvent) + Send>;

/// An owned observer list for domain events.
///
/// Listeners are invoked synchronously, in subscription order, on the
/// publishing thread.
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<(ListenerId, Listener)>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn subscribe(&mut self, listener: impl FnMut(&DomainEvent) + Send + 'static) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() < before
    }

    /// Publish an event to all listeners.
    pub fn publish(&mut self, event: DomainEvent) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(&event);
        }
    }

    /// Drop every listener.
    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
