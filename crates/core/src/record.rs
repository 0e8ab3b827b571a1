//! Item enrichment record: the persisted per-item state.
//!
//! The record is the source of truth across spawn/despawn cycles: an ordered,
//! duplicate-free id list, the capacity, and the keyed modifiers that explain
//! how the capacity got there so every grant can be reversed exactly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::item::ItemId;

/// Slots an item has before any capacity modifier.
pub const DEFAULT_MAX_ENRICHMENTS: u32 = 4;

/// Schema version written into new records.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Persisted enrichment state of a single item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    #[serde(default)]
    pub version: u32,

    #[serde(default = "default_max_enrichments")]
    pub max_enrichments: u32,

    /// Capacity grants by key (e.g. the skill that granted them)
    #[serde(default)]
    pub value_modifiers: BTreeMap<String, i32>,

    /// Granted enrichment ids, in grant order
    #[serde(default)]
    pub enrichment_ids: Vec<String>,
}

fn default_max_enrichments() -> u32 {
    DEFAULT_MAX_ENRICHMENTS
}

impl EnrichmentRecord {
    pub fn new(version: u32, default_capacity: u32) -> Self {
        Self {
            version,
            max_enrichments: default_capacity,
            value_modifiers: BTreeMap::new(),
            enrichment_ids: Vec::new(),
        }
    }

    pub fn has(&self, id: &str) -> bool {
        self.enrichment_ids.iter().any(|e| e == id)
    }

    pub fn len(&self) -> usize {
        self.enrichment_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enrichment_ids.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max_enrichments as usize
    }

    /// Nothing left worth persisting: no ids and no capacity grants.
    pub fn is_vacant(&self) -> bool {
        self.enrichment_ids.is_empty() && self.value_modifiers.is_empty()
    }

    /// Append an id. Refused when already present or at capacity.
    pub fn push(&mut self, id: &str) -> bool {
        if self.has(id) || self.is_full() {
            return false;
        }
        self.enrichment_ids.push(id.to_string());
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.enrichment_ids.len();
        self.enrichment_ids.retain(|e| e != id);
        self.enrichment_ids.len() < before
    }

    pub fn modifier_total(&self) -> i64 {
        self.value_modifiers.values().map(|v| i64::from(*v)).sum()
    }

    /// Record a keyed capacity grant. A key can only be granted once.
    pub fn add_modifier(&mut self, key: &str, amount: i32, default_capacity: u32) -> bool {
        if self.value_modifiers.contains_key(key) {
            return false;
        }
        self.value_modifiers.insert(key.to_string(), amount);
        self.settle(default_capacity);
        true
    }

    /// Revoke a keyed grant, returning the amount it had added.
    pub fn remove_modifier(&mut self, key: &str, default_capacity: u32) -> Option<i32> {
        let amount = self.value_modifiers.remove(key)?;
        self.settle(default_capacity);
        Some(amount)
    }

    /// Recompute `max_enrichments` as the default plus every modifier.
    ///
    /// The result never drops below the number of held ids: a shrink leaves
    /// existing enrichments in place and only blocks further grants until the
    /// count falls on its own.
    pub fn settle(&mut self, default_capacity: u32) {
        let granted = (i64::from(default_capacity) + self.modifier_total()).max(0);
        let floor = self.enrichment_ids.len() as i64;
        self.max_enrichments = u32::try_from(granted.max(floor)).unwrap_or(u32::MAX);
    }
}

impl Default for EnrichmentRecord {
    fn default() -> Self {
        Self::new(CURRENT_SCHEMA_VERSION, DEFAULT_MAX_ENRICHMENTS)
    }
}

/// Persistence for enrichment records, keyed by item identity.
///
/// Calls happen on the host's update thread, so implementations are
/// synchronous.
pub trait RecordStore: Send {
    /// Name of this backend (e.g., "memory", "file").
    fn name(&self) -> &str;

    fn load(&self, item: ItemId) -> Result<Option<EnrichmentRecord>, StoreError>;

    fn save(&mut self, item: ItemId, record: &EnrichmentRecord) -> Result<(), StoreError>;

    /// Delete an item's record. Returns whether one existed.
    fn delete(&mut self, item: ItemId) -> Result<bool, StoreError>;

    /// Every item that currently has a record.
    fn items(&self) -> Result<Vec<ItemId>, StoreError>;
}
