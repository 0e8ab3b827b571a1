//! In-memory record store: useful for testing and ephemeral sessions.

use enrichments_core::error::StoreError;
use enrichments_core::item::ItemId;
use enrichments_core::record::{EnrichmentRecord, RecordStore};
use std::collections::HashMap;

/// A record store that keeps everything in a map.
/// Useful for testing and sessions where persistence isn't needed.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    records: HashMap<ItemId, EnrichmentRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn load(&self, item: ItemId) -> Result<Option<EnrichmentRecord>, StoreError> {
        Ok(self.records.get(&item).cloned())
    }

    fn save(&mut self, item: ItemId, record: &EnrichmentRecord) -> Result<(), StoreError> {
        self.records.insert(item, record.clone());
        Ok(())
    }

    fn delete(&mut self, item: ItemId) -> Result<bool, StoreError> {
        Ok(self.records.remove(&item).is_some())
    }

    fn items(&self) -> Result<Vec<ItemId>, StoreError> {
        Ok(self.records.keys().copied().collect())
    }
}
