//! File-based record store: persistent JSON-lines storage.
//!
//! Each line is one `{ "item": ..., "record": ... }` object.
//!
//! Storage location: `~/.enrichments/records.jsonl` by default.
//!
//! Records are loaded into memory on creation and the whole file is
//! rewritten on every mutation (save, delete). This gives fast reads with
//! durable writes.

use enrichments_core::error::StoreError;
use enrichments_core::item::ItemId;
use enrichments_core::record::{EnrichmentRecord, RecordStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct StoredLine {
    item: ItemId,
    record: EnrichmentRecord,
}

/// A file-backed record store using JSONL (one JSON object per line).
pub struct FileStore {
    path: PathBuf,
    records: BTreeMap<ItemId, EnrichmentRecord>,
}

impl FileStore {
    /// Open a store at the given path.
    ///
    /// If the file exists, records are loaded from it.
    /// If the file does not exist, starts empty (file created on first write).
    pub fn new(path: PathBuf) -> Self {
        let records = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = records.len(), "File record store loaded");
        Self { path, records }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load records from a JSONL file. Later lines for the same item win.
    fn load_from_disk(path: &Path) -> BTreeMap<ItemId, EnrichmentRecord> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return BTreeMap::new(), // File doesn't exist yet: start empty
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<StoredLine>(line) {
                Ok(stored) => Some((stored.item, stored.record)),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted enrichment record");
                    None
                }
            })
            .collect()
    }

    /// Write all records to disk as JSONL.
    fn flush(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Storage(format!("Failed to create record directory: {e}"))
            })?;
        }

        let mut content = String::new();
        for (item, record) in &self.records {
            let line = serde_json::to_string(&StoredLine {
                item: *item,
                record: record.clone(),
            })
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
            content.push_str(&line);
            content.push('\n');
        }

        std::fs::write(&self.path, &content)
            .map_err(|e| StoreError::Storage(format!("Failed to write record file: {e}")))?;

        Ok(())
    }
}

impl RecordStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    fn load(&self, item: ItemId) -> Result<Option<EnrichmentRecord>, StoreError> {
        Ok(self.records.get(&item).cloned())
    }

    fn save(&mut self, item: ItemId, record: &EnrichmentRecord) -> Result<(), StoreError> {
        let previous = self.records.insert(item, record.clone());
        if let Err(e) = self.flush() {
            // Keep memory and disk in agreement
            match previous {
                Some(previous) => self.records.insert(item, previous),
                None => self.records.remove(&item),
            };
            return Err(e);
        }
        Ok(())
    }

    fn delete(&mut self, item: ItemId) -> Result<bool, StoreError> {
        let Some(previous) = self.records.remove(&item) else {
            return Ok(false);
        };
        if let Err(e) = self.flush() {
            self.records.insert(item, previous);
            return Err(e);
        }
        Ok(true)
    }

    fn items(&self) -> Result<Vec<ItemId>, StoreError> {
        Ok(self.records.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn record_with(ids: &[&str]) -> EnrichmentRecord {
        let mut record = EnrichmentRecord::default();
        for id in ids {
            record.push(id);
        }
        record
    }

    #[test]
    fn save_and_reload_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let item = ItemId::new();

        let mut store = FileStore::new(path.clone());
        store.save(item, &record_with(&["fire", "frost"])).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("frost"));

        let reopened = FileStore::new(path);
        let record = reopened.load(item).unwrap().unwrap();
        assert_eq!(record.enrichment_ids, vec!["fire", "frost"]);
    }

    #[test]
    fn delete_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let item = ItemId::new();

        let mut store = FileStore::new(path.clone());
        store.save(item, &record_with(&["fire"])).unwrap();
        assert!(store.delete(item).unwrap());
        assert!(!store.delete(item).unwrap());

        let reopened = FileStore::new(path);
        assert!(reopened.load(item).unwrap().is_none());
        assert!(reopened.items().unwrap().is_empty());
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("records.jsonl");
        let mut store = FileStore::new(path.clone());
        store.save(ItemId::new(), &record_with(&["wind"])).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn handles_missing_file_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("absent.jsonl"));
        assert!(store.items().unwrap().is_empty());
    }

    #[test]
    fn handles_corrupted_lines() {
        let first = ItemId::new();
        let second = ItemId::new();
        let mut tmp = NamedTempFile::new().unwrap();
        writeln!(
            tmp,
            r#"{{"item":"{}","record":{{"version":1,"max_enrichments":4,"value_modifiers":{{}},"enrichment_ids":["fire"]}}}}"#,
            first.0
        )
        .unwrap();
        writeln!(tmp, "this is not json").unwrap();
        writeln!(
            tmp,
            r#"{{"item":"{}","record":{{"enrichment_ids":["ghost"]}}}}"#,
            second.0
        )
        .unwrap();

        let store = FileStore::new(tmp.path().to_path_buf());
        assert_eq!(store.items().unwrap().len(), 2);
        assert_eq!(store.load(second).unwrap().unwrap().version, 0);
    }
}
