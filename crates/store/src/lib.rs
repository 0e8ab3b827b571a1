//! Record store implementations for the enrichment system.

pub mod file_backend;
pub mod in_memory;

pub use file_backend::FileStore;
pub use in_memory::InMemoryStore;

use enrichments_core::error::StoreError;
use enrichments_core::record::RecordStore;
use std::path::PathBuf;

/// Open a store by backend name ("memory" or "file").
pub fn open_store(backend: &str, path: PathBuf) -> Result<Box<dyn RecordStore>, StoreError> {
    match backend {
        "memory" => Ok(Box::new(InMemoryStore::new())),
        "file" => Ok(Box::new(FileStore::new(path))),
        other => Err(StoreError::Storage(format!("Unknown record store backend: {other}"))),
    }
}
