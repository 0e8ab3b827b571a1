//! Asset loader interface: the host's async-load-by-key primitive.
//!
//! A load request returns immediately. Its completion callback runs later on
//! the same logical thread, between frames. Completions for one key arrive in
//! request order; completions for different keys are unordered.

use serde::{Deserialize, Serialize};

use crate::error::AssetError;

/// An opaque handle to a loaded asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetHandle {
    /// The key the asset was loaded by
    pub key: String,

    /// Loader-assigned identity of this load
    pub id: u64,
}

impl AssetHandle {
    pub fn new(key: impl Into<String>, id: u64) -> Self {
        Self { key: key.into(), id }
    }
}

/// Completion callback of a load request.
pub type LoadCallback = Box<dyn FnOnce(Result<AssetHandle, AssetError>) + Send>;

/// The host's asset loader.
pub trait AssetLoader: Send + Sync {
    /// Request `key`; `on_complete` is invoked later with the outcome.
    fn load_async(&self, key: &str, on_complete: LoadCallback);

    /// Hand an asset back to the loader.
    fn release(&self, handle: AssetHandle);
}
