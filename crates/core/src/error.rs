//! Error types for the enrichment domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all enrichment operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Lifecycle errors ---
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    // --- Hook errors ---
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    // --- Record storage errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Catalog errors ---
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    // --- Asset errors ---
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    // --- Migration errors ---
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Errors surfaced by the lifecycle manager to its callers.
///
/// `AlreadyPresent` and `NotPresent` are not errors; they are reported through
/// the operation outcome instead.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Enrichment template not found: {0}")]
    TemplateNotFound(String),

    #[error("Cannot add {id}: item is at capacity ({max} enrichments)")]
    CapacityExceeded { id: String, max: u32 },

    #[error("Enrichment {id} is not allowed on item {item}")]
    NotEligible { id: String, item: String },

    #[error("Enrichment {id} was rolled back: {source}")]
    Rejected {
        id: String,
        #[source]
        source: HookError,
    },

    #[error("Record store failure: {0}")]
    Store(#[from] StoreError),
}

/// A failure raised by an enrichment instance or its factory.
#[derive(Debug, Clone, Error)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),

    #[error("hook panicked: {0}")]
    Panicked(String),

    #[error("no factory registered for enrichment kind '{0}'")]
    UnknownVariant(String),
}

impl HookError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Failed to serialize record: {0}")]
    Serialization(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to parse enrichment catalog: {0}")]
    Parse(String),

    #[error("Invalid template '{id}': {reason}")]
    InvalidTemplate { id: String, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum AssetError {
    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Asset load failed for {key}: {reason}")]
    LoadFailed { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationError {
    #[error("Migration {rule} failed: {reason}")]
    Failed { rule: String, reason: String },
}
