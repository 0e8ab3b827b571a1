//! # Enrichments Core
//!
//! Domain types, traits, and error definitions for the item enrichment system.
//! This crate has **no host-engine dependencies**: the catalog, the asset loader
//! and record persistence are traits here, implemented by the host or by the
//! other crates in the workspace.
//!
//! ## Design Philosophy
//!
//! Every collaborator is defined as a trait here. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with in-memory implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod asset;
pub mod catalog;
pub mod enrichment;
pub mod error;
pub mod event;
pub mod item;
pub mod math;
pub mod record;
pub mod template;

// Re-export key types at crate root for ergonomics
pub use asset::{AssetHandle, AssetLoader, LoadCallback};
pub use catalog::{InMemoryCatalog, TemplateCatalog, eligible_templates};
pub use enrichment::{
    BasicEnrichment, CollisionInfo, Enrichment, EnrichmentFactory, FactoryRegistry, HookResult,
    ImbueContext, Siblings,
};
pub use error::{
    AssetError, CatalogError, Error, HookError, LifecycleError, MigrationError, Result, StoreError,
};
pub use event::{DomainEvent, EventBus, ListenerId};
pub use item::{Item, ItemId, ItemKind};
pub use math::{Pose, Quat, Vec3};
pub use record::{
    CURRENT_SCHEMA_VERSION, DEFAULT_MAX_ENRICHMENTS, EnrichmentRecord, RecordStore,
};
pub use template::{EligibilityFilter, EnrichmentTemplate, FilterList, FilterMode, TemplateVisuals};
