//! Enrichment lifecycle: the authoritative item → instances registry.
//!
//! [`EnrichmentManager`] grants, removes, restores and unloads enrichments and
//! forwards host events to their instances. [`MigratorChain`] brings stale
//! persisted records up to the current schema version on load.

pub mod manager;
pub mod migrate;

pub use manager::{AddOutcome, EnrichmentManager, LoadReport, ManagerSettings, RemoveOutcome};
pub use migrate::{IdRemapMigrator, MigrationOutcome, MigratorChain, VersionMigrator};
