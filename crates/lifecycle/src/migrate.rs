//! Version migration of persisted enrichment records.
//!
//! A record whose `version` differs from the current schema version is matched
//! against an ordered chain of migrators. Only the first rule whose
//! `(source_version, target_version)` equals `(record.version, current)` may
//! fire, and only if it is configured to auto-update. Multi-step chains are
//! not walked.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use enrichments_config::MigrationConfig;
use enrichments_core::error::MigrationError;
use enrichments_core::item::Item;
use enrichments_core::record::EnrichmentRecord;
use tracing::debug;

/// A single-step record migration rule.
pub trait VersionMigrator: Send + Sync {
    /// Rule name, used in logs and events.
    fn name(&self) -> &str;

    fn source_version(&self) -> u32;

    fn target_version(&self) -> u32;

    /// Whether the rule may run without an explicit request.
    fn auto_update(&self) -> bool {
        true
    }

    /// Rewrite `record` in place. The chain sets `version` afterwards.
    fn migrate(&self, item: &Item, record: &mut EnrichmentRecord) -> Result<(), MigrationError>;
}

/// What happened to a record during [`MigratorChain::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The record already carries the current version.
    #[default]
    UpToDate,
    /// A rule rewrote the record.
    Applied { rule: String, from: u32, to: u32 },
    /// A rule matched but is not auto-updating; the record was left stale.
    Deferred { rule: String, from: u32 },
    /// No rule covers the record's version.
    NoRule { from: u32 },
    /// The matching rule failed; the record was left untouched.
    Failed { rule: String, error: MigrationError },
}

/// Ordered list of migration rules.
#[derive(Default)]
pub struct MigratorChain {
    rules: Vec<Box<dyn VersionMigrator>>,
}

impl MigratorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the chain from configured `[[migrations]]` entries, in order.
    pub fn from_config(rules: &[MigrationConfig]) -> Self {
        let mut chain = Self::new();
        for rule in rules {
            chain.register(Box::new(IdRemapMigrator::from_config(rule)));
        }
        chain
    }

    /// Append a rule. Earlier rules win on overlap.
    pub fn register(&mut self, rule: Box<dyn VersionMigrator>) {
        debug!(
            rule = %rule.name(),
            from = rule.source_version(),
            to = rule.target_version(),
            "Registered migration rule"
        );
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Bring `record` to `current` if a single rule covers it.
    ///
    /// The rule runs against a copy; `record` only changes on success.
    pub fn apply(&self, item: &Item, record: &mut EnrichmentRecord, current: u32) -> MigrationOutcome {
        let from = record.version;
        if from == current {
            return MigrationOutcome::UpToDate;
        }

        let Some(rule) = self
            .rules
            .iter()
            .find(|r| r.source_version() == from && r.target_version() == current)
        else {
            return MigrationOutcome::NoRule { from };
        };

        if !rule.auto_update() {
            return MigrationOutcome::Deferred {
                rule: rule.name().to_string(),
                from,
            };
        }

        let mut migrated = record.clone();
        match rule.migrate(item, &mut migrated) {
            Ok(()) => {
                migrated.version = current;
                *record = migrated;
                MigrationOutcome::Applied {
                    rule: rule.name().to_string(),
                    from,
                    to: current,
                }
            }
            Err(error) => MigrationOutcome::Failed {
                rule: rule.name().to_string(),
                error,
            },
        }
    }
}

/// Renames and drops enrichment ids, keeping list order and uniqueness.
#[derive(Debug, Clone)]
pub struct IdRemapMigrator {
    name: String,
    source_version: u32,
    target_version: u32,
    auto_update: bool,
    renames: BTreeMap<String, String>,
    removed: BTreeSet<String>,
}

impl IdRemapMigrator {
    pub fn new(name: impl Into<String>, source_version: u32, target_version: u32) -> Self {
        Self {
            name: name.into(),
            source_version,
            target_version,
            auto_update: true,
            renames: BTreeMap::new(),
            removed: BTreeSet::new(),
        }
    }

    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            name: config.name.clone(),
            source_version: config.source_version,
            target_version: config.target_version,
            auto_update: config.auto_update,
            renames: config.renames.clone(),
            removed: config.removed.iter().cloned().collect(),
        }
    }

    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.insert(from.into(), to.into());
        self
    }

    pub fn remove(mut self, id: impl Into<String>) -> Self {
        self.removed.insert(id.into());
        self
    }

    pub fn manual(mut self) -> Self {
        self.auto_update = false;
        self
    }
}

impl VersionMigrator for IdRemapMigrator {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_version(&self) -> u32 {
        self.source_version
    }

    fn target_version(&self) -> u32 {
        self.target_version
    }

    fn auto_update(&self) -> bool {
        self.auto_update
    }

    fn migrate(&self, _item: &Item, record: &mut EnrichmentRecord) -> Result<(), MigrationError> {
        let mut seen = HashSet::new();
        let mut ids = Vec::with_capacity(record.enrichment_ids.len());
        for id in record.enrichment_ids.drain(..) {
            if self.removed.contains(&id) {
                continue;
            }
            let id = self.renames.get(&id).cloned().unwrap_or(id);
            if id.trim().is_empty() {
                return Err(MigrationError::Failed {
                    rule: self.name.clone(),
                    reason: "rename produced an empty enrichment id".into(),
                });
            }
            if seen.insert(id.clone()) {
                ids.push(id);
            }
        }
        record.enrichment_ids = ids;
        Ok(())
    }
}
