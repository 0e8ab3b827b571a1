//! The enrichment lifecycle manager.
//!
//! Owns the authoritative mapping from live items to their enrichment
//! instances, keeps it in step with persisted records, and dispatches host
//! events to instances. Every hook call is failure-isolated: an `Err` or a
//! panic from one instance is logged and reported, never propagated.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use enrichments_config::LifecycleConfig;
use enrichments_core::catalog::TemplateCatalog;
use enrichments_core::enrichment::{
    CollisionInfo, Enrichment, FactoryRegistry, HookResult, ImbueContext, Siblings,
};
use enrichments_core::error::{HookError, LifecycleError, StoreError};
use enrichments_core::event::{DomainEvent, EventBus};
use enrichments_core::item::{Item, ItemId};
use enrichments_core::record::{
    CURRENT_SCHEMA_VERSION, DEFAULT_MAX_ENRICHMENTS, EnrichmentRecord, RecordStore,
};
use enrichments_core::template::EnrichmentTemplate;
use tracing::{debug, error, info, warn};

use crate::migrate::{MigrationOutcome, MigratorChain};

/// Result of a successful [`EnrichmentManager::add_enrichment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// The item already held the id; nothing changed.
    AlreadyPresent,
}

/// Result of a successful [`EnrichmentManager::remove_enrichment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// The item did not hold the id; nothing changed.
    NotPresent,
}

/// What [`EnrichmentManager::load_from_persisted`] restored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Ids that now have a live instance, in persisted order
    pub loaded: Vec<String>,
    /// Persisted ids with no template in the catalog
    pub missing: Vec<String>,
    /// Ids whose factory or load hook failed
    pub failed: Vec<String>,
    pub migration: MigrationOutcome,
}

/// Capacity and schema settings of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerSettings {
    pub default_capacity: u32,
    pub schema_version: u32,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            default_capacity: DEFAULT_MAX_ENRICHMENTS,
            schema_version: CURRENT_SCHEMA_VERSION,
        }
    }
}

impl From<&LifecycleConfig> for ManagerSettings {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            default_capacity: config.default_capacity,
            schema_version: config.schema_version,
        }
    }
}

struct LiveItem {
    item: Item,
    instances: Vec<Box<dyn Enrichment>>,
}

impl LiveItem {
    fn position(&self, id: &str) -> Option<usize> {
        self.instances.iter().position(|instance| instance.id() == id)
    }
}

/// A hook failure waiting to be logged and published.
struct HookFailure {
    enrichment: String,
    hook: &'static str,
    error: HookError,
}

/// Registry of live items and their enrichment instances.
///
/// Constructed per host session and torn down with [`EnrichmentManager::teardown`].
pub struct EnrichmentManager {
    catalog: Arc<dyn TemplateCatalog>,
    store: Box<dyn RecordStore>,
    factories: FactoryRegistry,
    migrators: MigratorChain,
    events: EventBus,
    settings: ManagerSettings,
    live: HashMap<ItemId, LiveItem>,
}

impl EnrichmentManager {
    pub fn new(
        catalog: Arc<dyn TemplateCatalog>,
        store: Box<dyn RecordStore>,
        factories: FactoryRegistry,
        settings: ManagerSettings,
    ) -> Self {
        info!(
            store = %store.name(),
            default_capacity = settings.default_capacity,
            schema_version = settings.schema_version,
            "Enrichment manager created"
        );
        Self {
            catalog,
            store,
            factories,
            migrators: MigratorChain::new(),
            events: EventBus::new(),
            settings,
            live: HashMap::new(),
        }
    }

    /// Use `migrators` for stale records found on load.
    pub fn with_migrators(mut self, migrators: MigratorChain) -> Self {
        self.migrators = migrators;
        self
    }

    pub fn settings(&self) -> ManagerSettings {
        self.settings
    }

    pub fn catalog(&self) -> &Arc<dyn TemplateCatalog> {
        &self.catalog
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    // --- Grants ---

    /// Grant `template_id` to `item`.
    ///
    /// Eligibility filters are not checked here so that forced grants remain
    /// possible; presentation-layer callers check them first.
    pub fn add_enrichment(
        &mut self,
        item: &Item,
        template_id: &str,
    ) -> Result<AddOutcome, LifecycleError> {
        let Some(template) = self.catalog.resolve(template_id) else {
            warn!(item = %item.id, enrichment = %template_id, "Enrichment template not found");
            self.publish_denied(item.id, template_id, "template not found");
            return Err(LifecycleError::TemplateNotFound(template_id.to_string()));
        };

        if self.has_enrichment(item.id, template_id) {
            debug!(item = %item.id, enrichment = %template_id, "Enrichment already present");
            return Ok(AddOutcome::AlreadyPresent);
        }

        let mut record = self.record_or_new(item.id)?;
        if record.has(template_id) {
            // Persisted but not live: its template was missing or its load
            // hook failed at spawn. The slot is already counted.
            debug!(item = %item.id, enrichment = %template_id, "Attaching persisted enrichment with no live instance");
        } else {
            record.settle(self.settings.default_capacity);
            if record.is_full() {
                let max = record.max_enrichments;
                warn!(item = %item.id, enrichment = %template_id, max, "Item is at enrichment capacity");
                self.publish_denied(item.id, template_id, "capacity exceeded");
                return Err(LifecycleError::CapacityExceeded {
                    id: template_id.to_string(),
                    max,
                });
            }

            record.push(template_id);
            self.store.save(item.id, &record)?;
        }

        let instance = match self.attach(item, &template) {
            Ok(instance) => instance,
            Err(source) => {
                error!(
                    item = %item.id,
                    enrichment = %template_id,
                    error = %source,
                    "Enrichment failed to load, rolling back grant"
                );
                record.remove(template_id);
                self.persist(item.id, &record)?;
                self.publish_hook_failed(item.id, template_id, "on_loaded", &source);
                self.publish_denied(item.id, template_id, &source.to_string());
                return Err(LifecycleError::Rejected {
                    id: template_id.to_string(),
                    source,
                });
            }
        };

        self.live
            .entry(item.id)
            .or_insert_with(|| LiveItem {
                item: item.clone(),
                instances: Vec::new(),
            })
            .instances
            .push(instance);

        info!(item = %item.id, enrichment = %template_id, "Enrichment added");
        self.events.publish(DomainEvent::EnrichmentAdded {
            item: item.id,
            enrichment: template_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(AddOutcome::Added)
    }

    /// Remove `id` from `item`. Removal always completes; a failing unload
    /// hook is only logged.
    pub fn remove_enrichment(
        &mut self,
        item: &Item,
        id: &str,
    ) -> Result<RemoveOutcome, LifecycleError> {
        let record = self.store.load(item.id)?;
        let persisted = record.as_ref().is_some_and(|r| r.has(id));
        let live_index = self.live.get(&item.id).and_then(|live| live.position(id));

        if !persisted && live_index.is_none() {
            debug!(item = %item.id, enrichment = %id, "Enrichment not present, nothing to remove");
            return Ok(RemoveOutcome::NotPresent);
        }

        if let Some(mut record) = record.filter(|r| r.has(id)) {
            let before = record.max_enrichments;
            record.remove(id);
            record.settle(self.settings.default_capacity);
            self.persist(item.id, &record)?;
            if record.max_enrichments != before {
                self.publish_capacity(item.id, record.max_enrichments);
            }
        }

        let mut failure = None;
        if let Some(index) = live_index
            && let Some(live) = self.live.get_mut(&item.id)
        {
            let mut instance = live.instances.remove(index);
            if let Err(error) = guarded(|| instance.on_unloaded(item)) {
                failure = Some(error);
            }
            if live.instances.is_empty() {
                self.live.remove(&item.id);
            }
        }
        if let Some(error) = failure {
            self.report(item.id, vec![HookFailure {
                enrichment: id.to_string(),
                hook: "on_unloaded",
                error,
            }]);
        }

        info!(item = %item.id, enrichment = %id, "Enrichment removed");
        self.events.publish(DomainEvent::EnrichmentRemoved {
            item: item.id,
            enrichment: id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(RemoveOutcome::Removed)
    }

    // --- Capacity ---

    /// Apply a keyed capacity grant. Returns `false` if the key was already applied.
    pub fn add_capacity_modifier(
        &mut self,
        item: ItemId,
        key: &str,
        amount: i32,
    ) -> Result<bool, LifecycleError> {
        let mut record = self.record_or_new(item)?;
        if !record.add_modifier(key, amount, self.settings.default_capacity) {
            debug!(item = %item, key = %key, "Capacity modifier already applied");
            return Ok(false);
        }
        self.store.save(item, &record)?;
        info!(item = %item, key = %key, amount, max = record.max_enrichments, "Capacity modifier added");
        self.publish_capacity(item, record.max_enrichments);
        Ok(true)
    }

    /// Revoke a keyed capacity grant. Returns `false` if the key was never applied.
    ///
    /// Held enrichments are never evicted; a shrink only blocks further grants.
    pub fn remove_capacity_modifier(&mut self, item: ItemId, key: &str) -> Result<bool, LifecycleError> {
        let Some(mut record) = self.store.load(item)? else {
            return Ok(false);
        };
        let Some(amount) = record.remove_modifier(key, self.settings.default_capacity) else {
            debug!(item = %item, key = %key, "Capacity modifier not present");
            return Ok(false);
        };
        self.persist(item, &record)?;
        info!(item = %item, key = %key, amount, max = record.max_enrichments, "Capacity modifier removed");
        self.publish_capacity(item, record.max_enrichments);
        Ok(true)
    }

    /// Apply a template's capacity contribution, keyed by the template id.
    pub fn grant_capacity_from(&mut self, item: ItemId, template_id: &str) -> Result<bool, LifecycleError> {
        let template = self
            .catalog
            .resolve(template_id)
            .ok_or_else(|| LifecycleError::TemplateNotFound(template_id.to_string()))?;
        self.add_capacity_modifier(item, &template.id, template.capacity_contribution)
    }

    /// Revoke a grant made by [`Self::grant_capacity_from`].
    pub fn revoke_capacity_from(&mut self, item: ItemId, template_id: &str) -> Result<bool, LifecycleError> {
        self.remove_capacity_modifier(item, template_id)
    }

    // --- Spawn / despawn ---

    /// Restore an item's persisted enrichments on spawn.
    ///
    /// Ids without a template are reported as missing and kept in storage.
    /// Once every instance has been loaded, each one receives the late-load
    /// pass with its siblings.
    pub fn load_from_persisted(&mut self, item: &Item) -> Result<LoadReport, LifecycleError> {
        let mut report = LoadReport::default();
        if self.live.contains_key(&item.id) {
            warn!(item = %item.id, "Item is already live, ignoring load");
            return Ok(report);
        }

        let Some(mut record) = self.store.load(item.id)? else {
            debug!(item = %item.id, "No persisted enrichments");
            return Ok(report);
        };

        report.migration = self.migrate(item, &mut record)?;

        let mut seen = HashSet::new();
        let mut instances: Vec<Box<dyn Enrichment>> = Vec::new();
        let mut failures = Vec::new();
        for id in &record.enrichment_ids {
            if !seen.insert(id.as_str()) {
                warn!(item = %item.id, enrichment = %id, "Duplicate persisted enrichment id, skipping");
                continue;
            }
            let Some(template) = self.catalog.resolve(id) else {
                warn!(item = %item.id, enrichment = %id, "Persisted enrichment has no template, skipping");
                report.missing.push(id.clone());
                continue;
            };
            match self.attach(item, &template) {
                Ok(instance) => {
                    report.loaded.push(id.clone());
                    instances.push(instance);
                }
                Err(error) => {
                    report.failed.push(id.clone());
                    failures.push(HookFailure {
                        enrichment: id.clone(),
                        hook: "on_loaded",
                        error,
                    });
                }
            }
        }

        for index in 0..instances.len() {
            let (before, rest) = instances.split_at_mut(index);
            let Some((instance, after)) = rest.split_first_mut() else {
                break;
            };
            let siblings = Siblings::new(before, after);
            if let Err(error) = guarded(|| instance.on_late_loaded(item, siblings)) {
                failures.push(HookFailure {
                    enrichment: instance.id().to_string(),
                    hook: "on_late_loaded",
                    error,
                });
            }
        }
        self.report(item.id, failures);

        if !instances.is_empty() {
            self.live.insert(item.id, LiveItem {
                item: item.clone(),
                instances,
            });
        }

        info!(
            item = %item.id,
            loaded = report.loaded.len(),
            missing = report.missing.len(),
            failed = report.failed.len(),
            "Enrichments loaded"
        );
        self.events.publish(DomainEvent::EnrichmentsLoaded {
            item: item.id,
            enrichments: report.loaded.clone(),
            missing: report.missing.clone(),
            timestamp: Utc::now(),
        });
        Ok(report)
    }

    /// Unload every live instance of `item` on despawn. Persisted state is kept.
    ///
    /// Returns the ids that were unloaded.
    pub fn unload_all(&mut self, item: &Item) -> Vec<String> {
        let Some(mut live) = self.live.remove(&item.id) else {
            debug!(item = %item.id, "No live enrichments to unload");
            return Vec::new();
        };

        let mut unloaded = Vec::with_capacity(live.instances.len());
        let mut failures = Vec::new();
        for instance in live.instances.iter_mut() {
            unloaded.push(instance.id().to_string());
            if let Err(error) = guarded(|| instance.on_unloaded(item)) {
                failures.push(HookFailure {
                    enrichment: instance.id().to_string(),
                    hook: "on_unloaded",
                    error,
                });
            }
        }
        self.report(item.id, failures);

        info!(item = %item.id, count = unloaded.len(), "Enrichments unloaded");
        self.events.publish(DomainEvent::EnrichmentsUnloaded {
            item: item.id,
            enrichments: unloaded.clone(),
            timestamp: Utc::now(),
        });
        unloaded
    }

    // --- Event fan-out ---

    /// Forward an imbue load to every instance. Returns how many handled it.
    pub fn on_imbue_loaded(&mut self, item: &Item, imbue: &ImbueContext) -> usize {
        self.dispatch(item, "on_imbue_loaded", |instance| instance.on_imbue_loaded(item, imbue))
    }

    pub fn on_imbue_unloaded(&mut self, item: &Item, imbue: &ImbueContext) -> usize {
        self.dispatch(item, "on_imbue_unloaded", |instance| {
            instance.on_imbue_unloaded(item, imbue)
        })
    }

    pub fn on_item_collide(&mut self, item: &Item, collision: &CollisionInfo) -> usize {
        self.dispatch(item, "on_item_collide", |instance| {
            instance.on_item_collide(item, collision)
        })
    }

    fn dispatch<F>(&mut self, item: &Item, hook: &'static str, mut call: F) -> usize
    where
        F: FnMut(&mut dyn Enrichment) -> HookResult,
    {
        let Some(live) = self.live.get_mut(&item.id) else {
            return 0;
        };

        let mut delivered = 0;
        let mut failures = Vec::new();
        for instance in live.instances.iter_mut() {
            match guarded(|| call(instance.as_mut())) {
                Ok(()) => delivered += 1,
                Err(error) => failures.push(HookFailure {
                    enrichment: instance.id().to_string(),
                    hook,
                    error,
                }),
            }
        }
        self.report(item.id, failures);
        delivered
    }

    // --- Queries ---

    /// Whether the item has any live enrichment.
    pub fn has_enrichments(&self, item: ItemId) -> bool {
        self.live.get(&item).is_some_and(|live| !live.instances.is_empty())
    }

    pub fn has_enrichment(&self, item: ItemId, id: &str) -> bool {
        self.live.get(&item).is_some_and(|live| live.position(id).is_some())
    }

    pub fn enrichment(&self, item: ItemId, id: &str) -> Option<&dyn Enrichment> {
        let live = self.live.get(&item)?;
        live.position(id).map(|index| live.instances[index].as_ref())
    }

    /// Live instances of `item`, in grant order.
    pub fn enrichments(&self, item: ItemId) -> Vec<&dyn Enrichment> {
        self.live
            .get(&item)
            .map(|live| live.instances.iter().map(|i| i.as_ref()).collect())
            .unwrap_or_default()
    }

    pub fn enrichment_ids(&self, item: ItemId) -> Vec<String> {
        self.enrichments(item)
            .into_iter()
            .map(|i| i.id().to_string())
            .collect()
    }

    /// Whether another grant would exceed the item's capacity.
    pub fn is_at_capacity(&self, item: ItemId) -> Result<bool, LifecycleError> {
        let mut record = self.record_or_new(item)?;
        record.settle(self.settings.default_capacity);
        Ok(record.is_full())
    }

    /// The item's persisted record, if any.
    pub fn record(&self, item: ItemId) -> Result<Option<EnrichmentRecord>, StoreError> {
        self.store.load(item)
    }

    /// Every item with live instances.
    pub fn live_items(&self) -> Vec<ItemId> {
        self.live.keys().copied().collect()
    }

    /// The item a live entry was spawned with.
    pub fn live_item(&self, item: ItemId) -> Option<&Item> {
        self.live.get(&item).map(|live| &live.item)
    }

    // --- Teardown ---

    /// Unload every live item and drop all listeners. Returns the number of
    /// items that were unloaded.
    pub fn teardown(&mut self) -> usize {
        let items: Vec<Item> = self.live.values().map(|live| live.item.clone()).collect();
        for item in &items {
            self.unload_all(item);
        }
        self.events.clear();
        info!(items = items.len(), "Enrichment manager torn down");
        items.len()
    }

    // --- Internals ---

    fn record_or_new(&self, item: ItemId) -> Result<EnrichmentRecord, StoreError> {
        Ok(self.store.load(item)?.unwrap_or_else(|| {
            EnrichmentRecord::new(self.settings.schema_version, self.settings.default_capacity)
        }))
    }

    /// Save the record, or delete it once nothing is left worth keeping.
    fn persist(&mut self, item: ItemId, record: &EnrichmentRecord) -> Result<(), StoreError> {
        if record.is_vacant() {
            self.store.delete(item)?;
        } else {
            self.store.save(item, record)?;
        }
        Ok(())
    }

    /// Clone an instance from `template` and run its load hook.
    fn attach(&self, item: &Item, template: &EnrichmentTemplate) -> Result<Box<dyn Enrichment>, HookError> {
        let mut instance = guarded_with(|| self.factories.instantiate(template))?;
        guarded(|| instance.on_loaded(item))?;
        Ok(instance)
    }

    fn migrate(&mut self, item: &Item, record: &mut EnrichmentRecord) -> Result<MigrationOutcome, StoreError> {
        let current = self.settings.schema_version;
        let outcome = self.migrators.apply(item, record, current);
        match &outcome {
            MigrationOutcome::UpToDate => {}
            MigrationOutcome::Applied { rule, from, to } => {
                record.settle(self.settings.default_capacity);
                self.store.save(item.id, record)?;
                info!(item = %item.id, rule = %rule, from, to, "Enrichment record migrated");
                self.events.publish(DomainEvent::MigrationApplied {
                    item: item.id,
                    rule: rule.clone(),
                    from_version: *from,
                    to_version: *to,
                    timestamp: Utc::now(),
                });
            }
            MigrationOutcome::Deferred { rule, from } => {
                info!(item = %item.id, rule = %rule, from, current, "Migration is not auto-updating, record left stale");
            }
            MigrationOutcome::NoRule { from } => {
                warn!(item = %item.id, from, current, "No migration rule for stale enrichment record");
            }
            MigrationOutcome::Failed { rule, error } => {
                error!(item = %item.id, rule = %rule, error = %error, "Enrichment record migration failed");
            }
        }
        Ok(outcome)
    }

    fn report(&mut self, item: ItemId, failures: Vec<HookFailure>) {
        for failure in failures {
            error!(
                item = %item,
                enrichment = %failure.enrichment,
                hook = failure.hook,
                error = %failure.error,
                "Enrichment hook failed"
            );
            self.publish_hook_failed(item, &failure.enrichment, failure.hook, &failure.error);
        }
    }

    fn publish_hook_failed(&mut self, item: ItemId, enrichment: &str, hook: &str, error: &HookError) {
        self.events.publish(DomainEvent::HookFailed {
            item,
            enrichment: enrichment.to_string(),
            hook: hook.to_string(),
            error_message: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn publish_denied(&mut self, item: ItemId, enrichment: &str, reason: &str) {
        self.events.publish(DomainEvent::EnrichmentDenied {
            item,
            enrichment: enrichment.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn publish_capacity(&mut self, item: ItemId, max_enrichments: u32) {
        self.events.publish(DomainEvent::CapacityChanged {
            item,
            max_enrichments,
            timestamp: Utc::now(),
        });
    }
}

/// Run a hook, converting a panic into [`HookError::Panicked`].
fn guarded(hook: impl FnOnce() -> HookResult) -> HookResult {
    guarded_with(hook)
}

fn guarded_with<T>(call: impl FnOnce() -> Result<T, HookError>) -> Result<T, HookError> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(HookError::Panicked(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::IdRemapMigrator;
    use enrichments_core::catalog::InMemoryCatalog;
    use enrichments_core::item::ItemKind;
    use enrichments_store::InMemoryStore;
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    /// Records every hook call as "<id>:<hook>" and fails on demand.
    struct Probe {
        template: EnrichmentTemplate,
        journal: Journal,
    }

    impl Probe {
        fn note(&self, hook: &str) {
            self.journal
                .lock()
                .unwrap()
                .push(format!("{}:{hook}", self.template.id));
        }

        fn setting(&self, key: &str) -> bool {
            self.template.settings.get(key).and_then(|v| v.as_bool()) == Some(true)
        }
    }

    impl Enrichment for Probe {
        fn template(&self) -> &EnrichmentTemplate {
            &self.template
        }

        fn on_loaded(&mut self, _item: &Item) -> HookResult {
            self.note("loaded");
            if self.setting("fail_load") {
                return Err(HookError::failed("load refused"));
            }
            if self.setting("panic_load") {
                panic!("load exploded");
            }
            Ok(())
        }

        fn on_late_loaded(&mut self, _item: &Item, siblings: Siblings<'_>) -> HookResult {
            self.note(&format!("late[{}]", siblings.ids().join(",")));
            Ok(())
        }

        fn on_unloaded(&mut self, _item: &Item) -> HookResult {
            self.note("unloaded");
            if self.setting("fail_unload") {
                return Err(HookError::failed("unload refused"));
            }
            Ok(())
        }

        fn on_imbue_loaded(&mut self, _item: &Item, imbue: &ImbueContext) -> HookResult {
            self.note(&format!("imbue+{}", imbue.spell_id));
            if self.setting("panic_imbue") {
                panic!("imbue exploded");
            }
            Ok(())
        }

        fn on_imbue_unloaded(&mut self, _item: &Item, imbue: &ImbueContext) -> HookResult {
            self.note(&format!("imbue-{}", imbue.spell_id));
            Ok(())
        }

        fn on_item_collide(&mut self, _item: &Item, _collision: &CollisionInfo) -> HookResult {
            self.note("collide");
            Ok(())
        }
    }

    fn probe(id: &str) -> EnrichmentTemplate {
        EnrichmentTemplate::new(id).with_kind("probe")
    }

    fn probe_with(id: &str, flag: &str) -> EnrichmentTemplate {
        let mut template = probe(id);
        template.settings.insert(flag.into(), serde_json::Value::Bool(true));
        template
    }

    struct Fixture {
        manager: EnrichmentManager,
        catalog: Arc<InMemoryCatalog>,
        journal: Journal,
        events: Arc<Mutex<Vec<DomainEvent>>>,
    }

    impl Fixture {
        fn calls(&self) -> Vec<String> {
            self.journal.lock().unwrap().clone()
        }

        fn clear_calls(&self) {
            self.journal.lock().unwrap().clear();
        }

        fn persisted(&self, item: &Item) -> Vec<String> {
            self.manager
                .record(item.id)
                .unwrap()
                .map(|r| r.enrichment_ids)
                .unwrap_or_default()
        }

        fn count_events(&self, pred: impl Fn(&DomainEvent) -> bool) -> usize {
            self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
        }
    }

    fn fixture(templates: Vec<EnrichmentTemplate>) -> Fixture {
        fixture_with_store(templates, InMemoryStore::new())
    }

    fn fixture_with_store(templates: Vec<EnrichmentTemplate>, store: InMemoryStore) -> Fixture {
        fixture_full(templates, store, MigratorChain::new())
    }

    fn fixture_full(
        templates: Vec<EnrichmentTemplate>,
        store: InMemoryStore,
        migrators: MigratorChain,
    ) -> Fixture {
        let catalog = Arc::new(InMemoryCatalog::from_templates(templates));
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let mut factories = FactoryRegistry::new();
        let sink = journal.clone();
        factories.register("probe", move |template: &EnrichmentTemplate| {
            if template.settings.contains_key("fail_factory") {
                return Err(HookError::failed("factory refused"));
            }
            Ok(Box::new(Probe {
                template: template.clone(),
                journal: sink.clone(),
            }) as Box<dyn Enrichment>)
        });
        let mut manager = EnrichmentManager::new(
            catalog.clone(),
            Box::new(store),
            factories,
            ManagerSettings::default(),
        )
        .with_migrators(migrators);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        manager
            .events_mut()
            .subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        Fixture {
            manager,
            catalog,
            journal,
            events,
        }
    }

    fn sword() -> Item {
        Item::new("SwordShortCommon", "Swords", ItemKind::Weapon)
    }

    fn elements() -> Vec<EnrichmentTemplate> {
        ["fire", "frost", "shock", "wind", "earth"]
            .into_iter()
            .map(probe)
            .collect()
    }

    #[test]
    fn fifth_grant_exceeds_default_capacity() {
        let mut fx = fixture(elements());
        let item = sword();
        for id in ["fire", "frost", "shock", "wind"] {
            assert_eq!(fx.manager.add_enrichment(&item, id).unwrap(), AddOutcome::Added);
        }

        let err = fx.manager.add_enrichment(&item, "earth").unwrap_err();
        assert!(matches!(err, LifecycleError::CapacityExceeded { max: 4, .. }));
        assert_eq!(fx.persisted(&item), vec!["fire", "frost", "shock", "wind"]);
        assert_eq!(fx.manager.enrichment_ids(item.id), vec!["fire", "frost", "shock", "wind"]);
        assert!(fx.manager.is_at_capacity(item.id).unwrap());
        assert_eq!(
            fx.count_events(|e| matches!(e, DomainEvent::EnrichmentDenied { enrichment, .. } if enrichment == "earth")),
            1
        );
    }

    #[test]
    fn add_twice_is_idempotent() {
        let mut fx = fixture(elements());
        let item = sword();
        assert_eq!(fx.manager.add_enrichment(&item, "fire").unwrap(), AddOutcome::Added);
        assert_eq!(
            fx.manager.add_enrichment(&item, "fire").unwrap(),
            AddOutcome::AlreadyPresent
        );

        assert_eq!(fx.persisted(&item), vec!["fire"]);
        assert_eq!(fx.manager.enrichments(item.id).len(), 1);
        assert_eq!(fx.calls(), vec!["fire:loaded"]);
    }

    #[test]
    fn remove_twice_is_a_no_op() {
        let mut fx = fixture(elements());
        let item = sword();
        fx.manager.add_enrichment(&item, "fire").unwrap();

        assert_eq!(
            fx.manager.remove_enrichment(&item, "fire").unwrap(),
            RemoveOutcome::Removed
        );
        assert_eq!(
            fx.manager.remove_enrichment(&item, "fire").unwrap(),
            RemoveOutcome::NotPresent
        );
        assert_eq!(fx.calls(), vec!["fire:loaded", "fire:unloaded"]);
        assert!(!fx.manager.has_enrichments(item.id));
        assert!(fx.manager.live_items().is_empty());
        // Empty record is deleted
        assert!(fx.manager.record(item.id).unwrap().is_none());
    }

    #[test]
    fn unknown_template_is_rejected() {
        let mut fx = fixture(elements());
        let item = sword();
        let err = fx.manager.add_enrichment(&item, "ghost").unwrap_err();
        assert!(matches!(err, LifecycleError::TemplateNotFound(id) if id == "ghost"));
        assert!(fx.manager.record(item.id).unwrap().is_none());
    }

    #[test]
    fn failing_load_hook_rolls_back() {
        let mut fx = fixture(vec![probe("fire"), probe_with("cursed", "fail_load")]);
        let item = sword();
        fx.manager.add_enrichment(&item, "fire").unwrap();

        let err = fx.manager.add_enrichment(&item, "cursed").unwrap_err();
        assert!(matches!(err, LifecycleError::Rejected { ref id, .. } if id == "cursed"));
        assert_eq!(fx.persisted(&item), vec!["fire"]);
        assert_eq!(fx.manager.enrichment_ids(item.id), vec!["fire"]);
        assert_eq!(
            fx.count_events(|e| matches!(e, DomainEvent::HookFailed { hook, .. } if hook == "on_loaded")),
            1
        );
    }

    #[test]
    fn panicking_load_hook_rolls_back() {
        let mut fx = fixture(vec![probe_with("volatile", "panic_load")]);
        let item = sword();

        let err = fx.manager.add_enrichment(&item, "volatile").unwrap_err();
        match err {
            LifecycleError::Rejected { source: HookError::Panicked(message), .. } => {
                assert!(message.contains("load exploded"));
            }
            other => panic!("Expected a rejected grant, got {other:?}"),
        }
        assert!(fx.manager.record(item.id).unwrap().is_none());
        assert!(!fx.manager.has_enrichments(item.id));
    }

    #[test]
    fn failing_factory_rolls_back() {
        let mut fx = fixture(vec![probe_with("broken", "fail_factory")]);
        let item = sword();
        assert!(fx.manager.add_enrichment(&item, "broken").is_err());
        assert!(fx.manager.record(item.id).unwrap().is_none());
        assert!(fx.calls().is_empty());
    }

    #[test]
    fn unknown_variant_rolls_back() {
        let mut fx = fixture(vec![EnrichmentTemplate::new("odd").with_kind("shockwave")]);
        let item = sword();
        let err = fx.manager.add_enrichment(&item, "odd").unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Rejected { source: HookError::UnknownVariant(_), .. }
        ));
        assert!(fx.manager.record(item.id).unwrap().is_none());
    }

    #[test]
    fn failing_unload_hook_still_removes() {
        let mut fx = fixture(vec![probe_with("sticky", "fail_unload")]);
        let item = sword();
        fx.manager.add_enrichment(&item, "sticky").unwrap();

        assert_eq!(
            fx.manager.remove_enrichment(&item, "sticky").unwrap(),
            RemoveOutcome::Removed
        );
        assert!(fx.persisted(&item).is_empty());
        assert!(!fx.manager.has_enrichment(item.id, "sticky"));
    }

    #[test]
    fn unload_then_load_restores_in_order() {
        let mut fx = fixture(elements());
        let item = sword();
        for id in ["wind", "fire", "frost"] {
            fx.manager.add_enrichment(&item, id).unwrap();
        }

        let unloaded = fx.manager.unload_all(&item);
        assert_eq!(unloaded, vec!["wind", "fire", "frost"]);
        assert!(!fx.manager.has_enrichments(item.id));
        assert_eq!(fx.persisted(&item), vec!["wind", "fire", "frost"]);

        fx.clear_calls();
        let report = fx.manager.load_from_persisted(&item).unwrap();
        assert_eq!(report.loaded, vec!["wind", "fire", "frost"]);
        assert!(report.missing.is_empty());
        assert_eq!(fx.manager.enrichment_ids(item.id), vec!["wind", "fire", "frost"]);
        assert_eq!(
            fx.calls(),
            vec![
                "wind:loaded",
                "fire:loaded",
                "frost:loaded",
                "wind:late[fire,frost]",
                "fire:late[wind,frost]",
                "frost:late[wind,fire]",
            ]
        );
    }

    #[test]
    fn ghost_id_is_skipped_but_kept() {
        let mut store = InMemoryStore::new();
        let item = sword();
        let mut record = EnrichmentRecord::default();
        for id in ["fire", "ghost", "frost"] {
            record.push(id);
        }
        store.save(item.id, &record).unwrap();
        let mut fx = fixture_with_store(elements(), store);

        let report = fx.manager.load_from_persisted(&item).unwrap();
        assert_eq!(report.loaded, vec!["fire", "frost"]);
        assert_eq!(report.missing, vec!["ghost"]);
        assert_eq!(fx.manager.enrichment_ids(item.id), vec!["fire", "frost"]);
        // Not rewritten: a republished template is honoured on the next spawn
        assert_eq!(fx.persisted(&item), vec!["fire", "ghost", "frost"]);

        fx.manager.unload_all(&item);
        fx.catalog.publish(probe("ghost"));
        let report = fx.manager.load_from_persisted(&item).unwrap();
        assert_eq!(report.loaded, vec!["fire", "ghost", "frost"]);
    }

    #[test]
    fn regrant_attaches_ghost_once_template_returns() {
        let mut store = InMemoryStore::new();
        let item = sword();
        let mut record = EnrichmentRecord::default();
        record.push("fire");
        record.push("ghost");
        store.save(item.id, &record).unwrap();
        let mut fx = fixture_with_store(elements(), store);
        fx.manager.load_from_persisted(&item).unwrap();
        fx.clear_calls();

        fx.catalog.publish(probe("ghost"));
        assert_eq!(fx.manager.add_enrichment(&item, "ghost").unwrap(), AddOutcome::Added);
        assert!(fx.manager.has_enrichment(item.id, "ghost"));
        assert_eq!(fx.calls(), vec!["ghost:loaded"]);
        // Already persisted, so not appended twice
        assert_eq!(fx.persisted(&item), vec!["fire", "ghost"]);

        assert_eq!(
            fx.manager.add_enrichment(&item, "ghost").unwrap(),
            AddOutcome::AlreadyPresent
        );
    }

    #[test]
    fn regrant_after_failed_load_hook_attaches_instance() {
        let mut store = InMemoryStore::new();
        let item = sword();
        let mut record = EnrichmentRecord::default();
        record.push("fire");
        record.push("cursed");
        store.save(item.id, &record).unwrap();
        let mut fx = fixture_with_store(vec![probe("fire"), probe_with("cursed", "fail_load")], store);
        let report = fx.manager.load_from_persisted(&item).unwrap();
        assert_eq!(report.failed, vec!["cursed"]);

        fx.catalog.publish(probe("cursed"));
        assert_eq!(fx.manager.add_enrichment(&item, "cursed").unwrap(), AddOutcome::Added);
        assert_eq!(fx.manager.enrichment_ids(item.id), vec!["fire", "cursed"]);
        assert_eq!(fx.persisted(&item), vec!["fire", "cursed"]);
    }

    #[test]
    fn failed_regrant_of_persisted_id_rolls_back() {
        let mut store = InMemoryStore::new();
        let item = sword();
        let mut record = EnrichmentRecord::default();
        record.push("fire");
        record.push("cursed");
        store.save(item.id, &record).unwrap();
        let mut fx = fixture_with_store(vec![probe("fire"), probe_with("cursed", "fail_load")], store);
        fx.manager.load_from_persisted(&item).unwrap();

        assert!(matches!(
            fx.manager.add_enrichment(&item, "cursed"),
            Err(LifecycleError::Rejected { .. })
        ));
        assert!(!fx.manager.has_enrichment(item.id, "cursed"));
        assert_eq!(fx.persisted(&item), vec!["fire"]);
        assert_eq!(
            fx.count_events(|e| matches!(e, DomainEvent::EnrichmentDenied { enrichment, .. } if enrichment == "cursed")),
            1
        );
    }

    #[test]
    fn ghost_ids_count_against_capacity() {
        let mut store = InMemoryStore::new();
        let item = sword();
        let mut record = EnrichmentRecord::default();
        for id in ["fire", "frost", "shock", "ghost"] {
            record.push(id);
        }
        store.save(item.id, &record).unwrap();
        let mut fx = fixture_with_store(elements(), store);
        fx.manager.load_from_persisted(&item).unwrap();

        assert!(matches!(
            fx.manager.add_enrichment(&item, "wind"),
            Err(LifecycleError::CapacityExceeded { .. })
        ));
        // A persisted ghost can be removed without a live instance
        assert_eq!(
            fx.manager.remove_enrichment(&item, "ghost").unwrap(),
            RemoveOutcome::Removed
        );
        assert_eq!(fx.manager.add_enrichment(&item, "wind").unwrap(), AddOutcome::Added);
    }

    #[test]
    fn failing_instance_is_isolated_on_load() {
        let mut store = InMemoryStore::new();
        let item = sword();
        let mut record = EnrichmentRecord::default();
        record.push("fire");
        record.push("cursed");
        store.save(item.id, &record).unwrap();
        let mut fx = fixture_with_store(vec![probe("fire"), probe_with("cursed", "fail_load")], store);

        let report = fx.manager.load_from_persisted(&item).unwrap();
        assert_eq!(report.loaded, vec!["fire"]);
        assert_eq!(report.failed, vec!["cursed"]);
        assert_eq!(fx.manager.enrichment_ids(item.id), vec!["fire"]);
        assert!(fx.calls().contains(&"fire:late[]".to_string()));
    }

    #[test]
    fn load_on_live_item_is_ignored() {
        let mut fx = fixture(elements());
        let item = sword();
        fx.manager.add_enrichment(&item, "fire").unwrap();

        let report = fx.manager.load_from_persisted(&item).unwrap();
        assert!(report.loaded.is_empty());
        assert_eq!(fx.manager.enrichments(item.id).len(), 1);
    }

    #[test]
    fn imbue_failure_does_not_stop_siblings() {
        let mut fx = fixture(vec![probe("fire"), probe_with("unstable", "panic_imbue"), probe("frost")]);
        let item = sword();
        for id in ["fire", "unstable", "frost"] {
            fx.manager.add_enrichment(&item, id).unwrap();
        }
        fx.clear_calls();

        let delivered = fx.manager.on_imbue_loaded(&item, &ImbueContext::new("Fire"));
        assert_eq!(delivered, 2);
        assert_eq!(
            fx.calls(),
            vec!["fire:imbue+Fire", "unstable:imbue+Fire", "frost:imbue+Fire"]
        );
        assert_eq!(
            fx.count_events(|e| matches!(e, DomainEvent::HookFailed { enrichment, .. } if enrichment == "unstable")),
            1
        );

        assert_eq!(fx.manager.on_imbue_unloaded(&item, &ImbueContext::new("Fire")), 3);
        assert_eq!(fx.manager.on_item_collide(&item, &CollisionInfo {
            other: None,
            point: Default::default(),
            impact_velocity: 4.0,
        }), 3);
    }

    #[test]
    fn events_for_unknown_item_are_ignored() {
        let mut fx = fixture(elements());
        assert_eq!(fx.manager.on_imbue_loaded(&sword(), &ImbueContext::new("Fire")), 0);
        assert!(fx.manager.unload_all(&sword()).is_empty());
    }

    #[test]
    fn unload_failure_does_not_abort_batch() {
        let mut fx = fixture(vec![probe_with("sticky", "fail_unload"), probe("fire")]);
        let item = sword();
        fx.manager.add_enrichment(&item, "sticky").unwrap();
        fx.manager.add_enrichment(&item, "fire").unwrap();
        fx.clear_calls();

        fx.manager.unload_all(&item);
        assert_eq!(fx.calls(), vec!["sticky:unloaded", "fire:unloaded"]);
        assert!(fx.manager.live_items().is_empty());
    }

    #[test]
    fn capacity_modifier_round_trip() {
        let mut fx = fixture(elements());
        let item = sword();
        fx.manager.add_enrichment(&item, "fire").unwrap();

        assert!(fx.manager.add_capacity_modifier(item.id, "skill.slot", 2).unwrap());
        assert!(!fx.manager.add_capacity_modifier(item.id, "skill.slot", 2).unwrap());
        assert_eq!(fx.manager.record(item.id).unwrap().unwrap().max_enrichments, 6);

        assert!(fx.manager.remove_capacity_modifier(item.id, "skill.slot").unwrap());
        assert!(!fx.manager.remove_capacity_modifier(item.id, "skill.slot").unwrap());
        assert_eq!(fx.manager.record(item.id).unwrap().unwrap().max_enrichments, 4);
        assert_eq!(
            fx.count_events(|e| matches!(e, DomainEvent::CapacityChanged { .. })),
            2
        );
    }

    #[test]
    fn removing_unknown_modifier_is_a_no_op() {
        let mut fx = fixture(elements());
        assert!(!fx.manager.remove_capacity_modifier(ItemId::new(), "never").unwrap());
    }

    #[test]
    fn shrink_keeps_excess_enrichments() {
        let mut fx = fixture(elements());
        let item = sword();
        fx.manager.add_capacity_modifier(item.id, "bonus", 1).unwrap();
        for id in ["fire", "frost", "shock", "wind", "earth"] {
            fx.manager.add_enrichment(&item, id).unwrap();
        }

        fx.manager.remove_capacity_modifier(item.id, "bonus").unwrap();
        let record = fx.manager.record(item.id).unwrap().unwrap();
        assert_eq!(record.enrichment_ids.len(), 5);
        assert_eq!(record.max_enrichments, 5);
        assert_eq!(fx.manager.enrichments(item.id).len(), 5);

        fx.manager.remove_enrichment(&item, "earth").unwrap();
        assert_eq!(fx.manager.record(item.id).unwrap().unwrap().max_enrichments, 4);
        assert!(fx.manager.add_enrichment(&item, "earth").is_err());
    }

    #[test]
    fn modifier_outlives_last_enrichment() {
        let mut fx = fixture(elements());
        let item = sword();
        fx.manager.add_capacity_modifier(item.id, "bonus", 1).unwrap();
        fx.manager.add_enrichment(&item, "fire").unwrap();
        fx.manager.remove_enrichment(&item, "fire").unwrap();

        let record = fx.manager.record(item.id).unwrap().unwrap();
        assert!(record.enrichment_ids.is_empty());
        assert_eq!(record.max_enrichments, 5);
    }

    #[test]
    fn template_capacity_grant() {
        let mut core = probe("extra_slot");
        core.capacity_contribution = 1;
        let mut fx = fixture(vec![core]);
        let item = sword();

        assert!(fx.manager.grant_capacity_from(item.id, "extra_slot").unwrap());
        assert_eq!(fx.manager.record(item.id).unwrap().unwrap().max_enrichments, 5);
        assert!(fx.manager.revoke_capacity_from(item.id, "extra_slot").unwrap());
        assert!(fx.manager.record(item.id).unwrap().is_none());
        assert!(matches!(
            fx.manager.grant_capacity_from(item.id, "ghost"),
            Err(LifecycleError::TemplateNotFound(_))
        ));
    }

    #[test]
    fn stale_record_is_migrated_on_load() {
        let mut store = InMemoryStore::new();
        let item = sword();
        let mut record = EnrichmentRecord::new(0, 4);
        record.enrichment_ids = vec!["Flame".into(), "frost".into()];
        store.save(item.id, &record).unwrap();

        let mut chain = MigratorChain::new();
        chain.register(Box::new(IdRemapMigrator::new("flame-to-fire", 0, 1).rename("Flame", "fire")));
        let mut fx = fixture_full(elements(), store, chain);

        let report = fx.manager.load_from_persisted(&item).unwrap();
        assert!(matches!(report.migration, MigrationOutcome::Applied { from: 0, to: 1, .. }));
        assert_eq!(report.loaded, vec!["fire", "frost"]);
        let saved = fx.manager.record(item.id).unwrap().unwrap();
        assert_eq!(saved.version, 1);
        assert_eq!(saved.enrichment_ids, vec!["fire", "frost"]);
        assert_eq!(
            fx.count_events(|e| matches!(e, DomainEvent::MigrationApplied { .. })),
            1
        );
    }

    #[test]
    fn stale_record_without_rule_still_loads() {
        let mut store = InMemoryStore::new();
        let item = sword();
        let mut record = EnrichmentRecord::new(0, 4);
        record.push("fire");
        store.save(item.id, &record).unwrap();
        let mut fx = fixture_with_store(elements(), store);

        let report = fx.manager.load_from_persisted(&item).unwrap();
        assert_eq!(report.migration, MigrationOutcome::NoRule { from: 0 });
        assert_eq!(report.loaded, vec!["fire"]);
        assert_eq!(fx.manager.record(item.id).unwrap().unwrap().version, 0);
    }

    #[test]
    fn teardown_unloads_everything_and_drops_listeners() {
        let mut fx = fixture(elements());
        let first = sword();
        let second = sword();
        fx.manager.add_enrichment(&first, "fire").unwrap();
        fx.manager.add_enrichment(&second, "frost").unwrap();

        assert_eq!(fx.manager.teardown(), 2);
        assert!(fx.manager.live_items().is_empty());
        assert!(fx.manager.events_mut().is_empty());
        // Persistence survives the session
        assert_eq!(fx.persisted(&first), vec!["fire"]);
    }

    #[test]
    fn instances_are_independent_per_item() {
        let mut fx = fixture(elements());
        let first = sword();
        let second = sword();
        fx.manager.add_enrichment(&first, "fire").unwrap();
        fx.manager.add_enrichment(&second, "fire").unwrap();

        let a = fx.manager.enrichment(first.id, "fire").unwrap();
        let b = fx.manager.enrichment(second.id, "fire").unwrap();
        assert!(!std::ptr::eq(a.template(), b.template()));
        assert_eq!(fx.manager.live_item(first.id), Some(&first));
    }
}
