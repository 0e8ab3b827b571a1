//! Enrichment trait: the capability interface every instance implements.
//!
//! Instances are per-item clones of a template. Each hook has a no-op
//! default, so a variant only overrides the events it cares about. Variants
//! are selected by the template's `kind` tag through a [`FactoryRegistry`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::HookError;
use crate::item::{Item, ItemId};
use crate::math::Vec3;
use crate::template::{BASIC_KIND, EnrichmentTemplate};

/// Result of a single hook invocation.
pub type HookResult = std::result::Result<(), HookError>;

/// An imbue (spell charge) being applied to or removed from an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImbueContext {
    /// Spell id of the charge driving the imbue
    pub spell_id: String,

    #[serde(default)]
    pub energy: f32,

    #[serde(default)]
    pub max_energy: f32,
}

impl ImbueContext {
    pub fn new(spell_id: impl Into<String>) -> Self {
        Self {
            spell_id: spell_id.into(),
            energy: 0.0,
            max_energy: 0.0,
        }
    }
}

/// A collision involving an enriched item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionInfo {
    /// The other item, if the collider belonged to one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<ItemId>,

    #[serde(default)]
    pub point: Vec3,

    #[serde(default)]
    pub impact_velocity: f32,
}

/// The core Enrichment trait.
///
/// Hooks run on the host's update thread. A hook that returns `Err` or
/// panics is isolated by the lifecycle manager; it never aborts the batch
/// the hook was part of.
pub trait Enrichment: Send {
    /// The template this instance was cloned from.
    fn template(&self) -> &EnrichmentTemplate;

    fn id(&self) -> &str {
        &self.template().id
    }

    /// The instance was attached to `item`.
    fn on_loaded(&mut self, _item: &Item) -> HookResult {
        Ok(())
    }

    /// Every instance in the spawn batch has been loaded. `siblings` holds
    /// the other instances of the batch, in list order.
    fn on_late_loaded(&mut self, _item: &Item, _siblings: Siblings<'_>) -> HookResult {
        Ok(())
    }

    /// The instance is being detached from `item`.
    fn on_unloaded(&mut self, _item: &Item) -> HookResult {
        Ok(())
    }

    fn on_imbue_loaded(&mut self, _item: &Item, _imbue: &ImbueContext) -> HookResult {
        Ok(())
    }

    fn on_imbue_unloaded(&mut self, _item: &Item, _imbue: &ImbueContext) -> HookResult {
        Ok(())
    }

    fn on_item_collide(&mut self, _item: &Item, _collision: &CollisionInfo) -> HookResult {
        Ok(())
    }
}

/// Borrowed view over the other instances of a batch.
#[derive(Clone, Copy)]
pub struct Siblings<'a> {
    before: &'a [Box<dyn Enrichment>],
    after: &'a [Box<dyn Enrichment>],
}

impl<'a> Siblings<'a> {
    pub fn new(before: &'a [Box<dyn Enrichment>], after: &'a [Box<dyn Enrichment>]) -> Self {
        Self { before, after }
    }

    pub fn iter(self) -> impl Iterator<Item = &'a dyn Enrichment> {
        self.before
            .iter()
            .chain(self.after.iter())
            .map(|instance| instance.as_ref())
    }

    pub fn ids(self) -> Vec<&'a str> {
        self.iter().map(|instance| instance.id()).collect()
    }

    pub fn contains(self, id: &str) -> bool {
        self.iter().any(|instance| instance.id() == id)
    }

    pub fn len(self) -> usize {
        self.before.len() + self.after.len()
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }
}

/// The default variant: a plain clone of its template with no-op hooks.
#[derive(Debug, Clone)]
pub struct BasicEnrichment {
    template: EnrichmentTemplate,
}

impl BasicEnrichment {
    pub fn new(template: &EnrichmentTemplate) -> Self {
        Self {
            template: template.clone(),
        }
    }
}

impl Enrichment for BasicEnrichment {
    fn template(&self) -> &EnrichmentTemplate {
        &self.template
    }
}

/// Builds an instance from a template. Must deep-copy whatever it keeps.
pub type EnrichmentFactory =
    Arc<dyn Fn(&EnrichmentTemplate) -> Result<Box<dyn Enrichment>, HookError> + Send + Sync>;

/// A registry of instance factories keyed by variant tag.
pub struct FactoryRegistry {
    factories: HashMap<String, EnrichmentFactory>,
}

impl FactoryRegistry {
    /// A registry with only the `basic` variant.
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(BASIC_KIND, |template: &EnrichmentTemplate| {
            Ok(Box::new(BasicEnrichment::new(template)) as Box<dyn Enrichment>)
        });
        registry
    }

    /// Register a factory. Replaces any existing factory for the same kind.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&EnrichmentTemplate) -> Result<Box<dyn Enrichment>, HookError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Create a fresh instance for `template`.
    pub fn instantiate(&self, template: &EnrichmentTemplate) -> Result<Box<dyn Enrichment>, HookError> {
        let factory = self
            .factories
            .get(&template.kind)
            .ok_or_else(|| HookError::UnknownVariant(template.kind.clone()))?;
        factory(template)
    }

    /// List all registered kinds.
    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
