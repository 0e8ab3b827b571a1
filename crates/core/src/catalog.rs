//! Template catalog: resolves enrichment ids to published templates.
//!
//! The host engine owns the real catalog; the core only consumes it through
//! [`TemplateCatalog`]. [`InMemoryCatalog`] is the implementation used by
//! hosts that publish templates from JSON, and by tests.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use crate::error::CatalogError;
use crate::template::EnrichmentTemplate;

/// Read access to published templates.
pub trait TemplateCatalog: Send + Sync {
    /// Look up a template by id.
    fn resolve(&self, id: &str) -> Option<Arc<EnrichmentTemplate>>;

    /// Every published template.
    fn list_all(&self) -> Vec<Arc<EnrichmentTemplate>>;
}

/// A catalog held in memory and refreshed as a whole.
#[derive(Default)]
pub struct InMemoryCatalog {
    templates: RwLock<BTreeMap<String, Arc<EnrichmentTemplate>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_templates(templates: impl IntoIterator<Item = EnrichmentTemplate>) -> Self {
        let catalog = Self::new();
        catalog.refresh(templates);
        catalog
    }

    /// Parse a JSON array of templates.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let templates: Vec<EnrichmentTemplate> =
            serde_json::from_str(json).map_err(|e| CatalogError::Parse(e.to_string()))?;
        for template in &templates {
            if template.id.trim().is_empty() {
                return Err(CatalogError::InvalidTemplate {
                    id: template.id.clone(),
                    reason: "id must not be empty".into(),
                });
            }
        }
        Ok(Self::from_templates(templates))
    }

    /// Replace the whole catalog. Later duplicates win.
    pub fn refresh(&self, templates: impl IntoIterator<Item = EnrichmentTemplate>) {
        let mut fresh = BTreeMap::new();
        for template in templates {
            let id = template.id.clone();
            if fresh.insert(id.clone(), Arc::new(template)).is_some() {
                warn!(enrichment = %id, "Duplicate enrichment template, keeping the last definition");
            }
        }
        debug!(count = fresh.len(), "Enrichment catalog refreshed");
        *self.write() = fresh;
    }

    /// Publish or replace a single template.
    pub fn publish(&self, template: EnrichmentTemplate) {
        self.write().insert(template.id.clone(), Arc::new(template));
    }

    /// Withdraw a template. Returns whether it was present.
    pub fn withdraw(&self, id: &str) -> bool {
        self.write().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<EnrichmentTemplate>>> {
        self.templates.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<EnrichmentTemplate>>> {
        self.templates.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl TemplateCatalog for InMemoryCatalog {
    fn resolve(&self, id: &str) -> Option<Arc<EnrichmentTemplate>> {
        self.read().get(id).cloned()
    }

    fn list_all(&self) -> Vec<Arc<EnrichmentTemplate>> {
        self.read().values().cloned().collect()
    }
}

/// Templates a core of the given skill tree and tier offers, sorted by id.
///
/// Only primary-tree templates without a secondary tree that are flagged
/// `show_in_core` and whose tier does not exceed the core's tier qualify.
pub fn eligible_templates(
    catalog: &dyn TemplateCatalog,
    skill_tree: &str,
    tier: u32,
) -> Vec<Arc<EnrichmentTemplate>> {
    let mut templates: Vec<_> = catalog
        .list_all()
        .into_iter()
        .filter(|t| t.primary_skill_tree.as_deref() == Some(skill_tree))
        .filter(|t| t.secondary_skill_tree.is_none())
        .filter(|t| t.show_in_core && t.tier <= tier)
        .collect();
    templates.sort_by(|a, b| a.id.cmp(&b.id));
    templates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_and_list() {
        let catalog = InMemoryCatalog::from_templates([
            EnrichmentTemplate::new("fire"),
            EnrichmentTemplate::new("frost"),
        ]);
        assert!(catalog.resolve("fire").is_some());
        assert!(catalog.resolve("ghost").is_none());
        assert_eq!(catalog.list_all().len(), 2);
    }

    #[test]
    fn refresh_replaces_everything() {
        let catalog = InMemoryCatalog::from_templates([EnrichmentTemplate::new("fire")]);
        catalog.refresh([EnrichmentTemplate::new("wind")]);
        assert!(catalog.resolve("fire").is_none());
        assert!(catalog.resolve("wind").is_some());
    }

    #[test]
    fn duplicate_ids_keep_last() {
        let catalog = InMemoryCatalog::from_templates([
            EnrichmentTemplate::new("fire").with_tier(1),
            EnrichmentTemplate::new("fire").with_tier(3),
        ]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.resolve("fire").unwrap().tier, 3);
    }

    #[test]
    fn publish_and_withdraw() {
        let catalog = InMemoryCatalog::new();
        catalog.publish(EnrichmentTemplate::new("ghost"));
        assert!(catalog.resolve("ghost").is_some());
        assert!(catalog.withdraw("ghost"));
        assert!(!catalog.withdraw("ghost"));
        assert!(catalog.is_empty());
    }

    #[test]
    fn from_json_parses_array() {
        let catalog = InMemoryCatalog::from_json(
            r#"[{ "id": "fire", "tier": 1 }, { "id": "frost", "kind": "basic" }]"#,
        )
        .unwrap();
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn from_json_rejects_blank_ids() {
        let err = InMemoryCatalog::from_json(r#"[{ "id": " " }]"#).err().unwrap();
        assert!(matches!(err, CatalogError::InvalidTemplate { .. }));
    }

    #[test]
    fn eligible_templates_filter_tree_and_tier() {
        let mut secondary = EnrichmentTemplate::new("storm").with_skill_tree("Lightning");
        secondary.secondary_skill_tree = Some("Fire".into());
        let mut hidden = EnrichmentTemplate::new("hidden").with_skill_tree("Lightning");
        hidden.show_in_core = false;

        let catalog = InMemoryCatalog::from_templates([
            EnrichmentTemplate::new("shock").with_skill_tree("Lightning").with_tier(1),
            EnrichmentTemplate::new("arc").with_skill_tree("Lightning").with_tier(3),
            EnrichmentTemplate::new("chain").with_skill_tree("Lightning").with_tier(4),
            EnrichmentTemplate::new("fire").with_skill_tree("Fire"),
            secondary,
            hidden,
        ]);

        let ids: Vec<String> = eligible_templates(&catalog, "Lightning", 3)
            .iter()
            .map(|t| t.id.clone())
            .collect();
        assert_eq!(ids, vec!["arc".to_string(), "shock".to_string()]);
    }
}
