//! Host session wiring for the enrichment system.
//!
//! A [`Session`] owns one lifecycle manager, one token pool and the core
//! displays currently shown, and exposes the entry points the host calls from
//! its frame loop: item spawn/despawn, imbue and collision events, grant and
//! refund requests from the presentation layer, and the per-frame tick.

pub mod error;
pub mod telemetry;

pub use error::SessionError;
pub use telemetry::init_tracing;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use enrichments_config::{AppConfig, StoreConfig};
use enrichments_core::asset::AssetLoader;
use enrichments_core::catalog::{TemplateCatalog, eligible_templates};
use enrichments_core::enrichment::{CollisionInfo, FactoryRegistry, ImbueContext};
use enrichments_core::error::{LifecycleError, StoreError};
use enrichments_core::event::{DomainEvent, EventBus};
use enrichments_core::item::{Item, ItemId};
use enrichments_core::math::Pose;
use enrichments_core::record::RecordStore;
use enrichments_lifecycle::{
    AddOutcome, EnrichmentManager, LoadReport, ManagerSettings, MigratorChain, RemoveOutcome,
};
use enrichments_pool::{OrbitPresenter, OwnerId, PoolError, PoolSettings, TokenId, TokenPool};
use tracing::{debug, info, warn};

/// Open the record store named by the configuration.
pub fn create_store(config: &StoreConfig) -> Result<Box<dyn RecordStore>, StoreError> {
    enrichments_store::open_store(&config.backend, config.resolved_path())
}

/// A set of tokens presenting the templates a core offers for one item.
struct CoreDisplay {
    target: ItemId,
    anchor: Pose,
    presenter: OrbitPresenter,
    tokens: Vec<(TokenId, String)>,
}

pub struct Session {
    config: AppConfig,
    manager: EnrichmentManager,
    pool: TokenPool,
    displays: HashMap<OwnerId, CoreDisplay>,
}

impl Session {
    pub fn new(
        config: AppConfig,
        catalog: Arc<dyn TemplateCatalog>,
        loader: Arc<dyn AssetLoader>,
        factories: FactoryRegistry,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let store = create_store(&config.store)?;
        let manager = EnrichmentManager::new(
            catalog.clone(),
            store,
            factories,
            ManagerSettings::from(&config.lifecycle),
        )
        .with_migrators(MigratorChain::from_config(&config.migrations));
        let pool = TokenPool::new(PoolSettings::from(&config.pool), catalog, loader);

        Ok(Self {
            config,
            manager,
            pool,
            displays: HashMap::new(),
        })
    }

    /// Begin warming the token pool.
    pub fn start(&mut self) {
        let count = self.config.pool.prewarm_count;
        self.pool.warm(count);
        info!(prewarm = count, store = %self.config.store.backend, "Enrichment session started");
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn manager(&self) -> &EnrichmentManager {
        &self.manager
    }

    /// Direct access for capacity grants and other manager-only operations.
    pub fn manager_mut(&mut self) -> &mut EnrichmentManager {
        &mut self.manager
    }

    pub fn pool(&self) -> &TokenPool {
        &self.pool
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        self.manager.events_mut()
    }

    // --- Host events ---

    pub fn item_spawned(&mut self, item: &Item) -> Result<LoadReport, SessionError> {
        Ok(self.manager.load_from_persisted(item)?)
    }

    /// Unload the item and hide every display targeting it.
    pub fn item_despawned(&mut self, item: &Item) -> Vec<String> {
        let owners: Vec<OwnerId> = self
            .displays
            .iter()
            .filter(|(_, display)| display.target == item.id)
            .map(|(owner, _)| *owner)
            .collect();
        for owner in owners {
            self.hide(owner);
        }
        self.manager.unload_all(item)
    }

    pub fn imbue_loaded(&mut self, item: &Item, imbue: &ImbueContext) -> usize {
        self.manager.on_imbue_loaded(item, imbue)
    }

    pub fn imbue_unloaded(&mut self, item: &Item, imbue: &ImbueContext) -> usize {
        self.manager.on_imbue_unloaded(item, imbue)
    }

    pub fn item_collided(&mut self, item: &Item, collision: &CollisionInfo) -> usize {
        self.manager.on_item_collide(item, collision)
    }

    // --- Presentation-layer requests ---

    /// Grant a template the player picked, after checking its eligibility
    /// filter. A refusal publishes `EnrichmentDenied`.
    pub fn request_enrichment(
        &mut self,
        item: &Item,
        template_id: &str,
    ) -> Result<AddOutcome, SessionError> {
        if let Some(template) = self.manager.catalog().resolve(template_id)
            && !template.is_allowed_on(item)
        {
            warn!(item = %item.id, enrichment = %template_id, data_id = %item.data_id, "Enrichment not allowed on item");
            self.manager.events_mut().publish(DomainEvent::EnrichmentDenied {
                item: item.id,
                enrichment: template_id.to_string(),
                reason: "not eligible".into(),
                timestamp: Utc::now(),
            });
            return Err(LifecycleError::NotEligible {
                id: template_id.to_string(),
                item: item.data_id.clone(),
            }
            .into());
        }

        let outcome = self.manager.add_enrichment(item, template_id)?;
        self.refresh_buttons(item.id, template_id)?;
        Ok(outcome)
    }

    /// Refund a granted template.
    pub fn remove_enrichment(&mut self, item: &Item, id: &str) -> Result<RemoveOutcome, SessionError> {
        let outcome = self.manager.remove_enrichment(item, id)?;
        self.refresh_buttons(item.id, id)?;
        Ok(outcome)
    }

    /// Show the templates a core of `skill_tree`/`tier` offers for `target`,
    /// one token per template, orbiting `anchor`. Replaces any display
    /// `owner` already had.
    pub fn show(
        &mut self,
        owner: OwnerId,
        anchor: Pose,
        target: &Item,
        skill_tree: &str,
        tier: u32,
    ) -> Result<Vec<TokenId>, SessionError> {
        self.hide(owner);

        let templates: Vec<_> = eligible_templates(self.manager.catalog().as_ref(), skill_tree, tier)
            .into_iter()
            .filter(|t| t.is_allowed_on(target))
            .collect();

        let mut display = CoreDisplay {
            target: target.id,
            anchor,
            presenter: OrbitPresenter::from(&self.config.presenter),
            tokens: Vec::with_capacity(templates.len()),
        };
        for template in &templates {
            let held = self.manager.has_enrichment(target.id, &template.id);
            let bound = self.pool.acquire(&template.id, owner, anchor).and_then(|token| {
                display.tokens.push((token, template.id.clone()));
                self.pool.set_button_state(token, !held)
            });
            if let Err(e) = bound {
                let released = self.pool.release_all(owner);
                warn!(owner = %owner, enrichment = %template.id, released, error = %e, "Core display aborted");
                return Err(e.into());
            }
        }
        display.presenter.arrange(&mut self.pool, owner, anchor, 0.0);

        let tokens: Vec<TokenId> = display.tokens.iter().map(|(token, _)| *token).collect();
        debug!(owner = %owner, item = %target.id, tree = %skill_tree, tier, count = tokens.len(), "Core display shown");
        self.displays.insert(owner, display);
        Ok(tokens)
    }

    /// Release every token of `owner`'s display. Returns how many were released.
    pub fn hide(&mut self, owner: OwnerId) -> usize {
        if self.displays.remove(&owner).is_none() {
            return 0;
        }
        let released = self.pool.release_all(owner);
        debug!(owner = %owner, released, "Core display hidden");
        released
    }

    /// Move the anchor a display orbits.
    pub fn move_anchor(&mut self, owner: OwnerId, anchor: Pose) -> bool {
        match self.displays.get_mut(&owner) {
            Some(display) => {
                display.anchor = anchor;
                true
            }
            None => false,
        }
    }

    /// Tokens of `owner`'s display with the template each presents.
    pub fn display(&self, owner: OwnerId) -> Option<&[(TokenId, String)]> {
        self.displays.get(&owner).map(|d| d.tokens.as_slice())
    }

    /// Advance one frame.
    pub fn tick(&mut self, dt: f32) {
        self.pool.tick(dt);
        for (owner, display) in self.displays.iter_mut() {
            display
                .presenter
                .arrange(&mut self.pool, *owner, display.anchor, dt);
        }
    }

    /// Hide every display, unload every live item and return all pooled
    /// assets. Persisted records are kept.
    pub fn teardown(&mut self) {
        let owners: Vec<OwnerId> = self.displays.keys().copied().collect();
        for owner in owners {
            self.hide(owner);
        }
        let items = self.manager.teardown();
        self.pool.shutdown();
        info!(items, "Enrichment session torn down");
    }

    fn refresh_buttons(&mut self, item: ItemId, template_id: &str) -> Result<(), PoolError> {
        let held = self.manager.has_enrichment(item, template_id);
        for display in self.displays.values().filter(|d| d.target == item) {
            for (token, _) in display.tokens.iter().filter(|(_, id)| id == template_id) {
                self.pool.set_button_state(*token, !held)?;
            }
        }
        Ok(())
    }
}
