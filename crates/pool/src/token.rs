//! Visual tokens: the pooled, reusable orbs that present enrichments.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use enrichments_core::asset::AssetHandle;
use enrichments_core::item::ItemId;
use enrichments_core::math::Pose;
use enrichments_core::template::EnrichmentTemplate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transition::Transition;

/// Arena index of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenId(pub u64);

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token-{}", self.0)
    }
}

/// The UI or item context that requested a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub Uuid);

impl OwnerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ItemId> for OwnerId {
    fn from(item: ItemId) -> Self {
        Self(item.0)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `Free → Binding → Active → Releasing → Free`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenState {
    Free,
    Binding,
    Active,
    Releasing,
}

impl fmt::Display for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Free => "free",
            Self::Binding => "binding",
            Self::Active => "active",
            Self::Releasing => "releasing",
        };
        f.write_str(name)
    }
}

/// Asset-backed visual fields of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VisualSlot {
    OrbIcon,
    ButtonIcon,
    Video,
}

/// A pooled visual token.
///
/// Fields are written by the pool only; callers get read access.
#[derive(Debug)]
pub struct VisualToken {
    pub(crate) id: TokenId,
    pub(crate) state: TokenState,
    /// Bumped on every bind and release
    pub(crate) epoch: u64,
    pub(crate) template: Option<Arc<EnrichmentTemplate>>,
    pub(crate) owner: Option<OwnerId>,
    pub(crate) pose: Pose,
    pub(crate) title: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) button_enabled: bool,
    /// Key each slot should end up showing for the current binding
    pub(crate) wanted: BTreeMap<VisualSlot, String>,
    pub(crate) visuals: BTreeMap<VisualSlot, AssetHandle>,
    pub(crate) rig: Option<AssetHandle>,
    pub(crate) transition: Option<Transition>,
    /// Presentation scale driven by transitions, 0 hidden to 1 shown
    pub(crate) scale: f32,
    /// Created by an acquire that found the free queue empty
    pub(crate) on_demand: bool,
}

impl VisualToken {
    pub(crate) fn new(id: TokenId, on_demand: bool) -> Self {
        Self {
            id,
            state: TokenState::Free,
            epoch: 0,
            template: None,
            owner: None,
            pose: Pose::default(),
            title: None,
            description: None,
            button_enabled: true,
            wanted: BTreeMap::new(),
            visuals: BTreeMap::new(),
            rig: None,
            transition: None,
            scale: 0.0,
            on_demand,
        }
    }

    pub fn id(&self) -> TokenId {
        self.id
    }

    pub fn state(&self) -> TokenState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn template_id(&self) -> Option<&str> {
        self.template.as_deref().map(|t| t.id.as_str())
    }

    pub fn template(&self) -> Option<&EnrichmentTemplate> {
        self.template.as_deref()
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.owner
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn button_enabled(&self) -> bool {
        self.button_enabled
    }

    pub fn visual(&self, slot: VisualSlot) -> Option<&AssetHandle> {
        self.visuals.get(&slot)
    }

    pub fn has_rig(&self) -> bool {
        self.rig.is_some()
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn is_transitioning(&self) -> bool {
        self.transition.is_some()
    }

    pub fn is_on_demand(&self) -> bool {
        self.on_demand
    }

    /// Whether an async result for `slot` requested at `epoch` may still be applied.
    pub(crate) fn accepts(&self, epoch: u64, slot: VisualSlot, key: &str) -> bool {
        self.epoch == epoch
            && matches!(self.state, TokenState::Binding | TokenState::Active)
            && self.wanted.get(&slot).is_some_and(|wanted| wanted == key)
    }

    /// Drop the binding. Returns the visual handles the token held.
    pub(crate) fn unbind(&mut self) -> Vec<AssetHandle> {
        self.template = None;
        self.owner = None;
        self.title = None;
        self.description = None;
        self.button_enabled = true;
        self.wanted.clear();
        self.transition = None;
        self.scale = 0.0;
        std::mem::take(&mut self.visuals).into_values().collect()
    }
}
