//! Enrichment templates: immutable catalog definitions.
//!
//! A template is published once by the catalog and never mutated afterwards.
//! Per-item instances are deep copies made at attach time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::item::{Item, ItemKind};

/// Variant tag used when a template does not name one.
pub const BASIC_KIND: &str = "basic";

/// The catalog definition of an enrichment type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentTemplate {
    /// Unique key
    pub id: String,

    /// Variant tag selecting the instance factory
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Minimum item tier required
    #[serde(default)]
    pub tier: u32,

    #[serde(default)]
    pub cost: u32,

    #[serde(default)]
    pub allow_refund: bool,

    /// Slots added to max capacity when this template is granted as a modifier
    #[serde(default)]
    pub capacity_contribution: i32,

    /// Whether the template is offered by the core display
    #[serde(default = "default_true")]
    pub show_in_core: bool,

    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_skill_tree: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_skill_tree: Option<String>,

    /// Asset keys for presentation
    #[serde(default)]
    pub visuals: TemplateVisuals,

    #[serde(default)]
    pub eligibility: EligibilityFilter,

    /// Variant-specific settings
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub settings: HashMap<String, serde_json::Value>,
}

fn default_kind() -> String {
    BASIC_KIND.into()
}
fn default_true() -> bool {
    true
}

impl EnrichmentTemplate {
    /// A basic template with default fields.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: default_kind(),
            tier: 0,
            cost: 0,
            allow_refund: false,
            capacity_contribution: 0,
            show_in_core: true,
            display_name: String::new(),
            description: String::new(),
            primary_skill_tree: None,
            secondary_skill_tree: None,
            visuals: TemplateVisuals::default(),
            eligibility: EligibilityFilter::default(),
            settings: HashMap::new(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_tier(mut self, tier: u32) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_skill_tree(mut self, tree: impl Into<String>) -> Self {
        self.primary_skill_tree = Some(tree.into());
        self
    }

    pub fn with_visuals(mut self, visuals: TemplateVisuals) -> Self {
        self.visuals = visuals;
        self
    }

    pub fn with_eligibility(mut self, eligibility: EligibilityFilter) -> Self {
        self.eligibility = eligibility;
        self
    }

    /// Whether this template may be attached to `item`.
    pub fn is_allowed_on(&self, item: &Item) -> bool {
        self.eligibility.matches(item)
    }

    /// Asset key of the button icon for the given held state.
    pub fn button_icon(&self, enabled: bool) -> Option<&str> {
        if enabled {
            self.visuals.button_enabled_icon.as_deref()
        } else {
            self.visuals.button_disabled_icon.as_deref()
        }
    }
}

/// Asset keys loaded asynchronously when a template is presented.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateVisuals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orb_icon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_enabled_icon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_disabled_icon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orb_effect: Option<String>,
}

/// Whether a filter list admits or rejects the values it names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    Include,
    Exclude,
}

/// One dimension of an eligibility filter. An empty list is neutral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterList<T> {
    #[serde(default)]
    pub mode: FilterMode,

    #[serde(default)]
    pub values: Vec<T>,
}

impl<T> Default for FilterList<T> {
    fn default() -> Self {
        Self {
            mode: FilterMode::Include,
            values: Vec::new(),
        }
    }
}

impl<T: PartialEq> FilterList<T> {
    pub fn include(values: Vec<T>) -> Self {
        Self {
            mode: FilterMode::Include,
            values,
        }
    }

    pub fn exclude(values: Vec<T>) -> Self {
        Self {
            mode: FilterMode::Exclude,
            values,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn contains(&self, value: &T) -> bool {
        self.values.contains(value)
    }
}

/// Which items a template may be attached to.
///
/// Exclusion lists veto. Among non-empty inclusion lists, matching any one
/// of them admits the item; with no inclusion lists every item is admitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityFilter {
    #[serde(default)]
    pub item_ids: FilterList<String>,

    #[serde(default)]
    pub categories: FilterList<String>,

    #[serde(default)]
    pub kinds: FilterList<ItemKind>,
}

impl EligibilityFilter {
    pub fn matches(&self, item: &Item) -> bool {
        let dimensions = [
            (self.item_ids.mode, self.item_ids.is_empty(), self.item_ids.contains(&item.data_id)),
            (
                self.categories.mode,
                self.categories.is_empty(),
                self.categories.contains(&item.category),
            ),
            (self.kinds.mode, self.kinds.is_empty(), self.kinds.contains(&item.kind)),
        ];

        if dimensions
            .iter()
            .any(|&(mode, empty, hit)| mode == FilterMode::Exclude && !empty && hit)
        {
            return false;
        }

        let mut includes = dimensions
            .iter()
            .filter(|&&(mode, empty, _)| mode == FilterMode::Include && !empty)
            .peekable();
        if includes.peek().is_none() {
            return true;
        }
        includes.any(|&(_, _, hit)| hit)
    }
}
