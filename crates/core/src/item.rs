//! Items: the equipment that carries enrichments.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of an item across spawn/despawn cycles.
///
/// Persisted records are keyed by this id, so a respawned item must keep it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broad item classification used by eligibility filters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    #[default]
    Misc,
    Weapon,
    Shield,
    Quiver,
    Potion,
    Prop,
    Crystal,
    Tool,
    Food,
    Valuable,
    Wardrobe,
}

/// A live item as seen by the enrichment system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Persistent instance identity
    pub id: ItemId,

    /// Catalog id of the item's data (e.g. "SwordShortCommon")
    pub data_id: String,

    /// Catalog category (e.g. "Swords")
    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub kind: ItemKind,
}

impl Item {
    pub fn new(data_id: impl Into<String>, category: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            id: ItemId::new(),
            data_id: data_id.into(),
            category: category.into(),
            kind,
        }
    }

    /// Same item data under an explicit identity, e.g. when respawning a saved item.
    pub fn with_id(mut self, id: ItemId) -> Self {
        self.id = id;
        self
    }

    /// Tier encoded in the data id as `T<digits>`, e.g. `CrystalLightningT3` → 3.
    pub fn tier(&self) -> Option<u32> {
        extract_tier(&self.data_id)
    }
}

/// Parse the first `T<digits>` marker out of a data id.
pub fn extract_tier(source: &str) -> Option<u32> {
    let bytes = source.as_bytes();
    for (i, window) in bytes.windows(2).enumerate() {
        if window[0] == b'T' && window[1].is_ascii_digit() {
            let digits: String = source[i + 1..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(tier) = digits.parse() {
                return Some(tier);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_parsed_from_data_id() {
        assert_eq!(extract_tier("CrystalLightningT3"), Some(3));
        assert_eq!(extract_tier("CrystalFireT12Large"), Some(12));
        assert_eq!(extract_tier("SwordShortCommon"), None);
        assert_eq!(extract_tier("Tool"), None);
        assert_eq!(extract_tier(""), None);
    }

    #[test]
    fn item_tier_uses_data_id() {
        let item = Item::new("CrystalBodyT2", "Crystals", ItemKind::Crystal);
        assert_eq!(item.tier(), Some(2));
    }

    #[test]
    fn with_id_keeps_identity() {
        let original = Item::new("SwordShortCommon", "Swords", ItemKind::Weapon);
        let respawned = Item::new("SwordShortCommon", "Swords", ItemKind::Weapon).with_id(original.id);
        assert_eq!(original.id, respawned.id);
    }

    #[test]
    fn item_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ItemKind::Quiver).unwrap();
        assert_eq!(json, "\"quiver\"");
    }
}
