//! Collaborator seams the engine consults while pricing and reserving, plus a
//! static JSON-backed implementation of all of them.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::model::*;
use crate::money::Money;

/// A collaborator could not answer. `Ok(None)` is used for "unknown" instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("collaborator unavailable: {0}")]
pub struct CollaboratorError(pub String);

#[async_trait]
pub trait Inventory: Send + Sync {
    async fn get_item(&self, item_id: &str) -> Result<Option<InventoryItem>, CollaboratorError>;
}

#[async_trait]
pub trait SeasonalRates: Send + Sync {
    /// Multiplier for `range` on `item`, or `None` when no season applies.
    async fn seasonal_multiplier(
        &self,
        item: &InventoryItem,
        range: &Span,
    ) -> Result<Option<Decimal>, CollaboratorError>;
}

#[async_trait]
pub trait AddOnCatalog: Send + Sync {
    async fn addon_price(&self, addon_id: &str) -> Result<Option<Money>, CollaboratorError>;
}

#[async_trait]
pub trait TaxRates: Send + Sync {
    async fn tax_rate(&self, location: &str) -> Result<Option<Decimal>, CollaboratorError>;
}

/// The full set of collaborators handed to the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub inventory: Arc<dyn Inventory>,
    pub seasons: Arc<dyn SeasonalRates>,
    pub add_ons: Arc<dyn AddOnCatalog>,
    pub taxes: Arc<dyn TaxRates>,
}

impl Collaborators {
    /// Use one catalog for every seam.
    pub fn from_catalog(catalog: Arc<StaticCatalog>) -> Self {
        Self {
            inventory: catalog.clone(),
            seasons: catalog.clone(),
            add_ons: catalog.clone(),
            taxes: catalog,
        }
    }
}

/// A dated rate window. Scoped to one item, one category, or everything when
/// both are absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Season {
    pub name: String,
    pub span: Span,
    pub multiplier: Decimal,
    #[serde(default)]
    pub item_id: Option<ItemId>,
    #[serde(default)]
    pub category: Option<ItemCategory>,
}

impl Season {
    fn applies_to(&self, item: &InventoryItem) -> bool {
        self.item_id.as_ref().is_none_or(|id| *id == item.id)
            && self.category.is_none_or(|c| c == item.category)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogDocument {
    items: Vec<InventoryItem>,
    #[serde(default)]
    add_ons: BTreeMap<String, Money>,
    #[serde(default)]
    tax_rates: BTreeMap<String, Decimal>,
    #[serde(default)]
    seasons: Vec<Season>,
}

#[derive(Debug, Default)]
pub struct StaticCatalog {
    items: HashMap<ItemId, InventoryItem>,
    add_ons: BTreeMap<String, Money>,
    tax_rates: BTreeMap<String, Decimal>,
    seasons: Vec<Season>,
}

impl StaticCatalog {
    pub fn new(
        items: Vec<InventoryItem>,
        add_ons: BTreeMap<String, Money>,
        tax_rates: BTreeMap<String, Decimal>,
        seasons: Vec<Season>,
    ) -> Result<Self, ConfigError> {
        let mut by_id = HashMap::with_capacity(items.len());
        for item in items {
            if item.daily_rate.is_negative() {
                return Err(ConfigError::Invalid(format!("{}: negative daily_rate", item.id)));
            }
            if item.locations.is_empty() {
                return Err(ConfigError::Invalid(format!("{}: no locations", item.id)));
            }
            let id = item.id.clone();
            if by_id.insert(id.clone(), item).is_some() {
                return Err(ConfigError::Invalid(format!("duplicate item id {id}")));
            }
        }
        if let Some((id, _)) = add_ons.iter().find(|(_, price)| price.is_negative()) {
            return Err(ConfigError::Invalid(format!("add-on {id}: negative price")));
        }
        if let Some((loc, _)) = tax_rates
            .iter()
            .find(|(_, rate)| **rate < Decimal::ZERO || **rate >= Decimal::ONE)
        {
            return Err(ConfigError::Invalid(format!("tax rate for {loc} must be in [0, 1)")));
        }
        if let Some(s) = seasons.iter().find(|s| s.multiplier <= Decimal::ZERO || !s.span.is_valid()) {
            return Err(ConfigError::Invalid(format!("season {} is malformed", s.name)));
        }
        Ok(Self {
            items: by_id,
            add_ons,
            tax_rates,
            seasons,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let doc: CatalogDocument = serde_json::from_str(json)?;
        Self::new(doc.items, doc.add_ons, doc.tax_rates, doc.seasons)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Highest multiplier among the seasons overlapping `range`.
    pub fn season_for(&self, item: &InventoryItem, range: &Span) -> Option<Decimal> {
        self.seasons
            .iter()
            .filter(|s| s.applies_to(item) && s.span.overlaps(range))
            .map(|s| s.multiplier)
            .max()
    }
}

#[async_trait]
impl Inventory for StaticCatalog {
    async fn get_item(&self, item_id: &str) -> Result<Option<InventoryItem>, CollaboratorError> {
        Ok(self.items.get(item_id).cloned())
    }
}

#[async_trait]
impl SeasonalRates for StaticCatalog {
    async fn seasonal_multiplier(
        &self,
        item: &InventoryItem,
        range: &Span,
    ) -> Result<Option<Decimal>, CollaboratorError> {
        Ok(self.season_for(item, range))
    }
}

#[async_trait]
impl AddOnCatalog for StaticCatalog {
    async fn addon_price(&self, addon_id: &str) -> Result<Option<Money>, CollaboratorError> {
        Ok(self.add_ons.get(addon_id).copied())
    }
}

#[async_trait]
impl TaxRates for StaticCatalog {
    async fn tax_rate(&self, location: &str) -> Result<Option<Decimal>, CollaboratorError> {
        Ok(self.tax_rates.get(location).copied())
    }
}
