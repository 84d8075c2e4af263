use std::collections::BTreeMap;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::model::{ItemId, Tier};
use crate::money::Money;

/// Rate table and fee schedule. Rates are decimal strings in JSON
/// (`"1.3"`, `"0.05"`) so they stay exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingConfig {
    pub tier_multipliers: BTreeMap<Tier, Decimal>,
    #[serde(default = "default_service_fee_rate")]
    pub service_fee_rate: Decimal,
    #[serde(default)]
    pub insurance: InsurancePolicy,
    #[serde(default)]
    pub default_deposit: Money,
    /// Per-item security deposit, overriding `default_deposit`.
    #[serde(default)]
    pub deposits: BTreeMap<ItemId, Money>,
}

fn default_service_fee_rate() -> Decimal {
    Decimal::new(5, 2)
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            tier_multipliers: BTreeMap::from([
                (Tier::Standard, Decimal::new(10, 1)),
                (Tier::Premium, Decimal::new(13, 1)),
                (Tier::Elite, Decimal::new(16, 1)),
            ]),
            service_fee_rate: default_service_fee_rate(),
            insurance: InsurancePolicy::default(),
            default_deposit: Money::ZERO,
            deposits: BTreeMap::new(),
        }
    }
}

impl PricingConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: PricingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tier_multipliers.is_empty() {
            return Err(ConfigError::Invalid("tier_multipliers is empty".into()));
        }
        for (tier, m) in &self.tier_multipliers {
            if *m <= Decimal::ZERO {
                return Err(ConfigError::Invalid(format!(
                    "tier multiplier for {tier} must be positive"
                )));
            }
        }
        if self.service_fee_rate < Decimal::ZERO || self.service_fee_rate >= Decimal::ONE {
            return Err(ConfigError::Invalid("service_fee_rate must be in [0, 1)".into()));
        }
        if self.default_deposit.is_negative() || self.deposits.values().any(|d| d.is_negative()) {
            return Err(ConfigError::Invalid("deposits must be non-negative".into()));
        }
        self.insurance.validate()
    }

    pub fn deposit_for(&self, item_id: &str) -> Money {
        self.deposits
            .get(item_id)
            .copied()
            .unwrap_or(self.default_deposit)
    }
}

/// How the insurance line is charged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsurancePolicy {
    /// One amount per rental regardless of length.
    Flat { amount: Money },
    /// Amount per billable day.
    Daily { amount: Money },
    /// Per-day amount by service tier; tiers without an entry are not charged.
    Tiered { daily: BTreeMap<Tier, Money> },
}

impl Default for InsurancePolicy {
    fn default() -> Self {
        InsurancePolicy::Flat { amount: Money::ZERO }
    }
}

impl InsurancePolicy {
    pub fn premium(&self, tier: Tier, days: i64) -> Option<Money> {
        match self {
            InsurancePolicy::Flat { amount } => Some(*amount),
            InsurancePolicy::Daily { amount } => amount.checked_mul(days),
            InsurancePolicy::Tiered { daily } => daily
                .get(&tier)
                .copied()
                .unwrap_or(Money::ZERO)
                .checked_mul(days),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let negative = match self {
            InsurancePolicy::Flat { amount } | InsurancePolicy::Daily { amount } => amount.is_negative(),
            InsurancePolicy::Tiered { daily } => daily.values().any(|m| m.is_negative()),
        };
        if negative {
            return Err(ConfigError::Invalid("insurance amounts must be non-negative".into()));
        }
        Ok(())
    }
}
