mod config;

pub use config::{InsurancePolicy, PricingConfig};

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::engine::EngineError;
use crate::model::*;
use crate::money::Money;

/// Collaborator answers a quote depends on. Gathered by the engine, then
/// handed to the calculator so the arithmetic itself is pure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingInputs {
    pub seasonal_multiplier: Decimal,
    pub tax_rate: Decimal,
    pub addon_prices: HashMap<String, Money>,
}

impl PricingInputs {
    /// No season, no add-ons.
    pub fn with_tax_rate(tax_rate: Decimal) -> Self {
        Self {
            seasonal_multiplier: Decimal::ONE,
            tax_rate,
            addon_prices: HashMap::new(),
        }
    }
}

fn out_of_range() -> EngineError {
    EngineError::LimitExceeded("price out of range")
}

pub struct PriceCalculator {
    config: PricingConfig,
}

impl PriceCalculator {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    pub fn tier_multiplier(&self, tier: Tier) -> Result<Decimal, EngineError> {
        self.config
            .tier_multipliers
            .get(&tier)
            .copied()
            .ok_or_else(|| EngineError::validation("tier", format!("{tier} is not offered")))
    }

    /// Itemize the price of `request` on `item`.
    ///
    /// Every component is rounded to whole cents (half-up) on its own and the
    /// total is the integer sum of those components.
    pub fn compute(
        &self,
        request: &PricingRequest,
        item: &InventoryItem,
        inputs: &PricingInputs,
    ) -> Result<PriceBreakdown, EngineError> {
        let range = request.range;
        if !range.is_valid() {
            return Err(EngineError::InvalidRange(format!(
                "end {} must be after start {}",
                range.end, range.start
            )));
        }
        if item.daily_rate.is_negative() {
            return Err(EngineError::PricingUnavailable(format!(
                "negative daily rate for {}",
                item.id
            )));
        }
        if inputs.seasonal_multiplier <= Decimal::ZERO {
            return Err(EngineError::PricingUnavailable(
                "seasonal multiplier must be positive".into(),
            ));
        }
        if inputs.tax_rate < Decimal::ZERO || inputs.tax_rate >= Decimal::ONE {
            return Err(EngineError::PricingUnavailable(
                "tax rate must be in [0, 1)".into(),
            ));
        }

        let days = range.billable_days();
        let tier_multiplier = self.tier_multiplier(request.tier)?;

        // Seasonal rates apply to the rental itself, never to add-ons.
        let subtotal = Decimal::from(item.daily_rate.cents())
            .checked_mul(Decimal::from(days))
            .and_then(|v| v.checked_mul(tier_multiplier))
            .and_then(|v| v.checked_mul(inputs.seasonal_multiplier))
            .and_then(Money::round_cents)
            .ok_or_else(out_of_range)?;

        let mut add_ons_total = Money::ZERO;
        for line in &request.add_ons {
            let unit = inputs
                .addon_prices
                .get(&line.addon_id)
                .copied()
                .ok_or_else(|| EngineError::UnknownAddOn(line.addon_id.clone()))?;
            if unit.is_negative() {
                return Err(EngineError::PricingUnavailable(format!(
                    "negative price for add-on {}",
                    line.addon_id
                )));
            }
            add_ons_total = unit
                .checked_mul(line.quantity as i64)
                .and_then(|line_total| add_ons_total.checked_add(line_total))
                .ok_or_else(out_of_range)?;
        }

        let service_fee = subtotal
            .scale(self.config.service_fee_rate)
            .ok_or_else(out_of_range)?;
        let insurance = self
            .config
            .insurance
            .premium(request.tier, days)
            .ok_or_else(out_of_range)?;
        let taxes = subtotal
            .checked_add(add_ons_total)
            .and_then(|v| v.checked_add(service_fee))
            .and_then(|taxable| taxable.scale(inputs.tax_rate))
            .ok_or_else(out_of_range)?;

        let mut breakdown = PriceBreakdown {
            base_price: item.daily_rate,
            duration_days: days,
            tier_multiplier,
            seasonal_multiplier: inputs.seasonal_multiplier,
            subtotal,
            add_ons_total,
            service_fee,
            insurance,
            taxes,
            security_deposit: self.config.deposit_for(&item.id),
            total: Money::ZERO,
            currency: item.currency.clone(),
        };
        breakdown.total = breakdown.itemized_sum().ok_or_else(out_of_range)?;
        Ok(breakdown)
    }
}
