use std::collections::HashMap;

use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::*;
use crate::pricing::PricingInputs;

use super::availability::{Availability, is_available};
use super::conflict::validate_span;
use super::mutations::{check_locations, validate_id, validate_request};
use super::{Engine, EngineError};

impl Engine {
    /// Gather collaborator inputs for `request` and compute its breakdown.
    pub(super) async fn price(
        &self,
        request: &PricingRequest,
        item: &InventoryItem,
    ) -> Result<PriceBreakdown, EngineError> {
        let seasonal_multiplier = self
            .consult(
                "seasons",
                self.collaborators.seasons.seasonal_multiplier(item, &request.range),
            )
            .await?
            .unwrap_or(Decimal::ONE);

        let tax_rate = self
            .consult("taxes", self.collaborators.taxes.tax_rate(&request.pickup_location))
            .await?
            .ok_or_else(|| {
                EngineError::validation(
                    "pickup_location",
                    format!("no tax rate for {}", request.pickup_location),
                )
            })?;

        let mut addon_prices = HashMap::new();
        for line in &request.add_ons {
            if addon_prices.contains_key(&line.addon_id) {
                continue;
            }
            let unit = self
                .consult("add_ons", self.collaborators.add_ons.addon_price(&line.addon_id))
                .await?
                .ok_or_else(|| EngineError::UnknownAddOn(line.addon_id.clone()))?;
            addon_prices.insert(line.addon_id.clone(), unit);
        }

        let inputs = PricingInputs {
            seasonal_multiplier,
            tax_rate,
            addon_prices,
        };
        self.calculator.compute(request, item, &inputs)
    }

    /// Price a request without reserving anything. Takes no locks.
    pub async fn quote(&self, request: &PricingRequest) -> Result<PriceBreakdown, EngineError> {
        validate_request(self, request)?;
        let item = self.lookup_item(&request.item_id).await?;
        check_locations(&item, request)?;
        self.price(request, &item).await
    }

    /// Whether `range` could be reserved on the item right now, with every
    /// conflicting range when it cannot.
    pub async fn check_availability(&self, item_id: &str, range: Span) -> Result<Availability, EngineError> {
        validate_id("item_id", item_id)?;
        validate_span(&range)?;
        let item = self.lookup_item(item_id).await?;

        let cal = self.calendar.handle(&item.id);
        let guard = cal.read().await;
        is_available(&guard, &item, &range, self.buffer_hours_for(&item))
    }

    pub fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.bookings
            .get(&id)
            .map(|b| b.value().clone())
            .ok_or(EngineError::BookingNotFound(id))
    }

    /// Every booking ever made on an item, cancelled ones included, by start.
    pub fn bookings_for_item(&self, item_id: &str) -> Vec<Booking> {
        let mut out: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|b| b.item_id == item_id)
            .map(|b| b.value().clone())
            .collect();
        out.sort_by_key(|b| (b.range.start, b.id));
        out
    }

    /// Ids of bookings still pending payment `window_ms` after creation.
    pub fn stale_pending(&self, now: Ms, window_ms: Ms) -> Vec<Ulid> {
        let mut stale: Vec<(Ms, Ulid)> = self
            .bookings
            .iter()
            .filter(|b| {
                b.status == BookingStatus::PendingPayment
                    && b.created_at.saturating_add(window_ms) <= now
            })
            .map(|b| (b.created_at, b.id))
            .collect();
        stale.sort();
        stale.into_iter().map(|(_, id)| id).collect()
    }
}
