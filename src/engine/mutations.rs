use std::time::Instant;

use tracing::{error, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::is_available;
use super::conflict::{check_minimum_rental, now_ms, validate_blackout_span, validate_span};
use super::{Engine, EngineError};

/// Status changes driven by payment and fulfilment collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Confirm,
    Complete,
    Cancel,
    Expire,
}

impl Transition {
    pub fn target(self) -> BookingStatus {
        match self {
            Transition::Confirm => BookingStatus::Confirmed,
            Transition::Complete => BookingStatus::Completed,
            Transition::Cancel | Transition::Expire => BookingStatus::Cancelled,
        }
    }

    /// `Ok(true)` to apply, `Ok(false)` when already there (no-op).
    pub fn check(self, id: Ulid, from: BookingStatus) -> Result<bool, EngineError> {
        use BookingStatus::*;
        let allowed = match (self, from) {
            (Transition::Confirm, Confirmed)
            | (Transition::Complete, Completed)
            | (Transition::Cancel | Transition::Expire, Cancelled) => return Ok(false),
            (Transition::Confirm, PendingPayment) => true,
            (Transition::Complete, Confirmed) => true,
            (Transition::Cancel, PendingPayment | Confirmed) => true,
            (Transition::Expire, PendingPayment) => true,
            _ => false,
        };
        if allowed {
            Ok(true)
        } else {
            Err(EngineError::InvalidTransition {
                id,
                from,
                to: self.target(),
            })
        }
    }

    fn event(self, id: Ulid, item_id: ItemId, at: Ms) -> Event {
        match self {
            Transition::Confirm => Event::BookingConfirmed { id, item_id, at },
            Transition::Complete => Event::BookingCompleted { id, item_id, at },
            Transition::Cancel => Event::BookingCancelled { id, item_id, at },
            Transition::Expire => Event::BookingExpired { id, item_id, at },
        }
    }
}

pub(super) fn validate_id(field: &'static str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::validation(field, "must not be empty"));
    }
    if value.len() > MAX_ID_LEN {
        return Err(EngineError::validation(field, format!("longer than {MAX_ID_LEN} bytes")));
    }
    Ok(())
}

/// Shape checks that need neither collaborators nor locks.
pub(super) fn validate_request(engine: &Engine, request: &PricingRequest) -> Result<(), EngineError> {
    validate_id("item_id", &request.item_id)?;
    validate_span(&request.range)?;
    engine.calculator.tier_multiplier(request.tier)?;
    for (field, loc) in [
        ("pickup_location", &request.pickup_location),
        ("dropoff_location", &request.dropoff_location),
    ] {
        if loc.trim().is_empty() {
            return Err(EngineError::validation(field, "must not be empty"));
        }
        if loc.len() > MAX_LOCATION_LEN {
            return Err(EngineError::validation(field, format!("longer than {MAX_LOCATION_LEN} bytes")));
        }
    }
    if request.add_ons.len() > MAX_ADDONS_PER_REQUEST {
        return Err(EngineError::LimitExceeded("too many add-ons"));
    }
    for line in &request.add_ons {
        validate_id("add_ons", &line.addon_id)?;
        if line.quantity == 0 || line.quantity > MAX_ADDON_QUANTITY {
            return Err(EngineError::validation(
                "add_ons",
                format!("quantity for {} must be 1..={MAX_ADDON_QUANTITY}", line.addon_id),
            ));
        }
    }
    Ok(())
}

pub(super) fn check_locations(item: &InventoryItem, request: &PricingRequest) -> Result<(), EngineError> {
    if !item.serves(&request.pickup_location) {
        return Err(EngineError::validation(
            "pickup_location",
            format!("{} is not available at {}", item.id, request.pickup_location),
        ));
    }
    if !item.serves(&request.dropoff_location) {
        return Err(EngineError::validation(
            "dropoff_location",
            format!("{} cannot be returned at {}", item.id, request.dropoff_location),
        ));
    }
    Ok(())
}

impl Engine {
    /// Price and reserve `request.range` on the item for `customer_id`.
    ///
    /// The returned booking is pending payment and already durable. On any
    /// failure nothing is left on the calendar.
    pub async fn reserve(&self, request: PricingRequest, customer_id: &str) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.reserve_inner(request, customer_id).await;
        metrics::histogram!(observability::RESERVE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(booking) => {
                metrics::counter!(observability::RESERVATIONS_TOTAL).increment(1);
                metrics::gauge!(observability::PENDING_BOOKINGS).increment(1.0);
                info!(
                    "reserved {} on {} {} for {} ({} {})",
                    booking.id,
                    booking.item_id,
                    booking.range,
                    booking.customer_id,
                    booking.price.total,
                    booking.price.currency
                );
            }
            Err(e) => {
                metrics::counter!(observability::RESERVATIONS_REJECTED_TOTAL, "reason" => e.code())
                    .increment(1);
                tracing::debug!("reserve rejected: {e}");
            }
        }
        result
    }

    async fn reserve_inner(&self, request: PricingRequest, customer_id: &str) -> Result<Booking, EngineError> {
        validate_id("customer_id", customer_id)?;
        validate_request(self, &request)?;

        let item = self.lookup_item(&request.item_id).await?;
        check_locations(&item, &request)?;
        check_minimum_rental(&item, &request.range)?;

        // Collaborator calls stay outside the item lock.
        let price = self.price(&request, &item).await?;

        let cal = self.calendar.handle(&item.id);
        let mut guard = cal.write().await;

        let availability = is_available(&guard, &item, &request.range, self.buffer_hours_for(&item))?;
        if !availability.available {
            return Err(EngineError::Conflict {
                item_id: item.id,
                conflicts: availability.conflicts,
            });
        }

        let now = now_ms();
        let booking = Booking {
            id: Ulid::new(),
            customer_id: customer_id.to_string(),
            item_id: item.id.clone(),
            range: request.range,
            price,
            status: BookingStatus::PendingPayment,
            created_at: now,
            updated_at: now,
        };
        guard.insert_booking(booking.id, booking.range)?;

        let event = Event::BookingReserved {
            booking: booking.clone(),
        };
        {
            let _gate = self.journal_gate.read().await;
            if let Err(e) = self.journal_append(&event).await {
                // Undo the calendar insert before surfacing the error.
                if let Err(undo) = guard.remove_booking(booking.id) {
                    error!("rollback of {} on {} failed: {undo}", booking.id, booking.item_id);
                }
                warn!("rolled back {} on {}: {e}", booking.id, booking.item_id);
                metrics::counter!(observability::ROLLBACKS_TOTAL).increment(1);
                return Err(e);
            }
            self.bookings.insert(booking.id, booking.clone());
        }
        drop(guard);

        self.notify.send(&event);
        Ok(booking)
    }

    /// Release the booking's range. Cancelling twice is a no-op.
    pub async fn cancel(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(booking_id, Transition::Cancel).await
    }

    /// Payment window elapsed. Only unpaid bookings expire; a confirmed
    /// booking is an `InvalidTransition`.
    pub async fn expire(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(booking_id, Transition::Expire).await
    }

    /// Payment captured.
    pub async fn confirm(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(booking_id, Transition::Confirm).await
    }

    /// Rental returned. The range stays on the calendar as history.
    pub async fn complete(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(booking_id, Transition::Complete).await
    }

    pub async fn transition(&self, booking_id: Ulid, transition: Transition) -> Result<Booking, EngineError> {
        let item_id = self
            .bookings
            .get(&booking_id)
            .map(|b| b.item_id.clone())
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let cal = self.calendar.handle(&item_id);
        let mut guard = cal.write().await;

        // Re-read under the lock: another caller may have moved it meanwhile.
        let from = self
            .bookings
            .get(&booking_id)
            .map(|b| b.status)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        if transition.check(booking_id, from)? {
            let event = transition.event(booking_id, item_id.clone(), now_ms());
            self.persist_and_apply(&mut guard, &event).await?;

            if from == BookingStatus::PendingPayment {
                metrics::gauge!(observability::PENDING_BOOKINGS).decrement(1.0);
            }
            match transition {
                Transition::Cancel | Transition::Expire => {
                    let reason = if transition == Transition::Cancel { "cancelled" } else { "expired" };
                    metrics::counter!(observability::RELEASES_TOTAL, "reason" => reason).increment(1);
                    info!("released {booking_id} on {item_id} ({reason})");
                }
                Transition::Confirm | Transition::Complete => {
                    info!("{booking_id} on {item_id} is now {}", transition.target());
                }
            }
        }

        self.bookings
            .get(&booking_id)
            .map(|b| b.value().clone())
            .ok_or(EngineError::BookingNotFound(booking_id))
    }

    /// Mark `range` unavailable on an item. Existing bookings inside it are
    /// left alone and logged for follow-up.
    pub async fn add_blackout(&self, item_id: &str, range: Span) -> Result<Ulid, EngineError> {
        validate_id("item_id", item_id)?;
        validate_blackout_span(&range)?;
        let item = self.lookup_item(item_id).await?;

        let cal = self.calendar.handle(&item.id);
        let mut guard = cal.write().await;
        let stranded = guard
            .bookings()
            .iter()
            .filter(|b| b.span.overlaps(&range))
            .count();
        if stranded > 0 {
            warn!("blackout {range} on {} overlaps {stranded} existing booking(s)", item.id);
        }

        let id = Ulid::new();
        // Calendar first so a full calendar never reaches the journal.
        guard.insert_blackout(id, range)?;

        let event = Event::BlackoutAdded {
            id,
            item_id: item.id.clone(),
            span: range,
        };
        {
            let _gate = self.journal_gate.read().await;
            if let Err(e) = self.journal_append(&event).await {
                if let Err(undo) = guard.remove_blackout(id) {
                    error!("rollback of blackout {id} on {} failed: {undo}", item.id);
                }
                warn!("rolled back blackout {id} on {}: {e}", item.id);
                metrics::counter!(observability::ROLLBACKS_TOTAL).increment(1);
                return Err(e);
            }
            self.blackouts.insert(id, (item.id.clone(), range));
        }
        drop(guard);

        self.notify.send(&event);
        info!("blackout {id} added on {} {range}", item.id);
        Ok(id)
    }

    pub async fn remove_blackout(&self, blackout_id: Ulid) -> Result<Span, EngineError> {
        let item_id = self
            .blackouts
            .get(&blackout_id)
            .map(|b| b.0.clone())
            .ok_or(EngineError::BlackoutNotFound(blackout_id))?;
        let cal = self.calendar.handle(&item_id);
        let mut guard = cal.write().await;

        let span = guard
            .blackouts()
            .iter()
            .find(|b| b.id == blackout_id)
            .map(|b| b.span)
            .ok_or(EngineError::BlackoutNotFound(blackout_id))?;
        let event = Event::BlackoutRemoved {
            id: blackout_id,
            item_id: item_id.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("blackout {blackout_id} removed from {item_id}");
        Ok(span)
    }

    /// Rewrite the journal with the minimal event set for the current state.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _gate = self.journal_gate.write().await;

        let mut blackouts: Vec<(Ulid, ItemId, Span)> = self
            .blackouts
            .iter()
            .map(|e| (*e.key(), e.value().0.clone(), e.value().1))
            .collect();
        blackouts.sort_by_key(|b| b.0);

        let mut bookings: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        bookings.sort_by_key(|b| b.id);

        // Bookings carry their current status, so cancelled ones stay
        // queryable without holding calendar space.
        let mut events: Vec<Event> = blackouts
            .into_iter()
            .map(|(id, item_id, span)| Event::BlackoutAdded { id, item_id, span })
            .collect();
        events.extend(bookings.into_iter().map(|booking| Event::BookingReserved { booking }));
        let count = events.len();

        self.journal
            .compact(events)
            .await
            .map_err(|e| EngineError::Journal(e.to_string()))?;
        info!("journal compacted to {count} event(s)");
        Ok(())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        self.journal.appends_since_compact().await
    }
}
