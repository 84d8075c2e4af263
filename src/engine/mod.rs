mod availability;
mod calendar;
mod conflict;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::{Availability, is_available};
pub(crate) use conflict::now_ms;
pub use calendar::{CalendarIndex, ItemCalendar, SharedCalendar};
pub use error::EngineError;
pub use mutations::Transition;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::catalog::{CollaboratorError, Collaborators};
use crate::config::EngineConfig;
use crate::journal::Journal;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::pricing::{PriceCalculator, PricingConfig};

/// The booking reservation engine.
///
/// Per-item calendars live behind their own locks in `calendar`. The booking
/// ledger and blackout registry are flat maps updated only while the owning
/// item's write lock is held, so they always agree with the calendars.
pub struct Engine {
    pub calendar: CalendarIndex,
    pub notify: Arc<NotifyHub>,
    pub(super) bookings: DashMap<Ulid, Booking>,
    /// Blackout id → (item, span), for removal and compaction.
    pub(super) blackouts: DashMap<Ulid, (ItemId, Span)>,
    pub(super) journal: Arc<dyn Journal>,
    /// Held shared by every journal write, exclusively by compaction, so a
    /// snapshot never misses an in-flight event.
    pub(super) journal_gate: RwLock<()>,
    pub(super) collaborators: Collaborators,
    pub(super) calculator: PriceCalculator,
    pub(super) config: EngineConfig,
}

impl Engine {
    pub fn new(
        journal: Arc<dyn Journal>,
        collaborators: Collaborators,
        pricing: PricingConfig,
        config: EngineConfig,
    ) -> Self {
        Self {
            calendar: CalendarIndex::new(),
            notify: Arc::new(NotifyHub::new()),
            bookings: DashMap::new(),
            blackouts: DashMap::new(),
            journal,
            journal_gate: RwLock::new(()),
            collaborators,
            calculator: PriceCalculator::new(pricing),
            config,
        }
    }

    /// Rebuild calendars and ledger from previously journaled events.
    pub fn restore(
        events: &[Event],
        journal: Arc<dyn Journal>,
        collaborators: Collaborators,
        pricing: PricingConfig,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let engine = Self::new(journal, collaborators, pricing, config);
        for event in events {
            let cal = engine.calendar.handle(event.item_id());
            // Sole owner of every lock during restore, so try_write never waits.
            // Never block here: restore may run inside the runtime.
            let mut guard = cal
                .try_write()
                .map_err(|_| EngineError::Journal("calendar locked during restore".into()))?;
            engine.apply_event(&mut guard, event)?;
        }
        let pending = engine
            .bookings
            .iter()
            .filter(|b| b.status == BookingStatus::PendingPayment)
            .count();
        metrics::gauge!(observability::PENDING_BOOKINGS).set(pending as f64);
        tracing::info!(
            "restored {} event(s): {} booking(s), {} blackout(s)",
            events.len(),
            engine.bookings.len(),
            engine.blackouts.len()
        );
        Ok(engine)
    }

    pub fn pricing(&self) -> &PriceCalculator {
        &self.calculator
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply an event to the item calendar and ledger. Caller holds the
    /// item's write lock.
    pub(super) fn apply_event(&self, cal: &mut ItemCalendar, event: &Event) -> Result<(), EngineError> {
        match event {
            Event::BlackoutAdded { id, item_id, span } => {
                cal.insert_blackout(*id, *span)?;
                self.blackouts.insert(*id, (item_id.clone(), *span));
            }
            Event::BlackoutRemoved { id, .. } => {
                cal.remove_blackout(*id)?;
                self.blackouts.remove(id);
            }
            Event::BookingReserved { booking } => {
                if booking.status.holds_calendar() {
                    cal.insert_booking(booking.id, booking.range)?;
                }
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingConfirmed { id, at, .. } => {
                self.set_status(*id, BookingStatus::Confirmed, *at)?;
            }
            Event::BookingCompleted { id, at, .. } => {
                self.set_status(*id, BookingStatus::Completed, *at)?;
            }
            Event::BookingCancelled { id, at, .. } | Event::BookingExpired { id, at, .. } => {
                cal.remove_booking(*id)?;
                self.set_status(*id, BookingStatus::Cancelled, *at)?;
            }
        }
        Ok(())
    }

    fn set_status(&self, id: Ulid, status: BookingStatus, at: Ms) -> Result<(), EngineError> {
        let mut booking = self
            .bookings
            .get_mut(&id)
            .ok_or(EngineError::BookingNotFound(id))?;
        booking.status = status;
        booking.updated_at = at;
        Ok(())
    }

    /// Durably journal an event without applying it.
    pub(super) async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        self.journal
            .append(event)
            .await
            .map_err(|e| EngineError::Journal(e.to_string()))
    }

    /// Journal + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        cal: &mut ItemCalendar,
        event: &Event,
    ) -> Result<(), EngineError> {
        {
            let _gate = self.journal_gate.read().await;
            self.journal_append(event).await?;
            self.apply_event(cal, event)?;
        }
        self.notify.send(event);
        Ok(())
    }

    /// Run one collaborator call under the configured timeout.
    pub(super) async fn consult<T>(
        &self,
        collaborator: &'static str,
        call: impl Future<Output = Result<T, CollaboratorError>>,
    ) -> Result<T, EngineError> {
        let limit = Duration::from_millis(self.config.collaborator_timeout_ms);
        let reason = match tokio::time::timeout(limit, call).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}ms", limit.as_millis()),
        };
        tracing::warn!("{collaborator} collaborator failed: {reason}");
        metrics::counter!(observability::COLLABORATOR_FAILURES_TOTAL, "collaborator" => collaborator)
            .increment(1);
        // Callers only learn which collaborator failed; the detail stays in the log.
        Err(EngineError::PricingUnavailable(collaborator.to_string()))
    }

    /// Fetch an item from inventory; unknown ids are `ItemNotFound`.
    pub(super) async fn lookup_item(&self, item_id: &str) -> Result<InventoryItem, EngineError> {
        self.consult("inventory", self.collaborators.inventory.get_item(item_id))
            .await?
            .ok_or_else(|| EngineError::ItemNotFound(item_id.to_string()))
    }

    /// Turnaround gap for `item`: its own override, else the engine default.
    pub fn buffer_hours_for(&self, item: &InventoryItem) -> u32 {
        item.buffer_hours.unwrap_or(self.config.buffer_hours)
    }
}
