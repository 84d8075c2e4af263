use serde::{Deserialize, Serialize};

use crate::model::*;

use super::EngineError;
use super::calendar::ItemCalendar;
use super::conflict::check_minimum_rental;

/// Result of an availability check. `conflicts` are the stored ranges, not the
/// buffer-expanded ones, so callers can suggest alternatives from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    pub conflicts: Vec<Span>,
}

impl Availability {
    pub fn free() -> Self {
        Self {
            available: true,
            conflicts: Vec::new(),
        }
    }
}

/// Decide whether `range` is bookable on `calendar`.
///
/// The range is grown by `buffer_hours` on both sides before querying, which
/// keeps a turnaround gap between consecutive rentals. Committed bookings and
/// blackouts both count as conflicts.
pub fn is_available(
    calendar: &ItemCalendar,
    item: &InventoryItem,
    range: &Span,
    buffer_hours: u32,
) -> Result<Availability, EngineError> {
    check_minimum_rental(item, range)?;

    let expanded = range.expand(buffer_hours as Ms * HOUR_MS);
    let conflicts: Vec<Span> = calendar
        .query_overlaps(&expanded)
        .into_iter()
        .map(|interval| interval.span)
        .collect();

    Ok(Availability {
        available: conflicts.is_empty(),
        conflicts,
    })
}
