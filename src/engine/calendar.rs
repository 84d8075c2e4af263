use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::MAX_INTERVALS_PER_ITEM;
use crate::model::*;

use super::EngineError;

pub type SharedCalendar = Arc<RwLock<ItemCalendar>>;

/// Committed bookings and blackouts for one item.
#[derive(Debug, Clone)]
pub struct ItemCalendar {
    pub item_id: ItemId,
    /// Sorted by `span.start` and pairwise disjoint, so ends are sorted too.
    bookings: Vec<Interval>,
    /// Sorted by `span.start`; may overlap each other and bookings.
    blackouts: Vec<Interval>,
}

impl ItemCalendar {
    pub fn new(item_id: impl Into<ItemId>) -> Self {
        Self {
            item_id: item_id.into(),
            bookings: Vec::new(),
            blackouts: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bookings.len() + self.blackouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bookings(&self) -> &[Interval] {
        &self.bookings
    }

    pub fn blackouts(&self) -> &[Interval] {
        &self.blackouts
    }

    /// Committed bookings overlapping `query`: two binary searches, no scan.
    fn overlapping_bookings(&self, query: &Span) -> &[Interval] {
        let lo = self.bookings.partition_point(|i| i.span.end <= query.start);
        let hi = self.bookings.partition_point(|i| i.span.start < query.end);
        &self.bookings[lo..hi.max(lo)]
    }

    /// Blackouts overlapping `query`. Everything at index >= right_bound starts
    /// at or after `query.end` and can't overlap.
    fn overlapping_blackouts(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .blackouts
            .partition_point(|i| i.span.start < query.end);
        self.blackouts[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }

    /// Every committed or blackout interval overlapping `query`, by start time.
    pub fn query_overlaps(&self, query: &Span) -> Vec<Interval> {
        let mut hits: Vec<Interval> = self.overlapping_bookings(query).to_vec();
        hits.extend(self.overlapping_blackouts(query).copied());
        hits.sort_by_key(|i| i.span.start);
        hits
    }

    /// Commit a booking range. Re-validates exclusivity against other bookings
    /// so the no-overlap invariant holds regardless of the caller.
    pub fn insert_booking(&mut self, booking_id: Ulid, span: Span) -> Result<(), EngineError> {
        if self.len() >= MAX_INTERVALS_PER_ITEM {
            return Err(EngineError::LimitExceeded("too many intervals on item"));
        }
        let clashes = self.overlapping_bookings(&span);
        if !clashes.is_empty() {
            return Err(EngineError::Conflict {
                item_id: self.item_id.clone(),
                conflicts: clashes.iter().map(|i| i.span).collect(),
            });
        }
        let pos = self.bookings.partition_point(|i| i.span.start < span.start);
        self.bookings.insert(
            pos,
            Interval {
                id: booking_id,
                span,
                kind: IntervalKind::Booking,
            },
        );
        Ok(())
    }

    pub fn remove_booking(&mut self, booking_id: Ulid) -> Result<Span, EngineError> {
        let pos = self
            .bookings
            .iter()
            .position(|i| i.id == booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        Ok(self.bookings.remove(pos).span)
    }

    pub fn insert_blackout(&mut self, id: Ulid, span: Span) -> Result<(), EngineError> {
        if self.len() >= MAX_INTERVALS_PER_ITEM {
            return Err(EngineError::LimitExceeded("too many intervals on item"));
        }
        let pos = self.blackouts.partition_point(|i| i.span.start <= span.start);
        self.blackouts.insert(
            pos,
            Interval {
                id,
                span,
                kind: IntervalKind::Blackout,
            },
        );
        Ok(())
    }

    pub fn remove_blackout(&mut self, id: Ulid) -> Result<Span, EngineError> {
        let pos = self
            .blackouts
            .iter()
            .position(|i| i.id == id)
            .ok_or(EngineError::BlackoutNotFound(id))?;
        Ok(self.blackouts.remove(pos).span)
    }
}

/// Keyed lock registry: one `RwLock<ItemCalendar>` per item, created on first
/// use. Locks for different items never contend.
#[derive(Default)]
pub struct CalendarIndex {
    items: DashMap<ItemId, SharedCalendar>,
}

impl CalendarIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock handle for `item_id`, creating an empty calendar if needed.
    pub fn handle(&self, item_id: &str) -> SharedCalendar {
        if let Some(entry) = self.items.get(item_id) {
            return entry.value().clone();
        }
        self.items
            .entry(item_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(ItemCalendar::new(item_id))))
            .value()
            .clone()
    }

    pub fn get(&self, item_id: &str) -> Option<SharedCalendar> {
        self.items.get(item_id).map(|e| e.value().clone())
    }

    /// Items that have a calendar, sorted.
    pub fn item_ids(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self.items.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub async fn query_overlaps(&self, item_id: &str, range: &Span) -> Vec<Interval> {
        match self.get(item_id) {
            Some(cal) => cal.read().await.query_overlaps(range),
            None => Vec::new(),
        }
    }

    pub async fn insert(&self, item_id: &str, range: Span, booking_id: Ulid) -> Result<(), EngineError> {
        let cal = self.handle(item_id);
        let mut guard = cal.write().await;
        guard.insert_booking(booking_id, range)
    }

    pub async fn remove(&self, item_id: &str, booking_id: Ulid) -> Result<Span, EngineError> {
        let cal = self
            .get(item_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let mut guard = cal.write().await;
        guard.remove_booking(booking_id)
    }
}
