use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::money::Money;

/// Unix milliseconds. Every timestamp in the engine uses this.
pub type Ms = i64;

pub const SECOND_MS: Ms = 1_000;
pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 24 * HOUR_MS;

pub type ItemId = String;
pub type CustomerId = String;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Like `new`, but returns `None` for empty or inverted input.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Billable days: partial days round up, so 26 hours is 2 days.
    pub fn billable_days(&self) -> i64 {
        (self.duration_ms() + DAY_MS - 1) / DAY_MS
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Grow the span by `by` on both sides.
    pub fn expand(&self, by: Ms) -> Span {
        Span::new(self.start.saturating_sub(by), self.end.saturating_add(by))
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Service level, keys the tier multiplier table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Standard,
    Premium,
    Elite,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Standard, Tier::Premium, Tier::Elite];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Standard => "standard",
            Tier::Premium => "premium",
            Tier::Elite => "elite",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "standard" => Ok(Tier::Standard),
            "premium" => Ok(Tier::Premium),
            "elite" => Ok(Tier::Elite),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemCategory {
    Car,
    Yacht,
    Jet,
    Villa,
    Other,
}

/// Shortest rental an item accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimumRental {
    #[serde(default)]
    pub days: u32,
    #[serde(default)]
    pub hours: u32,
}

impl MinimumRental {
    pub fn duration_ms(&self) -> Ms {
        self.days as Ms * DAY_MS + self.hours as Ms * HOUR_MS
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: ItemId,
    pub category: ItemCategory,
    pub brand: String,
    pub model: String,
    pub year: u16,
    pub daily_rate: Money,
    pub currency: String,
    #[serde(default)]
    pub minimum_rental: MinimumRental,
    pub locations: BTreeSet<String>,
    /// Turnaround time between rentals; falls back to the engine default.
    #[serde(default)]
    pub buffer_hours: Option<u32>,
}

impl InventoryItem {
    pub fn serves(&self, location: &str) -> bool {
        self.locations.contains(location)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOnLine {
    pub addon_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingRequest {
    pub item_id: ItemId,
    pub range: Span,
    pub tier: Tier,
    #[serde(default)]
    pub add_ons: Vec<AddOnLine>,
    pub pickup_location: String,
    pub dropoff_location: String,
}

/// Itemized price. Money fields are whole cents; `total` excludes the
/// refundable deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub base_price: Money,
    pub duration_days: i64,
    pub tier_multiplier: Decimal,
    pub seasonal_multiplier: Decimal,
    pub subtotal: Money,
    pub add_ons_total: Money,
    pub service_fee: Money,
    pub insurance: Money,
    pub taxes: Money,
    pub security_deposit: Money,
    pub total: Money,
    pub currency: String,
}

impl PriceBreakdown {
    /// Sum of the charged components, which `total` must always equal.
    pub fn itemized_sum(&self) -> Option<Money> {
        self.subtotal
            .checked_add(self.add_ons_total)?
            .checked_add(self.service_fee)?
            .checked_add(self.insurance)?
            .checked_add(self.taxes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingPayment,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Whether a booking in this status occupies its calendar range.
    pub fn holds_calendar(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingPayment => "pending_payment",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub customer_id: CustomerId,
    pub item_id: ItemId,
    pub range: Span,
    pub price: PriceBreakdown,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// What a calendar interval represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalKind {
    /// Unavailable window owned by inventory management.
    Blackout,
    /// Range committed to a booking (pending payment or later).
    Booking,
}

/// A single interval on an item calendar. `id` is the blackout id or the
/// booking id, depending on `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub id: Ulid,
    pub span: Span,
    pub kind: IntervalKind,
}

/// Journal record. Replaying these in order rebuilds every calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BlackoutAdded {
        id: Ulid,
        item_id: ItemId,
        span: Span,
    },
    BlackoutRemoved {
        id: Ulid,
        item_id: ItemId,
    },
    BookingReserved {
        booking: Booking,
    },
    BookingConfirmed {
        id: Ulid,
        item_id: ItemId,
        at: Ms,
    },
    BookingCompleted {
        id: Ulid,
        item_id: ItemId,
        at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        item_id: ItemId,
        at: Ms,
    },
    BookingExpired {
        id: Ulid,
        item_id: ItemId,
        at: Ms,
    },
}

impl Event {
    pub fn item_id(&self) -> &str {
        match self {
            Event::BlackoutAdded { item_id, .. }
            | Event::BlackoutRemoved { item_id, .. }
            | Event::BookingConfirmed { item_id, .. }
            | Event::BookingCompleted { item_id, .. }
            | Event::BookingCancelled { item_id, .. }
            | Event::BookingExpired { item_id, .. } => item_id,
            Event::BookingReserved { booking } => &booking.item_id,
        }
    }
}
