use std::fmt;

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

/// Calendar day — the only date type. Stays are counted in nights between days.
pub type Day = NaiveDate;

/// Half-open range of days `[start, end)`. `end` is the check-out day and is not occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Day,
    pub end: Day,
}

impl DateRange {
    pub fn new(start: Day, end: Day) -> Self {
        debug_assert!(start < end, "DateRange start must be before end");
        Self { start, end }
    }

    /// `None` when `end <= start` (zero or negative nights).
    pub fn try_new(start: Day, end: Day) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// The one-night range `[day, day + 1)`.
    pub fn single(day: Day) -> Self {
        Self::new(day, day + Days::new(1))
    }

    pub fn nights(&self) -> u32 {
        (self.end - self.start).num_days() as u32
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_day(&self, day: Day) -> bool {
        self.start <= day && day < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_range(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Intersection with `window`, if any.
    pub fn clamp(&self, window: &DateRange) -> Option<DateRange> {
        DateRange::try_new(self.start.max(window.start), self.end.min(window.end))
    }

    /// Occupied nights, i.e. every day except the check-out day.
    pub fn days(&self) -> impl Iterator<Item = Day> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d < end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A price as the data layer hands it over: either a JSON number or a numeric string.
///
/// Kept verbatim and only parsed at pricing time so a malformed value surfaces as a
/// configuration error instead of leaking into arithmetic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Price(String);

impl Price {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Decimal> for Price {
    fn from(value: Decimal) -> Self {
        Self(value.to_string())
    }
}

impl From<u32> for Price {
    fn from(value: u32) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

struct PriceVisitor;

impl Visitor<'_> for PriceVisitor {
    type Value = Price;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number or a numeric string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Price, E> {
        Ok(Price(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Price, E> {
        Ok(Price(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Price, E> {
        Ok(Price(v.to_string()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Price, E> {
        Ok(Price(v.to_string()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Price, E> {
        Ok(Price(v.to_string()))
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // JSON may carry either shape; the WAL always stores the string form.
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(PriceVisitor)
        } else {
            deserializer.deserialize_string(PriceVisitor)
        }
    }
}

/// A bookable room type. `quantity` interchangeable physical units share one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub price_per_night: Price,
    pub price_double_occupancy: Option<Price>,
    pub price_triple_occupancy: Option<Price>,
    pub max_occupancy: u32,
    pub quantity: u32,
    pub is_active: bool,
    pub images: Vec<String>,
    pub amenities: Vec<String>,
}

impl Room {
    /// Units available for concurrent stays; never below one.
    pub fn units(&self) -> u32 {
        self.quantity.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Every status except `Cancelled` keeps its dates occupied.
    pub fn is_active(self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        self == next
            || matches!(
                (self, next),
                (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled) | (Confirmed, Completed)
            )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        self == next
            || matches!(
                (self, next),
                (Pending, Paid)
                    | (Pending, Failed)
                    | (Pending, Cancelled)
                    | (Failed, Pending)
                    | (Failed, Cancelled)
                    | (Failed, Paid)
                    | (Paid, Refunded)
            )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestContact {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub special_requests: Option<String>,
}

/// Gateway identifiers attached to a booking once money has moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReference {
    pub order_id: String,
    pub payment_id: String,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub stay: DateRange,
    pub num_guests: u32,
    pub booking_status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub guest: GuestContact,
    pub payment: Option<PaymentReference>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn check_in(&self) -> Day {
        self.stay.start
    }

    pub fn check_out(&self) -> Day {
        self.stay.end
    }

    pub fn calendar_event(&self) -> CalendarEvent {
        CalendarEvent::Booking {
            id: self.id,
            range: self.stay,
            status: self.booking_status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockSource {
    Manual,
    External,
}

/// Owner-imposed unavailability, independent of bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedDate {
    pub id: Ulid,
    pub room_id: Ulid,
    pub range: DateRange,
    pub source: BlockSource,
    pub reason: Option<String>,
}

impl BlockedDate {
    pub fn calendar_event(&self) -> CalendarEvent {
        CalendarEvent::Blocked {
            id: self.id,
            range: self.range,
            source: self.source,
        }
    }
}

/// A booking or a block projected onto the calendar. Derived, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CalendarEvent {
    Booking {
        id: Ulid,
        range: DateRange,
        status: BookingStatus,
    },
    Blocked {
        id: Ulid,
        range: DateRange,
        source: BlockSource,
    },
}

impl CalendarEvent {
    pub fn id(&self) -> Ulid {
        match self {
            CalendarEvent::Booking { id, .. } | CalendarEvent::Blocked { id, .. } => *id,
        }
    }

    pub fn range(&self) -> DateRange {
        match self {
            CalendarEvent::Booking { range, .. } | CalendarEvent::Blocked { range, .. } => *range,
        }
    }
}

#[derive(Debug)]
pub struct RoomState {
    pub room: Room,
    /// All bookings (any status) and blocks, sorted by `range.start`.
    pub intervals: Vec<CalendarEvent>,
    pub bookings: Vec<Booking>,
    pub blocks: Vec<BlockedDate>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            intervals: Vec::new(),
            bookings: Vec::new(),
            blocks: Vec::new(),
        }
    }

    /// Insert interval maintaining sort order by range.start.
    pub fn insert_interval(&mut self, event: CalendarEvent) {
        let start = event.range().start;
        let pos = self
            .intervals
            .binary_search_by_key(&start, |e| e.range().start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, event);
    }

    /// Remove interval by id.
    pub fn remove_interval(&mut self, id: Ulid) -> Option<CalendarEvent> {
        let pos = self.intervals.iter().position(|e| e.id() == id)?;
        Some(self.intervals.remove(pos))
    }

    /// Return only intervals whose range overlaps the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &CalendarEvent> {
        let right_bound = self
            .intervals
            .partition_point(|e| e.range().start < query.end);
        let start = query.start;
        self.intervals[..right_bound]
            .iter()
            .filter(move |e| e.range().end > start)
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Faq,
    HouseRule,
    Attraction,
    Feature,
}

/// FAQ, house rule, attraction or feature shown on the marketing pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEntry {
    pub id: Ulid,
    pub kind: ContentKind,
    pub title: String,
    pub body: String,
    pub sort_order: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceMode {
    pub enabled: bool,
    pub message: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
    pub secure: bool,
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from_email", &self.from_email)
            .field("from_name", &self.from_name)
            .field("secure", &self.secure)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminContact {
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SiteSettings {
    pub maintenance: MaintenanceMode,
    pub smtp: Option<SmtpConfig>,
    pub admin_contact: Option<AdminContact>,
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        room: Room,
    },
    RoomActiveSet {
        id: Ulid,
        active: bool,
    },
    BlockAdded {
        block: BlockedDate,
    },
    BlockRemoved {
        id: Ulid,
        room_id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        room_id: Ulid,
        booking_status: BookingStatus,
        payment_status: PaymentStatus,
    },
    ContentUpserted {
        entry: ContentEntry,
    },
    ContentDeleted {
        id: Ulid,
    },
    MaintenanceSet {
        enabled: bool,
        message: Option<String>,
    },
    SmtpConfigSet {
        config: SmtpConfig,
    },
    AdminContactSet {
        contact: AdminContact,
    },
}

impl Event {
    /// The room an event applies to, for room-scoped events.
    pub fn room_id(&self) -> Option<Ulid> {
        match self {
            Event::RoomCreated { room } | Event::RoomUpdated { room } => Some(room.id),
            Event::RoomActiveSet { id, .. } => Some(*id),
            Event::BlockAdded { block } => Some(block.room_id),
            Event::BookingCreated { booking } => Some(booking.room_id),
            Event::BlockRemoved { room_id, .. } | Event::BookingStatusChanged { room_id, .. } => {
                Some(*room_id)
            }
            Event::ContentUpserted { .. }
            | Event::ContentDeleted { .. }
            | Event::MaintenanceSet { .. }
            | Event::SmtpConfigSet { .. }
            | Event::AdminContactSet { .. } => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn day(y: i32, m: u32, d: u32) -> Day {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub fn range(start: Day, end: Day) -> DateRange {
        DateRange::new(start, end)
    }

    pub fn room(slug: &str, quantity: u32) -> Room {
        Room {
            id: Ulid::new(),
            name: format!("Room {slug}"),
            slug: slug.to_string(),
            description: None,
            price_per_night: Price::new("800"),
            price_double_occupancy: Some(Price::new("1000")),
            price_triple_occupancy: Some(Price::new("1200")),
            max_occupancy: 3,
            quantity,
            is_active: true,
            images: vec![],
            amenities: vec![],
        }
    }

    pub fn guest() -> GuestContact {
        GuestContact {
            name: "Asha Rao".into(),
            email: "asha@example.com".into(),
            phone: "+91 98765 43210".into(),
            special_requests: None,
        }
    }

    pub fn booking(room_id: Ulid, stay: DateRange, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            room_id,
            stay,
            num_guests: 2,
            booking_status: status,
            payment_status: PaymentStatus::Paid,
            total_amount: Decimal::from(2000),
            guest: guest(),
            payment: None,
            created_at: Utc::now(),
        }
    }

    pub fn booked(start: Day, end: Day) -> CalendarEvent {
        CalendarEvent::Booking {
            id: Ulid::new(),
            range: DateRange::new(start, end),
            status: BookingStatus::Confirmed,
        }
    }

    pub fn blocked(start: Day, end: Day) -> CalendarEvent {
        CalendarEvent::Blocked {
            id: Ulid::new(),
            range: DateRange::new(start, end),
            source: BlockSource::Manual,
        }
    }
}
