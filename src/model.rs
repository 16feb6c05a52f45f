use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since midnight — the only intra-day time type.
pub type Minutes = i64;

/// Half-open interval `[start, end)` in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minutes,
    pub end: Minutes,
}

impl Span {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minutes {
        self.end - self.start
    }

    /// Open-interval overlap: touching endpoints do not conflict, so
    /// back-to-back bookings are legal when the buffer is zero.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Parse `"HH:MM"` into minutes since midnight.
pub fn hhmm_to_minutes(s: &str) -> Option<Minutes> {
    let (h, m) = s.split_once(':')?;
    let h: Minutes = h.parse().ok()?;
    let m: Minutes = m.parse().ok()?;
    if !(0..24).contains(&h) || !(0..60).contains(&m) {
        return None;
    }
    Some(h * 60 + m)
}

pub fn minutes_to_hhmm(minutes: Minutes) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Weekday index with Sunday = 0, matching the stored `day_of_week` column.
pub fn weekday_of(date: NaiveDate) -> u8 {
    use chrono::Datelike;
    date.weekday().num_days_from_sunday() as u8
}

// ── Scheduling policy ────────────────────────────────────────────

/// Per-business slot policy. Read fresh on every availability request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Idle gap enforced after a booking's service time, minutes.
    pub buffer_minutes: Minutes,
    /// Minimum lead time for same-day bookings, hours.
    pub min_notice_hours: i64,
    /// Candidate slot spacing, minutes.
    pub slot_minutes: Minutes,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            buffer_minutes: 0,
            min_notice_hours: 1,
            slot_minutes: 15,
        }
    }
}

/// One weekday's opening window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayHours {
    Closed,
    Open { start: Minutes, end: Minutes },
}

pub const DEFAULT_DAY_START: Minutes = 9 * 60;
pub const DEFAULT_DAY_END: Minutes = 18 * 60;

/// Fallback policy for weekdays with no configured hours row:
/// Mon–Fri 09:00–18:00, Sat/Sun closed. Applied per weekday.
pub fn default_hours(weekday: u8) -> DayHours {
    match weekday {
        1..=5 => DayHours::Open {
            start: DEFAULT_DAY_START,
            end: DEFAULT_DAY_END,
        },
        _ => DayHours::Closed,
    }
}

/// Weekly opening hours: one optional override per weekday (0 = Sunday).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyHours {
    days: [Option<DayHours>; 7],
}

impl WeeklyHours {
    pub fn set(&mut self, weekday: u8, hours: DayHours) {
        self.days[weekday as usize] = Some(hours);
    }

    pub fn clear(&mut self, weekday: u8) {
        self.days[weekday as usize] = None;
    }

    pub fn override_for(&self, weekday: u8) -> Option<DayHours> {
        self.days[weekday as usize]
    }

    /// The effective window for a weekday, falling back to the default
    /// policy when no row is configured.
    pub fn resolve(&self, weekday: u8) -> DayHours {
        self.days[weekday as usize].unwrap_or_else(|| default_hours(weekday))
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    /// Live bookings occupy calendar space and block availability.
    pub fn is_live(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "no_show" => Some(BookingStatus::NoShow),
            _ => None,
        }
    }

    /// `pending → confirmed → completed`, with cancellation and no-show as
    /// terminal alternates out of either live state.
    pub fn can_transition(&self, to: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, to),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Pending, NoShow)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
                | (Confirmed, NoShow)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// Add-on row snapshot attached to a booking (price at booking time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingAddOn {
    pub option_id: Ulid,
    pub price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingAnswer {
    pub question_id: Ulid,
    pub answer: String,
}

/// The committed booking entity. Occupies `[start, end)` on `date`; the
/// buffer is not stored, it only widens the collision span at write time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub business_id: Ulid,
    pub service_id: Ulid,
    pub contact: ContactInfo,
    pub date: NaiveDate,
    pub start: Minutes,
    pub duration: Minutes,
    pub end: Minutes,
    pub base_price_cents: i64,
    pub total_price_cents: i64,
    pub add_ons: Vec<BookingAddOn>,
    pub answers: Vec<BookingAnswer>,
    pub status: BookingStatus,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

/// What the public wizard submits to create a booking. The engine resolves
/// duration and prices from the catalog; the client never supplies them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub business_id: Ulid,
    pub service_id: Ulid,
    pub contact: ContactInfo,
    pub date: NaiveDate,
    pub start: Minutes,
    pub add_on_ids: Vec<Ulid>,
    pub answers: Vec<(Ulid, String)>,
}

/// Service duration assumed when an availability query omits one.
pub const DEFAULT_SERVICE_DURATION: Minutes = 60;

/// A candidate appointment start with its computed availability flag.
/// Ephemeral — recomputed per request, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlot {
    pub start: Minutes,
    pub available: bool,
}

impl TimeSlot {
    pub fn time(&self) -> String {
        minutes_to_hhmm(self.start)
    }
}

// ── Catalog entities ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub duration_minutes: Minutes,
    pub price_cents: i64,
}

/// A bookable add-on ("options" table in the dialect).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOn {
    pub id: Ulid,
    pub name: String,
    pub price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: Ulid,
    pub text: String,
    pub required: bool,
}

// ── Business state ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BusinessState {
    pub id: Ulid,
    pub name: Option<String>,
    pub config: SchedulingConfig,
    pub hours: WeeklyHours,
    pub services: Vec<Service>,
    pub add_ons: Vec<AddOn>,
    pub questions: Vec<Question>,
    /// All bookings, sorted by `(date, start)`.
    pub bookings: Vec<Booking>,
}

impl BusinessState {
    pub fn new(id: Ulid, name: Option<String>, config: SchedulingConfig) -> Self {
        Self {
            id,
            name,
            config,
            hours: WeeklyHours::default(),
            services: Vec::new(),
            add_ons: Vec::new(),
            questions: Vec::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining `(date, start)` order.
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.date, booking.start);
        let pos = self
            .bookings
            .partition_point(|b| (b.date, b.start) <= key);
        self.bookings.insert(pos, booking);
    }

    /// Bookings on a single date, in start order.
    pub fn bookings_on(&self, date: NaiveDate) -> &[Booking] {
        let lo = self.bookings.partition_point(|b| b.date < date);
        let hi = self.bookings.partition_point(|b| b.date <= date);
        &self.bookings[lo..hi]
    }

    /// Blocked ranges for a date: live bookings only. Cancelled and no-show
    /// bookings keep their rows but stop occupying the calendar.
    pub fn busy_intervals(&self, date: NaiveDate) -> Vec<Span> {
        self.bookings_on(date)
            .iter()
            .filter(|b| b.status.is_live())
            .map(Booking::span)
            .collect()
    }

    pub fn find_service(&self, id: Ulid) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn find_add_on(&self, id: Ulid) -> Option<&AddOn> {
        self.add_ons.iter().find(|o| o.id == id)
    }

    pub fn find_question(&self, id: Ulid) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    pub fn find_booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn find_booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BusinessCreated {
        id: Ulid,
        name: Option<String>,
        config: SchedulingConfig,
    },
    BusinessUpdated {
        id: Ulid,
        name: Option<String>,
        config: SchedulingConfig,
    },
    BusinessDeleted {
        id: Ulid,
    },
    HoursSet {
        business_id: Ulid,
        weekday: u8,
        hours: DayHours,
    },
    HoursCleared {
        business_id: Ulid,
        weekday: u8,
    },
    ServiceAdded {
        business_id: Ulid,
        service: Service,
    },
    ServiceRemoved {
        id: Ulid,
        business_id: Ulid,
    },
    AddOnAdded {
        business_id: Ulid,
        add_on: AddOn,
    },
    AddOnRemoved {
        id: Ulid,
        business_id: Ulid,
    },
    QuestionAdded {
        business_id: Ulid,
        question: Question,
    },
    QuestionRemoved {
        id: Ulid,
        business_id: Ulid,
    },
    /// One event carries the booking row plus its add-on and answer rows,
    /// so the whole unit commits or none of it does.
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        business_id: Ulid,
        status: BookingStatus,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub config: SchedulingConfig,
}
