use chrono::{NaiveDate, NaiveDateTime, Timelike};

use crate::model::*;

// ── Slot Algorithm ────────────────────────────────────────────────

/// Invariant violations in the calculator's inputs. These come from
/// malformed business configuration, not from the end customer, and are
/// surfaced as validation errors to the configuration side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotsError {
    InvalidHours {
        weekday: u8,
        start: Minutes,
        end: Minutes,
    },
    InvalidDuration(Minutes),
    InvalidGranularity(Minutes),
}

impl std::fmt::Display for SlotsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotsError::InvalidHours { weekday, start, end } => write!(
                f,
                "weekday {weekday} hours are malformed: start {} >= end {}",
                minutes_to_hhmm(*start),
                minutes_to_hhmm(*end)
            ),
            SlotsError::InvalidDuration(d) => {
                write!(f, "service duration must be positive, got {d}")
            }
            SlotsError::InvalidGranularity(g) => {
                write!(f, "slot granularity must be positive, got {g}")
            }
        }
    }
}

impl std::error::Error for SlotsError {}

/// Round up to the next multiple of `step`. A slot may never start earlier
/// than the notice deadline, so this is a ceiling, not a floor.
fn ceil_to(value: Minutes, step: Minutes) -> Minutes {
    // Equivalent to the (still-unstable for signed integers) `i64::div_ceil`:
    // division rounded toward positive infinity.
    let d = value / step;
    let r = value % step;
    let div_ceil = if (r > 0 && step > 0) || (r < 0 && step < 0) {
        d + 1
    } else {
        d
    };
    div_ceil * step
}

/// Compute the bookable slots for one business day.
///
/// Pure function of configuration + busy intervals + requested date and
/// duration; `now` is passed in explicitly so results are deterministic.
/// Busy intervals are the raw `[start, end)` spans of live bookings, in any
/// order; only the candidate block is widened by the buffer.
///
/// Past dates and closed days (explicit or by the default-weekend policy)
/// yield an empty list. Candidates whose block would run past closing are
/// dropped entirely, not offered as unavailable.
pub fn compute_slots(
    config: &SchedulingConfig,
    hours: &WeeklyHours,
    busy: &[Span],
    date: NaiveDate,
    service_duration: Minutes,
    now: NaiveDateTime,
) -> Result<Vec<TimeSlot>, SlotsError> {
    if service_duration <= 0 {
        return Err(SlotsError::InvalidDuration(service_duration));
    }
    if config.slot_minutes <= 0 {
        return Err(SlotsError::InvalidGranularity(config.slot_minutes));
    }

    let today = now.date();
    if date < today {
        return Ok(Vec::new());
    }

    let weekday = weekday_of(date);
    let (open, close) = match hours.resolve(weekday) {
        DayHours::Closed => return Ok(Vec::new()),
        DayHours::Open { start, end } => {
            if start >= end {
                return Err(SlotsError::InvalidHours { weekday, start, end });
            }
            (start, end)
        }
    };

    // The span that must be collision-free for the slot to be offered.
    // Only the service duration is stored on the booking; the buffer keeps
    // the next booking from starting too soon after this one ends.
    let block = service_duration + config.buffer_minutes;

    let mut earliest = open;
    if date == today {
        let now_minutes =
            now.time().hour() as Minutes * 60 + now.time().minute() as Minutes;
        let deadline = now_minutes + config.min_notice_hours * 60;
        earliest = ceil_to(earliest.max(deadline), config.slot_minutes);
    }

    let mut slots = Vec::new();
    let mut candidate = earliest;
    while candidate < close {
        if candidate + block > close {
            break;
        }
        let span = Span::new(candidate, candidate + block);
        let available = !busy.iter().any(|b| span.overlaps(b));
        slots.push(TimeSlot {
            start: candidate,
            available,
        });
        candidate += config.slot_minutes;
    }

    Ok(slots)
}
