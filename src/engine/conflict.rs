use chrono::{NaiveDate, NaiveDateTime};

use crate::model::*;

use super::EngineError;

/// Ambient clock, read once per request at the engine boundary and passed
/// into the pure calculator from there.
pub(crate) fn now_naive() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Storage-level overlap guard.
///
/// Runs while the caller holds the business write lock, immediately before
/// the WAL append that commits the booking, so check and insert are one
/// serialized unit. `block` is the buffer-inclusive candidate span; existing
/// live bookings block with their raw `[start, end)`, and the predicate is
/// the same open-interval test the slot calculator uses.
pub(crate) fn check_no_conflict(
    state: &BusinessState,
    date: NaiveDate,
    block: &Span,
) -> Result<(), EngineError> {
    for booking in state.bookings_on(date) {
        if booking.status.is_live() && block.overlaps(&booking.span()) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Overlap(booking.id));
        }
    }
    Ok(())
}

/// Reject blocks on closed days or outside the day's window. Uses the same
/// per-weekday default-hours policy as slot generation.
pub(crate) fn check_within_hours(
    state: &BusinessState,
    date: NaiveDate,
    block: &Span,
) -> Result<(), EngineError> {
    let weekday = weekday_of(date);
    match state.hours.resolve(weekday) {
        DayHours::Closed => Err(EngineError::Validation(format!(
            "business is closed on {date}"
        ))),
        DayHours::Open { start, end } => {
            if start >= end {
                return Err(EngineError::Validation(format!(
                    "weekday {weekday} hours are malformed"
                )));
            }
            if block.start < start || block.end > end {
                return Err(EngineError::Validation(format!(
                    "slot {}-{} falls outside opening hours {}-{}",
                    minutes_to_hhmm(block.start),
                    minutes_to_hhmm(block.end),
                    minutes_to_hhmm(start),
                    minutes_to_hhmm(end)
                )));
            }
            Ok(())
        }
    }
}
