use std::fmt;

use serde::Serialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::compute_saturated_ranges;
use super::EngineError;

/// Why a candidate stay cannot be booked. `Display` renders the guest-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ConflictReason {
    SameDay { day: Day },
    CheckoutBeforeCheckin { check_in: Day, check_out: Day },
    PastDate { day: Day },
    TooLong { nights: u32, max: u32 },
    Blocked { id: Ulid, day: Day },
    Booked { id: Ulid, day: Day },
    FullyBooked { day: Day, quantity: u32 },
}

impl ConflictReason {
    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            ConflictReason::SameDay { .. } => "same_day",
            ConflictReason::CheckoutBeforeCheckin { .. } => "inverted_range",
            ConflictReason::PastDate { .. } => "past_date",
            ConflictReason::TooLong { .. } => "too_long",
            ConflictReason::Blocked { .. } => "blocked",
            ConflictReason::Booked { .. } | ConflictReason::FullyBooked { .. } => "booking",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::SameDay { .. } => {
                f.write_str("Check-out must be at least one night after check-in.")
            }
            ConflictReason::CheckoutBeforeCheckin { .. } => {
                f.write_str("Check-out date must be after the check-in date.")
            }
            ConflictReason::PastDate { day } => {
                write!(f, "{day} is in the past. Please choose an upcoming date.")
            }
            ConflictReason::TooLong { max, .. } => {
                write!(f, "Stays are limited to {max} nights. Please choose a shorter stay.")
            }
            ConflictReason::Blocked { day, .. } => write!(
                f,
                "The room is not available on {day}. Please choose different dates."
            ),
            ConflictReason::Booked { day, .. } => write!(
                f,
                "The room is already booked on {day}. Please choose different dates."
            ),
            ConflictReason::FullyBooked { day, .. } => write!(
                f,
                "All rooms of this type are booked on {day}. Please choose different dates."
            ),
        }
    }
}

/// Whether an event takes its dates out of circulation.
/// Blocks always do; bookings do unless cancelled, pending included.
pub fn is_blocking(event: &CalendarEvent) -> bool {
    match event {
        CalendarEvent::Blocked { .. } => true,
        CalendarEvent::Booking { status, .. } => status.is_active(),
    }
}

/// First reason `candidate` cannot be booked against `events`, if any.
///
/// Blocks win over bookings. With `quantity <= 1` any overlapping active booking
/// conflicts; with more units only nights where concurrent stays already fill every
/// unit do. Events need not be sorted.
pub fn find_conflict(
    candidate: &DateRange,
    events: &[CalendarEvent],
    quantity: u32,
) -> Option<ConflictReason> {
    let mut stays: Vec<(Ulid, DateRange)> = Vec::new();
    for event in events.iter().filter(|e| e.range().overlaps(candidate)) {
        match event {
            CalendarEvent::Blocked { id, range, .. } => {
                return Some(ConflictReason::Blocked {
                    id: *id,
                    day: range.start.max(candidate.start),
                });
            }
            CalendarEvent::Booking { status, .. } if !status.is_active() => {}
            CalendarEvent::Booking { id, range, .. } => stays.push((*id, *range)),
        }
    }
    if stays.is_empty() {
        return None;
    }

    let quantity = quantity.max(1);
    if quantity == 1 {
        return stays
            .iter()
            .min_by_key(|(_, r)| r.start)
            .map(|(id, r)| ConflictReason::Booked {
                id: *id,
                day: r.start.max(candidate.start),
            });
    }

    let ranges: Vec<DateRange> = stays.iter().map(|(_, r)| *r).collect();
    compute_saturated_ranges(&ranges, quantity)
        .into_iter()
        .find(|s| s.overlaps(candidate))
        .map(|s| ConflictReason::FullyBooked {
            day: s.start.max(candidate.start),
            quantity,
        })
}

/// `true` when any night of `[start, end)` is unavailable. A quantity of 0 counts as 1.
pub fn is_range_blocked(start: Day, end: Day, events: &[CalendarEvent], quantity: u32) -> bool {
    match DateRange::try_new(start, end) {
        Some(candidate) => find_conflict(&candidate, events, quantity).is_some(),
        None => true,
    }
}

/// Can a guest start a night on `day`?
pub fn is_day_blocked(day: Day, events: &[CalendarEvent], quantity: u32) -> bool {
    find_conflict(&DateRange::single(day), events, quantity).is_some()
}

/// Date-only checks that need no calendar data.
pub fn check_dates(check_in: Day, check_out: Day, today: Day) -> Result<DateRange, ConflictReason> {
    if check_in == check_out {
        return Err(ConflictReason::SameDay { day: check_in });
    }
    if check_out < check_in {
        return Err(ConflictReason::CheckoutBeforeCheckin { check_in, check_out });
    }
    if check_in < today {
        return Err(ConflictReason::PastDate { day: check_in });
    }
    let stay = DateRange::new(check_in, check_out);
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(ConflictReason::TooLong {
            nights: stay.nights(),
            max: MAX_STAY_NIGHTS,
        });
    }
    Ok(stay)
}

/// Full availability verdict for a candidate stay.
pub fn check_stay(
    check_in: Day,
    check_out: Day,
    today: Day,
    events: &[CalendarEvent],
    quantity: u32,
) -> Result<DateRange, ConflictReason> {
    let stay = check_dates(check_in, check_out, today)?;
    match find_conflict(&stay, events, quantity) {
        Some(reason) => Err(reason),
        None => Ok(stay),
    }
}

pub(crate) fn validate_stay(stay: &DateRange) -> Result<(), EngineError> {
    if stay.end <= stay.start {
        return Err(EngineError::InvalidBooking("check-out must be after check-in"));
    }
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

/// Conflict check against a room's stored intervals. Caller holds the room lock.
pub(crate) fn check_no_conflict(rs: &RoomState, stay: &DateRange) -> Result<(), EngineError> {
    let candidates: Vec<CalendarEvent> = rs.overlapping(stay).copied().collect();
    match find_conflict(stay, &candidates, rs.room.units()) {
        Some(reason) => Err(EngineError::Unavailable(reason)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::availability::is_date_fully_booked;
    use crate::model::fixtures::*;

    #[test]
    fn overlapping_candidates_are_blocked_checkout_day_is_free() {
        let events = vec![booked(day(2025, 7, 10), day(2025, 7, 12))];
        assert!(is_range_blocked(day(2025, 7, 10), day(2025, 7, 11), &events, 1));
        assert!(is_range_blocked(day(2025, 7, 11), day(2025, 7, 12), &events, 1));
        assert!(is_range_blocked(day(2025, 7, 9), day(2025, 7, 13), &events, 1));
        assert!(!is_range_blocked(day(2025, 7, 12), day(2025, 7, 13), &events, 1));
        assert!(!is_range_blocked(day(2025, 7, 8), day(2025, 7, 10), &events, 1));
    }

    #[test]
    fn booking_conflict_scenario() {
        let today = day(2025, 7, 1);
        let events = vec![booked(day(2025, 7, 10), day(2025, 7, 12))];

        let rejected = check_stay(day(2025, 7, 11), day(2025, 7, 13), today, &events, 1);
        assert!(matches!(rejected, Err(ConflictReason::Booked { day: d, .. }) if d == day(2025, 7, 11)));
        assert_eq!(rejected.unwrap_err().label(), "booking");

        // Check-in on the previous guest's check-out day.
        let accepted = check_stay(day(2025, 7, 12), day(2025, 7, 14), today, &events, 1);
        assert_eq!(accepted, Ok(range(day(2025, 7, 12), day(2025, 7, 14))));
    }

    #[test]
    fn same_day_rejected_regardless_of_data() {
        let today = day(2025, 7, 1);
        let d = day(2025, 7, 20);
        let events = vec![blocked(day(2025, 7, 1), day(2025, 8, 1))];
        assert_eq!(
            check_stay(d, d, today, &events, 1),
            Err(ConflictReason::SameDay { day: d })
        );
        assert_eq!(check_stay(d, d, today, &[], 1), Err(ConflictReason::SameDay { day: d }));
    }

    #[test]
    fn inverted_and_past_ranges_rejected() {
        let today = day(2025, 7, 10);
        assert!(matches!(
            check_stay(day(2025, 7, 15), day(2025, 7, 12), today, &[], 1),
            Err(ConflictReason::CheckoutBeforeCheckin { .. })
        ));
        assert_eq!(
            check_stay(day(2025, 7, 9), day(2025, 7, 12), today, &[], 1),
            Err(ConflictReason::PastDate { day: day(2025, 7, 9) })
        );
        // Today itself is bookable.
        assert!(check_stay(today, day(2025, 7, 11), today, &[], 1).is_ok());
    }

    #[test]
    fn stays_over_the_night_cap_rejected_without_calendar_data() {
        let today = day(2025, 7, 1);
        let check_in = day(2025, 7, 10);
        let longest = check_in + chrono::Days::new(MAX_STAY_NIGHTS as u64);
        assert!(check_dates(check_in, longest, today).is_ok());
        assert_eq!(
            check_dates(check_in, longest + chrono::Days::new(1), today),
            Err(ConflictReason::TooLong { nights: MAX_STAY_NIGHTS + 1, max: MAX_STAY_NIGHTS })
        );
        assert_eq!(
            check_stay(check_in, day(2025, 10, 18), today, &[], 1),
            Err(ConflictReason::TooLong { nights: 100, max: MAX_STAY_NIGHTS })
        );
    }

    #[test]
    fn blocks_take_precedence_over_bookings() {
        let events = vec![
            booked(day(2025, 7, 10), day(2025, 7, 12)),
            blocked(day(2025, 7, 11), day(2025, 7, 14)),
        ];
        let reason = find_conflict(&range(day(2025, 7, 9), day(2025, 7, 15)), &events, 1);
        assert!(matches!(reason, Some(ConflictReason::Blocked { day: d, .. }) if d == day(2025, 7, 11)));
        assert_eq!(reason.unwrap().label(), "blocked");
    }

    #[test]
    fn blocks_ignore_quantity() {
        let events = vec![blocked(day(2025, 7, 10), day(2025, 7, 11))];
        assert!(is_range_blocked(day(2025, 7, 10), day(2025, 7, 11), &events, 5));
    }

    #[test]
    fn cancelled_bookings_do_not_block() {
        let events = vec![CalendarEvent::Booking {
            id: Ulid::new(),
            range: range(day(2025, 7, 10), day(2025, 7, 12)),
            status: BookingStatus::Cancelled,
        }];
        assert!(!is_range_blocked(day(2025, 7, 10), day(2025, 7, 12), &events, 1));
    }

    #[test]
    fn multi_unit_room_blocks_only_when_full() {
        let events = vec![
            booked(day(2025, 7, 10), day(2025, 7, 13)),
            booked(day(2025, 7, 12), day(2025, 7, 15)),
        ];
        let candidate = range(day(2025, 7, 9), day(2025, 7, 16));
        assert_eq!(
            find_conflict(&candidate, &events, 2),
            Some(ConflictReason::FullyBooked { day: day(2025, 7, 12), quantity: 2 })
        );
        assert_eq!(find_conflict(&candidate, &events, 3), None);
        // Nights with a single occupied unit stay open.
        assert_eq!(find_conflict(&range(day(2025, 7, 10), day(2025, 7, 12)), &events, 2), None);
    }

    #[test]
    fn single_day_check_agrees_with_occupancy_counter() {
        let events = vec![
            booked(day(2025, 7, 1), day(2025, 7, 5)),
            booked(day(2025, 7, 3), day(2025, 7, 8)),
            booked(day(2025, 7, 4), day(2025, 7, 6)),
        ];
        for quantity in 1..=4 {
            for d in range(day(2025, 6, 28), day(2025, 7, 10)).days() {
                assert_eq!(
                    is_day_blocked(d, &events, quantity),
                    is_date_fully_booked(d, &events, quantity),
                    "day {d}, quantity {quantity}"
                );
            }
        }
    }

    #[test]
    fn empty_range_counts_as_blocked() {
        let d = day(2025, 7, 10);
        assert!(is_range_blocked(d, d, &[], 1));
    }

    #[test]
    fn reasons_render_guest_messages() {
        let reason = ConflictReason::Booked { id: Ulid::new(), day: day(2025, 7, 11) };
        assert!(reason.to_string().contains("2025-07-11"));
        let json = serde_json::to_value(ConflictReason::SameDay { day: day(2025, 7, 11) }).unwrap();
        assert_eq!(json["reason"], "same_day");
    }
}
