use chrono::NaiveDate;
use serde::Serialize;

use crate::model::*;

// ── Occupancy ─────────────────────────────────────────────────────

/// Number of active bookings whose stay covers `day`. The check-out day is not covered.
pub fn booked_count(day: Day, events: &[CalendarEvent]) -> u32 {
    events
        .iter()
        .filter(|e| match e {
            CalendarEvent::Booking { range, status, .. } => status.is_active() && range.contains_day(day),
            CalendarEvent::Blocked { .. } => false,
        })
        .count() as u32
}

/// True once every unit of the room is taken on `day`. A quantity of 0 counts as 1.
pub fn is_date_fully_booked(day: Day, events: &[CalendarEvent], quantity: u32) -> bool {
    booked_count(day, events) >= quantity.max(1)
}

/// How a single calendar cell renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DayStatus {
    Past,
    Blocked,
    FullyBooked,
    PartiallyBooked { booked: u32, quantity: u32 },
    Available,
}

impl DayStatus {
    /// Whether a guest may start a night on this day.
    pub fn is_selectable(&self) -> bool {
        matches!(self, DayStatus::Available | DayStatus::PartiallyBooked { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayCell {
    pub date: Day,
    #[serde(flatten)]
    pub status: DayStatus,
}

pub fn day_status(day: Day, today: Day, events: &[CalendarEvent], quantity: u32) -> DayStatus {
    if day < today {
        return DayStatus::Past;
    }
    let blocked = events.iter().any(|e| match e {
        CalendarEvent::Blocked { range, .. } => range.contains_day(day),
        CalendarEvent::Booking { .. } => false,
    });
    if blocked {
        return DayStatus::Blocked;
    }
    let quantity = quantity.max(1);
    match booked_count(day, events) {
        0 => DayStatus::Available,
        n if n >= quantity => DayStatus::FullyBooked,
        n => DayStatus::PartiallyBooked { booked: n, quantity },
    }
}

/// `[first of month, first of next month)`, or `None` for an invalid month.
pub fn month_range(year: i32, month: u32) -> Option<DateRange> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some(DateRange::new(first, next))
}

/// One cell per day of the month.
pub fn month_view(
    year: i32,
    month: u32,
    today: Day,
    events: &[CalendarEvent],
    quantity: u32,
) -> Option<Vec<DayCell>> {
    let month = month_range(year, month)?;
    Some(
        month
            .days()
            .map(|date| DayCell {
                date,
                status: day_status(date, today, events, quantity),
            })
            .collect(),
    )
}

/// Maximal ranges inside `window` where a new stay fits: blocks are subtracted outright,
/// bookings only where they saturate the room's units.
pub fn free_ranges(window: &DateRange, events: &[CalendarEvent], quantity: u32) -> Vec<DateRange> {
    let mut blocked: Vec<DateRange> = Vec::new();
    let mut booked: Vec<DateRange> = Vec::new();
    for event in events {
        match event {
            CalendarEvent::Blocked { range, .. } => {
                if let Some(r) = range.clamp(window) {
                    blocked.push(r);
                }
            }
            CalendarEvent::Booking { range, status, .. } if status.is_active() => booked.push(*range),
            CalendarEvent::Booking { .. } => {}
        }
    }

    booked.sort_by_key(|r| r.start);
    blocked.extend(compute_saturated_ranges(&booked, quantity.max(1)));
    blocked.sort_by_key(|r| r.start);
    let blocked = merge_overlapping(&blocked);

    subtract_ranges(&[*window], &blocked)
}

// ── Interval algebra ──────────────────────────────────────────────

/// Merge sorted overlapping/adjacent ranges into disjoint ranges.
pub fn merge_overlapping(sorted: &[DateRange]) -> Vec<DateRange> {
    let mut merged: Vec<DateRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start <= last.end {
                last.end = last.end.max(range.end);
                continue;
            }
        merged.push(range);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` ranges from sorted `base`.
pub fn subtract_ranges(base: &[DateRange], to_remove: &[DateRange]) -> Vec<DateRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(DateRange::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(DateRange::new(current_start, current_end));
        }
    }

    result
}

/// Sweep line: find day ranges where concurrent stays >= quantity.
/// Returns sorted, merged ranges of fully-occupied nights.
pub fn compute_saturated_ranges(stays: &[DateRange], quantity: u32) -> Vec<DateRange> {
    if stays.is_empty() || quantity == 0 {
        return Vec::new();
    }
    if quantity == 1 {
        let mut sorted = stays.to_vec();
        sorted.sort_by_key(|r| r.start);
        return merge_overlapping(&sorted);
    }

    // +1 at check-in, -1 at check-out; check-outs sort first on a shared day.
    let mut events: Vec<(Day, i32)> = Vec::with_capacity(stays.len() * 2);
    for s in stays {
        events.push((s.start, 1));
        events.push((s.end, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result: Vec<DateRange> = Vec::new();
    let mut count: u32 = 0;
    let mut saturated_start: Option<Day> = None;

    for (day, delta) in &events {
        if *delta > 0 {
            count += *delta as u32;
        } else {
            count -= (-*delta) as u32;
        }

        if count >= quantity && saturated_start.is_none() {
            saturated_start = Some(*day);
        } else if count < quantity
            && let Some(start) = saturated_start.take()
            && *day > start {
                result.push(DateRange::new(start, *day));
            }
    }

    merge_overlapping(&result)
}
