//! Two-click check-in/check-out selection over a room calendar.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::debug;
use ulid::Ulid;

use crate::engine::{ConflictReason, check_stay, find_conflict};
use crate::limits::MAX_STAY_NIGHTS;
use crate::model::{CalendarEvent, DateRange, Day};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Selection {
    NoSelection,
    StartOnly { start: Day },
    Complete { range: DateRange },
}

/// What a click on a day earlier than the selected check-in does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwapPolicy {
    /// The earlier day becomes the new check-in.
    #[default]
    ResetToNewStart,
    /// The two clicks become check-in and check-out in date order.
    AutoSwap,
}

impl FromStr for SwapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reset" => Ok(SwapPolicy::ResetToNewStart),
            "swap" => Ok(SwapPolicy::AutoSwap),
            other => Err(format!("unknown selection policy {other:?} (expected reset|swap)")),
        }
    }
}

/// Calendar data a click is judged against.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub today: Day,
    pub events: &'a [CalendarEvent],
    pub quantity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionError {
    /// Finalize called before both dates were picked.
    Incomplete,
    Unavailable(ConflictReason),
}

impl fmt::Display for SelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionError::Incomplete => f.write_str("Select both check-in and check-out dates."),
            SelectionError::Unavailable(reason) => write!(f, "{reason}"),
        }
    }
}

impl std::error::Error for SelectionError {}

#[derive(Debug, Clone)]
pub struct DateSelector {
    selection: Selection,
    policy: SwapPolicy,
    room_id: Option<Ulid>,
}

impl DateSelector {
    pub fn new(policy: SwapPolicy) -> Self {
        Self {
            selection: Selection::NoSelection,
            policy,
            room_id: None,
        }
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn policy(&self) -> SwapPolicy {
        self.policy
    }

    pub fn reset(&mut self) {
        self.selection = Selection::NoSelection;
    }

    /// Switch rooms. Any selection made for another room is discarded.
    pub fn set_room(&mut self, room_id: Ulid) {
        if self.room_id != Some(room_id) {
            self.room_id = Some(room_id);
            self.reset();
        }
    }

    /// Apply a click on `day`. On rejection the selection is left untouched.
    ///
    /// A day that would become a check-in must be free for that night. A click that
    /// completes the range is accepted only when every night of the range is free, so
    /// the one occupied day a guest may pick is the next guest's arrival day.
    pub fn click(&mut self, day: Day, ctx: &SelectionContext<'_>) -> Result<Selection, ConflictReason> {
        if day < ctx.today {
            return Err(ConflictReason::PastDate { day });
        }

        let next = match self.selection {
            Selection::NoSelection | Selection::Complete { .. } => {
                check_night_free(day, ctx)?;
                Selection::StartOnly { start: day }
            }
            Selection::StartOnly { start } if day == start => Selection::NoSelection,
            Selection::StartOnly { start } if day > start => {
                let range = DateRange::new(start, day);
                check_nights_free(&range, ctx)?;
                Selection::Complete { range }
            }
            Selection::StartOnly { start } => match self.policy {
                SwapPolicy::ResetToNewStart => {
                    check_night_free(day, ctx)?;
                    Selection::StartOnly { start: day }
                }
                SwapPolicy::AutoSwap => {
                    let range = DateRange::new(day, start);
                    check_nights_free(&range, ctx)?;
                    Selection::Complete { range }
                }
            },
        };

        debug!(?day, from = ?self.selection, to = ?next, "selection changed");
        self.selection = next;
        Ok(next)
    }

    /// The selected stay, if every night in it is still bookable.
    pub fn finalize(&self, ctx: &SelectionContext<'_>) -> Result<DateRange, SelectionError> {
        match self.selection {
            Selection::Complete { range } => {
                check_stay(range.start, range.end, ctx.today, ctx.events, ctx.quantity)
                    .map_err(SelectionError::Unavailable)
            }
            Selection::NoSelection | Selection::StartOnly { .. } => Err(SelectionError::Incomplete),
        }
    }
}

fn check_night_free(day: Day, ctx: &SelectionContext<'_>) -> Result<(), ConflictReason> {
    check_nights_free(&DateRange::single(day), ctx)
}

fn check_nights_free(range: &DateRange, ctx: &SelectionContext<'_>) -> Result<(), ConflictReason> {
    if range.nights() > MAX_STAY_NIGHTS {
        return Err(ConflictReason::TooLong {
            nights: range.nights(),
            max: MAX_STAY_NIGHTS,
        });
    }
    match find_conflict(range, ctx.events, ctx.quantity) {
        Some(reason) => Err(reason),
        None => Ok(()),
    }
}
