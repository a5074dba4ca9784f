use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{DayCell, free_ranges, month_range, month_view};
use super::conflict::check_stay;
use super::{Engine, EngineError};

/// Narrows [`Engine::bookings`]. Empty filter returns every booking.
#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub room_id: Option<Ulid>,
    /// Matched case-insensitively.
    pub guest_email: Option<String>,
}

impl BookingFilter {
    fn matches(&self, booking: &Booking) -> bool {
        self.room_id.is_none_or(|id| booking.room_id == id)
            && self
                .guest_email
                .as_ref()
                .is_none_or(|email| booking.guest.email.eq_ignore_ascii_case(email.trim()))
    }
}

fn check_window(window: &DateRange) -> Result<(), EngineError> {
    if window.end <= window.start {
        return Err(EngineError::InvalidBooking("calendar window is empty"));
    }
    if window.nights() > MAX_CALENDAR_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("calendar window too wide"));
    }
    Ok(())
}

impl Engine {
    /// Rooms ordered by name. Public pages pass `include_inactive = false`.
    pub async fn list_rooms(&self, include_inactive: bool) -> Vec<Room> {
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms = Vec::with_capacity(states.len());
        for rs in states {
            let guard = rs.read().await;
            if include_inactive || guard.room.is_active {
                rooms.push(guard.room.clone());
            }
        }
        rooms.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        rooms
    }

    pub async fn room(&self, id: Ulid) -> Result<Room, EngineError> {
        let rs = self.room_state(id)?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    pub async fn room_by_slug(&self, slug: &str) -> Result<Room, EngineError> {
        let id = self
            .slugs
            .get(slug)
            .map(|e| *e.value())
            .ok_or_else(|| EngineError::SlugNotFound(slug.to_string()))?;
        self.room(id).await
    }

    pub async fn booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let room_id = self.get_room_for_entity(&id).ok_or(EngineError::NotFound(id))?;
        let rs = self.room_state(room_id)?;
        let guard = rs.read().await;
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Bookings of every status, ordered by check-in then creation time.
    pub async fn bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        let states: Vec<_> = match filter.room_id {
            Some(id) => self.get_room(&id).into_iter().collect(),
            None => self.rooms.iter().map(|e| e.value().clone()).collect(),
        };
        let mut out = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            out.extend(guard.bookings.iter().filter(|b| filter.matches(b)).cloned());
        }
        out.sort_by(|a, b| {
            a.check_in()
                .cmp(&b.check_in())
                .then(a.created_at.cmp(&b.created_at))
        });
        out
    }

    pub async fn blocked_dates(&self, room_id: Ulid) -> Result<Vec<BlockedDate>, EngineError> {
        let rs = self.room_state(room_id)?;
        let guard = rs.read().await;
        let mut blocks = guard.blocks.clone();
        blocks.sort_by_key(|b| b.range.start);
        Ok(blocks)
    }

    /// Bookings and blocks overlapping `window`, cancelled bookings left out.
    /// Ranges are not clipped to the window.
    pub async fn calendar_events(
        &self,
        room_id: Ulid,
        window: &DateRange,
    ) -> Result<Vec<CalendarEvent>, EngineError> {
        check_window(window)?;
        let rs = self.room_state(room_id)?;
        let guard = rs.read().await;
        Ok(guard
            .overlapping(window)
            .filter(|e| super::conflict::is_blocking(e))
            .copied()
            .collect())
    }

    /// Availability verdict for a stay against the current calendar.
    pub async fn check_stay(
        &self,
        room_id: Ulid,
        check_in: Day,
        check_out: Day,
        today: Day,
    ) -> Result<DateRange, EngineError> {
        let rs = self.room_state(room_id)?;
        let guard = rs.read().await;
        let Some(stay) = DateRange::try_new(check_in, check_out) else {
            return check_stay(check_in, check_out, today, &[], 1).map_err(EngineError::from);
        };
        let events: Vec<CalendarEvent> = guard.overlapping(&stay).copied().collect();
        Ok(check_stay(check_in, check_out, today, &events, guard.room.units())?)
    }

    pub async fn month_view(
        &self,
        room_id: Ulid,
        year: i32,
        month: u32,
        today: Day,
    ) -> Result<Vec<DayCell>, EngineError> {
        let window = month_range(year, month).ok_or(EngineError::InvalidMonth { year, month })?;
        let rs = self.room_state(room_id)?;
        let guard = rs.read().await;
        let events: Vec<CalendarEvent> = guard.overlapping(&window).copied().collect();
        month_view(year, month, today, &events, guard.room.units())
            .ok_or(EngineError::InvalidMonth { year, month })
    }

    pub async fn free_ranges(
        &self,
        room_id: Ulid,
        window: &DateRange,
    ) -> Result<Vec<DateRange>, EngineError> {
        check_window(window)?;
        let rs = self.room_state(room_id)?;
        let guard = rs.read().await;
        let events: Vec<CalendarEvent> = guard.overlapping(window).copied().collect();
        Ok(free_ranges(window, &events, guard.room.units()))
    }

    // ── Content & settings ───────────────────────────────────

    /// Entries of one kind in display order.
    pub async fn content(&self, kind: ContentKind, include_inactive: bool) -> Vec<ContentEntry> {
        let site = self.site.read().await;
        let mut entries: Vec<ContentEntry> = site
            .content
            .values()
            .filter(|e| e.kind == kind && (include_inactive || e.is_active))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.title.cmp(&b.title)));
        entries
    }

    pub async fn maintenance(&self) -> MaintenanceMode {
        self.site.read().await.settings.maintenance.clone()
    }

    pub async fn smtp_config(&self) -> Option<SmtpConfig> {
        self.site.read().await.settings.smtp.clone()
    }

    pub async fn admin_contact(&self) -> Option<AdminContact> {
        self.site.read().await.settings.admin_contact.clone()
    }

    pub async fn settings(&self) -> SiteSettings {
        self.site.read().await.settings.clone()
    }
}
