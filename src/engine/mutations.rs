use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tokio::sync::{RwLock, oneshot};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::pricing::validate_room_prices;

use super::conflict::{check_no_conflict, validate_stay};
use super::{Engine, EngineError, WalCommand};

fn validate_room(room: &Room) -> Result<(), EngineError> {
    if room.name.trim().is_empty() {
        return Err(EngineError::InvalidRoom("name is required"));
    }
    if room.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    if room.slug.is_empty() {
        return Err(EngineError::InvalidRoom("slug is required"));
    }
    if room.slug.len() > MAX_SLUG_LEN {
        return Err(EngineError::LimitExceeded("room slug too long"));
    }
    if !room
        .slug
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(EngineError::InvalidRoom("slug may only contain a-z, 0-9 and '-'"));
    }
    if room.quantity == 0 {
        return Err(EngineError::InvalidRoom("quantity must be at least 1"));
    }
    if room.quantity > MAX_ROOM_QUANTITY {
        return Err(EngineError::LimitExceeded("room quantity too large"));
    }
    if room.max_occupancy == 0 {
        return Err(EngineError::InvalidRoom("max occupancy must be at least 1"));
    }
    if room.max_occupancy > MAX_OCCUPANCY {
        return Err(EngineError::LimitExceeded("max occupancy too large"));
    }
    if room.images.len() > MAX_IMAGES_PER_ROOM {
        return Err(EngineError::LimitExceeded("too many images"));
    }
    if room.description.as_ref().is_some_and(|d| d.len() > MAX_TEXT_LEN)
        || room.amenities.iter().any(|a| a.len() > MAX_NAME_LEN)
    {
        return Err(EngineError::LimitExceeded("room text too long"));
    }
    validate_room_prices(room).map_err(EngineError::InvalidPrice)
}

fn validate_guest(guest: &GuestContact) -> Result<(), EngineError> {
    if guest.name.trim().is_empty() || guest.email.trim().is_empty() || guest.phone.trim().is_empty() {
        return Err(EngineError::InvalidBooking("guest name, email and phone are required"));
    }
    if [&guest.name, &guest.email, &guest.phone]
        .iter()
        .any(|f| f.len() > MAX_GUEST_FIELD_LEN)
        || guest.special_requests.as_ref().is_some_and(|s| s.len() > MAX_TEXT_LEN)
    {
        return Err(EngineError::LimitExceeded("guest details too long"));
    }
    Ok(())
}

fn validate_block(block: &BlockedDate) -> Result<(), EngineError> {
    if block.range.end <= block.range.start {
        return Err(EngineError::InvalidBooking("block must cover at least one day"));
    }
    if block.range.nights() > MAX_BLOCK_DAYS {
        return Err(EngineError::LimitExceeded("block too long"));
    }
    if block.reason.as_ref().is_some_and(|r| r.len() > MAX_TEXT_LEN) {
        return Err(EngineError::LimitExceeded("block reason too long"));
    }
    Ok(())
}

impl Engine {
    // ── Rooms ────────────────────────────────────────────────

    pub async fn create_room(&self, room: Room) -> Result<(), EngineError> {
        validate_room(&room)?;
        let _site = self.site.read().await;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(&room.id) {
            return Err(EngineError::AlreadyExists(room.id));
        }
        let id = room.id;
        let slug = room.slug.clone();
        // Reserve the slug before the WAL write so two creates can't both claim it.
        match self.slugs.entry(slug.clone()) {
            Entry::Occupied(_) => return Err(EngineError::SlugTaken(slug)),
            Entry::Vacant(v) => {
                v.insert(id);
            }
        }

        let event = Event::RoomCreated { room: room.clone() };
        if let Err(e) = self.wal_append(&event).await {
            self.slugs.remove(&slug);
            return Err(e);
        }
        self.rooms.insert(id, Arc::new(RwLock::new(RoomState::new(room))));
        self.notify.send(id, &event);
        info!(room_id = %id, %slug, "room created");
        Ok(())
    }

    /// Replace a room's details. The id is taken from `room`.
    pub async fn update_room(&self, room: Room) -> Result<(), EngineError> {
        validate_room(&room)?;
        let id = room.id;
        let rs = self.room_state(id)?;
        let mut guard = rs.write().await;

        let old_slug = guard.room.slug.clone();
        let new_slug = room.slug.clone();
        if new_slug != old_slug {
            match self.slugs.entry(new_slug.clone()) {
                Entry::Occupied(_) => return Err(EngineError::SlugTaken(new_slug)),
                Entry::Vacant(v) => {
                    v.insert(id);
                }
            }
        }

        let event = Event::RoomUpdated { room };
        if let Err(e) = self.persist_and_apply(id, &mut guard, &event).await {
            if new_slug != old_slug {
                self.slugs.remove(&new_slug);
            }
            return Err(e);
        }
        if new_slug != old_slug {
            self.slugs.remove(&old_slug);
        }
        Ok(())
    }

    pub async fn set_room_active(&self, id: Ulid, active: bool) -> Result<(), EngineError> {
        let rs = self.room_state(id)?;
        let mut guard = rs.write().await;
        if guard.room.is_active == active {
            return Ok(());
        }
        let event = Event::RoomActiveSet { id, active };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    // ── Blocked dates ────────────────────────────────────────

    /// Take dates out of circulation. Blocks may cover existing bookings: they only
    /// restrict what can be selected from now on.
    pub async fn add_blocked_date(&self, block: BlockedDate) -> Result<(), EngineError> {
        validate_block(&block)?;
        if self.entity_to_room.contains_key(&block.id) {
            return Err(EngineError::AlreadyExists(block.id));
        }
        let room_id = block.room_id;
        let rs = self.room_state(room_id)?;
        let mut guard = rs.write().await;
        if guard.intervals.len() >= MAX_INTERVALS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many calendar entries on room"));
        }
        let event = Event::BlockAdded { block };
        self.persist_and_apply(room_id, &mut guard, &event).await
    }

    pub async fn remove_blocked_date(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.blocks.iter().any(|b| b.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BlockRemoved { id, room_id };
        self.persist_and_apply(room_id, &mut guard, &event).await?;
        Ok(room_id)
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Persist a booking. Availability is checked again under the room's write lock, so
    /// of two racing requests for the last unit only the first one lands.
    pub async fn create_booking(&self, booking: Booking) -> Result<Booking, EngineError> {
        validate_stay(&booking.stay)?;
        validate_guest(&booking.guest)?;
        if booking.num_guests == 0 {
            return Err(EngineError::InvalidBooking("at least one guest is required"));
        }
        if booking.total_amount < Decimal::ZERO {
            return Err(EngineError::InvalidBooking("total amount is negative"));
        }
        if !matches!(booking.booking_status, BookingStatus::Pending | BookingStatus::Confirmed) {
            return Err(EngineError::InvalidBooking("new bookings must be pending or confirmed"));
        }
        if self.entity_to_room.contains_key(&booking.id) {
            return Err(EngineError::AlreadyExists(booking.id));
        }

        let room_id = booking.room_id;
        let rs = self.room_state(room_id)?;
        let mut guard = rs.write().await;
        if !guard.room.is_active {
            return Err(EngineError::InvalidBooking("room is not accepting bookings"));
        }
        if booking.num_guests > guard.room.max_occupancy {
            return Err(EngineError::InvalidBooking("too many guests for this room"));
        }
        if guard.intervals.len() >= MAX_INTERVALS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many calendar entries on room"));
        }
        check_no_conflict(&guard, &booking.stay)?;

        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(room_id, &mut guard, &event).await?;
        info!(booking_id = %booking.id, room_id = %room_id, stay = %booking.stay, "booking created");
        Ok(booking)
    }

    /// Move a booking to new statuses. Both changes must be legal transitions.
    pub async fn update_booking_status(
        &self,
        id: Ulid,
        booking_status: BookingStatus,
        payment_status: PaymentStatus,
    ) -> Result<Booking, EngineError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        let (from_booking, from_payment) = (current.booking_status, current.payment_status);
        if !from_booking.can_transition_to(booking_status)
            || !from_payment.can_transition_to(payment_status)
        {
            return Err(EngineError::InvalidTransition {
                id,
                booking: (from_booking, booking_status),
                payment: (from_payment, payment_status),
            });
        }
        if (from_booking, from_payment) != (booking_status, payment_status) {
            let event = Event::BookingStatusChanged {
                id,
                room_id,
                booking_status,
                payment_status,
            };
            self.persist_and_apply(room_id, &mut guard, &event).await?;
            debug!(booking_id = %id, booking = booking_status.as_str(), payment = payment_status.as_str(), "booking status changed");
        }
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Cancel a booking, releasing its dates. A paid booking is marked refunded; the
    /// record is kept.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let (booking_status, payment_status) = {
            let room_id = self.get_room_for_entity(&id).ok_or(EngineError::NotFound(id))?;
            let rs = self.room_state(room_id)?;
            let guard = rs.read().await;
            let b = guard.booking(id).ok_or(EngineError::NotFound(id))?;
            (b.booking_status, b.payment_status)
        };
        if booking_status == BookingStatus::Cancelled {
            return self.booking(id).await;
        }
        let payment = match payment_status {
            PaymentStatus::Paid | PaymentStatus::Refunded => PaymentStatus::Refunded,
            PaymentStatus::Pending | PaymentStatus::Failed | PaymentStatus::Cancelled => {
                PaymentStatus::Cancelled
            }
        };
        self.update_booking_status(id, BookingStatus::Cancelled, payment).await
    }

    /// Mark confirmed stays whose check-out day has arrived as completed.
    pub async fn complete_finished_stays(&self, today: Day) -> Result<Vec<Ulid>, EngineError> {
        let rooms: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut finished = Vec::new();
        for rs in rooms {
            let guard = rs.read().await;
            finished.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.booking_status == BookingStatus::Confirmed && b.check_out() <= today)
                    .map(|b| b.id),
            );
        }

        let mut completed = Vec::with_capacity(finished.len());
        for id in finished {
            match self.complete_stay(id, today).await {
                Ok(true) => completed.push(id),
                Ok(false) | Err(EngineError::NotFound(_)) => {
                    info!(booking_id = %id, "booking changed before completion, skipped");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(completed)
    }

    /// Complete one stay under the room write lock. `Ok(false)` when the booking is no
    /// longer a confirmed stay that has ended.
    pub(crate) async fn complete_stay(&self, id: Ulid, today: Day) -> Result<bool, EngineError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        let Some(b) = guard.booking(id) else {
            return Ok(false);
        };
        if b.booking_status != BookingStatus::Confirmed || b.check_out() > today {
            return Ok(false);
        }
        let event = Event::BookingStatusChanged {
            id,
            room_id,
            booking_status: BookingStatus::Completed,
            payment_status: b.payment_status,
        };
        self.persist_and_apply(room_id, &mut guard, &event).await?;
        Ok(true)
    }

    // ── Content ──────────────────────────────────────────────

    pub async fn upsert_content(&self, entry: ContentEntry) -> Result<(), EngineError> {
        if entry.title.trim().is_empty() {
            return Err(EngineError::InvalidContent("title is required"));
        }
        if entry.title.len() > MAX_NAME_LEN || entry.body.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("content too long"));
        }
        let mut site = self.site.write().await;
        if !site.content.contains_key(&entry.id) && site.content.len() >= MAX_CONTENT_ENTRIES {
            return Err(EngineError::LimitExceeded("too many content entries"));
        }
        let event = Event::ContentUpserted { entry };
        self.persist_and_apply_site(&mut site, &event).await
    }

    pub async fn delete_content(&self, id: Ulid) -> Result<(), EngineError> {
        let mut site = self.site.write().await;
        if !site.content.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ContentDeleted { id };
        self.persist_and_apply_site(&mut site, &event).await
    }

    // ── Site settings ────────────────────────────────────────

    pub async fn set_maintenance(&self, enabled: bool, message: Option<String>) -> Result<(), EngineError> {
        if message.as_ref().is_some_and(|m| m.len() > MAX_TEXT_LEN) {
            return Err(EngineError::LimitExceeded("maintenance message too long"));
        }
        let mut site = self.site.write().await;
        let event = Event::MaintenanceSet { enabled, message };
        self.persist_and_apply_site(&mut site, &event).await?;
        info!(enabled, "maintenance mode set");
        Ok(())
    }

    pub async fn set_smtp_config(&self, config: SmtpConfig) -> Result<(), EngineError> {
        if config.host.trim().is_empty() {
            return Err(EngineError::InvalidSettings("SMTP host is required"));
        }
        if config.port == 0 {
            return Err(EngineError::InvalidSettings("SMTP port is required"));
        }
        if !config.from_email.contains('@') {
            return Err(EngineError::InvalidSettings("SMTP sender address is invalid"));
        }
        let mut site = self.site.write().await;
        let event = Event::SmtpConfigSet { config };
        self.persist_and_apply_site(&mut site, &event).await
    }

    pub async fn set_admin_contact(&self, contact: AdminContact) -> Result<(), EngineError> {
        if !contact.email.contains('@') {
            return Err(EngineError::InvalidSettings("admin email is invalid"));
        }
        let mut site = self.site.write().await;
        let event = Event::AdminContactSet { contact };
        self.persist_and_apply_site(&mut site, &event).await
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    ///
    /// Holds the site lock exclusively and every room's read lock until the writer
    /// has swapped files, so no mutation can land between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let site = self.site.write().await;
        let mut room_ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        room_ids.sort();

        let mut guards = Vec::with_capacity(room_ids.len());
        for id in room_ids {
            if let Some(rs) = self.get_room(&id) {
                guards.push(rs.read_owned().await);
            }
        }

        let mut events = Vec::new();
        events.push(Event::MaintenanceSet {
            enabled: site.settings.maintenance.enabled,
            message: site.settings.maintenance.message.clone(),
        });
        if let Some(config) = &site.settings.smtp {
            events.push(Event::SmtpConfigSet { config: config.clone() });
        }
        if let Some(contact) = &site.settings.admin_contact {
            events.push(Event::AdminContactSet { contact: contact.clone() });
        }
        let mut content: Vec<&ContentEntry> = site.content.values().collect();
        content.sort_by_key(|e| e.id);
        events.extend(content.into_iter().map(|entry| Event::ContentUpserted { entry: entry.clone() }));

        for guard in &guards {
            events.push(Event::RoomCreated { room: guard.room.clone() });
            events.extend(guard.blocks.iter().map(|b| Event::BlockAdded { block: b.clone() }));
            events.extend(
                guard
                    .bookings
                    .iter()
                    .map(|b| Event::BookingCreated { booking: b.clone() }),
            );
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
