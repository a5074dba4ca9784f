//! The data collaborator as the booking flow and maintenance monitor see it.

use async_trait::async_trait;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::{
    AdminContact, Booking, BookingStatus, CalendarEvent, DateRange, MaintenanceMode, PaymentStatus,
    Room,
};

#[async_trait]
pub trait Backend: Send + Sync {
    async fn room(&self, id: Ulid) -> Result<Room, EngineError>;

    /// Non-cancelled bookings and blocks overlapping `window`.
    async fn calendar_events(&self, room_id: Ulid, window: &DateRange) -> Result<Vec<CalendarEvent>, EngineError>;

    async fn create_booking(&self, booking: Booking) -> Result<Booking, EngineError>;

    async fn update_booking_status(
        &self,
        id: Ulid,
        booking_status: BookingStatus,
        payment_status: PaymentStatus,
    ) -> Result<Booking, EngineError>;

    async fn maintenance(&self) -> Result<MaintenanceMode, EngineError>;

    async fn admin_contact(&self) -> Result<Option<AdminContact>, EngineError>;
}

#[async_trait]
impl Backend for Engine {
    async fn room(&self, id: Ulid) -> Result<Room, EngineError> {
        Engine::room(self, id).await
    }

    async fn calendar_events(&self, room_id: Ulid, window: &DateRange) -> Result<Vec<CalendarEvent>, EngineError> {
        Engine::calendar_events(self, room_id, window).await
    }

    async fn create_booking(&self, booking: Booking) -> Result<Booking, EngineError> {
        Engine::create_booking(self, booking).await
    }

    async fn update_booking_status(
        &self,
        id: Ulid,
        booking_status: BookingStatus,
        payment_status: PaymentStatus,
    ) -> Result<Booking, EngineError> {
        Engine::update_booking_status(self, id, booking_status, payment_status).await
    }

    async fn maintenance(&self) -> Result<MaintenanceMode, EngineError> {
        Ok(Engine::maintenance(self).await)
    }

    async fn admin_contact(&self) -> Result<Option<AdminContact>, EngineError> {
        Ok(Engine::admin_contact(self).await)
    }
}
