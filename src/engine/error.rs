use ulid::Ulid;

use crate::model::{BookingStatus, PaymentStatus};
use crate::pricing::PricingError;

use super::conflict::ConflictReason;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    SlugNotFound(String),
    AlreadyExists(Ulid),
    SlugTaken(String),
    Unavailable(ConflictReason),
    InvalidRoom(&'static str),
    InvalidPrice(PricingError),
    InvalidBooking(&'static str),
    InvalidSettings(&'static str),
    InvalidContent(&'static str),
    InvalidMonth { year: i32, month: u32 },
    InvalidTransition {
        id: Ulid,
        booking: (BookingStatus, BookingStatus),
        payment: (PaymentStatus, PaymentStatus),
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::SlugNotFound(slug) => write!(f, "no room with slug: {slug}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::SlugTaken(slug) => write!(f, "slug already in use: {slug}"),
            EngineError::Unavailable(reason) => write!(f, "unavailable: {reason}"),
            EngineError::InvalidRoom(msg) => write!(f, "invalid room: {msg}"),
            EngineError::InvalidPrice(e) => write!(f, "invalid room price: {e}"),
            EngineError::InvalidBooking(msg) => write!(f, "invalid booking: {msg}"),
            EngineError::InvalidSettings(msg) => write!(f, "invalid settings: {msg}"),
            EngineError::InvalidContent(msg) => write!(f, "invalid content: {msg}"),
            EngineError::InvalidMonth { year, month } => write!(f, "invalid month: {year}-{month:02}"),
            EngineError::InvalidTransition { id, booking, payment } => write!(
                f,
                "booking {id}: cannot move {}/{} to {}/{}",
                booking.0.as_str(),
                payment.0.as_str(),
                booking.1.as_str(),
                payment.1.as_str()
            ),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ConflictReason> for EngineError {
    fn from(reason: ConflictReason) -> Self {
        EngineError::Unavailable(reason)
    }
}
