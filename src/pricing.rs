//! Occupancy-tiered nightly rates and stay quotes.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use crate::model::{Day, Price, Room};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PricingError {
    /// A price field holds something that is not a number.
    NonNumeric { field: &'static str, value: String },
    Negative { field: &'static str, value: Decimal },
    /// Check-out is not strictly after check-in.
    NoNights { check_in: Day, check_out: Day },
    InvalidGuestCount(u32),
    Overflow,
}

impl fmt::Display for PricingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PricingError::NonNumeric { field, value } => {
                write!(f, "{field} is not a number: {value:?}")
            }
            PricingError::Negative { field, value } => write!(f, "{field} is negative: {value}"),
            PricingError::NoNights { check_in, check_out } => {
                write!(f, "check-out {check_out} must be after check-in {check_in}")
            }
            PricingError::InvalidGuestCount(n) => write!(f, "invalid guest count: {n}"),
            PricingError::Overflow => f.write_str("amount out of range"),
        }
    }
}

impl std::error::Error for PricingError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OccupancyTier {
    Base,
    Double,
    Triple,
}

/// Parse a stored price. Plain decimals and scientific notation are accepted;
/// anything else (empty, `NaN`, words) is a configuration error.
pub fn parse_price(field: &'static str, price: &Price) -> Result<Decimal, PricingError> {
    let raw = price.as_str().trim();
    let value = Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| PricingError::NonNumeric {
            field,
            value: price.as_str().to_string(),
        })?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(PricingError::Negative { field, value });
    }
    Ok(value)
}

/// Check every price field of a room parses.
pub fn validate_room_prices(room: &Room) -> Result<(), PricingError> {
    parse_price("price_per_night", &room.price_per_night)?;
    if let Some(p) = &room.price_double_occupancy {
        parse_price("price_double_occupancy", p)?;
    }
    if let Some(p) = &room.price_triple_occupancy {
        parse_price("price_triple_occupancy", p)?;
    }
    Ok(())
}

/// Tier and nightly rate for `guests`.
///
/// Three guests take the triple rate when set, two or three take the double rate when
/// set, everyone else pays the base rate. Parties larger than the highest tier fall
/// back to the base rate.
pub fn nightly_rate(room: &Room, guests: u32) -> Result<(OccupancyTier, Decimal), PricingError> {
    if guests == 0 {
        return Err(PricingError::InvalidGuestCount(guests));
    }
    if guests == 3
        && let Some(p) = &room.price_triple_occupancy {
            return Ok((OccupancyTier::Triple, parse_price("price_triple_occupancy", p)?));
        }
    if (2..=3).contains(&guests)
        && let Some(p) = &room.price_double_occupancy {
            return Ok((OccupancyTier::Double, parse_price("price_double_occupancy", p)?));
        }
    Ok((OccupancyTier::Base, parse_price("price_per_night", &room.price_per_night)?))
}

pub fn price_for_night(room: &Room, guests: u32) -> Result<Decimal, PricingError> {
    nightly_rate(room, guests).map(|(_, rate)| rate)
}

pub fn nights_between(check_in: Day, check_out: Day) -> Result<u32, PricingError> {
    let nights = (check_out - check_in).num_days();
    if nights <= 0 {
        return Err(PricingError::NoNights { check_in, check_out });
    }
    u32::try_from(nights).map_err(|_| PricingError::Overflow)
}

/// Priced stay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub nights: u32,
    pub guests: u32,
    pub tier: OccupancyTier,
    pub nightly_rate: Decimal,
    pub total: Decimal,
}

impl Quote {
    /// Total in the currency's minor unit (paise, cents), as payment gateways expect.
    pub fn total_minor_units(&self) -> Result<i64, PricingError> {
        self.total
            .checked_mul(Decimal::from(100))
            .map(|v| v.round())
            .and_then(|v| v.to_i64())
            .ok_or(PricingError::Overflow)
    }
}

pub fn quote(room: &Room, check_in: Day, check_out: Day, guests: u32) -> Result<Quote, PricingError> {
    let nights = nights_between(check_in, check_out)?;
    let (tier, nightly_rate) = nightly_rate(room, guests)?;
    let total = nightly_rate
        .checked_mul(Decimal::from(nights))
        .ok_or(PricingError::Overflow)?;
    Ok(Quote {
        nights,
        guests,
        tier,
        nightly_rate,
        total,
    })
}
