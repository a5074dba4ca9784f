//! Booking confirmation emails, rendered and sent by the serverless email function.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Booking, Room};
use crate::pricing::{OccupancyTier, Quote};

/// Amounts the email templates print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    pub nights: u32,
    pub nightly_rate: Decimal,
    pub tier: OccupancyTier,
    pub total: Decimal,
    pub currency: String,
    pub payment_id: Option<String>,
}

/// Payload for one customer confirmation plus one admin notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingEmail {
    pub booking: Booking,
    pub room_name: String,
    pub room_slug: String,
    pub payment_details: PaymentDetails,
}

impl BookingEmail {
    pub fn new(booking: &Booking, room: &Room, quote: &Quote, currency: &str) -> Self {
        Self {
            booking: booking.clone(),
            room_name: room.name.clone(),
            room_slug: room.slug.clone(),
            payment_details: PaymentDetails {
                nights: quote.nights,
                nightly_rate: quote.nightly_rate,
                tier: quote.tier,
                total: quote.total,
                currency: currency.to_string(),
                payment_id: booking.payment.as_ref().map(|p| p.payment_id.clone()),
            },
        }
    }
}

/// Message ids of the two emails sent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailReceipt {
    pub customer_message_id: String,
    pub admin_message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    Transport(String),
    Rejected { status: u16, message: String },
    Decode(String),
    Config(String),
}

impl fmt::Display for MailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailError::Transport(e) => write!(f, "email service unreachable: {e}"),
            MailError::Rejected { status, message } => {
                write!(f, "email service rejected the request (HTTP {status}): {message}")
            }
            MailError::Decode(e) => write!(f, "unexpected email service response: {e}"),
            MailError::Config(e) => write!(f, "email service misconfigured: {e}"),
        }
    }
}

impl std::error::Error for MailError {}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_booking_confirmation(&self, email: &BookingEmail) -> Result<EmailReceipt, MailError>;
}

pub struct HttpMailer {
    client: Client,
    endpoint: String,
}

impl HttpMailer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, MailError> {
        let endpoint = endpoint.into();
        if endpoint.is_empty() {
            return Err(MailError::Config("email endpoint not configured".into()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MailError::Config(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_booking_confirmation(&self, email: &BookingEmail) -> Result<EmailReceipt, MailError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(email)
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorPayload>(&body)
                .map(|p| p.error)
                .unwrap_or_else(|_| body.chars().take(200).collect());
            return Err(MailError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        let receipt: EmailReceipt =
            serde_json::from_str(&body).map_err(|e| MailError::Decode(e.to_string()))?;
        debug!(booking_id = %email.booking.id, message_id = %receipt.customer_message_id, "confirmation email sent");
        Ok(receipt)
    }
}
