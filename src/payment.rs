//! Payment gateway collaborators.
//!
//! Two halves: a server-side order-creation endpoint ([`OrderGateway`]) and the
//! client-side checkout widget ([`CheckoutWidget`]) that takes the guest's money and
//! reports back through callbacks. The widget may fire more than one callback for the
//! same attempt; [`PaymentGuard`] makes sure only the first one counts.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::PaymentReference;
use crate::retry::Retryable;

/// Body sent to the order-creation endpoint. `amount` is in the currency's minor unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRequest {
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub notes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Connection, TLS or timeout trouble before a response arrived.
    Transport(String),
    Status { status: u16, body: String },
    Decode(String),
    Config(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Transport(e) => write!(f, "payment gateway unreachable: {e}"),
            GatewayError::Status { status, body } => {
                write!(f, "payment gateway returned HTTP {status}: {body}")
            }
            GatewayError::Decode(e) => write!(f, "unexpected payment gateway response: {e}"),
            GatewayError::Config(e) => write!(f, "payment gateway misconfigured: {e}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl Retryable for GatewayError {
    fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport(_) => true,
            GatewayError::Status { status, .. } => {
                *status == 429 || *status == 408 || (500..600).contains(status)
            }
            GatewayError::Decode(_) | GatewayError::Config(_) => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn create_order(&self, request: &OrderRequest) -> Result<Order, GatewayError>;
}

/// Order creation through the server-side proxy endpoint.
pub struct HttpOrderGateway {
    client: Client,
    endpoint: String,
}

impl HttpOrderGateway {
    /// `timeout` bounds a single request; retries are the caller's business.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let endpoint = endpoint.into();
        if endpoint.is_empty() {
            return Err(GatewayError::Config("order endpoint not configured".into()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl OrderGateway for HttpOrderGateway {
    async fn create_order(&self, request: &OrderRequest) -> Result<Order, GatewayError> {
        let response = self.client.post(&self.endpoint).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                warn!(endpoint = %self.endpoint, %status, "order creation returned retryable status");
            }
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        let order: Order = response.json().await?;
        debug!(order_id = %order.id, amount = order.amount, "payment order created");
        Ok(order)
    }
}

// ── Checkout widget ─────────────────────────────────────────────

/// Guest details the widget pre-fills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutPrefill {
    pub name: String,
    pub email: String,
    pub contact: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutRequest {
    pub order: Order,
    pub description: String,
    pub prefill: CheckoutPrefill,
}

/// What the success callback hands back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub order_id: String,
    pub payment_id: String,
    pub signature: Option<String>,
}

impl From<PaymentReceipt> for PaymentReference {
    fn from(r: PaymentReceipt) -> Self {
        PaymentReference {
            order_id: r.order_id,
            payment_id: r.payment_id,
            signature: r.signature,
        }
    }
}

/// One callback from the widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutEvent {
    Succeeded(PaymentReceipt),
    /// The guest closed the widget.
    Dismissed,
    Failed { code: String, description: String },
}

#[async_trait]
pub trait CheckoutWidget: Send + Sync {
    /// Open the widget. Its callbacks arrive on the returned channel; the sender is
    /// dropped when the widget is torn down.
    async fn open(&self, request: CheckoutRequest) -> Result<mpsc::Receiver<CheckoutEvent>, GatewayError>;
}

/// Final result of one payment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded(PaymentReceipt),
    Dismissed,
    Failed { code: String, description: String },
}

impl From<CheckoutEvent> for PaymentOutcome {
    fn from(event: CheckoutEvent) -> Self {
        match event {
            CheckoutEvent::Succeeded(receipt) => PaymentOutcome::Succeeded(receipt),
            CheckoutEvent::Dismissed => PaymentOutcome::Dismissed,
            CheckoutEvent::Failed { code, description } => PaymentOutcome::Failed { code, description },
        }
    }
}

/// Single-write latch over one payment attempt: the first callback settles it, every
/// later one is ignored.
#[derive(Debug, Default)]
pub struct PaymentGuard {
    settled: AtomicBool,
}

impl PaymentGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Some` only for the first event offered.
    pub fn settle(&self, event: CheckoutEvent) -> Option<PaymentOutcome> {
        if self.settled.swap(true, Ordering::AcqRel) {
            debug!(?event, "payment already settled, ignoring callback");
            return None;
        }
        Some(event.into())
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }
}

/// Wait for the attempt's outcome. A widget torn down without any callback counts as
/// dismissed. Callbacks already queued behind the winner are consumed and dropped.
/// Returns `None` when `cancel` fires first.
pub async fn await_outcome(
    events: &mut mpsc::Receiver<CheckoutEvent>,
    guard: &PaymentGuard,
    cancel: &CancellationToken,
) -> Option<PaymentOutcome> {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return None,
            event = events.recv() => event.unwrap_or(CheckoutEvent::Dismissed),
        };
        if let Some(outcome) = guard.settle(event) {
            while let Ok(late) = events.try_recv() {
                let _ = guard.settle(late);
            }
            return Some(outcome);
        }
        if events.is_closed() && events.is_empty() {
            return None;
        }
    }
}
