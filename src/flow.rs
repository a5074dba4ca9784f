//! Booking submission orchestrator.
//!
//! One [`BookingFlow`] drives one guest's attempt from date validation through
//! payment to the persisted booking:
//!
//! ```text
//! Idle → AvailabilityChecking → FormValidated → ConfirmationPending
//!      → PaymentOrderCreating → PaymentInProgress
//!      → {PaymentSucceeded | PaymentCancelled | PaymentFailed}
//!      → BookingPersisting → {BookingConfirmed | BookingPersistFailed}
//! ```
//!
//! Availability is checked again right before the order is created, and the order
//! is created before the checkout widget opens. Dropping the flow cancels whatever
//! it is waiting on, except the booking write once money has moved.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::backend::Backend;
use crate::email::{BookingEmail, EmailReceipt, MailError, Mailer};
use crate::engine::{ConflictReason, EngineError, check_dates, check_stay};
use crate::limits::{MAX_GUEST_FIELD_LEN, MAX_TEXT_LEN};
use crate::maintenance::MaintenanceStatus;
use crate::model::{AdminContact, Booking, BookingStatus, DateRange, Day, GuestContact, PaymentStatus, Room};
use crate::observability::{
    AVAILABILITY_REJECTIONS_TOTAL, BOOKING_PERSIST_FAILURES_TOTAL, BOOKINGS_CONFIRMED_TOTAL,
    EMAIL_FAILURES_TOTAL, ORDER_ATTEMPTS_TOTAL, ORDER_CREATE_DURATION_SECONDS, PAYMENT_OUTCOMES_TOTAL,
    payment_outcome_label,
};
use crate::payment::{
    CheckoutPrefill, CheckoutRequest, CheckoutWidget, GatewayError, Order, OrderGateway, OrderRequest,
    PaymentGuard, PaymentOutcome, PaymentReceipt, await_outcome,
};
use crate::pricing::{PricingError, Quote, quote};
use crate::retry::{RetryError, RetryPolicy, run_with_retry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Idle,
    AvailabilityChecking,
    FormValidated,
    ConfirmationPending,
    PaymentOrderCreating,
    PaymentInProgress,
    PaymentSucceeded,
    PaymentCancelled,
    PaymentFailed,
    BookingPersisting,
    BookingConfirmed,
    BookingPersistFailed,
}

impl FlowState {
    pub fn can_transition_to(self, next: FlowState) -> bool {
        use FlowState::*;
        // Going home is always allowed.
        next == Idle
            || matches!(
                (self, next),
                (Idle | FormValidated, AvailabilityChecking)
                    | (AvailabilityChecking, FormValidated)
                    | (FormValidated, ConfirmationPending)
                    | (ConfirmationPending, FormValidated)
                    | (ConfirmationPending, PaymentOrderCreating)
                    | (PaymentOrderCreating, PaymentInProgress)
                    | (PaymentOrderCreating, FormValidated)
                    | (PaymentInProgress, PaymentSucceeded | PaymentCancelled | PaymentFailed)
                    | (PaymentSucceeded, BookingPersisting)
                    | (PaymentCancelled | PaymentFailed, ConfirmationPending)
                    | (BookingPersisting, BookingConfirmed | BookingPersistFailed)
            )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FlowState::BookingConfirmed
                | FlowState::BookingPersistFailed
                | FlowState::PaymentCancelled
                | FlowState::PaymentFailed
        )
    }
}

/// Guest details as typed into the booking form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestDetails {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub special_requests: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub room_id: Ulid,
    pub check_in: Day,
    pub check_out: Day,
    pub num_guests: u32,
    pub guest: GuestDetails,
}

/// A form problem, reported inline before anything is sent anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    Missing(&'static str),
    InvalidEmail,
    InvalidPhone,
    TooLong(&'static str),
    InvalidGuestCount { guests: u32, max: Option<u32> },
    Dates(ConflictReason),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Missing(field) => write!(f, "Please enter your {field}."),
            ValidationError::InvalidEmail => f.write_str("Please enter a valid email address."),
            ValidationError::InvalidPhone => f.write_str("Please enter a valid phone number."),
            ValidationError::TooLong(field) => write!(f, "Your {field} is too long."),
            ValidationError::InvalidGuestCount { max: Some(max), .. } => {
                write!(f, "This room sleeps between 1 and {max} guests.")
            }
            ValidationError::InvalidGuestCount { max: None, .. } => {
                f.write_str("At least one guest is required.")
            }
            ValidationError::Dates(reason) => write!(f, "{reason}"),
        }
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

fn looks_like_phone(phone: &str) -> bool {
    let digits = phone.chars().filter(char::is_ascii_digit).count();
    (7..=15).contains(&digits)
        && phone
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'))
}

impl BookingRequest {
    /// Every problem with the form, dates included. Needs no network.
    pub fn validate(&self, today: Day) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if let Err(reason) = check_dates(self.check_in, self.check_out, today) {
            errors.push(ValidationError::Dates(reason));
        }
        if self.num_guests == 0 {
            errors.push(ValidationError::InvalidGuestCount { guests: 0, max: None });
        }

        let g = &self.guest;
        for (field, value) in [("name", &g.name), ("email", &g.email), ("phone number", &g.phone)] {
            if value.trim().is_empty() {
                errors.push(ValidationError::Missing(field));
            } else if value.len() > MAX_GUEST_FIELD_LEN {
                errors.push(ValidationError::TooLong(field));
            }
        }
        if !g.email.trim().is_empty() && !looks_like_email(g.email.trim()) {
            errors.push(ValidationError::InvalidEmail);
        }
        if !g.phone.trim().is_empty() && !looks_like_phone(g.phone.trim()) {
            errors.push(ValidationError::InvalidPhone);
        }
        if g.special_requests.as_ref().is_some_and(|s| s.len() > MAX_TEXT_LEN) {
            errors.push(ValidationError::TooLong("special requests"));
        }
        errors
    }
}

#[derive(Debug)]
pub enum FlowError {
    /// The action is not available in the current state.
    InvalidState { state: FlowState, action: &'static str },
    /// The site is in maintenance mode.
    Maintenance(Option<String>),
    Validation(Vec<ValidationError>),
    Unavailable(ConflictReason),
    Backend(EngineError),
    Pricing(PricingError),
    NotAcknowledged,
    OrderCreation(RetryError<GatewayError>),
    /// The checkout widget could not be opened.
    Checkout(GatewayError),
    PaymentCancelled,
    PaymentFailed { code: String, description: String },
    /// Money has moved but the booking was not saved.
    PersistFailed {
        payment_id: String,
        order_id: String,
        support: Option<AdminContact>,
        source: EngineError,
    },
    Cancelled,
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowError::InvalidState { state, action } => {
                write!(f, "cannot {action} while {state:?}")
            }
            FlowError::Maintenance(Some(message)) => f.write_str(message),
            FlowError::Maintenance(None) => {
                f.write_str("Bookings are paused for maintenance. Please try again later.")
            }
            FlowError::Validation(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                f.write_str(&messages.join(" "))
            }
            FlowError::Unavailable(reason) => write!(f, "{reason}"),
            FlowError::Backend(e) => write!(f, "We could not reach the booking service: {e}"),
            FlowError::Pricing(e) => write!(f, "This room cannot be priced right now: {e}"),
            FlowError::NotAcknowledged => {
                f.write_str("Please confirm that your booking details are correct.")
            }
            FlowError::OrderCreation(e) => {
                write!(f, "We could not start the payment. Please try again. ({e})")
            }
            FlowError::Checkout(e) => write!(f, "The payment window could not be opened: {e}"),
            FlowError::PaymentCancelled => f.write_str("Payment was cancelled. No money was taken."),
            FlowError::PaymentFailed { description, .. } => write!(f, "Payment failed: {description}"),
            FlowError::PersistFailed {
                payment_id,
                support,
                ..
            } => {
                write!(
                    f,
                    "Your payment {payment_id} was received but we could not save your booking. \
                     Please contact support"
                )?;
                if let Some(contact) = support {
                    write!(f, " at {}", contact.email)?;
                    if let Some(phone) = &contact.phone {
                        write!(f, " or {phone}")?;
                    }
                }
                f.write_str(" and quote this payment reference.")
            }
            FlowError::Cancelled => f.write_str("booking attempt cancelled"),
        }
    }
}

impl std::error::Error for FlowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FlowError::Backend(e) | FlowError::PersistFailed { source: e, .. } => Some(e),
            FlowError::Pricing(e) => Some(e),
            FlowError::OrderCreation(e) => Some(e),
            FlowError::Checkout(e) => Some(e),
            _ => None,
        }
    }
}

/// Collaborators a flow talks to.
#[derive(Clone)]
pub struct FlowDeps {
    pub backend: Arc<dyn Backend>,
    pub orders: Arc<dyn OrderGateway>,
    pub checkout: Arc<dyn CheckoutWidget>,
    /// Confirmation emails are skipped when unset.
    pub mailer: Option<Arc<dyn Mailer>>,
    /// New attempts are refused while the published status says maintenance.
    pub maintenance: Option<watch::Receiver<MaintenanceStatus>>,
}

#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub retry: RetryPolicy,
    pub currency: String,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            currency: "INR".into(),
        }
    }
}

/// A request that passed validation and availability, with its price.
#[derive(Debug, Clone)]
pub struct Draft {
    pub attempt_id: Ulid,
    pub room: Room,
    pub stay: DateRange,
    pub num_guests: u32,
    pub guest: GuestDetails,
    pub quote: Quote,
}

pub type EmailTask = JoinHandle<Result<EmailReceipt, MailError>>;

pub struct BookingFlow {
    deps: FlowDeps,
    settings: FlowSettings,
    state: FlowState,
    draft: Option<Draft>,
    acknowledged: bool,
    order: Option<Order>,
    receipt: Option<PaymentReceipt>,
    booking: Option<Booking>,
    email_task: Option<EmailTask>,
    cancel: CancellationToken,
}

impl Drop for BookingFlow {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl BookingFlow {
    pub fn new(deps: FlowDeps, settings: FlowSettings) -> Self {
        Self {
            deps,
            settings,
            state: FlowState::Idle,
            draft: None,
            acknowledged: false,
            order: None,
            receipt: None,
            booking: None,
            email_task: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn draft(&self) -> Option<&Draft> {
        self.draft.as_ref()
    }

    pub fn order(&self) -> Option<&Order> {
        self.order.as_ref()
    }

    pub fn receipt(&self) -> Option<&PaymentReceipt> {
        self.receipt.as_ref()
    }

    pub fn booking(&self) -> Option<&Booking> {
        self.booking.as_ref()
    }

    /// Token that aborts in-flight waits when cancelled. Cancelled on drop.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The confirmation email send, once a booking is confirmed.
    pub fn take_email_task(&mut self) -> Option<EmailTask> {
        self.email_task.take()
    }

    fn transition(&mut self, next: FlowState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal flow transition {:?} -> {next:?}",
            self.state
        );
        debug!(from = ?self.state, to = ?next, "booking flow transition");
        self.state = next;
    }

    fn expect_state(&self, allowed: &[FlowState], action: &'static str) -> Result<(), FlowError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(FlowError::InvalidState { state: self.state, action })
        }
    }

    fn reject(&mut self, reason: ConflictReason) -> FlowError {
        metrics::counter!(AVAILABILITY_REJECTIONS_TOTAL, "reason" => reason.label()).increment(1);
        info!(reason = reason.label(), "stay rejected");
        self.transition(FlowState::Idle);
        FlowError::Unavailable(reason)
    }

    async fn check_availability(&self, room: &Room, stay: &DateRange, today: Day) -> Result<DateRange, AvailabilityFailure> {
        let events = self
            .deps
            .backend
            .calendar_events(room.id, stay)
            .await
            .map_err(AvailabilityFailure::Backend)?;
        check_stay(stay.start, stay.end, today, &events, room.units()).map_err(AvailabilityFailure::Conflict)
    }

    /// Validate the form, then check the stay against the live calendar and price it.
    /// Form problems are reported without any network call.
    pub async fn begin(&mut self, request: BookingRequest, today: Day) -> Result<Quote, FlowError> {
        self.expect_state(&[FlowState::Idle, FlowState::FormValidated], "begin")?;
        if let Some(rx) = &self.deps.maintenance {
            let status = rx.borrow();
            if status.enabled {
                return Err(FlowError::Maintenance(status.message.clone()));
            }
        }
        let errors = request.validate(today);
        if !errors.is_empty() {
            return Err(FlowError::Validation(errors));
        }
        let stay = DateRange::new(request.check_in, request.check_out);

        self.draft = None;
        self.transition(FlowState::AvailabilityChecking);
        let room = match self.deps.backend.room(request.room_id).await {
            Ok(room) => room,
            Err(e) => {
                self.transition(FlowState::Idle);
                return Err(FlowError::Backend(e));
            }
        };
        if let Err(e) = check_room(&room, request.num_guests) {
            self.transition(FlowState::Idle);
            return Err(e);
        }
        match self.check_availability(&room, &stay, today).await {
            Ok(_) => {}
            Err(AvailabilityFailure::Conflict(reason)) => return Err(self.reject(reason)),
            Err(AvailabilityFailure::Backend(e)) => {
                self.transition(FlowState::Idle);
                return Err(FlowError::Backend(e));
            }
        }
        let priced = match quote(&room, stay.start, stay.end, request.num_guests) {
            Ok(q) => q,
            Err(e) => {
                self.transition(FlowState::Idle);
                return Err(FlowError::Pricing(e));
            }
        };

        self.draft = Some(Draft {
            attempt_id: Ulid::new(),
            room,
            stay,
            num_guests: request.num_guests,
            guest: request.guest,
            quote: priced.clone(),
        });
        self.transition(FlowState::FormValidated);
        Ok(priced)
    }

    /// Show the booking summary. The guest must acknowledge it before paying.
    pub fn review(&mut self) -> Result<&Draft, FlowError> {
        self.expect_state(&[FlowState::FormValidated], "review")?;
        self.acknowledged = false;
        self.transition(FlowState::ConfirmationPending);
        self.draft
            .as_ref()
            .ok_or(FlowError::InvalidState { state: self.state, action: "review" })
    }

    pub fn acknowledge(&mut self, acknowledged: bool) -> Result<(), FlowError> {
        self.expect_state(&[FlowState::ConfirmationPending], "acknowledge")?;
        self.acknowledged = acknowledged;
        Ok(())
    }

    /// Leave the summary and return to the form.
    pub fn edit(&mut self) -> Result<(), FlowError> {
        self.expect_state(&[FlowState::ConfirmationPending], "edit")?;
        self.acknowledged = false;
        self.transition(FlowState::FormValidated);
        Ok(())
    }

    /// Re-check availability, create the payment order, run the checkout widget and,
    /// once paid, persist the booking.
    pub async fn pay(&mut self, today: Day) -> Result<Booking, FlowError> {
        self.expect_state(&[FlowState::ConfirmationPending], "pay")?;
        if !self.acknowledged {
            return Err(FlowError::NotAcknowledged);
        }
        let Some(draft) = self.draft.clone() else {
            return Err(FlowError::InvalidState { state: self.state, action: "pay" });
        };

        // The room or its calendar may have changed while the guest read the summary.
        let room = self
            .deps
            .backend
            .room(draft.room.id)
            .await
            .map_err(FlowError::Backend)?;
        if let Err(e) = check_room(&room, draft.num_guests) {
            info!(room = %room.id, "room changed before payment");
            self.draft = None;
            self.transition(FlowState::Idle);
            return Err(e);
        }
        match self.check_availability(&room, &draft.stay, today).await {
            Ok(_) => {}
            Err(AvailabilityFailure::Conflict(reason)) => {
                self.draft = None;
                return Err(self.reject(reason));
            }
            Err(AvailabilityFailure::Backend(e)) => return Err(FlowError::Backend(e)),
        }

        let order = self.create_order(&draft).await?;
        let receipt = self.collect_payment(&draft, order).await?;
        self.persist(&draft, receipt).await
    }

    async fn create_order(&mut self, draft: &Draft) -> Result<Order, FlowError> {
        let amount = draft.quote.total_minor_units().map_err(FlowError::Pricing)?;
        let mut notes = BTreeMap::new();
        notes.insert("room".to_string(), draft.room.slug.clone());
        notes.insert("check_in".to_string(), draft.stay.start.to_string());
        notes.insert("check_out".to_string(), draft.stay.end.to_string());
        notes.insert("guests".to_string(), draft.num_guests.to_string());
        notes.insert("guest_email".to_string(), draft.guest.email.trim().to_string());
        let request = OrderRequest {
            amount,
            currency: self.settings.currency.clone(),
            receipt: format!("rcpt_{}", draft.attempt_id),
            notes,
        };

        self.transition(FlowState::PaymentOrderCreating);
        let orders = self.deps.orders.clone();
        let started = Instant::now();
        let result = run_with_retry(&self.settings.retry, &self.cancel, |attempt| {
            metrics::counter!(ORDER_ATTEMPTS_TOTAL).increment(1);
            debug!(attempt, receipt = %request.receipt, "creating payment order");
            let orders = orders.clone();
            let request = &request;
            async move { orders.create_order(request).await }
        })
        .await;
        metrics::histogram!(ORDER_CREATE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        match result {
            Ok(order) => {
                info!(order_id = %order.id, amount = order.amount, "payment order ready");
                self.order = Some(order.clone());
                Ok(order)
            }
            Err(RetryError::Cancelled) => {
                self.transition(FlowState::Idle);
                Err(FlowError::Cancelled)
            }
            Err(e) => {
                warn!(error = %e, "payment order creation failed");
                self.transition(FlowState::FormValidated);
                Err(FlowError::OrderCreation(e))
            }
        }
    }

    async fn collect_payment(&mut self, draft: &Draft, order: Order) -> Result<PaymentReceipt, FlowError> {
        self.transition(FlowState::PaymentInProgress);
        let request = CheckoutRequest {
            description: format!("{} · {} night(s)", draft.room.name, draft.quote.nights),
            prefill: CheckoutPrefill {
                name: draft.guest.name.trim().to_string(),
                email: draft.guest.email.trim().to_string(),
                contact: draft.guest.phone.trim().to_string(),
            },
            order,
        };
        let mut events = match self.deps.checkout.open(request).await {
            Ok(rx) => rx,
            Err(e) => {
                self.transition(FlowState::PaymentFailed);
                return Err(FlowError::Checkout(e));
            }
        };

        let guard = PaymentGuard::new();
        let Some(outcome) = await_outcome(&mut events, &guard, &self.cancel).await else {
            self.transition(FlowState::Idle);
            return Err(FlowError::Cancelled);
        };
        metrics::counter!(PAYMENT_OUTCOMES_TOTAL, "outcome" => payment_outcome_label(&outcome)).increment(1);

        match outcome {
            PaymentOutcome::Succeeded(receipt) => {
                info!(payment_id = %receipt.payment_id, order_id = %receipt.order_id, "payment succeeded");
                self.receipt = Some(receipt.clone());
                self.transition(FlowState::PaymentSucceeded);
                Ok(receipt)
            }
            PaymentOutcome::Dismissed => {
                info!("payment dismissed by guest");
                self.transition(FlowState::PaymentCancelled);
                Err(FlowError::PaymentCancelled)
            }
            PaymentOutcome::Failed { code, description } => {
                warn!(%code, %description, "payment failed");
                self.transition(FlowState::PaymentFailed);
                Err(FlowError::PaymentFailed { code, description })
            }
        }
    }

    /// Save the paid booking. Not cancellable: the guest has already been charged.
    async fn persist(&mut self, draft: &Draft, receipt: PaymentReceipt) -> Result<Booking, FlowError> {
        self.transition(FlowState::BookingPersisting);
        let booking = Booking {
            id: Ulid::new(),
            room_id: draft.room.id,
            stay: draft.stay,
            num_guests: draft.num_guests,
            booking_status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Paid,
            total_amount: draft.quote.total,
            guest: GuestContact {
                name: draft.guest.name.trim().to_string(),
                email: draft.guest.email.trim().to_string(),
                phone: draft.guest.phone.trim().to_string(),
                special_requests: draft
                    .guest
                    .special_requests
                    .as_ref()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            },
            payment: Some(receipt.clone().into()),
            created_at: Utc::now(),
        };

        let saved = match self.deps.backend.create_booking(booking).await {
            Ok(saved) => saved,
            Err(source) => {
                metrics::counter!(BOOKING_PERSIST_FAILURES_TOTAL).increment(1);
                error!(
                    payment_id = %receipt.payment_id,
                    order_id = %receipt.order_id,
                    error = %source,
                    "payment taken but booking not saved"
                );
                let support = self.deps.backend.admin_contact().await.ok().flatten();
                self.transition(FlowState::BookingPersistFailed);
                return Err(FlowError::PersistFailed {
                    payment_id: receipt.payment_id,
                    order_id: receipt.order_id,
                    support,
                    source,
                });
            }
        };

        metrics::counter!(BOOKINGS_CONFIRMED_TOTAL).increment(1);
        info!(booking_id = %saved.id, room_id = %saved.room_id, stay = %saved.stay, "booking confirmed");
        self.booking = Some(saved.clone());
        self.transition(FlowState::BookingConfirmed);
        self.spawn_confirmation_email(&saved, draft);
        Ok(saved)
    }

    /// Send the confirmation in the background. A failure is logged, never undone.
    fn spawn_confirmation_email(&mut self, booking: &Booking, draft: &Draft) {
        let Some(mailer) = self.deps.mailer.clone() else { return };
        let email = BookingEmail::new(booking, &draft.room, &draft.quote, &self.settings.currency);
        self.email_task = Some(tokio::spawn(async move {
            let result = mailer.send_booking_confirmation(&email).await;
            if let Err(e) = &result {
                metrics::counter!(EMAIL_FAILURES_TOTAL).increment(1);
                warn!(booking_id = %email.booking.id, error = %e, "confirmation email failed");
            }
            result
        }));
    }

    /// Try paying again after a cancelled or failed payment.
    pub fn retry(&mut self) -> Result<(), FlowError> {
        self.expect_state(&[FlowState::PaymentCancelled, FlowState::PaymentFailed], "retry")?;
        self.acknowledged = false;
        self.order = None;
        self.transition(FlowState::ConfirmationPending);
        Ok(())
    }

    /// Back to the start, discarding the attempt.
    pub fn reset(&mut self) {
        self.transition(FlowState::Idle);
        self.draft = None;
        self.acknowledged = false;
        self.order = None;
        self.receipt = None;
        self.booking = None;
    }

    /// Who to contact when something went wrong.
    pub async fn support_contact(&self) -> Option<AdminContact> {
        match self.deps.backend.admin_contact().await {
            Ok(contact) => contact,
            Err(e) => {
                warn!(error = %e, "admin contact unavailable");
                None
            }
        }
    }
}

/// The room takes bookings and sleeps `num_guests`.
fn check_room(room: &Room, num_guests: u32) -> Result<(), FlowError> {
    if num_guests > room.max_occupancy {
        return Err(FlowError::Validation(vec![ValidationError::InvalidGuestCount {
            guests: num_guests,
            max: Some(room.max_occupancy),
        }]));
    }
    if !room.is_active {
        return Err(FlowError::Backend(EngineError::InvalidBooking(
            "room is not accepting bookings",
        )));
    }
    Ok(())
}

enum AvailabilityFailure {
    Conflict(ConflictReason),
    Backend(EngineError),
}
