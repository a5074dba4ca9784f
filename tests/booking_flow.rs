use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use staydesk::backend::Backend;
use staydesk::email::{BookingEmail, EmailReceipt, MailError, Mailer};
use staydesk::engine::{BookingFilter, ConflictReason, Engine, EngineError};
use staydesk::flow::{BookingFlow, BookingRequest, FlowDeps, FlowError, FlowSettings, FlowState, GuestDetails, ValidationError};
use staydesk::maintenance::MaintenanceStatus;
use staydesk::model::{
    AdminContact, Booking, BookingStatus, CalendarEvent, DateRange, GuestContact, MaintenanceMode, PaymentStatus,
    Price, Room,
};
use staydesk::notify::NotifyHub;
use staydesk::payment::{
    CheckoutEvent, CheckoutRequest, CheckoutWidget, GatewayError, Order, OrderGateway, OrderRequest,
    PaymentReceipt,
};
use staydesk::pricing::OccupancyTier;
use staydesk::retry::{RetryError, RetryPolicy};

// ── Fakes ────────────────────────────────────────────────────

struct FakeGateway {
    calls: AtomicUsize,
    fail_first: usize,
    failure: GatewayError,
    requests: Mutex<Vec<OrderRequest>>,
}

impl FakeGateway {
    fn ok() -> Self {
        Self::failing(0, GatewayError::Transport("unused".into()))
    }

    fn failing(fail_first: usize, failure: GatewayError) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_first,
            failure,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderGateway for FakeGateway {
    async fn create_order(&self, request: &OrderRequest) -> Result<Order, GatewayError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());
        if n <= self.fail_first {
            return Err(self.failure.clone());
        }
        Ok(Order {
            id: format!("order_{n}"),
            amount: request.amount,
            currency: request.currency.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Script {
    Succeed,
    Dismiss,
    Fail,
    /// Success followed by a late failure and a dismissal.
    Duplicate,
    /// Widget torn down without a callback.
    Close,
    /// Widget stays open and silent.
    Hang,
}

#[derive(Default)]
struct ScriptedCheckout {
    scripts: Mutex<VecDeque<Script>>,
    opened: Mutex<Vec<CheckoutRequest>>,
    held: Mutex<Vec<mpsc::Sender<CheckoutEvent>>>,
}

impl ScriptedCheckout {
    fn with(scripts: &[Script]) -> Self {
        Self {
            scripts: Mutex::new(scripts.iter().copied().collect()),
            ..Self::default()
        }
    }

    fn opens(&self) -> usize {
        self.opened.lock().unwrap().len()
    }
}

#[async_trait]
impl CheckoutWidget for ScriptedCheckout {
    async fn open(&self, request: CheckoutRequest) -> Result<mpsc::Receiver<CheckoutEvent>, GatewayError> {
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Script::Succeed);
        let n = {
            let mut opened = self.opened.lock().unwrap();
            opened.push(request.clone());
            opened.len()
        };
        let success = CheckoutEvent::Succeeded(PaymentReceipt {
            order_id: request.order.id.clone(),
            payment_id: format!("pay_{n}"),
            signature: Some("sig".into()),
        });
        let failure = CheckoutEvent::Failed {
            code: "BAD_REQUEST_ERROR".into(),
            description: "Card declined".into(),
        };

        let (tx, rx) = mpsc::channel(8);
        let events = match script {
            Script::Succeed => vec![success],
            Script::Dismiss => vec![CheckoutEvent::Dismissed],
            Script::Fail => vec![failure],
            Script::Duplicate => vec![success, failure, CheckoutEvent::Dismissed],
            Script::Close | Script::Hang => vec![],
        };
        for event in events {
            tx.try_send(event).unwrap();
        }
        if let Script::Hang = script {
            self.held.lock().unwrap().push(tx);
        }
        Ok(rx)
    }
}

#[derive(Default)]
struct RecordingMailer {
    fail: bool,
    sent: Mutex<Vec<BookingEmail>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_booking_confirmation(&self, email: &BookingEmail) -> Result<EmailReceipt, MailError> {
        self.sent.lock().unwrap().push(email.clone());
        if self.fail {
            return Err(MailError::Rejected {
                status: 500,
                message: "smtp unavailable".into(),
            });
        }
        Ok(EmailReceipt {
            customer_message_id: format!("<{}@staydesk>", email.booking.id),
            admin_message_id: None,
        })
    }
}

/// Engine whose booking writes always fail.
struct BrokenWrites(Arc<Engine>);

#[async_trait]
impl Backend for BrokenWrites {
    async fn room(&self, id: Ulid) -> Result<Room, EngineError> {
        self.0.room(id).await
    }

    async fn calendar_events(&self, room_id: Ulid, window: &DateRange) -> Result<Vec<CalendarEvent>, EngineError> {
        self.0.calendar_events(room_id, window).await
    }

    async fn create_booking(&self, _booking: Booking) -> Result<Booking, EngineError> {
        Err(EngineError::WalError("disk full".into()))
    }

    async fn update_booking_status(
        &self,
        id: Ulid,
        booking_status: BookingStatus,
        payment_status: PaymentStatus,
    ) -> Result<Booking, EngineError> {
        self.0.update_booking_status(id, booking_status, payment_status).await
    }

    async fn maintenance(&self) -> Result<MaintenanceMode, EngineError> {
        Ok(self.0.maintenance().await)
    }

    async fn admin_contact(&self) -> Result<Option<AdminContact>, EngineError> {
        Ok(self.0.admin_contact().await)
    }
}

// ── Harness ──────────────────────────────────────────────────

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn today() -> NaiveDate {
    day(2025, 7, 1)
}

fn wal_path() -> PathBuf {
    let dir = std::env::temp_dir().join("staydesk_flow_test");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(format!("{}.wal", Ulid::new()))
}

fn cottage(quantity: u32) -> Room {
    Room {
        id: Ulid::new(),
        name: "Hillside Cottage".into(),
        slug: format!("cottage-{}", Ulid::new()).to_lowercase(),
        description: Some("Two rooms and a view".into()),
        price_per_night: Price::new("800"),
        price_double_occupancy: Some(Price::new("1000")),
        price_triple_occupancy: Some(Price::new("1200")),
        max_occupancy: 3,
        quantity,
        is_active: true,
        images: vec![],
        amenities: vec!["wifi".into()],
    }
}

fn request(room_id: Ulid, check_in: NaiveDate, check_out: NaiveDate, guests: u32) -> BookingRequest {
    BookingRequest {
        room_id,
        check_in,
        check_out,
        num_guests: guests,
        guest: GuestDetails {
            name: "Meera Iyer".into(),
            email: "meera@example.com".into(),
            phone: "+91 91234 56789".into(),
            special_requests: Some("Late arrival".into()),
        },
    }
}

fn existing_booking(room_id: Ulid, check_in: NaiveDate, check_out: NaiveDate) -> Booking {
    Booking {
        id: Ulid::new(),
        room_id,
        stay: DateRange::new(check_in, check_out),
        num_guests: 2,
        booking_status: BookingStatus::Confirmed,
        payment_status: PaymentStatus::Paid,
        total_amount: Decimal::from(2000),
        guest: GuestContact {
            name: "Ravi Menon".into(),
            email: "ravi@example.com".into(),
            phone: "+91 99887 76655".into(),
            special_requests: None,
        },
        payment: None,
        created_at: Utc::now(),
    }
}

struct Harness {
    engine: Arc<Engine>,
    room: Room,
    orders: Arc<FakeGateway>,
    checkout: Arc<ScriptedCheckout>,
    mailer: Arc<RecordingMailer>,
}

impl Harness {
    async fn new(quantity: u32) -> Self {
        let engine = Arc::new(Engine::new(wal_path(), Arc::new(NotifyHub::default())).unwrap());
        let room = cottage(quantity);
        engine.create_room(room.clone()).await.unwrap();
        Self {
            engine,
            room,
            orders: Arc::new(FakeGateway::ok()),
            checkout: Arc::new(ScriptedCheckout::default()),
            mailer: Arc::new(RecordingMailer::default()),
        }
    }

    fn deps(&self) -> FlowDeps {
        FlowDeps {
            backend: self.engine.clone(),
            orders: self.orders.clone(),
            checkout: self.checkout.clone(),
            mailer: Some(self.mailer.clone()),
            maintenance: None,
        }
    }

    fn settings() -> FlowSettings {
        FlowSettings {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                attempt_timeout: Duration::from_secs(5),
                jitter: false,
            },
            currency: "INR".into(),
        }
    }

    fn flow(&self) -> BookingFlow {
        BookingFlow::new(self.deps(), Self::settings())
    }

    /// Flow parked on the summary with the box ticked.
    async fn ready_to_pay(&self, check_in: NaiveDate, check_out: NaiveDate, guests: u32) -> BookingFlow {
        let mut flow = self.flow();
        assert_ok!(flow.begin(request(self.room.id, check_in, check_out, guests), today()).await);
        assert_ok!(flow.review());
        assert_ok!(flow.acknowledge(true));
        flow
    }

    async fn stored_bookings(&self) -> Vec<Booking> {
        self.engine
            .bookings(&BookingFilter {
                room_id: Some(self.room.id),
                guest_email: None,
            })
            .await
    }
}

// ── Happy path ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn paid_booking_is_persisted_and_emailed() {
    let h = Harness::new(1).await;
    let mut flow = h.flow();

    let quote = flow
        .begin(request(h.room.id, day(2025, 7, 10), day(2025, 7, 12), 2), today())
        .await
        .unwrap();
    assert_eq!(flow.state(), FlowState::FormValidated);
    assert_eq!(quote.nights, 2);
    assert_eq!(quote.tier, OccupancyTier::Double);
    assert_eq!(quote.total, Decimal::from(2000));

    let draft = flow.review().unwrap();
    assert_eq!(draft.quote.total, Decimal::from(2000));
    assert_eq!(flow.state(), FlowState::ConfirmationPending);
    flow.acknowledge(true).unwrap();

    let booking = flow.pay(today()).await.unwrap();
    assert_eq!(flow.state(), FlowState::BookingConfirmed);
    assert_eq!(booking.booking_status, BookingStatus::Confirmed);
    assert_eq!(booking.payment_status, PaymentStatus::Paid);
    assert_eq!(booking.total_amount, Decimal::from(2000));
    assert_eq!(booking.guest.special_requests.as_deref(), Some("Late arrival"));
    let payment = booking.payment.clone().unwrap();
    assert_eq!(payment.order_id, "order_1");
    assert_eq!(payment.payment_id, "pay_1");

    let order_request = h.orders.requests.lock().unwrap()[0].clone();
    assert_eq!(order_request.amount, 200_000);
    assert_eq!(order_request.currency, "INR");
    assert!(order_request.receipt.starts_with("rcpt_"));
    assert_eq!(order_request.notes["check_in"], "2025-07-10");

    let opened = h.checkout.opened.lock().unwrap()[0].clone();
    assert_eq!(opened.prefill.email, "meera@example.com");

    let email = flow.take_email_task().unwrap().await.unwrap();
    assert_ok!(email);
    let sent = h.mailer.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].booking.id, booking.id);
    assert_eq!(sent[0].payment_details.payment_id.as_deref(), Some("pay_1"));

    let stored = h.stored_bookings().await;
    assert_eq!(stored, vec![booking]);
}

#[tokio::test(start_paused = true)]
async fn three_guests_pay_the_triple_rate() {
    let h = Harness::new(1).await;
    let mut flow = h.flow();
    let quote = flow
        .begin(request(h.room.id, day(2025, 7, 10), day(2025, 7, 13), 3), today())
        .await
        .unwrap();
    assert_eq!(quote.tier, OccupancyTier::Triple);
    assert_eq!(quote.total, Decimal::from(3600));
}

// ── Validation and availability ──────────────────────────────

#[tokio::test(start_paused = true)]
async fn form_errors_stop_before_any_call() {
    let h = Harness::new(1).await;
    let mut flow = h.flow();
    let mut req = request(h.room.id, day(2025, 7, 10), day(2025, 7, 10), 2);
    req.guest.name.clear();

    let err = flow.begin(req, today()).await.unwrap_err();
    let FlowError::Validation(ref errors) = err else {
        panic!("expected validation errors, got {err:?}");
    };
    assert!(errors.contains(&ValidationError::Missing("name")));
    assert!(errors.contains(&ValidationError::Dates(ConflictReason::SameDay {
        day: day(2025, 7, 10)
    })));
    assert_eq!(flow.state(), FlowState::Idle);
    assert_eq!(h.orders.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn too_many_guests_rejected_against_room() {
    let h = Harness::new(1).await;
    let mut flow = h.flow();
    let err = flow
        .begin(request(h.room.id, day(2025, 7, 10), day(2025, 7, 12), 4), today())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::Validation(ref errors)
            if errors == &[ValidationError::InvalidGuestCount { guests: 4, max: Some(3) }]
    ));
    assert_eq!(flow.state(), FlowState::Idle);
}

#[tokio::test(start_paused = true)]
async fn taken_dates_rejected_at_begin() {
    let h = Harness::new(1).await;
    h.engine
        .create_booking(existing_booking(h.room.id, day(2025, 7, 11), day(2025, 7, 14)))
        .await
        .unwrap();

    let mut flow = h.flow();
    let err = flow
        .begin(request(h.room.id, day(2025, 7, 10), day(2025, 7, 12), 2), today())
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Unavailable(ConflictReason::Booked { .. })));
    assert_eq!(flow.state(), FlowState::Idle);

    // Checking out the day the other stay starts is fine.
    assert_ok!(
        flow.begin(request(h.room.id, day(2025, 7, 9), day(2025, 7, 11), 2), today())
            .await
    );
}

#[tokio::test(start_paused = true)]
async fn over_long_stay_rejected_before_any_order() {
    let h = Harness::new(1).await;
    let mut flow = h.flow();
    let err = flow
        .begin(request(h.room.id, day(2025, 7, 10), day(2025, 10, 18), 2), today())
        .await
        .unwrap_err();
    let FlowError::Validation(ref errors) = err else {
        panic!("expected validation errors, got {err:?}");
    };
    assert_eq!(
        errors,
        &[ValidationError::Dates(ConflictReason::TooLong { nights: 100, max: 90 })]
    );
    assert_eq!(flow.state(), FlowState::Idle);
    assert_eq!(h.orders.calls(), 0);
    assert_eq!(h.checkout.opens(), 0);
    assert!(h.stored_bookings().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn room_deactivated_during_review_is_not_charged() {
    let h = Harness::new(1).await;
    let mut flow = h.ready_to_pay(day(2025, 7, 10), day(2025, 7, 12), 2).await;
    h.engine.set_room_active(h.room.id, false).await.unwrap();

    let err = flow.pay(today()).await.unwrap_err();
    assert!(matches!(err, FlowError::Backend(EngineError::InvalidBooking(_))));
    assert_eq!(flow.state(), FlowState::Idle);
    assert!(flow.draft().is_none());
    assert_eq!(h.orders.calls(), 0);
    assert_eq!(h.checkout.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn occupancy_lowered_during_review_is_not_charged() {
    let h = Harness::new(1).await;
    let mut flow = h.ready_to_pay(day(2025, 7, 10), day(2025, 7, 12), 3).await;
    let mut smaller = h.room.clone();
    smaller.max_occupancy = 2;
    h.engine.update_room(smaller).await.unwrap();

    let err = flow.pay(today()).await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::Validation(ref errors)
            if errors == &[ValidationError::InvalidGuestCount { guests: 3, max: Some(2) }]
    ));
    assert_eq!(flow.state(), FlowState::Idle);
    assert_eq!(h.orders.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn dates_taken_during_review_stop_before_order() {
    let h = Harness::new(1).await;
    let mut flow = h.ready_to_pay(day(2025, 7, 10), day(2025, 7, 12), 2).await;

    h.engine
        .create_booking(existing_booking(h.room.id, day(2025, 7, 11), day(2025, 7, 12)))
        .await
        .unwrap();

    let err = flow.pay(today()).await.unwrap_err();
    assert!(matches!(err, FlowError::Unavailable(_)));
    assert_eq!(flow.state(), FlowState::Idle);
    assert_eq!(h.orders.calls(), 0);
    assert_eq!(h.checkout.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn maintenance_mode_refuses_new_attempts() {
    let h = Harness::new(1).await;
    let (_tx, rx) = watch::channel(MaintenanceStatus {
        enabled: true,
        message: Some("Back tomorrow".into()),
        last_fetched: None,
    });
    let mut deps = h.deps();
    deps.maintenance = Some(rx);
    let mut flow = BookingFlow::new(deps, Harness::settings());

    let err = flow
        .begin(request(h.room.id, day(2025, 7, 10), day(2025, 7, 12), 2), today())
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Maintenance(Some(ref m)) if m == "Back tomorrow"));
    assert_eq!(flow.state(), FlowState::Idle);
}

// ── Confirmation gate ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn payment_requires_acknowledgement() {
    let h = Harness::new(1).await;
    let mut flow = h.flow();
    assert_ok!(flow.begin(request(h.room.id, day(2025, 7, 10), day(2025, 7, 12), 2), today()).await);

    assert!(matches!(
        flow.pay(today()).await,
        Err(FlowError::InvalidState { state: FlowState::FormValidated, .. })
    ));
    flow.review().unwrap();
    assert!(matches!(flow.pay(today()).await, Err(FlowError::NotAcknowledged)));
    assert_eq!(h.orders.calls(), 0);

    flow.acknowledge(true).unwrap();
    assert_ok!(flow.pay(today()).await);
}

// ── Order creation ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn flaky_order_endpoint_is_retried() {
    let mut h = Harness::new(1).await;
    h.orders = Arc::new(FakeGateway::failing(
        2,
        GatewayError::Status {
            status: 503,
            body: "busy".into(),
        },
    ));
    let mut flow = h.ready_to_pay(day(2025, 7, 10), day(2025, 7, 12), 2).await;

    let booking = flow.pay(today()).await.unwrap();
    assert_eq!(h.orders.calls(), 3);
    assert_eq!(booking.payment.unwrap().order_id, "order_3");
}

#[tokio::test(start_paused = true)]
async fn exhausted_order_retries_return_to_form() {
    let mut h = Harness::new(1).await;
    h.orders = Arc::new(FakeGateway::failing(
        usize::MAX,
        GatewayError::Transport("connection reset".into()),
    ));
    let mut flow = h.ready_to_pay(day(2025, 7, 10), day(2025, 7, 12), 2).await;

    let err = flow.pay(today()).await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::OrderCreation(RetryError::Exhausted { attempts: 3, .. })
    ));
    assert_eq!(flow.state(), FlowState::FormValidated);
    assert_eq!(h.checkout.opens(), 0);
    assert!(h.stored_bookings().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn rejected_order_is_not_retried() {
    let mut h = Harness::new(1).await;
    h.orders = Arc::new(FakeGateway::failing(
        usize::MAX,
        GatewayError::Status {
            status: 400,
            body: "amount invalid".into(),
        },
    ));
    let mut flow = h.ready_to_pay(day(2025, 7, 10), day(2025, 7, 12), 2).await;

    let err = flow.pay(today()).await.unwrap_err();
    assert!(matches!(err, FlowError::OrderCreation(RetryError::Rejected(_))));
    assert_eq!(h.orders.calls(), 1);
}

// ── Checkout outcomes ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn dismissed_checkout_books_nothing_and_can_retry() {
    let mut h = Harness::new(1).await;
    h.checkout = Arc::new(ScriptedCheckout::with(&[Script::Dismiss, Script::Succeed]));
    let mut flow = h.ready_to_pay(day(2025, 7, 10), day(2025, 7, 12), 2).await;

    assert!(matches!(flow.pay(today()).await, Err(FlowError::PaymentCancelled)));
    assert_eq!(flow.state(), FlowState::PaymentCancelled);
    assert!(h.stored_bookings().await.is_empty());
    assert!(h.mailer.sent.lock().unwrap().is_empty());

    flow.retry().unwrap();
    assert_eq!(flow.state(), FlowState::ConfirmationPending);
    assert!(matches!(flow.pay(today()).await, Err(FlowError::NotAcknowledged)));
    flow.acknowledge(true).unwrap();
    let booking = flow.pay(today()).await.unwrap();
    assert_eq!(h.stored_bookings().await, vec![booking]);
    assert_eq!(h.orders.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_payment_reports_gateway_reason() {
    let mut h = Harness::new(1).await;
    h.checkout = Arc::new(ScriptedCheckout::with(&[Script::Fail]));
    let mut flow = h.ready_to_pay(day(2025, 7, 10), day(2025, 7, 12), 2).await;

    let err = flow.pay(today()).await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::PaymentFailed { ref description, .. } if description == "Card declined"
    ));
    assert_eq!(flow.state(), FlowState::PaymentFailed);
    assert!(h.stored_bookings().await.is_empty());

    flow.reset();
    assert_eq!(flow.state(), FlowState::Idle);
    assert!(flow.draft().is_none());
}

#[tokio::test(start_paused = true)]
async fn duplicate_callbacks_settle_once() {
    let mut h = Harness::new(1).await;
    h.checkout = Arc::new(ScriptedCheckout::with(&[Script::Duplicate]));
    let mut flow = h.ready_to_pay(day(2025, 7, 10), day(2025, 7, 12), 2).await;

    assert_ok!(flow.pay(today()).await);
    assert_eq!(flow.state(), FlowState::BookingConfirmed);
    assert_eq!(h.stored_bookings().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn closed_widget_counts_as_cancelled() {
    let mut h = Harness::new(1).await;
    h.checkout = Arc::new(ScriptedCheckout::with(&[Script::Close]));
    let mut flow = h.ready_to_pay(day(2025, 7, 10), day(2025, 7, 12), 2).await;

    assert!(matches!(flow.pay(today()).await, Err(FlowError::PaymentCancelled)));
    assert_eq!(flow.state(), FlowState::PaymentCancelled);
}

#[tokio::test(start_paused = true)]
async fn cancelling_abandons_open_checkout() {
    let mut h = Harness::new(1).await;
    h.checkout = Arc::new(ScriptedCheckout::with(&[Script::Hang]));
    let mut flow = h.ready_to_pay(day(2025, 7, 10), day(2025, 7, 12), 2).await;

    let token = flow.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        token.cancel();
    });

    assert!(matches!(flow.pay(today()).await, Err(FlowError::Cancelled)));
    assert_eq!(flow.state(), FlowState::Idle);
    assert!(h.stored_bookings().await.is_empty());
}

// ── After payment ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn persist_failure_surfaces_payment_reference() {
    let h = Harness::new(1).await;
    h.engine
        .set_admin_contact(AdminContact {
            email: "desk@example.com".into(),
            phone: Some("+91 80000 00000".into()),
        })
        .await
        .unwrap();
    let mut deps = h.deps();
    let broken: Arc<dyn Backend> = Arc::new(BrokenWrites(h.engine.clone()));
    deps.backend = broken;
    let mut flow = BookingFlow::new(deps, Harness::settings());
    assert_ok!(flow.begin(request(h.room.id, day(2025, 7, 10), day(2025, 7, 12), 2), today()).await);
    flow.review().unwrap();
    flow.acknowledge(true).unwrap();

    let err = flow.pay(today()).await.unwrap_err();
    let FlowError::PersistFailed { ref payment_id, ref support, .. } = err else {
        panic!("expected persist failure, got {err:?}");
    };
    assert_eq!(payment_id, "pay_1");
    assert_eq!(support.as_ref().map(|c| c.email.as_str()), Some("desk@example.com"));
    assert!(err.to_string().contains("pay_1"));
    assert_eq!(flow.state(), FlowState::BookingPersistFailed);
    assert!(flow.take_email_task().is_none());
    assert!(h.mailer.sent.lock().unwrap().is_empty());
    assert_eq!(flow.support_contact().await.unwrap().email, "desk@example.com");
}

#[tokio::test(start_paused = true)]
async fn email_failure_keeps_the_booking() {
    let mut h = Harness::new(1).await;
    h.mailer = Arc::new(RecordingMailer {
        fail: true,
        ..RecordingMailer::default()
    });
    let mut flow = h.ready_to_pay(day(2025, 7, 10), day(2025, 7, 12), 2).await;

    let booking = flow.pay(today()).await.unwrap();
    let email = flow.take_email_task().unwrap().await.unwrap();
    assert_err!(email);
    assert_eq!(flow.state(), FlowState::BookingConfirmed);
    assert_eq!(h.stored_bookings().await, vec![booking]);
}

#[tokio::test(start_paused = true)]
async fn racing_guests_get_one_booking_for_last_unit() {
    let h = Harness::new(1).await;
    let mut first = h.ready_to_pay(day(2025, 7, 10), day(2025, 7, 12), 2).await;
    let mut second = h.ready_to_pay(day(2025, 7, 11), day(2025, 7, 13), 2).await;

    let (a, b) = futures::future::join(first.pay(today()), second.pay(today())).await;
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(FlowError::Unavailable(_) | FlowError::PersistFailed { .. })
    )));
    assert_eq!(h.stored_bookings().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn two_unit_room_takes_two_overlapping_stays() {
    let h = Harness::new(2).await;
    let mut first = h.ready_to_pay(day(2025, 7, 10), day(2025, 7, 12), 2).await;
    assert_ok!(first.pay(today()).await);
    let mut second = h.ready_to_pay(day(2025, 7, 10), day(2025, 7, 12), 1).await;
    assert_ok!(second.pay(today()).await);

    let mut third = h.flow();
    let err = third
        .begin(request(h.room.id, day(2025, 7, 11), day(2025, 7, 12), 1), today())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::Unavailable(ConflictReason::FullyBooked { quantity: 2, .. })
    ));
}
