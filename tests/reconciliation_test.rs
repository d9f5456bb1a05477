//! Integration tests for settling payment attempts against provider lookups.
//!
//! Tests cover:
//! - Redirect and explicit verify settling a payment exactly once
//! - Pending, failed and unreachable provider answers
//! - Forged or unknown callbacks
//! - Orders with more than one attempt
//! - The stale-attempt sweep

mod common;

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{khalti_pidx, params, TestApp};
use serde_json::{json, Value};
use settle_api::{
    config::EsewaConfig,
    entities::{
        commerce::CartStatus, AttemptStatus, FulfillmentStatus, OrderModel, PaymentLogEvent,
        PaymentMethod, PaymentStatus, Provider,
    },
    events::Event,
    gateways::esewa::format_amount,
    services::{
        commerce::{CheckoutInput, ShippingInfo},
        payments::InitiatedPayment,
        reconciliation::{OutcomeKind, Reason, VerifyHint},
    },
};
use uuid::Uuid;
use wiremock::ResponseTemplate;

struct Placed {
    owner: Uuid,
    order: OrderModel,
    payment: InitiatedPayment,
}

async fn place_online_order(app: &TestApp, sku: &str, price: i64, method: PaymentMethod) -> Placed {
    let owner = Uuid::new_v4();
    let variant = app.seed_variant(sku, price).await;
    app.add_to_cart(owner, variant.id, 1).await;

    let result = app
        .state
        .checkout
        .checkout(
            owner,
            CheckoutInput {
                payment_method: method,
                shipping_info: Some(ShippingInfo {
                    full_name: "Ram Thapa".into(),
                    phone: "9811111111".into(),
                    address: "New Road".into(),
                    city: "Kathmandu".into(),
                }),
                notes: None,
            },
        )
        .await
        .expect("checkout");

    Placed {
        owner,
        order: result.order,
        payment: result.payment.expect("online payment"),
    }
}

async fn lookup_calls(app: &TestApp) -> usize {
    app.khalti
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/epayment/lookup/")
        .count()
}

async fn esewa_calls(app: &TestApp) -> usize {
    app.esewa
        .received_requests()
        .await
        .unwrap_or_default()
        .len()
}

// ==================== Success ====================

#[tokio::test]
async fn khalti_return_settles_once_and_converts_cart() {
    let mut app = TestApp::new().await;
    let placed = place_online_order(&app, "K-OK", 120_000, PaymentMethod::Khalti).await;
    let pidx = khalti_pidx(placed.payment.payment_id);
    app.mock_khalti_lookup(&pidx, "Completed", 120_000, None).await;
    app.drain_events();

    let callback = params(&[("pidx", pidx.as_str()), ("status", "Completed")]);
    let outcome = app
        .state
        .reconciliation
        .handle_callback(Provider::Khalti, &callback)
        .await;

    assert_eq!(outcome.kind, OutcomeKind::Success);
    assert_eq!(outcome.reason, Reason::Paid);
    assert_eq!(outcome.order_id, Some(placed.order.id));
    assert_eq!(outcome.payment_id, Some(placed.payment.payment_id));
    assert!(outcome.terminal);
    assert_eq!(outcome.state, "Completed");

    let order = app.order(placed.order.id).await;
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert_eq!(order.fulfillment_status, FulfillmentStatus::Processing);
    assert_eq!(order.payment_method, Some(PaymentMethod::Khalti));
    assert!(order.paid_at.is_some());

    assert_eq!(
        app.attempt(placed.payment.payment_id).await.status,
        AttemptStatus::Paid
    );
    let carts = app.carts_of(placed.owner).await;
    assert_eq!(carts[0].status, CartStatus::Converted);
    assert!(carts[0].order_id.is_none());

    let events = app.drain_events();
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::PaymentSucceeded { .. }))
            .count(),
        1
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::CartConverted { order_id, .. } if *order_id == placed.order.id)));

    // A duplicate redirect short-circuits on the stored state.
    let again = app
        .state
        .reconciliation
        .handle_callback(Provider::Khalti, &callback)
        .await;
    assert_eq!(again.kind, OutcomeKind::Success);
    assert_eq!(again.reason, Reason::AlreadyPaid);
    assert_eq!(lookup_calls(&app).await, 1);
    assert!(app
        .drain_events()
        .iter()
        .all(|e| !matches!(e, Event::PaymentSucceeded { .. })));

    let logs = app.logs_for(placed.payment.payment_id).await;
    let kinds: Vec<_> = logs.iter().map(|l| l.event_type).collect();
    assert!(kinds.contains(&PaymentLogEvent::Redirect));
    assert!(kinds.contains(&PaymentLogEvent::VerifyResponse));
}

#[tokio::test]
async fn pending_lookup_keeps_waiting_until_completed() {
    let app = TestApp::new().await;
    let placed = place_online_order(&app, "K-WAIT", 40_000, PaymentMethod::Khalti).await;
    let pidx = khalti_pidx(placed.payment.payment_id);
    app.mock_khalti_lookup(&pidx, "Pending", 40_000, Some(1)).await;
    app.mock_khalti_lookup(&pidx, "Completed", 40_000, None).await;

    let hint = || VerifyHint {
        reference: Some(pidx.clone()),
        data: None,
    };

    let first = app
        .state
        .reconciliation
        .verify(placed.payment.payment_id, Provider::Khalti, hint())
        .await
        .unwrap();
    assert_eq!(first.kind, OutcomeKind::Pending);
    assert_eq!(first.reason, Reason::Processing);
    assert!(!first.terminal);
    assert_eq!(first.state, "Pending");
    assert_eq!(
        app.order(placed.order.id).await.payment_status,
        PaymentStatus::Pending
    );
    assert_eq!(
        app.carts_of(placed.owner).await[0].status,
        CartStatus::CheckoutPending
    );

    let second = app
        .state
        .reconciliation
        .verify(placed.payment.payment_id, Provider::Khalti, hint())
        .await
        .unwrap();
    assert_eq!(second.kind, OutcomeKind::Success);
    assert_eq!(
        app.order(placed.order.id).await.payment_status,
        PaymentStatus::Paid
    );
}

#[tokio::test]
async fn concurrent_verifies_settle_once() {
    let mut app = TestApp::new().await;
    let placed = place_online_order(&app, "K-RACE", 9_900, PaymentMethod::Khalti).await;
    let pidx = khalti_pidx(placed.payment.payment_id);
    app.mock_khalti_lookup(&pidx, "Completed", 9_900, None).await;
    app.drain_events();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = app.state.reconciliation.clone();
        let payment_id = placed.payment.payment_id;
        handles.push(tokio::spawn(async move {
            engine
                .verify(payment_id, Provider::Khalti, VerifyHint::default())
                .await
        }));
    }

    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Success);
    }

    let succeeded = app
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, Event::PaymentSucceeded { .. }))
        .count();
    assert_eq!(succeeded, 1);
}

#[tokio::test]
async fn esewa_signed_return_settles_payment() {
    let app = TestApp::new().await;
    let placed = place_online_order(&app, "E-OK", 10_000, PaymentMethod::Esewa).await;
    let uuid = placed.payment.payment_id.to_string();
    app.mock_esewa_status(&uuid, "COMPLETE", &format_amount(10_000))
        .await;

    let data = app.esewa_callback_data(&uuid, "100.0");
    let outcome = app
        .state
        .reconciliation
        .handle_callback(Provider::Esewa, &params(&[("data", data.as_str())]))
        .await;

    assert_eq!(outcome.kind, OutcomeKind::Success);
    assert_eq!(outcome.state, "COMPLETE");
    let order = app.order(placed.order.id).await;
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert_eq!(order.payment_method, Some(PaymentMethod::Esewa));
}

// ==================== Failure ====================

#[tokio::test]
async fn canceled_payment_fails_order_and_returns_cart() {
    let mut app = TestApp::new().await;
    let placed = place_online_order(&app, "K-CANCEL", 15_000, PaymentMethod::Khalti).await;
    let pidx = khalti_pidx(placed.payment.payment_id);
    app.mock_khalti_lookup(&pidx, "User canceled", 15_000, None)
        .await;
    app.drain_events();

    let outcome = app
        .state
        .reconciliation
        .handle_callback(Provider::Khalti, &params(&[("pidx", pidx.as_str())]))
        .await;

    assert_eq!(outcome.kind, OutcomeKind::Failed);
    assert_eq!(outcome.reason, Reason::GatewayDeclined);
    assert!(outcome.terminal);

    assert_eq!(
        app.attempt(placed.payment.payment_id).await.status,
        AttemptStatus::Failed
    );
    let order = app.order(placed.order.id).await;
    assert_eq!(order.payment_status, PaymentStatus::Failed);
    assert!(order.paid_at.is_none());

    let carts = app.carts_of(placed.owner).await;
    assert_eq!(carts.len(), 1);
    assert_eq!(carts[0].status, CartStatus::Active);
    assert!(carts[0].order_id.is_none());

    let events = app.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::PaymentFailed { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::CartUnlocked { abandoned: false, .. })));

    // The released cart can be checked out again.
    let retry = app
        .state
        .checkout
        .checkout(
            placed.owner,
            CheckoutInput {
                payment_method: PaymentMethod::Cod,
                shipping_info: None,
                notes: None,
            },
        )
        .await
        .expect("second checkout");
    assert_eq!(retry.order.total, 15_000);

    // A late failed redirect changes nothing.
    let late = app
        .state
        .reconciliation
        .handle_callback(Provider::Khalti, &params(&[("pidx", pidx.as_str())]))
        .await;
    assert_eq!(late.kind, OutcomeKind::Failed);
    assert_eq!(lookup_calls(&app).await, 1);
}

#[tokio::test]
async fn failure_abandons_cart_when_owner_started_a_new_one() {
    let mut app = TestApp::new().await;
    let placed = place_online_order(&app, "K-NEWCART", 20_000, PaymentMethod::Khalti).await;
    let pidx = khalti_pidx(placed.payment.payment_id);
    let other = app.seed_variant("K-NEWCART-2", 500).await;
    app.add_to_cart(placed.owner, other.id, 1).await;
    app.mock_khalti_lookup(&pidx, "Expired", 20_000, None).await;
    app.drain_events();

    let outcome = app
        .state
        .reconciliation
        .verify(placed.payment.payment_id, Provider::Khalti, VerifyHint::default())
        .await
        .unwrap();
    assert_eq!(outcome.kind, OutcomeKind::Failed);

    let carts = app.carts_of(placed.owner).await;
    let statuses: Vec<_> = carts.iter().map(|c| c.status).collect();
    assert!(statuses.contains(&CartStatus::Abandoned));
    assert!(statuses.contains(&CartStatus::Active));
    assert!(app
        .drain_events()
        .iter()
        .any(|e| matches!(e, Event::CartUnlocked { abandoned: true, .. })));
}

#[tokio::test]
async fn esewa_failure_return_is_verified_before_failing() {
    let app = TestApp::new().await;
    let placed = place_online_order(&app, "E-CANCEL", 5_000, PaymentMethod::Esewa).await;
    let uuid = placed.payment.payment_id.to_string();
    app.mock_esewa_status(&uuid, "CANCELED", "50").await;

    let outcome = app
        .state
        .reconciliation
        .handle_callback(
            Provider::Esewa,
            &params(&[("transaction_uuid", uuid.as_str())]),
        )
        .await;

    assert_eq!(outcome.kind, OutcomeKind::Failed);
    assert_eq!(esewa_calls(&app).await, 1);
    assert_eq!(
        app.order(placed.order.id).await.payment_status,
        PaymentStatus::Failed
    );
}

#[tokio::test]
async fn esewa_not_found_is_not_a_failure() {
    let app = TestApp::new().await;
    let placed = place_online_order(&app, "E-NF", 5_000, PaymentMethod::Esewa).await;
    let uuid = placed.payment.payment_id.to_string();
    app.mock_esewa_status(&uuid, "NOT_FOUND", "50").await;

    let outcome = app
        .state
        .reconciliation
        .verify(placed.payment.payment_id, Provider::Esewa, VerifyHint::default())
        .await
        .unwrap();

    assert_eq!(outcome.kind, OutcomeKind::Pending);
    assert_eq!(
        app.attempt(placed.payment.payment_id).await.status,
        AttemptStatus::Pending
    );
}

#[tokio::test]
async fn other_pending_attempt_keeps_order_open() {
    let app = TestApp::new().await;
    let placed = place_online_order(&app, "K-TWO", 33_000, PaymentMethod::Khalti).await;
    let second = app
        .state
        .payments
        .initiate(Some(placed.owner), placed.order.id, Provider::Khalti)
        .await
        .expect("second attempt");

    app.mock_khalti_lookup(&khalti_pidx(placed.payment.payment_id), "Expired", 33_000, None)
        .await;
    app.mock_khalti_lookup(&khalti_pidx(second.payment_id), "Completed", 33_000, None)
        .await;

    let failed = app
        .state
        .reconciliation
        .verify(placed.payment.payment_id, Provider::Khalti, VerifyHint::default())
        .await
        .unwrap();
    assert_eq!(failed.kind, OutcomeKind::Failed);
    assert_eq!(
        app.order(placed.order.id).await.payment_status,
        PaymentStatus::Pending
    );
    assert_eq!(
        app.carts_of(placed.owner).await[0].status,
        CartStatus::CheckoutPending
    );

    let paid = app
        .state
        .reconciliation
        .verify(second.payment_id, Provider::Khalti, VerifyHint::default())
        .await
        .unwrap();
    assert_eq!(paid.kind, OutcomeKind::Success);
    assert_eq!(
        app.order(placed.order.id).await.payment_status,
        PaymentStatus::Paid
    );
    assert_eq!(
        app.carts_of(placed.owner).await[0].status,
        CartStatus::Converted
    );
}

// ==================== Provider trouble ====================

#[tokio::test]
async fn provider_error_leaves_payment_pending() {
    let app = TestApp::new().await;
    let placed = place_online_order(&app, "K-500", 7_000, PaymentMethod::Khalti).await;
    let pidx = khalti_pidx(placed.payment.payment_id);
    app.mock_khalti_lookup_response(
        &pidx,
        ResponseTemplate::new(500).set_body_string("upstream exploded"),
    )
    .await;

    let outcome = app
        .state
        .reconciliation
        .handle_callback(Provider::Khalti, &params(&[("pidx", pidx.as_str())]))
        .await;

    assert_eq!(outcome.kind, OutcomeKind::Pending);
    assert_eq!(outcome.reason, Reason::GatewayUnreachable);
    assert_eq!(
        app.attempt(placed.payment.payment_id).await.status,
        AttemptStatus::Pending
    );
    assert_eq!(
        app.carts_of(placed.owner).await[0].status,
        CartStatus::CheckoutPending
    );
    let logs = app.logs_for(placed.payment.payment_id).await;
    assert!(logs.iter().any(|l| l.event_type == PaymentLogEvent::Error));
}

#[tokio::test]
async fn provider_rejection_is_pending_with_its_own_reason() {
    let app = TestApp::new().await;
    let placed = place_online_order(&app, "K-401", 4_000, PaymentMethod::Khalti).await;
    let pidx = khalti_pidx(placed.payment.payment_id);
    app.mock_khalti_lookup_response(
        &pidx,
        ResponseTemplate::new(401).set_body_json(json!({ "detail": "Invalid token." })),
    )
    .await;

    let outcome = app
        .state
        .reconciliation
        .verify(placed.payment.payment_id, Provider::Khalti, VerifyHint::default())
        .await
        .unwrap();

    assert_eq!(outcome.kind, OutcomeKind::Pending);
    assert_eq!(outcome.reason, Reason::GatewayError);
    assert_eq!(
        app.attempt(placed.payment.payment_id).await.status,
        AttemptStatus::Pending
    );
}

#[tokio::test]
async fn slow_provider_times_out_as_pending() {
    let app = TestApp::new().await;
    let placed = place_online_order(&app, "K-SLOW", 7_000, PaymentMethod::Khalti).await;
    let pidx = khalti_pidx(placed.payment.payment_id);
    app.mock_khalti_lookup_response(
        &pidx,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "pidx": pidx, "status": "Completed", "total_amount": 7_000 }))
            .set_delay(Duration::from_secs(5)),
    )
    .await;

    let outcome = app
        .state
        .reconciliation
        .verify(placed.payment.payment_id, Provider::Khalti, VerifyHint::default())
        .await
        .unwrap();

    assert_eq!(outcome.kind, OutcomeKind::Pending);
    assert_eq!(outcome.reason, Reason::GatewayUnreachable);
    assert_eq!(
        app.order(placed.order.id).await.payment_status,
        PaymentStatus::Pending
    );
}

#[tokio::test]
async fn amount_mismatch_is_held_for_review() {
    let app = TestApp::new().await;
    let placed = place_online_order(&app, "K-SHORT", 50_000, PaymentMethod::Khalti).await;
    let pidx = khalti_pidx(placed.payment.payment_id);
    app.mock_khalti_lookup(&pidx, "Completed", 1_000, None).await;

    let outcome = app
        .state
        .reconciliation
        .verify(placed.payment.payment_id, Provider::Khalti, VerifyHint::default())
        .await
        .unwrap();

    assert_eq!(outcome.kind, OutcomeKind::Pending);
    assert_eq!(outcome.reason, Reason::AmountMismatch);
    assert_eq!(
        app.attempt(placed.payment.payment_id).await.status,
        AttemptStatus::Pending
    );
    assert_eq!(
        app.order(placed.order.id).await.payment_status,
        PaymentStatus::Pending
    );
}

// ==================== Untrusted input ====================

#[tokio::test]
async fn tampered_esewa_data_is_rejected_without_side_effects() {
    let app = TestApp::new().await;
    let placed = place_online_order(&app, "E-FORGE", 10_000, PaymentMethod::Esewa).await;
    let uuid = placed.payment.payment_id.to_string();

    let genuine = app.esewa_callback_data(&uuid, "100.0");
    let mut payload: Value = serde_json::from_slice(&STANDARD.decode(genuine).unwrap()).unwrap();
    payload["total_amount"] = json!("1.0");
    let forged = STANDARD.encode(payload.to_string());

    let outcome = app
        .state
        .reconciliation
        .handle_callback(Provider::Esewa, &params(&[("data", forged.as_str())]))
        .await;

    assert_eq!(outcome.kind, OutcomeKind::Invalid);
    assert_eq!(outcome.reason, Reason::MalformedCallback);
    assert!(outcome.payment_id.is_none());
    assert_eq!(esewa_calls(&app).await, 0);
    assert_eq!(
        app.attempt(placed.payment.payment_id).await.status,
        AttemptStatus::Pending
    );
    let logs = app.logs_for(placed.payment.payment_id).await;
    assert!(logs.iter().all(|l| l.event_type != PaymentLogEvent::Redirect));
}

#[tokio::test]
async fn unknown_references_are_not_found() {
    let app = TestApp::new().await;

    let outcome = app
        .state
        .reconciliation
        .handle_callback(Provider::Khalti, &params(&[("pidx", "never-issued")]))
        .await;
    assert_eq!(outcome.kind, OutcomeKind::NotFound);
    assert_eq!(outcome.reason, Reason::UnknownReference);

    let outcome = app
        .state
        .reconciliation
        .verify(Uuid::new_v4(), Provider::Khalti, VerifyHint::default())
        .await
        .unwrap();
    assert_eq!(outcome.kind, OutcomeKind::NotFound);
    assert_eq!(lookup_calls(&app).await, 0);
}

#[tokio::test]
async fn missing_reference_is_malformed() {
    let app = TestApp::new().await;
    let outcome = app
        .state
        .reconciliation
        .handle_callback(Provider::Khalti, &params(&[("status", "Completed")]))
        .await;
    assert_eq!(outcome.kind, OutcomeKind::Invalid);
}

#[tokio::test]
async fn verify_rejects_mismatched_provider_and_reference() {
    let app = TestApp::new().await;
    let placed = place_online_order(&app, "K-MIX", 3_000, PaymentMethod::Khalti).await;

    let wrong_provider = app
        .state
        .reconciliation
        .verify(placed.payment.payment_id, Provider::Esewa, VerifyHint::default())
        .await
        .unwrap();
    assert_eq!(wrong_provider.kind, OutcomeKind::Invalid);

    let wrong_reference = app
        .state
        .reconciliation
        .verify(
            placed.payment.payment_id,
            Provider::Khalti,
            VerifyHint {
                reference: Some("pidx-of-someone-else".into()),
                data: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(wrong_reference.kind, OutcomeKind::NotFound);
    assert_eq!(lookup_calls(&app).await, 0);
}

#[tokio::test]
async fn callback_for_unconfigured_provider_is_invalid() {
    let app = TestApp::with_config(|cfg| cfg.esewa = EsewaConfig::default()).await;
    let outcome = app
        .state
        .reconciliation
        .handle_callback(Provider::Esewa, &params(&[("transaction_uuid", "x")]))
        .await;
    assert_eq!(outcome.kind, OutcomeKind::Invalid);
    assert_eq!(outcome.reason, Reason::InternalError);
}

// ==================== Sweep ====================

#[tokio::test]
async fn sweep_settles_stale_attempts_only() {
    let app = TestApp::new().await;
    let hour_ago = chrono::Utc::now() - chrono::Duration::hours(1);

    let paid = place_online_order(&app, "SW-PAID", 1_000, PaymentMethod::Khalti).await;
    app.mock_khalti_lookup(&khalti_pidx(paid.payment.payment_id), "Completed", 1_000, None)
        .await;
    app.backdate_attempt(paid.payment.payment_id, hour_ago).await;

    let down = place_online_order(&app, "SW-DOWN", 2_000, PaymentMethod::Khalti).await;
    app.mock_khalti_lookup_response(
        &khalti_pidx(down.payment.payment_id),
        ResponseTemplate::new(502),
    )
    .await;
    app.backdate_attempt(down.payment.payment_id, hour_ago).await;

    let fresh = place_online_order(&app, "SW-FRESH", 3_000, PaymentMethod::Khalti).await;

    let report = app
        .state
        .reconciliation
        .sweep_pending(chrono::Duration::minutes(30))
        .await
        .unwrap();

    assert_eq!(report.examined, 2);
    assert_eq!(report.settled, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.still_pending, 1);

    assert_eq!(
        app.attempt(paid.payment.payment_id).await.status,
        AttemptStatus::Paid
    );
    assert_eq!(
        app.attempt(fresh.payment.payment_id).await.status,
        AttemptStatus::Pending
    );
}

#[tokio::test]
async fn sweep_reaches_attempts_behind_a_full_batch_of_stuck_ones() {
    let app = TestApp::new().await;
    let two_hours_ago = chrono::Utc::now() - chrono::Duration::hours(2);
    app.mock_esewa_status_for_all("NOT_FOUND").await;

    // 201 abandoned eSewa forms, all older than the attempt that can settle.
    let stuck = place_online_order(&app, "SW-STUCK", 1_500, PaymentMethod::Esewa).await;
    app.backdate_attempt(stuck.payment.payment_id, two_hours_ago)
        .await;
    for i in 0..200 {
        app.insert_pending_attempt(
            &stuck.order,
            Provider::Esewa,
            &format!("abandoned-{}", i),
            two_hours_ago + chrono::Duration::seconds(i + 1),
        )
        .await;
    }

    let paid = place_online_order(&app, "SW-LATE", 1_000, PaymentMethod::Khalti).await;
    app.mock_khalti_lookup(&khalti_pidx(paid.payment.payment_id), "Completed", 1_000, None)
        .await;
    app.backdate_attempt(paid.payment.payment_id, chrono::Utc::now() - chrono::Duration::hours(1))
        .await;

    let report = app
        .state
        .reconciliation
        .sweep_pending(chrono::Duration::minutes(30))
        .await
        .unwrap();

    assert_eq!(report.examined, 202);
    assert_eq!(report.settled, 1);
    assert_eq!(report.still_pending, 201);
    assert_eq!(
        app.attempt(paid.payment.payment_id).await.status,
        AttemptStatus::Paid
    );

    let again = app
        .state
        .reconciliation
        .sweep_pending(chrono::Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(again.examined, 201);
    assert_eq!(again.settled, 0);
}
