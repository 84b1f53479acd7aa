use actix_web::{http::StatusCode, test::TestRequest};
use delivery_engine::{
    db_types::{Actor, Order, OrderStatusType, PaymentId, PaymentStatusType, Role},
    gateway::{CreatedIntent, PaymentProvider, ProviderError},
    test_utils::{
        fake_provider::FakePaymentProvider,
        fixtures::{ADMIN_ID, CUSTOMER_ID, OTHER_CUSTOMER_ID, OWNER_ID},
    },
    PaymentManagement,
};
use serde_json::{json, Value};
use stripe_tools::SIGNATURE_HEADER;

use super::{
    helpers::{as_user, TestServer},
    mocks::MockProvider,
};

async fn fake_server() -> TestServer<FakePaymentProvider> {
    TestServer::with_provider(FakePaymentProvider::new()).await
}

fn intent_request(order: &Order, method: &str) -> TestRequest {
    let body = json!({"order_id": order.id, "payment_method": method});
    as_user(TestRequest::post().uri("/api/payments/intent"), CUSTOMER_ID, Role::Customer).set_json(body)
}

fn webhook(payload: Vec<u8>, signature: &str) -> TestRequest {
    TestRequest::post()
        .uri("/webhook/payments")
        .insert_header((SIGNATURE_HEADER, signature))
        .insert_header(("Content-Type", "application/json"))
        .set_payload(payload)
}

fn fake_reference(order: &Order) -> String {
    format!("pi_fake_{}", order.id.value())
}

/// Opens a payment over HTTP and returns the payment JSON.
async fn open_payment<P: PaymentProvider>(server: &TestServer<P>, order: &Order) -> Value {
    let (status, body) = server.send(intent_request(order, "credit_card")).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["payment"].clone()
}

async fn paid_order(server: &mut TestServer<FakePaymentProvider>) -> (Order, PaymentId) {
    let order = server.place_order().await;
    let payment = open_payment(server, &order).await;
    let payload = FakePaymentProvider::succeeded_payload("evt_paid", &fake_reference(&order));
    let (status, _) = server.send(webhook(payload, FakePaymentProvider::SIGNATURE)).await;
    assert_eq!(status, StatusCode::OK);
    server.run_jobs().await;
    let payment_id = PaymentId(payment["id"].as_i64().unwrap());
    (order, payment_id)
}

#[actix_web::test]
async fn create_payment_intent() {
    let mut server = fake_server().await;
    let order = server.place_order().await;
    let (status, body) = server.send(intent_request(&order, "credit_card")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["client_secret"], format!("{}_secret", fake_reference(&order)));
    assert_eq!(body["payment"]["status"], "PENDING");
    assert_eq!(body["payment"]["amount"], order.total_amount.value());
    assert_eq!(body["payment"]["provider_reference"], fake_reference(&order).as_str());

    let (status, body) = server.send(intent_request(&order, "credit_card")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "payment_already_exists");
}

#[actix_web::test]
async fn payment_intents_are_checked() {
    let mut server = fake_server().await;
    let order = server.place_order().await;

    let (status, body) = server.send(intent_request(&order, "cash_on_delivery")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unsupported_payment_method");

    let body = json!({"order_id": order.id, "payment_method": "credit_card"});
    let req = as_user(TestRequest::post().uri("/api/payments/intent"), OTHER_CUSTOMER_ID, Role::Customer)
        .set_json(&body);
    let (status, _) = server.send(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let req =
        as_user(TestRequest::post().uri("/api/payments/intent"), OWNER_ID, Role::RestaurantOwner).set_json(&body);
    let (status, _) = server.send(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let customer = Actor::Customer(CUSTOMER_ID);
    server.state.orders.transition(order.id, customer, OrderStatusType::Cancelled, None).await.unwrap();
    let (status, body) = server.send(intent_request(&order, "credit_card")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "order_not_payable");
}

#[actix_web::test]
async fn provider_failures_leave_no_payment_behind() {
    let mut provider = MockProvider::new();
    provider
        .expect_create_intent()
        .times(1)
        .returning(|_| Err(ProviderError::Rejected("Your card was declined".into())));
    let mut server = TestServer::with_provider(provider).await;
    let order = server.place_order().await;

    let (status, body) = server.send(intent_request(&order, "debit_card")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "payment_creation_failed");
    let payment = server.state.payments.db().fetch_payment_for_order(order.id).await.unwrap();
    assert!(payment.is_none());
}

#[actix_web::test]
async fn unavailable_provider_can_be_retried() {
    let mut provider = MockProvider::new();
    let mut calls = 0;
    provider.expect_create_intent().times(2).returning(move |req| {
        calls += 1;
        if calls == 1 {
            Err(ProviderError::Transient("connection reset".into()))
        } else {
            Ok(CreatedIntent {
                provider_reference: format!("pi_{}", req.order_id.value()),
                client_secret: "pi_secret".into(),
            })
        }
    });
    let mut server = TestServer::with_provider(provider).await;
    let order = server.place_order().await;

    let (status, body) = server.send(intent_request(&order, "digital_wallet")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "payment_creation_failed");
    let (status, body) = server.send(intent_request(&order, "digital_wallet")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["client_secret"], "pi_secret");
}

#[actix_web::test]
async fn webhook_signatures_are_checked_first() {
    let mut provider = MockProvider::new();
    provider
        .expect_verify_event()
        .times(1)
        .returning(|_, _| Err(ProviderError::InvalidSignature("No signatures found matching the payload".into())));
    let server = TestServer::with_provider(provider).await;

    let (status, body) = server.send(webhook(b"{}".to_vec(), "t=1,v1=00")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_signature");

    // No header at all never reaches the provider
    let req = TestRequest::post().uri("/webhook/payments").set_payload("{}");
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_signature");
}

#[actix_web::test]
async fn webhooks_confirm_orders_once() {
    let mut server = fake_server().await;
    let order = server.place_order().await;
    open_payment(&server, &order).await;
    let payload = FakePaymentProvider::succeeded_payload("evt_1", &fake_reference(&order));

    let (status, body) = server.send(webhook(payload.clone(), FakePaymentProvider::SIGNATURE)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"received": true, "outcome": "applied"}));
    let (status, body) = server.send(webhook(payload, FakePaymentProvider::SIGNATURE)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "duplicate");

    server.run_jobs().await;
    assert_eq!(server.order_status(&order).await, OrderStatusType::Confirmed);
    let order = server.state.orders.fetch_order(order.id).await.unwrap();
    assert!(order.estimated_delivery_time.is_some());

    // A late processing event for the same payment is acknowledged but changes nothing
    let reference = fake_reference(&order);
    let payload =
        FakePaymentProvider::event_payload("evt_2", "payment_intent.processing", &reference, "processing", None);
    let (status, body) = server.send(webhook(payload, FakePaymentProvider::SIGNATURE)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "already_converged");

    let payload = FakePaymentProvider::event_payload("evt_3", "customer.created", "cus_1", "", None);
    let (status, body) = server.send(webhook(payload, FakePaymentProvider::SIGNATURE)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "ignored");
}

#[actix_web::test]
async fn webhooks_for_unknown_payments_are_acknowledged() {
    let mut server = fake_server().await;
    let order = server.place_order().await;
    let payload = FakePaymentProvider::succeeded_payload("evt_early", &fake_reference(&order));

    // The event beats the payment row
    let (status, body) = server.send(webhook(payload.clone(), FakePaymentProvider::SIGNATURE)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "unknown_payment");
    assert_eq!(server.run_jobs().await, 0);

    let payment = open_payment(&server, &order).await;
    let (status, body) = server.send(webhook(payload, FakePaymentProvider::SIGNATURE)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "duplicate");
    assert_eq!(server.order_status(&order).await, OrderStatusType::Pending);

    // A provider check settles it
    server.provider.set_status(&fake_reference(&order), "succeeded", None);
    let uri = format!("/api/payments/{}/sync", payment["id"].as_i64().unwrap());
    let (status, _) = server.send(as_user(TestRequest::post().uri(&uri), CUSTOMER_ID, Role::Customer)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    server.run_jobs().await;
    assert_eq!(server.order_status(&order).await, OrderStatusType::Confirmed);
}

#[actix_web::test]
async fn customers_list_their_payments() {
    let mut server = fake_server().await;
    let mine = server.place_order().await;
    let payment = open_payment(&server, &mine).await;

    let req = as_user(TestRequest::get().uri("/api/payments/mine"), CUSTOMER_ID, Role::Customer);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["id"], payment["id"]);
    assert_eq!(body[0]["order_id"], mine.id.value());

    let req = as_user(TestRequest::get().uri("/api/payments/mine"), OTHER_CUSTOMER_ID, Role::Customer);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
    let req = as_user(TestRequest::get().uri("/api/payments/mine"), ADMIN_ID, Role::Admin);
    let (status, _) = server.send(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn failed_payments_cancel_the_order() {
    let mut server = fake_server().await;
    let order = server.place_order().await;
    open_payment(&server, &order).await;
    let payload = FakePaymentProvider::event_payload(
        "evt_declined",
        "payment_intent.payment_failed",
        &fake_reference(&order),
        "requires_payment_method",
        Some("Your card has insufficient funds."),
    );
    let (status, body) = server.send(webhook(payload, FakePaymentProvider::SIGNATURE)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "applied");
    server.run_jobs().await;
    let order = server.state.orders.fetch_order(order.id).await.unwrap();
    assert_eq!(order.status, OrderStatusType::Cancelled);
    assert_eq!(order.cancellation_reason.as_deref(), Some("payment failed: Your card has insufficient funds."));
}

#[actix_web::test]
async fn admins_refund_completed_payments() {
    let mut server = fake_server().await;
    let (order, payment_id) = paid_order(&mut server).await;
    let uri = format!("/api/payments/{}/refund", payment_id.value());

    let req = as_user(TestRequest::post().uri(&uri), CUSTOMER_ID, Role::Customer);
    let (status, _) = server.send(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let req = as_user(TestRequest::post().uri(&uri), ADMIN_ID, Role::Admin).set_json(json!({"amount": 999_999}));
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_refund_amount");
    assert_eq!(server.provider.refund_calls(), 0);

    let req = as_user(TestRequest::post().uri(&uri), ADMIN_ID, Role::Admin).set_json(json!({"amount": 500}));
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "REFUNDED");
    assert_eq!(body["refund_amount"], 500);
    server.run_jobs().await;
    assert_eq!(server.order_status(&order).await, OrderStatusType::Refunded);

    let req = as_user(TestRequest::post().uri(&uri), ADMIN_ID, Role::Admin);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_payment_state");
    assert_eq!(server.provider.refund_calls(), 1);
}

#[actix_web::test]
async fn provider_refund_failures_change_nothing() {
    let mut server = fake_server().await;
    let (order, payment_id) = paid_order(&mut server).await;
    server.provider.fail_refunds(true);
    let uri = format!("/api/payments/{}/refund", payment_id.value());
    let (status, body) = server.send(as_user(TestRequest::post().uri(&uri), ADMIN_ID, Role::Admin)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "refund_failed");
    assert_eq!(server.run_jobs().await, 0);
    assert_eq!(server.order_status(&order).await, OrderStatusType::Confirmed);
    let payment = server.state.payments.fetch_payment(payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatusType::Completed);
    assert!(payment.refund_amount.is_zero());
}

#[actix_web::test]
async fn payment_sync_polls_the_provider() {
    let mut server = fake_server().await;
    let order = server.place_order().await;
    let payment = open_payment(&server, &order).await;
    let uri = format!("/api/payments/{}/sync", payment["id"].as_i64().unwrap());

    let req = as_user(TestRequest::post().uri(&uri), OTHER_CUSTOMER_ID, Role::Customer);
    let (status, _) = server.send(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let req = as_user(TestRequest::post().uri(&uri), OWNER_ID, Role::RestaurantOwner);
    let (status, _) = server.send(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    server.provider.set_status(&fake_reference(&order), "succeeded", None);
    let req = as_user(TestRequest::post().uri(&uri), CUSTOMER_ID, Role::Customer);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["job_id"].as_u64().is_some());
    server.run_jobs().await;
    assert_eq!(server.order_status(&order).await, OrderStatusType::Confirmed);

    let req = as_user(TestRequest::post().uri("/api/payments/404/sync"), ADMIN_ID, Role::Admin);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "payment_not_found");
}
