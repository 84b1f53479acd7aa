use actix_web::{http::StatusCode, test::TestRequest};
use delivery_engine::{
    db_types::{OrderStatusType, Role},
    test_utils::{
        fake_provider::FakePaymentProvider,
        fixtures::{ADMIN_ID, CUSTOMER_ID, OTHER_CUSTOMER_ID, OTHER_PARTNER_ID, OWNER_ID, PARTNER_ID},
    },
};
use serde_json::json;

use super::helpers::{as_user, TestServer};

async fn server() -> TestServer<FakePaymentProvider> {
    TestServer::with_provider(FakePaymentProvider::new()).await
}

#[actix_web::test]
async fn health_check() {
    let server = server().await;
    let (status, body) = server.send(TestRequest::get().uri("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "👍️\n");
}

#[actix_web::test]
async fn requests_without_an_identity_are_refused() {
    let server = server().await;
    let (status, body) = server.send(TestRequest::get().uri("/api/orders/1")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");

    // Routes behind an access list fail in the middleware instead
    let req = TestRequest::post().uri("/api/orders").set_json(server.menu.two_pastas());
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");

    let req = as_user(TestRequest::get().uri("/api/orders/1"), CUSTOMER_ID, Role::Customer)
        .insert_header(("X-User-Role", "chef"));
    let (status, _) = server.send(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn identity_headers_can_be_switched_off() {
    let mut server = server().await;
    server.state.options.trust_identity_headers = false;
    let req = as_user(TestRequest::post().uri("/api/orders"), CUSTOMER_ID, Role::Customer)
        .set_json(server.menu.two_pastas());
    let (status, _) = server.send(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(server.run_jobs().await, 0);
}

#[actix_web::test]
async fn only_customers_place_orders() {
    let server = server().await;
    let req = as_user(TestRequest::post().uri("/api/orders"), OWNER_ID, Role::RestaurantOwner)
        .set_json(server.menu.two_pastas());
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[actix_web::test]
async fn place_order() {
    let server = server().await;
    let req = as_user(TestRequest::post().uri("/api/orders"), CUSTOMER_ID, Role::Customer)
        .set_json(server.menu.two_pastas());
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "PENDING");
    assert_eq!(body["payment_status"], "PENDING");
    assert_eq!(body["customer_id"], CUSTOMER_ID.value());
    assert_eq!(body["subtotal"], 2500);
    assert_eq!(body["tax_amount"], 200);
    assert_eq!(body["total_amount"], 2500 + 299 + 200);
}

#[actix_web::test]
async fn customers_cannot_discount_their_own_orders() {
    let server = server().await;
    let mut body = serde_json::to_value(server.menu.two_pastas()).unwrap();
    body["discount_amount"] = json!(10_000);
    let req = as_user(TestRequest::post().uri("/api/orders"), CUSTOMER_ID, Role::Customer).set_json(body);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["discount_amount"], 0);
    assert_eq!(body["total_amount"], 2999);
}

#[actix_web::test]
async fn oversized_orders_are_rejected() {
    let server = server().await;
    let menu = &server.menu;
    let huge = menu.order_of(&[(&menu.pasta, i64::MAX / 10)]);
    let req = as_user(TestRequest::post().uri("/api/orders"), CUSTOMER_ID, Role::Customer).set_json(huge);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    // Each line fits on its own but the subtotal does not
    let lines = i64::MAX / 1250;
    let huge = menu.order_of(&[(&menu.pasta, lines), (&menu.pasta, lines)]);
    let req = as_user(TestRequest::post().uri("/api/orders"), CUSTOMER_ID, Role::Customer).set_json(huge);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert_eq!(body["message"], "Invalid order: the order total is too large");
}

#[actix_web::test]
async fn bad_orders_are_rejected() {
    let server = server().await;
    let small = server.menu.order_of(&[(&server.menu.salad, 1)]);
    let req = as_user(TestRequest::post().uri("/api/orders"), CUSTOMER_ID, Role::Customer).set_json(small);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "below_minimum_order");

    let req = as_user(TestRequest::post().uri("/api/orders"), CUSTOMER_ID, Role::Customer)
        .set_json(json!({"restaurant_id": "Luigi's"}));
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request_body");
}

#[actix_web::test]
async fn fetch_order_by_id() {
    let mut server = server().await;
    let order = server.place_order().await;
    let uri = format!("/api/orders/{}", order.id.value());

    let (status, body) = server.send(as_user(TestRequest::get().uri(&uri), CUSTOMER_ID, Role::Customer)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order_number"], order.order_number.as_str());
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    let (status, _) = server.send(as_user(TestRequest::get().uri(&uri), OWNER_ID, Role::RestaurantOwner)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = server.send(as_user(TestRequest::get().uri(&uri), ADMIN_ID, Role::Admin)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = server.send(as_user(TestRequest::get().uri(&uri), OTHER_CUSTOMER_ID, Role::Customer)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
    // Nobody has been assigned yet
    let (status, _) = server.send(as_user(TestRequest::get().uri(&uri), PARTNER_ID, Role::DeliveryPartner)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let req = as_user(TestRequest::get().uri("/api/orders/9999"), ADMIN_ID, Role::Admin);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "order_not_found");

    let req = as_user(TestRequest::get().uri("/api/orders/latest"), ADMIN_ID, Role::Admin);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request_path");
}

#[actix_web::test]
async fn status_changes_are_queued() {
    let mut server = server().await;
    let order = server.place_order().await;
    let uri = format!("/api/orders/{}/status", order.id.value());

    let req = as_user(TestRequest::post().uri(&uri), OWNER_ID, Role::RestaurantOwner)
        .set_json(json!({"status": "CONFIRMED"}));
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["job_id"].as_u64().unwrap() > 0);
    // Nothing has changed until the job runs
    assert_eq!(server.order_status(&order).await, OrderStatusType::Pending);
    server.run_jobs().await;
    assert_eq!(server.order_status(&order).await, OrderStatusType::Confirmed);

    let req = as_user(TestRequest::post().uri(&uri), CUSTOMER_ID, Role::Customer)
        .set_json(json!({"status": "PREPARING"}));
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let req = as_user(TestRequest::post().uri(&uri), OWNER_ID, Role::RestaurantOwner)
        .set_json(json!({"status": "DELIVERED"}));
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");
    assert_eq!(body["message"], "Cannot move an order from CONFIRMED to DELIVERED");
    assert_eq!(server.run_jobs().await, 0);
}

#[actix_web::test]
async fn customers_cancel_their_own_orders() {
    let mut server = server().await;
    let order = server.place_order().await;
    let uri = format!("/api/orders/{}/cancel", order.id.value());

    let req = as_user(TestRequest::post().uri(&uri), OTHER_CUSTOMER_ID, Role::Customer);
    let (status, _) = server.send(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let req = as_user(TestRequest::post().uri(&uri), OWNER_ID, Role::RestaurantOwner);
    let (status, _) = server.send(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let req = as_user(TestRequest::post().uri(&uri), CUSTOMER_ID, Role::Customer)
        .set_json(json!({"reason": "changed my mind"}));
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");
    assert_eq!(body["cancellation_reason"], "changed my mind");
    assert!(body["cancelled_at"].is_string());

    let req = as_user(TestRequest::post().uri(&uri), CUSTOMER_ID, Role::Customer);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");
}

#[actix_web::test]
async fn assigning_a_delivery_partner() {
    use OrderStatusType::*;
    let mut server = server().await;
    let order = server.place_order().await;
    let uri = format!("/api/orders/{}/assign", order.id.value());

    let req = as_user(TestRequest::post().uri(&uri), PARTNER_ID, Role::DeliveryPartner);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "not_ready_for_pickup");

    server.advance(&order, &[Confirmed, Preparing, ReadyForPickup]).await;

    let req = as_user(TestRequest::post().uri(&uri), ADMIN_ID, Role::Admin);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request_body");

    let req = as_user(TestRequest::post().uri(&uri), PARTNER_ID, Role::DeliveryPartner);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["delivery_partner_id"], PARTNER_ID.value());
    assert_eq!(body["status"], "READY_FOR_PICKUP");

    let req = as_user(TestRequest::post().uri(&uri), ADMIN_ID, Role::Admin)
        .set_json(json!({"delivery_partner_id": OTHER_PARTNER_ID}));
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "partner_already_assigned");

    // The assigned partner can now see and move the order
    let uri = format!("/api/orders/{}", order.id.value());
    let (status, _) = server.send(as_user(TestRequest::get().uri(&uri), PARTNER_ID, Role::DeliveryPartner)).await;
    assert_eq!(status, StatusCode::OK);
    let uri = format!("/api/orders/{}/status", order.id.value());
    let req = as_user(TestRequest::post().uri(&uri), PARTNER_ID, Role::DeliveryPartner)
        .set_json(json!({"status": "OUT_FOR_DELIVERY"}));
    let (status, _) = server.send(req).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    server.run_jobs().await;
    assert_eq!(server.order_status(&order).await, OutForDelivery);
}

#[actix_web::test]
async fn customers_list_their_orders() {
    let mut server = server().await;
    let first = server.place_order().await;
    let second = server.place_order().await;
    server.advance(&first, &[OrderStatusType::Cancelled]).await;

    let req = as_user(TestRequest::get().uri("/api/orders"), CUSTOMER_ID, Role::Customer);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::OK);
    let listed = body.as_array().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0]["id"], second.id.value());
    assert_eq!(listed[0]["items"].as_array().unwrap().len(), 1);

    let req = as_user(TestRequest::get().uri("/api/orders?status=CANCELLED&limit=5"), CUSTOMER_ID, Role::Customer);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["id"], first.id.value());

    let req = as_user(TestRequest::get().uri("/api/orders"), OTHER_CUSTOMER_ID, Role::Customer);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let req = as_user(TestRequest::get().uri("/api/orders?limit=500"), CUSTOMER_ID, Role::Customer);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    let req = as_user(TestRequest::get().uri("/api/orders?status=SHIPPED"), CUSTOMER_ID, Role::Customer);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request_query");
    let req = as_user(TestRequest::get().uri("/api/orders"), PARTNER_ID, Role::DeliveryPartner);
    let (status, _) = server.send(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn restaurant_orders_are_for_their_owner() {
    let mut server = server().await;
    let order = server.place_order().await;
    let uri = format!("/api/restaurants/{}/orders", server.menu.restaurant.id.value());

    let (status, body) = server.send(as_user(TestRequest::get().uri(&uri), OWNER_ID, Role::RestaurantOwner)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["order_number"], order.order_number.as_str());
    let (status, _) = server.send(as_user(TestRequest::get().uri(&uri), ADMIN_ID, Role::Admin)).await;
    assert_eq!(status, StatusCode::OK);

    // Another owner is told the restaurant does not exist
    let req = as_user(TestRequest::get().uri(&uri), OTHER_CUSTOMER_ID, Role::RestaurantOwner);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "restaurant_not_found");
    let (status, _) = server.send(as_user(TestRequest::get().uri(&uri), CUSTOMER_ID, Role::Customer)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn couriers_see_unclaimed_deliveries() {
    use OrderStatusType::*;
    let mut server = server().await;
    let ready = server.place_order().await;
    let cooking = server.place_order().await;
    server.advance(&ready, &[Confirmed, Preparing, ReadyForPickup]).await;
    server.advance(&cooking, &[Confirmed, Preparing]).await;

    let req = as_user(TestRequest::get().uri("/api/deliveries/available"), PARTNER_ID, Role::DeliveryPartner);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["id"], ready.id.value());

    let uri = format!("/api/orders/{}/assign", ready.id.value());
    let (status, _) = server.send(as_user(TestRequest::post().uri(&uri), PARTNER_ID, Role::DeliveryPartner)).await;
    assert_eq!(status, StatusCode::OK);
    let req = as_user(TestRequest::get().uri("/api/deliveries/available"), OTHER_PARTNER_ID, Role::DeliveryPartner);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let req = as_user(TestRequest::get().uri("/api/deliveries/available?limit=51"), PARTNER_ID, Role::DeliveryPartner);
    let (status, _) = server.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let req = as_user(TestRequest::get().uri("/api/deliveries/available"), CUSTOMER_ID, Role::Customer);
    let (status, _) = server.send(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn dead_letters_are_for_admins() {
    let server = server().await;
    let req = as_user(TestRequest::get().uri("/api/admin/dead_letters"), ADMIN_ID, Role::Admin);
    let (status, body) = server.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let req = as_user(TestRequest::get().uri("/api/admin/dead_letters"), CUSTOMER_ID, Role::Customer);
    let (status, _) = server.send(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
