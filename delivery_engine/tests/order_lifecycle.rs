mod support;

use chrono::Utc;
use delivery_engine::{
    db_types::{Actor, Money, Order, OrderId, OrderStatusType, OrderUpdate, RestaurantId, UserId},
    notifications::MessageKind,
    queue::Job,
    order_objects::OrderListParams,
    test_utils::fixtures::{CUSTOMER_ID, OTHER_CUSTOMER_ID, OTHER_PARTNER_ID, OWNER_ID, PARTNER_ID},
    DeliveryDatabase,
    MemoryDatabase,
    OrderFlowError,
    OrderManagement,
    StoreError,
};
use support::{eager_configs, memory_harness, notifications_for, sqlite_harness, status_jobs, Harness};

/// Runs the same scenario against both storage backends.
macro_rules! both_backends {
    ($name:ident) => {
        mod $name {
            #[tokio::test]
            async fn memory() {
                super::$name(super::memory_harness().await).await;
            }

            #[tokio::test]
            async fn sqlite() {
                super::$name(super::sqlite_harness().await).await;
            }
        }
    };
}

both_backends!(order_pricing);
both_backends!(illegal_transitions_change_nothing);
both_backends!(every_status_pair_follows_the_graph);
both_backends!(happy_path_stamps_every_step);
both_backends!(replayed_status_jobs_are_noops);
both_backends!(concurrent_transitions_have_one_winner);
both_backends!(concurrent_assignments_have_one_winner);
both_backends!(unpaid_orders_are_cancelled_once);
both_backends!(customers_list_their_own_orders);
both_backends!(restaurant_listings_are_for_the_owner);
both_backends!(available_deliveries_are_unclaimed_and_oldest_first);

async fn order_pricing<B: DeliveryDatabase>(mut h: Harness<B>) {
    let order = h.place_order(CUSTOMER_ID).await;
    assert_eq!(order.subtotal, Money::from(2500));
    assert_eq!(order.delivery_fee, Money::from(299));
    assert_eq!(order.tax_amount, Money::from(200));
    assert_eq!(order.total_amount, Money::from(2999));
    assert_eq!(order.total_amount.to_string(), "29.99");
    assert_eq!(order.status, OrderStatusType::Pending);
    assert!(order.totals_are_consistent());
    let details = h.orders.fetch_order_details(order.id).await.unwrap();
    assert_eq!(details.items.len(), 1);
    assert_eq!(details.items[0].quantity, 2);
    assert_eq!(details.items[0].unit_price, Money::from(1250));

    // A lone salad is 4.00, under the 10.00 minimum
    let request = h.menu.order_of(&[(&h.menu.salad, 1)]);
    let err = h.orders.place_order(CUSTOMER_ID, request).await.unwrap_err();
    assert_eq!(err, OrderFlowError::BelowMinimumOrder { subtotal: Money::from(400), minimum: Money::from(1000) });
    let next = OrderId(order.id.value() + 1);
    assert_eq!(h.orders.fetch_order(next).await.unwrap_err(), OrderFlowError::OrderNotFound(next));
}

async fn illegal_transitions_change_nothing<B: DeliveryDatabase>(mut h: Harness<B>) {
    let order = h.place_order(CUSTOMER_ID).await;
    let owner = Actor::RestaurantOwner(OWNER_ID);
    for target in [OrderStatusType::Preparing, OrderStatusType::Delivered, OrderStatusType::Pending] {
        let err = h.orders.transition(order.id, owner, target, None).await.unwrap_err();
        assert!(matches!(err, OrderFlowError::InvalidTransition { .. } | OrderFlowError::ActorNotPermitted { .. }));
    }
    let err = h.orders.transition(order.id, Actor::System, OrderStatusType::Delivered, None).await.unwrap_err();
    assert_eq!(err, OrderFlowError::InvalidTransition { from: OrderStatusType::Pending, to: OrderStatusType::Delivered });
    let after = h.orders.fetch_order(order.id).await.unwrap();
    assert_eq!(after.status, OrderStatusType::Pending);
    assert_eq!(after.version, order.version);
    assert!(h.pending_jobs().is_empty());
}

fn page(status: Option<OrderStatusType>, limit: Option<i64>, offset: Option<i64>) -> OrderListParams {
    OrderListParams { status, limit, offset }
}

fn ids(orders: &[delivery_engine::order_objects::OrderDetails]) -> Vec<OrderId> {
    orders.iter().map(|d| d.order.id).collect()
}

async fn customers_list_their_own_orders<B: DeliveryDatabase>(mut h: Harness<B>) {
    let first = h.place_order(CUSTOMER_ID).await;
    let second = h.place_order(CUSTOMER_ID).await;
    let third = h.place_order(CUSTOMER_ID).await;
    h.place_order(OTHER_CUSTOMER_ID).await;
    h.orders.transition(second.id, Actor::System, OrderStatusType::Cancelled, None).await.unwrap();

    let mine = h.orders.list_customer_orders(CUSTOMER_ID, OrderListParams::default()).await.unwrap();
    assert_eq!(ids(&mine), vec![third.id, second.id, first.id]);
    assert!(mine.iter().all(|d| d.order.customer_id == CUSTOMER_ID && d.items.len() == 1));

    let cancelled =
        h.orders.list_customer_orders(CUSTOMER_ID, page(Some(OrderStatusType::Cancelled), None, None)).await.unwrap();
    assert_eq!(ids(&cancelled), vec![second.id]);
    let paged = h.orders.list_customer_orders(CUSTOMER_ID, page(None, Some(2), Some(1))).await.unwrap();
    assert_eq!(ids(&paged), vec![second.id, first.id]);
    let past_the_end = h.orders.list_customer_orders(CUSTOMER_ID, page(None, None, Some(3))).await.unwrap();
    assert!(past_the_end.is_empty());

    for bad in [page(None, Some(0), None), page(None, Some(101), None), page(None, None, Some(-1))] {
        let err = h.orders.list_customer_orders(CUSTOMER_ID, bad).await.unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }
    let theirs = h.orders.list_customer_orders(OTHER_CUSTOMER_ID, OrderListParams::default()).await.unwrap();
    assert_eq!(theirs.len(), 1);
}

async fn restaurant_listings_are_for_the_owner<B: DeliveryDatabase>(mut h: Harness<B>) {
    let a = h.place_order(CUSTOMER_ID).await;
    let b = h.place_order(OTHER_CUSTOMER_ID).await;
    h.orders.transition(a.id, Actor::System, OrderStatusType::Confirmed, None).await.unwrap();
    let restaurant = h.menu.restaurant.id;
    let owner = Actor::RestaurantOwner(OWNER_ID);

    let all = h.orders.list_restaurant_orders(owner, restaurant, OrderListParams::default()).await.unwrap();
    assert_eq!(ids(&all), vec![b.id, a.id]);
    let confirmed = h
        .orders
        .list_restaurant_orders(owner, restaurant, page(Some(OrderStatusType::Confirmed), None, None))
        .await
        .unwrap();
    assert_eq!(ids(&confirmed), vec![a.id]);
    let admin = Actor::Admin(UserId(1));
    let newest = h.orders.list_restaurant_orders(admin, restaurant, page(None, Some(1), None)).await.unwrap();
    assert_eq!(ids(&newest), vec![b.id]);

    let outsiders = [
        Actor::RestaurantOwner(UserId(999)),
        Actor::Customer(CUSTOMER_ID),
        Actor::DeliveryPartner(PARTNER_ID),
    ];
    for outsider in outsiders {
        let err = h.orders.list_restaurant_orders(outsider, restaurant, OrderListParams::default()).await.unwrap_err();
        assert_eq!(err, OrderFlowError::RestaurantNotFound(restaurant));
    }
    let missing = RestaurantId(9_999);
    let err = h.orders.list_restaurant_orders(owner, missing, OrderListParams::default()).await.unwrap_err();
    assert_eq!(err, OrderFlowError::RestaurantNotFound(missing));
}

async fn available_deliveries_are_unclaimed_and_oldest_first<B: DeliveryDatabase>(mut h: Harness<B>) {
    use OrderStatusType::*;
    let mut ready = Vec::new();
    for _ in 0..3 {
        let order = h.place_order(CUSTOMER_ID).await;
        for status in [Confirmed, Preparing, ReadyForPickup] {
            h.orders.transition(order.id, Actor::System, status, None).await.unwrap();
        }
        ready.push(order.id);
    }
    let still_cooking = h.place_order(CUSTOMER_ID).await;
    h.orders.transition(still_cooking.id, Actor::System, Confirmed, None).await.unwrap();

    let available = h.orders.list_available_deliveries(None).await.unwrap();
    assert_eq!(ids(&available), ready);
    assert!(available.iter().all(|d| d.order.status == ReadyForPickup && d.order.delivery_partner_id.is_none()));

    h.orders.assign_delivery_partner(ready[0], PARTNER_ID).await.unwrap();
    let available = h.orders.list_available_deliveries(Some(1)).await.unwrap();
    assert_eq!(ids(&available), vec![ready[1]]);
    let err = h.orders.list_available_deliveries(Some(51)).await.unwrap_err();
    assert_eq!(err.kind(), "validation_error");
}

/// Which of `prepared_at`, `picked_up_at`, `delivered_at` and `cancelled_at` are set.
fn stamps(order: &Order) -> [bool; 4] {
    [
        order.prepared_at.is_some(),
        order.picked_up_at.is_some(),
        order.delivered_at.is_some(),
        order.cancelled_at.is_some(),
    ]
}

async fn every_status_pair_follows_the_graph<B: DeliveryDatabase>(mut h: Harness<B>) {
    use OrderStatusType::*;
    for from in OrderStatusType::ALL {
        for to in OrderStatusType::ALL {
            let placed = h.place_order(CUSTOMER_ID).await;
            // A courier is on every order so that OUT_FOR_DELIVERY is only ever refused by the graph
            let setup = OrderUpdate::default().with_status(from).with_delivery_partner(PARTNER_ID);
            let before = h.db.update_order(placed.id, placed.version, setup).await.unwrap();
            assert_eq!(stamps(&before), [false; 4]);

            let legal = match to {
                Refunded => from.can_refund(),
                _ => from.can_transition_to(to),
            };
            let result = h.orders.transition(before.id, Actor::System, to, None).await;
            let after = h.orders.fetch_order(before.id).await.unwrap();
            if legal {
                let moved = result.unwrap_or_else(|e| panic!("{from} -> {to} should be allowed: {e}"));
                assert_eq!(moved, after);
                assert_eq!(after.status, to, "{from} -> {to}");
                assert_eq!(after.version, before.version + 1, "{from} -> {to}");
                let expected = match to {
                    Preparing => [true, false, false, false],
                    OutForDelivery => [false, true, false, false],
                    Delivered => [false, false, true, false],
                    Cancelled | Refunded => [false, false, false, true],
                    Pending | Confirmed | ReadyForPickup => [false; 4],
                };
                assert_eq!(stamps(&after), expected, "{from} -> {to}");
            } else {
                assert_eq!(result.unwrap_err(), OrderFlowError::InvalidTransition { from, to });
                assert_eq!(after.status, from, "{from} -> {to}");
                assert_eq!(after.version, before.version, "{from} -> {to}");
                assert_eq!(stamps(&after), [false; 4], "{from} -> {to}");
            }
            h.pending_jobs();
        }
    }
}

async fn happy_path_stamps_every_step<B: DeliveryDatabase>(mut h: Harness<B>) {
    let order = h.confirmed_order(CUSTOMER_ID).await;
    assert!(order.estimated_delivery_time.is_some());
    let owner = Actor::RestaurantOwner(OWNER_ID);
    let partner = Actor::DeliveryPartner(PARTNER_ID);

    let o = h.orders.transition(order.id, owner, OrderStatusType::Preparing, None).await.unwrap();
    assert_eq!(o.version, order.version + 1);
    assert!(o.prepared_at.is_some());
    let o = h.orders.transition(order.id, owner, OrderStatusType::ReadyForPickup, None).await.unwrap();
    let err = h.orders.transition(order.id, Actor::System, OrderStatusType::OutForDelivery, None).await.unwrap_err();
    assert_eq!(err, OrderFlowError::NoDeliveryPartner(order.id));

    let o = {
        let assigned = h.orders.assign_delivery_partner(order.id, PARTNER_ID).await.unwrap();
        assert_eq!(assigned.version, o.version + 1);
        assigned
    };
    let o2 = h.orders.transition(order.id, partner, OrderStatusType::OutForDelivery, None).await.unwrap();
    assert_eq!(o2.version, o.version + 1);
    assert!(o2.picked_up_at.is_some());
    let done = h.orders.transition(order.id, partner, OrderStatusType::Delivered, None).await.unwrap();
    assert!(done.delivered_at.is_some());
    assert!(done.status.is_terminal());

    let jobs = h.pending_jobs();
    let customer_updates = notifications_for(&jobs, CUSTOMER_ID);
    // PREPARING, READY_FOR_PICKUP, assignment, OUT_FOR_DELIVERY, DELIVERED
    assert_eq!(customer_updates.len(), 5);
    assert!(customer_updates.iter().all(|m| m.kind == MessageKind::OrderStatusUpdate));
    assert_eq!(notifications_for(&jobs, PARTNER_ID).len(), 2);
}

async fn replayed_status_jobs_are_noops<B: DeliveryDatabase>(mut h: Harness<B>) {
    let order = h.confirmed_order(CUSTOMER_ID).await;
    let job = Job::UpdateOrderStatus {
        order_id: order.id,
        target_status: OrderStatusType::Preparing,
        reason: None,
        payment_status: None,
        requested_by: Actor::RestaurantOwner(OWNER_ID),
    };
    h.queue.producer().enqueue(job.clone()).unwrap();
    h.queue.producer().enqueue(job.clone()).unwrap();
    let results = h.run_jobs().await;
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    let once = h.orders.fetch_order(order.id).await.unwrap();
    assert_eq!(once.status, OrderStatusType::Preparing);
    assert_eq!(once.version, order.version + 1);

    // A stale confirmation after the order moved on is also a no-op
    h.queue.producer().enqueue(Job::update_order_status(order.id, OrderStatusType::Confirmed)).unwrap();
    h.queue.producer().enqueue(job).unwrap();
    let results = h.run_jobs().await;
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    let again = h.orders.fetch_order(order.id).await.unwrap();
    assert_eq!(again, once);
}

async fn concurrent_transitions_have_one_winner<B: DeliveryDatabase>(mut h: Harness<B>) {
    let order = h.confirmed_order(CUSTOMER_ID).await;
    // Whichever lands second is either stale or no longer legal
    let (a, b) = tokio::join!(
        h.orders.transition(order.id, Actor::RestaurantOwner(OWNER_ID), OrderStatusType::Preparing, None),
        h.orders.transition(order.id, Actor::Customer(CUSTOMER_ID), OrderStatusType::Cancelled, None),
    );
    let winners = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(winners, 1, "{a:?} / {b:?}");
    let loser = a.err().or(b.err()).unwrap();
    assert!(matches!(
        loser,
        OrderFlowError::ConcurrentModification(_) |
            OrderFlowError::InvalidTransition { .. } |
            OrderFlowError::ActorNotPermitted { .. }
    ));
    let after = h.orders.fetch_order(order.id).await.unwrap();
    assert_eq!(after.version, order.version + 1);
    assert!(matches!(after.status, OrderStatusType::Preparing | OrderStatusType::Cancelled));

    // Two writers holding the same version: the store lets exactly one through
    let other = h.confirmed_order(CUSTOMER_ID).await;
    let (x, y) = tokio::join!(
        h.db.update_order(other.id, other.version, OrderUpdate::default().with_status(OrderStatusType::Preparing)),
        h.db.update_order(other.id, other.version, OrderUpdate::default().with_status(OrderStatusType::Cancelled)),
    );
    assert_eq!([x.is_ok(), y.is_ok()].iter().filter(|ok| **ok).count(), 1);
    let conflict = x.err().or(y.err()).unwrap();
    assert_eq!(conflict, StoreError::VersionConflict { expected: other.version });
    assert_eq!(h.orders.fetch_order(other.id).await.unwrap().version, other.version + 1);
}

async fn concurrent_assignments_have_one_winner<B: DeliveryDatabase>(mut h: Harness<B>) {
    let order = h.confirmed_order(CUSTOMER_ID).await;
    let owner = Actor::RestaurantOwner(OWNER_ID);
    h.orders.transition(order.id, owner, OrderStatusType::Preparing, None).await.unwrap();
    let err = h.orders.assign_delivery_partner(order.id, PARTNER_ID).await.unwrap_err();
    assert_eq!(err, OrderFlowError::NotReadyForPickup(order.id));
    let ready = h.orders.transition(order.id, owner, OrderStatusType::ReadyForPickup, None).await.unwrap();

    let (a, b) = tokio::join!(
        h.orders.assign_delivery_partner(order.id, PARTNER_ID),
        h.orders.assign_delivery_partner(order.id, OTHER_PARTNER_ID),
    );
    let (winner, loser) = match (a, b) {
        (Ok(w), Err(l)) | (Err(l), Ok(w)) => (w, l),
        other => panic!("expected exactly one winner, got {other:?}"),
    };
    assert_eq!(loser, OrderFlowError::PartnerAlreadyAssigned(order.id));
    let after = h.orders.fetch_order(order.id).await.unwrap();
    assert_eq!(after.delivery_partner_id, winner.delivery_partner_id);
    assert_eq!(after.version, ready.version + 1);
}

async fn unpaid_orders_are_cancelled_once<B: DeliveryDatabase>(mut h: Harness<B>) {
    let unpaid = h.place_order(CUSTOMER_ID).await;
    let paid = h.confirmed_order(CUSTOMER_ID).await;
    let report = h.orders.auto_cancel_unpaid_orders().await.unwrap();
    assert_eq!(report.cancelled, vec![unpaid.id]);

    let cancelled = h.orders.fetch_order(unpaid.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatusType::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("payment timeout"));
    let at = cancelled.cancelled_at.expect("cancelled_at must be set");
    assert!(at <= Utc::now());
    assert_eq!(h.orders.fetch_order(paid.id).await.unwrap().status, OrderStatusType::Confirmed);

    let jobs = h.pending_jobs();
    let to_customer = notifications_for(&jobs, CUSTOMER_ID);
    assert_eq!(to_customer.len(), 1);
    assert_eq!(to_customer[0].kind, MessageKind::OrderCancelled);
    assert_eq!(to_customer[0].data["reason"], "payment timeout");
    assert_eq!(status_jobs(&jobs, OrderStatusType::Confirmed), 0);

    // A second sweep finds nothing
    let report = h.orders.auto_cancel_unpaid_orders().await.unwrap();
    assert!(report.cancelled.is_empty());
}

#[tokio::test]
async fn sweep_leaves_fresh_orders_alone() {
    let (mut order_config, payment_config) = eager_configs();
    order_config.unpaid_order_timeout = chrono::Duration::minutes(15);
    let mut h = Harness::with_config(MemoryDatabase::new(), Money::from(1000), order_config, payment_config).await;
    let fresh = h.place_order(CUSTOMER_ID).await;
    let stale = h.place_order(CUSTOMER_ID).await;
    h.db.set_order_created_at(stale.id, Utc::now() - chrono::Duration::minutes(16)).await;
    let report = h.orders.auto_cancel_unpaid_orders().await.unwrap();
    assert_eq!(report.cancelled, vec![stale.id]);
    assert_eq!(h.db.fetch_order(fresh.id).await.unwrap().unwrap().status, OrderStatusType::Pending);
}

#[tokio::test]
async fn restaurant_updates_are_checked_then_queued() {
    let mut h = memory_harness().await;
    let order = h.confirmed_order(CUSTOMER_ID).await;
    let err = h.orders.handle_restaurant_order_update(UserId(101), order.id, OrderStatusType::Preparing).await;
    assert!(matches!(err, Err(OrderFlowError::ActorNotPermitted { .. })));
    let err = h.orders.handle_restaurant_order_update(OWNER_ID, order.id, OrderStatusType::Delivered).await;
    assert!(matches!(err, Err(OrderFlowError::InvalidTransition { .. })));
    assert!(h.pending_jobs().is_empty());

    h.orders.handle_restaurant_order_update(OWNER_ID, order.id, OrderStatusType::Preparing).await.unwrap();
    // Nothing is written until the job runs
    assert_eq!(h.orders.fetch_order(order.id).await.unwrap().status, OrderStatusType::Confirmed);
    h.run_jobs().await;
    assert_eq!(h.orders.fetch_order(order.id).await.unwrap().status, OrderStatusType::Preparing);
}

#[tokio::test]
async fn location_updates_come_only_from_the_assigned_partner() {
    use delivery_engine::order_objects::LocationUpdate;
    let mut h = memory_harness().await;
    let order = h.confirmed_order(CUSTOMER_ID).await;
    let owner = Actor::RestaurantOwner(OWNER_ID);
    h.orders.transition(order.id, owner, OrderStatusType::Preparing, None).await.unwrap();
    h.orders.transition(order.id, owner, OrderStatusType::ReadyForPickup, None).await.unwrap();
    h.orders.assign_delivery_partner(order.id, PARTNER_ID).await.unwrap();
    h.pending_jobs();

    let update = LocationUpdate { order_id: order.id, latitude: 40.7, longitude: -74.0, timestamp: None };
    let err = h.orders.report_delivery_location(OTHER_PARTNER_ID, update.clone()).await.unwrap_err();
    assert_eq!(err.kind(), "forbidden");
    h.orders.report_delivery_location(PARTNER_ID, update).await.unwrap();
    let jobs = h.pending_jobs();
    let messages = notifications_for(&jobs, CUSTOMER_ID);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].kind, MessageKind::DeliveryLocationUpdate);
    assert_eq!(messages[0].data["latitude"], 40.7);
}

#[tokio::test]
async fn estimates_are_set_once() {
    let mut h = memory_harness().await;
    let order = h.confirmed_order(CUSTOMER_ID).await;
    let eta = order.estimated_delivery_time.unwrap();
    // 25 minutes preparation plus the 15 minute default trip
    let minutes = (eta - order.updated_at).num_minutes();
    assert!((39..=40).contains(&minutes), "{minutes}");
    assert!(h.orders.calculate_estimated_delivery(order.id).await.unwrap().is_none());
    assert_eq!(h.orders.fetch_order(order.id).await.unwrap().version, order.version);
}
