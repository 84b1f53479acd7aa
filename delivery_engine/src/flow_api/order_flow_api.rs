use std::{collections::HashMap, fmt::Debug};

use chrono::{Duration, Utc};
use log::*;

use crate::{
    db::traits::{DeliveryDatabase, StoreError},
    db_types::{
        Actor,
        Money,
        NewOrder,
        NewOrderItem,
        Order,
        OrderId,
        OrderStatusType,
        OrderUpdate,
        PaymentStatusType,
        Restaurant,
        RestaurantId,
        UserId,
    },
    flow_api::{
        errors::OrderFlowError,
        order_objects::{
            AutoCancelReport,
            LocationUpdate,
            NewOrderRequest,
            OrderDetails,
            OrderListParams,
            OrderQueryFilter,
        },
    },
    helpers::{estimate_travel_minutes, generate_order_number, haversine_km, price_order, GeoPoint, PricingPolicy},
    notifications::{MessageKind, NotificationMessage, NotificationTarget},
    queue::{Job, JobProducer},
};

const ORDER_NUMBER_ATTEMPTS: usize = 5;
/// Default and maximum page sizes for the order listings.
const CUSTOMER_PAGE: (i64, i64) = (20, 100);
const RESTAURANT_PAGE: (i64, i64) = (50, 100);
const AVAILABLE_PAGE: (i64, i64) = (20, 50);
pub const PAYMENT_TIMEOUT_REASON: &str = "payment timeout";

#[derive(Debug, Clone)]
pub struct OrderFlowConfig {
    pub pricing: PricingPolicy,
    /// How long an online order may sit in `PENDING` before it is cancelled.
    pub unpaid_order_timeout: Duration,
}

impl Default for OrderFlowConfig {
    fn default() -> Self {
        Self { pricing: PricingPolicy::default(), unpaid_order_timeout: Duration::minutes(15) }
    }
}

/// `OrderFlowApi` owns the order state machine. Every status change goes through [`Self::transition`], which checks
/// the transition graph and the actor's rights, writes with an optimistic version check and then enqueues the
/// follow-up notifications.
pub struct OrderFlowApi<B> {
    db: B,
    jobs: JobProducer,
    config: OrderFlowConfig,
}

impl<B> Debug for OrderFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B> OrderFlowApi<B> {
    pub fn new(db: B, jobs: JobProducer, config: OrderFlowConfig) -> Self {
        Self { db, jobs, config }
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn config(&self) -> &OrderFlowConfig {
        &self.config
    }
}

impl<B> OrderFlowApi<B>
where B: DeliveryDatabase
{
    /// Prices and stores a new order in `PENDING`.
    ///
    /// Item prices are read from the menu, never from the request, and customers cannot set a discount. An order
    /// whose subtotal is below the restaurant's minimum, or whose amounts overflow, is rejected before anything is
    /// written.
    pub async fn place_order(&self, customer_id: UserId, request: NewOrderRequest) -> Result<Order, OrderFlowError> {
        if request.items.is_empty() {
            return Err(OrderFlowError::ValidationError("an order needs at least one item".into()));
        }
        if request.delivery_address.trim().is_empty() {
            return Err(OrderFlowError::ValidationError("a delivery address is required".into()));
        }
        if let Some(line) = request.items.iter().find(|l| l.quantity <= 0) {
            return Err(OrderFlowError::ValidationError(format!(
                "quantity for {} must be positive",
                line.menu_item_id
            )));
        }
        let restaurant = self
            .db
            .fetch_restaurant(request.restaurant_id)
            .await?
            .filter(|r| r.is_active)
            .ok_or(OrderFlowError::RestaurantNotFound(request.restaurant_id))?;

        let ids = request.items.iter().map(|l| l.menu_item_id).collect::<Vec<_>>();
        let menu = self.db.fetch_menu_items(&ids).await?.into_iter().map(|m| (m.id, m)).collect::<HashMap<_, _>>();
        let mut items = Vec::with_capacity(request.items.len());
        for line in &request.items {
            let item = menu
                .get(&line.menu_item_id)
                .filter(|m| m.restaurant_id == restaurant.id)
                .ok_or_else(|| OrderFlowError::ValidationError(format!("{} is not on this menu", line.menu_item_id)))?;
            if !item.is_available {
                return Err(OrderFlowError::ValidationError(format!("{} is currently unavailable", item.name)));
            }
            let total_price = item.price.checked_mul(line.quantity).ok_or_else(|| {
                OrderFlowError::ValidationError(format!("quantity {} of {} is too large", line.quantity, item.name))
            })?;
            items.push(NewOrderItem {
                menu_item_id: item.id,
                quantity: line.quantity,
                unit_price: item.price,
                total_price,
                special_instructions: line.special_instructions.clone(),
            });
        }
        let too_large = || OrderFlowError::ValidationError("the order total is too large".into());
        let subtotal =
            items.iter().try_fold(Money::default(), |acc, i| acc.checked_add(i.total_price)).ok_or_else(too_large)?;
        if subtotal < restaurant.minimum_order {
            debug!("📦️ Rejecting order for {}: subtotal {subtotal} < {}", restaurant.id, restaurant.minimum_order);
            return Err(OrderFlowError::BelowMinimumOrder { subtotal, minimum: restaurant.minimum_order });
        }

        let distance = trip_distance(&restaurant, request.delivery_latitude, request.delivery_longitude);
        let priced =
            price_order(subtotal, restaurant.delivery_fee, distance, Money::default(), &self.config.pricing)
                .ok_or_else(too_large)?;
        let mut new_order = NewOrder {
            order_number: String::new(),
            customer_id,
            restaurant_id: restaurant.id,
            subtotal: priced.subtotal,
            delivery_fee: priced.delivery_fee,
            tax_amount: priced.tax_amount,
            discount_amount: priced.discount_amount,
            total_amount: priced.total_amount,
            delivery_address: request.delivery_address,
            delivery_latitude: request.delivery_latitude,
            delivery_longitude: request.delivery_longitude,
            special_instructions: request.special_instructions,
            items,
        };
        for attempt in 1..=ORDER_NUMBER_ATTEMPTS {
            new_order.order_number = generate_order_number(Utc::now());
            match self.db.insert_order(new_order.clone()).await {
                Ok(order) => {
                    info!(
                        "📦️ Order {} ({}) placed by {customer_id} at {}. Total {}",
                        order.id, order.order_number, order.restaurant_id, order.total_amount
                    );
                    return Ok(order);
                },
                Err(StoreError::AlreadyExists(_)) => {
                    warn!("📦️ Order number {} collided (attempt {attempt})", new_order.order_number);
                },
                Err(e) => return Err(e.into()),
            }
        }
        Err(OrderFlowError::DatabaseError("could not allocate a unique order number".into()))
    }

    pub async fn fetch_order(&self, order_id: OrderId) -> Result<Order, OrderFlowError> {
        self.db.fetch_order(order_id).await?.ok_or(OrderFlowError::OrderNotFound(order_id))
    }

    pub async fn fetch_order_details(&self, order_id: OrderId) -> Result<OrderDetails, OrderFlowError> {
        let order = self.fetch_order(order_id).await?;
        let items = self.db.fetch_order_items(order_id).await?;
        Ok(OrderDetails { order, items })
    }

    /// The customer's own orders with their line items, newest first.
    pub async fn list_customer_orders(
        &self,
        customer_id: UserId,
        params: OrderListParams,
    ) -> Result<Vec<OrderDetails>, OrderFlowError> {
        let (limit, offset) = page_bounds(&params, CUSTOMER_PAGE)?;
        let query =
            OrderQueryFilter::default().with_customer_id(customer_id).with_status(params.status).page(limit, offset);
        self.with_items(self.db.search_orders(query).await?).await
    }

    /// Orders placed at one restaurant, newest first. Only its owner and staff may list them. To anyone else the
    /// restaurant does not exist.
    pub async fn list_restaurant_orders(
        &self,
        actor: Actor,
        restaurant_id: RestaurantId,
        params: OrderListParams,
    ) -> Result<Vec<OrderDetails>, OrderFlowError> {
        let restaurant =
            self.db.fetch_restaurant(restaurant_id).await?.ok_or(OrderFlowError::RestaurantNotFound(restaurant_id))?;
        let allowed = match actor {
            Actor::Admin(_) | Actor::System => true,
            Actor::RestaurantOwner(id) => restaurant.owner_id == id,
            _ => false,
        };
        if !allowed {
            debug!("📦️ {actor} may not list the orders of {restaurant_id}");
            return Err(OrderFlowError::RestaurantNotFound(restaurant_id));
        }
        let (limit, offset) = page_bounds(&params, RESTAURANT_PAGE)?;
        let query = OrderQueryFilter::default()
            .with_restaurant_id(restaurant_id)
            .with_status(params.status)
            .page(limit, offset);
        self.with_items(self.db.search_orders(query).await?).await
    }

    /// Orders waiting for a courier: `READY_FOR_PICKUP` with nobody assigned, oldest first.
    pub async fn list_available_deliveries(&self, limit: Option<i64>) -> Result<Vec<OrderDetails>, OrderFlowError> {
        let params = OrderListParams { limit, ..Default::default() };
        let (limit, _) = page_bounds(&params, AVAILABLE_PAGE)?;
        let query = OrderQueryFilter::default()
            .with_status(Some(OrderStatusType::ReadyForPickup))
            .unassigned()
            .oldest_first()
            .page(limit, 0);
        self.with_items(self.db.search_orders(query).await?).await
    }

    async fn with_items(&self, orders: Vec<Order>) -> Result<Vec<OrderDetails>, OrderFlowError> {
        let mut details = Vec::with_capacity(orders.len());
        for order in orders {
            let items = self.db.fetch_order_items(order.id).await?;
            details.push(OrderDetails { order, items });
        }
        Ok(details)
    }

    async fn fetch_restaurant_for(&self, order: &Order) -> Result<Restaurant, OrderFlowError> {
        let id = order.restaurant_id;
        self.db.fetch_restaurant(id).await?.ok_or(OrderFlowError::RestaurantNotFound(id))
    }

    /// True if `actor` may see the order: its customer, the restaurant owner, the assigned courier, or staff.
    pub async fn can_view(&self, actor: &Actor, order: &Order) -> Result<bool, OrderFlowError> {
        let allowed = match actor {
            Actor::Admin(_) | Actor::System => true,
            Actor::Customer(id) => order.customer_id == *id,
            Actor::DeliveryPartner(id) => order.delivery_partner_id == Some(*id),
            Actor::RestaurantOwner(id) => self.fetch_restaurant_for(order).await?.owner_id == *id,
        };
        Ok(allowed)
    }

    /// Checks a transition without performing it.
    pub async fn check_transition(
        &self,
        order_id: OrderId,
        actor: Actor,
        target: OrderStatusType,
    ) -> Result<Order, OrderFlowError> {
        let order = self.fetch_order(order_id).await?;
        let restaurant = self.fetch_restaurant_for(&order).await?;
        validate_transition(&order, &restaurant, &actor, target)?;
        Ok(order)
    }

    /// Moves an order to `target`.
    ///
    /// On success the matching timestamp is stamped, the version goes up by exactly one, and notifications for the
    /// customer, the restaurant and the courier (if any) are enqueued. On any failure nothing is written.
    pub async fn transition(
        &self,
        order_id: OrderId,
        actor: Actor,
        target: OrderStatusType,
        reason: Option<String>,
    ) -> Result<Order, OrderFlowError> {
        self.transition_with_payment(order_id, actor, target, reason, None).await
    }

    async fn transition_with_payment(
        &self,
        order_id: OrderId,
        actor: Actor,
        target: OrderStatusType,
        reason: Option<String>,
        payment_status: Option<PaymentStatusType>,
    ) -> Result<Order, OrderFlowError> {
        let order = self.fetch_order(order_id).await?;
        let restaurant = self.fetch_restaurant_for(&order).await?;
        validate_transition(&order, &restaurant, &actor, target)?;

        let now = Utc::now();
        let mut update = OrderUpdate::default().with_status(target).stamp_for(target, now);
        if let Some(reason) = reason.clone() {
            update = update.with_cancellation_reason(reason);
        }
        if let Some(status) = payment_status {
            update = update.with_payment_status(status);
        }
        let updated = self.db.update_order(order_id, order.version, update).await.map_err(|e| match e {
            StoreError::VersionConflict { .. } => OrderFlowError::ConcurrentModification(order_id),
            StoreError::NotFound => OrderFlowError::OrderNotFound(order_id),
            e => e.into(),
        })?;
        info!("📦️ {order_id} moved {} -> {} by {actor} (v{})", order.status, updated.status, updated.version);

        let jobs = transition_follow_ups(&order, &updated, &restaurant, reason.as_deref());
        self.jobs.enqueue_all(jobs)?;
        Ok(updated)
    }

    /// Handles an `update_order_status` job.
    ///
    /// A job whose target has already been reached is a no-op, so replays leave the order untouched. Returns the
    /// updated order, or `None` if there was nothing to do.
    pub async fn apply_status_job(
        &self,
        order_id: OrderId,
        target: OrderStatusType,
        reason: Option<String>,
        payment_status: Option<PaymentStatusType>,
        requested_by: Actor,
    ) -> Result<Option<Order>, OrderFlowError> {
        let order = self.fetch_order(order_id).await?;
        if order.status.has_reached(target) {
            debug!("📦️ {order_id} is already {}. Nothing to do for a move to {target}", order.status);
            return Ok(None);
        }
        let updated = self.transition_with_payment(order_id, requested_by, target, reason, payment_status).await?;
        Ok(Some(updated))
    }

    /// Checks a transition up front and hands it to the job queue. This is how the real-time channel and the status
    /// endpoint request changes: the caller gets immediate feedback on a bad request, and the write itself happens in
    /// a worker.
    pub async fn request_transition(
        &self,
        order_id: OrderId,
        actor: Actor,
        target: OrderStatusType,
        reason: Option<String>,
    ) -> Result<u64, OrderFlowError> {
        self.check_transition(order_id, actor, target).await?;
        let job = Job::UpdateOrderStatus {
            order_id,
            target_status: target,
            reason,
            payment_status: None,
            requested_by: actor,
        };
        let id = self.jobs.enqueue(job)?;
        debug!("📦️ Transition of {order_id} to {target} by {actor} queued as job {id}");
        Ok(id)
    }

    /// An `order_update` from a restaurant owner's live connection.
    pub async fn handle_restaurant_order_update(
        &self,
        owner_id: UserId,
        order_id: OrderId,
        target: OrderStatusType,
    ) -> Result<u64, OrderFlowError> {
        self.request_transition(order_id, Actor::RestaurantOwner(owner_id), target, None).await
    }

    /// Claims a `READY_FOR_PICKUP` order for a courier. When two couriers race, exactly one wins and the other gets
    /// [`OrderFlowError::PartnerAlreadyAssigned`].
    pub async fn assign_delivery_partner(&self, order_id: OrderId, partner_id: UserId) -> Result<Order, OrderFlowError> {
        let order = self.fetch_order(order_id).await?;
        if order.delivery_partner_id.is_some() {
            return Err(OrderFlowError::PartnerAlreadyAssigned(order_id));
        }
        if order.status != OrderStatusType::ReadyForPickup {
            return Err(OrderFlowError::NotReadyForPickup(order_id));
        }
        let update = OrderUpdate::default().with_delivery_partner(partner_id);
        let updated = match self.db.update_order(order_id, order.version, update).await {
            Ok(o) => o,
            Err(StoreError::VersionConflict { .. }) => {
                let current = self.fetch_order(order_id).await?;
                return if current.delivery_partner_id.is_some() {
                    debug!("📦️ {partner_id} lost the race for {order_id}");
                    Err(OrderFlowError::PartnerAlreadyAssigned(order_id))
                } else {
                    Err(OrderFlowError::ConcurrentModification(order_id))
                };
            },
            Err(StoreError::NotFound) => return Err(OrderFlowError::OrderNotFound(order_id)),
            Err(e) => return Err(e.into()),
        };
        info!("📦️ {partner_id} assigned to {order_id}");
        let message = NotificationMessage::new(
            MessageKind::OrderStatusUpdate,
            Some(order_id),
            serde_json::json!({
                "old_status": updated.status,
                "new_status": updated.status,
                "delivery_partner_id": partner_id,
            }),
        );
        let restaurant = self.fetch_restaurant_for(&updated).await?;
        self.jobs.enqueue_all([
            Job::notify(NotificationTarget::User(updated.customer_id), message.clone()),
            Job::notify(NotificationTarget::User(restaurant.owner_id), message),
        ])?;
        Ok(updated)
    }

    /// Sets the estimated delivery time from the restaurant's preparation time plus courier travel time. Does nothing
    /// if an estimate is already set, or if the order has reached a terminal status.
    pub async fn calculate_estimated_delivery(&self, order_id: OrderId) -> Result<Option<Order>, OrderFlowError> {
        let order = self.fetch_order(order_id).await?;
        if order.estimated_delivery_time.is_some() || order.status.is_terminal() {
            trace!("📦️ {order_id} needs no delivery estimate");
            return Ok(None);
        }
        let restaurant = self.fetch_restaurant_for(&order).await?;
        let policy = &self.config.pricing;
        let preparation =
            if restaurant.delivery_time > 0 { restaurant.delivery_time } else { policy.default_preparation_minutes };
        let distance = trip_distance(&restaurant, order.delivery_latitude, order.delivery_longitude);
        let travel = estimate_travel_minutes(distance, policy);
        let eta = Utc::now() + Duration::minutes(preparation + travel);

        let update = OrderUpdate::default().with_estimated_delivery_time(eta);
        let updated = self.db.update_order(order_id, order.version, update).await.map_err(|e| match e {
            StoreError::VersionConflict { .. } => OrderFlowError::ConcurrentModification(order_id),
            e => e.into(),
        })?;
        debug!("📦️ {order_id} is estimated to arrive at {eta} ({preparation} + {travel} min)");
        self.jobs.enqueue(Job::notify(
            NotificationTarget::User(updated.customer_id),
            NotificationMessage::delivery_time_update(order_id, eta),
        ))?;
        Ok(Some(updated))
    }

    /// Cancels online orders that have sat in `PENDING` longer than the configured timeout. Orders whose payment has
    /// already completed are left for the payment confirmation to move forward.
    pub async fn auto_cancel_unpaid_orders(&self) -> Result<AutoCancelReport, OrderFlowError> {
        let cutoff = Utc::now() - self.config.unpaid_order_timeout;
        let stale = self.db.fetch_stale_pending_orders(cutoff).await?;
        let mut report = AutoCancelReport::default();
        for order in stale {
            let payment = self.db.fetch_payment_for_order(order.id).await?;
            if payment.map(|p| p.status == PaymentStatusType::Completed).unwrap_or(false) {
                debug!("📦️ {} is stale but paid. Leaving it for confirmation", order.id);
                report.skipped.push(order.id);
                continue;
            }
            let reason = Some(PAYMENT_TIMEOUT_REASON.to_string());
            match self.transition(order.id, Actor::System, OrderStatusType::Cancelled, reason).await {
                Ok(_) => report.cancelled.push(order.id),
                Err(OrderFlowError::ConcurrentModification(_)) | Err(OrderFlowError::InvalidTransition { .. }) => {
                    debug!("📦️ {} changed while the unpaid-order sweep ran. Skipping it", order.id);
                    report.skipped.push(order.id);
                },
                Err(e) => return Err(e),
            }
        }
        if !report.cancelled.is_empty() {
            info!("📦️ Cancelled {} unpaid orders", report.cancelled.len());
        }
        Ok(report)
    }

    /// Relays a courier's position to the order's customer. Only the assigned courier may report, and only while the
    /// order is on its way.
    pub async fn report_delivery_location(
        &self,
        partner_id: UserId,
        update: LocationUpdate,
    ) -> Result<(), OrderFlowError> {
        let order = self.fetch_order(update.order_id).await?;
        if order.delivery_partner_id != Some(partner_id) {
            return Err(OrderFlowError::ActorNotPermitted {
                actor: Actor::DeliveryPartner(partner_id),
                order_id: order.id,
            });
        }
        if !matches!(order.status, OrderStatusType::ReadyForPickup | OrderStatusType::OutForDelivery) {
            return Err(OrderFlowError::ValidationError(format!("{} is not being delivered", order.id)));
        }
        let message =
            NotificationMessage::delivery_location_update(order.id, partner_id, update.latitude, update.longitude);
        self.jobs.enqueue(Job::notify(NotificationTarget::User(order.customer_id), message))?;
        trace!("📦️ Location of {partner_id} for {} queued for the customer", order.id);
        Ok(())
    }
}

/// Resolves a listing's limit and offset against its `(default, maximum)` page size.
fn page_bounds(params: &OrderListParams, (default, max): (i64, i64)) -> Result<(i64, i64), OrderFlowError> {
    let limit = params.limit.unwrap_or(default);
    if !(1..=max).contains(&limit) {
        return Err(OrderFlowError::ValidationError(format!("limit must be between 1 and {max}")));
    }
    let offset = params.offset.unwrap_or(0);
    if offset < 0 {
        return Err(OrderFlowError::ValidationError("offset cannot be negative".into()));
    }
    Ok((limit, offset))
}

fn trip_distance(restaurant: &Restaurant, latitude: Option<f64>, longitude: Option<f64>) -> Option<f64> {
    let from = GeoPoint::from_parts(restaurant.latitude, restaurant.longitude)?;
    let to = GeoPoint::from_parts(latitude, longitude)?;
    Some(haversine_km(from, to))
}

/// The graph and role rules for a single transition.
pub fn validate_transition(
    order: &Order,
    restaurant: &Restaurant,
    actor: &Actor,
    target: OrderStatusType,
) -> Result<(), OrderFlowError> {
    use OrderStatusType::*;
    let current = order.status;
    let legal = match target {
        Refunded => current.can_refund(),
        _ => current != target && current.can_transition_to(target),
    };
    if !legal {
        return Err(OrderFlowError::InvalidTransition { from: current, to: target });
    }
    let is_owner = matches!(actor, Actor::RestaurantOwner(id) if *id == restaurant.owner_id);
    let is_partner = matches!(actor, Actor::DeliveryPartner(id) if Some(*id) == order.delivery_partner_id);
    let is_customer = matches!(actor, Actor::Customer(id) if *id == order.customer_id);
    let permitted = actor.is_privileged() ||
        match (current, target) {
            (_, Confirmed | Preparing | ReadyForPickup) => is_owner,
            (_, OutForDelivery | Delivered) => is_partner,
            (Pending | Confirmed, Cancelled) => is_customer,
            (Preparing, Cancelled) => is_owner,
            _ => false,
        };
    if !permitted {
        return Err(OrderFlowError::ActorNotPermitted { actor: *actor, order_id: order.id });
    }
    if target == OutForDelivery && order.delivery_partner_id.is_none() {
        return Err(OrderFlowError::NoDeliveryPartner(order.id));
    }
    Ok(())
}

fn transition_follow_ups(before: &Order, after: &Order, restaurant: &Restaurant, reason: Option<&str>) -> Vec<Job> {
    let status_update = NotificationMessage::order_status_update(after.id, before.status, after.status);
    let customer_message = if after.status == OrderStatusType::Cancelled {
        NotificationMessage::order_cancelled(after.id, reason)
    } else {
        status_update.clone()
    };
    let mut jobs = vec![
        Job::notify(NotificationTarget::User(after.customer_id), customer_message),
        Job::notify(NotificationTarget::User(restaurant.owner_id), status_update.clone()),
    ];
    if let Some(partner) = after.delivery_partner_id {
        jobs.push(Job::notify(NotificationTarget::User(partner), status_update));
    }
    if before.status == OrderStatusType::Pending && after.status == OrderStatusType::Confirmed {
        jobs.push(Job::CalculateEstimatedDelivery { order_id: after.id });
    }
    jobs
}
