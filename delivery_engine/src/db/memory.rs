//! A thread-safe in-memory storage backend.
//!
//! All state lives behind a single `Arc<RwLock<..>>`, so every trait method is atomic with respect to every other.
//! Useful for tests and for running the server without a database file.
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    db::traits::{CatalogManagement, DeliveryDatabase, OrderManagement, PaymentManagement, StoreError},
    db_types::*,
    flow_api::order_objects::OrderQueryFilter,
};

#[derive(Default)]
struct MemoryState {
    orders: HashMap<OrderId, Order>,
    order_items: HashMap<OrderId, Vec<OrderItem>>,
    payments: HashMap<PaymentId, Payment>,
    restaurants: HashMap<RestaurantId, Restaurant>,
    menu_items: HashMap<MenuItemId, MenuItem>,
    webhook_events: HashMap<String, DateTime<Utc>>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook to backdate an order, e.g. to make it eligible for the unpaid-order sweep.
    pub async fn set_order_created_at(&self, order_id: OrderId, at: DateTime<Utc>) {
        if let Some(o) = self.state.write().await.orders.get_mut(&order_id) {
            o.created_at = at;
        }
    }

    /// Test hook to backdate a payment, e.g. to push it past the reconciliation grace window.
    pub async fn set_payment_created_at(&self, payment_id: PaymentId, at: DateTime<Utc>) {
        if let Some(p) = self.state.write().await.payments.get_mut(&payment_id) {
            p.created_at = at;
        }
    }
}

impl DeliveryDatabase for MemoryDatabase {
    fn url(&self) -> &str {
        "memory://"
    }
}

#[async_trait]
impl OrderManagement for MemoryDatabase {
    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let mut state = self.state.write().await;
        if state.orders.values().any(|o| o.order_number == order.order_number) {
            return Err(StoreError::AlreadyExists(order.order_number));
        }
        let now = Utc::now();
        let id = OrderId(state.next_id());
        let mut items = Vec::with_capacity(order.items.len());
        for i in &order.items {
            items.push(OrderItem {
                id: state.next_id(),
                order_id: id,
                menu_item_id: i.menu_item_id,
                quantity: i.quantity,
                unit_price: i.unit_price,
                total_price: i.total_price,
                special_instructions: i.special_instructions.clone(),
            });
        }
        let record = Order {
            id,
            order_number: order.order_number,
            customer_id: order.customer_id,
            restaurant_id: order.restaurant_id,
            delivery_partner_id: None,
            status: OrderStatusType::Pending,
            payment_status: PaymentStatusType::Pending,
            subtotal: order.subtotal,
            delivery_fee: order.delivery_fee,
            tax_amount: order.tax_amount,
            discount_amount: order.discount_amount,
            total_amount: order.total_amount,
            delivery_address: order.delivery_address,
            delivery_latitude: order.delivery_latitude,
            delivery_longitude: order.delivery_longitude,
            special_instructions: order.special_instructions,
            estimated_delivery_time: None,
            prepared_at: None,
            picked_up_at: None,
            delivered_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        state.orders.insert(id, record.clone());
        state.order_items.insert(id, items);
        Ok(record)
    }

    async fn fetch_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn fetch_order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        Ok(self.state.read().await.order_items.get(&order_id).cloned().unwrap_or_default())
    }

    async fn update_order(
        &self,
        order_id: OrderId,
        expected_version: i64,
        update: OrderUpdate,
    ) -> Result<Order, StoreError> {
        let mut state = self.state.write().await;
        let order = state.orders.get_mut(&order_id).ok_or(StoreError::NotFound)?;
        if order.version != expected_version {
            return Err(StoreError::VersionConflict { expected: expected_version });
        }
        update.apply_to(order, Utc::now());
        Ok(order.clone())
    }

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, StoreError> {
        let state = self.state.read().await;
        let mut orders = state.orders.values().filter(|o| query.matches(o)).cloned().collect::<Vec<_>>();
        orders.sort_by_key(|o| (o.created_at, o.id));
        if !query.oldest_first {
            orders.reverse();
        }
        let offset = usize::try_from(query.offset).unwrap_or_default();
        let limit = usize::try_from(query.limit).unwrap_or_default();
        Ok(orders.into_iter().skip(offset).take(limit).collect())
    }

    async fn fetch_stale_pending_orders(&self, created_before: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        let state = self.state.read().await;
        let mut orders = state
            .orders
            .values()
            .filter(|o| o.status == OrderStatusType::Pending && o.created_at < created_before)
            .cloned()
            .collect::<Vec<_>>();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }
}

#[async_trait]
impl PaymentManagement for MemoryDatabase {
    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, StoreError> {
        let mut state = self.state.write().await;
        if state.payments.values().any(|p| p.order_id == payment.order_id) {
            return Err(StoreError::AlreadyExists(format!("payment for {}", payment.order_id)));
        }
        if state.payments.values().any(|p| p.provider_reference == payment.provider_reference) {
            return Err(StoreError::AlreadyExists(payment.provider_reference));
        }
        let now = Utc::now();
        let id = PaymentId(state.next_id());
        let record = Payment {
            id,
            order_id: payment.order_id,
            provider_reference: payment.provider_reference,
            amount: payment.amount,
            currency: payment.currency,
            method: payment.method,
            status: PaymentStatusType::Pending,
            failure_reason: None,
            refund_amount: Money::default(),
            refunded_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        state.payments.insert(id, record.clone());
        Ok(record)
    }

    async fn fetch_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>, StoreError> {
        Ok(self.state.read().await.payments.get(&payment_id).cloned())
    }

    async fn fetch_payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>, StoreError> {
        Ok(self.state.read().await.payments.values().find(|p| p.order_id == order_id).cloned())
    }

    async fn fetch_payment_by_reference(&self, provider_reference: &str) -> Result<Option<Payment>, StoreError> {
        let state = self.state.read().await;
        Ok(state.payments.values().find(|p| p.provider_reference == provider_reference).cloned())
    }

    async fn fetch_payments_for_customer(&self, customer_id: UserId) -> Result<Vec<Payment>, StoreError> {
        let state = self.state.read().await;
        let mut payments = state
            .payments
            .values()
            .filter(|p| state.orders.get(&p.order_id).is_some_and(|o| o.customer_id == customer_id))
            .cloned()
            .collect::<Vec<_>>();
        payments.sort_by_key(|p| std::cmp::Reverse((p.created_at, p.id)));
        Ok(payments)
    }

    async fn update_payment(
        &self,
        payment_id: PaymentId,
        expected_version: i64,
        update: PaymentUpdate,
    ) -> Result<Payment, StoreError> {
        let mut state = self.state.write().await;
        let payment = state.payments.get_mut(&payment_id).ok_or(StoreError::NotFound)?;
        if payment.version != expected_version {
            return Err(StoreError::VersionConflict { expected: expected_version });
        }
        update.apply_to(payment, Utc::now());
        Ok(payment.clone())
    }

    async fn fetch_unsettled_payments(&self, created_before: DateTime<Utc>) -> Result<Vec<Payment>, StoreError> {
        let state = self.state.read().await;
        let mut payments = state
            .payments
            .values()
            .filter(|p| !p.status.is_settled() && p.created_at < created_before)
            .cloned()
            .collect::<Vec<_>>();
        payments.sort_by_key(|p| p.id);
        Ok(payments)
    }

    async fn record_webhook_event(&self, event_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if state.webhook_events.contains_key(event_id) {
            return Ok(false);
        }
        state.webhook_events.insert(event_id.to_string(), Utc::now());
        Ok(true)
    }

    async fn forget_webhook_event(&self, event_id: &str) -> Result<(), StoreError> {
        self.state.write().await.webhook_events.remove(event_id);
        Ok(())
    }

    async fn prune_webhook_events(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let count = state.webhook_events.len();
        state.webhook_events.retain(|_, seen| *seen >= before);
        Ok((count - state.webhook_events.len()) as u64)
    }
}

#[async_trait]
impl CatalogManagement for MemoryDatabase {
    async fn insert_restaurant(&self, restaurant: NewRestaurant) -> Result<Restaurant, StoreError> {
        let mut state = self.state.write().await;
        let id = RestaurantId(state.next_id());
        let record = Restaurant {
            id,
            owner_id: restaurant.owner_id,
            name: restaurant.name,
            is_active: true,
            delivery_fee: restaurant.delivery_fee,
            minimum_order: restaurant.minimum_order,
            delivery_time: restaurant.delivery_time,
            latitude: restaurant.latitude,
            longitude: restaurant.longitude,
        };
        state.restaurants.insert(id, record.clone());
        Ok(record)
    }

    async fn insert_menu_item(&self, item: NewMenuItem) -> Result<MenuItem, StoreError> {
        let mut state = self.state.write().await;
        if !state.restaurants.contains_key(&item.restaurant_id) {
            return Err(StoreError::NotFound);
        }
        let id = MenuItemId(state.next_id());
        let record =
            MenuItem { id, restaurant_id: item.restaurant_id, name: item.name, price: item.price, is_available: true };
        state.menu_items.insert(id, record.clone());
        Ok(record)
    }

    async fn fetch_restaurant(&self, restaurant_id: RestaurantId) -> Result<Option<Restaurant>, StoreError> {
        Ok(self.state.read().await.restaurants.get(&restaurant_id).cloned())
    }

    async fn fetch_menu_items(&self, ids: &[MenuItemId]) -> Result<Vec<MenuItem>, StoreError> {
        let wanted = ids.iter().collect::<HashSet<_>>();
        let state = self.state.read().await;
        let mut items = state.menu_items.values().filter(|m| wanted.contains(&m.id)).cloned().collect::<Vec<_>>();
        items.sort_by_key(|m| m.id);
        Ok(items)
    }

    async fn set_menu_item_availability(&self, id: MenuItemId, available: bool) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let item = state.menu_items.get_mut(&id).ok_or(StoreError::NotFound)?;
        item.is_available = available;
        Ok(())
    }

    async fn set_restaurant_active(&self, id: RestaurantId, active: bool) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let restaurant = state.restaurants.get_mut(&id).ok_or(StoreError::NotFound)?;
        restaurant.is_active = active;
        Ok(())
    }
}
