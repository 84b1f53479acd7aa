use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{MenuItemId, Order, OrderId, OrderItem, OrderStatusType, RestaurantId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLineRequest {
    pub menu_item_id: MenuItemId,
    pub quantity: i64,
    #[serde(default)]
    pub special_instructions: Option<String>,
}

/// What a customer submits when placing an order. Prices and discounts are never taken from the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderRequest {
    pub restaurant_id: RestaurantId,
    pub items: Vec<OrderLineRequest>,
    pub delivery_address: String,
    #[serde(default)]
    pub delivery_latitude: Option<f64>,
    #[serde(default)]
    pub delivery_longitude: Option<f64>,
    #[serde(default)]
    pub special_instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// A courier's position report, received over the real-time channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationUpdate {
    pub order_id: OrderId,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AutoCancelReport {
    pub cancelled: Vec<OrderId>,
    /// Orders that were stale but whose payment had already completed, or that moved on while the sweep ran.
    pub skipped: Vec<OrderId>,
}

/// Filtering and paging for the order listings, as sent by clients. Omitted values take the listing's defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderListParams {
    #[serde(default)]
    pub status: Option<OrderStatusType>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// Storage-level criteria for listing orders. Results are ordered by `created_at`, newest first unless
/// [`Self::oldest_first`] is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderQueryFilter {
    pub customer_id: Option<UserId>,
    pub restaurant_id: Option<RestaurantId>,
    pub status: Option<OrderStatusType>,
    /// Only orders that have no delivery partner yet.
    pub unassigned: bool,
    pub oldest_first: bool,
    pub limit: i64,
    pub offset: i64,
}

impl OrderQueryFilter {
    pub fn with_customer_id(mut self, customer_id: UserId) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    pub fn with_restaurant_id(mut self, restaurant_id: RestaurantId) -> Self {
        self.restaurant_id = Some(restaurant_id);
        self
    }

    pub fn with_status(mut self, status: Option<OrderStatusType>) -> Self {
        self.status = status;
        self
    }

    pub fn unassigned(mut self) -> Self {
        self.unassigned = true;
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.oldest_first = true;
        self
    }

    pub fn page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// Whether `order` passes every criterion except paging.
    pub fn matches(&self, order: &Order) -> bool {
        self.customer_id.map_or(true, |id| order.customer_id == id) &&
            self.restaurant_id.map_or(true, |id| order.restaurant_id == id) &&
            self.status.map_or(true, |s| order.status == s) &&
            (!self.unassigned || order.delivery_partner_id.is_none())
    }
}
