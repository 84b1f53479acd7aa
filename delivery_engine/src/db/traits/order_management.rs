use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::StoreError;
use crate::{
    db_types::{NewOrder, Order, OrderId, OrderItem, OrderUpdate},
    flow_api::order_objects::OrderQueryFilter,
};

/// The `OrderManagement` trait defines how orders are stored and mutated in the database backend.
///
/// Orders are never deleted. After creation, the only way to change an order is [`Self::update_order`], which is a
/// compare-and-swap on the order's `version` column.
#[async_trait]
pub trait OrderManagement {
    /// Stores a new order and its line items atomically. The order starts in `PENDING` with version 1.
    ///
    /// Returns [`StoreError::AlreadyExists`] if the order number is already taken.
    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError>;

    async fn fetch_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError>;

    async fn fetch_order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError>;

    /// Applies `update` only if the stored version still equals `expected_version`. On success the version is
    /// incremented by one and the new state is returned.
    ///
    /// Returns [`StoreError::NotFound`] if the order does not exist, and [`StoreError::VersionConflict`] if
    /// another writer got there first.
    async fn update_order(
        &self,
        order_id: OrderId,
        expected_version: i64,
        update: OrderUpdate,
    ) -> Result<Order, StoreError>;

    /// Orders matching `query`, ordered by creation time (ties broken by id) and paged with its limit and offset.
    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, StoreError>;

    /// Orders still in `PENDING` that were created before `created_before`.
    async fn fetch_stale_pending_orders(&self, created_before: DateTime<Utc>) -> Result<Vec<Order>, StoreError>;
}
