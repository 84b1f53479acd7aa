use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::*;
use sqlx::{migrate, SqlitePool};

use super::{catalog, db_url, new_pool, orders, payments, SqliteDatabaseError};
use crate::{
    db::traits::{CatalogManagement, DeliveryDatabase, OrderManagement, PaymentManagement, StoreError},
    db_types::*,
    flow_api::order_objects::OrderQueryFilter,
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the URL in `FDS_DATABASE_URL`.
    pub async fn new(max_connections: u32) -> Result<Self, SqliteDatabaseError> {
        let url = db_url();
        Self::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, SqliteDatabaseError> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Brings the schema up to date. Safe to call on every start-up.
    pub async fn migrate(&self) -> Result<(), SqliteDatabaseError> {
        migrate!("./src/db/sqlite/migrations").run(&self.pool).await?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }
}

impl DeliveryDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }
}

#[async_trait]
impl OrderManagement for SqliteDatabase {
    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::insert_order(order, &mut tx).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn fetch_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order(order_id, &mut conn).await?)
    }

    async fn fetch_order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order_items(order_id, &mut conn).await?)
    }

    async fn update_order(
        &self,
        order_id: OrderId,
        expected_version: i64,
        update: OrderUpdate,
    ) -> Result<Order, StoreError> {
        let mut conn = self.pool.acquire().await?;
        match orders::update_order(order_id, expected_version, update, &mut conn).await? {
            Some(order) => Ok(order),
            None => match orders::fetch_order(order_id, &mut conn).await? {
                Some(current) => {
                    debug!(
                        "🗃️ Update to {order_id} rejected. Expected version {expected_version}, found {}",
                        current.version
                    );
                    Err(StoreError::VersionConflict { expected: expected_version })
                },
                None => Err(StoreError::NotFound),
            },
        }
    }

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::search_orders(query, &mut conn).await?)
    }

    async fn fetch_stale_pending_orders(&self, created_before: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_stale_pending_orders(created_before, &mut conn).await?)
    }
}

#[async_trait]
impl PaymentManagement for SqliteDatabase {
    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::insert_payment(payment, &mut conn).await?)
    }

    async fn fetch_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::fetch_payment(payment_id, &mut conn).await?)
    }

    async fn fetch_payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::fetch_payment_for_order(order_id, &mut conn).await?)
    }

    async fn fetch_payment_by_reference(&self, provider_reference: &str) -> Result<Option<Payment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::fetch_payment_by_reference(provider_reference, &mut conn).await?)
    }

    async fn fetch_payments_for_customer(&self, customer_id: UserId) -> Result<Vec<Payment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::fetch_payments_for_customer(customer_id, &mut conn).await?)
    }

    async fn update_payment(
        &self,
        payment_id: PaymentId,
        expected_version: i64,
        update: PaymentUpdate,
    ) -> Result<Payment, StoreError> {
        let mut conn = self.pool.acquire().await?;
        match payments::update_payment(payment_id, expected_version, update, &mut conn).await? {
            Some(payment) => Ok(payment),
            None => match payments::fetch_payment(payment_id, &mut conn).await? {
                Some(_) => Err(StoreError::VersionConflict { expected: expected_version }),
                None => Err(StoreError::NotFound),
            },
        }
    }

    async fn fetch_unsettled_payments(&self, created_before: DateTime<Utc>) -> Result<Vec<Payment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::fetch_unsettled_payments(created_before, &mut conn).await?)
    }

    async fn record_webhook_event(&self, event_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::record_webhook_event(event_id, &mut conn).await?)
    }

    async fn forget_webhook_event(&self, event_id: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::forget_webhook_event(event_id, &mut conn).await?)
    }

    async fn prune_webhook_events(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::prune_webhook_events(before, &mut conn).await?)
    }
}

#[async_trait]
impl CatalogManagement for SqliteDatabase {
    async fn insert_restaurant(&self, restaurant: NewRestaurant) -> Result<Restaurant, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(catalog::insert_restaurant(restaurant, &mut conn).await?)
    }

    async fn insert_menu_item(&self, item: NewMenuItem) -> Result<MenuItem, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(catalog::insert_menu_item(item, &mut conn).await?)
    }

    async fn fetch_restaurant(&self, restaurant_id: RestaurantId) -> Result<Option<Restaurant>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(catalog::fetch_restaurant(restaurant_id, &mut conn).await?)
    }

    async fn fetch_menu_items(&self, ids: &[MenuItemId]) -> Result<Vec<MenuItem>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(catalog::fetch_menu_items(ids, &mut conn).await?)
    }

    async fn set_menu_item_availability(&self, id: MenuItemId, available: bool) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        match catalog::set_menu_item_availability(id, available, &mut conn).await? {
            0 => Err(StoreError::NotFound),
            _ => Ok(()),
        }
    }

    async fn set_restaurant_active(&self, id: RestaurantId, active: bool) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        match catalog::set_restaurant_active(id, active, &mut conn).await? {
            0 => Err(StoreError::NotFound),
            _ => Ok(()),
        }
    }
}
