use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db::sqlite::SqliteDatabaseError,
    db_types::{NewOrder, Order, OrderId, OrderItem, OrderStatusType, OrderUpdate},
    flow_api::order_objects::OrderQueryFilter,
};

const ORDER_COLUMNS: &str = "id, order_number, customer_id, restaurant_id, delivery_partner_id, status, \
                             payment_status, subtotal, delivery_fee, tax_amount, discount_amount, total_amount, \
                             delivery_address, delivery_latitude, delivery_longitude, special_instructions, \
                             estimated_delivery_time, prepared_at, picked_up_at, delivered_at, cancelled_at, \
                             cancellation_reason, version, created_at, updated_at";

/// Inserts a new order and its line items using the given connection. This is not atomic. Embed this call inside a
/// transaction and pass `&mut *tx` as the connection argument if you need atomicity.
pub async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, SqliteDatabaseError> {
    let now = Utc::now();
    let sql = format!(
        r#"
            INSERT INTO orders (
                order_number, customer_id, restaurant_id, status, payment_status,
                subtotal, delivery_fee, tax_amount, discount_amount, total_amount,
                delivery_address, delivery_latitude, delivery_longitude, special_instructions,
                version, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 1, $15, $15)
            RETURNING {ORDER_COLUMNS};
        "#
    );
    let record = sqlx::query_as::<_, Order>(&sql)
        .bind(&order.order_number)
        .bind(order.customer_id)
        .bind(order.restaurant_id)
        .bind(OrderStatusType::Pending)
        .bind(crate::db_types::PaymentStatusType::Pending)
        .bind(order.subtotal)
        .bind(order.delivery_fee)
        .bind(order.tax_amount)
        .bind(order.discount_amount)
        .bind(order.total_amount)
        .bind(&order.delivery_address)
        .bind(order.delivery_latitude)
        .bind(order.delivery_longitude)
        .bind(&order.special_instructions)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;
    for item in &order.items {
        sqlx::query(
            r#"
            INSERT INTO order_items (order_id, menu_item_id, quantity, unit_price, total_price, special_instructions)
            VALUES ($1, $2, $3, $4, $5, $6);
            "#,
        )
        .bind(record.id)
        .bind(item.menu_item_id)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.total_price)
        .bind(&item.special_instructions)
        .execute(&mut *conn)
        .await?;
    }
    debug!("🗃️ Order {} has been saved in the DB with id {}", record.order_number, record.id);
    Ok(record)
}

pub async fn fetch_order(id: OrderId, conn: &mut SqliteConnection) -> Result<Option<Order>, SqliteDatabaseError> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
    let order = sqlx::query_as::<_, Order>(&sql).bind(id).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_order_items(
    id: OrderId,
    conn: &mut SqliteConnection,
) -> Result<Vec<OrderItem>, SqliteDatabaseError> {
    let items = sqlx::query_as::<_, OrderItem>(
        r#"
        SELECT id, order_id, menu_item_id, quantity, unit_price, total_price, special_instructions
        FROM order_items WHERE order_id = $1 ORDER BY id ASC
        "#,
    )
    .bind(id)
    .fetch_all(conn)
    .await?;
    Ok(items)
}

/// Fetches orders according to the criteria in `query`, ordered by `created_at` and then `id`.
pub async fn search_orders(
    query: OrderQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, SqliteDatabaseError> {
    let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {ORDER_COLUMNS} FROM orders WHERE 1 = 1"));
    if let Some(customer_id) = query.customer_id {
        builder.push(" AND customer_id = ").push_bind(customer_id);
    }
    if let Some(restaurant_id) = query.restaurant_id {
        builder.push(" AND restaurant_id = ").push_bind(restaurant_id);
    }
    if let Some(status) = query.status {
        builder.push(" AND status = ").push_bind(status);
    }
    if query.unassigned {
        builder.push(" AND delivery_partner_id IS NULL");
    }
    let direction = if query.oldest_first { "ASC" } else { "DESC" };
    builder.push(format!(" ORDER BY created_at {direction}, id {direction}"));
    builder.push(" LIMIT ").push_bind(query.limit);
    builder.push(" OFFSET ").push_bind(query.offset);
    trace!("🗃️ Executing query: {}", builder.sql());
    let orders = builder.build_query_as::<Order>().fetch_all(conn).await?;
    trace!("🗃️ {} orders matched the search", orders.len());
    Ok(orders)
}

/// Returns orders still in `PENDING` created before `before`, oldest first.
pub async fn fetch_stale_pending_orders(
    before: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, SqliteDatabaseError> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE status = $1 AND created_at < $2 ORDER BY id ASC");
    let orders = sqlx::query_as::<_, Order>(&sql).bind(OrderStatusType::Pending).bind(before).fetch_all(conn).await?;
    trace!("🗃️ {} stale pending orders found", orders.len());
    Ok(orders)
}

/// Applies `update` if, and only if, the stored version equals `expected_version`.
///
/// Returns `Ok(None)` when no row matched, which means either the order does not exist or the version moved on. The
/// caller tells the two apart.
pub async fn update_order(
    id: OrderId,
    expected_version: i64,
    update: OrderUpdate,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, SqliteDatabaseError> {
    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE orders SET version = version + 1, updated_at = ");
    builder.push_bind(Utc::now());
    if let Some(status) = update.status {
        builder.push(", status = ").push_bind(status);
    }
    if let Some(status) = update.payment_status {
        builder.push(", payment_status = ").push_bind(status);
    }
    if let Some(partner) = update.delivery_partner_id {
        builder.push(", delivery_partner_id = ").push_bind(partner);
    }
    if let Some(eta) = update.estimated_delivery_time {
        builder.push(", estimated_delivery_time = ").push_bind(eta);
    }
    if let Some(t) = update.prepared_at {
        builder.push(", prepared_at = ").push_bind(t);
    }
    if let Some(t) = update.picked_up_at {
        builder.push(", picked_up_at = ").push_bind(t);
    }
    if let Some(t) = update.delivered_at {
        builder.push(", delivered_at = ").push_bind(t);
    }
    if let Some(t) = update.cancelled_at {
        builder.push(", cancelled_at = ").push_bind(t);
    }
    if let Some(reason) = update.cancellation_reason {
        builder.push(", cancellation_reason = ").push_bind(reason);
    }
    builder.push(" WHERE id = ").push_bind(id);
    builder.push(" AND version = ").push_bind(expected_version);
    builder.push(format!(" RETURNING {ORDER_COLUMNS}"));
    trace!("🗃️ Executing query: {}", builder.sql());
    let order = builder.build_query_as::<Order>().fetch_optional(conn).await?;
    Ok(order)
}
